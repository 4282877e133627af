use sea_orm::sea_query::{ColumnDef, Expr, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{applied_events, config, orders, queue_messages};
use order_indexer_domain::storage::{StorageError, StorageResult};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let config_table = Table::create()
        .table(config::Entity)
        .col(
            ColumnDef::new(config::Column::Key)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(config::Column::Value).string().not_null())
        .to_owned();
    create_table(db, backend, config_table).await?;

    let orders_table = Table::create()
        .table(orders::Entity)
        .col(
            ColumnDef::new(orders::Column::OrderId)
                .string_len(80)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(orders::Column::Seller).string_len(42).not_null())
        .col(
            ColumnDef::new(orders::Column::TokenToSell)
                .string_len(42)
                .not_null(),
        )
        .col(
            ColumnDef::new(orders::Column::TokenToPay)
                .string_len(42)
                .not_null(),
        )
        .col(
            ColumnDef::new(orders::Column::AmountToSell)
                .string_len(80)
                .not_null(),
        )
        .col(
            ColumnDef::new(orders::Column::AmountRemaining)
                .string_len(80)
                .not_null(),
        )
        .col(
            ColumnDef::new(orders::Column::PricePerToken)
                .string_len(80)
                .not_null(),
        )
        .col(
            ColumnDef::new(orders::Column::MinOrderSize)
                .string_len(80)
                .not_null(),
        )
        .col(
            ColumnDef::new(orders::Column::IsActive)
                .boolean()
                .not_null()
                .default(true),
        )
        .col(
            ColumnDef::new(orders::Column::CreatedAtBlockNumber)
                .big_integer()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, orders_table).await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_orders_created_at_block_number")
            .table(orders::Entity)
            .col(orders::Column::CreatedAtBlockNumber)
            .to_owned(),
    )
    .await?;

    let ledger_table = Table::create()
        .table(applied_events::Entity)
        .col(
            ColumnDef::new(applied_events::Column::EventKey)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(applied_events::Column::OrderId)
                .string_len(80)
                .not_null(),
        )
        .col(
            ColumnDef::new(applied_events::Column::EventKind)
                .string_len(32)
                .not_null(),
        )
        .col(
            ColumnDef::new(applied_events::Column::BlockNumber)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(applied_events::Column::AppliedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    create_table(db, backend, ledger_table).await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_applied_events_block_number")
            .table(applied_events::Entity)
            .col(applied_events::Column::BlockNumber)
            .to_owned(),
    )
    .await?;

    let queue_table = Table::create()
        .table(queue_messages::Entity)
        .col(
            ColumnDef::new(queue_messages::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(queue_messages::Column::Queue)
                .string_len(128)
                .not_null(),
        )
        .col(
            ColumnDef::new(queue_messages::Column::EventKind)
                .string_len(32)
                .not_null(),
        )
        .col(ColumnDef::new(queue_messages::Column::Payload).text().not_null())
        .col(
            ColumnDef::new(queue_messages::Column::BlockNumber)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(queue_messages::Column::TransactionHash)
                .string_len(66)
                .not_null(),
        )
        .col(
            ColumnDef::new(queue_messages::Column::LogIndex)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(queue_messages::Column::AttemptCount)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(queue_messages::Column::MaxAttempts)
                .integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(queue_messages::Column::FirstSeenAt)
                .date_time()
                .not_null(),
        )
        .col(
            ColumnDef::new(queue_messages::Column::AvailableAt)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(queue_messages::Column::LastError).text().null())
        .to_owned();
    create_table(db, backend, queue_table).await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_queue_messages_queue_available_at")
            .table(queue_messages::Entity)
            .col(queue_messages::Column::Queue)
            .col(queue_messages::Column::AvailableAt)
            .to_owned(),
    )
    .await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: IndexCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
