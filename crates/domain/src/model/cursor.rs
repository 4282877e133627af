use serde::{Deserialize, Serialize};

pub const INITIALIZATION_BLOCK_KEY: &str = "initializationBlock";
pub const CURRENT_BLOCK_HEIGHT_KEY: &str = "currentBlockHeight";
pub const INITIALIZED_MARKER_KEY: &str = "database_initialized";
pub const UPDATED_AT_KEY: &str = "updateAt";

/// Scan position persisted in the config table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    /// Baseline block the deployment was seeded with; never rewritten.
    pub initialization_block: u64,
    /// Next block the scanner will fetch.
    pub current_block_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Seeded,
    AlreadyInitialized,
}

/// Store mutations chosen by a reindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexPlan {
    /// Drop every order and ledger row; restart from the baseline.
    FullReset { current_block_height: u64 },
    /// Drop orders last mutated in `[from_block, to_block]` and ledger rows at
    /// or above `from_block`; restart from `from_block`.
    Rewind { from_block: u64, to_block: u64 },
}

impl ReindexPlan {
    pub fn current_block_height(&self) -> u64 {
        match self {
            Self::FullReset {
                current_block_height,
            } => *current_block_height,
            Self::Rewind { from_block, .. } => *from_block,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewindSummary {
    pub orders_deleted: u64,
    pub ledger_entries_deleted: u64,
    /// Deleted orders whose placement precedes the rewind target. Replay
    /// cannot rebuild them.
    pub orphaned_orders: u64,
}
