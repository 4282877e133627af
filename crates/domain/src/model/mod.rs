//! Order-book domain types shared by the scanner, processor and storage.

mod cursor;
mod event;
mod order;
mod queue;

pub use cursor::*;
pub use event::*;
pub use order::*;
pub use queue::*;
