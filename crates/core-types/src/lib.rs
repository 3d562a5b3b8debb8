pub mod enums;
pub mod records;

// Re-export the core types to provide a clean public API.
pub use enums::{FetchDomain, InstrumentStatus, Region};
pub use records::{
    BacktestWindowResult, CursorUpdate, DividendEvent, Instrument, PriceBar, SplitEvent,
    SyncCursor, TriPoint,
};
