//! Market module - per-instrument state, backfilling and session clock

pub mod backfill;
pub mod session;
pub mod store;

pub use backfill::{BackfillComplete, HistoryBackfiller};
pub use session::{NewsCalendar, TradingSessions};
pub use store::{InstrumentState, HISTORY_CAP};
