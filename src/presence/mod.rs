pub mod ingest;
pub mod table;

pub use ingest::{IngestOutcome, IngestTask, PresenceHandle};
pub use table::PresenceTable;
