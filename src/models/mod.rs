pub mod flush;
pub mod mac;
pub mod presence;

pub use flush::{FlushBatch, FlushCause, FlushPolicy};
pub use mac::{MacAddress, MacParseError};
pub use presence::{Observation, PresenceRecord, PresenceSnapshot};
