pub mod flush;

pub use flush::{ClientTotals, FlushRecord};
