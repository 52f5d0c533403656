// Streaming persistence pipeline
pub mod recorder; // bounded queue + background flush task per market
pub mod types; // fixed day-file row schema

pub use recorder::{read_day_file, EventRecorder, RecorderConfig};
pub use types::{PersistedRecord, RecorderError};
