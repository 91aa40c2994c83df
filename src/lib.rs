pub mod checkpoint;
pub mod config;
pub mod error;
pub mod persistence;
pub mod recorder;
pub mod ring_buffer;
pub mod row;

pub use checkpoint::HistoryCheckpointer;
pub use config::Config;
pub use error::HistoryError;
pub use persistence::{load, save};
pub use recorder::{
    ActionClassifier, ActionThresholds, HistoryRecorder, ScanEvent, ScanResult, Symbol,
};
pub use ring_buffer::RingBuffer;
pub use row::{Action, Row};
