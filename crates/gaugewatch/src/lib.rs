//! Gaugewatch: staggered acquisition of many shared USB cameras.
//!
//! Discovery runs a permission probe before anything else, devices are
//! admitted one at a time so the shared bus is never flooded, and every feed
//! runs its own lifecycle actor that owns its stream exclusively. Frames can
//! be exported as PNG stills or sent to a recognition service for gauge
//! reading.

pub mod capture;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod export;
pub mod feed;
pub mod grid;
pub mod media;
pub mod recognition;
pub mod runner;
pub mod stagger;

#[cfg(test)]
mod testing;

pub use config::{load_config, load_config_or_default, parse_config, AppConfig, GridConfig};
pub use enumerate::{discover, DeviceDescriptor, EnumerationResult};
pub use error::{ConfigError, EnumerationError, FeedError};
pub use export::{DirectorySink, ExportSink};
pub use feed::{FeedContext, FeedController, FeedState, Lifecycle};
pub use grid::{FeedGrid, FeedSlot, GridStatus, SlotView};
pub use media::{MediaPlatform, SimulatedDevice, SimulatedMedia, StreamLease, StreamProfile};
pub use recognition::{
    DisabledRecognizer, GeminiRecognizer, RecognitionError, RecognitionRequest,
    RecognitionResponse, Recognizer,
};
pub use stagger::{Admission, ReadinessSet, StaggerScheduler};
