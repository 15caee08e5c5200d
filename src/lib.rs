pub mod audio;
pub mod config;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod ring;
pub mod telemetry;

pub use config::SessionConfig;
pub use error::VoxmodError;
pub use params::{ModulationParams, ParamChannel, ParamSnapshot};
pub use pipeline::{ProcessorChain, Session};
pub use telemetry::{PipelineMetrics, StageState};
