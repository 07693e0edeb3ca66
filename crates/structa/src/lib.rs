pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod processor;
pub mod stage;

pub use config::{load_config, OrchestratorConfig};
pub use error::{
    ConfigError, DispatchError, DocumentError, ProcessError, Result, StructaError,
};
pub use events::{EventBus, JobEvent, JobStatus};
pub use orchestrator::{DocumentStatus, Orchestrator, StatusReport};
pub use processor::{ProcessorRegistry, StageProcessor};
pub use stage::StageKind;
