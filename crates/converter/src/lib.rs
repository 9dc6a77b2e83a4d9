pub mod config;
pub mod error;
pub mod job;
pub mod status;
pub mod formats;
pub mod ffprobe;
pub mod progress;
pub mod signal;
pub mod abort;
pub mod metadata;
pub mod supervisor;
pub mod pool;

pub use config::ConverterConfig;
pub use error::{AbortError, ConversionError, SubmitError, ABORT_SENTINEL};
pub use job::{ConversionFlags, ConversionJob};
pub use status::{ActiveJob, ConversionStatus, ProcessGuard, ProcessHandle, StatusStore, TerminationReason};
pub use formats::{CommandBuilder, TargetFormat};
pub use abort::abort;
pub use supervisor::Supervisor;
pub use pool::WorkerPool;
