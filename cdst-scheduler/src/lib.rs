mod checkpoint;
mod error;
mod progress;
mod runner;
mod scheduler;
mod util;

pub use checkpoint::{
    decode_checkpoint, encode_checkpoint, Checkpoint, CheckpointStore, FsCheckpointStore,
    CHECKPOINT_MAGIC,
};
pub use error::SchedulerError;
pub use progress::ProgressRegistry;
pub use scheduler::{ScenarioRecord, ScenarioRequest, Scheduler};
