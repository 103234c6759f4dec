pub mod cache;
pub mod dirs;
pub mod download;
pub mod extract;
pub mod launch;
pub mod pipeline;
pub mod progress;
pub mod release;
pub mod state;
pub mod tag;
pub mod verify;

pub use pipeline::{InstallRequest, LaunchRequest, Orchestrator};
pub use state::{PipelineRun, PipelineState};
pub use tag::ProfileFolderState;
