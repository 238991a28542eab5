pub mod chunk_index;
pub mod config;
pub mod context;
pub mod downloader;
pub mod filename;
pub mod http;
pub mod manager;
pub mod models;
pub mod partition;
pub mod progress;
pub mod sampler;
pub mod session;
pub mod state_manager;

#[cfg(test)]
mod testing;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::{default_config_path, EngineConfig};
    pub use crate::manager::{DownloadEngine, EngineError};
    pub use crate::models::{Chunk, ChunkStatus, SharedTask, TaskDescriptor, TaskStatus};
    pub use crate::progress::{NoopListener, ProgressListener};
    pub use crate::session::{SessionOutcome, SetupError, TaskPaths};
    pub use crate::state_manager::{StateError, TaskStore};
}
