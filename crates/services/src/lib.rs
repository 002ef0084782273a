//! Orchestration for the course player: the player session service, the
//! best-effort progress sync layer, and the remote progress store adapter.

#![forbid(unsafe_code)]

pub mod error;
pub mod player;
pub mod progress_sync;
pub mod remote;

pub use course_core::Clock;

pub use error::PlayerError;
pub use player::PlayerService;
pub use progress_sync::ProgressSync;
pub use remote::{RemoteProgressStore, RemoteStoreConfig};
