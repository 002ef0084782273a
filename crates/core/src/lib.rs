//! Domain logic for the course player: lesson models, the playback
//! progression state machine, and the completion/unlock policies. No I/O
//! lives here; persistence and sync are layered on top in `course-storage`
//! and `course-services`.

#![forbid(unsafe_code)]

pub mod aggregate;
pub mod completion;
pub mod engine;
pub mod milestone;
pub mod model;
pub mod playback;
pub mod seek;
pub mod time;
pub mod unlock;

pub use time::Clock;
