//! CLI command implementations.

pub mod cancel;
pub mod common;
pub mod jobs;
pub mod release;
pub mod status;
pub mod submit;
pub mod wait;
pub mod watch;
