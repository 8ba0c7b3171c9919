//! Batchport Channels
//!
//! A [`Channel`] is the transport through which a provider reaches its
//! execution target: it runs shell commands and stages files.
//!
//! ```text
//!   command, timeout ──→ execute()   ──→ ExecOutput { exit_code, stdout, stderr }
//!   local, remote    ──→ push_file() ──→ file staged (parent dirs created)
//!   remote, local    ──→ pull_file() ──→ file retrieved
//! ```
//!
//! # Implementations
//!
//! | Channel | Transport | Notes |
//! |---------|-----------|-------|
//! | [`LocalChannel`] | `sh -c` child processes | killed on timeout |
//! | [`SshChannel`] | libssh2 session + SFTP | blocking calls off the runtime |
//! | [`ScriptedChannel`] | in-memory handler | records call boundaries for tests |
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use batchport_channel::{Channel, LocalChannel};
//!
//! let channel = LocalChannel::new("/tmp/batchport/scripts").await?;
//! let out = channel.execute("uname -a", Duration::from_secs(5)).await?;
//! println!("{}", out.stdout);
//! ```

pub mod channel;
pub mod error;
pub mod local;
pub mod scripted;
pub mod shell;
pub mod ssh;

pub use channel::{Channel, ExecOutput};
pub use error::{ChannelError, ChannelResult};
pub use local::LocalChannel;
pub use scripted::{CallEvent, RecordedCall, ScriptedChannel};
pub use shell::{quote_path, shell_quote};
pub use ssh::{SshChannel, SshConfig};
