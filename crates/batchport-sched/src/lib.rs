//! Batchport Scheduler Integration
//!
//! Submits shell commands as jobs to batch schedulers, tracks their state
//! and cancels them. Every scheduler is driven the same way: a
//! [`BatchSystem`](dialect::BatchSystem) renders scripts and commands, a
//! [`ClusterProvider`] runs them over a [`Channel`](batchport_channel::Channel).
//!
//! ```text
//!   command + ResourceSpec
//!        │
//!        ▼  Launcher::wrap
//!   submit script ──→ push_file ──→ qsub / sbatch / condor_submit ──→ JobId
//!        │
//!        ▼  refresh (one status command per round)
//!   PENDING ──→ RUNNING ──→ DONE | FAILED | CANCELLED
//! ```
//!
//! # Supported Schedulers
//!
//! | Dialect | Submit | Status | Cancel |
//! |---------|--------|--------|--------|
//! | [`Slurm`](dialect::Slurm) | `sbatch` | `squeue` + `sacct` | `scancel` |
//! | [`Pbs`](dialect::Pbs) | `qsub` | `qstat` + `qstat -x` | `qdel` |
//! | [`Cobalt`](dialect::Cobalt) | `qsub` | `qstat -u` | `qdel` |
//! | [`GridEngine`](dialect::GridEngine) | `qsub -terse` | `qstat` | `qdel` |
//! | [`Condor`](dialect::Condor) | `condor_submit` | `condor_q` + `condor_history` | `condor_rm` |
//! | [`LocalFork`](dialect::LocalFork) | `nohup bash` | `kill -0` + exit file | `kill` |
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use batchport_launch::ResourceSpec;
//! use batchport_sched::{LocalProvider, Provider, wait_for};
//!
//! let provider = LocalProvider::local("/tmp/batchport/scripts").await?;
//! let id = provider.submit("echo hello", &ResourceSpec::new()).await?;
//! let job = wait_for(&provider, &id, Duration::from_secs(1), None).await?;
//! assert!(job.state.is_success());
//! ```

pub mod cluster;
pub mod config;
pub mod dialect;
pub mod error;
pub mod job;
pub mod native;
pub mod persistence;
pub mod provider;
pub mod retry;
pub mod tracker;

pub use cluster::{ClusterProvider, LocalProvider, ProviderSettings};
pub use config::{Config, ProviderKind};
pub use error::{SchedError, SchedResult};
pub use job::{Job, JobId, JobState};
pub use native::{NativeState, NativeStatus};
pub use persistence::{JobStore, JsonStore};
pub use provider::{Provider, StateChange, wait_for};
pub use retry::RetryPolicy;
pub use tracker::{JobEvent, JobTracker, TrackerHandle};
