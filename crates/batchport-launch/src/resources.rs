//! Resource requests attached to a submission.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LaunchError;

/// Wall-clock limit, written as `HH:MM:SS`.
///
/// Hours are unbounded; minutes and seconds must be below 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Walltime {
    seconds: u64,
}

impl Walltime {
    /// Create a walltime from a number of seconds.
    pub const fn from_secs(seconds: u64) -> Self {
        Self { seconds }
    }

    /// Create a walltime from hours, minutes and seconds.
    pub const fn from_hms(hours: u64, minutes: u64, seconds: u64) -> Self {
        Self {
            seconds: hours * 3600 + minutes * 60 + seconds,
        }
    }

    /// Total seconds.
    pub const fn as_secs(&self) -> u64 {
        self.seconds
    }

    /// Total minutes, rounded up. Schedulers that take minutes must not
    /// receive a shorter limit than requested.
    pub const fn as_minutes_ceil(&self) -> u64 {
        self.seconds.div_ceil(60)
    }
}

impl Default for Walltime {
    fn default() -> Self {
        Self::from_hms(0, 10, 0)
    }
}

impl fmt::Display for Walltime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.seconds / 3600;
        let m = (self.seconds % 3600) / 60;
        let s = self.seconds % 60;
        write!(f, "{:02}:{:02}:{:02}", h, m, s)
    }
}

impl FromStr for Walltime {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LaunchError::InvalidWalltime(s.to_string());

        let parts: Vec<&str> = s.trim().split(':').collect();
        let [h, m, sec] = parts.as_slice() else {
            return Err(invalid());
        };

        let field = |p: &str| -> Result<u64, LaunchError> {
            if p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            p.parse().map_err(|_| invalid())
        };

        let (h, m, sec) = (field(h)?, field(m)?, field(sec)?);
        if m >= 60 || sec >= 60 {
            return Err(invalid());
        }
        let seconds = h
            .checked_mul(3600)
            .and_then(|x| x.checked_add(m * 60 + sec))
            .ok_or_else(invalid)?;
        Ok(Self { seconds })
    }
}

impl TryFrom<String> for Walltime {
    type Error = LaunchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Walltime> for String {
    fn from(value: Walltime) -> Self {
        value.to_string()
    }
}

/// Resources requested for a single job. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    /// Number of nodes.
    pub nodes: u32,
    /// Tasks (command copies) started on each node.
    pub tasks_per_node: u32,
    /// Cores allotted to each task.
    pub cores_per_task: u32,
    /// Memory per node in megabytes.
    pub memory_mb: Option<u64>,
    /// Wall-clock limit.
    pub walltime: Walltime,
    /// Queue or partition.
    pub queue: Option<String>,
    /// Account or project to charge.
    pub account: Option<String>,
    /// Raw scheduler directives appended to the submit script header.
    pub overrides: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            nodes: 1,
            tasks_per_node: 1,
            cores_per_task: 1,
            memory_mb: None,
            walltime: Walltime::default(),
            queue: None,
            account: None,
            overrides: String::new(),
        }
    }
}

impl ResourceSpec {
    /// Single-node, single-task request with default walltime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node count.
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self
    }

    /// Set tasks per node.
    pub fn with_tasks_per_node(mut self, tasks: u32) -> Self {
        self.tasks_per_node = tasks;
        self
    }

    /// Set cores per task.
    pub fn with_cores_per_task(mut self, cores: u32) -> Self {
        self.cores_per_task = cores;
        self
    }

    /// Set memory per node.
    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    /// Set the walltime.
    pub fn with_walltime(mut self, walltime: Walltime) -> Self {
        self.walltime = walltime;
        self
    }

    /// Set the queue or partition.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set the account.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Set raw scheduler directives.
    pub fn with_overrides(mut self, overrides: impl Into<String>) -> Self {
        self.overrides = overrides.into();
        self
    }

    /// Total tasks across all nodes.
    pub fn total_tasks(&self) -> u32 {
        self.nodes.saturating_mul(self.tasks_per_node)
    }

    /// Total cores across all nodes.
    pub fn total_cores(&self) -> u32 {
        self.total_tasks().saturating_mul(self.cores_per_task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_walltime_parse_and_display() {
        let w: Walltime = "01:30:00".parse().unwrap();
        assert_eq!(w.as_secs(), 5400);
        assert_eq!(w.to_string(), "01:30:00");
        assert_eq!(w.as_minutes_ceil(), 90);

        let w: Walltime = "120:00:01".parse().unwrap();
        assert_eq!(w.to_string(), "120:00:01");
        assert_eq!(w.as_minutes_ceil(), 7201);

        assert_eq!(Walltime::default().to_string(), "00:10:00");
    }

    #[test]
    fn test_walltime_rejects_malformed() {
        for bad in ["", "10", "10:00", "1:2:3:4", "00:60:00", "00:00:60", "aa:00:00", "-1:00:00", "1: 0:00"] {
            assert!(bad.parse::<Walltime>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_spec_serde_defaults() {
        let spec: ResourceSpec =
            serde_json::from_str(r#"{"nodes": 2, "walltime": "00:30:00", "queue": "debug"}"#)
                .unwrap();
        assert_eq!(spec.nodes, 2);
        assert_eq!(spec.tasks_per_node, 1);
        assert_eq!(spec.walltime, Walltime::from_hms(0, 30, 0));
        assert_eq!(spec.queue.as_deref(), Some("debug"));

        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains(r#""walltime":"00:30:00""#));

        let err = serde_json::from_str::<ResourceSpec>(r#"{"walltime": "forever"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_totals() {
        let spec = ResourceSpec::new()
            .with_nodes(4)
            .with_tasks_per_node(8)
            .with_cores_per_task(2);
        assert_eq!(spec.total_tasks(), 32);
        assert_eq!(spec.total_cores(), 64);
    }

    proptest! {
        #[test]
        fn walltime_text_form_is_stable(h in 0u64..10_000, m in 0u64..60, s in 0u64..60) {
            let text = format!("{:02}:{:02}:{:02}", h, m, s);
            let parsed: Walltime = text.parse().unwrap();
            prop_assert_eq!(parsed, Walltime::from_hms(h, m, s));
            prop_assert_eq!(parsed.to_string(), text);
        }

        #[test]
        fn walltime_rejects_out_of_range_minutes(h in 0u64..100, m in 60u64..1000, s in 0u64..60) {
            let text = format!("{}:{}:{}", h, m, s);
            prop_assert!(text.parse::<Walltime>().is_err());
        }
    }
}
