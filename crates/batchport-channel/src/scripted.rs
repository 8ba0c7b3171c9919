//! In-memory channel driven by a handler closure.
//!
//! Records every call so tests can assert on the exact commands a provider
//! issued, the scripts it staged, and that calls never overlapped.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::channel::{Channel, ExecOutput};
use crate::error::{ChannelError, ChannelResult};

type Handler = dyn Fn(&str) -> ChannelResult<ExecOutput> + Send + Sync;

/// A call made on a [`ScriptedChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Execute(String),
    Push { local: PathBuf, remote: PathBuf },
    Pull { remote: PathBuf, local: PathBuf },
}

/// Boundary of a call, tagged with the call's sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    Begin(usize),
    End(usize),
}

/// Test double for [`Channel`].
pub struct ScriptedChannel {
    hostname: String,
    script_dir: PathBuf,
    handler: Box<Handler>,
    delay: Duration,
    seq: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
    events: Mutex<Vec<CallEvent>>,
    files: Mutex<FxHashMap<PathBuf, Vec<u8>>>,
}

impl ScriptedChannel {
    /// Create a channel answering `execute` with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> ChannelResult<ExecOutput> + Send + Sync + 'static,
    {
        Self {
            hostname: "scripted".to_string(),
            script_dir: PathBuf::from("/scripted/scripts"),
            handler: Box::new(handler),
            delay: Duration::ZERO,
            seq: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            files: Mutex::new(FxHashMap::default()),
        }
    }

    /// Sleep this long inside every call, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Override the reported script directory.
    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = dir.into();
        self
    }

    /// Seed a file that `pull_file` can retrieve.
    pub fn put_remote_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        lock(&self.files).insert(path.into(), contents.into());
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Commands passed to `execute`, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Execute(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Call boundary events, in order.
    pub fn events(&self) -> Vec<CallEvent> {
        lock(&self.events).clone()
    }

    /// Whether any call began before the previous one ended.
    pub fn has_interleaving(&self) -> bool {
        let mut open: Option<usize> = None;
        for event in lock(&self.events).iter() {
            match (*event, open) {
                (CallEvent::Begin(_), Some(_)) => return true,
                (CallEvent::Begin(n), None) => open = Some(n),
                (CallEvent::End(n), Some(m)) if n == m => open = None,
                (CallEvent::End(_), _) => return true,
            }
        }
        false
    }

    /// Contents of a file staged with `push_file`, as text.
    pub fn pushed_file(&self, remote: &Path) -> Option<String> {
        lock(&self.files)
            .get(remote)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    async fn enter(&self, call: RecordedCall) -> usize {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).push(call);
        lock(&self.events).push(CallEvent::Begin(n));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        n
    }

    fn leave(&self, n: usize) {
        lock(&self.events).push(CallEvent::End(n));
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    async fn execute(&self, command: &str, _timeout: Duration) -> ChannelResult<ExecOutput> {
        let n = self.enter(RecordedCall::Execute(command.to_string())).await;
        let result = (self.handler)(command);
        self.leave(n);
        result
    }

    async fn push_file(&self, local_path: &Path, remote_path: &Path) -> ChannelResult<()> {
        let n = self
            .enter(RecordedCall::Push {
                local: local_path.to_path_buf(),
                remote: remote_path.to_path_buf(),
            })
            .await;
        let result = tokio::fs::read(local_path).await.map_err(ChannelError::from);
        if let Ok(bytes) = &result {
            lock(&self.files).insert(remote_path.to_path_buf(), bytes.clone());
        }
        self.leave(n);
        result.map(|_| ())
    }

    async fn pull_file(&self, remote_path: &Path, local_path: &Path) -> ChannelResult<()> {
        let n = self
            .enter(RecordedCall::Pull {
                remote: remote_path.to_path_buf(),
                local: local_path.to_path_buf(),
            })
            .await;
        let contents = lock(&self.files).get(remote_path).cloned();
        let result = match contents {
            Some(bytes) => tokio::fs::write(local_path, bytes)
                .await
                .map_err(ChannelError::from),
            None => Err(ChannelError::file_copy(
                &self.hostname,
                format!("no such file: {}", remote_path.display()),
            )),
        };
        self.leave(n);
        result
    }
}
