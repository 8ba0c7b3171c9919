//! Background polling of providers and job state change events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error};

use crate::job::{JobId, JobState};
use crate::provider::Provider;

/// Default capacity of the event channel.
const EVENT_CAPACITY: usize = 1024;

/// A job moved between states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub provider: String,
    pub job_id: JobId,
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
}

/// Polls a set of providers and broadcasts state changes.
pub struct JobTracker {
    providers: Vec<Arc<dyn Provider>>,
    events: broadcast::Sender<JobEvent>,
    retention: Option<Duration>,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            providers: Vec::new(),
            events,
            retention: None,
        }
    }

    /// Track jobs of another provider.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Drop terminal jobs after they have been unchanged this long.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Receive events from the next round on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Refresh every provider concurrently and broadcast the changes.
    /// A provider whose refresh fails is logged and skipped.
    pub async fn poll_once(&self) -> Vec<JobEvent> {
        let rounds = join_all(self.providers.iter().map(|p| p.refresh())).await;

        let mut events = Vec::new();
        for (provider, round) in self.providers.iter().zip(rounds) {
            match round {
                Ok(changes) => {
                    let at = Utc::now();
                    events.extend(changes.into_iter().map(|c| JobEvent {
                        provider: provider.label().to_string(),
                        job_id: c.job_id,
                        from: c.from,
                        to: c.to,
                        at,
                    }));
                }
                Err(e) => {
                    error!(provider = provider.label(), "Error refreshing jobs: {}", e);
                }
            }
        }

        for event in &events {
            // No subscribers is fine.
            let _ = self.events.send(event.clone());
        }

        if let Some(retention) = self.retention {
            for provider in &self.providers {
                provider.sweep(retention).await;
            }
        }

        events
    }

    /// Poll every `poll_interval` until the handle is shut down.
    pub fn start(self: Arc<Self>, poll_interval: Duration) -> TrackerHandle {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let events = self.poll_once().await;
                        if !events.is_empty() {
                            debug!(count = events.len(), "Tracker round");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        TrackerHandle { shutdown, task }
    }
}

/// Stops a running tracker.
pub struct TrackerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Signal the loop to stop and wait for the round in progress.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Tracker task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
