//! BridgeLoop - Change Detection and Delivery
//!
//! ## Responsibilities
//!
//! - Poll the repository for detections beyond the cursor
//! - Deliver them in ascending id order, one at a time
//! - Advance the durable cursor only after full-batch delivery
//!
//! Cycle state machine: Idle -> Fetching -> Delivering -> Advancing -> Idle,
//! with Idle -> Backoff -> Idle when the database is unavailable. Exactly one
//! cycle runs at a time, so the cursor needs no locking beyond the loop's own
//! mutex.
//!
//! Delivery guarantees: at-least-once, in id order within a run. A publish
//! failure at row *k* ends the cycle without advancing, so rows delivered
//! earlier in the same cycle may be re-delivered next cycle; payloads carry
//! the id so consumers can de-duplicate.

use crate::cursor_store::CursorStore;
use crate::detection_repository::DetectionRepository;
use crate::error::Result;
use crate::publisher::Publisher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

/// Ceiling for the database-unavailable backoff
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Outcome of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing new beyond the cursor
    Idle,
    /// Batch fully delivered and cursor advanced
    Completed { delivered: usize },
    /// Batch delivered and advanced, but it was full; more backlog likely
    BacklogRemaining { delivered: usize },
    /// Publish failed mid-batch; cursor unchanged, same point retried next cycle
    PublishHalted { failed_id: i64, delivered: usize },
}

/// Tracks the delivery cursor and runs individual poll cycles.
pub struct ChangeTracker {
    repository: Arc<DetectionRepository>,
    store: CursorStore,
    last_delivered_id: i64,
    batch_size: u32,
    /// Failed publish attempts per row id, for the optional give-up policy.
    /// In-memory only: a restart grants a failing row a fresh round, which
    /// is safe under at-least-once.
    publish_attempts: HashMap<i64, u32>,
    max_publish_attempts: Option<u32>,
}

impl ChangeTracker {
    /// Load the cursor, seeding it on first run.
    ///
    /// First run starts before all rows, or at the current max id when the
    /// backlog is configured to be skipped. The seed is persisted immediately
    /// so a restart lands in the same place.
    pub async fn load(
        repository: Arc<DetectionRepository>,
        store: CursorStore,
        batch_size: u32,
        skip_backlog: bool,
        max_publish_attempts: Option<u32>,
    ) -> Result<Self> {
        let last_delivered_id = match store.load().await? {
            Some(id) => {
                tracing::info!(last_delivered_id = id, "Cursor loaded");
                id
            }
            None => {
                let seed = if skip_backlog {
                    repository.max_id().await?
                } else {
                    0
                };
                store.persist(seed).await?;
                tracing::info!(last_delivered_id = seed, skip_backlog, "Cursor initialized");
                seed
            }
        };

        Ok(Self {
            repository,
            store,
            last_delivered_id,
            batch_size,
            publish_attempts: HashMap::new(),
            max_publish_attempts,
        })
    }

    pub fn last_delivered_id(&self) -> i64 {
        self.last_delivered_id
    }

    /// Run one Fetch -> Deliver -> Advance cycle.
    ///
    /// Database errors propagate to the caller for backoff; publish failures
    /// end the cycle with the cursor unchanged.
    pub async fn run_cycle(&mut self, publisher: &dyn Publisher) -> Result<CycleOutcome> {
        let batch = self
            .repository
            .fetch_since(self.last_delivered_id, self.batch_size)
            .await?;

        let Some(max_scanned_id) = batch.max_scanned_id else {
            return Ok(CycleOutcome::Idle);
        };

        let mut delivered = 0usize;
        for detection in &batch.detections {
            if self.given_up(detection.id) {
                let attempts = self.publish_attempts.get(&detection.id).copied().unwrap_or(0);
                tracing::error!(
                    id = detection.id,
                    attempts,
                    "Giving up on row after max publish attempts, skipping"
                );
                continue;
            }

            match publisher.publish(detection).await {
                Ok(()) => {
                    delivered += 1;
                    self.publish_attempts.remove(&detection.id);
                }
                Err(e) => {
                    let attempts = self.publish_attempts.entry(detection.id).or_insert(0);
                    *attempts += 1;
                    tracing::warn!(
                        id = detection.id,
                        attempt = *attempts,
                        error = %e,
                        "Publish failed, batch halted without cursor advance"
                    );
                    return Ok(CycleOutcome::PublishHalted {
                        failed_id: detection.id,
                        delivered,
                    });
                }
            }
        }

        // Advance: durable write first, memory second. A crash in between
        // re-delivers the batch rather than skipping it.
        self.store.persist(max_scanned_id).await?;
        self.last_delivered_id = max_scanned_id;
        self.publish_attempts.retain(|id, _| *id > max_scanned_id);

        if delivered > 0 {
            tracing::info!(
                delivered,
                last_delivered_id = max_scanned_id,
                "Batch delivered and cursor advanced"
            );
        }

        Ok(if batch.full {
            CycleOutcome::BacklogRemaining { delivered }
        } else {
            CycleOutcome::Completed { delivered }
        })
    }

    fn given_up(&self, id: i64) -> bool {
        match self.max_publish_attempts {
            Some(max) => self
                .publish_attempts
                .get(&id)
                .is_some_and(|&attempts| attempts >= max),
            None => false,
        }
    }
}

/// BridgeLoop instance - the only component with a running lifecycle
pub struct BridgeLoop {
    tracker: Arc<Mutex<ChangeTracker>>,
    publisher: Arc<dyn Publisher>,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
    wake: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeLoop {
    pub fn new(
        tracker: ChangeTracker,
        publisher: Arc<dyn Publisher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            publisher,
            poll_interval,
            running: Arc::new(RwLock::new(false)),
            wake: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Start the poll loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Bridge loop already running");
                return;
            }
            *running = true;
        }

        tracing::info!(poll_interval = ?self.poll_interval, "Starting bridge loop");

        let tracker = self.tracker.clone();
        let publisher = self.publisher.clone();
        let running = self.running.clone();
        let wake = self.wake.clone();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut backoff = poll_interval;

            loop {
                if !*running.read().await {
                    break;
                }

                let outcome = {
                    let mut tracker = tracker.lock().await;
                    tracker.run_cycle(publisher.as_ref()).await
                };

                let wait = match outcome {
                    Ok(CycleOutcome::BacklogRemaining { .. }) => {
                        // Drain the backlog without waiting out the interval
                        backoff = poll_interval;
                        continue;
                    }
                    Ok(CycleOutcome::Idle) | Ok(CycleOutcome::Completed { .. }) => {
                        backoff = poll_interval;
                        poll_interval
                    }
                    Ok(CycleOutcome::PublishHalted { failed_id, .. }) => {
                        // The publisher reconnects on its own; retry the same
                        // cursor at the normal cadence.
                        tracing::warn!(failed_id, "Cycle halted on publish failure");
                        backoff = poll_interval;
                        poll_interval
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::error!(error = %e, backoff = ?backoff, "Cycle failed, backing off");
                        let wait = backoff;
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                        wait
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Unexpected cycle error");
                        poll_interval
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = wake.notified() => {}
                }
            }

            tracing::info!("Bridge loop stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Request a poll cycle without waiting for the interval
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the loop, letting an in-flight cycle finish Advancing first.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }
        self.wake.notify_one();

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Bridge loop task join failed");
            }
        }
    }
}
