use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::CloudClient;
use crate::diff::{change_events, diff_snapshots};
use crate::normalize::{normalize_spec, normalize_status};
use crate::types::{CapabilityMap, Command, DpValue, Event, StatusSnapshot};
use crate::{Error, Result};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(20);

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&StatusSnapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No usable token; the next cycle authenticates first.
    #[default]
    Unauthenticated,
    Authenticating,
    /// Last poll succeeded.
    Polling,
    /// Last poll failed; the previous snapshot is still served.
    Stale,
    Disposed,
}

#[derive(Default)]
struct PollState {
    snapshot: StatusSnapshot,
    last_update_success: bool,
    last_error: Option<String>,
    last_success_at: Option<DateTime<Utc>>,
    phase: Phase,
}

pub struct CoordinatorBuilder {
    client: CloudClient,
    device_id: String,
    interval: Duration,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl CoordinatorBuilder {
    pub fn new(client: CloudClient, device_id: impl Into<String>) -> Self {
        Self {
            client,
            device_id: device_id.into(),
            interval: DEFAULT_SCAN_INTERVAL,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&StatusSnapshot) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator {
            inner: Arc::new(Inner {
                device_id: self.device_id,
                interval: self.interval,
                client: Mutex::new(self.client),
                state: RwLock::new(PollState::default()),
                refresh_requested: Notify::new(),
                cancel: CancellationToken::new(),
                tasks: StdMutex::new(Vec::new()),
                event_callbacks: self.event_callbacks,
                snapshot_callbacks: self.snapshot_callbacks,
            }),
        }
    }
}

struct Inner {
    device_id: String,
    interval: Duration,
    /// Held for a whole fetch cycle or command submission, which keeps
    /// polls for this device strictly serial and token refreshes unraced.
    client: Mutex<CloudClient>,
    state: RwLock<PollState>,
    refresh_requested: Notify,
    cancel: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

/// Polls one device and keeps its last good status snapshot.
///
/// A failed poll never touches the snapshot; it only flips availability.
/// Cloning is cheap and every clone drives the same device.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn builder(client: CloudClient, device_id: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(client, device_id)
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn phase(&self) -> Phase {
        self.read_state().phase
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.read_state().snapshot.clone()
    }

    pub fn value(&self, code: &str) -> Option<DpValue> {
        self.read_state().snapshot.get(code).cloned()
    }

    /// Outcome of the most recent poll. Drives entity availability.
    pub fn last_update_success(&self) -> bool {
        self.read_state().last_update_success
    }

    pub fn last_error(&self) -> Option<String> {
        self.read_state().last_error.clone()
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.read_state().last_success_at
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Run one fetch cycle now. Waits behind any cycle already in flight.
    pub async fn refresh(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let mut client = self.inner.client.lock().await;
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let outcome = self.fetch(&mut client).await;

        if self.is_disposed() {
            debug!(device = %self.inner.device_id, "discarding poll result after dispose");
            return Err(Error::Disposed);
        }
        match outcome {
            Ok(snapshot) => {
                self.publish(snapshot);
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e, client.has_token());
                Err(e)
            }
        }
    }

    /// Ask the poll loop for an out-of-cycle fetch. Requests made while a
    /// cycle is running collapse into a single follow-up cycle.
    pub fn request_refresh(&self) {
        self.inner.refresh_requested.notify_one();
    }

    /// Request a refresh after `delay`. Dropped if the coordinator is
    /// disposed first.
    pub fn schedule_refresh(&self, delay: Duration) {
        if self.is_disposed() {
            return;
        }
        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => coordinator.request_refresh(),
            }
        });
        self.track(handle);
    }

    /// Spawn the periodic poll loop. The first scheduled cycle runs one
    /// interval from now; call [`Coordinator::refresh`] for an initial fetch.
    pub fn start(&self) {
        if self.is_disposed() {
            return;
        }
        let handle = tokio::spawn(poll_task(self.clone()));
        self.track(handle);
    }

    /// Stop scheduling cycles. Results of a call still in flight are discarded.
    pub fn dispose(&self) {
        self.inner.cancel.cancel();
        self.write_state().phase = Phase::Disposed;
        let handles: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        debug!(device = %self.inner.device_id, tasks = handles.len(), "coordinator disposed");
    }

    /// Submit commands. A rejected token is renewed and the commands resent
    /// once inside [`CloudClient::request`]; nothing is retried here.
    pub async fn submit_commands(&self, commands: &[Command]) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let mut client = self.inner.client.lock().await;
        client.send_command(&self.inner.device_id, commands).await
    }

    /// Fetch the device's capability descriptor. Falls back to the
    /// functions listing when specifications are refused.
    pub async fn fetch_capabilities(&self) -> Result<CapabilityMap> {
        let mut client = self.inner.client.lock().await;
        let spec = match client.get_specification(&self.inner.device_id).await {
            Ok(spec) => spec,
            Err(e @ Error::Application { .. }) if !client.is_token_invalid(&e) => {
                debug!(error = %e, "specifications unavailable, trying functions");
                client.get_functions(&self.inner.device_id).await?
            }
            Err(e) => return Err(e),
        };
        Ok(normalize_spec(&spec))
    }

    pub async fn invalidate_token(&self) {
        self.inner.client.lock().await.invalidate_token();
    }

    /// One fetch cycle. The single token-renewal retry happens inside the
    /// client call, so a cycle sends at most two status requests.
    async fn fetch(&self, client: &mut CloudClient) -> Result<StatusSnapshot> {
        if !client.has_token() {
            self.set_phase(Phase::Authenticating);
            client.acquire_token().await?;
        }
        let raw = client.get_status(&self.inner.device_id).await?;
        Ok(normalize_status(&raw))
    }

    fn publish(&self, snapshot: StatusSnapshot) {
        let (events, published) = {
            let mut state = self.write_state();
            let mut events = change_events(diff_snapshots(&state.snapshot, &snapshot));
            if !state.last_update_success {
                events.push(Event::AvailabilityChanged { available: true });
            }
            state.snapshot = snapshot;
            state.last_update_success = true;
            state.last_error = None;
            state.last_success_at = Some(Utc::now());
            state.phase = Phase::Polling;
            let published = (!self.inner.snapshot_callbacks.is_empty()).then(|| state.snapshot.clone());
            (events, published)
        };

        if !events.is_empty() {
            debug!(device = %self.inner.device_id, count = events.len(), "status changed");
        }
        for event in &events {
            for cb in &self.inner.event_callbacks {
                cb(event);
            }
        }
        if let Some(snapshot) = published {
            for cb in &self.inner.snapshot_callbacks {
                cb(&snapshot);
            }
        }
    }

    fn record_failure(&self, err: &Error, token_held: bool) {
        let was_available = {
            let mut state = self.write_state();
            let was_available = state.last_update_success;
            state.last_update_success = false;
            state.last_error = Some(err.to_string());
            state.phase = if token_held {
                Phase::Stale
            } else {
                Phase::Unauthenticated
            };
            was_available
        };
        debug!(device = %self.inner.device_id, error = %err, "poll failed, keeping last snapshot");
        if was_available {
            let event = Event::AvailabilityChanged { available: false };
            for cb in &self.inner.event_callbacks {
                cb(&event);
            }
        }
    }

    fn set_phase(&self, phase: Phase) {
        let mut state = self.write_state();
        if state.phase != Phase::Disposed {
            state.phase = phase;
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PollState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PollState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn poll_task(coordinator: Coordinator) {
    let cancel = coordinator.inner.cancel.clone();
    let period = coordinator.inner.interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
            () = coordinator.inner.refresh_requested.notified() => {}
        }
        match coordinator.refresh().await {
            Ok(()) | Err(Error::Disposed) => {}
            Err(e) => warn!(device = %coordinator.inner.device_id, error = %e, "status refresh failed"),
        }
    }
}
