//! Run Registry
//!
//! Dispatches walks onto background tasks and keeps what an outside observer
//! needs while they run: the live progress snapshot, the final outcome, and
//! the narration live channel each run publishes to.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, future, stream};
use rabbit_hole_core::{
    Error, RabbitHoleInput, RabbitHoleResult, WalkController,
    progress::{ProgressSnapshot, WatchProgress},
    relay::{ChannelSink, NarrationEvent},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Fragments buffered between the walk and the narration hub.
const NARRATION_BUFFER: usize = 32;
/// Fragments a slow live subscriber may fall behind before it is cut off.
const LIVE_CAPACITY: usize = 256;
/// How long a finished run stays queryable by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Where a run currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Running,
    Completed(RabbitHoleResult),
    Failed { kind: String, message: String },
}

/// One event on a run's narration live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Fragment(String),
    End,
    Aborted(String),
}

impl LiveEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LiveEvent::Fragment(_))
    }
}

#[derive(Default)]
struct NarrationLog {
    fragments: Vec<String>,
    terminal: Option<LiveEvent>,
}

/// What a new subscriber receives: everything recorded so far, then the
/// live tail if the stream has not ended yet.
pub struct NarrationSubscription {
    pub backlog: Vec<LiveEvent>,
    pub live: Option<broadcast::Receiver<LiveEvent>>,
}

impl NarrationSubscription {
    /// Flattens the subscription into one ordered stream that stops after
    /// the first terminal event.
    pub fn into_stream(self) -> impl Stream<Item = LiveEvent> + Send + 'static {
        let tail = match self.live {
            Some(rx) => BroadcastStream::new(rx)
                .map(|item| match item {
                    Ok(event) => event,
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        LiveEvent::Aborted(format!("subscriber fell behind by {} fragments", n))
                    }
                })
                .boxed(),
            None => stream::empty().boxed(),
        };

        stream::iter(self.backlog)
            .chain(tail)
            .scan(false, |ended, event| {
                if *ended {
                    return future::ready(None);
                }
                *ended = event.is_terminal();
                future::ready(Some(event))
            })
    }
}

/// Everything the registry tracks for a single run.
pub struct RunEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    access_token: String,
    progress: watch::Receiver<ProgressSnapshot>,
    state: RwLock<RunState>,
    narration: Mutex<NarrationLog>,
    live: broadcast::Sender<LiveEvent>,
}

impl RunEntry {
    fn new(id: Uuid, progress: watch::Receiver<ProgressSnapshot>) -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            id,
            created_at: Utc::now(),
            access_token: generate_access_token(),
            progress,
            state: RwLock::new(RunState::Running),
            narration: Mutex::new(NarrationLog::default()),
            live,
        }
    }

    /// The bearer credential scoped to this run's narration channel.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn authorize(&self, token: &str) -> bool {
        token == self.access_token
    }

    /// The stream identifier handed to subscribers.
    pub fn narration_stream(&self) -> String {
        format!("/runs/{}/narrative", self.id)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.borrow().clone()
    }

    pub async fn state(&self) -> RunState {
        self.state.read().await.clone()
    }

    async fn set_state(&self, state: RunState) {
        *self.state.write().await = state;
    }

    /// Appends an event to the narration log and fans it out to live
    /// subscribers. Nothing is recorded after a terminal event.
    async fn record(&self, event: LiveEvent) {
        let mut log = self.narration.lock().await;
        if log.terminal.is_some() {
            return;
        }
        match &event {
            LiveEvent::Fragment(fragment) => log.fragments.push(fragment.clone()),
            _ => log.terminal = Some(event.clone()),
        }
        // No live subscribers is fine; the log still has everything.
        let _ = self.live.send(event);
    }

    /// Subscribes to the narration channel without gaps or duplicates.
    pub async fn subscribe_narration(&self) -> NarrationSubscription {
        let log = self.narration.lock().await;
        let mut backlog: Vec<LiveEvent> = log
            .fragments
            .iter()
            .cloned()
            .map(LiveEvent::Fragment)
            .collect();
        let live = match &log.terminal {
            Some(terminal) => {
                backlog.push(terminal.clone());
                None
            }
            None => Some(self.live.subscribe()),
        };
        NarrationSubscription { backlog, live }
    }
}

fn generate_access_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Receives narration from a run's `ChannelSink` and records it. The end of
/// stream is acknowledged only after it has been recorded.
async fn run_narration_hub(entry: Arc<RunEntry>, mut rx: mpsc::Receiver<NarrationEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            NarrationEvent::Fragment(fragment) => entry.record(LiveEvent::Fragment(fragment)).await,
            NarrationEvent::End(ack) => {
                entry.record(LiveEvent::End).await;
                if ack.send(()).is_err() {
                    warn!("Narration end acknowledged after the run stopped waiting.");
                }
                return;
            }
            NarrationEvent::Aborted(reason) => {
                entry.record(LiveEvent::Aborted(reason)).await;
                return;
            }
        }
    }
    // The sink was dropped without finishing, e.g. the run failed before narrating.
    entry
        .record(LiveEvent::Aborted("run ended without narration".to_string()))
        .await;
}

/// Holds every run started by this process.
#[derive(Clone)]
pub struct RunRegistry {
    walker: WalkController,
    retention: Duration,
    runs: Arc<RwLock<HashMap<Uuid, Arc<RunEntry>>>>,
}

impl RunRegistry {
    pub fn new(walker: WalkController) -> Self {
        Self {
            walker,
            retention: DEFAULT_RETENTION,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Finished runs older than `retention` are dropped when the next run starts.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    async fn evict_finished(&self) {
        let age = chrono::TimeDelta::from_std(self.retention).unwrap_or(chrono::TimeDelta::MAX);
        let cutoff = Utc::now() - age;
        let mut runs = self.runs.write().await;
        let mut expired = Vec::new();
        for (id, entry) in runs.iter() {
            if entry.created_at < cutoff && entry.state().await != RunState::Running {
                expired.push(*id);
            }
        }
        for id in &expired {
            runs.remove(id);
        }
        if !expired.is_empty() {
            debug!(evicted = expired.len(), remaining = runs.len(), "Evicted finished runs");
        }
    }

    /// Registers a run and starts its walk on a background task.
    ///
    /// The input is expected to be validated by the caller; a walk that
    /// rejects it simply ends up `Failed`.
    pub async fn start(&self, input: RabbitHoleInput) -> Arc<RunEntry> {
        self.evict_finished().await;
        let id = Uuid::new_v4();
        let (progress, progress_rx) = WatchProgress::new();
        let (sink, narration_rx) = ChannelSink::new(NARRATION_BUFFER);
        let entry = Arc::new(RunEntry::new(id, progress_rx));

        self.runs.write().await.insert(id, entry.clone());
        tokio::spawn(run_narration_hub(entry.clone(), narration_rx));

        let walker = self.walker.clone();
        let run_entry = entry.clone();
        let span = info_span!("rabbit_hole", run_id = %id);
        tokio::spawn(
            async move {
                match walker.run(input, &progress, &sink).await {
                    Ok(result) => {
                        run_entry.set_state(RunState::Completed(result)).await;
                        info!("Run completed.");
                    }
                    Err(e) => {
                        error!(kind = e.kind(), error = %e, "Run failed.");
                        run_entry.set_state(failed(&e)).await;
                    }
                }
            }
            .instrument(span),
        );

        entry
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<RunEntry>> {
        self.runs.read().await.get(&id).cloned()
    }
}

fn failed(err: &Error) -> RunState {
    RunState::Failed {
        kind: err.kind().to_string(),
        message: err.to_string(),
    }
}
