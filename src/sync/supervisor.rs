//! Reconnection supervisor and the [`RunFeed`] consumer handle.
//!
//! A feed runs as a single tokio task, the only place its run list and status
//! are ever written. Snapshot results, stream signals and retry timers all
//! arrive on channels carrying the token of the resource that produced them;
//! anything whose token no longer matches the live [`Session`] is dropped.
//!
//! ```text
//! Idle -> Connecting -> Connected -> ReconnectPending -> Connecting -> ...
//!   any state -> Closed (dispose)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, trace, warn};

use crate::domain::{Run, RunQuery, StreamParams};
use crate::error::Result;

use super::connector::{
    ConnectionId, SignalSink, StreamConnector, StreamHandle, StreamSignal, TaggedSignal,
};
use super::fetcher::SnapshotFetcher;
use super::reconcile::{DEFAULT_MAX_RUNS, reconcile, truncate_runs};
use super::state::{ConnectionStatus, RunFeedState};

/// Fixed delay before a failed stream is re-established.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Tuning for a [`RunFeed`].
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Snapshot filter; defaults to the stream params when absent.
    pub initial_fetch: Option<RunQuery>,
    pub max_runs: usize,
    pub retry_delay: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            initial_fetch: None,
            max_runs: DEFAULT_MAX_RUNS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Connected,
    ReconnectPending,
    Closed,
}

impl Phase {
    fn status(self) -> ConnectionStatus {
        match self {
            Phase::Idle | Phase::Closed => ConnectionStatus::Disconnected,
            Phase::Connecting => ConnectionStatus::Connecting,
            Phase::Connected => ConnectionStatus::Connected,
            Phase::ReconnectPending => ConnectionStatus::Error,
        }
    }
}

#[derive(Debug)]
enum Command {
    SetParams {
        params: StreamParams,
        initial_fetch: Option<RunQuery>,
    },
    Dispose,
}

#[derive(Debug)]
enum Wake {
    Snapshot { token: u64, result: Result<Vec<Run>> },
    RetryDue { token: u64 },
}

#[derive(Debug)]
struct PendingSnapshot {
    token: u64,
    task: JoinHandle<()>,
}

#[derive(Debug)]
struct OpenStream {
    connection: ConnectionId,
    handle: Box<dyn StreamHandle>,
}

/// Deferred reconnect. At most one exists per session.
#[derive(Debug)]
struct RetryTimer {
    token: u64,
    task: JoinHandle<()>,
}

impl RetryTimer {
    fn schedule(token: u64, delay: Duration, wake: mpsc::UnboundedSender<Wake>) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wake.send(Wake::RetryDue { token });
        });
        Self { token, task }
    }

    fn cancel(self) {
        self.task.abort();
    }
}

/// The resources one connection attempt owns.
///
/// Each slot has a single owner; acquiring a new resource always goes
/// through [`Session::teardown`] or the slot's own release first.
#[derive(Debug, Default)]
struct Session {
    snapshot: Option<PendingSnapshot>,
    stream: Option<OpenStream>,
    retry: Option<RetryTimer>,
}

impl Session {
    fn teardown(&mut self) {
        if let Some(pending) = self.snapshot.take() {
            pending.task.abort();
        }
        self.close_stream();
        self.cancel_retry();
    }

    fn close_stream(&mut self) {
        if let Some(mut open) = self.stream.take() {
            open.handle.close();
            debug!(name: "run_sync.stream.closed", connection = open.connection, "run stream closed");
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.cancel();
        }
    }

    /// Replace-on-reschedule: the previous timer is cancelled first.
    fn schedule_retry(&mut self, timer: RetryTimer) {
        self.cancel_retry();
        self.retry = Some(timer);
    }

    fn connection(&self) -> Option<ConnectionId> {
        self.stream.as_ref().map(|open| open.connection)
    }

    fn take_snapshot(&mut self, token: u64) -> bool {
        if self.snapshot.as_ref().is_some_and(|p| p.token == token) {
            self.snapshot = None;
            true
        } else {
            false
        }
    }

    fn take_retry(&mut self, token: u64) -> bool {
        if self.retry.as_ref().is_some_and(|t| t.token == token) {
            self.retry = None;
            true
        } else {
            false
        }
    }
}

struct Supervisor {
    fetcher: Arc<dyn SnapshotFetcher>,
    connector: Arc<dyn StreamConnector>,
    params: StreamParams,
    initial_fetch: Option<RunQuery>,
    max_runs: usize,
    retry_delay: Duration,
    phase: Phase,
    session: Session,
    next_token: u64,
    state: RunFeedState,
    publisher: watch::Sender<RunFeedState>,
    wake_tx: mpsc::UnboundedSender<Wake>,
    signal_tx: mpsc::UnboundedSender<TaggedSignal>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut wakes: mpsc::UnboundedReceiver<Wake>,
        mut signals: mpsc::UnboundedReceiver<TaggedSignal>,
    ) {
        self.start_session();

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::SetParams { params, initial_fetch }) => {
                        self.restart(params, initial_fetch);
                    }
                    Some(Command::Dispose) | None => break,
                },
                Some(wake) = wakes.recv() => self.on_wake(wake),
                Some(tagged) = signals.recv() => self.on_signal(tagged),
            }
        }

        self.session.teardown();
        self.phase = Phase::Closed;
        self.publish();
        info!(name: "run_sync.feed.closed", "run feed disposed");
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn publish(&mut self) {
        self.state.status = self.phase.status();
        self.publisher.send_replace(self.state.clone());
    }

    /// Full (re)connect: re-baseline from a snapshot, then open the stream.
    fn start_session(&mut self) {
        self.session.teardown();
        self.phase = Phase::Connecting;

        let token = self.token();
        let query = self
            .initial_fetch
            .clone()
            .unwrap_or_else(|| RunQuery::from(&self.params));
        let fetcher = Arc::clone(&self.fetcher);
        let wake = self.wake_tx.clone();
        let task = tokio::spawn(async move {
            let result = fetcher.fetch(&query).await;
            let _ = wake.send(Wake::Snapshot { token, result });
        });
        self.session.snapshot = Some(PendingSnapshot { token, task });

        debug!(name: "run_sync.session.connecting", token, "fetching snapshot");
        self.publish();
    }

    fn restart(&mut self, params: StreamParams, initial_fetch: Option<RunQuery>) {
        info!(name: "run_sync.feed.filter_changed", ?params, "restarting run feed");
        self.session.teardown();
        self.phase = Phase::Idle;
        self.params = params;
        self.initial_fetch = initial_fetch;
        self.state = RunFeedState::default();
        self.start_session();
    }

    fn on_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Snapshot { token, result } => {
                if !self.session.take_snapshot(token) {
                    trace!(token, "stale snapshot dropped");
                    return;
                }
                self.on_snapshot(result);
            }
            Wake::RetryDue { token } => {
                if !self.session.take_retry(token) {
                    trace!(token, "stale retry timer dropped");
                    return;
                }
                self.state.reconnect_attempts += 1;
                info!(
                    name: "run_sync.stream.reconnecting",
                    attempt = self.state.reconnect_attempts,
                    "reconnecting run stream"
                );
                self.start_session();
            }
        }
    }

    fn on_snapshot(&mut self, result: Result<Vec<Run>>) {
        match result {
            Ok(runs) => {
                debug!(name: "run_sync.snapshot.loaded", count = runs.len(), "snapshot applied");
                self.state.runs = truncate_runs(runs, self.max_runs);
            }
            Err(e) => {
                warn!(name: "run_sync.snapshot.failed", error = %e, "snapshot fetch failed");
                self.state.runs.clear();
                self.state.error = Some(e.to_string());
            }
        }
        self.open_stream();
        self.publish();
    }

    fn open_stream(&mut self) {
        self.session.close_stream();
        let connection = self.token();
        let sink = SignalSink::new(connection, self.signal_tx.clone());
        let handle = self.connector.open(&self.params, sink);
        self.session.stream = Some(OpenStream { connection, handle });
    }

    fn on_signal(&mut self, tagged: TaggedSignal) {
        let TaggedSignal { connection, signal } = tagged;
        if self.session.connection() != Some(connection) {
            trace!(connection, "signal from closed connection dropped");
            return;
        }

        match signal {
            StreamSignal::Opened => {
                info!(name: "run_sync.stream.opened", connection, "run stream connected");
                self.phase = Phase::Connected;
                self.state.error = None;
                self.publish();
            }
            StreamSignal::Event(event) => {
                let runs = std::mem::take(&mut self.state.runs);
                self.state.runs = reconcile(runs, event, self.max_runs);
                self.publish();
            }
            StreamSignal::Malformed(e) => {
                warn!(name: "run_sync.stream.malformed", connection, error = %e, "dropping malformed run event");
            }
            StreamSignal::Failed(e) => {
                warn!(
                    name: "run_sync.stream.failed",
                    connection,
                    error = %e,
                    retry_in_ms = self.retry_delay.as_millis() as u64,
                    "run stream failed"
                );
                self.state.error = Some(e.to_string());
                self.phase = Phase::ReconnectPending;
                self.session.close_stream();
                let token = self.token();
                self.session
                    .schedule_retry(RetryTimer::schedule(token, self.retry_delay, self.wake_tx.clone()));
                self.publish();
            }
        }
    }
}

/// Live, bounded view of runs kept current by snapshot + stream.
///
/// Dropping the feed disposes it; [`RunFeed::dispose`] additionally waits for
/// the supervisor task to finish.
#[derive(Debug)]
pub struct RunFeed {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<RunFeedState>,
    task: Option<JoinHandle<()>>,
}

impl RunFeed {
    /// Start a feed. Must be called from within a tokio runtime.
    pub fn spawn(
        fetcher: Arc<dyn SnapshotFetcher>,
        connector: Arc<dyn StreamConnector>,
        params: StreamParams,
        options: FeedOptions,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (publisher, state) = watch::channel(RunFeedState::default());

        let span = tracing::info_span!(
            "run_feed",
            agent_id = ?params.agent_id,
            status = ?params.status
        );
        let supervisor = Supervisor {
            fetcher,
            connector,
            params,
            initial_fetch: options.initial_fetch,
            max_runs: options.max_runs,
            retry_delay: options.retry_delay,
            phase: Phase::Idle,
            session: Session::default(),
            next_token: 0,
            state: RunFeedState::default(),
            publisher,
            wake_tx,
            signal_tx,
        };
        let task = tokio::spawn(
            supervisor
                .run(command_rx, wake_rx, signal_rx)
                .instrument(span),
        );

        Self {
            commands: command_tx,
            state,
            task: Some(task),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> RunFeedState {
        self.state.borrow().clone()
    }

    pub fn runs(&self) -> Vec<Run> {
        self.state.borrow().runs.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<RunFeedState> {
        self.state.clone()
    }

    /// Switch filters. Tears the current session down, empties the list and
    /// starts over.
    pub fn set_params(&self, params: StreamParams, initial_fetch: Option<RunQuery>) {
        let _ = self.commands.send(Command::SetParams {
            params,
            initial_fetch,
        });
    }

    /// Stop the feed and wait until the supervisor has released everything.
    pub async fn dispose(mut self) {
        let _ = self.commands.send(Command::Dispose);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "run feed task ended abnormally");
            }
        }
    }
}

impl Drop for RunFeed {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Dispose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunStatus, RunStreamEvent};
    use crate::error::SyncError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeFetcher {
        responses: Mutex<Vec<Result<Vec<Run>>>>,
        calls: AtomicUsize,
        queries: Mutex<Vec<RunQuery>>,
    }

    impl FakeFetcher {
        fn returning(responses: Vec<Result<Vec<Run>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                ..Self::default()
            })
        }
    }

    #[async_trait::async_trait]
    impl SnapshotFetcher for FakeFetcher {
        async fn fetch(&self, query: &RunQuery) -> Result<Vec<Run>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().unwrap().push(query.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(Vec::new())
            } else {
                responses.remove(0)
            }
        }
    }

    #[derive(Debug)]
    struct FakeHandle {
        closes: Arc<AtomicUsize>,
        closed: bool,
    }

    impl StreamHandle for FakeHandle {
        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[derive(Debug)]
    struct FakeConnector {
        opened: mpsc::UnboundedSender<(StreamParams, SignalSink)>,
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    impl FakeConnector {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(StreamParams, SignalSink)>) {
            let (opened, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                opened,
                opens: AtomicUsize::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
            });
            (connector, rx)
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl StreamConnector for FakeConnector {
        fn open(&self, params: &StreamParams, sink: SignalSink) -> Box<dyn StreamHandle> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let _ = self.opened.send((params.clone(), sink));
            Box::new(FakeHandle {
                closes: Arc::clone(&self.closes),
                closed: false,
            })
        }
    }

    fn fast_options() -> FeedOptions {
        FeedOptions {
            retry_delay: Duration::from_secs(5),
            ..FeedOptions::default()
        }
    }

    /// Let every runnable task make progress before the paused clock moves.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn stream_failure() -> StreamSignal {
        StreamSignal::Failed(SyncError::Stream("connection reset".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_then_stream_update() {
        let fetcher = FakeFetcher::returning(vec![Ok(vec![
            Run::new("r1").with_status(RunStatus::Running),
        ])]);
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(fetcher, connector, StreamParams::default(), fast_options());

        let (_, sink) = opened.recv().await.unwrap();
        sink.emit(StreamSignal::Opened);
        sink.emit(StreamSignal::Event(RunStreamEvent::update(
            Run::new("r1").with_status(RunStatus::Completed),
        )));
        settle().await;

        assert!(feed.is_connected());
        assert_eq!(feed.runs(), vec![Run::new("r1").with_status(RunStatus::Completed)]);
        assert_eq!(feed.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_opens_after_fetch_failure() {
        let fetcher = FakeFetcher::returning(vec![Err(SyncError::Fetch {
            status: Some(503),
            message: "unavailable".into(),
        })]);
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(fetcher, connector, StreamParams::default(), fast_options());

        let (_, sink) = opened.recv().await.unwrap();
        settle().await;
        assert!(feed.runs().is_empty());
        assert!(feed.error().unwrap().contains("unavailable"));
        assert_eq!(feed.status(), ConnectionStatus::Connecting);

        sink.emit(StreamSignal::Opened);
        settle().await;
        assert!(feed.is_connected());
        assert_eq!(feed.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_clamped_to_capacity() {
        let runs = (0..10).map(|i| Run::new(format!("r{i}"))).collect();
        let fetcher = FakeFetcher::returning(vec![Ok(runs)]);
        let (connector, mut opened) = FakeConnector::new();
        let options = FeedOptions {
            max_runs: 3,
            ..fast_options()
        };
        let feed = RunFeed::spawn(fetcher, connector, StreamParams::default(), options);

        opened.recv().await.unwrap();
        settle().await;
        let ids: Vec<_> = feed.runs().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["r0", "r1", "r2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_with_repeated_id_is_deduplicated() {
        let fetcher = FakeFetcher::returning(vec![Ok(vec![
            Run::new("r1").with_status(RunStatus::Running),
            Run::new("r2"),
            Run::new("r1").with_status(RunStatus::Pending),
        ])]);
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(fetcher, connector, StreamParams::default(), fast_options());

        let (_, sink) = opened.recv().await.unwrap();
        sink.emit(StreamSignal::Opened);
        settle().await;
        let ids: Vec<_> = feed.runs().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["r1", "r2"]);

        sink.emit(StreamSignal::Event(RunStreamEvent::update(
            Run::new("r1").with_status(RunStatus::Completed),
        )));
        settle().await;
        let runs = feed.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, Some(RunStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_errors_yield_single_reconnect() {
        let fetcher = FakeFetcher::returning(Vec::new());
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(
            fetcher.clone(),
            connector.clone(),
            StreamParams::default(),
            fast_options(),
        );

        let (_, sink) = opened.recv().await.unwrap();
        sink.emit(StreamSignal::Opened);
        for _ in 0..3 {
            sink.emit(stream_failure());
        }
        settle().await;
        assert_eq!(feed.status(), ConnectionStatus::Error);
        assert!(feed.error().unwrap().contains("connection reset"));
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connector.opens(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.opens(), 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(feed.state().reconnect_attempts, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_rebaselines_from_snapshot() {
        let fetcher = FakeFetcher::returning(vec![
            Ok(vec![Run::new("old")]),
            Ok(vec![Run::new("fresh"), Run::new("old")]),
        ]);
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(fetcher, connector, StreamParams::default(), fast_options());

        let (_, first) = opened.recv().await.unwrap();
        first.emit(StreamSignal::Opened);
        first.emit(stream_failure());
        settle().await;

        let (_, second) = opened.recv().await.unwrap();
        second.emit(StreamSignal::Opened);
        settle().await;

        assert!(feed.is_connected());
        assert_eq!(feed.error(), None);
        let ids: Vec<_> = feed.runs().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["fresh", "old"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_while_reconnect_pending() {
        let fetcher = FakeFetcher::returning(Vec::new());
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(fetcher, connector.clone(), StreamParams::default(), fast_options());
        let mut watcher = feed.subscribe();

        let (_, sink) = opened.recv().await.unwrap();
        sink.emit(stream_failure());
        watcher
            .wait_for(|s| s.status == ConnectionStatus::Error)
            .await
            .unwrap();

        feed.dispose().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.opens(), 1);
        assert_eq!(watcher.borrow().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_signals_after_dispose_are_ignored() {
        let fetcher = FakeFetcher::returning(vec![Ok(vec![Run::new("keep")])]);
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(fetcher, connector.clone(), StreamParams::default(), fast_options());
        let watcher = feed.subscribe();

        let (_, sink) = opened.recv().await.unwrap();
        sink.emit(StreamSignal::Opened);
        settle().await;
        feed.dispose().await;

        assert!(!sink.emit(StreamSignal::Event(RunStreamEvent::start(Run::new("ghost")))));
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        let ids: Vec<_> = watcher.borrow().runs.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, ["keep"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_keeps_channel() {
        let fetcher = FakeFetcher::returning(vec![Ok(vec![Run::new("r1")])]);
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(fetcher, connector.clone(), StreamParams::default(), fast_options());

        let (_, sink) = opened.recv().await.unwrap();
        sink.emit(StreamSignal::Opened);
        settle().await;
        let before = feed.runs();

        let bad = serde_json::from_str::<RunStreamEvent>("{not json").unwrap_err();
        sink.emit(StreamSignal::Malformed(SyncError::MalformedEvent(bad)));
        settle().await;

        assert!(feed.is_connected());
        assert_eq!(feed.runs(), before);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_change_isolates_sessions() {
        let fetcher = FakeFetcher::returning(vec![Ok(vec![Run::new("a-run")]), Ok(Vec::new())]);
        let (connector, mut opened) = FakeConnector::new();
        let feed = RunFeed::spawn(
            fetcher.clone(),
            connector.clone(),
            StreamParams {
                agent_id: Some("agent-a".into()),
                status: None,
            },
            fast_options(),
        );

        let (params_a, old_sink) = opened.recv().await.unwrap();
        assert_eq!(params_a.agent_id.as_deref(), Some("agent-a"));
        old_sink.emit(StreamSignal::Opened);
        settle().await;

        let params_b = StreamParams {
            agent_id: Some("agent-b".into()),
            status: Some(RunStatus::Running),
        };
        feed.set_params(params_b.clone(), None);
        let (seen, new_sink) = opened.recv().await.unwrap();
        assert_eq!(seen, params_b);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);

        // cross-talk from the torn-down connection must not land
        old_sink.emit(StreamSignal::Event(RunStreamEvent::start(Run::new("stale"))));
        new_sink.emit(StreamSignal::Opened);
        new_sink.emit(StreamSignal::Event(RunStreamEvent::start(Run::new("b-run"))));
        settle().await;

        let ids: Vec<_> = feed.runs().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["b-run"]);
        let queries = fetcher.queries.lock().unwrap().clone();
        assert_eq!(queries[1].agent_id.as_deref(), Some("agent-b"));
        assert_eq!(queries[1].status, Some(RunStatus::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_overrides_stream_params() {
        let fetcher = FakeFetcher::returning(Vec::new());
        let (connector, mut opened) = FakeConnector::new();
        let options = FeedOptions {
            initial_fetch: Some(RunQuery {
                agent_id: Some("agent-x".into()),
                status: Some(RunStatus::Failed),
                from: None,
                to: None,
            }),
            ..fast_options()
        };
        let _feed = RunFeed::spawn(
            fetcher.clone(),
            connector,
            StreamParams {
                agent_id: Some("agent-x".into()),
                status: None,
            },
            options,
        );

        opened.recv().await.unwrap();
        let queries = fetcher.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].status, Some(RunStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_cancels_previous_timer() {
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
        let mut session = Session::default();

        session.schedule_retry(RetryTimer::schedule(1, Duration::from_secs(5), wake_tx.clone()));
        tokio::time::sleep(Duration::from_secs(3)).await;
        session.schedule_retry(RetryTimer::schedule(2, Duration::from_secs(5), wake_tx));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut fired = Vec::new();
        while let Ok(Wake::RetryDue { token }) = wake_rx.try_recv() {
            fired.push(token);
        }
        assert_eq!(fired, [2]);
        assert!(session.take_retry(2));
        assert!(!session.take_retry(1));
    }
}
