//! Stream connector: owns one unidirectional push channel at a time.
//!
//! A connector reports its lifecycle through a [`SignalSink`] handed to it at
//! open time. Every signal is tagged with the connection it belongs to, so the
//! supervisor can discard anything a torn-down connection still manages to
//! send.

use futures::StreamExt;
use reqwest::header::ACCEPT;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::domain::{RunStreamEvent, StreamParams};
use crate::error::{Result, SyncError};

use super::fetcher::join_endpoint;
use super::sse::{DEFAULT_MAX_FRAME_BYTES, sse_frames};

/// Default path of the run stream endpoint.
pub const DEFAULT_STREAM_PATH: &str = "/api/runs/stream";

/// Identifier of one opened channel, unique within a feed.
pub type ConnectionId = u64;

/// Lifecycle callbacks of a push channel.
#[derive(Debug)]
pub enum StreamSignal {
    /// Channel established.
    Opened,
    /// One decoded event, in transport order.
    Event(RunStreamEvent),
    /// A message that did not decode; the channel stays up.
    Malformed(SyncError),
    /// Transport failure; the channel is dead.
    Failed(SyncError),
}

#[derive(Debug)]
pub struct TaggedSignal {
    pub connection: ConnectionId,
    pub signal: StreamSignal,
}

/// Sending half given to a connector for one connection.
#[derive(Debug, Clone)]
pub struct SignalSink {
    connection: ConnectionId,
    tx: mpsc::UnboundedSender<TaggedSignal>,
}

impl SignalSink {
    pub fn new(connection: ConnectionId, tx: mpsc::UnboundedSender<TaggedSignal>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Deliver a signal. Returns `false` once nobody is listening.
    pub fn emit(&self, signal: StreamSignal) -> bool {
        self.tx
            .send(TaggedSignal {
                connection: self.connection,
                signal,
            })
            .is_ok()
    }
}

/// Handle to an open channel.
pub trait StreamHandle: Send + std::fmt::Debug {
    /// Close the channel. Idempotent; returns once the channel is released.
    fn close(&mut self);
}

/// Opens push channels.
///
/// Opening a second channel without closing the first is a caller error;
/// the supervisor guarantees it never does.
pub trait StreamConnector: Send + Sync + std::fmt::Debug {
    fn open(&self, params: &StreamParams, sink: SignalSink) -> Box<dyn StreamHandle>;
}

/// [`StreamHandle`] for a channel pumped by a spawned task.
#[derive(Debug)]
pub struct TaskStreamHandle {
    task: Option<JoinHandle<()>>,
}

impl TaskStreamHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }
}

impl StreamHandle for TaskStreamHandle {
    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TaskStreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// [`StreamConnector`] reading the run stream endpoint as Server-Sent Events.
#[derive(Debug, Clone)]
pub struct SseStreamConnector {
    http: reqwest::Client,
    endpoint: Url,
    max_frame: usize,
}

impl SseStreamConnector {
    /// Create a connector for `{base_url}{path}`, with `path` resolved
    /// under any path prefix of the base URL.
    pub fn new(base_url: &Url, path: &str) -> Result<Self> {
        Self::with_client(base_url, path, reqwest::Client::new())
    }

    /// Create a connector with a custom reqwest client.
    ///
    /// The client must not carry a total request timeout; the channel is
    /// expected to stay open indefinitely.
    pub fn with_client(base_url: &Url, path: &str, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: join_endpoint(base_url, path)?,
            max_frame: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    /// Cap on an unterminated SSE frame; a larger one fails the connection.
    #[must_use]
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl StreamConnector for SseStreamConnector {
    fn open(&self, params: &StreamParams, sink: SignalSink) -> Box<dyn StreamHandle> {
        let request = self
            .http
            .get(self.endpoint.clone())
            .query(&params.query_pairs())
            .header(ACCEPT, "text/event-stream");

        tracing::debug!(
            connection = sink.connection(),
            endpoint = %self.endpoint,
            "opening run stream"
        );
        Box::new(TaskStreamHandle::new(tokio::spawn(pump(request, sink, self.max_frame))))
    }
}

/// Drive one SSE connection until it fails or nobody listens.
async fn pump(request: reqwest::RequestBuilder, sink: SignalSink, max_frame: usize) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            sink.emit(StreamSignal::Failed(SyncError::Stream(e.to_string())));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        sink.emit(StreamSignal::Failed(SyncError::Stream(format!(
            "stream endpoint answered {status}"
        ))));
        return;
    }

    if !sink.emit(StreamSignal::Opened) {
        return;
    }

    let frames = sse_frames(response.bytes_stream(), max_frame);
    futures::pin_mut!(frames);
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                sink.emit(StreamSignal::Failed(e));
                return;
            }
        };

        if !frame.is_message() {
            tracing::trace!(event = ?frame.event, "ignoring named SSE event");
            continue;
        }

        let signal = match serde_json::from_str::<RunStreamEvent>(&frame.data) {
            Ok(event) => StreamSignal::Event(event),
            Err(e) => StreamSignal::Malformed(SyncError::MalformedEvent(e)),
        };
        if !sink.emit(signal) {
            return;
        }
    }

    sink.emit(StreamSignal::Failed(SyncError::Stream(
        "stream ended by server".to_string(),
    )));
}
