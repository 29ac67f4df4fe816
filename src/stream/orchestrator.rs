//! Stream Orchestrator
//!
//! One spawned task owns the network read loop: it feeds the scanner,
//! decodes records, accumulates function call arguments and pushes results
//! into a bounded channel. [`EventStream`] is the consumer end.

use crate::api::events::StreamingEvent;
use crate::client::http::{HttpRequest, RetryingSender};
use crate::error::{ResponsesError, Result};
use crate::stream::accumulator::{FunctionCall, FunctionCallAccumulator};
use crate::stream::decoder::decode;
use crate::stream::scanner::{ChunkScanner, SseRecord};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// One item yielded to the consumer
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A decoded event, in wire order
    Event(StreamingEvent),

    /// A function call whose arguments just finished; follows the event
    /// that finalized it
    FunctionCall(FunctionCall),

    /// The stream completed; yielded exactly once, always last
    Completed,
}

impl StreamItem {
    pub fn as_event(&self) -> Option<&StreamingEvent> {
        match self {
            StreamItem::Event(event) => Some(event),
            _ => None,
        }
    }

    pub fn into_event(self) -> Option<StreamingEvent> {
        match self {
            StreamItem::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Lifecycle of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Failed | StreamState::Cancelled
        )
    }
}

/// Per-stream settings
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Limit on the whole stream lifetime, connecting included
    pub timeout: Option<Duration>,

    /// Channel capacity between producer and consumer
    pub buffer: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            buffer: 1,
        }
    }
}

impl StreamOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }
}

pin_project! {
    /// Lazy, cancellable sequence of stream items.
    ///
    /// Yields events in wire order, then either `Completed` or a single
    /// error, then ends. Dropping it cancels the underlying request.
    #[derive(Debug)]
    pub struct EventStream {
        #[pin]
        inner: ReceiverStream<Result<StreamItem>>,
        state: watch::Receiver<StreamState>,
        cancel: CancellationToken,
        _guard: DropGuard,
        // Terminal state as observed by the consumer
        outcome: Option<StreamState>,
    }
}

impl EventStream {
    /// Open a streaming request through `sender` and decode its body
    pub fn connect(sender: Arc<RetryingSender>, request: HttpRequest) -> Self {
        let options = StreamOptions::default().with_timeout(sender.timeout_for(&request));
        Self::connect_with(sender, request, options)
    }

    pub fn connect_with(
        sender: Arc<RetryingSender>,
        request: HttpRequest,
        options: StreamOptions,
    ) -> Self {
        let (stream, producer) = Self::channel(&options);
        tokio::spawn(producer.connect_and_run(sender, request));
        stream
    }

    /// Run the pipeline over an already-open byte stream
    pub fn from_byte_stream<S>(source: S, options: StreamOptions) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        let (stream, producer) = Self::channel(&options);
        tokio::spawn(producer.run(source));
        stream
    }

    fn channel(options: &StreamOptions) -> (Self, Producer) {
        let (tx, rx) = mpsc::channel(options.buffer.max(1));
        let (state_tx, state_rx) = watch::channel(StreamState::Idle);
        let cancel = CancellationToken::new();

        let producer = Producer {
            tx,
            state: state_tx,
            cancel: cancel.clone(),
            deadline: options.timeout.map(|t| Instant::now() + t),
            scanner: ChunkScanner::new(),
            calls: FunctionCallAccumulator::new(),
            events: 0,
        };

        let stream = Self {
            inner: ReceiverStream::new(rx),
            state: state_rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
            outcome: None,
        };

        (stream, producer)
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.outcome.unwrap_or_else(|| *self.state.borrow())
    }

    /// Cancel the stream: the request is aborted and nothing more is yielded
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if self.outcome.is_none() {
            self.outcome = Some(StreamState::Cancelled);
        }
    }

    /// Token that cancels this stream from elsewhere
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Producer-side state updates; outlives the stream itself
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }
}

impl Stream for EventStream {
    type Item = Result<StreamItem>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if this.outcome.is_some() {
            return Poll::Ready(None);
        }
        if this.cancel.is_cancelled() {
            *this.outcome = Some(StreamState::Cancelled);
            return Poll::Ready(None);
        }

        let item = ready!(this.inner.poll_next(cx));
        match &item {
            Some(Ok(StreamItem::Completed)) => *this.outcome = Some(StreamState::Completed),
            Some(Err(_)) => *this.outcome = Some(StreamState::Failed),
            Some(Ok(_)) => {}
            None => {
                let last = *this.state.borrow();
                if last.is_terminal() {
                    *this.outcome = Some(last);
                } else {
                    // Producer task died without reporting a result
                    *this.outcome = Some(StreamState::Failed);
                    return Poll::Ready(Some(Err(ResponsesError::Internal(
                        "stream producer stopped without a result".to_string(),
                    ))));
                }
            }
        }

        Poll::Ready(item)
    }
}

/// Whether the pipeline should keep reading
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
}

/// Producer half, owned by the spawned task
struct Producer {
    tx: mpsc::Sender<Result<StreamItem>>,
    state: watch::Sender<StreamState>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    scanner: ChunkScanner,
    calls: FunctionCallAccumulator,
    events: u64,
}

impl Producer {
    async fn connect_and_run(self, sender: Arc<RetryingSender>, request: HttpRequest) {
        self.state.send_replace(StreamState::Connecting);

        let open = sender.open_stream(&request, &self.cancel);
        let opened = within(self.deadline, "stream timeout elapsed while connecting", open)
            .await
            .and_then(|opened| opened);

        match opened {
            Ok(source) => self.run(source).await,
            Err(ResponsesError::Cancelled) => self.cancelled(),
            Err(err) => self.fail(err).await,
        }
    }

    async fn run<S>(mut self, source: S)
    where
        S: Stream<Item = Result<Bytes>> + Send,
    {
        self.state.send_replace(StreamState::Streaming);

        match self.pump(source).await {
            Ok(()) => self.complete().await,
            Err(ResponsesError::Cancelled) => self.cancelled(),
            Err(err) => self.fail(err).await,
        }
    }

    /// Read, scan and decode until a terminal condition
    async fn pump<S>(&mut self, source: S) -> Result<()>
    where
        S: Stream<Item = Result<Bytes>> + Send,
    {
        tokio::pin!(source);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ResponsesError::Cancelled),
                next = within(self.deadline, "stream timeout elapsed", source.next()) => next?,
            };

            match next {
                Some(Ok(chunk)) => {
                    for record in self.scanner.feed(&chunk) {
                        if self.handle(record).await? == Flow::Finished {
                            return Ok(());
                        }
                    }
                }
                // Body bytes may already have been yielded; never reconnect
                Some(Err(err)) => return Err(err),
                None => {
                    if let Some(record) = self.scanner.finish() {
                        self.handle(record).await?;
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn handle(&mut self, record: SseRecord) -> Result<Flow> {
        if record.is_done_sentinel() {
            debug!(events = self.events, "stream sentinel received");
            return Ok(Flow::Finished);
        }

        let Some(event) = decode(&record)? else {
            return Ok(Flow::Continue);
        };

        let finished_call = self.calls.observe(&event);
        let terminal = event.is_terminal();
        if terminal {
            debug!(event_type = %event.event_type, "terminal event received");
        }

        self.emit(StreamItem::Event(event)).await?;
        self.events += 1;

        if let Some(call) = finished_call {
            self.emit(StreamItem::FunctionCall(call)).await?;
        }

        Ok(if terminal {
            Flow::Finished
        } else {
            Flow::Continue
        })
    }

    /// Hand one item to the consumer; a consumer slower than the deadline
    /// times the stream out like a stalled read does
    async fn emit(&self, item: StreamItem) -> Result<()> {
        let send = within(
            self.deadline,
            "stream timeout elapsed waiting for the consumer",
            self.tx.send(Ok(item)),
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ResponsesError::Cancelled),
            sent = send => sent?.map_err(|_| ResponsesError::Cancelled),
        }
    }

    async fn complete(mut self) {
        self.discard_pending();

        match self.emit(StreamItem::Completed).await {
            Ok(()) => {
                self.state.send_replace(StreamState::Completed);
                debug!(events = self.events, "stream completed");
            }
            Err(ResponsesError::Cancelled) => self.cancelled(),
            Err(err) => self.fail(err).await,
        }
    }

    async fn fail(mut self, err: ResponsesError) {
        self.discard_pending();
        warn!(error = %err, events = self.events, "stream failed");
        self.state.send_replace(StreamState::Failed);

        // Receiver may be gone or cancelled; nothing left to tell anyone
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = self.tx.send(Err(err)) => {}
        }
    }

    fn cancelled(mut self) {
        self.discard_pending();
        debug!(events = self.events, "stream cancelled");
        self.state.send_replace(StreamState::Cancelled);
    }

    fn discard_pending(&mut self) {
        let dropped = self.calls.discard();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "discarding unfinished function calls");
        }
    }
}

/// Run `fut` against the stream deadline
async fn within<F: Future>(deadline: Option<Instant>, what: &str, fut: F) -> Result<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| ResponsesError::Timeout(what.to_string())),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::events::EventType;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, task};

    const CREATED: &str = "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n";
    const DELTA: &str = "data: {\"type\":\"response.output_text.delta\",\"item_id\":\"msg_1\",\"delta\":\"Hi\"}\n\n";
    const TEXT_DONE: &str = "data: {\"type\":\"response.output_text.done\",\"item_id\":\"msg_1\",\"text\":\"Hi\"}\n\n";
    const COMPLETED: &str = "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\",\"status\":\"completed\"}}\n\n";
    const DONE: &str = "data: [DONE]\n\n";

    fn source(parts: &[&str]) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        let chunks: Vec<Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(chunks)
    }

    /// Wait for the producer to reach a terminal state
    async fn settled(mut state: watch::Receiver<StreamState>) -> StreamState {
        let wait = async move {
            loop {
                let current = *state.borrow_and_update();
                if current.is_terminal() {
                    return current;
                }
                if state.changed().await.is_err() {
                    return *state.borrow();
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait).await.unwrap()
    }

    fn label(item: &Result<StreamItem>) -> String {
        match item {
            Ok(StreamItem::Event(event)) => event.event_type.to_string(),
            Ok(StreamItem::FunctionCall(call)) => format!("call {}", call.arguments),
            Ok(StreamItem::Completed) => "completed".to_string(),
            Err(err) => format!("error {}", err),
        }
    }

    async fn labels(stream: EventStream) -> Vec<String> {
        stream.collect::<Vec<_>>().await.iter().map(label).collect()
    }

    #[tokio::test]
    async fn test_order_preserved_across_reads() {
        let all = format!("{}{}{}", CREATED, DELTA, TEXT_DONE);
        let expected = vec![
            "response.created",
            "response.output_text.delta",
            "response.output_text.done",
            "completed",
        ];

        let splits: Vec<Vec<String>> = vec![
            vec![all.clone()],
            vec![all[..30].to_string(), all[30..].to_string()],
            vec![CREATED.to_string(), DELTA.to_string(), TEXT_DONE.to_string()],
        ];

        for parts in splits {
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let stream = EventStream::from_byte_stream(source(&refs), StreamOptions::default());
            assert_eq!(labels(stream).await, expected);
        }
    }

    #[tokio::test]
    async fn test_done_sentinel_short_circuits() {
        let chunk = format!("{}{}{}{}", CREATED, DELTA, DONE, TEXT_DONE);
        let mut stream = EventStream::from_byte_stream(source(&[&chunk]), StreamOptions::default());

        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            seen.push(label(&item));
        }

        assert_eq!(
            seen,
            vec!["response.created", "response.output_text.delta", "completed"]
        );
        assert_eq!(stream.state(), StreamState::Completed);
    }

    #[tokio::test]
    async fn test_terminal_event_completes_exactly_once() {
        let stream = EventStream::from_byte_stream(
            source(&[CREATED, COMPLETED, DONE, DELTA]),
            StreamOptions::default(),
        );

        let seen = labels(stream).await;
        assert_eq!(
            seen,
            vec!["response.created", "response.completed", "completed"]
        );
        assert_eq!(seen.iter().filter(|l| *l == "completed").count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_tolerated() {
        let unknown = "data: {\"type\":\"some.future.event\",\"x\":1}\n\n";
        let stream = EventStream::from_byte_stream(
            source(&[unknown, DELTA]),
            StreamOptions::default(),
        );

        assert_eq!(
            labels(stream).await,
            vec!["some.future.event", "response.output_text.delta", "completed"]
        );
    }

    #[tokio::test]
    async fn test_function_call_accumulation() {
        let added = "data: {\"type\":\"response.output_item.added\",\"item\":{\"id\":\"fc_1\",\"type\":\"function_call\",\"name\":\"f\",\"call_id\":\"call_1\",\"arguments\":\"\"}}\n\n";
        let d1 = "data: {\"type\":\"response.function_call_arguments.delta\",\"item_id\":\"fc_1\",\"delta\":\"{\\\"a\\\":\"}\n\n";
        let d2 = "data: {\"type\":\"response.function_call_arguments.delta\",\"item_id\":\"fc_1\",\"delta\":\"1\"}\n\n";
        let d3 = "data: {\"type\":\"response.function_call_arguments.delta\",\"item_id\":\"fc_1\",\"delta\":\"}\"}\n\n";
        let done = "data: {\"type\":\"response.function_call_arguments.done\",\"item_id\":\"fc_1\",\"arguments\":\"{\\\"a\\\":1}\"}\n\n";

        let items: Vec<Result<StreamItem>> =
            EventStream::from_byte_stream(source(&[added, d1, d2, d3, done]), StreamOptions::default())
                .collect()
                .await;

        let call = items
            .iter()
            .find_map(|item| match item {
                Ok(StreamItem::FunctionCall(call)) => Some(call.clone()),
                _ => None,
            })
            .unwrap();

        assert_eq!(call.arguments, "{\"a\":1}");
        assert_eq!(call.name.as_deref(), Some("f"));
        assert_eq!(call.call_id.as_deref(), Some("call_1"));
        assert_eq!(
            label(&items[4]),
            "response.function_call_arguments.done"
        );
        assert_eq!(label(&items[5]), "call {\"a\":1}");
    }

    #[tokio::test]
    async fn test_mid_stream_error_ends_stream() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(CREATED.as_bytes())),
            Err(ResponsesError::Transport("connection reset".to_string())),
            Ok(Bytes::from_static(DELTA.as_bytes())),
        ];
        let mut stream = EventStream::from_byte_stream(stream::iter(chunks), StreamOptions::default());

        assert_eq!(label(&stream.next().await.unwrap()), "response.created");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_transport());
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Failed);
    }

    #[tokio::test]
    async fn test_malformed_payload_aborts() {
        let broken = "data: {\"type\":\"response.output_text.delta\",\"delta\":\n\n";
        let mut stream = EventStream::from_byte_stream(
            source(&[CREATED, broken, DELTA]),
            StreamOptions::default(),
        );

        assert_eq!(label(&stream.next().await.unwrap()), "response.created");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ResponsesError::Parsing(_)));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Failed);
    }

    #[tokio::test]
    async fn test_trailing_record_flushed() {
        let trailing = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"!\"}";
        let stream = EventStream::from_byte_stream(
            source(&[CREATED, trailing]),
            StreamOptions::default(),
        );

        assert_eq!(
            labels(stream).await,
            vec!["response.created", "response.output_text.delta", "completed"]
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_events() {
        let open_ended = source(&[CREATED]).chain(stream::pending());
        let mut stream = EventStream::from_byte_stream(open_ended, StreamOptions::default());

        assert_eq!(label(&stream.next().await.unwrap()), "response.created");
        {
            let mut next = task::spawn(stream.next());
            assert_pending!(next.poll());
        }

        stream.cancel();
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_handle_from_elsewhere() {
        let open_ended = source(&[CREATED]).chain(stream::pending());
        let mut stream = EventStream::from_byte_stream(open_ended, StreamOptions::default());
        let handle = stream.cancel_handle();

        assert!(stream.next().await.is_some());
        tokio::spawn(async move { handle.cancel() }).await.unwrap();

        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_is_terminal() {
        let stalled = stream::pending::<Result<Bytes>>();
        let options = StreamOptions::default().with_timeout(Duration::from_millis(50));
        let mut stream = EventStream::from_byte_stream(stalled, options);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ResponsesError::Timeout(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bounded_read_ahead() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let parts: Vec<&str> = std::iter::repeat(DELTA).take(10).collect();
        let counted = source(&parts).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut stream = EventStream::from_byte_stream(counted, StreamOptions::default());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.as_event().unwrap().event_type, EventType::OutputTextDelta);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(reads.load(Ordering::SeqCst) <= 3);

        let rest: Vec<_> = stream.collect().await;
        assert_eq!(rest.len(), 10);
        assert_eq!(reads.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_producer() {
        let open_ended = source(&[CREATED]).chain(stream::pending());
        let mut stream = EventStream::from_byte_stream(open_ended, StreamOptions::default());
        let handle = stream.cancel_handle();
        let state = stream.watch_state();

        assert!(stream.next().await.is_some());
        drop(stream);

        assert!(handle.is_cancelled());
        assert_eq!(settled(state).await, StreamState::Cancelled);
    }

    #[tokio::test]
    async fn test_slow_consumer_times_out() {
        let parts: Vec<&str> = std::iter::repeat(DELTA).take(10).collect();
        let options = StreamOptions::default().with_timeout(Duration::from_millis(100));
        let mut stream = EventStream::from_byte_stream(source(&parts), options);
        let state = stream.watch_state();

        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(settled(state).await, StreamState::Failed);

        let rest: Vec<String> = stream.collect::<Vec<_>>().await.iter().map(label).collect();
        assert!(!rest.contains(&"completed".to_string()));
        assert!(rest.last().unwrap().starts_with("error Request timeout"));
    }

    #[tokio::test]
    async fn test_producer_panic_surfaces_error() {
        let exploding = stream::iter(vec![0]).map(|_| -> Result<Bytes> { panic!("source exploded") });
        let mut stream = EventStream::from_byte_stream(exploding, StreamOptions::default());

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ResponsesError::Internal(_)));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Failed);
    }
}
