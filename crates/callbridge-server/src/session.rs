//! One bridged call: a browser websocket paired with its backend link.
//!
//! Each session runs four tasks. The web read loop translates browser
//! signaling into backend commands. The dispatch task consumes
//! [`LinkEvent`]s, mirrors every backend event to the browser and queues
//! final transcripts. The turn worker runs queued transcripts through the
//! [`VoiceAgentPipeline`] one at a time. The web writer task is the only
//! place that touches the browser socket's sink.

use crate::backend_link::{BackendLink, LinkError, LinkEvent};
use crate::translator;
use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use callbridge_types::{BackendFrame, ClientNotice, Command, Event, FrontendEvent, SessionProfile};
use callbridge_voice::{DispatchError, SpeechOutput, VoiceAgentPipeline};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outbound frames buffered per browser before mirrored events are dropped.
const WEB_QUEUE_CAPACITY: usize = 256;

/// How long `close` waits to hand the close frame to the writer task.
const WEB_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingUpstream,
    Active,
    Closing,
    Closed,
}

enum WebFrame {
    Text(String),
    Close(String),
}

/// Queue-backed handle to the browser socket's writer task.
#[derive(Clone)]
pub struct WebSender {
    tx: mpsc::Sender<WebFrame>,
    closed: Arc<AtomicBool>,
}

impl WebSender {
    /// Spawns the writer task that owns `sink`.
    pub fn spawn(mut sink: SplitSink<WebSocket, Message>) -> Self {
        let (tx, mut rx) = mpsc::channel::<WebFrame>(WEB_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    WebFrame::Text(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    WebFrame::Close(reason) => {
                        let frame = CloseFrame {
                            code: close_code::NORMAL,
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queues a text frame, waiting for room in the queue.
    pub async fn send_text(&self, text: String) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Fatal("web client closed".to_string()));
        }
        self.tx
            .send(WebFrame::Text(text))
            .await
            .map_err(|_| DispatchError::Fatal("web writer stopped".to_string()))
    }

    /// Queues a text frame without waiting; a full queue drops the frame.
    pub fn try_send_text(&self, text: String) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Fatal("web client closed".to_string()));
        }
        self.tx.try_send(WebFrame::Text(text)).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::Transient("web client queue full".to_string()),
            TrySendError::Closed(_) => DispatchError::Fatal("web writer stopped".to_string()),
        })
    }

    /// Sends a close frame once; later calls do nothing.
    pub async fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let frame = WebFrame::Close(reason.to_string());
        if tokio::time::timeout(WEB_CLOSE_TIMEOUT, self.tx.send(frame))
            .await
            .is_err()
        {
            tracing::debug!("web writer did not accept close frame in time");
        }
    }
}

struct SessionInner {
    id: Uuid,
    slot: String,
    profile: SessionProfile,
    link: BackendLink,
    web: WebSender,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct SessionBridge {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("id", &self.inner.id)
            .field("slot", &self.inner.slot)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionBridge {
    pub fn new(slot: String, profile: SessionProfile, web: WebSender, link: BackendLink) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                slot,
                profile,
                link,
                web,
                state,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn slot(&self) -> &str {
        &self.inner.slot
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn link(&self) -> &BackendLink {
        &self.inner.link
    }

    /// Drives the session until either leg ends it, then closes it.
    pub async fn run(
        &self,
        stream: SplitStream<WebSocket>,
        link_events: mpsc::UnboundedReceiver<LinkEvent>,
        pipeline: VoiceAgentPipeline,
        turn_queue_depth: usize,
    ) {
        if !self.transition(SessionState::Idle, SessionState::AwaitingUpstream) {
            tracing::debug!(session_id = %self.inner.id, "session closed before it started");
            return;
        }

        self.inner.link.connect();

        let (turns_tx, turns_rx) = mpsc::channel(turn_queue_depth.max(1));
        let turn_task = tokio::spawn(turn_worker(self.clone(), pipeline, turns_rx));
        let dispatch_task = tokio::spawn(dispatch_backend(self.clone(), link_events, turns_tx));

        if self.transition(SessionState::AwaitingUpstream, SessionState::Active) {
            tracing::info!(
                session_id = %self.inner.id,
                slot = %self.inner.slot,
                backend = %self.inner.link.url(),
                "session active"
            );
        }

        let reason = self.web_read_loop(stream).await;
        self.close(reason).await;

        let _ = dispatch_task.await;
        let _ = turn_task.await;
    }

    async fn web_read_loop(&self, mut stream: SplitStream<WebSocket>) -> &'static str {
        loop {
            let next = tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return "session closed",
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_web_text(&text).await,
                Some(Ok(Message::Binary(audio))) => {
                    tracing::trace!(bytes = audio.len(), "ignoring binary frame from web client");
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        session_id = %self.inner.id,
                        frame = ?frame,
                        "web client closed the connection"
                    );
                    return "web client closed";
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(session_id = %self.inner.id, error = %e, "web client read failed");
                    return "web client read failed";
                }
                None => return "web client disconnected",
            }
        }
    }

    async fn handle_web_text(&self, text: &str) {
        let event = match FrontendEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(session_id = %self.inner.id, error = %e, "dropping malformed web message");
                return;
            }
        };
        tracing::debug!(session_id = %self.inner.id, kind = event.kind(), "web client event");

        let command = match translator::to_command(&event, &self.inner.profile) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(session_id = %self.inner.id, kind = event.kind(), error = %e, "ignoring web event");
                return;
            }
        };

        if let Err(e) = self.inner.link.send(&command).await {
            tracing::warn!(
                session_id = %self.inner.id,
                kind = command.kind(),
                error = %e,
                "backend unavailable, command dropped"
            );
        }
    }

    /// Mirrors one backend event to the browser and routes it internally.
    ///
    /// Returns `false` once the event has ended the session.
    async fn on_backend_event(&self, frame: BackendFrame, turns: &mpsc::Sender<String>) -> bool {
        log_backend_event(&self.inner.id, &frame.event);

        match translator::to_web_payload(&frame) {
            Ok(payload) => {
                if let Err(e) = self.inner.web.try_send_text(payload) {
                    tracing::warn!(
                        session_id = %self.inner.id,
                        kind = frame.kind(),
                        error = %e,
                        "dropping backend event for web client"
                    );
                }
            }
            Err(e) => tracing::warn!(session_id = %self.inner.id, error = %e, "failed to encode backend event"),
        }

        match frame.event {
            Event::AsrFinal { text } if !text.is_empty() => {
                if let Err(e) = turns.try_send(text) {
                    let reason = match e {
                        TrySendError::Full(_) => "turn queue full",
                        TrySendError::Closed(_) => "turn worker stopped",
                    };
                    tracing::warn!(session_id = %self.inner.id, reason, "dropping final transcript");
                }
                true
            }
            Event::Hangup { .. } => {
                self.close("backend hangup").await;
                false
            }
            _ => true,
        }
    }

    /// Moves to `Closing`, closes both legs, then settles in `Closed`.
    ///
    /// Only the first call does anything.
    pub async fn close(&self, reason: &str) {
        let first = self.inner.state.send_if_modified(|state| match state {
            SessionState::Closing | SessionState::Closed => false,
            _ => {
                *state = SessionState::Closing;
                true
            }
        });
        if !first {
            return;
        }

        tracing::info!(
            session_id = %self.inner.id,
            slot = %self.inner.slot,
            reason,
            "closing session"
        );
        self.inner.cancel.cancel();
        self.inner.web.close(reason).await;
        self.inner.link.shutdown().await;
        self.inner.state.send_replace(SessionState::Closed);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

fn log_backend_event(session_id: &Uuid, event: &Event) {
    match event {
        Event::AsrFinal { text } => {
            tracing::info!(session_id = %session_id, text = %text, "asr final");
        }
        Event::AsrDelta { text } => {
            tracing::debug!(session_id = %session_id, text = %text, "asr delta");
        }
        Event::Error { error } => {
            tracing::warn!(session_id = %session_id, error = %error, "backend reported an error");
        }
        Event::Hangup { reason, initiator } => {
            tracing::info!(session_id = %session_id, reason = %reason, initiator = %initiator, "backend hangup");
        }
        Event::Close { reason } => {
            tracing::info!(session_id = %session_id, reason = %reason, "backend close");
        }
        Event::Answer { .. } => {
            tracing::info!(session_id = %session_id, "backend answer");
        }
        other => {
            tracing::debug!(session_id = %session_id, kind = other.kind(), "backend event");
        }
    }
}

async fn dispatch_backend(
    bridge: SessionBridge,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    turns: mpsc::Sender<String>,
) {
    let id = bridge.inner.id;
    loop {
        let next = tokio::select! {
            biased;
            () = bridge.inner.cancel.cancelled() => break,
            next = events.recv() => next,
        };
        let Some(event) = next else {
            break;
        };

        match event {
            LinkEvent::Connected => tracing::info!(session_id = %id, "backend leg connected"),
            LinkEvent::Disconnected => {
                tracing::warn!(session_id = %id, "backend leg disconnected");
            }
            LinkEvent::Event(frame) => {
                if !bridge.on_backend_event(frame, &turns).await {
                    break;
                }
            }
        }
    }
}

async fn turn_worker(
    bridge: SessionBridge,
    pipeline: VoiceAgentPipeline,
    mut turns: mpsc::Receiver<String>,
) {
    let output = SessionOutput {
        bridge: bridge.clone(),
    };
    let cancel = bridge.inner.cancel.clone();

    loop {
        let transcript = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = turns.recv() => match next {
                Some(transcript) => transcript,
                None => break,
            },
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(session_id = %bridge.inner.id, "session closed, llm turn cancelled");
                break;
            }
            outcome = pipeline.handle_final(&transcript, &output) => {
                tracing::debug!(session_id = %bridge.inner.id, outcome = ?outcome, "turn finished");
            }
        }
    }
}

/// Routes pipeline output through the session's two legs.
struct SessionOutput {
    bridge: SessionBridge,
}

#[async_trait]
impl SpeechOutput for SessionOutput {
    async fn send_command(&self, command: Command) -> Result<(), DispatchError> {
        if self.bridge.inner.cancel.is_cancelled() {
            return Err(DispatchError::Fatal("session closed".to_string()));
        }
        self.bridge
            .inner
            .link
            .send(&command)
            .await
            .map_err(dispatch_error)
    }

    async fn send_to_client(&self, notice: ClientNotice) -> Result<(), DispatchError> {
        let payload = notice
            .to_json()
            .map_err(|e| DispatchError::Fatal(e.to_string()))?;
        self.bridge.inner.web.send_text(payload).await
    }
}

/// Only I/O hiccups that leave the socket usable are worth a retry.
fn dispatch_error(error: LinkError) -> DispatchError {
    match &error {
        LinkError::Transport(tungstenite::Error::Io(io))
            if matches!(
                io.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ) =>
        {
            DispatchError::Transient(error.to_string())
        }
        LinkError::Transport(tungstenite::Error::WriteBufferFull(_)) => {
            DispatchError::Transient(error.to_string())
        }
        _ => DispatchError::Fatal(error.to_string()),
    }
}
