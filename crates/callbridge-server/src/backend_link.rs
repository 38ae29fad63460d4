//! Outbound websocket connection to the call-processing backend.
//!
//! A [`BackendLink`] is owned by exactly one session. A supervisor task
//! connects, runs the read loop, and reconnects with backoff until the link
//! is shut down. Writers go through one mutex-guarded sink, so commands for a
//! call reach the backend in the order `send` was called.

use crate::backoff::{Backoff, RetryConfig};
use callbridge_types::{BackendFrame, Command};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type BackendSink = SplitSink<BackendSocket, Message>;
type BackendStream = SplitStream<BackendSocket>;

/// Upper bound on flushing a close frame to an unresponsive peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Connectivity transitions and inbound events, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    /// Emitted once per connection, before any reconnect attempt.
    Disconnected,
    Event(BackendFrame),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("backend is not connected")]
    NotConnected,

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("backend write failed: {0}")]
    Transport(#[from] tungstenite::Error),
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

struct LinkShared {
    settings: LinkSettings,
    writer: Mutex<Option<BackendSink>>,
    state: watch::Sender<LinkState>,
    events: mpsc::UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
    started: AtomicBool,
}

#[derive(Clone)]
pub struct BackendLink {
    shared: Arc<LinkShared>,
}

impl std::fmt::Debug for BackendLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLink")
            .field("url", &self.shared.settings.url)
            .field("state", &self.state())
            .finish()
    }
}

impl BackendLink {
    /// Creates a disconnected link. Nothing happens until [`connect`](Self::connect).
    pub fn new(settings: LinkSettings) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::Disconnected);
        let link = Self {
            shared: Arc::new(LinkShared {
                settings,
                writer: Mutex::new(None),
                state,
                events,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        };
        (link, events_rx)
    }

    /// Starts the connect/reconnect supervisor. Later calls are no-ops.
    pub fn connect(&self) {
        if self.shared.cancel.is_cancelled() || self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        tokio::spawn(async move {
            supervise(&shared).await;
        });
    }

    /// Writes one command as a single text frame.
    pub async fn send(&self, command: &Command) -> Result<(), LinkError> {
        let text = command.to_json()?;
        let mut writer = self.shared.writer.lock().await;
        let sink = writer.as_mut().ok_or(LinkError::NotConnected)?;
        sink.send(Message::Text(text.into())).await?;
        tracing::debug!(kind = command.kind(), "sent command to backend");
        Ok(())
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    pub fn url(&self) -> &str {
        &self.shared.settings.url
    }

    /// Stops reconnecting and closes the socket. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.shared.state.send_if_modified(|state| {
            if *state == LinkState::Connected {
                *state = LinkState::Closing;
                true
            } else {
                false
            }
        });
        self.shared.cancel.cancel();
        self.shared.release().await;
        self.shared.state.send_replace(LinkState::Disconnected);
    }
}

impl LinkShared {
    fn set_state(&self, next: LinkState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    /// Clears the writer and closes the socket as one guarded step.
    ///
    /// Returns `false` if there was nothing to release.
    async fn release(&self) -> bool {
        let mut writer = self.writer.lock().await;
        let Some(mut sink) = writer.take() else {
            return false;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "backend socket close reported an error"),
            Err(_) => tracing::debug!("timed out closing backend socket"),
        }
        self.set_state(LinkState::Disconnected);
        drop(writer);

        let _ = self.events.send(LinkEvent::Disconnected);
        true
    }
}

async fn supervise(shared: &LinkShared) {
    let url = shared.settings.url.as_str();
    let mut backoff = Backoff::new(shared.settings.retry.clone());
    let mut first_attempt = true;

    loop {
        if !first_attempt {
            let delay = backoff.next_delay();
            tracing::debug!(
                url = %url,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "waiting before backend reconnect"
            );
            tokio::select! {
                biased;
                () = shared.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        first_attempt = false;
        if shared.cancel.is_cancelled() {
            break;
        }

        shared.set_state(LinkState::Connecting);
        let attempt = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            result = tokio::time::timeout(shared.settings.connect_timeout, connect_async(url)) => result,
        };

        let socket = match attempt {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "backend connect failed");
                shared.set_state(LinkState::Disconnected);
                continue;
            }
            Err(_) => {
                tracing::warn!(url = %url, "backend connect timed out");
                shared.set_state(LinkState::Disconnected);
                continue;
            }
        };

        let (sink, stream) = socket.split();
        {
            let mut writer = shared.writer.lock().await;
            if shared.cancel.is_cancelled() {
                drop(writer);
                let mut sink = sink;
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                break;
            }
            *writer = Some(sink);
            shared.set_state(LinkState::Connected);
        }
        backoff.reset();
        tracing::info!(url = %url, "connected to backend");
        let _ = shared.events.send(LinkEvent::Connected);

        read_loop(shared, stream).await;
        shared.release().await;
    }

    shared.set_state(LinkState::Disconnected);
    tracing::debug!(url = %url, "backend supervisor stopped");
}

/// Forwards parsed events until the connection ends or the link is cancelled.
async fn read_loop(shared: &LinkShared, mut stream: BackendStream) {
    loop {
        let next = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => match BackendFrame::parse(&text) {
                Ok(frame) => {
                    if shared.events.send(LinkEvent::Event(frame)).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed backend event"),
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(frame = ?frame, "backend closed the connection");
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) if is_clean_close(&e) => {
                tracing::info!(error = %e, "backend connection ended");
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "backend read failed");
                return;
            }
            None => {
                tracing::info!("backend stream ended");
                return;
            }
        }
    }
}

fn is_clean_close(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(
                tungstenite::error::ProtocolError::ResetWithoutClosingHandshake
            )
    )
}
