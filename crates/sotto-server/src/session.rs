//! Live WebSocket sessions.
//!
//! Each connection runs a reader and a writer task. The writer owns the
//! transport sink, drains a bounded outbound channel and emits keepalive
//! pings; the reader enforces the idle deadline (refreshed by any inbound
//! traffic, pongs included) and feeds frames to the hub. Producers never
//! block: a full outbound channel drops the frame and reports
//! [`SessionSendError::BufferFull`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use sotto_shared::constants::{
    OUTBOUND_BUFFER, PING_PERIOD_SECS, PONG_WAIT_SECS, WRITE_WAIT_SECS,
};
use sotto_shared::protocol::{error_code, Frame};

use crate::hub::Hub;

#[derive(Debug, Error)]
pub enum SessionSendError {
    #[error("session outbound buffer full")]
    BufferFull,

    #[error("session closed")]
    Closed,
}

pub struct Session {
    id: Uuid,
    outbound: mpsc::Sender<Frame>,
    device_uuid: RwLock<Option<String>>,
    authed: AtomicBool,
    close_notify: Notify,
}

impl Session {
    /// Creates a session and hands back the receiving end of its outbound
    /// channel (driven by the writer task, or read directly in tests).
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            outbound: tx,
            device_uuid: RwLock::new(None),
            authed: AtomicBool::new(false),
            close_notify: Notify::new(),
        });
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queues a frame without blocking the caller.
    pub fn send(&self, frame: Frame) -> Result<(), SessionSendError> {
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SessionSendError::BufferFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionSendError::Closed),
        }
    }

    /// Queues a frame, logging instead of failing; used for advisory traffic
    /// where a drop is acceptable.
    pub fn send_or_log(&self, frame: Frame) {
        if let Err(err) = self.send(frame) {
            debug!(session = %self.id, error = %err, "Dropping outbound frame");
        }
    }

    pub fn is_authed(&self) -> bool {
        self.authed.load(Ordering::Acquire)
    }

    pub fn device_uuid(&self) -> Option<String> {
        self.device_uuid.read().ok().and_then(|guard| guard.clone())
    }

    pub fn set_authenticated(&self, device_uuid: &str) {
        if let Ok(mut guard) = self.device_uuid.write() {
            *guard = Some(device_uuid.to_string());
        }
        self.authed.store(true, Ordering::Release);
    }

    /// Asks the reader task to drop the transport. Frames already queued are
    /// flushed by the writer before it exits.
    pub fn close(&self) {
        self.close_notify.notify_waiters();
        self.close_notify.notify_one();
    }

    async fn closed(&self) {
        self.close_notify.notified().await;
    }
}

/// Drives one accepted WebSocket until it dies, then scrubs routing state.
pub async fn run(socket: WebSocket, hub: Arc<Hub>) {
    let (session, outbound_rx) = Session::new();
    hub.register(session.clone()).await;
    debug!(session = %session.id(), "Session opened");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(sink, outbound_rx));

    read_pump(stream, &hub, &session).await;

    hub.unregister(&session).await;
    debug!(session = %session.id(), "Session closed");

    // Dropping our Session references closes the outbound channel once the
    // hub has forgotten the session, which ends the writer after it flushes.
    drop(session);
    let _ = writer.await;
}

async fn read_pump(mut stream: SplitStream<WebSocket>, hub: &Arc<Hub>, session: &Arc<Session>) {
    let idle = Duration::from_secs(PONG_WAIT_SECS);

    loop {
        let message = tokio::select! {
            incoming = timeout(idle, stream.next()) => match incoming {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(err))) => {
                    debug!(session = %session.id(), error = %err, "Transport error");
                    return;
                }
                Ok(None) => return,
                Err(_) => {
                    debug!(session = %session.id(), "Read deadline expired");
                    return;
                }
            },
            _ = session.closed() => return,
        };

        let text = match &message {
            Message::Text(text) => text.as_str(),
            Message::Close(_) => return,
            // pings are answered by the transport layer; pongs and binary
            // noise only serve to refresh the read deadline
            _ => continue,
        };

        match Frame::parse(text) {
            Ok(frame) => hub.dispatch(session, frame).await,
            Err(_) => {
                session.send_or_log(Frame::error(error_code::INVALID_JSON, "Invalid JSON message"));
            }
        }
    }
}

async fn write_pump(mut sink: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<Frame>) {
    let write_deadline = Duration::from_secs(WRITE_WAIT_SECS);
    let mut ping = tokio::time::interval(Duration::from_secs(PING_PERIOD_SECS));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // immediate first tick

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame.encode().into()),
                None => {
                    let _ = timeout(write_deadline, sink.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new().into()),
        };

        match timeout(write_deadline, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(error = %err, "Write failed, closing session");
                return;
            }
            Err(_) => {
                warn!("Write deadline expired, closing session");
                return;
            }
        }
    }
}
