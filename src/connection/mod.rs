use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

pub mod backoff;
pub mod ws;

pub use backoff::{Backoff, ReconnectPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Received(String),
    Errored(String),
    Closed,
    GaveUp { attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connecting to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("sending frame: {0}")]
    Send(String),
    #[error("receiving frame: {0}")]
    Receive(String),
    #[error("connection closed by peer")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    pub fn new(host: &str, path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self {
            url: format!("ws://{host}{path}"),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

pub trait Channel: Send {
    fn send_text(&mut self, text: &str) -> Result<(), ConnectionError>;
    /// Waits a bounded time for the next frame; `Ok(None)` on timeout.
    fn poll_text(&mut self) -> Result<Option<String>, ConnectionError>;
    fn close(&mut self);
}

pub trait Connector: Send + 'static {
    fn open(&mut self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, ConnectionError>;
}

#[derive(Debug, Clone)]
pub struct SendTicket {
    seq: u64,
    cancelled: Arc<AtomicBool>,
}

impl SendTicket {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// A frame still waiting in the outbox is dropped; one already on the
    /// wire is unaffected.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait Outbox: Send {
    fn enqueue(&self, text: String) -> SendTicket;
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub poll_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

enum Command {
    Send(QueuedSend),
    Shutdown,
}

struct QueuedSend {
    text: String,
    ticket: SendTicket,
}

pub struct ConnectionManager;

impl ConnectionManager {
    pub fn spawn<C: Connector>(
        connector: C,
        endpoint: Endpoint,
        options: ConnectionOptions,
    ) -> Result<(ConnectionHandle, Receiver<ConnectionEvent>)> {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let worker = Worker {
            connector,
            endpoint,
            poll_interval: options.poll_interval,
            backoff: Backoff::new(options.reconnect),
            commands: command_rx,
            events: event_tx,
            outbox: VecDeque::new(),
        };
        let join = thread::Builder::new()
            .name("tagdash-connection".into())
            .spawn(move || worker.run())
            .context("spawning connection worker")?;
        let handle = ConnectionHandle {
            commands: command_tx,
            next_seq: Arc::new(AtomicU64::new(0)),
            worker: Arc::new(Mutex::new(Some(join))),
        };
        Ok((handle, event_rx))
    }
}

#[derive(Clone)]
pub struct ConnectionHandle {
    commands: Sender<Command>,
    next_seq: Arc<AtomicU64>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionHandle {
    pub fn send(&self, text: impl Into<String>) -> SendTicket {
        let ticket = SendTicket::new(self.next_seq.fetch_add(1, Ordering::SeqCst));
        let queued = QueuedSend {
            text: text.into(),
            ticket: ticket.clone(),
        };
        if self.commands.send(Command::Send(queued)).is_err() {
            tracing::warn!(seq = ticket.seq(), "connection worker stopped, frame dropped");
        }
        ticket
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(join) = self.worker.lock().take() {
            if join.join().is_err() {
                tracing::error!("connection worker panicked");
            }
        }
    }
}

impl Outbox for ConnectionHandle {
    fn enqueue(&self, text: String) -> SendTicket {
        self.send(text)
    }
}

enum SessionEnd {
    Lost,
    Shutdown,
}

struct Worker<C> {
    connector: C,
    endpoint: Endpoint,
    poll_interval: Duration,
    backoff: Backoff,
    commands: Receiver<Command>,
    events: Sender<ConnectionEvent>,
    outbox: VecDeque<QueuedSend>,
}

impl<C: Connector> Worker<C> {
    fn run(mut self) {
        loop {
            match self.connector.open(&self.endpoint) {
                Ok(channel) => {
                    tracing::info!(endpoint = %self.endpoint, "connection opened");
                    self.backoff.reset();
                    if !self.emit(ConnectionEvent::Opened) {
                        return;
                    }
                    match self.session(channel) {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Lost => {
                            tracing::warn!(endpoint = %self.endpoint, "connection lost");
                            if !self.emit(ConnectionEvent::Closed) {
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "connection attempt failed");
                    if !self.emit(ConnectionEvent::Errored(err.to_string())) {
                        return;
                    }
                }
            }

            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempts();
                tracing::error!(attempts, "giving up on connection");
                self.emit(ConnectionEvent::GaveUp { attempts });
                return;
            };
            tracing::info!(
                attempt = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting after delay"
            );
            if !self.wait_disconnected(delay) {
                return;
            }
        }
    }

    fn session(&mut self, mut channel: Box<dyn Channel>) -> SessionEnd {
        loop {
            if !self.drain_commands() {
                channel.close();
                return SessionEnd::Shutdown;
            }

            while let Some(front) = self.outbox.front() {
                if front.ticket.is_cancelled() {
                    tracing::debug!(seq = front.ticket.seq(), "skipping cancelled frame");
                    self.outbox.pop_front();
                    continue;
                }
                match channel.send_text(&front.text) {
                    Ok(()) => {
                        tracing::debug!(seq = front.ticket.seq(), "frame sent");
                        self.outbox.pop_front();
                    }
                    Err(err) => {
                        tracing::warn!(%err, "send failed, frame kept for retry");
                        self.emit(ConnectionEvent::Errored(err.to_string()));
                        channel.close();
                        return SessionEnd::Lost;
                    }
                }
            }

            match channel.poll_text() {
                Ok(Some(text)) => {
                    if !self.emit(ConnectionEvent::Received(text)) {
                        channel.close();
                        return SessionEnd::Shutdown;
                    }
                }
                Ok(None) => {}
                Err(ConnectionError::Closed) => return SessionEnd::Lost,
                Err(err) => {
                    tracing::warn!(%err, "receive failed");
                    self.emit(ConnectionEvent::Errored(err.to_string()));
                    channel.close();
                    return SessionEnd::Lost;
                }
            }
        }
    }

    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Send(queued)) => self.outbox.push_back(queued),
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => return true,
            }
        }
    }

    /// Sleeps through a backoff delay while still accepting frames, checking
    /// every poll interval. `false` on shutdown.
    fn wait_disconnected(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let wait = (deadline - now).min(self.poll_interval);
            match self.commands.recv_timeout(wait) {
                Ok(Command::Send(queued)) => self.outbox.push_back(queued),
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn emit(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
