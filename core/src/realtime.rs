/// Real-time event channel
///
/// One TCP connection per session carrying newline-delimited JSON frames:
///   {"event": "<name>", "data": <payload>}
///
/// Inbound:  receive_message, new_notification, medicine_updated, lab_report_updated
/// Outbound: join_room (sent on every connect, data = user id)
///
/// The connection task reconnects with exponential backoff until the client
/// is closed or the policy gives up.
use crate::config::{Config, ReconnectPolicy};
use crate::error::{Result, WardError};
use crate::models::{ChatMessage, LabReport, Notification};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

const EVENT_BUFFER: usize = 256;

/// Wire frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: &str, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    /// Serialized frame with trailing newline
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| WardError::Protocol(format!("Invalid frame: {}", e)))
    }
}

/// Server → client events
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    ReceiveMessage(ChatMessage),
    /// The payload is optional; some servers only signal "something new"
    NewNotification(Option<Notification>),
    MedicineUpdated,
    LabReportUpdated(LabReport),
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::ReceiveMessage(_) => "receive_message",
            RealtimeEvent::NewNotification(_) => "new_notification",
            RealtimeEvent::MedicineUpdated => "medicine_updated",
            RealtimeEvent::LabReportUpdated(_) => "lab_report_updated",
        }
    }

    /// Decode a frame. `Ok(None)` for events this client does not consume.
    pub fn from_frame(frame: Frame) -> Result<Option<Self>> {
        let event = match frame.event.as_str() {
            "receive_message" => RealtimeEvent::ReceiveMessage(serde_json::from_value(frame.data)?),
            "new_notification" => {
                RealtimeEvent::NewNotification(serde_json::from_value(frame.data).ok())
            }
            "medicine_updated" => RealtimeEvent::MedicineUpdated,
            "lab_report_updated" => {
                RealtimeEvent::LabReportUpdated(serde_json::from_value(frame.data)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn to_frame(&self) -> Result<Frame> {
        let data = match self {
            RealtimeEvent::ReceiveMessage(m) => serde_json::to_value(m)?,
            RealtimeEvent::NewNotification(n) => serde_json::to_value(n)?,
            RealtimeEvent::MedicineUpdated => serde_json::Value::Null,
            RealtimeEvent::LabReportUpdated(r) => serde_json::to_value(r)?,
        };
        Ok(Frame::new(self.name(), data))
    }
}

/// Client → server events
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinRoom(String),
}

impl ClientEvent {
    pub fn to_frame(&self) -> Frame {
        match self {
            ClientEvent::JoinRoom(user_id) => {
                Frame::new("join_room", serde_json::Value::String(user_id.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Waiting `delay` before retry number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect policy exhausted
    Failed,
    Closed,
}

/// Registration handle for real-time events. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<RealtimeEvent>,
}

impl Subscription {
    /// Next event, or None once the channel is closed
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Real-time subscriber lagged {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Release the registration explicitly
    pub fn unsubscribe(self) {}
}

/// Handle on the session's real-time connection
pub struct RealtimeClient {
    events: broadcast::Sender<RealtimeEvent>,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Spawn the connection task; the first connect happens in the background
    pub fn start(config: &Config, user_id: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let link = Link {
            addr: config.realtime_addr.clone(),
            user_id: user_id.to_string(),
            connect_timeout: config.connect_timeout,
            policy: config.reconnect.clone(),
            events: events.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(link.run(shutdown_rx));

        Self {
            events,
            state,
            shutdown,
            task: Some(task),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.events.subscribe(),
        }
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Close the connection and wait for the task to finish
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Real-time task ended abnormally: {}", e);
                }
            }
        }
        info!("Real-time channel closed");
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Ending {
    Shutdown,
    Remote,
}

/// State owned by the connection task
struct Link {
    addr: String,
    user_id: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    events: broadcast::Sender<RealtimeEvent>,
    state: watch::Sender<ConnectionState>,
}

impl Link {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;

        loop {
            if stopping(&shutdown) {
                break;
            }
            self.state.send_replace(ConnectionState::Connecting);

            let connect = timeout(self.connect_timeout, TcpStream::connect(&self.addr));
            let outcome = tokio::select! {
                res = connect => res,
                _ = shutdown.changed() => continue,
            };

            match outcome {
                Ok(Ok(stream)) => {
                    failures = 0;
                    info!("Real-time channel connected to {}", self.addr);
                    self.state.send_replace(ConnectionState::Connected);
                    match self.serve(stream, &mut shutdown).await {
                        Ok(Ending::Shutdown) => break,
                        Ok(Ending::Remote) => info!("Real-time channel closed by server"),
                        Err(e) => warn!("Real-time channel error: {}", e),
                    }
                }
                Ok(Err(e)) => warn!("Failed to connect to {}: {}", self.addr, e),
                Err(_) => warn!("Connection timeout to {}", self.addr),
            }

            failures += 1;
            if self.policy.exhausted(failures) {
                error!("Giving up on real-time channel after {} attempts", failures);
                self.state.send_replace(ConnectionState::Failed);
                return;
            }

            let delay = self.policy.delay_for(failures);
            debug!("Reconnecting in {:?} (attempt {})", delay, failures);
            self.state.send_replace(ConnectionState::Reconnecting {
                attempt: failures,
                delay,
            });
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.state.send_replace(ConnectionState::Closed);
    }

    /// Announce presence, then pump frames until EOF, error or shutdown
    async fn serve(
        &self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Ending> {
        let (reader, mut writer) = stream.into_split();

        let join = ClientEvent::JoinRoom(self.user_id.clone()).to_frame().to_line()?;
        writer.write_all(join.as_bytes()).await?;
        debug!("Joined room {}", self.user_id);

        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => dispatch(&self.events, &line),
                    None => return Ok(Ending::Remote),
                },
                _ = shutdown.changed() => {
                    if stopping(shutdown) {
                        let _ = writer.shutdown().await;
                        return Ok(Ending::Shutdown);
                    }
                }
            }
        }
    }
}

/// True once close was requested or the client handle is gone
fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

fn dispatch(events: &broadcast::Sender<RealtimeEvent>, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    let frame = match Frame::from_line(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("{}", e);
            return;
        }
    };
    let name = frame.event.clone();
    match RealtimeEvent::from_frame(frame) {
        Ok(Some(event)) => {
            debug!("Real-time event {}", name);
            if events.send(event).is_err() {
                debug!("No subscribers for {}", name);
            }
        }
        Ok(None) => debug!("Ignoring real-time event {}", name),
        Err(e) => warn!("Malformed {} payload: {}", name, e),
    }
}
