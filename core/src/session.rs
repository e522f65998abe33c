/// Session lifecycle: one set of stores and one real-time connection per login
use crate::api::HospitalApi;
use crate::config::Config;
use crate::conversations::{Delivery, Inbox};
use crate::error::{Result, WardError};
use crate::models::{ChatMessage, LabReport, MedicineAlerts, Notification, SessionUser};
use crate::notifications::NotificationCenter;
use crate::realtime::{ConnectionState, RealtimeClient, RealtimeEvent, Subscription};
use crate::records::{LabReportBoard, PharmacyAlerts};
use crate::search::SearchController;
use crate::unread::UnreadStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_BUFFER: usize = 256;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What the dispatcher did with an inbound event, for views to render
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Message {
        message: ChatMessage,
        delivery: Delivery,
    },
    Notification(Option<Notification>),
    PharmacyAlerts(MedicineAlerts),
    LabReport(LabReport),
    Connection(ConnectionState),
}

pub struct Session {
    pub id: Uuid,
    user: SessionUser,
    api: Arc<dyn HospitalApi>,
    unread: Arc<UnreadStore>,
    inbox: Arc<Inbox>,
    notifications: Arc<NotificationCenter>,
    lab_reports: Arc<LabReportBoard>,
    pharmacy: Arc<PharmacyAlerts>,
    events: broadcast::Sender<SessionEvent>,
    realtime: Option<RealtimeClient>,
    dispatcher: Option<JoinHandle<()>>,
    search_debounce: Duration,
    search_min_chars: usize,
}

impl Session {
    /// Build the stores, seed the counters and open the real-time channel.
    ///
    /// Failed seed fetches are logged and leave empty state; the session
    /// still starts.
    pub async fn start(
        config: &Config,
        user: SessionUser,
        api: Arc<dyn HospitalApi>,
    ) -> Result<Self> {
        if user.id.trim().is_empty() {
            return Err(WardError::Session("session user has no id".to_string()));
        }

        let id = Uuid::new_v4();
        info!("Starting session {} for {} ({})", id, user.name, user.role);

        let unread = Arc::new(UnreadStore::new(api.clone()));
        let inbox = Arc::new(Inbox::new(user.clone(), api.clone(), unread.clone()));
        let notifications = Arc::new(NotificationCenter::new(api.clone(), unread.clone()));
        let lab_reports = Arc::new(LabReportBoard::new(api.clone()));
        let pharmacy = Arc::new(PharmacyAlerts::new(api.clone()));

        if let Err(e) = unread.fetch_unread_count().await {
            warn!("Initial unread count fetch failed: {}", e);
        }
        if let Err(e) = inbox.load_counterparts().await {
            warn!("Initial chat user fetch failed: {}", e);
        }

        let realtime = RealtimeClient::start(config, &user.id);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let dispatcher = Dispatcher {
            unread: unread.clone(),
            inbox: inbox.clone(),
            notifications: notifications.clone(),
            lab_reports: lab_reports.clone(),
            pharmacy: pharmacy.clone(),
            events: events.clone(),
        };
        let handle =
            tokio::spawn(dispatcher.run(realtime.subscribe(), realtime.connection_state()));

        Ok(Self {
            id,
            user,
            api,
            unread,
            inbox,
            notifications,
            lab_reports,
            pharmacy,
            events,
            realtime: Some(realtime),
            dispatcher: Some(handle),
            search_debounce: config.search_debounce,
            search_min_chars: config.search_min_chars,
        })
    }

    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    pub fn api(&self) -> Arc<dyn HospitalApi> {
        self.api.clone()
    }

    pub fn unread(&self) -> Arc<UnreadStore> {
        self.unread.clone()
    }

    pub fn inbox(&self) -> Arc<Inbox> {
        self.inbox.clone()
    }

    pub fn notifications(&self) -> Arc<NotificationCenter> {
        self.notifications.clone()
    }

    pub fn lab_reports(&self) -> Arc<LabReportBoard> {
        self.lab_reports.clone()
    }

    pub fn pharmacy(&self) -> Arc<PharmacyAlerts> {
        self.pharmacy.clone()
    }

    /// Stream of handled real-time events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.realtime.as_ref().map(|r| r.connection_state())
    }

    /// A search box bound to this session's API
    pub fn search(&self) -> SearchController {
        SearchController::spawn(self.api.clone(), self.search_debounce, self.search_min_chars)
    }

    /// Close the real-time channel and stop the dispatcher
    pub async fn end(mut self) {
        if let Some(realtime) = self.realtime.take() {
            realtime.close().await;
        }
        if let Some(mut handle) = self.dispatcher.take() {
            if timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
                debug!("Dispatcher still busy, aborting");
                handle.abort();
            }
        }
        info!("Session {} for {} ended", self.id, self.user.name);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
    }
}

/// Routes real-time events into the session's stores
struct Dispatcher {
    unread: Arc<UnreadStore>,
    inbox: Arc<Inbox>,
    notifications: Arc<NotificationCenter>,
    lab_reports: Arc<LabReportBoard>,
    pharmacy: Arc<PharmacyAlerts>,
    events: broadcast::Sender<SessionEvent>,
}

impl Dispatcher {
    async fn run(
        self,
        mut subscription: Subscription,
        mut connection: watch::Receiver<ConnectionState>,
    ) {
        let mut watching = true;
        let mut connected_before = false;

        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                changed = connection.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let state = *connection.borrow_and_update();
                    self.publish(SessionEvent::Connection(state));
                    if state == ConnectionState::Connected {
                        if connected_before {
                            self.resync().await;
                        }
                        connected_before = true;
                    }
                }
            }
        }

        subscription.unsubscribe();
        debug!("Session dispatcher stopped");
    }

    async fn handle(&self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::ReceiveMessage(message) => {
                match self.inbox.handle_incoming(message.clone()).await {
                    Ok(delivery) => self.publish(SessionEvent::Message { message, delivery }),
                    Err(e) => warn!("Failed to handle message from {}: {}", message.sender, e),
                }
            }
            RealtimeEvent::NewNotification(pushed) => {
                self.notifications.on_new_notification(pushed.clone()).await;
                self.publish(SessionEvent::Notification(pushed));
            }
            RealtimeEvent::MedicineUpdated => match self.pharmacy.refresh().await {
                Ok(alerts) => self.publish(SessionEvent::PharmacyAlerts(alerts)),
                Err(e) => warn!("Pharmacy alert refresh failed: {}", e),
            },
            RealtimeEvent::LabReportUpdated(report) => {
                self.lab_reports.apply_update(report.clone()).await;
                self.publish(SessionEvent::LabReport(report));
            }
        }
    }

    /// After a reconnect: events may have been missed while offline
    async fn resync(&self) {
        info!("Real-time channel reconnected, reconciling");
        if let Err(e) = self.unread.fetch_unread_count().await {
            warn!("Reconcile after reconnect failed: {}", e);
        }
        if let Err(e) = self.inbox.load_counterparts().await {
            warn!("Chat user refresh after reconnect failed: {}", e);
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is normal when nothing renders events
        let _ = self.events.send(event);
    }
}

/// Holds at most one live session
pub struct SessionManager {
    config: Config,
    api: Arc<dyn HospitalApi>,
    current: Option<Session>,
}

impl SessionManager {
    pub fn new(config: Config, api: Arc<dyn HospitalApi>) -> Self {
        Self {
            config,
            api,
            current: None,
        }
    }

    /// Start a session for `user`, ending any previous one first
    pub async fn login(&mut self, user: SessionUser) -> Result<&Session> {
        self.logout().await;
        let session = Session::start(&self.config, user, self.api.clone()).await?;
        Ok(self.current.insert(session))
    }

    pub async fn logout(&mut self) {
        if let Some(session) = self.current.take() {
            session.end().await;
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }
}
