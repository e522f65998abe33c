/// Unread counters: process-wide message and notification tallies
///
/// Seeded by a reconciling fetch, nudged locally by real-time events and
/// user actions, and overwritten again by the next fetch.
use crate::api::HospitalApi;
use crate::error::Result;
use crate::models::{UnreadCounts, UnreadKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Explicit counter store, built once per session and shared by `Arc`
pub struct UnreadStore {
    api: Arc<dyn HospitalApi>,
    counts: watch::Sender<UnreadCounts>,
    /// Ticket handed to each reconciling fetch
    issued: AtomicU64,
    /// Highest ticket whose response has been applied
    applied: Mutex<u64>,
}

impl UnreadStore {
    pub fn new(api: Arc<dyn HospitalApi>) -> Self {
        let (counts, _) = watch::channel(UnreadCounts::default());
        Self {
            api,
            counts,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
        }
    }

    /// Current counters
    pub fn snapshot(&self) -> UnreadCounts {
        *self.counts.borrow()
    }

    pub fn get(&self, kind: UnreadKind) -> u64 {
        self.snapshot().get(kind)
    }

    /// Watch the counters; the receiver sees every change
    pub fn subscribe(&self) -> watch::Receiver<UnreadCounts> {
        self.counts.subscribe()
    }

    /// Overwrite both counters with the server's values.
    ///
    /// A response that lands after a newer fetch was already applied is
    /// dropped and the current counters are returned instead.
    pub async fn fetch_unread_count(&self) -> Result<UnreadCounts> {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let fresh = self.api.unread_count().await?;

        let mut applied = self.applied.lock().await;
        if ticket <= *applied {
            debug!("Dropping stale unread count response #{}", ticket);
            return Ok(self.snapshot());
        }
        *applied = ticket;
        self.counts.send_replace(fresh);
        drop(applied);

        debug!(
            "Unread counts reconciled: {} messages, {} notifications",
            fresh.message_count, fresh.notification_count
        );
        Ok(fresh)
    }

    /// Optimistic +1 from an inbound event
    pub fn increment(&self, kind: UnreadKind) {
        self.counts.send_modify(|c| {
            let slot = c.slot(kind);
            *slot = slot.saturating_add(1);
        });
    }

    /// Subtract `n`, flooring at zero
    pub fn decrement(&self, kind: UnreadKind, n: u64) {
        self.counts.send_modify(|c| {
            let slot = c.slot(kind);
            *slot = slot.saturating_sub(n);
        });
    }

    pub fn reset(&self, kind: UnreadKind) {
        self.counts.send_modify(|c| *c.slot(kind) = 0);
        info!("Unread {:?} reset", kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ChatMessage, Counterpart, LabReport, LabReportUpdate, MedicineAlerts, NewLabReport,
        NewPatient, Notification, Patient, SearchResults,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Answers unread-count requests from a script, optionally with a delay
    struct ScriptedCounts {
        replies: StdMutex<VecDeque<(UnreadCounts, Duration)>>,
    }

    impl ScriptedCounts {
        fn new(replies: Vec<(UnreadCounts, Duration)>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.into()),
            })
        }
    }

    #[async_trait]
    impl HospitalApi for ScriptedCounts {
        async fn search(&self, _: &str) -> Result<SearchResults> {
            unimplemented!()
        }
        async fn unread_count(&self) -> Result<UnreadCounts> {
            let (counts, delay) = self.replies.lock().unwrap().pop_front().unwrap();
            tokio::time::sleep(delay).await;
            Ok(counts)
        }
        async fn chat_users(&self) -> Result<Vec<Counterpart>> {
            unimplemented!()
        }
        async fn chat_history(&self, _: &str) -> Result<Vec<ChatMessage>> {
            unimplemented!()
        }
        async fn send_message(&self, _: &str, _: &str) -> Result<ChatMessage> {
            unimplemented!()
        }
        async fn mark_chat_read(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn notifications(&self) -> Result<Vec<Notification>> {
            unimplemented!()
        }
        async fn mark_notification_read(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn mark_all_notifications_read(&self) -> Result<()> {
            unimplemented!()
        }
        async fn delete_notification(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn delete_all_notifications(&self) -> Result<()> {
            unimplemented!()
        }
        async fn patients(&self) -> Result<Vec<Patient>> {
            unimplemented!()
        }
        async fn create_patient(&self, _: &NewPatient) -> Result<Patient> {
            unimplemented!()
        }
        async fn lab_reports(&self) -> Result<Vec<LabReport>> {
            unimplemented!()
        }
        async fn create_lab_report(&self, _: &NewLabReport) -> Result<LabReport> {
            unimplemented!()
        }
        async fn update_lab_report(&self, _: &str, _: &LabReportUpdate) -> Result<LabReport> {
            unimplemented!()
        }
        async fn medicine_alerts(&self) -> Result<MedicineAlerts> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_fetch_overwrites_local_estimates() {
        let api = ScriptedCounts::new(vec![(UnreadCounts::new(3, 1), Duration::ZERO)]);
        let store = UnreadStore::new(api);
        store.increment(UnreadKind::Messages);
        assert_eq!(store.get(UnreadKind::Messages), 1);

        let counts = store.fetch_unread_count().await.unwrap();
        assert_eq!(counts, UnreadCounts::new(3, 1));
        assert_eq!(store.snapshot(), UnreadCounts::new(3, 1));
    }

    #[tokio::test]
    async fn test_decrement_never_goes_negative() {
        let api = ScriptedCounts::new(vec![(UnreadCounts::new(2, 0), Duration::ZERO)]);
        let store = UnreadStore::new(api);
        store.fetch_unread_count().await.unwrap();

        store.decrement(UnreadKind::Messages, 5);
        store.decrement(UnreadKind::Notifications, 1);
        assert_eq!(store.snapshot(), UnreadCounts::new(0, 0));

        store.increment(UnreadKind::Notifications);
        store.increment(UnreadKind::Notifications);
        store.reset(UnreadKind::Notifications);
        assert_eq!(store.get(UnreadKind::Notifications), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fetch_is_dropped() {
        // First request is slow and carries older data; second is fast.
        let api = ScriptedCounts::new(vec![
            (UnreadCounts::new(9, 9), Duration::from_millis(500)),
            (UnreadCounts::new(1, 0), Duration::from_millis(10)),
        ]);
        let store = Arc::new(UnreadStore::new(api));

        let slow = {
            let store = store.clone();
            tokio::spawn(async move { store.fetch_unread_count().await })
        };
        tokio::task::yield_now().await;
        let fast = store.fetch_unread_count().await.unwrap();
        assert_eq!(fast, UnreadCounts::new(1, 0));

        let after_slow = slow.await.unwrap().unwrap();
        assert_eq!(after_slow, UnreadCounts::new(1, 0));
        assert_eq!(store.snapshot(), UnreadCounts::new(1, 0));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let api = ScriptedCounts::new(vec![]);
        let store = UnreadStore::new(api);
        let mut rx = store.subscribe();

        store.increment(UnreadKind::Messages);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().message_count, 1);
    }
}
