/// Notification center: read-through cache plus read/delete commands
use crate::api::HospitalApi;
use crate::error::Result;
use crate::models::{Notification, UnreadKind};
use crate::unread::UnreadStore;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
struct Cache {
    items: Vec<Notification>,
    loaded: bool,
    stale: bool,
}

pub struct NotificationCenter {
    api: Arc<dyn HospitalApi>,
    unread: Arc<UnreadStore>,
    cache: RwLock<Cache>,
}

impl NotificationCenter {
    pub fn new(api: Arc<dyn HospitalApi>, unread: Arc<UnreadStore>) -> Self {
        Self {
            api,
            unread,
            cache: RwLock::new(Cache::default()),
        }
    }

    /// Fetch from the server and replace the cache
    pub async fn refresh(&self) -> Result<Vec<Notification>> {
        let items = self.api.notifications().await?;
        let mut cache = self.cache.write().await;
        cache.items = items.clone();
        cache.loaded = true;
        cache.stale = false;
        debug!("Cached {} notifications", items.len());
        Ok(items)
    }

    /// Cached list, fetched on first use or after a `new_notification`
    pub async fn list(&self) -> Result<Vec<Notification>> {
        {
            let cache = self.cache.read().await;
            if cache.loaded && !cache.stale {
                return Ok(cache.items.clone());
            }
        }
        self.refresh().await
    }

    pub async fn unread(&self) -> Vec<Notification> {
        self.cache
            .read()
            .await
            .items
            .iter()
            .filter(|n| !n.is_read)
            .cloned()
            .collect()
    }

    /// Real-time `new_notification`: count it and mark the cache stale.
    /// A pushed payload is put at the head of a loaded cache.
    pub async fn on_new_notification(&self, pushed: Option<Notification>) {
        self.unread.increment(UnreadKind::Notifications);
        let mut cache = self.cache.write().await;
        match pushed {
            Some(n) if cache.loaded && !cache.items.iter().any(|c| c.id == n.id) => {
                cache.items.insert(0, n);
            }
            _ => cache.stale = true,
        }
    }

    pub async fn mark_read(&self, id: &str) -> Result<()> {
        self.api.mark_notification_read(id).await?;

        let was_unread = {
            let mut cache = self.cache.write().await;
            match cache.items.iter_mut().find(|n| n.id == id) {
                Some(n) if !n.is_read => {
                    n.is_read = true;
                    true
                }
                _ => false,
            }
        };
        if was_unread {
            self.unread.decrement(UnreadKind::Notifications, 1);
        }
        self.reconcile().await;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        self.api.mark_all_notifications_read().await?;

        for n in self.cache.write().await.items.iter_mut() {
            n.is_read = true;
        }
        self.unread.reset(UnreadKind::Notifications);
        self.reconcile().await;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.api.delete_notification(id).await?;

        let removed = {
            let mut cache = self.cache.write().await;
            cache
                .items
                .iter()
                .position(|n| n.id == id)
                .map(|idx| cache.items.remove(idx))
        };
        if matches!(removed, Some(ref n) if !n.is_read) {
            self.unread.decrement(UnreadKind::Notifications, 1);
        }
        self.reconcile().await;
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.api.delete_all_notifications().await?;

        {
            let mut cache = self.cache.write().await;
            cache.items.clear();
            cache.loaded = true;
            cache.stale = false;
        }
        self.unread.reset(UnreadKind::Notifications);
        self.reconcile().await;
        Ok(())
    }

    /// The local change already happened; a failed follow-up fetch only
    /// leaves the estimate in place until the next one
    async fn reconcile(&self) {
        if let Err(e) = self.unread.fetch_unread_count().await {
            warn!("Unread count reconcile failed: {}", e);
        }
    }
}
