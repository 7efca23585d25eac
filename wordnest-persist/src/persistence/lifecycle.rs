use super::service::SessionPersistenceService;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Page visibility state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Host lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    BeforeUnload,
    PageHide,
    VisibilityChange(Visibility),
    Online,
    Offline,
}

impl SessionPersistenceService {
    /// React to a lifecycle notification
    pub async fn handle_lifecycle_event(&self, event: LifecycleEvent) {
        debug!("Lifecycle event: {:?}", event);

        match event {
            LifecycleEvent::BeforeUnload | LifecycleEvent::PageHide => {
                self.force_sync().await;
            }
            LifecycleEvent::VisibilityChange(Visibility::Hidden) => {
                self.suspend_background();
                self.force_sync().await;
            }
            LifecycleEvent::VisibilityChange(Visibility::Visible) => {
                self.resume_background();
            }
            LifecycleEvent::Online => {
                self.set_online(true);
                if self.has_queued() {
                    self.process_queue().await;
                }
            }
            LifecycleEvent::Offline => {
                self.set_online(false);
            }
        }
    }

    /// Feed events from a channel until every sender is dropped
    pub fn attach_lifecycle(&self, mut events: mpsc::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                service.handle_lifecycle_event(event).await;
            }
            info!("Lifecycle channel closed");
        })
    }
}
