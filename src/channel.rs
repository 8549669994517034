use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::dispatch::DeliveryChannel;
use crate::error::DeliveryError;
use crate::models::{AlertEvent, Contact};

const SUBSCRIBER_BUFFER: usize = 32;

/// Pushes delivered alerts to live subscribers, one broadcast per contact.
#[derive(Default)]
pub struct PushChannel {
    subscribers: RwLock<HashMap<Uuid, broadcast::Sender<AlertEvent>>>,
}

impl PushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, contact_id: Uuid) -> broadcast::Receiver<AlertEvent> {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(contact_id)
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_BUFFER).0)
            .subscribe()
    }
}

#[async_trait]
impl DeliveryChannel for PushChannel {
    async fn deliver(&self, contact: &Contact, alert: &AlertEvent) -> Result<(), DeliveryError> {
        let sender = self.subscribers.read().await.get(&contact.id).cloned();
        let Some(sender) = sender else {
            return Err(DeliveryError::Unreachable(format!(
                "{} has no live subscription",
                contact.name
            )));
        };

        if sender.send(alert.clone()).is_err() {
            // Every receiver has gone away.
            self.subscribers.write().await.remove(&contact.id);
            return Err(DeliveryError::Unreachable(format!(
                "{} disconnected",
                contact.name
            )));
        }

        tracing::info!(
            alert_id = %alert.id,
            contact = %contact.name,
            access = contact.access_level.as_str(),
            "Alert pushed"
        );
        Ok(())
    }
}
