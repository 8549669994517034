use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::{DeliveryError, MonitorError};
use crate::models::{
    AlertEvent, AlertKind, AlertState, Classification, ClassificationChanged, Contact,
    DeliveryRecord,
};
use crate::registry::SubscriptionRegistry;

/// One immediate re-attempt after the first failure.
const MAX_ATTEMPTS: u8 = 2;

/// Outbound push surface implemented by messaging/notification collaborators.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, contact: &Contact, alert: &AlertEvent) -> Result<(), DeliveryError>;
}

#[derive(Debug, Default)]
struct AlertBook {
    alerts: HashMap<Uuid, AlertEvent>,
    /// At most one non-resolved alert per (patient, kind).
    active: HashMap<(Uuid, AlertKind), Uuid>,
    /// Patients back to normal, keyed to the capture time of the recovering reading.
    recovering: HashMap<Uuid, DateTime<Utc>>,
}

pub struct AlertDispatcher {
    config: Arc<MonitorConfig>,
    registry: Arc<SubscriptionRegistry>,
    channel: Arc<dyn DeliveryChannel>,
    book: Mutex<AlertBook>,
}

impl AlertDispatcher {
    pub fn new(
        config: Arc<MonitorConfig>,
        registry: Arc<SubscriptionRegistry>,
        channel: Arc<dyn DeliveryChannel>,
    ) -> Self {
        Self {
            config,
            registry,
            channel,
            book: Mutex::new(AlertBook::default()),
        }
    }

    /// React to an evaluator transition. Returns the alert that was touched, if any.
    pub async fn handle_change(&self, change: &ClassificationChanged) -> Option<AlertEvent> {
        let severity = change.current.classification;
        if severity == Classification::Normal {
            self.begin_cooldown(change.patient_id, change.reading.captured_at)
                .await;
            return None;
        }

        let (alert, escalated) = self.open_breach(change).await;
        if !escalated {
            return Some(alert);
        }

        match self.fan_out(alert.id).await {
            Ok(delivered) => Some(delivered),
            Err(err) => {
                tracing::warn!(alert_id = %alert.id, "Breach fan-out skipped: {err}");
                Some(alert)
            }
        }
    }

    /// Creates or updates the patient's threshold-breach alert. The flag is
    /// false when only the trend moved on an already open alert of the same
    /// severity, which needs no re-delivery.
    async fn open_breach(&self, change: &ClassificationChanged) -> (AlertEvent, bool) {
        let severity = change.current.classification;
        let now = Utc::now();
        let description = format!(
            "Glucose {} mg/dL ({}, trend {})",
            change.reading.value, severity, change.current.trend
        );

        let mut book = self.book.lock().await;
        book.recovering.remove(&change.patient_id);

        let key = (change.patient_id, AlertKind::ThresholdBreach);
        if let Some(id) = book.active.get(&key).copied() {
            if let Some(alert) = book.alerts.get_mut(&id) {
                let escalated = alert.severity != severity;
                alert.severity = severity;
                alert.description = description;
                alert.updated_at = now;
                alert.occurrences += 1;
                return (alert.clone(), escalated);
            }
        }

        let alert = new_alert(change.patient_id, AlertKind::ThresholdBreach, severity, description);
        tracing::info!(
            alert_id = %alert.id,
            patient_id = %alert.patient_id,
            severity = %severity,
            "Threshold breach alert opened"
        );
        book.active.insert(key, alert.id);
        book.alerts.insert(alert.id, alert.clone());
        (alert, true)
    }

    /// Records a manual SOS. Delivery happens separately through [`Self::fan_out`].
    pub async fn open_sos(
        &self,
        patient_id: Uuid,
        description: Option<String>,
    ) -> Result<AlertEvent, MonitorError> {
        if !self.registry.contains_patient(patient_id).await {
            return Err(MonitorError::UnknownPatient(patient_id));
        }
        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "Manual SOS alert triggered".to_string());

        let mut book = self.book.lock().await;
        let key = (patient_id, AlertKind::ManualSos);
        if let Some(id) = book.active.get(&key).copied() {
            if let Some(alert) = book.alerts.get_mut(&id) {
                alert.description = description;
                alert.updated_at = Utc::now();
                alert.occurrences += 1;
                return Ok(alert.clone());
            }
        }

        let alert = new_alert(patient_id, AlertKind::ManualSos, Classification::Critical, description);
        tracing::info!(alert_id = %alert.id, patient_id = %patient_id, "SOS alert opened");
        book.active.insert(key, alert.id);
        book.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    /// Deliver an alert to every permitted contact concurrently and record the
    /// per-contact outcome. Failures never abort the dispatch.
    pub async fn fan_out(&self, alert_id: Uuid) -> Result<AlertEvent, MonitorError> {
        let alert = self.alert(alert_id).await?;
        if !alert.is_active() {
            return Ok(alert);
        }

        let recipients: Vec<Contact> = self
            .registry
            .contacts_for(alert.patient_id)
            .await?
            .into_iter()
            .filter(|c| alert.kind == AlertKind::ManualSos || c.access_level.permits(alert.severity))
            .collect();

        let records = join_all(recipients.iter().map(|c| self.deliver_to(c, &alert))).await;
        let failed = records.iter().filter(|r| !r.delivered).count();
        if failed > 0 {
            tracing::warn!(
                alert_id = %alert_id,
                failed,
                total = records.len(),
                "Alert delivery incomplete"
            );
        }

        let mut book = self.book.lock().await;
        let stored = book
            .alerts
            .get_mut(&alert_id)
            .ok_or(MonitorError::UnknownAlert(alert_id))?;
        stored.deliveries = records;
        stored.delivery_incomplete = failed > 0;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn deliver_to(&self, contact: &Contact, alert: &AlertEvent) -> DeliveryRecord {
        let timeout = self.config.delivery_timeout();
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < MAX_ATTEMPTS {
            attempts += 1;
            let result = tokio::time::timeout(timeout, self.channel.deliver(contact, alert))
                .await
                .unwrap_or(Err(DeliveryError::Timeout));
            match result {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        alert_id = %alert.id,
                        contact_id = %contact.id,
                        attempt = attempts,
                        "Delivery failed: {err}"
                    );
                    last_error = Some(err);
                }
            }
        }

        DeliveryRecord {
            contact_id: contact.id,
            delivered: last_error.is_none(),
            attempts,
            error: last_error.map(|e| e.to_string()),
            attempted_at: Utc::now(),
        }
    }

    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        contact_id: Uuid,
    ) -> Result<AlertEvent, MonitorError> {
        self.ensure_subscribed(alert_id, contact_id).await?;

        let mut book = self.book.lock().await;
        let alert = book
            .alerts
            .get_mut(&alert_id)
            .ok_or(MonitorError::UnknownAlert(alert_id))?;
        match alert.state {
            AlertState::Resolved => Err(MonitorError::AlreadyResolved(alert_id)),
            AlertState::Acknowledged => Ok(alert.clone()),
            AlertState::Unacknowledged => {
                alert.state = AlertState::Acknowledged;
                alert.acknowledged_by = Some(contact_id);
                alert.updated_at = Utc::now();
                tracing::info!(alert_id = %alert_id, contact_id = %contact_id, "Alert acknowledged");
                Ok(alert.clone())
            }
        }
    }

    /// Explicit resolution by one of the patient's contacts, allowed from
    /// either open state. Cooldown resolution goes through [`Self::sweep_cooldowns`].
    pub async fn resolve(
        &self,
        alert_id: Uuid,
        contact_id: Uuid,
    ) -> Result<AlertEvent, MonitorError> {
        self.ensure_subscribed(alert_id, contact_id).await?;

        let mut book = self.book.lock().await;
        let alert = book
            .alerts
            .get_mut(&alert_id)
            .ok_or(MonitorError::UnknownAlert(alert_id))?;
        if alert.state == AlertState::Resolved {
            return Err(MonitorError::AlreadyResolved(alert_id));
        }
        mark_resolved(alert, Utc::now());
        let resolved = alert.clone();
        book.active.remove(&(resolved.patient_id, resolved.kind));
        tracing::info!(alert_id = %alert_id, contact_id = %contact_id, "Alert resolved by caregiver");
        Ok(resolved)
    }

    async fn ensure_subscribed(&self, alert_id: Uuid, contact_id: Uuid) -> Result<(), MonitorError> {
        let contact = self.registry.contact(contact_id).await?;
        let alert = self.alert(alert_id).await?;
        if contact.patient_id != alert.patient_id {
            return Err(MonitorError::NotSubscribed {
                contact_id,
                alert_id,
            });
        }
        Ok(())
    }

    async fn begin_cooldown(&self, patient_id: Uuid, since: DateTime<Utc>) {
        let mut book = self.book.lock().await;
        if book
            .active
            .contains_key(&(patient_id, AlertKind::ThresholdBreach))
        {
            book.recovering.entry(patient_id).or_insert(since);
        }
    }

    /// Resolve breach alerts of patients that stayed normal for the cooldown.
    pub async fn sweep_cooldowns(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let cooldown = self.config.resolve_cooldown();
        let mut book = self.book.lock().await;
        let due: Vec<Uuid> = book
            .recovering
            .iter()
            .filter(|(_, since)| now - **since >= cooldown)
            .map(|(patient_id, _)| *patient_id)
            .collect();

        let mut resolved = Vec::new();
        for patient_id in due {
            book.recovering.remove(&patient_id);
            let Some(id) = book.active.remove(&(patient_id, AlertKind::ThresholdBreach)) else {
                continue;
            };
            if let Some(alert) = book.alerts.get_mut(&id) {
                mark_resolved(alert, now);
                tracing::info!(alert_id = %id, patient_id = %patient_id, "Alert resolved after cooldown");
                resolved.push(alert.clone());
            }
        }
        resolved
    }

    pub async fn alert(&self, alert_id: Uuid) -> Result<AlertEvent, MonitorError> {
        self.book
            .lock()
            .await
            .alerts
            .get(&alert_id)
            .cloned()
            .ok_or(MonitorError::UnknownAlert(alert_id))
    }

    /// All alerts of a patient, newest first.
    pub async fn alerts_for(&self, patient_id: Uuid) -> Vec<AlertEvent> {
        let book = self.book.lock().await;
        let mut alerts: Vec<AlertEvent> = book
            .alerts
            .values()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }
}

fn new_alert(
    patient_id: Uuid,
    kind: AlertKind,
    severity: Classification,
    description: String,
) -> AlertEvent {
    let now = Utc::now();
    AlertEvent {
        id: Uuid::new_v4(),
        patient_id,
        kind,
        severity,
        created_at: now,
        updated_at: now,
        description,
        state: AlertState::Unacknowledged,
        acknowledged_by: None,
        resolved_at: None,
        occurrences: 1,
        deliveries: Vec::new(),
        delivery_incomplete: false,
    }
}

fn mark_resolved(alert: &mut AlertEvent, at: DateTime<Utc>) {
    alert.state = AlertState::Resolved;
    alert.resolved_at = Some(at);
    alert.updated_at = at;
}
