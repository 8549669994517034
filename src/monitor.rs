use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::dispatch::{AlertDispatcher, DeliveryChannel};
use crate::error::MonitorError;
use crate::ingest::{IngestOutcome, VitalsIngestor};
use crate::journal::{Journal, JournalEntry};
use crate::models::{
    AlertEvent, ClassificationChanged, Contact, ContactUpdate, NewContact, Patient, Reading,
};
use crate::registry::SubscriptionRegistry;

#[derive(Debug)]
enum DispatchJob {
    Change(ClassificationChanged),
    Deliver(Uuid),
}

/// Pending dispatch work. Ingestion only ever enqueues here, so delivery
/// latency never reaches the ingestion path.
pub struct DispatchQueue {
    changes: mpsc::UnboundedReceiver<ClassificationChanged>,
    deliveries: mpsc::UnboundedReceiver<(Uuid, Uuid)>,
}

impl DispatchQueue {
    /// Routes each job to its patient's worker. Jobs of one patient run in
    /// arrival order; different patients never wait on each other.
    pub async fn run(mut self, monitor: Arc<Monitor>) {
        let mut workers: HashMap<Uuid, mpsc::UnboundedSender<DispatchJob>> = HashMap::new();
        loop {
            let (patient_id, job) = tokio::select! {
                Some(change) = self.changes.recv() => (change.patient_id, DispatchJob::Change(change)),
                Some((patient_id, alert_id)) = self.deliveries.recv() => {
                    (patient_id, DispatchJob::Deliver(alert_id))
                }
                else => break,
            };
            let worker = workers
                .entry(patient_id)
                .or_insert_with(|| spawn_worker(monitor.clone(), patient_id));
            if worker.send(job).is_err() {
                tracing::warn!(patient_id = %patient_id, "Dispatch worker gone, job dropped");
            }
        }
        tracing::info!("Dispatch queue closed");
    }

    /// Process everything queued so far. Returns the number of jobs handled.
    #[cfg(test)]
    pub async fn drain(&mut self, monitor: &Monitor) -> usize {
        let mut handled = 0;
        while let Ok(change) = self.changes.try_recv() {
            monitor.process(DispatchJob::Change(change)).await;
            handled += 1;
        }
        while let Ok((_, alert_id)) = self.deliveries.try_recv() {
            monitor.process(DispatchJob::Deliver(alert_id)).await;
            handled += 1;
        }
        handled
    }
}

fn spawn_worker(monitor: Arc<Monitor>, patient_id: Uuid) -> mpsc::UnboundedSender<DispatchJob> {
    let (jobs, mut receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            monitor.process(job).await;
        }
        tracing::debug!(patient_id = %patient_id, "Dispatch worker stopped");
    });
    jobs
}

/// The monitoring core: vitals ingestion, subscriptions and alert dispatch.
pub struct Monitor {
    config: Arc<MonitorConfig>,
    ingestor: VitalsIngestor,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: AlertDispatcher,
    deliveries: mpsc::UnboundedSender<(Uuid, Uuid)>,
    journal: Option<Journal>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        channel: Arc<dyn DeliveryChannel>,
        pool: Option<PgPool>,
    ) -> (Arc<Self>, DispatchQueue) {
        Self::with_journal(config, channel, pool.map(Journal::spawn))
    }

    fn with_journal(
        config: MonitorConfig,
        channel: Arc<dyn DeliveryChannel>,
        journal: Option<Journal>,
    ) -> (Arc<Self>, DispatchQueue) {
        let config = Arc::new(config);
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SubscriptionRegistry::new());

        let monitor = Self {
            ingestor: VitalsIngestor::new(config.clone(), change_tx),
            dispatcher: AlertDispatcher::new(config.clone(), registry.clone(), channel),
            registry,
            config,
            deliveries: delivery_tx,
            journal,
        };
        let queue = DispatchQueue {
            changes: change_rx,
            deliveries: delivery_rx,
        };
        (Arc::new(monitor), queue)
    }

    /// Spawn the dispatch router and the cooldown sweeper.
    pub fn start(self: &Arc<Self>, queue: DispatchQueue) {
        tokio::spawn(queue.run(self.clone()));
        tokio::spawn(self.clone().run_sweeper());
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        loop {
            ticker.tick().await;
            self.sweep(Utc::now()).await;
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let resolved = self.dispatcher.sweep_cooldowns(now).await;
        for alert in &resolved {
            self.journal_alert(alert);
        }
        resolved
    }

    async fn process(&self, job: DispatchJob) {
        match job {
            DispatchJob::Change(change) => {
                if let Some(alert) = self.dispatcher.handle_change(&change).await {
                    self.journal_alert(&alert);
                }
            }
            DispatchJob::Deliver(alert_id) => match self.dispatcher.fan_out(alert_id).await {
                Ok(alert) => self.journal_alert(&alert),
                Err(err) => tracing::warn!(alert_id = %alert_id, "Delivery skipped: {err}"),
            },
        }
    }

    pub async fn register_patient(
        &self,
        name: &str,
        primary: NewContact,
    ) -> Result<(Patient, Contact), MonitorError> {
        self.register_patient_with_id(Uuid::new_v4(), name, primary)
            .await
    }

    /// The registry rejects a known id, so a patient is only ever registered once.
    pub async fn register_patient_with_id(
        &self,
        patient_id: Uuid,
        name: &str,
        primary: NewContact,
    ) -> Result<(Patient, Contact), MonitorError> {
        let contact = self.registry.register_patient(patient_id, primary).await?;
        let patient = Patient::new(patient_id, name);
        self.record(JournalEntry::Patient {
            patient: patient.clone(),
            primary: contact.clone(),
        });
        self.ingestor.register(patient.clone()).await;
        tracing::info!(patient_id = %patient_id, name, "Patient registered");
        Ok((patient, contact))
    }

    pub async fn ingest(&self, reading: Reading) -> Result<IngestOutcome, MonitorError> {
        let outcome = self.ingestor.ingest(reading.clone()).await?;
        self.record(JournalEntry::Reading(reading));
        Ok(outcome)
    }

    /// Open (or fold into) the patient's SOS alert and queue its delivery.
    pub async fn trigger_sos(
        &self,
        patient_id: Uuid,
        description: Option<String>,
    ) -> Result<AlertEvent, MonitorError> {
        let alert = self.dispatcher.open_sos(patient_id, description).await?;
        if self.deliveries.send((patient_id, alert.id)).is_err() {
            tracing::warn!(alert_id = %alert.id, "Dispatch queue closed, SOS not delivered");
        }
        self.journal_alert(&alert);
        Ok(alert)
    }

    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        contact_id: Uuid,
    ) -> Result<AlertEvent, MonitorError> {
        let alert = self.dispatcher.acknowledge(alert_id, contact_id).await?;
        self.journal_alert(&alert);
        Ok(alert)
    }

    pub async fn resolve(
        &self,
        alert_id: Uuid,
        contact_id: Uuid,
    ) -> Result<AlertEvent, MonitorError> {
        let alert = self.dispatcher.resolve(alert_id, contact_id).await?;
        self.journal_alert(&alert);
        Ok(alert)
    }

    pub async fn add_contact(
        &self,
        patient_id: Uuid,
        new_contact: NewContact,
    ) -> Result<Contact, MonitorError> {
        let contact = self.registry.add_contact(patient_id, new_contact).await?;
        self.record(JournalEntry::Contact(contact.clone()));
        Ok(contact)
    }

    pub async fn update_contact(
        &self,
        contact_id: Uuid,
        update: ContactUpdate,
    ) -> Result<Contact, MonitorError> {
        let contact = self.registry.update_contact(contact_id, update).await?;
        self.record(JournalEntry::Contact(contact.clone()));
        Ok(contact)
    }

    pub async fn remove_contact(&self, contact_id: Uuid) -> Result<Contact, MonitorError> {
        let contact = self.registry.remove_contact(contact_id).await?;
        self.record(JournalEntry::ContactRemoved(contact_id));
        Ok(contact)
    }

    pub async fn contact(&self, contact_id: Uuid) -> Result<Contact, MonitorError> {
        self.registry.contact(contact_id).await
    }

    pub async fn contacts_for(&self, patient_id: Uuid) -> Result<Vec<Contact>, MonitorError> {
        self.registry.contacts_for(patient_id).await
    }

    pub async fn patient(&self, patient_id: Uuid) -> Result<Patient, MonitorError> {
        self.ingestor.patient(patient_id).await
    }

    pub async fn patients(&self) -> Vec<Patient> {
        self.ingestor.patients().await
    }

    pub async fn history(
        &self,
        patient_id: Uuid,
        since: chrono::Duration,
    ) -> Result<Vec<Reading>, MonitorError> {
        self.ingestor.history(patient_id, since).await
    }

    pub async fn alert(&self, alert_id: Uuid) -> Result<AlertEvent, MonitorError> {
        self.dispatcher.alert(alert_id).await
    }

    pub async fn alerts_for(&self, patient_id: Uuid) -> Result<Vec<AlertEvent>, MonitorError> {
        if !self.ingestor.contains(patient_id).await {
            return Err(MonitorError::UnknownPatient(patient_id));
        }
        Ok(self.dispatcher.alerts_for(patient_id).await)
    }

    fn journal_alert(&self, alert: &AlertEvent) {
        self.record(JournalEntry::Alert(alert.clone()));
    }

    fn record(&self, entry: JournalEntry) {
        if let Some(journal) = &self.journal {
            journal.record(entry);
        }
    }
}
