use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db;
use crate::models::{AlertEvent, Contact, Patient, Reading};

#[derive(Debug, Clone)]
pub enum JournalEntry {
    Patient { patient: Patient, primary: Contact },
    Contact(Contact),
    ContactRemoved(Uuid),
    Reading(Reading),
    Alert(AlertEvent),
}

impl JournalEntry {
    fn label(&self) -> &'static str {
        match self {
            JournalEntry::Patient { .. } => "patient",
            JournalEntry::Contact(_) => "contact",
            JournalEntry::ContactRemoved(_) => "contact removal",
            JournalEntry::Reading(_) => "reading",
            JournalEntry::Alert(_) => "alert",
        }
    }

    async fn write(&self, pool: &PgPool) -> anyhow::Result<()> {
        match self {
            JournalEntry::Patient { patient, primary } => {
                db::upsert_patient(pool, patient).await?;
                db::upsert_contact(pool, primary).await
            }
            JournalEntry::Contact(contact) => db::upsert_contact(pool, contact).await,
            JournalEntry::ContactRemoved(contact_id) => db::delete_contact(pool, *contact_id).await,
            JournalEntry::Reading(reading) => db::record_reading(pool, reading).await,
            JournalEntry::Alert(alert) => db::record_alert(pool, alert).await,
        }
    }
}

/// Handle to the journal writer. Entries are written one at a time in the
/// order they were recorded, so a contact never lands before its patient.
#[derive(Debug, Clone)]
pub struct Journal {
    entries: mpsc::UnboundedSender<JournalEntry>,
}

impl Journal {
    /// Start the writer task for `pool`.
    pub fn spawn(pool: PgPool) -> Self {
        let (entries, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(pool, receiver));
        Self { entries }
    }

    #[cfg(test)]
    pub fn capture() -> (Self, mpsc::UnboundedReceiver<JournalEntry>) {
        let (entries, receiver) = mpsc::unbounded_channel();
        (Self { entries }, receiver)
    }

    /// Queue an entry. A failing database never fails the caller.
    pub fn record(&self, entry: JournalEntry) {
        if let Err(err) = self.entries.send(entry) {
            tracing::warn!("Journal writer stopped, {} entry dropped", err.0.label());
        }
    }
}

async fn run_writer(pool: PgPool, mut receiver: mpsc::UnboundedReceiver<JournalEntry>) {
    while let Some(entry) = receiver.recv().await {
        if let Err(err) = entry.write(&pool).await {
            tracing::warn!("Journal {} write failed: {err:#}", entry.label());
        }
    }
    tracing::info!("Journal writer closed");
}
