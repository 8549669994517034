use anyhow::Context;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{AccessLevel, NewContact};
use crate::monitor::Monitor;

/// One patient/contact pair, as stored in the journal or a roster CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    #[serde(default)]
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    #[serde(default)]
    pub contact_id: Option<Uuid>,
    pub contact_name: String,
    #[serde(default)]
    pub caregiver_id: Option<Uuid>,
    pub role: String,
    pub access_level: AccessLevel,
}

impl RosterEntry {
    /// Rows with a patient id group by id; rows without one group by name.
    fn same_patient(&self, other: &RosterEntry) -> bool {
        match (self.patient_id, other.patient_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.patient_name == other.patient_name,
            _ => false,
        }
    }

    fn to_new_contact(&self) -> NewContact {
        NewContact {
            id: self.contact_id,
            caregiver_id: self.caregiver_id,
            name: self.contact_name.clone(),
            role: self.role.clone(),
            access_level: self.access_level,
        }
    }
}

pub fn read_roster_csv(path: &std::path::Path) -> anyhow::Result<Vec<RosterEntry>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open roster {}", path.display()))?;
    let mut entries = Vec::new();
    for result in reader.deserialize::<RosterEntry>() {
        entries.push(result?);
    }
    Ok(entries)
}

/// Registers every patient in `entries`, opening each with its first Full
/// contact. Returns the number of patients registered.
pub async fn apply_roster(monitor: &Monitor, entries: &[RosterEntry]) -> anyhow::Result<usize> {
    let mut patients: Vec<Vec<&RosterEntry>> = Vec::new();
    for entry in entries {
        match patients.iter_mut().find(|group| group[0].same_patient(entry)) {
            Some(group) => group.push(entry),
            None => patients.push(vec![entry]),
        }
    }

    for group in &patients {
        let name = group[0].patient_name.as_str();
        let primary = group
            .iter()
            .position(|e| e.access_level == AccessLevel::Full)
            .with_context(|| format!("roster for {name} has no Full-access contact"))?;
        let patient_id = group[0].patient_id.unwrap_or_else(Uuid::new_v4);

        monitor
            .register_patient_with_id(patient_id, name, group[primary].to_new_contact())
            .await
            .with_context(|| format!("failed to register {name}"))?;

        for (index, entry) in group.iter().enumerate() {
            if index == primary {
                continue;
            }
            monitor
                .add_contact(patient_id, entry.to_new_contact())
                .await
                .with_context(|| format!("failed to add {} for {name}", entry.contact_name))?;
        }
    }

    tracing::info!(patients = patients.len(), contacts = entries.len(), "Roster loaded");
    Ok(patients.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PushChannel;
    use crate::config::MonitorConfig;
    use std::sync::Arc;

    fn entry(patient: &str, contact: &str, level: AccessLevel) -> RosterEntry {
        RosterEntry {
            patient_id: None,
            patient_name: patient.to_string(),
            contact_id: None,
            contact_name: contact.to_string(),
            caregiver_id: None,
            role: "Caregiver".to_string(),
            access_level: level,
        }
    }

    #[tokio::test]
    async fn roster_registers_patients_with_full_contact_first() {
        let (monitor, _queue) =
            Monitor::new(MonitorConfig::default(), Arc::new(PushChannel::new()), None);
        let entries = vec![
            entry("Emma Johnson", "James Friend", AccessLevel::Low),
            entry("Emma Johnson", "Lisa Mom", AccessLevel::Full),
            entry("Jacob Smith", "Sarah Caregiver", AccessLevel::Full),
        ];

        let registered = apply_roster(&monitor, &entries).await.unwrap();
        assert_eq!(registered, 2);

        let patients = monitor.patients().await;
        let emma = patients.iter().find(|p| p.name == "Emma Johnson").unwrap();
        let contacts = monitor.contacts_for(emma.id).await.unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].access_level, AccessLevel::Full);
    }

    #[tokio::test]
    async fn same_name_patients_with_distinct_ids_stay_apart() {
        let (monitor, _queue) =
            Monitor::new(MonitorConfig::default(), Arc::new(PushChannel::new()), None);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let with_id = |id: Uuid, contact: &str, level: AccessLevel| RosterEntry {
            patient_id: Some(id),
            ..entry("Emma Johnson", contact, level)
        };
        let entries = vec![
            with_id(first, "Lisa Mom", AccessLevel::Full),
            with_id(second, "Sarah Caregiver", AccessLevel::Full),
            with_id(first, "James Friend", AccessLevel::Low),
            with_id(second, "John Dad", AccessLevel::High),
        ];

        assert_eq!(apply_roster(&monitor, &entries).await.unwrap(), 2);

        let names = |contacts: Vec<crate::models::Contact>| -> Vec<String> {
            contacts.into_iter().map(|c| c.name).collect()
        };
        assert_eq!(
            names(monitor.contacts_for(first).await.unwrap()),
            vec!["Lisa Mom".to_string(), "James Friend".to_string()]
        );
        assert_eq!(
            names(monitor.contacts_for(second).await.unwrap()),
            vec!["Sarah Caregiver".to_string(), "John Dad".to_string()]
        );
    }

    #[tokio::test]
    async fn roster_without_full_contact_fails() {
        let (monitor, _queue) =
            Monitor::new(MonitorConfig::default(), Arc::new(PushChannel::new()), None);
        let entries = vec![entry("Olivia Brown", "James Friend", AccessLevel::High)];
        assert!(apply_roster(&monitor, &entries).await.is_err());
        assert!(monitor.patients().await.is_empty());
    }
}
