use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::MonitorError;
use crate::models::{AccessLevel, Contact, ContactUpdate, NewContact};

/// Contact records per patient. Every registered patient keeps at least one
/// Full-access contact.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    contacts: RwLock<HashMap<Uuid, Vec<Contact>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the contact list of a new patient with its primary contact.
    /// An id that is already registered is rejected.
    pub async fn register_patient(
        &self,
        patient_id: Uuid,
        primary: NewContact,
    ) -> Result<Contact, MonitorError> {
        if primary.access_level != AccessLevel::Full {
            return Err(MonitorError::MissingFullContact);
        }
        let mut contacts = self.contacts.write().await;
        if contacts.contains_key(&patient_id) {
            return Err(MonitorError::DuplicatePatient(patient_id));
        }
        let contact = build_contact(patient_id, primary);
        contacts.insert(patient_id, vec![contact.clone()]);
        Ok(contact)
    }

    pub async fn contains_patient(&self, patient_id: Uuid) -> bool {
        self.contacts.read().await.contains_key(&patient_id)
    }

    pub async fn add_contact(
        &self,
        patient_id: Uuid,
        new_contact: NewContact,
    ) -> Result<Contact, MonitorError> {
        let mut contacts = self.contacts.write().await;
        let list = contacts
            .get_mut(&patient_id)
            .ok_or(MonitorError::UnknownPatient(patient_id))?;
        let contact = build_contact(patient_id, new_contact);
        list.push(contact.clone());
        Ok(contact)
    }

    pub async fn update_contact(
        &self,
        contact_id: Uuid,
        update: ContactUpdate,
    ) -> Result<Contact, MonitorError> {
        let mut contacts = self.contacts.write().await;
        let list = contacts
            .values_mut()
            .find(|list| list.iter().any(|c| c.id == contact_id))
            .ok_or(MonitorError::UnknownContact(contact_id))?;

        if let Some(level) = update.access_level {
            if level != AccessLevel::Full && is_last_full(list, contact_id) {
                return Err(MonitorError::LastFullContactRemoval(contact_id));
            }
        }

        let contact = list
            .iter_mut()
            .find(|c| c.id == contact_id)
            .ok_or(MonitorError::UnknownContact(contact_id))?;
        if let Some(name) = update.name {
            contact.name = name;
        }
        if let Some(role) = update.role {
            contact.role = role;
        }
        if let Some(level) = update.access_level {
            contact.access_level = level;
        }
        Ok(contact.clone())
    }

    pub async fn remove_contact(&self, contact_id: Uuid) -> Result<Contact, MonitorError> {
        let mut contacts = self.contacts.write().await;
        let list = contacts
            .values_mut()
            .find(|list| list.iter().any(|c| c.id == contact_id))
            .ok_or(MonitorError::UnknownContact(contact_id))?;

        if is_last_full(list, contact_id) {
            return Err(MonitorError::LastFullContactRemoval(contact_id));
        }

        let position = list
            .iter()
            .position(|c| c.id == contact_id)
            .ok_or(MonitorError::UnknownContact(contact_id))?;
        Ok(list.remove(position))
    }

    pub async fn contact(&self, contact_id: Uuid) -> Result<Contact, MonitorError> {
        let contacts = self.contacts.read().await;
        contacts
            .values()
            .flatten()
            .find(|c| c.id == contact_id)
            .cloned()
            .ok_or(MonitorError::UnknownContact(contact_id))
    }

    /// Fan-out list for a patient: Full first, then High, then Low, by name within a tier.
    pub async fn contacts_for(&self, patient_id: Uuid) -> Result<Vec<Contact>, MonitorError> {
        let contacts = self.contacts.read().await;
        let mut list = contacts
            .get(&patient_id)
            .cloned()
            .ok_or(MonitorError::UnknownPatient(patient_id))?;
        list.sort_by(|a, b| {
            a.access_level
                .cmp(&b.access_level)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(list)
    }
}

fn build_contact(patient_id: Uuid, new_contact: NewContact) -> Contact {
    Contact {
        id: new_contact.id.unwrap_or_else(Uuid::new_v4),
        patient_id,
        caregiver_id: new_contact.caregiver_id.unwrap_or_else(Uuid::new_v4),
        name: new_contact.name,
        role: new_contact.role,
        access_level: new_contact.access_level,
    }
}

fn is_last_full(list: &[Contact], contact_id: Uuid) -> bool {
    let target_is_full = list
        .iter()
        .any(|c| c.id == contact_id && c.access_level == AccessLevel::Full);
    let full_count = list
        .iter()
        .filter(|c| c.access_level == AccessLevel::Full)
        .count();
    target_is_full && full_count == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_contact(name: &str, level: AccessLevel) -> NewContact {
        NewContact {
            id: None,
            caregiver_id: None,
            name: name.to_string(),
            role: "Family member".to_string(),
            access_level: level,
        }
    }

    #[tokio::test]
    async fn first_contact_must_be_full() {
        let registry = SubscriptionRegistry::new();
        let result = registry
            .register_patient(Uuid::new_v4(), new_contact("James Friend", AccessLevel::Low))
            .await;
        assert_eq!(result, Err(MonitorError::MissingFullContact));
    }

    #[tokio::test]
    async fn registering_same_patient_twice_is_rejected() {
        let registry = SubscriptionRegistry::new();
        let patient = Uuid::new_v4();
        registry
            .register_patient(patient, new_contact("Lisa Mom", AccessLevel::Full))
            .await
            .unwrap();
        let result = registry
            .register_patient(patient, new_contact("John Dad", AccessLevel::Full))
            .await;
        assert_eq!(result, Err(MonitorError::DuplicatePatient(patient)));
        assert_eq!(registry.contacts_for(patient).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removing_last_full_contact_is_rejected() {
        let registry = SubscriptionRegistry::new();
        let patient = Uuid::new_v4();
        let mom = registry
            .register_patient(patient, new_contact("Lisa Mom", AccessLevel::Full))
            .await
            .unwrap();
        registry
            .add_contact(patient, new_contact("Emma Sister", AccessLevel::High))
            .await
            .unwrap();

        let before = registry.contacts_for(patient).await.unwrap();
        let result = registry.remove_contact(mom.id).await;
        assert_eq!(result, Err(MonitorError::LastFullContactRemoval(mom.id)));
        assert_eq!(registry.contacts_for(patient).await.unwrap(), before);
    }

    #[tokio::test]
    async fn removing_one_of_two_full_contacts_succeeds() {
        let registry = SubscriptionRegistry::new();
        let patient = Uuid::new_v4();
        let mom = registry
            .register_patient(patient, new_contact("Lisa Mom", AccessLevel::Full))
            .await
            .unwrap();
        registry
            .add_contact(patient, new_contact("John Dad", AccessLevel::Full))
            .await
            .unwrap();

        let removed = registry.remove_contact(mom.id).await.unwrap();
        assert_eq!(removed.id, mom.id);
        assert_eq!(registry.contacts_for(patient).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn downgrading_last_full_contact_is_rejected() {
        let registry = SubscriptionRegistry::new();
        let patient = Uuid::new_v4();
        let mom = registry
            .register_patient(patient, new_contact("Lisa Mom", AccessLevel::Full))
            .await
            .unwrap();

        let update = ContactUpdate {
            access_level: Some(AccessLevel::Low),
            ..ContactUpdate::default()
        };
        let result = registry.update_contact(mom.id, update).await;
        assert_eq!(result, Err(MonitorError::LastFullContactRemoval(mom.id)));
        assert_eq!(
            registry.contact(mom.id).await.unwrap().access_level,
            AccessLevel::Full
        );
    }

    #[tokio::test]
    async fn edits_apply_to_name_and_role() {
        let registry = SubscriptionRegistry::new();
        let patient = Uuid::new_v4();
        let mom = registry
            .register_patient(patient, new_contact("Lisa Mom", AccessLevel::Full))
            .await
            .unwrap();
        let update = ContactUpdate {
            name: Some("Lisa Johnson".to_string()),
            role: Some("Primary caregiver".to_string()),
            access_level: None,
        };
        let updated = registry.update_contact(mom.id, update).await.unwrap();
        assert_eq!(updated.name, "Lisa Johnson");
        assert_eq!(updated.role, "Primary caregiver");
    }

    #[tokio::test]
    async fn contacts_are_ordered_by_access_then_name() {
        let registry = SubscriptionRegistry::new();
        let patient = Uuid::new_v4();
        registry
            .register_patient(patient, new_contact("Sarah Caregiver", AccessLevel::Full))
            .await
            .unwrap();
        for (name, level) in [
            ("James Friend", AccessLevel::Low),
            ("Emma Sister", AccessLevel::High),
            ("John Dad", AccessLevel::Full),
        ] {
            registry
                .add_contact(patient, new_contact(name, level))
                .await
                .unwrap();
        }

        let names: Vec<String> = registry
            .contacts_for(patient)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            vec!["John Dad", "Sarah Caregiver", "Emma Sister", "James Friend"]
        );
    }

    #[tokio::test]
    async fn unknown_patient_lookup_fails() {
        let registry = SubscriptionRegistry::new();
        let patient = Uuid::new_v4();
        assert_eq!(
            registry.contacts_for(patient).await,
            Err(MonitorError::UnknownPatient(patient))
        );
        assert_eq!(
            registry
                .add_contact(patient, new_contact("John Dad", AccessLevel::Full))
                .await,
            Err(MonitorError::UnknownPatient(patient))
        );
    }
}
