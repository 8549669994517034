use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::evaluator;
use crate::models::{ClassificationChanged, Evaluation, Patient, Reading};

#[derive(Debug)]
struct PatientState {
    patient: Patient,
    history: VecDeque<Reading>,
    last_evaluation: Evaluation,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub patient: Patient,
    pub evaluation: Evaluation,
    pub changed: bool,
}

/// Owns per-patient vitals state. Each patient sits behind its own mutex so
/// readings for different patients proceed in parallel while transitions for
/// one patient are emitted in capture order.
pub struct VitalsIngestor {
    config: Arc<MonitorConfig>,
    patients: RwLock<HashMap<Uuid, Arc<Mutex<PatientState>>>>,
    changes: mpsc::UnboundedSender<ClassificationChanged>,
}

impl VitalsIngestor {
    pub fn new(
        config: Arc<MonitorConfig>,
        changes: mpsc::UnboundedSender<ClassificationChanged>,
    ) -> Self {
        Self {
            config,
            patients: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub async fn register(&self, patient: Patient) {
        let state = PatientState {
            patient,
            history: VecDeque::new(),
            last_evaluation: evaluator::baseline(),
        };
        let id = state.patient.id;
        self.patients
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(state)));
    }

    pub async fn contains(&self, patient_id: Uuid) -> bool {
        self.patients.read().await.contains_key(&patient_id)
    }

    pub async fn ingest(&self, reading: Reading) -> Result<IngestOutcome, MonitorError> {
        let thresholds = &self.config.thresholds;
        if !reading.value.is_finite()
            || reading.value < thresholds.min_valid
            || reading.value > thresholds.max_valid
        {
            return Err(MonitorError::InvalidReading(format!(
                "{} mg/dL is outside {}..={}",
                reading.value, thresholds.min_valid, thresholds.max_valid
            )));
        }

        let latest_allowed = Utc::now() + self.config.max_clock_skew();
        if reading.captured_at > latest_allowed {
            return Err(MonitorError::InvalidReading(format!(
                "captured at {} which is ahead of the server clock",
                reading.captured_at
            )));
        }

        let slot = self
            .patients
            .read()
            .await
            .get(&reading.patient_id)
            .cloned()
            .ok_or(MonitorError::UnknownPatient(reading.patient_id))?;

        let mut state = slot.lock().await;
        if let Some(last) = state.history.back() {
            if reading.captured_at < last.captured_at {
                return Err(MonitorError::InvalidReading(format!(
                    "captured at {} which is before the latest reading at {}",
                    reading.captured_at, last.captured_at
                )));
            }
        }

        let evaluation =
            evaluator::evaluate(&reading, state.history.make_contiguous(), thresholds);
        let previous = state.last_evaluation;
        let changed = evaluation.differs_from(&previous);

        state.history.push_back(reading.clone());
        while state.history.len() > self.config.history_capacity {
            state.history.pop_front();
        }
        state.patient.current_reading = Some(reading.value);
        state.patient.last_update = Some(reading.captured_at);
        state.patient.status = evaluation.classification;
        state.patient.trend = evaluation.trend;
        state.last_evaluation = evaluation;

        tracing::debug!(
            patient_id = %reading.patient_id,
            value = reading.value,
            classification = %evaluation.classification,
            trend = %evaluation.trend,
            "Reading accepted"
        );

        if changed {
            let change = ClassificationChanged {
                patient_id: reading.patient_id,
                reading,
                previous,
                current: evaluation,
            };
            // Sent under the patient lock to keep per-patient ordering.
            if self.changes.send(change).is_err() {
                tracing::warn!("Dispatch queue closed, classification change dropped");
            }
        }

        Ok(IngestOutcome {
            patient: state.patient.clone(),
            evaluation,
            changed,
        })
    }

    pub async fn patient(&self, patient_id: Uuid) -> Result<Patient, MonitorError> {
        let slot = self
            .patients
            .read()
            .await
            .get(&patient_id)
            .cloned()
            .ok_or(MonitorError::UnknownPatient(patient_id))?;
        let state = slot.lock().await;
        Ok(state.patient.clone())
    }

    pub async fn patients(&self) -> Vec<Patient> {
        let slots: Vec<Arc<Mutex<PatientState>>> =
            self.patients.read().await.values().cloned().collect();
        let mut patients = Vec::with_capacity(slots.len());
        for slot in slots {
            patients.push(slot.lock().await.patient.clone());
        }
        patients.sort_by(|a, b| a.name.cmp(&b.name));
        patients
    }

    /// Readings captured within `since` of the latest one, oldest first.
    pub async fn history(
        &self,
        patient_id: Uuid,
        since: chrono::Duration,
    ) -> Result<Vec<Reading>, MonitorError> {
        let slot = self
            .patients
            .read()
            .await
            .get(&patient_id)
            .cloned()
            .ok_or(MonitorError::UnknownPatient(patient_id))?;
        let state = slot.lock().await;
        let Some(latest) = state.history.back() else {
            return Ok(Vec::new());
        };
        let cutoff = latest.captured_at.checked_sub_signed(since);
        Ok(state
            .history
            .iter()
            .filter(|r| cutoff.map_or(true, |cutoff| r.captured_at >= cutoff))
            .cloned()
            .collect())
    }
}
