use std::collections::{HashMap, VecDeque};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::evaluator;
use crate::models::{Evaluation, Reading};

#[derive(Debug, Clone, Deserialize)]
pub struct ReadingRow {
    pub patient: String,
    pub value: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub patient: String,
    pub value: f64,
    pub captured_at: DateTime<Utc>,
    pub previous: Evaluation,
    pub current: Evaluation,
}

pub fn read_readings_csv(path: &std::path::Path) -> anyhow::Result<Vec<ReadingRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open readings {}", path.display()))?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<ReadingRow>() {
        rows.push(result?);
    }
    Ok(rows)
}

/// Run every row through the evaluator in capture order per patient and
/// collect the transitions the live ingestor would have emitted. Rows outside
/// the valid range are skipped.
pub fn replay(rows: &[ReadingRow], config: &MonitorConfig) -> Vec<Transition> {
    let mut ordered: Vec<&ReadingRow> = rows.iter().collect();
    ordered.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));

    let mut histories: HashMap<&str, (Uuid, VecDeque<Reading>, Evaluation)> = HashMap::new();
    let mut transitions = Vec::new();
    let thresholds = &config.thresholds;

    for row in ordered {
        if !row.value.is_finite() || row.value < thresholds.min_valid || row.value > thresholds.max_valid
        {
            continue;
        }
        let (patient_id, history, last) = histories
            .entry(row.patient.as_str())
            .or_insert_with(|| (Uuid::new_v4(), VecDeque::new(), evaluator::baseline()));
        let reading = Reading {
            patient_id: *patient_id,
            value: row.value,
            captured_at: row.captured_at,
        };

        let current = evaluator::evaluate(&reading, history.make_contiguous(), thresholds);
        if current.differs_from(last) {
            transitions.push(Transition {
                patient: row.patient.clone(),
                value: row.value,
                captured_at: row.captured_at,
                previous: *last,
                current,
            });
        }
        *last = current;

        history.push_back(reading);
        while history.len() > config.history_capacity {
            history.pop_front();
        }
    }

    transitions
}
