use std::fmt::Write;

use crate::config::MonitorConfig;
use crate::models::Classification;
use crate::replay::{self, ReadingRow};

#[derive(Debug, Clone)]
pub struct PatientSummary {
    pub patient: String,
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub in_range_pct: f64,
    pub low_pct: f64,
    pub high_pct: f64,
    pub breaches: usize,
}

pub fn summarize_by_patient(rows: &[ReadingRow], config: &MonitorConfig) -> Vec<PatientSummary> {
    let thresholds = &config.thresholds;
    let mut map: std::collections::HashMap<String, Vec<f64>> = std::collections::HashMap::new();

    for row in rows {
        if !row.value.is_finite() || row.value < thresholds.min_valid || row.value > thresholds.max_valid
        {
            continue;
        }
        map.entry(row.patient.clone()).or_default().push(row.value);
    }

    let transitions = replay::replay(rows, config);

    let mut summaries: Vec<PatientSummary> = map
        .into_iter()
        .map(|(patient, values)| {
            let count = values.len();
            let total: f64 = values.iter().sum();
            let low = values.iter().filter(|v| **v < thresholds.low).count();
            let high = values.iter().filter(|v| **v > thresholds.high).count();
            let breaches = transitions
                .iter()
                .filter(|t| {
                    t.patient == patient
                        && t.previous.classification == Classification::Normal
                        && t.current.classification != Classification::Normal
                })
                .count();
            PatientSummary {
                count,
                average: total / count as f64,
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                in_range_pct: percent(count - low - high, count),
                low_pct: percent(low, count),
                high_pct: percent(high, count),
                breaches,
                patient,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.breaches
            .cmp(&a.breaches)
            .then_with(|| a.patient.cmp(&b.patient))
    });
    summaries
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

pub fn build_report(rows: &[ReadingRow], config: &MonitorConfig) -> String {
    let summaries = summarize_by_patient(rows, config);
    let transitions = replay::replay(rows, config);
    let thresholds = &config.thresholds;

    let mut output = String::new();

    let _ = writeln!(output, "# Glucose Monitoring Report");
    let _ = writeln!(
        output,
        "Target range {:.0}-{:.0} mg/dL across {} readings",
        thresholds.low,
        thresholds.high,
        rows.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Patients");

    if summaries.is_empty() {
        let _ = writeln!(output, "No readings recorded.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} readings, avg {:.0} (min {:.0}, max {:.0}), {:.0}% in range, {:.0}% low, {:.0}% high, {} breach alerts",
                summary.patient,
                summary.count,
                summary.average,
                summary.min,
                summary.max,
                summary.in_range_pct,
                summary.low_pct,
                summary.high_pct,
                summary.breaches
            );
        }
    }

    let mut recent = transitions;
    recent.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Transitions");

    if recent.is_empty() {
        let _ = writeln!(output, "No classification changes.");
    } else {
        for t in recent.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} at {}: {:.0} mg/dL, {} -> {} (trend {})",
                t.patient,
                t.captured_at.format("%Y-%m-%d %H:%M"),
                t.value,
                t.previous.classification,
                t.current.classification,
                t.current.trend
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn row(patient: &str, minutes: i64, value: f64) -> ReadingRow {
        ReadingRow {
            patient: patient.to_string(),
            value,
            captured_at: Utc::now() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn summary_counts_time_in_range() {
        let rows = vec![
            row("Olivia Brown", 0, 106.0),
            row("Olivia Brown", 30, 60.0),
            row("Olivia Brown", 60, 200.0),
            row("Olivia Brown", 90, 120.0),
        ];
        let summaries = summarize_by_patient(&rows, &MonitorConfig::default());
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.count, 4);
        assert!((s.average - 121.5).abs() < 0.001);
        assert_eq!(s.min, 60.0);
        assert_eq!(s.max, 200.0);
        assert!((s.in_range_pct - 50.0).abs() < 0.001);
        assert!((s.low_pct - 25.0).abs() < 0.001);
        // The critical -> high step stays inside the alert opened at 60 mg/dL.
        assert_eq!(s.breaches, 1);
    }

    #[test]
    fn escalation_is_not_a_new_breach() {
        let rows = vec![
            row("Jacob Smith", 0, 120.0),
            row("Jacob Smith", 20, 200.0),
            row("Jacob Smith", 40, 65.0),
            row("Jacob Smith", 60, 110.0),
            row("Jacob Smith", 80, 250.0),
        ];
        let summaries = summarize_by_patient(&rows, &MonitorConfig::default());
        assert_eq!(summaries[0].breaches, 2);
    }

    #[test]
    fn report_lists_patients_and_transitions() {
        let rows = vec![row("Emma Johnson", 0, 90.0), row("Emma Johnson", 5, 52.0)];
        let report = build_report(&rows, &MonitorConfig::default());
        assert!(report.contains("# Glucose Monitoring Report"));
        assert!(report.contains("Emma Johnson: 2 readings"));
        assert!(report.contains("normal -> critical"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report(&[], &MonitorConfig::default());
        assert!(report.contains("No readings recorded."));
        assert!(report.contains("No classification changes."));
    }
}
