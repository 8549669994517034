use crate::config::Thresholds;
use crate::models::{Classification, Evaluation, Reading, Trend};

/// Classify `reading` against `history` (prior readings, oldest first).
///
/// Only history captured inside the trend window before the reading counts
/// towards trend and rapid-drop detection, so a patient with no recent
/// history is always `Stable`.
pub fn evaluate(reading: &Reading, history: &[Reading], thresholds: &Thresholds) -> Evaluation {
    let window_start = reading.captured_at - thresholds.trend_window();
    let recent: Vec<&Reading> = history
        .iter()
        .filter(|r| r.captured_at >= window_start && r.captured_at <= reading.captured_at)
        .collect();

    let delta = recent.first().map(|baseline| reading.value - baseline.value);
    let trend = trend_for(delta, thresholds.trend_delta);

    let peak = recent
        .iter()
        .map(|r| r.value)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
    let rapid_drop = peak
        .map(|p| p - reading.value >= thresholds.rapid_drop_magnitude)
        .unwrap_or(false);

    Evaluation {
        classification: classify(reading.value, rapid_drop, thresholds),
        trend,
        delta,
    }
}

pub fn classify(value: f64, rapid_drop: bool, thresholds: &Thresholds) -> Classification {
    if value < thresholds.low || rapid_drop {
        Classification::Critical
    } else if value > thresholds.high {
        Classification::High
    } else {
        Classification::Normal
    }
}

pub fn trend_for(delta: Option<f64>, trend_delta: f64) -> Trend {
    match delta {
        Some(d) if d >= trend_delta => Trend::Rising,
        Some(d) if d <= -trend_delta => Trend::Falling,
        _ => Trend::Stable,
    }
}

/// The evaluation a freshly registered patient is assumed to hold.
pub fn baseline() -> Evaluation {
    Evaluation {
        classification: Classification::Normal,
        trend: Trend::Stable,
        delta: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn reading_at(patient_id: Uuid, minutes_ago: i64, value: f64) -> Reading {
        Reading {
            patient_id,
            value,
            captured_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn boundaries_follow_thresholds() {
        let t = Thresholds::default();
        assert_eq!(classify(69.9, false, &t), Classification::Critical);
        assert_eq!(classify(70.0, false, &t), Classification::Normal);
        assert_eq!(classify(180.0, false, &t), Classification::Normal);
        assert_eq!(classify(181.0, false, &t), Classification::High);
        assert_eq!(classify(120.0, true, &t), Classification::Critical);
    }

    #[test]
    fn readings_below_low_are_never_normal() {
        let t = Thresholds::default();
        let patient = Uuid::new_v4();
        for value in [20.0, 35.5, 52.0, 69.0, 69.99] {
            let eval = evaluate(&reading_at(patient, 0, value), &[], &t);
            assert_ne!(eval.classification, Classification::Normal, "value {value}");
        }
    }

    #[test]
    fn first_reading_is_stable() {
        let t = Thresholds::default();
        for value in [40.0, 110.0, 350.0] {
            let eval = evaluate(&reading_at(Uuid::new_v4(), 0, value), &[], &t);
            assert_eq!(eval.trend, Trend::Stable);
            assert!(eval.delta.is_none());
        }
    }

    #[test]
    fn rapid_fall_is_critical_and_falling() {
        let t = Thresholds::default();
        let patient = Uuid::new_v4();
        let history = vec![reading_at(patient, 5, 90.0), reading_at(patient, 3, 85.0)];
        let eval = evaluate(&reading_at(patient, 0, 52.0), &history, &t);
        assert_eq!(eval.classification, Classification::Critical);
        assert_eq!(eval.trend, Trend::Falling);
        assert_eq!(eval.delta, Some(-38.0));
    }

    #[test]
    fn rapid_drop_inside_normal_range_is_critical() {
        let t = Thresholds::default();
        let patient = Uuid::new_v4();
        let history = vec![reading_at(patient, 10, 160.0)];
        let eval = evaluate(&reading_at(patient, 0, 120.0), &history, &t);
        assert_eq!(eval.classification, Classification::Critical);
        assert_eq!(eval.trend, Trend::Falling);
    }

    #[test]
    fn history_outside_window_is_ignored() {
        let t = Thresholds::default();
        let patient = Uuid::new_v4();
        let history = vec![reading_at(patient, 120, 200.0)];
        let eval = evaluate(&reading_at(patient, 0, 120.0), &history, &t);
        assert_eq!(eval.classification, Classification::Normal);
        assert_eq!(eval.trend, Trend::Stable);
    }

    #[test]
    fn gentle_rise_is_rising_but_normal() {
        let t = Thresholds::default();
        let patient = Uuid::new_v4();
        let history = vec![reading_at(patient, 10, 120.0), reading_at(patient, 5, 125.0)];
        let eval = evaluate(&reading_at(patient, 0, 135.0), &history, &t);
        assert_eq!(eval.classification, Classification::Normal);
        assert_eq!(eval.trend, Trend::Rising);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let t = Thresholds::default();
        let patient = Uuid::new_v4();
        let history = vec![reading_at(patient, 5, 150.0)];
        let reading = reading_at(patient, 0, 190.0);
        assert_eq!(evaluate(&reading, &history, &t), evaluate(&reading, &history, &t));
    }
}
