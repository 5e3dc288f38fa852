//! Risk Permission Engine — pure mapping from event windows to a
//! GREEN/YELLOW/RED permission state with an explainable reason trail.
//!
//! No network or disk I/O. Given the same event list and `as_of`, the
//! output is bit-identical; replay depends on that.

use serde::{Deserialize, Serialize};

use crate::model::{RiskEvent, RiskLevel, RiskState, Severity};

const MINUTE_MS: i64 = 60_000;

/// Window configuration. Unknown keys are rejected at the boundary rather
/// than passed through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    /// Minutes before `event_time` during which an event is active.
    pub pre_window_mins: i64,
    /// Minutes after `event_time` during which an event is active.
    pub post_window_mins: i64,
    /// Extra tail after the post window during which HIGH severity still
    /// forces RED.
    pub high_cooldown_mins: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            pre_window_mins: 120,
            post_window_mins: 60,
            high_cooldown_mins: 180,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.pre_window_mins < 0 || self.post_window_mins < 0 || self.high_cooldown_mins < 0 {
            return Err("risk windows must be non-negative".to_string());
        }
        Ok(())
    }
}

/// How each contributing event escalated the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contribution {
    InWindow,
    InCooldown,
}

/// Evaluate the permission state at `as_of` (epoch millis).
///
/// HIGH severity in-window or in-cooldown forces RED; MEDIUM in-window
/// forces YELLOW unless already RED; LOW never changes state; no matching
/// event yields GREEN. Ties break by severity ordering, not recency.
pub fn evaluate(events: &[RiskEvent], as_of: i64, config: &RiskConfig) -> RiskState {
    let pre = config.pre_window_mins * MINUTE_MS;
    let post = config.post_window_mins * MINUTE_MS;
    let cooldown = config.high_cooldown_mins * MINUTE_MS;

    let mut contributing: Vec<(&RiskEvent, Contribution)> = Vec::new();
    for event in events {
        let window_start = event.event_time - pre;
        let window_end = event.event_time + post;
        let in_window = as_of >= window_start && as_of <= window_end;
        let in_cooldown = event.severity == Severity::High
            && as_of > window_end
            && as_of <= window_end + cooldown;

        match event.severity {
            Severity::High if in_window => contributing.push((event, Contribution::InWindow)),
            Severity::High if in_cooldown => contributing.push((event, Contribution::InCooldown)),
            Severity::Medium if in_window => contributing.push((event, Contribution::InWindow)),
            // LOW never changes state and is not part of the reason trail.
            _ => {}
        }
    }

    // Deterministic reason ordering regardless of input permutation.
    contributing.sort_by(|(a, _), (b, _)| {
        a.event_time
            .cmp(&b.event_time)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });

    let mut level = RiskLevel::Green;
    let mut reasons = Vec::new();
    let mut event_ids = Vec::new();
    for (event, contribution) in &contributing {
        let event_level = match event.severity {
            Severity::High => RiskLevel::Red,
            Severity::Medium => RiskLevel::Yellow,
            Severity::Low => RiskLevel::Green,
        };
        if event_level > level {
            level = event_level;
        }
        let phase = match contribution {
            Contribution::InWindow => "in window",
            Contribution::InCooldown => "in cooldown",
        };
        reasons.push(format!(
            "{:?} severity event '{}' ({}) {}",
            event.severity, event.event_id, event.category, phase
        ));
        event_ids.push(event.event_id.clone());
    }

    if contributing.is_empty() {
        reasons.push("no active risk events".to_string());
    }

    RiskState {
        state: level,
        size_multiplier: level.size_multiplier(),
        reasons,
        event_ids,
        as_of,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(id: &str, time: i64, severity: Severity) -> RiskEvent {
        RiskEvent {
            event_id: id.to_string(),
            event_time: time,
            severity,
            category: "macro".to_string(),
        }
    }

    // 2023-11-14 12:00:00 UTC
    const NOON: i64 = 1_700_000_000_000 - (1_700_000_000_000 % 86_400_000) + 12 * 3_600_000;

    #[test]
    fn test_no_events_is_green() {
        let state = evaluate(&[], NOON, &RiskConfig::default());
        assert_eq!(state.state, RiskLevel::Green);
        assert_eq!(state.size_multiplier, dec!(1.0));
        assert_eq!(state.reasons, vec!["no active risk events".to_string()]);
        assert!(state.event_ids.is_empty());
    }

    #[test]
    fn test_high_event_pre_window_is_red() {
        // HIGH event at 12:00, query at 10:00 — inside the 120 min pre window.
        let events = vec![event("E-CPI", NOON, Severity::High)];
        let state = evaluate(&events, NOON - 2 * 3_600_000, &RiskConfig::default());
        assert_eq!(state.state, RiskLevel::Red);
        assert_eq!(state.size_multiplier, dec!(0.0));
        assert_eq!(state.event_ids, vec!["E-CPI".to_string()]);
        assert!(state.reasons[0].contains("E-CPI"));
    }

    #[test]
    fn test_high_event_past_cooldown_is_green() {
        // Query at 17:00: post window ends 13:00, cooldown ends 16:00.
        let events = vec![event("E-CPI", NOON, Severity::High)];
        let state = evaluate(&events, NOON + 5 * 3_600_000, &RiskConfig::default());
        assert_eq!(state.state, RiskLevel::Green);
    }

    #[test]
    fn test_high_event_in_cooldown_is_red() {
        // Query at 14:30: past post window (13:00), inside cooldown (16:00).
        let events = vec![event("E-CPI", NOON, Severity::High)];
        let state = evaluate(&events, NOON + 2 * 3_600_000 + 1_800_000, &RiskConfig::default());
        assert_eq!(state.state, RiskLevel::Red);
        assert!(state.reasons[0].contains("in cooldown"));
    }

    #[test]
    fn test_medium_in_window_is_yellow() {
        let events = vec![event("E-FOMC-MIN", NOON, Severity::Medium)];
        let state = evaluate(&events, NOON, &RiskConfig::default());
        assert_eq!(state.state, RiskLevel::Yellow);
        assert_eq!(state.size_multiplier, dec!(0.5));
    }

    #[test]
    fn test_medium_has_no_cooldown() {
        let events = vec![event("E-FOMC-MIN", NOON, Severity::Medium)];
        let state = evaluate(&events, NOON + 2 * 3_600_000, &RiskConfig::default());
        assert_eq!(state.state, RiskLevel::Green);
    }

    #[test]
    fn test_low_never_changes_state() {
        let events = vec![event("E-MINOR", NOON, Severity::Low)];
        let state = evaluate(&events, NOON, &RiskConfig::default());
        assert_eq!(state.state, RiskLevel::Green);
        assert!(state.event_ids.is_empty());
    }

    #[test]
    fn test_severity_wins_over_recency() {
        // The MEDIUM event is more recent, but the HIGH one dominates.
        let events = vec![
            event("E-MED", NOON + 30 * MINUTE_MS, Severity::Medium),
            event("E-HIGH", NOON, Severity::High),
        ];
        let state = evaluate(&events, NOON + 45 * MINUTE_MS, &RiskConfig::default());
        assert_eq!(state.state, RiskLevel::Red);
        // Both appear in the trail, ordered by event time.
        assert_eq!(
            state.event_ids,
            vec!["E-HIGH".to_string(), "E-MED".to_string()]
        );
    }

    #[test]
    fn test_pure_function_repeatable() {
        let events = vec![
            event("E1", NOON, Severity::High),
            event("E2", NOON + MINUTE_MS, Severity::Medium),
        ];
        let first = evaluate(&events, NOON, &RiskConfig::default());
        for _ in 0..5 {
            assert_eq!(evaluate(&events, NOON, &RiskConfig::default()), first);
        }
    }

    #[test]
    fn test_permuted_input_same_output() {
        let a = vec![
            event("E1", NOON, Severity::Medium),
            event("E2", NOON, Severity::High),
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        assert_eq!(
            evaluate(&a, NOON, &RiskConfig::default()),
            evaluate(&b, NOON, &RiskConfig::default())
        );
    }

    #[test]
    fn test_config_rejects_unknown_keys() {
        let json = r#"{"pre_window_mins": 10, "post_window_mins": 10, "high_cooldown_mins": 10, "surprise": 1}"#;
        assert!(serde_json::from_str::<RiskConfig>(json).is_err());
    }

    #[test]
    fn test_config_rejects_negative_windows() {
        let config = RiskConfig {
            pre_window_mins: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
