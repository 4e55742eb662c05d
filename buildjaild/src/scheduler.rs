//! On each timer tick, matches configured schedule entries against the
//! current UTC time and enqueues their commands.
//!
//! This does NOT dedupe across ticks: a coarse `format` (e.g. `"%H:%M"`)
//! will re-fire every tick for the whole minute it matches. Tracking the
//! last-fired value per entry would stop that, but it changes observable
//! behavior, so it's left out.

use chrono::{DateTime, Utc};

use buildjail_protocol::node::NodeExt;

use crate::config::Policy;
use crate::queue::Queue;

/// Runs one scheduler pass against the current UTC time.
pub fn tick(policy: &Policy, queue: &mut Queue) {
    tick_at(Utc::now(), policy, queue)
}

/// Runs one scheduler pass against an explicit time, so tests don't depend
/// on the wall clock. Entries missing `format`, `when`, or `cmd` are
/// skipped silently, as is any entry whose formatter produces zero bytes.
pub fn tick_at(now: DateTime<Utc>, policy: &Policy, queue: &mut Queue) {
    let Some(entries) = policy.schedule_entries() else { return };
    for entry in entries {
        let (Some(format), Some(when), Some(cmd)) = (
            entry.field("format").and_then(|v| v.text()),
            entry.field("when").and_then(|v| v.text()),
            entry.field("cmd"),
        ) else {
            continue;
        };
        let formatted = now.format(format).to_string();
        if formatted.is_empty() {
            continue;
        }
        if formatted == when {
            queue.append(cmd.clone());
            log::info!("new command queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use serde_json::json;

    fn policy_with_schedule(format: &str, when: &str) -> Policy {
        Policy::from_node(json!({
            "schedule": [{"format": format, "when": when, "cmd": {"command": "daily", "arguments": ""}}]
        }))
    }

    fn fixed_time(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn scenario_schedule_fires_at_exact_match() {
        let policy = policy_with_schedule("%H:%M", "03:00");
        let mut queue = Queue::new();
        let now = fixed_time(3, 0);
        for entry in policy.schedule_entries().unwrap() {
            let cmd = entry.field("cmd").unwrap();
            let fmt = entry.field("format").unwrap().text().unwrap();
            let when = entry.field("when").unwrap().text().unwrap();
            if now.format(fmt).to_string() == when {
                queue.append(cmd.clone());
            }
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_front().unwrap()["command"], json!("daily"));
    }

    #[test]
    fn entries_missing_required_fields_are_skipped() {
        let policy = Policy::from_node(json!({
            "schedule": [{"format": "%H:%M"}]
        }));
        let mut queue = Queue::new();
        tick(&policy, &mut queue);
        assert!(queue.is_empty());
    }

    #[test]
    fn no_schedule_section_is_a_noop() {
        let policy = Policy::from_node(json!({}));
        let mut queue = Queue::new();
        tick(&policy, &mut queue);
        assert!(queue.is_empty());
    }
}
