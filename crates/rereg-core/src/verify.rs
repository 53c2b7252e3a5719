//! Broker connection verification.
//!
//! The freshly installed agent connects to the broker on its own schedule.
//! Verification waits an initial delay, then polls the agent's event channel
//! up to a bounded number of times, stopping early on a confirmed success.
//! The result is observational: the caller decides what a non-confirmed
//! outcome means for the run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RunConfig;
use crate::host::{EventReader, EventRecord};

/// Classification of the records found in one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// The success record is present; carries the most recent one.
    Confirmed { event: EventRecord },
    /// No success record, but error-severity records exist.
    Errors { errors: Vec<EventRecord> },
    /// The channel had nothing in the window.
    NoEvents,
    /// Records exist but none decide the question.
    Indeterminate { seen: usize },
    /// The event store could not be read.
    QueryFailed { reason: String },
}

/// Tri-state reduction of [`VerificationOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Confirmed,
    Failed,
    Inconclusive,
}

impl VerificationOutcome {
    pub fn verdict(&self) -> Verdict {
        match self {
            VerificationOutcome::Confirmed { .. } => Verdict::Confirmed,
            VerificationOutcome::Errors { .. } => Verdict::Failed,
            _ => Verdict::Inconclusive,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.verdict() == Verdict::Confirmed
    }
}

/// Classify the records of one query.
///
/// Rules, in order:
/// - any record with `success_event_id` confirms (latest such record wins)
/// - otherwise any critical/error record fails
/// - otherwise an empty set is `NoEvents` and a non-empty one `Indeterminate`
pub fn classify_events(records: &[EventRecord], success_event_id: u32) -> VerificationOutcome {
    if let Some(event) = records
        .iter()
        .filter(|r| r.id == success_event_id)
        .max_by_key(|r| r.timestamp)
    {
        return VerificationOutcome::Confirmed {
            event: event.clone(),
        };
    }

    let mut errors: Vec<EventRecord> = records
        .iter()
        .filter(|r| r.severity.is_error())
        .cloned()
        .collect();
    if !errors.is_empty() {
        errors.sort_by_key(|r| r.timestamp);
        return VerificationOutcome::Errors { errors };
    }

    if records.is_empty() {
        VerificationOutcome::NoEvents
    } else {
        VerificationOutcome::Indeterminate {
            seen: records.len(),
        }
    }
}

/// Timing and targeting of the verification poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPlan {
    pub channel: String,
    pub success_event_id: u32,
    pub initial_delay: Duration,
    pub window: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl VerificationPlan {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            channel: config.event_channel.clone(),
            success_event_id: config.success_event_id,
            initial_delay: config.verification_delay(),
            window: config.verification_window(),
            poll_interval: config.verification_poll_interval(),
            max_attempts: config.verification_max_attempts.max(1),
        }
    }
}

/// Result of a full poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Queries issued.
    pub attempts: u32,
    /// Classification of the last query.
    pub outcome: VerificationOutcome,
}

/// Start of the look-back window ending now. Windows too large to represent
/// reach back to the Unix epoch.
pub fn window_start(window: Duration) -> DateTime<Utc> {
    i64::try_from(window.as_secs())
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|w| Utc::now().checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Wait, then poll the event store until confirmed or out of attempts.
pub async fn poll_for_connection(
    reader: &dyn EventReader,
    plan: &VerificationPlan,
) -> VerificationReport {
    if !plan.initial_delay.is_zero() {
        debug!(delay_secs = plan.initial_delay.as_secs(), "Waiting for agent to contact broker");
        tokio::time::sleep(plan.initial_delay).await;
    }

    let max_attempts = plan.max_attempts.max(1);
    let mut outcome = VerificationOutcome::NoEvents;
    let mut attempts = 0;

    while attempts < max_attempts {
        attempts += 1;
        let since = window_start(plan.window);
        outcome = match reader.query(&plan.channel, since).await {
            Ok(records) => classify_events(&records, plan.success_event_id),
            Err(e) => VerificationOutcome::QueryFailed {
                reason: e.to_string(),
            },
        };
        debug!(attempt = attempts, verdict = ?outcome.verdict(), "Verification query");

        if outcome.is_confirmed() {
            break;
        }
        if attempts < max_attempts && !plan.poll_interval.is_zero() {
            tokio::time::sleep(plan.poll_interval).await;
        }
    }

    VerificationReport { attempts, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeEventReader;
    use crate::host::Severity;

    fn record(id: u32, severity: Severity, minutes_ago: i64, message: &str) -> EventRecord {
        EventRecord {
            id,
            timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
            severity,
            message: message.to_string(),
        }
    }

    fn plan(max_attempts: u32) -> VerificationPlan {
        VerificationPlan {
            channel: "RemoteDesktopServices".to_string(),
            success_event_id: 3701,
            initial_delay: Duration::from_secs(60),
            window: Duration::from_secs(300),
            poll_interval: Duration::from_secs(30),
            max_attempts,
        }
    }

    #[test]
    fn test_empty_records() {
        assert_eq!(classify_events(&[], 3701), VerificationOutcome::NoEvents);
    }

    #[test]
    fn test_success_record_confirms() {
        let records = vec![
            record(3019, Severity::Error, 3, "transport error"),
            record(3701, Severity::Information, 2, "older success"),
            record(3701, Severity::Information, 1, "connected to broker"),
        ];
        match classify_events(&records, 3701) {
            VerificationOutcome::Confirmed { event } => {
                assert_eq!(event.message, "connected to broker");
            }
            other => panic!("expected confirmed, got {:?}", other),
        }
    }

    #[test]
    fn test_errors_without_success() {
        let records = vec![
            record(3277, Severity::Error, 1, "INVALID_REGISTRATION_TOKEN"),
            record(3000, Severity::Information, 2, "agent starting"),
            record(3019, Severity::Critical, 3, "no endpoint"),
        ];
        match classify_events(&records, 3701) {
            VerificationOutcome::Errors { errors } => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].id, 3019);
                assert_eq!(errors[1].id, 3277);
            }
            other => panic!("expected errors, got {:?}", other),
        }
    }

    #[test]
    fn test_neither_success_nor_errors() {
        let records = vec![record(3000, Severity::Information, 1, "agent starting")];
        assert_eq!(
            classify_events(&records, 3701),
            VerificationOutcome::Indeterminate { seen: 1 }
        );
    }

    #[test]
    fn test_verdicts() {
        assert_eq!(VerificationOutcome::NoEvents.verdict(), Verdict::Inconclusive);
        assert_eq!(
            VerificationOutcome::Errors { errors: vec![] }.verdict(),
            Verdict::Failed
        );
        assert_eq!(
            VerificationOutcome::QueryFailed {
                reason: "x".to_string()
            }
            .verdict(),
            Verdict::Inconclusive
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_poll() {
        let reader = FakeEventReader::with_records(vec![record(
            3701,
            Severity::Information,
            1,
            "connected",
        )]);
        let report = poll_for_connection(&reader, &plan(1)).await;
        assert_eq!(report.attempts, 1);
        assert!(report.outcome.is_confirmed());
        assert_eq!(reader.queries()[0].0, "RemoteDesktopServices");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_first_confirmation() {
        let success = record(3701, Severity::Information, 0, "connected");
        let reader = FakeEventReader::scripted(vec![vec![], vec![success], vec![]]);
        let report = poll_for_connection(&reader, &plan(5)).await;
        assert_eq!(report.attempts, 2);
        assert!(report.outcome.is_confirmed());
        assert_eq!(reader.queries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhausts_attempts() {
        let reader = FakeEventReader::new();
        let report = poll_for_connection(&reader, &plan(3)).await;
        assert_eq!(report.attempts, 3);
        assert_eq!(report.outcome, VerificationOutcome::NoEvents);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_excludes_stale_records() {
        let stale = record(3701, Severity::Information, 30, "old registration");
        let reader = FakeEventReader::with_records(vec![stale]);
        let report = poll_for_connection(&reader, &plan(1)).await;
        assert_eq!(report.outcome, VerificationOutcome::NoEvents);
    }

    #[test]
    fn test_window_start_saturates_at_epoch() {
        assert_eq!(window_start(Duration::from_secs(u64::MAX)), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            window_start(Duration::from_secs(1_000_000_000_000_000)),
            DateTime::<Utc>::UNIX_EPOCH
        );
        let recent = window_start(Duration::from_secs(300));
        assert!(recent > Utc::now() - chrono::Duration::minutes(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_window_queries_from_epoch() {
        let reader = FakeEventReader::with_records(vec![record(
            3701,
            Severity::Information,
            1,
            "connected",
        )]);
        let mut wide = plan(1);
        wide.window = Duration::from_secs(1_000_000_000_000_000);

        let report = poll_for_connection(&reader, &wide).await;

        assert!(report.outcome.is_confirmed());
        assert_eq!(reader.queries()[0].1, DateTime::<Utc>::UNIX_EPOCH);
    }
}
