//! Pure cohort aggregation.

use caresight_core::metrics::{ClientDailyMetrics, CohortDailyMetrics};
use chrono::{DateTime, NaiveDate, Utc};

/// Roll member rows up into one cohort row.
///
/// Counters are summed across members. `risk_score_avg` averages only the
/// members with a non-null score for the date and is `None` when no member
/// reports one. `clients_reporting` counts members that had a row at all.
#[must_use]
pub fn aggregate(
    cohort_tag: &str,
    date: NaiveDate,
    members: &[ClientDailyMetrics],
    now: DateTime<Utc>,
) -> CohortDailyMetrics {
    let scores: Vec<f64> = members.iter().filter_map(|m| m.risk_score_avg).collect();
    #[allow(clippy::cast_precision_loss)] // Cohort sizes are far below 2^52
    let risk_score_avg = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    CohortDailyMetrics {
        cohort_tag: cohort_tag.to_string(),
        date,
        risk_score_avg,
        tasks_completed: members.iter().map(|m| m.tasks_completed).sum(),
        tasks_active: members.iter().map(|m| m.tasks_active).sum(),
        tasks_blocked: members.iter().map(|m| m.tasks_blocked).sum(),
        alerts_open: members.iter().map(|m| m.alerts_open).sum(),
        action_plan_versions_activated: members
            .iter()
            .map(|m| m.action_plan_versions_activated)
            .sum(),
        clients_reporting: members.len() as i64,
        updated_at: now,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    fn member(client_id: &str, risk: Option<f64>, completed: i64) -> ClientDailyMetrics {
        ClientDailyMetrics {
            client_id: client_id.to_string(),
            date: date(),
            risk_score_avg: risk,
            tasks_completed: completed,
            tasks_active: 1,
            tasks_blocked: 0,
            alerts_open: 2,
            action_plan_versions_activated: 0,
            updated_at: Utc::now(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn counters_sum_across_members() {
        let rows = vec![
            member("client-1", None, 3),
            member("client-2", None, 4),
        ];
        let cohort = aggregate("high-risk", date(), &rows, Utc::now());

        assert_eq!(cohort.tasks_completed, 7);
        assert_eq!(cohort.tasks_active, 2);
        assert_eq!(cohort.alerts_open, 4);
        assert_eq!(cohort.clients_reporting, 2);
    }

    #[test]
    fn risk_average_ignores_members_without_a_score() {
        let rows = vec![
            member("client-1", Some(10.0), 0),
            member("client-2", None, 0),
            member("client-3", Some(20.0), 0),
        ];
        let cohort = aggregate("high-risk", date(), &rows, Utc::now());

        assert_eq!(cohort.risk_score_avg, Some(15.0));
    }

    #[test]
    fn risk_average_is_null_when_no_member_reports() {
        let rows = vec![member("client-1", None, 0), member("client-2", None, 0)];
        let cohort = aggregate("high-risk", date(), &rows, Utc::now());

        assert_eq!(cohort.risk_score_avg, None);
    }

    #[test]
    fn empty_cohort_produces_zero_row() {
        let cohort = aggregate("empty", date(), &[], Utc::now());

        assert_eq!(cohort.clients_reporting, 0);
        assert_eq!(cohort.tasks_completed, 0);
        assert_eq!(cohort.risk_score_avg, None);
    }
}
