use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::{DailyCount, DashboardStats, IncidentReport, ReportStatus, Severity};

pub const CHART_DAYS: i64 = 7;

/// Aggregates for the dashboard overview. Reports without a severity are
/// counted as `medium`.
pub fn dashboard_stats(reports: &[IncidentReport], now: DateTime<Utc>) -> DashboardStats {
    let today = now.date_naive();
    let week_ago = now - Duration::days(7);

    let mut severity: HashMap<Severity, usize> = HashMap::new();
    let mut types: HashMap<String, usize> = HashMap::new();
    let mut statuses: HashMap<ReportStatus, usize> = HashMap::new();
    let mut stats = DashboardStats {
        total: reports.len(),
        ..DashboardStats::default()
    };

    for report in reports {
        if report.created_at.date_naive() == today {
            stats.today += 1;
        }
        if report.created_at >= week_ago {
            stats.this_week += 1;
        }
        *severity
            .entry(report.severity.unwrap_or(Severity::Medium))
            .or_insert(0) += 1;
        *types.entry(report.disaster_type.clone()).or_insert(0) += 1;
        *statuses.entry(report.status).or_insert(0) += 1;
    }

    let mut severity_counts: Vec<(Severity, usize)> = severity.into_iter().collect();
    severity_counts.sort_by(|a, b| b.0.cmp(&a.0));

    let mut type_counts: Vec<(String, usize)> = types.into_iter().collect();
    type_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let status_counts = [
        ReportStatus::Pending,
        ReportStatus::InProgress,
        ReportStatus::Resolved,
    ]
    .into_iter()
    .filter_map(|status| statuses.get(&status).map(|count| (status, *count)))
    .collect();

    stats.distinct_types = type_counts.len();
    stats.severity_counts = severity_counts;
    stats.type_counts = type_counts;
    stats.status_counts = status_counts;
    stats
}

pub fn top_types(stats: &DashboardStats, limit: usize) -> &[(String, usize)] {
    &stats.type_counts[..limit.min(stats.type_counts.len())]
}

/// One bucket per calendar day for the last week, oldest first, today last.
pub fn daily_counts(reports: &[IncidentReport], now: DateTime<Utc>) -> Vec<DailyCount> {
    let today = now.date_naive();
    let mut buckets: Vec<DailyCount> = (0..CHART_DAYS)
        .rev()
        .map(|days_ago| DailyCount {
            date: today - Duration::days(days_ago),
            count: 0,
        })
        .collect();

    for report in reports {
        let date = report.created_at.date_naive();
        if let Some(bucket) = buckets.iter_mut().find(|bucket| bucket.date == date) {
            bucket.count += 1;
        }
    }

    buckets
}

/// Lowercased needle for a type filter, or `None` when the filter keeps
/// everything (`"all"` or blank).
pub fn normalized_type_filter(filter: &str) -> Option<String> {
    let needle = filter.trim().to_lowercase();
    if needle.is_empty() || needle == "all" {
        None
    } else {
        Some(needle)
    }
}

/// `"all"` (or an empty filter) keeps every report; anything else keeps
/// reports whose type contains the filter, ignoring case.
pub fn filter_by_type(reports: &[IncidentReport], filter: &str) -> Vec<IncidentReport> {
    let Some(needle) = normalized_type_filter(filter) else {
        return reports.to_vec();
    };

    reports
        .iter()
        .filter(|report| report.disaster_type.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
