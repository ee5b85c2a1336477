use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{IncidentReport, Severity};
use crate::stats;

const RECENT_ACTIVITY: usize = 5;
const TOP_TYPES: usize = 3;

fn location_label(report: &IncidentReport, decimals: usize) -> String {
    match (report.lat, report.lng) {
        (Some(lat), Some(lng)) => format!("{lat:.decimals$}, {lng:.decimals$}"),
        _ => "unknown".to_string(),
    }
}

fn severity_label(report: &IncidentReport) -> String {
    report
        .severity
        .unwrap_or(Severity::Medium)
        .as_str()
        .to_uppercase()
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn table_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

/// Markdown rendering of the dashboard: overview, breakdowns, the weekly
/// chart, recent activity and the full report table.
pub fn build_report(filter: Option<&str>, reports: &[IncidentReport], now: DateTime<Utc>) -> String {
    let filter_label = filter.unwrap_or("all");
    let visible = stats::filter_by_type(reports, filter_label);
    let summary = stats::dashboard_stats(&visible, now);

    let mut output = String::new();

    let _ = writeln!(output, "# Disaster Report Dashboard");
    let _ = writeln!(
        output,
        "Generated {} for {} reports ({} of {} shown)",
        format_time(&now),
        filter_label,
        visible.len(),
        reports.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Total reports: {}", summary.total);
    let _ = writeln!(output, "- Today: {}", summary.today);
    let _ = writeln!(output, "- This week: {}", summary.this_week);
    let _ = writeln!(output, "- Disaster types: {}", summary.distinct_types);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Severity Breakdown");
    if summary.severity_counts.is_empty() {
        let _ = writeln!(output, "No reports recorded.");
    } else {
        for (severity, count) in summary.severity_counts.iter() {
            let _ = writeln!(output, "- {}: {}", severity, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Disaster Types");
    let top = stats::top_types(&summary, TOP_TYPES);
    if top.is_empty() {
        let _ = writeln!(output, "No reports recorded.");
    } else {
        for (disaster_type, count) in top {
            let share = *count as f64 / summary.total as f64 * 100.0;
            let _ = writeln!(output, "- {}: {} ({:.0}%)", disaster_type, count, share);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Overview");
    if summary.status_counts.is_empty() {
        let _ = writeln!(output, "No reports recorded.");
    } else {
        for (status, count) in summary.status_counts.iter() {
            let _ = writeln!(output, "- {}: {}", status.label(), count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Reports Over the Last 7 Days");
    let _ = writeln!(output, "```");
    for day in stats::daily_counts(&visible, now) {
        let _ = writeln!(
            output,
            "{} {:>3} {}",
            day.date.format("%a %b %d"),
            day.count,
            "#".repeat(day.count)
        );
    }
    let _ = writeln!(output, "```");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Activity");
    if visible.is_empty() {
        let _ = writeln!(output, "No reports found.");
    } else {
        for report in visible.iter().take(RECENT_ACTIVITY) {
            let _ = writeln!(
                output,
                "- [{}] {} ({}) at {}",
                report.status.as_str(),
                report.disaster_type,
                severity_label(report),
                format_time(&report.created_at)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## All Reports");
    if visible.is_empty() {
        let _ = writeln!(output, "No reports found.");
    } else {
        let _ = writeln!(output, "| Type | Severity | Description | Status | Location | Time |");
        let _ = writeln!(output, "|---|---|---|---|---|---|");
        for report in visible.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} |",
                table_cell(&report.disaster_type),
                severity_label(report),
                table_cell(&report.description),
                report.status.as_str(),
                location_label(report, 4),
                format_time(&report.created_at)
            );
        }
    }

    output
}

/// Short terminal listing of the newest `limit` reports.
pub fn render_recent(reports: &[IncidentReport], limit: usize) -> String {
    let mut output = String::new();
    if reports.is_empty() {
        let _ = writeln!(output, "No reports found.");
        return output;
    }

    for report in reports.iter().take(limit) {
        let _ = writeln!(
            output,
            "- {} ({}, {}) at {} on {}: {}",
            report.disaster_type,
            severity_label(report),
            report.status.label(),
            location_label(report, 3),
            format_time(&report.created_at),
            report.description
        );
    }
    output
}
