use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::models::IncidentReport;

const CHANNEL_CAPACITY: usize = 64;

/// Anything that can answer the "reports newer than X, newest first" query.
#[async_trait]
pub trait ReportSource: Send + Sync + 'static {
    async fn reports_since(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<IncidentReport>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportChange {
    Added(IncidentReport),
}

/// Query bound to a subscription. The cutoff is fixed when the query is
/// built and never moves afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedQuery {
    cutoff: Option<DateTime<Utc>>,
}

impl FeedQuery {
    pub fn all() -> Self {
        Self { cutoff: None }
    }

    /// Only reports created strictly after `now - window`.
    pub fn recent(window: Duration, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .with_context(|| format!("feed window of {window:?} is out of range"))?;
        Ok(Self {
            cutoff: Some(cutoff),
        })
    }

    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }
}

/// Handle to a running live query. Dropping it stops the polling task.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    /// Next delivered item, or `None` once the query has failed or been
    /// torn down.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Streams `Added` events for every report the query has not delivered
/// before, starting with the reports present at subscription time.
pub fn subscribe<S: ReportSource>(
    source: Arc<S>,
    query: FeedQuery,
    poll_interval: Duration,
) -> Subscription<ReportChange> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reports = match source.reports_since(query.cutoff()).await {
                Ok(reports) => reports,
                Err(err) => {
                    tracing::error!(error = %err, "report feed query failed; stopping subscription");
                    break;
                }
            };

            // Only ids the query still returns are remembered, so `seen` never
            // outgrows one result set.
            let current: HashSet<Uuid> = reports.iter().map(|report| report.id).collect();
            seen.retain(|id| current.contains(id));

            for report in reports {
                if !seen.insert(report.id) {
                    continue;
                }
                tracing::debug!(report_id = %report.id, "report added");
                if tx.send(ReportChange::Added(report)).await.is_err() {
                    return;
                }
            }
        }
    });

    Subscription { rx, task }
}

/// Streams the full result set whenever it differs from the previous poll.
pub fn watch_snapshots<S: ReportSource>(
    source: Arc<S>,
    query: FeedQuery,
    poll_interval: Duration,
) -> Subscription<Vec<IncidentReport>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        let mut last: Option<Vec<IncidentReport>> = None;
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reports = match source.reports_since(query.cutoff()).await {
                Ok(reports) => reports,
                Err(err) => {
                    tracing::error!(error = %err, "snapshot query failed; stopping subscription");
                    break;
                }
            };

            if last.as_ref() == Some(&reports) {
                continue;
            }
            last = Some(reports.clone());
            if tx.send(reports).await.is_err() {
                return;
            }
        }
    });

    Subscription { rx, task }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory collection that answers queries the way the store does.
    #[derive(Default)]
    pub struct MemorySource {
        reports: Mutex<Vec<IncidentReport>>,
        fail: AtomicBool,
        pub queries: AtomicUsize,
    }

    impl MemorySource {
        pub fn with(reports: Vec<IncidentReport>) -> Self {
            let source = Self::default();
            for report in reports {
                source.push(report);
            }
            source
        }

        pub fn push(&self, report: IncidentReport) {
            self.reports.lock().unwrap().push(report);
        }

        pub fn remove(&self, id: Uuid) {
            self.reports.lock().unwrap().retain(|report| report.id != id);
        }

        pub fn fail_next(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ReportSource for MemorySource {
        async fn reports_since(
            &self,
            cutoff: Option<DateTime<Utc>>,
        ) -> anyhow::Result<Vec<IncidentReport>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.fail.swap(false, Ordering::SeqCst) {
                anyhow::bail!("permission-denied");
            }
            let mut reports: Vec<IncidentReport> = self
                .reports
                .lock()
                .unwrap()
                .iter()
                .filter(|report| cutoff.map_or(true, |cutoff| report.created_at > cutoff))
                .cloned()
                .collect();
            reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(reports)
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use crate::models::{IncidentReport, ReportStatus, Severity};

    pub fn report_at(
        disaster_type: &str,
        severity: Option<Severity>,
        lat: Option<f64>,
        lng: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> IncidentReport {
        IncidentReport {
            id: Uuid::new_v4(),
            disaster_type: disaster_type.to_string(),
            description: format!("{disaster_type} reported by a neighbour"),
            severity,
            lat,
            lng,
            contact: None,
            status: ReportStatus::Pending,
            created_at,
        }
    }
}
