use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::ValueEnum;
use tokio::sync::watch;
use uuid::Uuid;

use crate::feed::{self, FeedQuery, ReportChange, ReportSource, Subscription};
use crate::geo::{distance_km, Coordinate};
use crate::location::{LastLocation, UserStore};
use crate::models::{IncidentReport, Severity};

/// Distance within which a report of the given severity alerts a user.
pub fn alert_radius_km(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 0.5,
        Severity::Medium => 2.0,
        Severity::High => 5.0,
        Severity::Critical => 15.0,
        Severity::Catastrophic => 50.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProximityAlert {
    pub report_id: Uuid,
    pub disaster_type: String,
    pub severity: Severity,
    pub distance_km: f64,
    pub radius_km: f64,
}

impl ProximityAlert {
    pub fn title(&self) -> String {
        format!("Emergency Alert: {}", self.disaster_type)
    }

    pub fn body(&self) -> String {
        format!(
            "{} severity incident reported {:.1}km away.",
            self.severity.as_str().to_uppercase(),
            self.distance_km
        )
    }

    pub fn toast(&self) -> String {
        format!("ALERT: {} reported nearby!", self.disaster_type)
    }
}

/// Inclusive: a report exactly on the radius still alerts.
pub fn within_radius(distance: f64, severity: Severity) -> bool {
    distance <= alert_radius_km(severity)
}

/// Decides whether `report` is close enough to `user` to alert. Reports
/// without a valid coordinate or a severity never alert, and nothing alerts
/// while the user's position is unknown or out of range.
pub fn evaluate(report: &IncidentReport, user: Option<&Coordinate>) -> Option<ProximityAlert> {
    let user = user.filter(|user| user.is_valid())?;
    let severity = report.severity?;
    let location = report.coordinate().filter(Coordinate::is_valid)?;

    let distance = distance_km(user, &location);
    if !within_radius(distance, severity) {
        return None;
    }
    let radius = alert_radius_km(severity);

    Some(ProximityAlert {
        report_id: report.id,
        disaster_type: report.disaster_type.clone(),
        severity,
        distance_km: distance,
        radius_km: radius,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum NotificationPermission {
    #[default]
    Default,
    Granted,
    Denied,
}

/// Local notification surface plus a short-lived toast line.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
    fn toast(&self, message: &str);
}

/// Prints notifications to stdout.
#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, title: &str, body: &str) {
        println!("[notification] {title}: {body}");
    }

    fn toast(&self, message: &str) {
        println!("[toast] {message}");
    }
}

/// Routes notifications into the log instead of the terminal.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        tracing::warn!(%title, %body, "proximity notification");
    }

    fn toast(&self, message: &str) {
        tracing::info!(%message, "toast");
    }
}

pub struct NotificationCenter {
    permission: NotificationPermission,
    notifier: Arc<dyn Notifier>,
}

impl NotificationCenter {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            permission: NotificationPermission::Default,
            notifier,
        }
    }

    pub fn permission(&self) -> NotificationPermission {
        self.permission
    }

    /// Records the user's answer to the permission prompt. When granted and
    /// a messaging token is available, registers it against the user; any
    /// failure there is ignored.
    pub async fn request_permission(
        &mut self,
        answer: NotificationPermission,
        user_id: &str,
        push_token: Option<&str>,
        store: &dyn UserStore,
    ) -> NotificationPermission {
        self.permission = answer;
        if answer != NotificationPermission::Granted {
            return answer;
        }

        self.notifier.toast("Notifications enabled!");
        if let Some(token) = push_token {
            if let Err(err) = store.save_push_token(user_id, token).await {
                tracing::debug!(error = %err, "push token not registered; local notifications only");
            }
        }
        answer
    }

    /// Shows the alert. Returns false when permission was not granted.
    pub fn dispatch(&self, alert: &ProximityAlert) -> bool {
        if self.permission != NotificationPermission::Granted {
            return false;
        }
        self.notifier.notify(&alert.title(), &alert.body());
        self.notifier.toast(&alert.toast());
        true
    }
}

/// Filters the live report stream against the user's last known position.
pub struct AlertWatcher {
    center: NotificationCenter,
    last_location: LastLocation,
}

impl AlertWatcher {
    pub fn new(center: NotificationCenter, last_location: LastLocation) -> Self {
        Self {
            center,
            last_location,
        }
    }

    /// Opens the recent-reports subscription, or `None` if notifications
    /// are not granted.
    pub fn subscribe<S: ReportSource>(
        &self,
        source: Arc<S>,
        window: Duration,
        poll_interval: Duration,
    ) -> anyhow::Result<Option<Subscription<ReportChange>>> {
        if self.center.permission() != NotificationPermission::Granted {
            return Ok(None);
        }
        let query = FeedQuery::recent(window, Utc::now())?;
        Ok(Some(feed::subscribe(source, query, poll_interval)))
    }

    /// Handles one delivered change, returning the alert if one was shown.
    pub async fn handle(&self, change: &ReportChange) -> Option<ProximityAlert> {
        let ReportChange::Added(report) = change;
        let user = self.last_location.get().await;
        let alert = evaluate(report, user.as_ref())?;

        if !self.center.dispatch(&alert) {
            return None;
        }
        tracing::info!(
            report_id = %alert.report_id,
            severity = %alert.severity,
            distance_km = alert.distance_km,
            radius_km = alert.radius_km,
            "proximity alert dispatched"
        );
        Some(alert)
    }

    /// Processes changes until the subscription ends or `shutdown` flips.
    /// Returns the number of alerts shown.
    pub async fn run(
        &self,
        mut subscription: Subscription<ReportChange>,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut fired = 0;
        loop {
            tokio::select! {
                change = subscription.next() => {
                    let Some(change) = change else { break };
                    if self.handle(&change).await.is_some() {
                        fired += 1;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::feed::fixtures::report_at;
    use crate::feed::testing::MemorySource;
    use crate::geo::offset_north;
    use crate::location::testing::RecordingUserStore;

    #[derive(Default)]
    struct RecordingNotifier {
        notifications: Mutex<Vec<(String, String)>>,
        toasts: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, body: &str) {
            self.notifications
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
        }

        fn toast(&self, message: &str) {
            self.toasts.lock().unwrap().push(message.to_string());
        }
    }

    fn user() -> Coordinate {
        Coordinate::new(19.0760, 72.8777)
    }

    fn report_km_away(km: f64, severity: Option<Severity>) -> IncidentReport {
        let at = offset_north(&user(), km);
        report_at("flood", severity, Some(at.latitude), Some(at.longitude), Utc::now())
    }

    async fn granted_center(notifier: Arc<RecordingNotifier>) -> NotificationCenter {
        let mut center = NotificationCenter::new(notifier);
        let store = RecordingUserStore::default();
        center
            .request_permission(NotificationPermission::Granted, "user-1", None, &store)
            .await;
        center
    }

    #[test]
    fn radius_table_is_literal() {
        assert_eq!(alert_radius_km(Severity::Low), 0.5);
        assert_eq!(alert_radius_km(Severity::Medium), 2.0);
        assert_eq!(alert_radius_km(Severity::High), 5.0);
        assert_eq!(alert_radius_km(Severity::Critical), 15.0);
        assert_eq!(alert_radius_km(Severity::Catastrophic), 50.0);
    }

    #[test]
    fn fires_iff_within_radius() {
        let user = user();
        for severity in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
            Severity::Catastrophic,
        ] {
            let radius = alert_radius_km(severity);
            let inside = report_km_away(radius * 0.9, Some(severity));
            let outside = report_km_away(radius * 1.1, Some(severity));
            assert!(evaluate(&inside, Some(&user)).is_some(), "{severity} inside");
            assert!(evaluate(&outside, Some(&user)).is_none(), "{severity} outside");
        }
    }

    #[test]
    fn radius_boundary_is_inclusive() {
        for severity in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
            Severity::Catastrophic,
        ] {
            let radius = alert_radius_km(severity);
            assert!(within_radius(radius, severity), "{severity} at radius");
            assert!(!within_radius(radius + 1e-9, severity), "{severity} past radius");
        }
        assert!(within_radius(3.0, Severity::Critical));
        assert!(!within_radius(3.0, Severity::Low));
    }

    #[test]
    fn out_of_range_coordinates_never_fire() {
        let southern = Coordinate::new(-20.0, 0.0);
        let impossible = report_at("flood", Some(Severity::Low), Some(200.0), Some(180.0), Utc::now());
        assert!(evaluate(&impossible, Some(&southern)).is_none());

        let mut bad_lng = report_km_away(0.1, Some(Severity::Catastrophic));
        bad_lng.lng = Some(-540.0);
        assert!(evaluate(&bad_lng, Some(&user())).is_none());

        let report = report_km_away(0.1, Some(Severity::Catastrophic));
        assert!(evaluate(&report, Some(&Coordinate::new(95.0, 72.8777))).is_none());
    }

    #[test]
    fn same_spot_three_km_away_depends_on_severity() {
        let user = user();
        let low = report_km_away(3.0, Some(Severity::Low));
        let mut critical = low.clone();
        critical.severity = Some(Severity::Critical);

        assert!(evaluate(&low, Some(&user)).is_none());
        let alert = evaluate(&critical, Some(&user)).unwrap();
        assert!((alert.distance_km - 3.0).abs() < 1e-6);
        assert_eq!(alert.radius_km, 15.0);
    }

    #[test]
    fn incomplete_reports_never_fire() {
        let user = user();
        let mut no_severity = report_km_away(0.1, None);
        assert!(evaluate(&no_severity, Some(&user)).is_none());

        no_severity.severity = Some(Severity::Critical);
        let mut no_lat = no_severity.clone();
        no_lat.lat = None;
        let mut no_lng = no_severity.clone();
        no_lng.lng = None;
        assert!(evaluate(&no_lat, Some(&user)).is_none());
        assert!(evaluate(&no_lng, Some(&user)).is_none());
    }

    #[test]
    fn unknown_user_location_never_fires() {
        let report = report_km_away(0.0, Some(Severity::Catastrophic));
        assert!(evaluate(&report, None).is_none());
    }

    #[test]
    fn alert_text_matches_notification_format() {
        let report = report_km_away(3.0, Some(Severity::Critical));
        let alert = evaluate(&report, Some(&user())).unwrap();
        assert_eq!(alert.title(), "Emergency Alert: flood");
        assert_eq!(alert.body(), "CRITICAL severity incident reported 3.0km away.");
        assert_eq!(alert.toast(), "ALERT: flood reported nearby!");
    }

    #[tokio::test]
    async fn denied_permission_suppresses_dispatch() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut center = NotificationCenter::new(notifier.clone());
        let store = RecordingUserStore::default();
        center
            .request_permission(NotificationPermission::Denied, "user-1", Some("tok"), &store)
            .await;

        let last = LastLocation::default();
        last.set(user()).await;
        let watcher = AlertWatcher::new(center, last);

        let change = ReportChange::Added(report_km_away(0.1, Some(Severity::Critical)));
        assert!(watcher.handle(&change).await.is_none());
        assert!(notifier.notifications.lock().unwrap().is_empty());
        assert!(store.tokens.lock().unwrap().is_empty());

        let source = Arc::new(MemorySource::default());
        assert!(watcher
            .subscribe(source, Duration::from_secs(300), Duration::from_millis(10))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn granting_registers_push_token_best_effort() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut center = NotificationCenter::new(notifier.clone());
        let store = RecordingUserStore::default();
        center
            .request_permission(NotificationPermission::Granted, "user-1", Some("tok"), &store)
            .await;
        assert_eq!(
            store.tokens.lock().unwrap().clone(),
            vec![("user-1".to_string(), "tok".to_string())]
        );

        let failing = RecordingUserStore::failing();
        let mut center = NotificationCenter::new(notifier.clone());
        let granted = center
            .request_permission(NotificationPermission::Granted, "user-1", Some("tok"), &failing)
            .await;
        assert_eq!(granted, NotificationPermission::Granted);
        assert_eq!(notifier.toasts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn repeated_delivery_fires_again() {
        let notifier = Arc::new(RecordingNotifier::default());
        let last = LastLocation::default();
        last.set(user()).await;
        let watcher = AlertWatcher::new(granted_center(notifier.clone()).await, last);

        let change = ReportChange::Added(report_km_away(1.0, Some(Severity::High)));
        assert!(watcher.handle(&change).await.is_some());
        assert!(watcher.handle(&change).await.is_some());
        assert_eq!(notifier.notifications.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn watcher_alerts_on_new_nearby_reports_only() {
        let notifier = Arc::new(RecordingNotifier::default());
        let last = LastLocation::default();
        last.set(user()).await;
        let watcher = AlertWatcher::new(granted_center(notifier.clone()).await, last);

        let mut stale = report_km_away(0.1, Some(Severity::Critical));
        stale.created_at = Utc::now() - ChronoDuration::minutes(10);
        let nearby = report_km_away(1.0, Some(Severity::High));
        let far = report_km_away(40.0, Some(Severity::High));
        let source = Arc::new(MemorySource::with(vec![stale, nearby.clone(), far]));

        let subscription = watcher
            .subscribe(source, Duration::from_secs(300), Duration::from_millis(10))
            .unwrap()
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = tx.send(true);
        });

        let fired = watcher.run(subscription, rx).await;
        stopper.await.unwrap();

        assert_eq!(fired, 1);
        let notifications = notifier.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].0, "Emergency Alert: flood");
    }
}
