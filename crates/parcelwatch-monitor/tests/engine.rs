use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parcelwatch_core::config::ScheduleConfig;
use parcelwatch_core::notification::ArrivalNotice;
use parcelwatch_core::types::{HistoryEntry, TrackingNumber, TrackingReport};
use parcelwatch_monitor::{
    CheckEngine, EngineSettings, MonitorError, Notifier, NotifyError, TrackingClient,
    TrackingError,
};
use parcelwatch_scheduler::{RouteTable, VerificationScheduler};
use parcelwatch_subscriptions::{db_time, SubscriptionManager};
use rusqlite::Connection;

const NUMBER: &str = "E121101188";

#[derive(Default)]
struct FakeTracker {
    reports: Mutex<HashMap<String, TrackingReport>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeTracker {
    fn set(&self, number: &str, report: TrackingReport) {
        self.reports
            .lock()
            .expect("lock")
            .insert(number.to_string(), report);
    }

    fn fail(&self, number: &str) {
        self.failing.lock().expect("lock").insert(number.to_string());
    }
}

#[async_trait]
impl TrackingClient for FakeTracker {
    async fn fetch(&self, tracking_number: &TrackingNumber) -> Result<TrackingReport, TrackingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().expect("lock").contains(tracking_number.as_str()) {
            return Err(TrackingError::Unavailable("timed out".to_string()));
        }
        self.reports
            .lock()
            .expect("lock")
            .get(tracking_number.as_str())
            .cloned()
            .ok_or_else(|| TrackingError::NotFound {
                tracking_number: tracking_number.to_string(),
            })
    }
}

#[derive(Default)]
struct FakeNotifier {
    sent: Mutex<Vec<ArrivalNotice>>,
    broken: bool,
}

#[async_trait]
impl Notifier for FakeNotifier {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, notice: &ArrivalNotice) -> Result<(), NotifyError> {
        if self.broken {
            return Err(NotifyError::Rejected("no recipients".to_string()));
        }
        self.sent.lock().expect("lock").push(notice.clone());
        Ok(())
    }
}

struct Harness {
    engine: CheckEngine,
    tracker: Arc<FakeTracker>,
    notifier: Arc<FakeNotifier>,
}

fn harness_with(notifier: FakeNotifier) -> Harness {
    let store = SubscriptionManager::new(Connection::open_in_memory().expect("db")).expect("store");
    let scheduler = VerificationScheduler::new(&ScheduleConfig::default(), RouteTable::default());
    let tracker = Arc::new(FakeTracker::default());
    let notifier = Arc::new(notifier);
    let engine = CheckEngine::new(
        Arc::new(store),
        Arc::new(scheduler),
        tracker.clone(),
        notifier.clone(),
        EngineSettings::default(),
    );
    Harness {
        engine,
        tracker,
        notifier,
    }
}

fn harness() -> Harness {
    harness_with(FakeNotifier::default())
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn admitted() -> TrackingReport {
    TrackingReport {
        origin: "MEDELLIN (ANTIOQUIA)".to_string(),
        destination: "BOGOTA (CUNDINAMARCA)".to_string(),
        current_state: "ADMITIDA EN ORIGEN".to_string(),
        admission_time: Some(rfc3339(Utc::now() - Duration::hours(2))),
        history: vec![HistoryEntry::new(
            "ADMITIDA EN ORIGEN",
            rfc3339(Utc::now() - Duration::hours(2)),
        )],
        ..Default::default()
    }
}

fn dispatched_at(at: DateTime<Utc>) -> TrackingReport {
    let mut report = admitted();
    report.current_state = "DESPACHO A DESTINO".to_string();
    report
        .history
        .push(HistoryEntry::new("DESPACHO A DESTINO", rfc3339(at)));
    report
}

fn at_pickup() -> TrackingReport {
    let mut report = admitted();
    report.current_state = "RECLAME EN OFICINA".to_string();
    report
}

#[tokio::test]
async fn subscribe_schedules_first_check_from_initial_report() {
    let h = harness();
    h.tracker.set(NUMBER, admitted());

    let before = Utc::now();
    let sub = h
        .engine
        .subscribe("e121101188", "device-1", Some("3001234567".to_string()))
        .await
        .expect("subscribe");

    assert_eq!(sub.tracking_number, NUMBER);
    assert_eq!(sub.phone.as_deref(), Some("3001234567"));
    assert_eq!(sub.current_state, "ADMITIDA EN ORIGEN");
    let next = sub.next_check_at.expect("next check");
    assert!(next >= db_time(before + Duration::minutes(30)));
    assert!(next <= db_time(Utc::now() + Duration::minutes(30)));
}

#[tokio::test]
async fn subscribe_aligns_dispatched_shipment_to_threshold() {
    let h = harness();
    let dispatch = Utc::now() - Duration::hours(1);
    h.tracker.set(NUMBER, dispatched_at(dispatch));

    let sub = h
        .engine
        .subscribe(NUMBER, "device-1", None)
        .await
        .expect("subscribe");

    // MEDELLIN -> BOGOTA is 10 h; 0.9 of it is 9 h after dispatch.
    let expected = dispatch
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .parse::<DateTime<Utc>>()
        .expect("parse")
        + Duration::hours(9);
    assert_eq!(sub.next_check_at, Some(db_time(expected)));
    assert!(sub.threshold_check_done);
}

#[tokio::test]
async fn subscribe_is_idempotent_and_skips_lookup() {
    let h = harness();
    h.tracker.set(NUMBER, admitted());

    let first = h.engine.subscribe(NUMBER, "device-1", None).await.expect("first");
    let second = h.engine.subscribe(NUMBER, "device-1", None).await.expect("second");
    assert_eq!(first.id, second.id);
    assert_eq!(h.tracker.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn subscribe_rejects_unknown_and_malformed_numbers() {
    let h = harness();

    let err = h.engine.subscribe(NUMBER, "device-1", None).await.unwrap_err();
    assert!(matches!(err, MonitorError::NoReport { .. }));
    assert_eq!(err.code(), "NO_TRACKING_INFO");

    let err = h.engine.subscribe("12345", "device-1", None).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRACKING_NUMBER");

    h.tracker.fail(NUMBER);
    let err = h.engine.subscribe(NUMBER, "device-1", None).await.unwrap_err();
    assert!(matches!(err, MonitorError::Tracking(TrackingError::Unavailable(_))));
}

#[tokio::test]
async fn arrival_is_notified_exactly_once() {
    let h = harness();
    h.tracker.set(NUMBER, admitted());
    h.engine.subscribe(NUMBER, "device-1", None).await.expect("subscribe");

    h.tracker.set(NUMBER, at_pickup());
    let now = Utc::now() + Duration::hours(1);
    let report = h.engine.run_cycle(now).await.expect("cycle");
    assert_eq!(report.due, 1);
    assert_eq!(report.checked, 1);
    assert_eq!(report.notified, 1);

    let again = h.engine.run_cycle(now + Duration::hours(2)).await.expect("cycle");
    assert_eq!(again.due, 0);
    assert_eq!(again.notified, 0);

    let sent = h.notifier.sent.lock().expect("lock");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].tracking_number, NUMBER);
    assert_eq!(sent[0].push_user_id, "device-1");
    assert_eq!(sent[0].state, "RECLAME EN OFICINA");
}

#[tokio::test]
async fn every_device_gets_its_own_notice() {
    let h = harness();
    h.tracker.set(NUMBER, admitted());
    h.engine.subscribe(NUMBER, "device-1", None).await.expect("first");
    h.engine.subscribe(NUMBER, "device-2", None).await.expect("second");

    h.tracker.set(NUMBER, at_pickup());
    let report = h
        .engine
        .run_cycle(Utc::now() + Duration::hours(1))
        .await
        .expect("cycle");
    assert_eq!(report.notified, 2);

    let mut users: Vec<String> = h
        .notifier
        .sent
        .lock()
        .expect("lock")
        .iter()
        .map(|n| n.push_user_id.clone())
        .collect();
    users.sort();
    assert_eq!(users, ["device-1", "device-2"]);
}

#[tokio::test]
async fn failed_lookup_defers_by_an_hour() {
    let h = harness();
    h.tracker.set(NUMBER, admitted());
    let sub = h.engine.subscribe(NUMBER, "device-1", None).await.expect("subscribe");

    h.tracker.fail(NUMBER);
    let now = Utc::now() + Duration::hours(1);
    let report = h.engine.run_cycle(now).await.expect("cycle");
    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.checked, 0);

    let stored = h.engine.store().get(&sub.id).expect("get");
    assert_eq!(stored.next_check_at, Some(db_time(now + Duration::minutes(60))));
    assert_eq!(stored.checks_performed, 0);
    assert!(h.engine.store().verification_log(&sub.id).expect("log").is_empty());
}

#[tokio::test]
async fn in_transit_check_is_recorded_and_rescheduled() {
    let h = harness();
    h.tracker.set(NUMBER, admitted());
    let sub = h.engine.subscribe(NUMBER, "device-1", None).await.expect("subscribe");
    assert!(!sub.threshold_check_done);

    let now = Utc::now() + Duration::hours(1);
    let dispatch = (now - Duration::minutes(20))
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .parse::<DateTime<Utc>>()
        .expect("parse");
    h.tracker.set(NUMBER, dispatched_at(dispatch));

    let report = h.engine.run_cycle(now).await.expect("cycle");
    assert_eq!(report.checked, 1);
    assert_eq!(report.notified, 0);

    let stored = h.engine.store().get(&sub.id).expect("get");
    assert_eq!(stored.current_state, "DESPACHO A DESTINO");
    assert_eq!(stored.checks_performed, 1);
    assert!(stored.threshold_check_done);
    assert_eq!(stored.next_check_at, Some(db_time(dispatch + Duration::hours(9))));

    let log = h.engine.store().verification_log(&sub.id).expect("log");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].state_found, "DESPACHO A DESTINO");
}

#[tokio::test]
async fn threshold_flag_switches_to_short_polling() {
    let h = harness();
    let dispatch = (Utc::now() - Duration::hours(1))
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .parse::<DateTime<Utc>>()
        .expect("parse");
    h.tracker.set(NUMBER, dispatched_at(dispatch));
    let sub = h.engine.subscribe(NUMBER, "device-1", None).await.expect("subscribe");

    // The threshold check itself: still in transit at dispatch + 9 h.
    let threshold = dispatch + Duration::hours(9);
    h.engine.run_cycle(threshold).await.expect("cycle");

    let stored = h.engine.store().get(&sub.id).expect("get");
    assert_eq!(
        stored.next_check_at,
        Some(db_time(threshold + Duration::minutes(30)))
    );
}

#[tokio::test]
async fn delivered_rows_are_purged_after_retention() {
    let h = harness();
    h.tracker.set(NUMBER, admitted());
    let sub = h.engine.subscribe(NUMBER, "device-1", None).await.expect("subscribe");

    h.tracker.set(NUMBER, at_pickup());
    let delivered = Utc::now() + Duration::hours(1);
    h.engine.run_cycle(delivered).await.expect("deliver");

    let early = h
        .engine
        .run_cycle(delivered + Duration::hours(47))
        .await
        .expect("cycle");
    assert_eq!(early.purged_subscriptions, 0);

    let late = h
        .engine
        .run_cycle(delivered + Duration::hours(49))
        .await
        .expect("cycle");
    assert_eq!(late.purged_subscriptions, 1);
    assert_eq!(late.purged_log_entries, 1);
    assert!(h.engine.store().get(&sub.id).is_err());
}

#[tokio::test]
async fn push_failure_is_counted_but_not_retried() {
    let h = harness_with(FakeNotifier {
        broken: true,
        ..Default::default()
    });
    h.tracker.set(NUMBER, admitted());
    let sub = h.engine.subscribe(NUMBER, "device-1", None).await.expect("subscribe");

    h.tracker.set(NUMBER, at_pickup());
    let now = Utc::now() + Duration::hours(1);
    let report = h.engine.run_cycle(now).await.expect("cycle");
    assert_eq!(report.notified, 0);
    assert_eq!(report.notify_failures, 1);

    let stored = h.engine.store().get(&sub.id).expect("get");
    assert!(stored.is_delivered());
    assert_eq!(h.engine.run_cycle(now).await.expect("cycle").due, 0);
}

#[tokio::test]
async fn status_cancel_and_stats() {
    let h = harness();
    h.tracker.set(NUMBER, admitted());
    h.engine.subscribe(NUMBER, "device-1", None).await.expect("subscribe");

    let status = h.engine.status(NUMBER).expect("status");
    assert!(status.active);
    assert_eq!(h.engine.stats().expect("stats").active, 1);

    assert_eq!(h.engine.cancel(NUMBER).expect("cancel"), 1);
    let err = h.engine.status(NUMBER).unwrap_err();
    assert_eq!(err.code(), "SUBSCRIPTION_NOT_FOUND");
    assert_eq!(h.engine.cancel(NUMBER).unwrap_err().code(), "SUBSCRIPTION_NOT_FOUND");
}

#[tokio::test]
async fn run_stops_on_shutdown_signal() {
    let h = harness();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let engine = Arc::new(h.engine);
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(rx).await })
    };
    tx.send(true).expect("send");
    tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .expect("engine stopped")
        .expect("join");
}

/// Cancels the shipment's subscriptions while the lookup is in flight.
struct CancelDuringFetch {
    store: Arc<SubscriptionManager>,
    report: TrackingReport,
}

#[async_trait]
impl TrackingClient for CancelDuringFetch {
    async fn fetch(&self, tracking_number: &TrackingNumber) -> Result<TrackingReport, TrackingError> {
        self.store
            .cancel(tracking_number.as_str(), Utc::now())
            .expect("cancel");
        Ok(self.report.clone())
    }
}

fn engine_cancelling_with(report: TrackingReport) -> (CheckEngine, Arc<FakeNotifier>) {
    let store = Arc::new(
        SubscriptionManager::new(Connection::open_in_memory().expect("db")).expect("store"),
    );
    let scheduler = VerificationScheduler::new(&ScheduleConfig::default(), RouteTable::default());
    let notifier = Arc::new(FakeNotifier::default());
    let tracker = Arc::new(CancelDuringFetch {
        store: Arc::clone(&store),
        report,
    });
    let engine = CheckEngine::new(
        store,
        Arc::new(scheduler),
        tracker,
        notifier.clone(),
        EngineSettings::default(),
    );
    (engine, notifier)
}

fn seed_due(engine: &CheckEngine) -> String {
    let number = TrackingNumber::parse(NUMBER).expect("number");
    let request = parcelwatch_subscriptions::NewSubscription {
        tracking_number: number,
        push_user_id: "device-1".to_string(),
        phone: None,
    };
    let decision = parcelwatch_scheduler::ScheduleDecision::CheckAt {
        at: Utc::now(),
        reason: parcelwatch_scheduler::CheckReason::PreDispatch,
    };
    engine
        .store()
        .create(&request, &admitted(), &decision, Utc::now())
        .expect("create")
        .id
}

#[tokio::test]
async fn cancellation_during_lookup_suppresses_arrival_push() {
    let (engine, notifier) = engine_cancelling_with(at_pickup());
    let id = seed_due(&engine);

    let report = engine
        .run_cycle(Utc::now() + Duration::hours(1))
        .await
        .expect("cycle");
    assert_eq!(report.due, 1);
    assert_eq!(report.notified, 0);
    assert_eq!(report.skipped, 1);
    assert!(notifier.sent.lock().expect("lock").is_empty());

    let stored = engine.store().get(&id).expect("get");
    assert!(!stored.active);
    assert!(!stored.is_delivered());
}

#[tokio::test]
async fn cancellation_during_lookup_discards_in_transit_result() {
    let (engine, _notifier) = engine_cancelling_with(dispatched_at(Utc::now()));
    let id = seed_due(&engine);

    let report = engine
        .run_cycle(Utc::now() + Duration::hours(1))
        .await
        .expect("cycle");
    assert_eq!(report.checked, 0);
    assert_eq!(report.skipped, 1);

    let stored = engine.store().get(&id).expect("get");
    assert_eq!(stored.checks_performed, 0);
    assert_eq!(stored.current_state, "ADMITIDA EN ORIGEN");
    assert!(engine.store().verification_log(&id).expect("log").is_empty());
}

#[tokio::test]
async fn huge_retention_skips_purge_instead_of_panicking() {
    let store = SubscriptionManager::new(Connection::open_in_memory().expect("db")).expect("store");
    let scheduler = VerificationScheduler::new(&ScheduleConfig::default(), RouteTable::default());
    let settings = EngineSettings {
        retention: Duration::hours(i64::from(u32::MAX)),
        ..EngineSettings::default()
    };
    let engine = CheckEngine::new(
        Arc::new(store),
        Arc::new(scheduler),
        Arc::new(FakeTracker::default()),
        Arc::new(FakeNotifier::default()),
        settings,
    );

    let report = engine.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(report.purged_subscriptions, 0);
}
