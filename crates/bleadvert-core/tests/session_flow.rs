//! End-to-end scanning session behaviour on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use bleadvert_core::{
    Beacon, BeaconSample, DwellConfig, Event, MemoryLedger, MemoryStore, ProgressStore, Reward,
    ScanRewardCoordinator, ScannerConfig, ScanningSession, SessionContext, User, VisitKey,
    VisitLedger,
};

const A: &str = "AA:BB:CC:DD:EE:01";
const B: &str = "AA:BB:CC:DD:EE:02";

struct Harness {
    session: ScanningSession,
    store: Arc<MemoryStore>,
    ledger: Arc<MemoryLedger>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let coordinator = ScanRewardCoordinator::new(store.clone(), 5);
    let session = ScanningSession::new(
        ScannerConfig::default(),
        DwellConfig::default(),
        coordinator,
        ledger.clone(),
    );
    Harness {
        session,
        store,
        ledger,
    }
}

fn beacon(address: &str) -> Beacon {
    Beacon {
        id: address.to_string(),
        address: address.to_string(),
        url: format!("https://example.com/{address}"),
        max_advertisement_distance: 2.0,
        ..Beacon::default()
    }
}

fn context() -> SessionContext {
    SessionContext::new(
        User {
            id: "u1".into(),
            name: "Ada".into(),
            is_admin: false,
        },
        Event {
            id: "expo".into(),
            title: "Expo".into(),
            rewards: vec![Reward {
                title: "Sticker".into(),
                required_scans: 1,
                ..Reward::default()
            }],
            ..Event::default()
        },
    )
}

fn key(address: &str) -> VisitKey {
    VisitKey::new("Expo", address, "u1")
}

fn ingest(session: &ScanningSession, address: &str, rssi: i16) {
    for _ in 0..6 {
        session.ingest(BeaconSample::now(address, rssi)).unwrap();
    }
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn continuous_dwell_records_one_scan() {
    let mut h = harness();
    let mut rewards = h.session.subscribe_rewards();
    h.session.start(context(), vec![beacon(A), beacon(B)]).unwrap();
    ingest(&h.session, A, -59);

    sleep_ms(12_000).await;
    let summary = h.session.stop().await.unwrap();
    assert_eq!(summary.scans_fired, 1);

    let progress = h.store.read_progress("u1", "expo").await.unwrap().value;
    assert_eq!(progress.scans, 1);
    assert_eq!(progress.scanned_beacon_addresses, vec![beacon(A).identity()]);

    let unlocked = rewards.try_recv().expect("reward notification");
    assert_eq!(unlocked.reward.title, "Sticker");
    assert_eq!(unlocked.beacon_address, A);
    assert!(rewards.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn switching_before_threshold_never_fires() {
    let mut h = harness();
    h.session.start(context(), vec![beacon(A), beacon(B)]).unwrap();
    ingest(&h.session, A, -59);

    // Four dwell ticks at A, then B becomes closer.
    sleep_ms(4500).await;
    ingest(&h.session, B, -50);
    sleep_ms(100).await;
    assert_eq!(
        h.session.current_closest().beacon.map(|b| b.address),
        Some(B.to_string())
    );

    let summary = h.session.stop().await.unwrap();
    assert_eq!(summary.scans_fired, 0);
    assert_eq!(summary.visits_reported, 0);

    let progress = h.store.read_progress("u1", "expo").await.unwrap();
    assert_eq!(progress.version, 0);
    assert_eq!(h.ledger.visit_duration(&key(A)).await.unwrap(), None);
    assert!(h.ledger.first_visit(&key(A)).await.unwrap().is_some());
    assert!(h.ledger.first_visit(&key(B)).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn switching_one_millisecond_before_threshold_never_fires() {
    let mut h = harness();
    h.session.start(context(), vec![beacon(A), beacon(B)]).unwrap();
    ingest(&h.session, A, -59);

    // The change lands on the same instant as the fifth dwell tick.
    sleep_ms(4999).await;
    ingest(&h.session, B, -50);
    sleep_ms(200).await;

    let summary = h.session.stop().await.unwrap();
    assert_eq!(summary.transitions, 2);
    assert_eq!(summary.scans_fired, 0);

    let progress = h.store.read_progress("u1", "expo").await.unwrap();
    assert_eq!(progress.version, 0);
    assert_eq!(progress.value.scans, 0);
}

#[tokio::test(start_paused = true)]
async fn learned_url_does_not_restart_dwell() {
    let mut h = harness();
    let bare = Beacon {
        url: String::new(),
        ..beacon(A)
    };
    h.session.start(context(), vec![bare]).unwrap();
    ingest(&h.session, A, -59);

    sleep_ms(3000).await;
    let mut frame = vec![0x10, 0x00, 0x03];
    frame.extend_from_slice(b"example");
    frame.push(0x07);
    let mut sample = BeaconSample::now(A, -59);
    sample.service_data = Some(frame);
    h.session.ingest(sample).unwrap();

    sleep_ms(3000).await;
    let summary = h.session.stop().await.unwrap();
    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.scans_fired, 1);

    let progress = h.store.read_progress("u1", "expo").await.unwrap().value;
    assert_eq!(progress.scans, 1);
    let learned = Beacon {
        url: "https://example.com".to_string(),
        ..beacon(A)
    };
    assert_eq!(progress.scanned_beacon_addresses, vec![learned.identity()]);
}

#[tokio::test(start_paused = true)]
async fn switching_after_dwell_reports_previous_visit() {
    let mut h = harness();
    h.session.start(context(), vec![beacon(A), beacon(B)]).unwrap();
    ingest(&h.session, A, -59);

    sleep_ms(6500).await;
    ingest(&h.session, B, -50);
    sleep_ms(100).await;

    let summary = h.session.stop().await.unwrap();
    assert_eq!(summary.scans_fired, 1);
    assert_eq!(h.ledger.visit_duration(&key(A)).await.unwrap(), Some(6000));
    assert_eq!(h.ledger.visit_duration(&key(B)).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn stop_flushes_in_flight_visit() {
    let mut h = harness();
    h.session.start(context(), vec![beacon(A)]).unwrap();
    ingest(&h.session, A, -59);

    sleep_ms(7500).await;
    let summary = h.session.stop().await.unwrap();
    assert_eq!(summary.visits_reported, 1);
    assert_eq!(h.ledger.visit_duration(&key(A)).await.unwrap(), Some(7000));
    assert!(!h.session.is_scanning());
    assert!(h.session.current_closest().is_none());
}

#[tokio::test(start_paused = true)]
async fn second_session_does_not_credit_same_beacon_twice() {
    let mut h = harness();
    for _ in 0..2 {
        h.session.start(context(), vec![beacon(A)]).unwrap();
        ingest(&h.session, A, -59);
        sleep_ms(6000).await;
        h.session.stop().await.unwrap();
    }

    let progress = h.store.read_progress("u1", "expo").await.unwrap().value;
    assert_eq!(progress.scans, 1);
    assert_eq!(h.store.read_user_info("u1").await.unwrap().value.scans, 1);
}
