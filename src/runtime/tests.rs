use super::*;
use crate::capture::MockCamera;
use crate::clock::ManualClock;
use crate::indicator::MockIndicator;
use crate::mqtt::{ClientEvent, ConnectReturnCode, MockMessagingClient};
use crate::network::MockNetwork;
use proptest::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

const PREFIX: &str = "ESP32CAM-Electric-";

type TestLoop<K = ManualClock> =
    CaptureLoop<MockCamera, MockNetwork, MockMessagingClient, MockIndicator, K>;

fn settings(interval_ms: u64) -> LoopSettings {
    LoopSettings {
        capture_interval: Duration::from_millis(interval_ms),
        ..LoopSettings::default()
    }
}

fn seeded_ids() -> ClientIdGenerator {
    ClientIdGenerator::with_rng(PREFIX, ChaCha8Rng::seed_from_u64(7))
}

fn peripherals(
    camera: MockCamera,
    client: MockMessagingClient,
) -> Peripherals<MockCamera, MockNetwork, MockMessagingClient, MockIndicator> {
    Peripherals {
        camera,
        network: MockNetwork::new(),
        client,
        indicator: MockIndicator::new(),
    }
}

fn started_with(
    camera: MockCamera,
    client: MockMessagingClient,
    settings: LoopSettings,
) -> (TestLoop, ManualClock) {
    let clock = ManualClock::default();
    let mut capture_loop = CaptureLoop::new(
        peripherals(camera, client),
        settings,
        seeded_ids(),
        clock.clone(),
    );
    capture_loop.startup().unwrap();
    (capture_loop, clock)
}

fn started(interval_ms: u64) -> (TestLoop, ManualClock) {
    started_with(
        MockCamera::new(),
        MockMessagingClient::connected(),
        settings(interval_ms),
    )
}

#[test]
fn test_capture_fires_on_interval_boundary() {
    let (mut capture_loop, clock) = started(5_000);

    assert_eq!(capture_loop.tick().unwrap(), None);
    clock.set(4_999);
    assert_eq!(capture_loop.tick().unwrap(), None);

    clock.set(5_000);
    assert_eq!(
        capture_loop.tick().unwrap(),
        Some(CycleOutcome::Published { bytes: 2048 })
    );
    assert_eq!(capture_loop.state().last_capture_ms, 5_000);

    clock.set(5_100);
    assert_eq!(capture_loop.tick().unwrap(), None);
    clock.set(9_999);
    assert_eq!(capture_loop.tick().unwrap(), None);

    clock.set(10_000);
    assert!(capture_loop.tick().unwrap().is_some());

    let client = &capture_loop.peripherals().client;
    assert_eq!(client.published().len(), 2);
    assert!(client
        .published()
        .iter()
        .all(|(topic, _)| topic == "home/meter/electric/image"));
}

#[test]
fn test_service_runs_every_tick() {
    let (mut capture_loop, clock) = started(60_000);

    for _ in 0..10 {
        capture_loop.tick().unwrap();
        clock.advance(Duration::from_millis(100));
    }

    let client = &capture_loop.peripherals().client;
    assert_eq!(client.service_calls(), 10);
    assert_eq!(client.publish_attempts(), 0);
}

#[test]
fn test_repeated_ticks_without_elapsed_time_never_capture() {
    let (mut capture_loop, clock) = started(5_000);
    clock.set(5_000);
    assert!(capture_loop.tick().unwrap().is_some());

    for _ in 0..50 {
        assert_eq!(capture_loop.tick().unwrap(), None);
    }

    assert_eq!(capture_loop.peripherals().client.publish_attempts(), 1);
    assert_eq!(capture_loop.state().cycles, 1);
}

#[test]
fn test_missing_frame_skips_publish_and_release() {
    let mut camera = MockCamera::new();
    camera.fail_next(1);
    let (mut capture_loop, clock) =
        started_with(camera, MockMessagingClient::connected(), settings(5_000));

    clock.set(5_000);
    assert_eq!(capture_loop.tick().unwrap(), Some(CycleOutcome::NoFrame));

    let p = capture_loop.peripherals();
    assert_eq!(p.client.publish_attempts(), 0);
    assert_eq!(p.camera.acquired(), 0);
    assert_eq!(p.camera.released(), 0);
    assert_eq!(p.indicator.history(), &[false, true, false]);
    assert_eq!(capture_loop.state().phase, Phase::Idle);

    // No retry within the same interval
    clock.set(9_999);
    assert_eq!(capture_loop.tick().unwrap(), None);

    clock.set(10_000);
    assert_eq!(
        capture_loop.tick().unwrap(),
        Some(CycleOutcome::Published { bytes: 2048 })
    );
}

#[test]
fn test_reconnect_before_publish_with_fixed_delay() {
    let (mut capture_loop, clock) = started(5_000);
    {
        let client = &mut capture_loop.peripherals_mut().client;
        client.drop_connection();
        client.refuse_next(
            2,
            ClientState::Refused(ConnectReturnCode::ServerUnavailable),
        );
    }

    let outcome = capture_loop.capture_and_send().unwrap();
    assert_eq!(outcome, CycleOutcome::Published { bytes: 2048 });

    // Two refusals, each followed by the 5 s wait
    assert_eq!(clock.now_ms(), 10_000);

    let events = capture_loop.peripherals().client.events();
    assert_eq!(events.len(), 4);
    for event in &events[..3] {
        match event {
            ClientEvent::Connect { client_id } => assert!(client_id.starts_with(PREFIX)),
            other => panic!("expected connect, got {:?}", other),
        }
    }
    assert_eq!(
        events[3],
        ClientEvent::Publish {
            topic: "home/meter/electric/image".to_string(),
            bytes: 2048,
        }
    );
}

#[test]
fn test_tick_reconnects_before_servicing() {
    let mut client = MockMessagingClient::new();
    client.refuse_next(1, ClientState::ConnectFailed);
    let metrics = LoopMetrics::new().unwrap();
    let (capture_loop, clock) = started_with(MockCamera::new(), client, settings(60_000));
    let mut capture_loop = capture_loop.with_metrics(metrics.clone());

    assert_eq!(capture_loop.tick().unwrap(), None);

    let client = &capture_loop.peripherals().client;
    assert!(client.is_connected());
    assert_eq!(client.connect_attempts(), 2);
    assert_eq!(client.events().last(), Some(&ClientEvent::Service));
    assert_eq!(clock.now_ms(), 5_000);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.reconnect_attempts, 2);
    assert!(snapshot.connected);
}

#[test]
fn test_credentials_passed_to_broker() {
    let mut config = FileConfig::default();
    config.broker.username = Some("meter".to_string());
    config.broker.password = Some("hunter2".to_string());
    let (mut capture_loop, _clock) = started_with(
        MockCamera::new(),
        MockMessagingClient::new(),
        LoopSettings::from_config(&config),
    );

    capture_loop.reconnect().unwrap();

    let creds = capture_loop.peripherals().client.last_credentials().unwrap();
    assert_eq!(creds.username.as_deref(), Some("meter"));
    assert_eq!(creds.password.as_deref(), Some("hunter2"));
}

#[test]
fn test_failed_publish_still_releases_frame() {
    let mut client = MockMessagingClient::connected();
    client.fail_next_publish(1);
    let (mut capture_loop, clock) = started_with(MockCamera::new(), client, settings(5_000));

    clock.set(5_000);
    match capture_loop.tick().unwrap() {
        Some(CycleOutcome::PublishFailed { bytes, .. }) => assert_eq!(bytes, 2048),
        other => panic!("expected failed publish, got {:?}", other),
    }

    let p = capture_loop.peripherals();
    assert_eq!(p.camera.acquired(), 1);
    assert_eq!(p.camera.released(), 1);
    assert_eq!(p.camera.outstanding(), 0);
    assert_eq!(p.indicator.history(), &[false, true, false]);

    // The loop carries on with the next interval
    clock.set(10_000);
    assert_eq!(
        capture_loop.tick().unwrap(),
        Some(CycleOutcome::Published { bytes: 2048 })
    );
    assert_eq!(capture_loop.peripherals().camera.released(), 2);
}

#[test]
fn test_bounded_reconnect_releases_frame() {
    let mut client = MockMessagingClient::new();
    client.refuse_next(3, ClientState::Refused(ConnectReturnCode::NotAuthorized));
    let loop_settings = LoopSettings {
        reconnect: RetryPolicy::fixed(Duration::from_secs(5)).with_max_attempts(3),
        ..settings(5_000)
    };
    let (mut capture_loop, clock) = started_with(MockCamera::new(), client, loop_settings);

    let err = capture_loop.capture_and_send().unwrap_err();
    match err {
        LoopError::ReconnectExhausted {
            attempts, state, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(state.code(), 5);
        }
    }

    let p = capture_loop.peripherals();
    assert_eq!(p.camera.released(), 1);
    assert_eq!(p.client.publish_attempts(), 0);
    assert!(!p.indicator.is_busy());
    assert_eq!(clock.now_ms(), 10_000);
    assert_eq!(capture_loop.state().phase, Phase::Idle);
}

#[test]
fn test_camera_init_failure_is_fatal() {
    let clock = ManualClock::default();
    let mut capture_loop: TestLoop = CaptureLoop::new(
        peripherals(
            MockCamera::failing_init("sensor not detected"),
            MockMessagingClient::new(),
        ),
        settings(5_000),
        seeded_ids(),
        clock,
    );

    let result = capture_loop.startup();
    assert!(matches!(result, Err(StartupError::Camera(_))));
    // Association never starts
    assert!(capture_loop.peripherals().network.credentials().is_none());
}

#[test]
fn test_startup_waits_for_network() {
    let clock = ManualClock::default();
    let mut capture_loop: TestLoop = CaptureLoop::new(
        Peripherals {
            camera: MockCamera::new(),
            network: MockNetwork::up_after(4),
            client: MockMessagingClient::connected(),
            indicator: MockIndicator::new(),
        },
        settings(5_000),
        seeded_ids(),
        clock.clone(),
    );

    let address = capture_loop.startup().unwrap();

    assert!(address.is_some());
    assert_eq!(clock.now_ms(), 2_000);
    assert!(capture_loop.peripherals().camera.is_initialized());
    assert_eq!(capture_loop.peripherals().indicator.history(), &[false]);
}

#[test]
fn test_bounded_association_fails_startup() {
    let loop_settings = LoopSettings {
        association: RetryPolicy::fixed(Duration::from_millis(500)).with_max_attempts(3),
        ..settings(5_000)
    };
    let mut capture_loop: TestLoop = CaptureLoop::new(
        Peripherals {
            camera: MockCamera::new(),
            network: MockNetwork::up_after(u32::MAX),
            client: MockMessagingClient::new(),
            indicator: MockIndicator::new(),
        },
        loop_settings,
        seeded_ids(),
        ManualClock::default(),
    );

    assert!(matches!(
        capture_loop.startup(),
        Err(StartupError::NetworkUnavailable(_))
    ));
}

#[test]
fn test_metrics_track_cycles() {
    let metrics = LoopMetrics::new().unwrap();
    let mut camera = MockCamera::new().with_frame_len(4096);
    camera.succeed_next();
    camera.fail_next(1);
    let (capture_loop, clock) =
        started_with(camera, MockMessagingClient::connected(), settings(1_000));
    let mut capture_loop = capture_loop.with_metrics(metrics.clone());

    for t in [1_000, 2_000] {
        clock.set(t);
        capture_loop.tick().unwrap();
    }

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.captures, 1);
    assert_eq!(snapshot.capture_failures, 1);
    assert_eq!(snapshot.publish_success, 1);
    assert_eq!(snapshot.last_frame_bytes, 4096);
    assert!(metrics.encode().unwrap().contains("meter_cam_busy 0"));
}

/// Manual clock that raises a shutdown flag after a number of sleeps.
struct StoppingClock {
    inner: ManualClock,
    sleeps_left: AtomicU32,
    shutdown: Arc<AtomicBool>,
}

impl Clock for StoppingClock {
    fn now_ms(&self) -> u64 {
        self.inner.now_ms()
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        if self.sleeps_left.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shutdown.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_run_stops_on_shutdown_and_disconnects() {
    let shutdown = Arc::new(AtomicBool::new(false));
    let clock = StoppingClock {
        inner: ManualClock::default(),
        sleeps_left: AtomicU32::new(25),
        shutdown: Arc::clone(&shutdown),
    };
    let mut capture_loop: TestLoop<StoppingClock> = CaptureLoop::new(
        peripherals(MockCamera::new(), MockMessagingClient::connected()),
        settings(1_000),
        seeded_ids(),
        clock,
    );
    capture_loop.startup().unwrap();

    capture_loop.run(&shutdown).unwrap();

    // Ticks at 0, 100, ..., 2400 ms
    let client = &capture_loop.peripherals().client;
    assert_eq!(client.published().len(), 2);
    assert_eq!(client.service_calls(), 25);
    assert_eq!(client.events().last(), Some(&ClientEvent::Disconnect));
    assert!(!client.is_connected());
}

#[test]
fn test_run_returns_immediately_when_already_stopped() {
    let (mut capture_loop, clock) = started(1_000);
    let shutdown = AtomicBool::new(true);

    capture_loop.run(&shutdown).unwrap();

    assert_eq!(clock.now_ms(), 0);
    assert_eq!(
        capture_loop.peripherals().client.events(),
        &[ClientEvent::Disconnect]
    );
}

proptest! {
    #[test]
    fn prop_one_cycle_per_interval(
        interval in 1u64..1_000_000,
        cycles in 1u64..8,
        probes in prop::collection::vec(0.0f64..1.0, 0..5),
    ) {
        let (mut capture_loop, clock) = started(interval);

        for k in 1..=cycles {
            let window_start = (k - 1) * interval;
            for p in &probes {
                let offset = ((p * interval as f64) as u64).min(interval - 1);
                clock.set(window_start + offset);
                prop_assert_eq!(capture_loop.tick().unwrap(), None);
            }

            clock.set(k * interval);
            prop_assert!(capture_loop.tick().unwrap().is_some());
        }

        let p = capture_loop.peripherals();
        prop_assert_eq!(p.client.published().len() as u64, cycles);
        prop_assert_eq!(p.camera.released(), cycles);
    }
}
