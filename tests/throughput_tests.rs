//! Throughput benchmark runs against a notifier with a bounded queue

mod common;

use common::{Clock, MockBle};
use embassy_time::Duration;
use nrf52_uart_bridge_firmware::ble::service::Characteristic;
use nrf52_uart_bridge_firmware::ble::throughput::{SessionState, ThroughputSession, TELEMETRY_LEN};

const LIMIT: Duration = Duration::from_secs(60);

/// Decoded telemetry header
#[derive(Debug)]
struct Telemetry {
    kind: u8,
    state: u8,
    index: u16,
    millis: u32,
    bytes: u32,
    average: (u8, u8),
}

fn telemetry(packet: &[u8]) -> Telemetry {
    Telemetry {
        kind: packet[0],
        state: packet[1],
        index: u16::from_be_bytes([packet[2], packet[3]]),
        millis: u32::from_be_bytes(packet[4..8].try_into().unwrap()),
        bytes: u32::from_be_bytes(packet[8..12].try_into().unwrap()),
        average: (packet[14], packet[15]),
    }
}

/// Keep completing notifications until the session goes idle
fn run_to_completion(session: &mut ThroughputSession, clock: &mut Clock, ble: &mut MockBle) {
    for _ in 0..100_000 {
        if session.state() == SessionState::Idle {
            return;
        }
        let now = clock.advance(Duration::from_millis(1));
        let done = ble.queued;
        ble.complete(done);
        session.on_notify_complete(done as u8, now, ble);
    }
    panic!("session never finished");
}

#[test]
fn one_kilobyte_run_sends_exactly_1024_bytes() {
    let mut clock = Clock::new();
    let mut ble = MockBle::default();
    let mut session = ThroughputSession::new(LIMIT);

    assert!(session.command(2, 244, clock.now()));
    session.pump(clock.advance(Duration::from_millis(3)), &mut ble);
    assert_eq!(session.state(), SessionState::Idle);

    let packets = ble.on(Characteristic::Test);
    let (summary, data) = packets.split_last().unwrap();
    assert_eq!(data.iter().map(|p| p.len()).sum::<usize>(), 1024);
    assert_eq!(data.iter().map(|p| p.len()).collect::<Vec<_>>(), [244, 244, 244, 244, 48]);

    assert_eq!(summary.len(), TELEMETRY_LEN);
    let summary = telemetry(summary);
    assert_eq!((summary.kind, summary.state), (2, SessionState::Finishing as u8));
    assert_eq!(summary.bytes, 1024);
    assert_eq!(summary.index, 5);
    assert_eq!(summary.millis, 3);
    // 1024 / 3 = 341.33, integer part saturates
    assert_eq!(summary.average, (255, 33));
}

#[test]
fn one_megabyte_run_resumes_after_backpressure() {
    let mut clock = Clock::new();
    let mut ble = MockBle::with_queue_limit(6);
    let mut session = ThroughputSession::new(LIMIT);

    session.command(3, 244, clock.now());
    session.pump(clock.now(), &mut ble);
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(ble.notifications.len(), 6);

    run_to_completion(&mut session, &mut clock, &mut ble);

    let packets = ble.on(Characteristic::Test);
    let (summary, data) = packets.split_last().unwrap();
    assert_eq!(data.iter().map(|p| p.len() as u64).sum::<u64>(), 1_048_576);

    // Rolled-back attempts never show up as gaps
    let mut last_bytes = 0;
    for (i, packet) in data.iter().enumerate() {
        let t = telemetry(packet);
        assert_eq!(t.index as usize, i + 1);
        assert!(t.bytes > last_bytes);
        assert_eq!(t.state, SessionState::Running as u8);
        last_bytes = t.bytes;
    }

    let summary = telemetry(summary);
    assert_eq!(summary.bytes, 1_048_576);
    assert_eq!(summary.state, SessionState::Finishing as u8);
}

#[test]
fn stop_finishes_early_with_a_summary() {
    let mut clock = Clock::new();
    let mut ble = MockBle::with_queue_limit(4);
    let mut session = ThroughputSession::new(LIMIT);

    session.command(3, 100, clock.now());
    session.pump(clock.advance(Duration::from_millis(1)), &mut ble);
    assert!(session.command(1, 100, clock.now()));
    assert_eq!(session.state(), SessionState::Finishing);

    run_to_completion(&mut session, &mut clock, &mut ble);
    let packets = ble.on(Characteristic::Test);
    let summary = packets.last().unwrap();
    assert_eq!(summary.len(), TELEMETRY_LEN);
    assert_eq!(telemetry(summary).bytes, 400);
    assert_eq!(telemetry(summary).kind, 1);
}

#[test]
fn time_limit_ends_a_sixty_second_run() {
    let mut clock = Clock::new();
    let mut ble = MockBle::with_queue_limit(2);
    let mut session = ThroughputSession::new(Duration::from_millis(50));

    session.command(4, 20, clock.now());
    session.pump(clock.now(), &mut ble);
    run_to_completion(&mut session, &mut clock, &mut ble);

    let packets = ble.on(Characteristic::Test);
    let summary = telemetry(packets.last().unwrap());
    assert!(summary.millis > 50);
    assert!(summary.bytes < 50 * 1024 * 1024);
    assert_eq!(summary.state, SessionState::Finishing as u8);
}

#[test]
fn payload_size_is_clamped() {
    let mut clock = Clock::new();
    let mut ble = MockBle::with_queue_limit(1);
    let mut session = ThroughputSession::new(LIMIT);

    session.command(2, 5, clock.now());
    session.pump(clock.now(), &mut ble);
    assert_eq!(ble.notifications[0].1.len(), 20);

    let mut ble = MockBle::with_queue_limit(1);
    session.command(3, 500, clock.advance(Duration::from_millis(1)));
    session.pump(clock.now(), &mut ble);
    assert_eq!(ble.notifications[0].1.len(), 244);
}

#[test]
fn abort_drops_the_run() {
    let clock = Clock::new();
    let mut ble = MockBle::with_queue_limit(3);
    let mut session = ThroughputSession::new(LIMIT);

    session.command(3, 244, clock.now());
    session.pump(clock.now(), &mut ble);
    session.abort();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.outstanding(), 0);

    ble.complete(3);
    session.on_notify_complete(3, clock.now(), &mut ble);
    assert_eq!(ble.notifications.len(), 3);
}
