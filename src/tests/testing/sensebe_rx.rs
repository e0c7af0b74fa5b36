use crate::constants::DETECT_FEEDBACK_TIMEOUT_MS;
use crate::detect_policy::RelockPhase;
use crate::device_config::ReceiverConfig;
use crate::event_logger::{DetectionEventKind, EventLogger};
use crate::nvm_logger::NvmLogger;
use crate::sensebe_rx::{install_receiver, with_receiver, SenseBeRx, SharedSenseBeRx};
use crate::services::LedSequence;
use crate::tests::helpers::{test_receiver_config, ReceiverBench};
use crate::tests::stubs::fake_flash::RamFlash;
use crate::tests::stubs::fake_services::{FakeCamera, FakeLed, FakeMsTimer, FakePin};
use crate::tests::stubs::fake_timebase::SimTimebase;
use crate::timebase::{ms_to_ticks, CompareChannel};
use core::cell::RefCell;
use critical_section::Mutex;
use test_log::test;

const PULSE_PERIOD_MS: u32 = 20;

fn running_bench(config: ReceiverConfig) -> ReceiverBench {
    let mut bench = ReceiverBench::new(config);
    bench.rx.start();
    bench.transmit_for_ms(PULSE_PERIOD_MS, 100);
    bench
}

#[test]
fn steady_transmitter_never_triggers() {
    let mut bench = running_bench(test_receiver_config());
    assert!(bench.rx.is_running());
    assert!(bench.pin.is_high());
    bench.transmit_for_ms(PULSE_PERIOD_MS, 2000);
    assert_eq!(bench.camera.triggers(), 0);
    assert_eq!(bench.camera.state.borrow().pulse_ms, Some(1000));
}

#[test]
fn beam_break_triggers_camera_once() {
    let mut bench = running_bench(test_receiver_config());
    bench.advance_ms(150);
    assert_eq!(bench.camera.triggers(), 1);
    assert!(bench.rx.detector().is_window_armed());

    bench.transmit_for_ms(PULSE_PERIOD_MS, 2000);
    assert_eq!(bench.camera.triggers(), 1);
    assert_eq!(bench.rx.policy().consecutive_misses(), 0);
}

#[test]
fn long_break_gives_up_and_rests() {
    let mut bench = running_bench(test_receiver_config());
    bench.advance_ms(350);
    assert_eq!(bench.camera.triggers(), 3);
    assert_eq!(bench.rx.policy().relock_phase(), RelockPhase::Resting);
    assert!(!bench.pin.is_high());
    assert!(!bench.rx.detector().timebase().is_running());
    assert!(!bench.rx.detector().timebase().edge_connected());
}

#[test]
fn relock_listens_briefly_then_rests_again() {
    let mut bench = running_bench(test_receiver_config());
    bench.advance_ms(350);
    // Third miss at 400ms, so the rest runs out at 1400ms.
    bench.advance_ms(1000);
    assert_eq!(bench.rx.policy().relock_phase(), RelockPhase::Listening);
    assert!(bench.pin.is_high());
    assert!(bench.rx.detector().is_pulse_armed());

    bench.advance_ms(250);
    assert_eq!(bench.rx.policy().relock_phase(), RelockPhase::Resting);
    assert!(!bench.pin.is_high());
    assert_eq!(bench.camera.triggers(), 3);
}

#[test]
fn transmitter_back_relocks_into_feedback() {
    let mut bench = running_bench(test_receiver_config());
    bench.advance_ms(350);
    bench.transmit_for_ms(PULSE_PERIOD_MS, 3000);

    assert_eq!(bench.rx.policy().relock_phase(), RelockPhase::Locked);
    assert!(bench.rx.policy().is_feedback());
    assert!(bench.rx.detector().is_window_armed());
    assert!(bench.pin.is_high());
    assert_eq!(bench.led.count(LedSequence::SyncAcquired), 1);
    assert_eq!(bench.camera.triggers(), 3);
    assert!(!bench.timer.is_armed());
}

#[test]
fn feedback_mode_blinks_on_beam_break() {
    let config = ReceiverConfig {
        feedback_on_start: true,
        ..test_receiver_config()
    };
    let mut bench = running_bench(config);
    bench.advance_ms(150);
    assert_eq!(bench.camera.triggers(), 0);
    assert_eq!(bench.led.count(LedSequence::BeamBroken), 1);
    assert!(bench.rx.detector().is_window_armed());

    bench.transmit_for_ms(PULSE_PERIOD_MS, 200);
    bench.rx.add_ticks(DETECT_FEEDBACK_TIMEOUT_MS);
    assert!(!bench.rx.policy().is_feedback());
    bench.advance_ms(150);
    assert_eq!(bench.camera.triggers(), 1);
    assert_eq!(bench.led.count(LedSequence::BeamBroken), 1);
}

#[test]
fn busy_camera_is_left_alone() {
    let mut bench = running_bench(test_receiver_config());
    bench.camera.set_busy(true);
    bench.advance_ms(550);
    assert_eq!(bench.camera.triggers(), 0);
    assert_eq!(bench.rx.policy().relock_phase(), RelockPhase::Locked);
}

#[test]
fn stop_powers_everything_down() {
    let mut bench = running_bench(test_receiver_config());
    bench.rx.stop();
    assert!(!bench.rx.is_running());
    assert!(!bench.pin.is_high());
    assert!(!bench.rx.detector().is_window_armed());
    bench.advance_ms(500);
    assert_eq!(bench.camera.triggers(), 0);
}

#[test]
fn new_config_restarts_detection() {
    let mut bench = running_bench(test_receiver_config());
    let config = ReceiverConfig {
        window_duration_ms: 200,
        ..test_receiver_config()
    };
    bench.rx.update_config(config);
    assert!(bench.rx.is_running());
    assert_eq!(bench.rx.config(), &config);
    assert_eq!(
        bench
            .rx
            .detector()
            .timebase()
            .compare_value(CompareChannel::Window),
        ms_to_ticks(200)
    );

    bench.transmit_for_ms(PULSE_PERIOD_MS, 100);
    bench.advance_ms(150);
    assert_eq!(bench.camera.triggers(), 0);
    bench.advance_ms(100);
    assert_eq!(bench.camera.triggers(), 1);
}

#[test]
fn new_config_while_stopped_stays_stopped() {
    let mut bench = ReceiverBench::new(test_receiver_config());
    let config = ReceiverConfig {
        window_duration_ms: 300,
        ..test_receiver_config()
    };
    bench.rx.update_config(config);
    assert!(!bench.rx.is_running());
    assert!(!bench.pin.is_high());
}

#[test]
fn synced_receiver_only_powers_up_around_pulses() {
    let config = ReceiverConfig {
        sync_ms: Some(PULSE_PERIOD_MS),
        ..test_receiver_config()
    };
    let mut bench = running_bench(config);
    assert!(bench.rx.detector().is_synced());
    let switches = bench.pin.switches();
    bench.transmit_for_ms(PULSE_PERIOD_MS, 1000);
    assert_eq!(bench.camera.triggers(), 0);
    // On and off once per pulse.
    assert!(bench.pin.switches() - switches >= 2 * (1000 / PULSE_PERIOD_MS) - 2);

    bench.advance_ms(5);
    assert!(!bench.pin.is_high());
    bench.advance_ms(150);
    assert_eq!(bench.camera.triggers(), 1);
}

#[test]
fn queued_events_are_flushed_to_flash() {
    let mut nvm = NvmLogger::recover(RamFlash::new(8)).unwrap();
    let events = EventLogger::new(&mut nvm).unwrap();
    let mut bench = running_bench(test_receiver_config());
    bench.advance_ms(150);

    assert_eq!(bench.rx.flush_events(&events, &mut nvm), Ok(2));
    assert_eq!(events.count(&nvm), 2);
    let latest = events.latest(&mut nvm).unwrap().unwrap();
    assert_eq!(latest.kind, DetectionEventKind::CameraTriggered(1));
    assert!(latest.timestamp_ms > 100 && latest.timestamp_ms <= bench.now_ms());
    assert_eq!(
        events.event(1, &mut nvm).unwrap().map(|e| e.kind),
        Some(DetectionEventKind::Started)
    );

    // Nothing new since.
    assert_eq!(bench.rx.flush_events(&events, &mut nvm), Ok(0));
}

#[test]
fn shared_receiver_is_reachable_once_installed() {
    let shared: SharedSenseBeRx<SimTimebase, FakePin, FakeMsTimer, FakeCamera, FakeLed> =
        Mutex::new(RefCell::new(None));
    assert_eq!(with_receiver(&shared, |rx| rx.is_running()), None);

    let pin = FakePin::default();
    let receiver = SenseBeRx::new(
        test_receiver_config(),
        SimTimebase::new(),
        pin.clone(),
        FakeMsTimer::default(),
        FakeCamera::default(),
        FakeLed::default(),
    );
    install_receiver(&shared, receiver);
    with_receiver(&shared, |rx| rx.start());
    assert_eq!(with_receiver(&shared, |rx| rx.is_running()), Some(true));
    assert!(pin.is_high());
}
