use crate::constants::{
    CONSECUTIVE_MISS_WINDOW_MS, DETECT_FEEDBACK_TIMEOUT_MS, RELOCK_LISTEN_MS, RELOCK_REST_MS,
};
use crate::detect_policy::{DetectPolicy, RelockPhase};
use crate::event_logger::DetectionEventKind;
use crate::services::LedSequence;
use crate::tests::stubs::fake_services::{FakeCamera, FakeLed, FakeMsTimer};
use crate::tssp_detect::{DetectHandler, DetectorCommand};
use test_log::test;

type TestPolicy = DetectPolicy<FakeMsTimer, FakeCamera, FakeLed>;

fn policy() -> (TestPolicy, FakeMsTimer, FakeCamera, FakeLed) {
    let timer = FakeMsTimer::default();
    let camera = FakeCamera::default();
    let led = FakeLed::default();
    let policy = DetectPolicy::new(timer.clone(), camera.clone(), led.clone());
    (policy, timer, camera, led)
}

fn miss_at(policy: &mut TestPolicy, timer: &FakeMsTimer, now_ms: u32) -> DetectorCommand {
    timer.set_now(now_ms);
    policy.on_miss()
}

fn drain_kinds(policy: &mut TestPolicy) -> Vec<DetectionEventKind> {
    std::iter::from_fn(|| policy.take_event())
        .map(|event| event.kind)
        .collect()
}

#[test]
fn start_configures_camera_and_arms_window() {
    let (mut policy, _timer, camera, _led) = policy();
    assert_eq!(policy.start(1000, false), DetectorCommand::WindowDetect);
    assert_eq!(camera.state.borrow().pulse_ms, Some(1000));
    assert!(!policy.is_feedback());
    assert_eq!(drain_kinds(&mut policy), vec![DetectionEventKind::Started]);
}

#[test]
fn third_miss_in_a_run_starts_relock() {
    let (mut policy, timer, camera, _led) = policy();
    policy.start(1000, false);
    let gap = CONSECUTIVE_MISS_WINDOW_MS;

    assert_eq!(miss_at(&mut policy, &timer, 1000), DetectorCommand::Continue);
    assert_eq!(miss_at(&mut policy, &timer, 1000 + gap), DetectorCommand::Continue);
    assert_eq!(miss_at(&mut policy, &timer, 1000 + 2 * gap), DetectorCommand::Stop);

    assert_eq!(camera.triggers(), 3);
    assert_eq!(policy.relock_phase(), RelockPhase::Resting);
    assert_eq!(timer.armed_for(), Some(RELOCK_REST_MS));
    assert_eq!(
        drain_kinds(&mut policy),
        vec![
            DetectionEventKind::Started,
            DetectionEventKind::CameraTriggered(1),
            DetectionEventKind::CameraTriggered(2),
            DetectionEventKind::SyncLost,
            DetectionEventKind::CameraTriggered(3),
        ]
    );
}

#[test]
fn late_miss_resets_the_run() {
    let (mut policy, timer, camera, _led) = policy();
    policy.start(1000, false);
    let late = CONSECUTIVE_MISS_WINDOW_MS + 1;

    miss_at(&mut policy, &timer, 0);
    miss_at(&mut policy, &timer, 500);
    assert_eq!(policy.consecutive_misses(), 1);

    // Too long after the previous one, this counts as the first miss of a new run.
    assert_eq!(miss_at(&mut policy, &timer, 500 + late), DetectorCommand::Continue);
    assert_eq!(policy.consecutive_misses(), 0);
    assert_eq!(miss_at(&mut policy, &timer, 1000 + late), DetectorCommand::Continue);
    assert_eq!(miss_at(&mut policy, &timer, 1500 + late), DetectorCommand::Stop);
    assert_eq!(camera.triggers(), 5);
}

#[test]
fn miss_gap_survives_timer_wraparound() {
    let (mut policy, timer, _camera, _led) = policy();
    policy.start(1000, false);
    miss_at(&mut policy, &timer, u32::MAX - 100);
    miss_at(&mut policy, &timer, 200);
    assert_eq!(policy.consecutive_misses(), 1);
}

#[test]
fn detection_resets_the_run() {
    let (mut policy, timer, _camera, _led) = policy();
    policy.start(1000, false);
    miss_at(&mut policy, &timer, 0);
    miss_at(&mut policy, &timer, 100);
    assert_eq!(policy.on_detect(42), DetectorCommand::Continue);
    assert_eq!(miss_at(&mut policy, &timer, 200), DetectorCommand::Continue);
    assert_eq!(policy.consecutive_misses(), 0);
}

#[test]
fn busy_camera_ignores_misses() {
    let (mut policy, timer, camera, _led) = policy();
    policy.start(1000, false);
    camera.set_busy(true);
    for now in [0, 100, 200, 300] {
        assert_eq!(miss_at(&mut policy, &timer, now), DetectorCommand::Continue);
    }
    assert_eq!(camera.triggers(), 0);
    assert_eq!(policy.consecutive_misses(), 0);
}

#[test]
fn feedback_mode_blinks_instead_of_triggering() {
    let (mut policy, timer, camera, led) = policy();
    policy.start(1000, true);
    for now in [0, 100, 200, 300] {
        assert_eq!(miss_at(&mut policy, &timer, now), DetectorCommand::Continue);
    }
    assert_eq!(camera.triggers(), 0);
    assert_eq!(led.count(LedSequence::BeamBroken), 4);
}

#[test]
fn feedback_mode_expires() {
    let (mut policy, timer, camera, _led) = policy();
    policy.start(1000, true);
    policy.add_ticks(DETECT_FEEDBACK_TIMEOUT_MS - 1);
    assert!(policy.is_feedback());
    policy.add_ticks(1);
    assert!(!policy.is_feedback());
    assert_eq!(
        drain_kinds(&mut policy),
        vec![DetectionEventKind::Started, DetectionEventKind::FeedbackExpired]
    );

    miss_at(&mut policy, &timer, 0);
    assert_eq!(camera.triggers(), 1);
}

#[test]
fn relock_alternates_rest_and_listen_until_a_pulse() {
    let (mut policy, timer, _camera, led) = policy();
    policy.start(1000, false);
    for now in [0, 100, 200] {
        miss_at(&mut policy, &timer, now);
    }
    assert_eq!(policy.relock_phase(), RelockPhase::Resting);

    for _ in 0..3 {
        assert_eq!(policy.on_timer_expired(), DetectorCommand::PulseDetect);
        assert_eq!(timer.armed_for(), Some(RELOCK_LISTEN_MS));
        assert_eq!(policy.on_timer_expired(), DetectorCommand::Stop);
        assert_eq!(timer.armed_for(), Some(RELOCK_REST_MS));
    }

    assert_eq!(policy.on_timer_expired(), DetectorCommand::PulseDetect);
    assert_eq!(policy.on_detect(120), DetectorCommand::WindowDetect);
    assert_eq!(policy.relock_phase(), RelockPhase::Locked);
    assert!(!timer.is_armed());
    assert!(policy.is_feedback());
    assert_eq!(led.count(LedSequence::SyncAcquired), 1);
    assert_eq!(
        drain_kinds(&mut policy).last(),
        Some(&DetectionEventKind::SyncAcquired(120))
    );
}

#[test]
fn timer_expiry_while_locked_is_ignored() {
    let (mut policy, _timer, _camera, _led) = policy();
    policy.start(1000, false);
    assert_eq!(policy.on_timer_expired(), DetectorCommand::Continue);
}

#[test]
fn stop_cancels_relock() {
    let (mut policy, timer, _camera, _led) = policy();
    policy.start(1000, false);
    for now in [0, 100, 200] {
        miss_at(&mut policy, &timer, now);
    }
    assert_eq!(policy.stop(), DetectorCommand::Stop);
    assert!(!timer.is_armed());
    assert_eq!(policy.on_timer_expired(), DetectorCommand::Continue);
}
