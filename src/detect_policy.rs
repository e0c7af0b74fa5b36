// What a beam break means for the camera.
//
// Misses (the beam stayed broken for a whole window) trigger the camera, unless they come
// in a tight run: three misses each within CONSECUTIVE_MISS_WINDOW_MS of the previous one
// mean we have most likely lost the transmitter rather than seen something cross the
// beam.  The receiver then alternates between resting and briefly listening for a pulse
// until it locks back on.
//
// After a relock (and optionally at start) the receiver spends a while in feedback mode,
// where a miss only blinks the LED so the beam can be aligned without taking pictures.

use crate::constants::{
    CAMERA_TRIGGER_SETUP, CONSECUTIVE_MISS_WINDOW_MS, DETECT_FEEDBACK_TIMEOUT_MS,
    RELOCK_LISTEN_MS, RELOCK_REST_MS, SYNC_LOSS_MISS_COUNT,
};
use crate::event_logger::{DetectionEvent, DetectionEventKind, EventQueue};
use crate::re_exports::log::{debug, info};
use crate::services::{
    CameraTrigger, LedFeedback, LedPriority, LedSequence, MsInstant, MsTimer, TimerMode,
};
use crate::tssp_detect::{DetectHandler, DetectorCommand};
use fugit::MillisDurationU32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum RelockPhase {
    Locked,
    /// Receiver off, waiting for the rest timer.
    Resting,
    /// Receiver on, waiting for a pulse until the listen timer runs out.
    Listening,
}

pub struct DetectPolicy<M, C, L>
where
    M: MsTimer,
    C: CameraTrigger,
    L: LedFeedback,
{
    timer: M,
    camera: C,
    led: L,
    feedback: bool,
    feedback_elapsed_ms: u32,
    consecutive_misses: u32,
    previous_miss: Option<MsInstant>,
    relock: RelockPhase,
    events: EventQueue,
}

impl<M, C, L> DetectPolicy<M, C, L>
where
    M: MsTimer,
    C: CameraTrigger,
    L: LedFeedback,
{
    pub fn new(timer: M, camera: C, led: L) -> Self {
        DetectPolicy {
            timer,
            camera,
            led,
            feedback: false,
            feedback_elapsed_ms: 0,
            consecutive_misses: 0,
            previous_miss: None,
            relock: RelockPhase::Locked,
            events: EventQueue::new(),
        }
    }

    /// Resets the policy and returns the command that starts detection.
    pub fn start(&mut self, trigger_duration_ms: u32, feedback_on_start: bool) -> DetectorCommand {
        self.timer.stop();
        self.camera.configure(
            CAMERA_TRIGGER_SETUP,
            MillisDurationU32::millis(trigger_duration_ms),
        );
        self.feedback = feedback_on_start;
        self.feedback_elapsed_ms = 0;
        self.consecutive_misses = 0;
        self.previous_miss = None;
        self.relock = RelockPhase::Locked;
        self.record(DetectionEventKind::Started);
        DetectorCommand::WindowDetect
    }

    pub fn stop(&mut self) -> DetectorCommand {
        self.timer.stop();
        self.relock = RelockPhase::Locked;
        self.record(DetectionEventKind::Stopped);
        DetectorCommand::Stop
    }

    /// Advances feedback mode by `interval_ms` of wall time.
    pub fn add_ticks(&mut self, interval_ms: u32) {
        if !self.feedback {
            return;
        }
        self.feedback_elapsed_ms = self.feedback_elapsed_ms.saturating_add(interval_ms);
        if self.feedback_elapsed_ms >= DETECT_FEEDBACK_TIMEOUT_MS {
            self.feedback = false;
            self.feedback_elapsed_ms = 0;
            info!("Feedback mode over, triggering on misses");
            self.record(DetectionEventKind::FeedbackExpired);
        }
    }

    /// Millisecond timer expiry, drives the relock cycle.
    pub fn on_timer_expired(&mut self) -> DetectorCommand {
        match self.relock {
            RelockPhase::Locked => DetectorCommand::Continue,
            RelockPhase::Resting => {
                self.relock = RelockPhase::Listening;
                self.start_timer(RELOCK_LISTEN_MS);
                DetectorCommand::PulseDetect
            }
            RelockPhase::Listening => {
                self.relock = RelockPhase::Resting;
                self.start_timer(RELOCK_REST_MS);
                DetectorCommand::Stop
            }
        }
    }

    pub fn is_feedback(&self) -> bool {
        self.feedback
    }

    pub fn relock_phase(&self) -> RelockPhase {
        self.relock
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn take_event(&mut self) -> Option<DetectionEvent> {
        self.events.pop()
    }

    pub fn dropped_events(&self) -> u32 {
        self.events.dropped()
    }

    pub fn timer(&self) -> &M {
        &self.timer
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn led(&self) -> &L {
        &self.led
    }

    fn start_timer(&mut self, ms: u32) {
        self.timer.start(TimerMode::SingleShot, MillisDurationU32::millis(ms));
    }

    fn record(&mut self, kind: DetectionEventKind) {
        let timestamp_ms = self.timer.now().ticks();
        self.events.push(DetectionEvent::new(kind, timestamp_ms));
    }
}

impl<M, C, L> DetectHandler for DetectPolicy<M, C, L>
where
    M: MsTimer,
    C: CameraTrigger,
    L: LedFeedback,
{
    fn on_miss(&mut self) -> DetectorCommand {
        if self.camera.is_busy() {
            return DetectorCommand::Continue;
        }
        if self.feedback {
            self.led.start(LedSequence::BeamBroken, LedPriority::High);
            return DetectorCommand::Continue;
        }

        let now = self.timer.now();
        let in_run = self.previous_miss.is_some_and(|previous| {
            now.ticks().wrapping_sub(previous.ticks()) <= CONSECUTIVE_MISS_WINDOW_MS
        });
        self.consecutive_misses = if in_run {
            self.consecutive_misses + 1
        } else {
            0
        };
        self.previous_miss = Some(now);
        debug!("Miss, {} before it in the same run", self.consecutive_misses);

        let run = self.consecutive_misses + 1;
        let mut command = DetectorCommand::Continue;
        if run >= SYNC_LOSS_MISS_COUNT {
            info!("Lost the transmitter after {} misses, relocking", run);
            self.consecutive_misses = 0;
            self.previous_miss = None;
            self.relock = RelockPhase::Resting;
            self.start_timer(RELOCK_REST_MS);
            self.record(DetectionEventKind::SyncLost);
            command = DetectorCommand::Stop;
        }
        self.camera.trigger(CAMERA_TRIGGER_SETUP);
        self.record(DetectionEventKind::CameraTriggered(run));
        command
    }

    fn on_detect(&mut self, ticks: u32) -> DetectorCommand {
        self.consecutive_misses = 0;
        self.previous_miss = None;
        if self.relock == RelockPhase::Locked {
            return DetectorCommand::Continue;
        }
        self.timer.stop();
        self.relock = RelockPhase::Locked;
        self.feedback = true;
        self.feedback_elapsed_ms = 0;
        self.led.start(LedSequence::SyncAcquired, LedPriority::Low);
        info!("Relocked onto the transmitter");
        self.record(DetectionEventKind::SyncAcquired(ticks));
        DetectorCommand::WindowDetect
    }
}
