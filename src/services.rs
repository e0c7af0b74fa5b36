// Collaborators the detection policy drives.  Their drivers live with the board support
// code, only the calls the policy makes are described here.

use fugit::{MillisDurationU32, TimerInstantU32};

pub type MsInstant = TimerInstantU32<1_000>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum TimerMode {
    SingleShot,
    Repeated,
}

/// Millisecond software timer.  Expiry is delivered by the application calling
/// `SenseBeRx::on_ms_timer_expired`.
pub trait MsTimer {
    fn start(&mut self, mode: TimerMode, duration: MillisDurationU32);
    fn stop(&mut self);
    fn now(&self) -> MsInstant;
}

pub trait CameraTrigger {
    /// Sets the pulse length used for `setup`.
    fn configure(&mut self, setup: u8, pulse: MillisDurationU32);
    /// Fire and forget.
    fn trigger(&mut self, setup: u8);
    /// A trigger pulse is still being produced.
    fn is_busy(&self) -> bool;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum LedSequence {
    /// Short blink each time the beam is broken while in feedback mode.
    BeamBroken,
    /// The receiver locked back onto the transmitter's pulses.
    SyncAcquired,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum LedPriority {
    Low,
    High,
}

pub trait LedFeedback {
    fn start(&mut self, sequence: LedSequence, priority: LedPriority);
}
