use crate::services::{
    CameraTrigger, LedFeedback, LedPriority, LedSequence, MsInstant, MsTimer, TimerMode,
};
use embedded_hal::digital::v2::OutputPin;
use fugit::MillisDurationU32;
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

/// Receiver enable line.  Clones share the same level, so a test can keep one.
#[derive(Clone, Default)]
pub struct FakePin {
    high: Rc<Cell<bool>>,
    switches: Rc<Cell<u32>>,
}

impl FakePin {
    pub fn is_high(&self) -> bool {
        self.high.get()
    }

    pub fn switches(&self) -> u32 {
        self.switches.get()
    }

    fn set(&self, high: bool) {
        if self.high.get() != high {
            self.switches.set(self.switches.get() + 1);
        }
        self.high.set(high);
    }
}

impl OutputPin for FakePin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

#[derive(Default)]
pub struct TimerState {
    pub now_ms: u32,
    pub armed: Option<(TimerMode, u32)>,
    pub deadline_ms: u32,
    pub started: Vec<u32>,
}

#[derive(Clone, Default)]
pub struct FakeMsTimer {
    pub state: Rc<RefCell<TimerState>>,
}

impl FakeMsTimer {
    pub fn set_now(&self, now_ms: u32) {
        self.state.borrow_mut().now_ms = now_ms;
    }

    pub fn is_armed(&self) -> bool {
        self.state.borrow().armed.is_some()
    }

    pub fn armed_for(&self) -> Option<u32> {
        self.state.borrow().armed.map(|(_, ms)| ms)
    }

    /// Whether the timer ran out at the current time.  Re-arms repeating timers.
    pub fn poll_expired(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let Some((mode, duration)) = state.armed else {
            return false;
        };
        if state.now_ms < state.deadline_ms {
            return false;
        }
        match mode {
            TimerMode::SingleShot => state.armed = None,
            TimerMode::Repeated => state.deadline_ms += duration,
        }
        true
    }
}

impl MsTimer for FakeMsTimer {
    fn start(&mut self, mode: TimerMode, duration: MillisDurationU32) {
        let mut state = self.state.borrow_mut();
        let ms = duration.to_millis();
        state.armed = Some((mode, ms));
        state.deadline_ms = state.now_ms + ms;
        state.started.push(ms);
    }

    fn stop(&mut self) {
        self.state.borrow_mut().armed = None;
    }

    fn now(&self) -> MsInstant {
        MsInstant::from_ticks(self.state.borrow().now_ms)
    }
}

#[derive(Default)]
pub struct CameraState {
    pub busy: bool,
    pub triggers: u32,
    pub pulse_ms: Option<u32>,
}

#[derive(Clone, Default)]
pub struct FakeCamera {
    pub state: Rc<RefCell<CameraState>>,
}

impl FakeCamera {
    pub fn triggers(&self) -> u32 {
        self.state.borrow().triggers
    }

    pub fn set_busy(&self, busy: bool) {
        self.state.borrow_mut().busy = busy;
    }
}

impl CameraTrigger for FakeCamera {
    fn configure(&mut self, _setup: u8, pulse: MillisDurationU32) {
        self.state.borrow_mut().pulse_ms = Some(pulse.to_millis());
    }

    fn trigger(&mut self, _setup: u8) {
        self.state.borrow_mut().triggers += 1;
    }

    fn is_busy(&self) -> bool {
        self.state.borrow().busy
    }
}

#[derive(Clone, Default)]
pub struct FakeLed {
    pub shown: Rc<RefCell<Vec<(LedSequence, LedPriority)>>>,
}

impl FakeLed {
    pub fn count(&self, sequence: LedSequence) -> usize {
        self.shown
            .borrow()
            .iter()
            .filter(|(shown, _)| *shown == sequence)
            .count()
    }
}

impl LedFeedback for FakeLed {
    fn start(&mut self, sequence: LedSequence, priority: LedPriority) {
        self.shown.borrow_mut().push((sequence, priority));
    }
}
