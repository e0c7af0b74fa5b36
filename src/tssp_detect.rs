// Beam-break detection on a TSSP-type IR receiver.
//
// Two modes share one timebase counter and one edge-capture channel:
//
// * window mode: the counter restarts on every qualifying edge (routed in hardware), and
//   a compare at the window length means the beam was broken for a whole window.  That
//   raises a *miss*, the window is restarted and we keep watching.
// * pulse mode: single shot, the next qualifying edge is reported together with the
//   number of ticks since arming (since the last window restart if window mode is armed
//   too, the counter is shared).
//
// Arming either mode also arms a single-shot edge report, which hands the captured
// counter value to the handler's `on_detect`.  Misses do not re-arm it.
//
// When the transmitter sends pulses at a known period, `window_sync` keeps the receiver
// powered only around the moment a pulse is due.  Each pulse clears the counter, so the
// two sync compares fire at the same offsets every period without being reprogrammed.
//
// The receiver enable line is only driven low once neither mode is armed.

use crate::constants::HALF_SYNC_ENABLE_MS;
use crate::re_exports::log::{debug, info, warn};
use crate::timebase::{ms_to_ticks, ticks_to_ms, CompareChannel, DetectTimebase, Edge, EventLink};
use embedded_hal::digital::v2::OutputPin;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub struct DetectorConfig {
    pub rx_en_pin: u8,
    pub rx_in_pin: u8,
    /// Level the receiver output goes to while it sees the transmitter's carrier.
    pub detect_logic_level: bool,
    pub window_duration_ms: u32,
}

/// What the detector should do once a handler callback returns.  Callbacks run in
/// interrupt context with the detector borrowed, so they ask for state changes instead of
/// making them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum DetectorCommand {
    Continue,
    Stop,
    WindowDetect,
    PulseDetect,
}

pub trait DetectHandler {
    /// No qualifying edge within a full window.
    fn on_miss(&mut self) -> DetectorCommand;
    /// A qualifying edge arrived `ticks` after the window (or pulse wait) started.
    fn on_detect(&mut self, ticks: u32) -> DetectorCommand;
}

pub struct TsspDetector<T, EN, H>
where
    T: DetectTimebase,
    EN: OutputPin,
    H: DetectHandler,
{
    config: DetectorConfig,
    timebase: T,
    en_pin: EN,
    handler: H,
    pulse_armed: bool,
    window_armed: bool,
    sync_ticks: Option<u32>,
    receiver_on: bool,
}

impl<T, EN, H> TsspDetector<T, EN, H>
where
    T: DetectTimebase,
    EN: OutputPin,
    H: DetectHandler,
{
    pub fn new(config: DetectorConfig, timebase: T, en_pin: EN, handler: H) -> Self {
        let mut detector = TsspDetector {
            config,
            timebase,
            en_pin,
            handler,
            pulse_armed: false,
            window_armed: false,
            sync_ticks: None,
            receiver_on: true,
        };
        detector.init();
        detector
    }

    fn init(&mut self) {
        self.set_receiver_power(false);
        self.timebase.stop();
        self.timebase.clear();
        self.timebase.set_counter_irq(false);
        for channel in CompareChannel::ALL {
            self.timebase.set_compare_interrupt(channel, false);
            self.timebase.take_compare_event(channel);
        }
        self.timebase
            .set_compare(CompareChannel::Window, ms_to_ticks(self.config.window_duration_ms));
        self.timebase.configure_edge(self.config.rx_in_pin, None);
        self.timebase.set_link(EventLink::EdgeClearsCounter, false);
        self.disarm_edge_report();
        debug!(
            "Detector on pin {}, window {}ms",
            self.config.rx_in_pin, self.config.window_duration_ms
        );
    }

    /// Stops everything and applies a new configuration.  Both modes are left disarmed.
    pub fn reconfigure(&mut self, config: DetectorConfig) {
        self.stop();
        self.sync_stop();
        self.config = config;
        self.init();
    }

    /// Starts (or restarts) a detection window.  A miss is raised every
    /// `window_duration_ms` without a qualifying edge.
    pub fn window_detect(&mut self) {
        self.window_armed = true;
        let channel = CompareChannel::Window;
        self.timebase.take_compare_event(channel);
        self.timebase.set_compare_interrupt(channel, true);
        self.timebase.set_counter_irq(true);
        self.timebase.set_link(EventLink::EdgeClearsCounter, true);
        self.arm_edge_report();
        self.timebase.clear();
        self.timebase.start();
        if self.sync_ticks.is_some() {
            self.enable_sync_compares();
        } else {
            self.set_receiver_power(true);
        }
    }

    /// Waits for one qualifying edge and reports the counter value at the edge.  That is
    /// the ticks since this call, unless window mode is armed: the counter is then left
    /// alone and the value is the ticks since the window last restarted.
    pub fn pulse_detect(&mut self) {
        self.pulse_armed = true;
        self.arm_edge_report();
        if !self.window_armed {
            self.timebase.clear();
        }
        self.timebase.start();
        self.set_receiver_power(true);
    }

    /// Switches the receiver to synced duty cycling for a transmitter pulsing every
    /// `sync_ms`.  The receiver is powered from `HALF_SYNC_ENABLE_MS` before a pulse is due
    /// until `HALF_SYNC_ENABLE_MS` after it.
    pub fn window_sync(&mut self, sync_ms: u32) {
        let period = ms_to_ticks(sync_ms);
        let half = ms_to_ticks(HALF_SYNC_ENABLE_MS);
        if period <= 2 * half {
            warn!("Sync period {}ms too short, staying powered", sync_ms);
            return;
        }
        self.timebase.set_compare(CompareChannel::SyncOn, period - half);
        self.timebase.set_compare(CompareChannel::SyncOff, half);
        self.sync_ticks = Some(period);
        if self.window_armed {
            self.enable_sync_compares();
        }
        info!("Synced to {}ms transmitter period", sync_ms);
    }

    /// Back to keeping the receiver powered for as long as a mode is armed.
    pub fn sync_stop(&mut self) {
        self.sync_ticks = None;
        for channel in [CompareChannel::SyncOn, CompareChannel::SyncOff] {
            self.timebase.set_compare_interrupt(channel, false);
        }
        if self.window_armed || self.pulse_armed {
            self.set_receiver_power(true);
        }
    }

    pub fn pulse_stop(&mut self) {
        self.pulse_armed = false;
        if !self.window_armed {
            self.disarm_edge_report();
        }
        self.release_if_idle();
    }

    /// Disarms window mode.  A configured sync period is kept and resumes with the next
    /// `window_detect`.
    pub fn window_stop(&mut self) {
        self.window_armed = false;
        for channel in CompareChannel::ALL {
            self.timebase.set_compare_interrupt(channel, false);
        }
        self.timebase.set_counter_irq(false);
        self.timebase.set_link(EventLink::EdgeClearsCounter, false);
        if !self.pulse_armed {
            self.disarm_edge_report();
        }
        self.release_if_idle();
    }

    pub fn stop(&mut self) {
        self.pulse_stop();
        self.window_stop();
    }

    /// RTC compare interrupt.
    pub fn on_rtc_interrupt(&mut self) {
        let synced = self.sync_ticks.is_some() && self.window_armed;
        if self.timebase.take_compare_event(CompareChannel::SyncOn) && synced {
            self.set_receiver_power(true);
        }
        if self.timebase.take_compare_event(CompareChannel::SyncOff) && synced {
            self.set_receiver_power(false);
        }
        if self.timebase.take_compare_event(CompareChannel::Window) && self.window_armed {
            self.timebase.clear();
            let command = self.handler.on_miss();
            self.apply(command);
        }
    }

    /// Software interrupt raised by a reported edge.
    pub fn on_edge_interrupt(&mut self) {
        if !self.timebase.take_swi_event() {
            return;
        }
        self.disarm_edge_report();
        let ticks = self.timebase.captured();
        debug!("Edge after {} ticks (~{}ms)", ticks, ticks_to_ms(ticks));
        self.pulse_armed = false;
        let command = self.handler.on_detect(ticks);
        self.apply(command);
        self.release_if_idle();
    }

    /// Runs `f` on the handler and applies the command it returns.  Used to feed the
    /// handler events that do not come from the timebase.
    pub fn dispatch<F>(&mut self, f: F)
    where
        F: FnOnce(&mut H) -> DetectorCommand,
    {
        let command = f(&mut self.handler);
        self.apply(command);
    }

    /// Swaps the callbacks, returning the previous handler.
    pub fn set_handler(&mut self, handler: H) -> H {
        core::mem::replace(&mut self.handler, handler)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn timebase(&self) -> &T {
        &self.timebase
    }

    pub fn timebase_mut(&mut self) -> &mut T {
        &mut self.timebase
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn is_window_armed(&self) -> bool {
        self.window_armed
    }

    pub fn is_pulse_armed(&self) -> bool {
        self.pulse_armed
    }

    pub fn is_synced(&self) -> bool {
        self.sync_ticks.is_some()
    }

    pub fn is_receiver_on(&self) -> bool {
        self.receiver_on
    }

    fn apply(&mut self, command: DetectorCommand) {
        match command {
            DetectorCommand::Continue => {}
            DetectorCommand::Stop => self.stop(),
            DetectorCommand::WindowDetect => self.window_detect(),
            DetectorCommand::PulseDetect => self.pulse_detect(),
        }
    }

    fn enable_sync_compares(&mut self) {
        for channel in [CompareChannel::SyncOn, CompareChannel::SyncOff] {
            self.timebase.take_compare_event(channel);
            self.timebase.set_compare_interrupt(channel, true);
        }
    }

    fn arm_edge_report(&mut self) {
        let edge = Edge::for_logic_level(self.config.detect_logic_level);
        self.timebase.clear_edge_event();
        self.timebase.configure_edge(self.config.rx_in_pin, Some(edge));
        self.timebase.take_swi_event();
        self.timebase.set_swi_interrupt(true);
        self.timebase.set_link(EventLink::EdgeRaisesSwi, true);
    }

    fn disarm_edge_report(&mut self) {
        self.timebase.set_link(EventLink::EdgeRaisesSwi, false);
        self.timebase.set_swi_interrupt(false);
    }

    fn release_if_idle(&mut self) {
        if self.pulse_armed || self.window_armed {
            return;
        }
        self.timebase.configure_edge(self.config.rx_in_pin, None);
        self.timebase.stop();
        self.timebase.clear();
        self.set_receiver_power(false);
    }

    fn set_receiver_power(&mut self, on: bool) {
        if on == self.receiver_on {
            return;
        }
        let result = if on {
            self.en_pin.set_high()
        } else {
            self.en_pin.set_low()
        };
        if result.is_err() {
            warn!("Failed to switch receiver enable pin {}", self.config.rx_en_pin);
            return;
        }
        self.receiver_on = on;
    }
}
