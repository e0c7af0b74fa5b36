// The detection timebase is a free-running low-frequency counter with compare channels,
// one edge-capture input channel, and an event fabric that can route the edge straight to
// counter tasks without the CPU getting involved.  On the nRF52 that is RTC0 + GPIOTE +
// PPI + EGU0.  Interrupts are only taken where a callback has to run.

use crate::constants::TIMEBASE_FREQ_HZ;
use fugit::TimerDurationU32;

pub type DetectTicks = TimerDurationU32<TIMEBASE_FREQ_HZ>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum CompareChannel {
    /// Powers the receiver up just before a synced pulse is due.
    SyncOn,
    /// Powers the receiver down again once the pulse slot has passed.
    SyncOff,
    /// Fires when no qualifying edge arrived within the detection window.
    Window,
}

impl CompareChannel {
    pub const ALL: [CompareChannel; 3] = [
        CompareChannel::SyncOn,
        CompareChannel::SyncOff,
        CompareChannel::Window,
    ];

    pub const fn index(self) -> usize {
        match self {
            CompareChannel::SyncOn => 0,
            CompareChannel::SyncOff => 1,
            CompareChannel::Window => 2,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum Edge {
    HighToLow,
    LowToHigh,
}

impl Edge {
    /// The receiver output sits at the opposite level while idle, so a pulse shows up as
    /// the edge *into* its detect logic level.
    pub const fn for_logic_level(detect_logic_level: bool) -> Edge {
        if detect_logic_level {
            Edge::LowToHigh
        } else {
            Edge::HighToLow
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum EventLink {
    /// Edge event -> counter clear task.  Restarts the window in hardware.
    EdgeClearsCounter,
    /// Edge event -> software interrupt, so the detect callback can run.
    EdgeRaisesSwi,
}

pub trait DetectTimebase {
    fn counter(&self) -> u32;
    fn start(&mut self);
    fn stop(&mut self);
    fn clear(&mut self);

    fn set_compare(&mut self, channel: CompareChannel, ticks: u32);
    fn set_compare_interrupt(&mut self, channel: CompareChannel, enabled: bool);
    /// Returns whether the compare event was pending, and clears it.
    fn take_compare_event(&mut self, channel: CompareChannel) -> bool;
    fn set_counter_irq(&mut self, enabled: bool);

    /// Connects the edge-capture channel to `pin`, or disconnects it with `None`.
    fn configure_edge(&mut self, pin: u8, edge: Option<Edge>);
    fn clear_edge_event(&mut self);
    /// Counter value latched at the last qualifying edge, before any clear it triggered.
    fn captured(&self) -> u32;

    fn set_link(&mut self, link: EventLink, enabled: bool);
    fn set_swi_interrupt(&mut self, enabled: bool);
    fn take_swi_event(&mut self) -> bool;
}

pub const fn ms_to_ticks(ms: u32) -> u32 {
    DetectTicks::millis(ms).ticks()
}

pub fn ticks_to_ms(ticks: u32) -> u32 {
    DetectTicks::from_ticks(ticks).to_millis()
}
