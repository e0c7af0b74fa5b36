// RTC0 + GPIOTE + PPI + EGU0 implementation of the detection timebase for the nRF52832.
//
// The RTC has no capture task, so the counter at an edge is read in the SWI handler the
// EGU raises.  While an edge report is armed the PPI clear link is therefore held off and
// the clear is done in software right after the counter is latched, otherwise the handler
// would only ever see a counter that was just reset.  With no report armed the edge clears
// the counter in hardware, with no CPU involvement.

use crate::constants::{TIMEBASE_COUNTER_MASK, TIMEBASE_PRESCALER};
use crate::timebase::{CompareChannel, DetectTimebase, Edge, EventLink};

// Register map from the nRF52832 product specification, sections 15, 21, 24 and 25.
pub const RTC0_BASE: u32 = 0x4000_B000;
pub const RTC_TASKS_START: u32 = RTC0_BASE;
pub const RTC_TASKS_STOP: u32 = RTC0_BASE + 0x004;
pub const RTC_TASKS_CLEAR: u32 = RTC0_BASE + 0x008;
pub const RTC_EVENTS_COMPARE0: u32 = RTC0_BASE + 0x140;
pub const RTC_INTENSET: u32 = RTC0_BASE + 0x304;
pub const RTC_INTENCLR: u32 = RTC0_BASE + 0x308;
pub const RTC_COUNTER: u32 = RTC0_BASE + 0x504;
pub const RTC_PRESCALER: u32 = RTC0_BASE + 0x508;
pub const RTC_CC0: u32 = RTC0_BASE + 0x540;
const RTC_INTEN_COMPARE0_POS: u32 = 16;

pub const GPIOTE_BASE: u32 = 0x4000_6000;
pub const GPIOTE_CHANNEL: u32 = 0;
pub const GPIOTE_EVENTS_IN: u32 = GPIOTE_BASE + 0x100 + 4 * GPIOTE_CHANNEL;
pub const GPIOTE_CONFIG: u32 = GPIOTE_BASE + 0x510 + 4 * GPIOTE_CHANNEL;
const GPIOTE_CONFIG_MODE_EVENT: u32 = 1;
const GPIOTE_CONFIG_PSEL_POS: u32 = 8;
const GPIOTE_CONFIG_PSEL_MASK: u32 = 0x1f;
const GPIOTE_CONFIG_POLARITY_POS: u32 = 16;
const GPIOTE_POLARITY_LO_TO_HI: u32 = 1;
const GPIOTE_POLARITY_HI_TO_LO: u32 = 2;

pub const EGU0_BASE: u32 = 0x4001_4000;
pub const EGU_CHANNEL: u32 = 0;
pub const EGU_TASKS_TRIGGER: u32 = EGU0_BASE + 4 * EGU_CHANNEL;
pub const EGU_EVENTS_TRIGGERED: u32 = EGU0_BASE + 0x100 + 4 * EGU_CHANNEL;
pub const EGU_INTENSET: u32 = EGU0_BASE + 0x304;
pub const EGU_INTENCLR: u32 = EGU0_BASE + 0x308;

pub const PPI_BASE: u32 = 0x4001_F000;
pub const PPI_CHENSET: u32 = PPI_BASE + 0x504;
pub const PPI_CHENCLR: u32 = PPI_BASE + 0x508;
pub const PPI_CLEAR_CHANNEL: u32 = 1;
pub const PPI_SWI_CHANNEL: u32 = 2;

pub const NVIC_ISER: u32 = 0xE000_E100;
pub const NVIC_ICER: u32 = 0xE000_E180;
pub const NVIC_ICPR: u32 = 0xE000_E280;
pub const RTC0_IRQ: u32 = 11;
pub const SWI0_EGU0_IRQ: u32 = 20;

pub const fn ppi_eep(channel: u32) -> u32 {
    PPI_BASE + 0x510 + 8 * channel
}

pub const fn ppi_tep(channel: u32) -> u32 {
    PPI_BASE + 0x514 + 8 * channel
}

#[allow(clippy::cast_possible_truncation)]
const fn channel_no(channel: CompareChannel) -> u32 {
    channel.index() as u32
}

const fn rtc_compare_event(channel: CompareChannel) -> u32 {
    RTC_EVENTS_COMPARE0 + 4 * channel_no(channel)
}

const fn rtc_cc(channel: CompareChannel) -> u32 {
    RTC_CC0 + 4 * channel_no(channel)
}

const fn rtc_compare_inten(channel: CompareChannel) -> u32 {
    1 << (RTC_INTEN_COMPARE0_POS + channel_no(channel))
}

/// GPIOTE CONFIG value for an event channel on `pin`, or the disabled channel.
pub fn gpiote_config(pin: u8, edge: Option<Edge>) -> u32 {
    match edge {
        None => 0,
        Some(edge) => {
            let polarity = match edge {
                Edge::LowToHigh => GPIOTE_POLARITY_LO_TO_HI,
                Edge::HighToLow => GPIOTE_POLARITY_HI_TO_LO,
            };
            GPIOTE_CONFIG_MODE_EVENT
                | ((u32::from(pin) & GPIOTE_CONFIG_PSEL_MASK) << GPIOTE_CONFIG_PSEL_POS)
                | (polarity << GPIOTE_CONFIG_POLARITY_POS)
        }
    }
}

/// 32-bit peripheral register access by address.
pub trait Registers {
    fn read(&self, addr: u32) -> u32;
    fn write(&mut self, addr: u32, value: u32);
}

/// Volatile access to the memory mapped peripherals.
#[cfg(target_os = "none")]
pub struct Mmio(());

#[cfg(target_os = "none")]
impl Mmio {
    /// # Safety
    /// The caller hands over RTC0, GPIOTE channel 0, PPI channels 1 and 2 and EGU0
    /// channel 0.  Nothing else may touch them while the timebase exists.
    pub unsafe fn steal() -> Mmio {
        Mmio(())
    }
}

#[cfg(target_os = "none")]
impl Registers for Mmio {
    fn read(&self, addr: u32) -> u32 {
        // SAFETY: only called with the register addresses above.
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    fn write(&mut self, addr: u32, value: u32) {
        // SAFETY: only called with the register addresses above, owned through `steal`.
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }
}

pub struct NrfTimebase<R: Registers> {
    regs: R,
    clear_link: bool,
    swi_link: bool,
    captured: u32,
}

impl<R: Registers> NrfTimebase<R> {
    /// Stops the RTC, programs the tick rate and points both PPI channels at the edge
    /// event.  Neither channel is enabled yet.
    pub fn new(mut regs: R) -> NrfTimebase<R> {
        regs.write(RTC_TASKS_STOP, 1);
        regs.write(RTC_PRESCALER, TIMEBASE_PRESCALER);
        regs.write(PPI_CHENCLR, (1 << PPI_CLEAR_CHANNEL) | (1 << PPI_SWI_CHANNEL));
        regs.write(ppi_eep(PPI_CLEAR_CHANNEL), GPIOTE_EVENTS_IN);
        regs.write(ppi_tep(PPI_CLEAR_CHANNEL), RTC_TASKS_CLEAR);
        regs.write(ppi_eep(PPI_SWI_CHANNEL), GPIOTE_EVENTS_IN);
        regs.write(ppi_tep(PPI_SWI_CHANNEL), EGU_TASKS_TRIGGER);
        NrfTimebase {
            regs,
            clear_link: false,
            swi_link: false,
            captured: 0,
        }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    fn route(&mut self) {
        let hw_clear = self.clear_link && !self.swi_link;
        let clear = if hw_clear { PPI_CHENSET } else { PPI_CHENCLR };
        self.regs.write(clear, 1 << PPI_CLEAR_CHANNEL);
        let swi = if self.swi_link { PPI_CHENSET } else { PPI_CHENCLR };
        self.regs.write(swi, 1 << PPI_SWI_CHANNEL);
    }

    fn set_irq(&mut self, irq: u32, enabled: bool) {
        let reg = if enabled { NVIC_ISER } else { NVIC_ICER };
        self.regs.write(reg, 1 << irq);
    }
}

impl<R: Registers> DetectTimebase for NrfTimebase<R> {
    fn counter(&self) -> u32 {
        self.regs.read(RTC_COUNTER) & TIMEBASE_COUNTER_MASK
    }

    fn start(&mut self) {
        self.regs.write(RTC_TASKS_START, 1);
    }

    fn stop(&mut self) {
        self.regs.write(RTC_TASKS_STOP, 1);
    }

    fn clear(&mut self) {
        self.regs.write(RTC_TASKS_CLEAR, 1);
    }

    fn set_compare(&mut self, channel: CompareChannel, ticks: u32) {
        self.regs.write(rtc_cc(channel), ticks & TIMEBASE_COUNTER_MASK);
    }

    fn set_compare_interrupt(&mut self, channel: CompareChannel, enabled: bool) {
        let reg = if enabled { RTC_INTENSET } else { RTC_INTENCLR };
        self.regs.write(reg, rtc_compare_inten(channel));
    }

    fn take_compare_event(&mut self, channel: CompareChannel) -> bool {
        let addr = rtc_compare_event(channel);
        let pending = self.regs.read(addr) != 0;
        if pending {
            self.regs.write(addr, 0);
        }
        pending
    }

    fn set_counter_irq(&mut self, enabled: bool) {
        self.set_irq(RTC0_IRQ, enabled);
    }

    fn configure_edge(&mut self, pin: u8, edge: Option<Edge>) {
        self.regs.write(GPIOTE_CONFIG, gpiote_config(pin, edge));
    }

    fn clear_edge_event(&mut self) {
        self.regs.write(GPIOTE_EVENTS_IN, 0);
    }

    fn captured(&self) -> u32 {
        self.captured
    }

    fn set_link(&mut self, link: EventLink, enabled: bool) {
        match link {
            EventLink::EdgeClearsCounter => self.clear_link = enabled,
            EventLink::EdgeRaisesSwi => self.swi_link = enabled,
        }
        self.route();
    }

    fn set_swi_interrupt(&mut self, enabled: bool) {
        if enabled {
            self.regs.write(EGU_INTENSET, 1 << EGU_CHANNEL);
            self.regs.write(NVIC_ICPR, 1 << SWI0_EGU0_IRQ);
        } else {
            self.regs.write(EGU_INTENCLR, 1 << EGU_CHANNEL);
        }
        self.set_irq(SWI0_EGU0_IRQ, enabled);
    }

    fn take_swi_event(&mut self) -> bool {
        if self.regs.read(EGU_EVENTS_TRIGGERED) == 0 {
            return false;
        }
        self.regs.write(EGU_EVENTS_TRIGGERED, 0);
        self.captured = self.counter();
        if self.clear_link && self.swi_link {
            self.clear();
        }
        true
    }
}
