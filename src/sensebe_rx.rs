// The receiver application: one detector driving the detection policy, plus the glue
// the board's interrupt handlers and main loop call into.
//
// Interrupt handlers only touch the detector and the policy.  Anything that needs flash
// (event records, config) happens in `flush_events`, called from the main loop.

use crate::detect_policy::DetectPolicy;
use crate::device_config::ReceiverConfig;
use crate::event_logger::EventLogger;
use crate::nvm::NvmStorage;
use crate::nvm_logger::{LogError, NvmLogger};
use crate::re_exports::log::{info, warn};
use crate::services::{CameraTrigger, LedFeedback, MsTimer};
use crate::timebase::DetectTimebase;
use crate::tssp_detect::TsspDetector;
use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::digital::v2::OutputPin;

pub type Detector<T, EN, M, C, L> = TsspDetector<T, EN, DetectPolicy<M, C, L>>;

pub struct SenseBeRx<T, EN, M, C, L>
where
    T: DetectTimebase,
    EN: OutputPin,
    M: MsTimer,
    C: CameraTrigger,
    L: LedFeedback,
{
    detector: Detector<T, EN, M, C, L>,
    config: ReceiverConfig,
    running: bool,
}

impl<T, EN, M, C, L> SenseBeRx<T, EN, M, C, L>
where
    T: DetectTimebase,
    EN: OutputPin,
    M: MsTimer,
    C: CameraTrigger,
    L: LedFeedback,
{
    pub fn new(
        config: ReceiverConfig,
        timebase: T,
        en_pin: EN,
        timer: M,
        camera: C,
        led: L,
    ) -> Self {
        let policy = DetectPolicy::new(timer, camera, led);
        let detector = TsspDetector::new(config.detector_config(), timebase, en_pin, policy);
        SenseBeRx {
            detector,
            config,
            running: false,
        }
    }

    pub fn start(&mut self) {
        if let Some(sync_ms) = self.config.sync_ms {
            self.detector.window_sync(sync_ms);
        }
        let trigger_ms = self.config.trigger_duration_ms;
        let feedback = self.config.feedback_on_start;
        self.detector.dispatch(|policy| policy.start(trigger_ms, feedback));
        self.running = true;
        info!("Receiver started, window {}ms", self.config.window_duration_ms);
    }

    pub fn stop(&mut self) {
        self.detector.dispatch(DetectPolicy::stop);
        self.running = false;
        info!("Receiver stopped");
    }

    /// Applies a new config, restarting detection if it was running.
    pub fn update_config(&mut self, config: ReceiverConfig) {
        let was_running = self.running;
        if was_running {
            self.stop();
        }
        self.detector.reconfigure(config.detector_config());
        self.config = config;
        if was_running {
            self.start();
        }
    }

    /// Wall time passing, from the application's periodic tick.
    pub fn add_ticks(&mut self, interval_ms: u32) {
        self.detector.handler_mut().add_ticks(interval_ms);
    }

    pub fn on_rtc_interrupt(&mut self) {
        self.detector.on_rtc_interrupt();
    }

    pub fn on_edge_interrupt(&mut self) {
        self.detector.on_edge_interrupt();
    }

    pub fn on_ms_timer_expired(&mut self) {
        self.detector.dispatch(DetectPolicy::on_timer_expired);
    }

    /// Writes out the events queued since the last call.  Main context only.
    pub fn flush_events<F: NvmStorage>(
        &mut self,
        events: &EventLogger,
        nvm: &mut NvmLogger<F>,
    ) -> Result<usize, LogError> {
        let mut written = 0;
        while let Some(event) = self.detector.handler_mut().take_event() {
            events.log(event, nvm)?;
            written += 1;
        }
        let dropped = self.detector.handler().dropped_events();
        if dropped != 0 {
            warn!("{} detection events dropped so far", dropped);
        }
        Ok(written)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn detector(&self) -> &Detector<T, EN, M, C, L> {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut Detector<T, EN, M, C, L> {
        &mut self.detector
    }

    pub fn policy(&self) -> &DetectPolicy<M, C, L> {
        self.detector.handler()
    }
}

/// The receiver as shared between interrupt handlers and the main loop.
pub type SharedSenseBeRx<T, EN, M, C, L> = Mutex<RefCell<Option<SenseBeRx<T, EN, M, C, L>>>>;

/// Runs `f` on the shared receiver inside a critical section.  `None` until the receiver
/// has been installed.
pub fn with_receiver<T, EN, M, C, L, R>(
    shared: &SharedSenseBeRx<T, EN, M, C, L>,
    f: impl FnOnce(&mut SenseBeRx<T, EN, M, C, L>) -> R,
) -> Option<R>
where
    T: DetectTimebase,
    EN: OutputPin,
    M: MsTimer,
    C: CameraTrigger,
    L: LedFeedback,
{
    critical_section::with(|cs| shared.borrow_ref_mut(cs).as_mut().map(f))
}

pub fn install_receiver<T, EN, M, C, L>(
    shared: &SharedSenseBeRx<T, EN, M, C, L>,
    receiver: SenseBeRx<T, EN, M, C, L>,
) where
    T: DetectTimebase,
    EN: OutputPin,
    M: MsTimer,
    C: CameraTrigger,
    L: LedFeedback,
{
    critical_section::with(|cs| {
        shared.borrow_ref_mut(cs).replace(receiver);
    });
}
