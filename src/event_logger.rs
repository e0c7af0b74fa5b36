// Detection events are recorded from interrupt context into a small queue, and written
// out to their own nvm log from the main loop, where page erases are allowed to block.
use crate::byte_slice_cursor::{Cursor, CursorMut};
use crate::nvm::NvmStorage;
use crate::nvm_logger::{LogConfig, LogError, LogId, LogInitError, NvmLogger};
use crate::re_exports::log::{info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum DetectionEventKind {
    Started,
    Stopped,
    /// Too many consecutive misses, the receiver went looking for the transmitter again.
    SyncLost,
    /// A pulse ended a relock, the payload is the ticks it took.
    SyncAcquired(u32),
    /// Payload is how many misses in a row led up to the trigger.
    CameraTriggered(u32),
    FeedbackExpired,
}

impl DetectionEventKind {
    fn payload(self) -> u32 {
        use DetectionEventKind::*;
        match self {
            SyncAcquired(ticks) => ticks,
            CameraTriggered(misses) => misses,
            Started | Stopped | SyncLost | FeedbackExpired => 0,
        }
    }

    fn from_parts(code: u16, payload: u32) -> Option<DetectionEventKind> {
        use DetectionEventKind::*;
        match code {
            1 => Some(Started),
            2 => Some(Stopped),
            3 => Some(SyncLost),
            4 => Some(SyncAcquired(payload)),
            5 => Some(CameraTriggered(payload)),
            6 => Some(FeedbackExpired),
            _ => None,
        }
    }
}

impl From<DetectionEventKind> for u16 {
    fn from(kind: DetectionEventKind) -> u16 {
        use DetectionEventKind::*;
        match kind {
            Started => 1,
            Stopped => 2,
            SyncLost => 3,
            SyncAcquired(_) => 4,
            CameraTriggered(_) => 5,
            FeedbackExpired => 6,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub struct DetectionEvent {
    pub kind: DetectionEventKind,
    /// Millisecond timer reading when the event happened.
    pub timestamp_ms: u32,
}

const EVENT_CODE_LENGTH: usize = 2;
const EVENT_TIMESTAMP_LENGTH: usize = 4;
const EVENT_PAYLOAD_LENGTH: usize = 4;
pub const EVENT_LENGTH: usize = EVENT_CODE_LENGTH + EVENT_TIMESTAMP_LENGTH + EVENT_PAYLOAD_LENGTH;

pub const EVENT_LOG_CONFIG: LogConfig = LogConfig {
    log_id: 0,
    entry_size: EVENT_LENGTH,
    page_count: 2,
    start_page: 0,
};

impl DetectionEvent {
    pub fn new(kind: DetectionEventKind, timestamp_ms: u32) -> DetectionEvent {
        DetectionEvent { kind, timestamp_ms }
    }

    pub fn to_bytes(&self) -> [u8; EVENT_LENGTH] {
        let mut bytes = [0u8; EVENT_LENGTH];
        let mut cursor = CursorMut::new(&mut bytes);
        let _ = cursor.write_u16(self.kind.into());
        let _ = cursor.write_u32(self.timestamp_ms);
        let _ = cursor.write_u32(self.kind.payload());
        bytes
    }

    /// `None` for records this firmware does not know the kind of.
    pub fn from_bytes(bytes: &[u8]) -> Option<DetectionEvent> {
        let mut cursor = Cursor::new(bytes);
        let code = cursor.read_u16()?;
        let timestamp_ms = cursor.read_u32()?;
        let payload = cursor.read_u32()?;
        let kind = DetectionEventKind::from_parts(code, payload)?;
        Some(DetectionEvent { kind, timestamp_ms })
    }
}

pub const EVENT_QUEUE_LEN: usize = 8;

/// Fixed-size queue between interrupt handlers and the main loop.  When full, new events
/// are dropped and counted.
pub struct EventQueue {
    events: [Option<DetectionEvent>; EVENT_QUEUE_LEN],
    head: usize,
    len: usize,
    dropped: u32,
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::new()
    }
}

impl EventQueue {
    pub const fn new() -> EventQueue {
        EventQueue {
            events: [None; EVENT_QUEUE_LEN],
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: DetectionEvent) {
        if self.len == EVENT_QUEUE_LEN {
            self.dropped = self.dropped.saturating_add(1);
            return;
        }
        self.events[(self.head + self.len) % EVENT_QUEUE_LEN] = Some(event);
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<DetectionEvent> {
        if self.len == 0 {
            return None;
        }
        let event = self.events[self.head].take();
        self.head = (self.head + 1) % EVENT_QUEUE_LEN;
        self.len -= 1;
        event
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

pub struct EventLogger {
    log: LogId,
}

impl EventLogger {
    pub fn new<F: NvmStorage>(nvm: &mut NvmLogger<F>) -> Result<EventLogger, LogInitError> {
        let log = nvm.log_init(&EVENT_LOG_CONFIG)?;
        let logger = EventLogger { log };
        let count = logger.count(nvm);
        info!("Init EventLogger: {} events on flash", count);
        for i in (0..count).rev() {
            match logger.event(i, nvm) {
                Ok(Some(event)) => {
                    info!(
                        "Event #{}, kind {:?}, timestamp {}",
                        count - 1 - i,
                        event.kind,
                        event.timestamp_ms
                    );
                }
                Ok(None) => warn!("Unknown event kind found on flash log"),
                Err(e) => warn!("Failed reading event {}: {:?}", i, e),
            }
        }
        Ok(logger)
    }

    pub fn log_id(&self) -> LogId {
        self.log
    }

    pub fn log<F: NvmStorage>(
        &self,
        event: DetectionEvent,
        nvm: &mut NvmLogger<F>,
    ) -> Result<(), LogError> {
        nvm.feed(self.log, &event.to_bytes())
    }

    /// The `n`-th most recent event, 0 being the newest.
    pub fn event<F: NvmStorage>(
        &self,
        n: usize,
        nvm: &mut NvmLogger<F>,
    ) -> Result<Option<DetectionEvent>, LogError> {
        let mut record = [0u8; EVENT_LENGTH];
        nvm.fetch_tail(self.log, n, &mut record)?;
        Ok(DetectionEvent::from_bytes(&record))
    }

    pub fn latest<F: NvmStorage>(
        &self,
        nvm: &mut NvmLogger<F>,
    ) -> Result<Option<DetectionEvent>, LogError> {
        self.event(0, nvm)
    }

    pub fn count<F: NvmStorage>(&self, nvm: &NvmLogger<F>) -> usize {
        nvm.total_entries(self.log).unwrap_or(0)
    }

    pub fn has_events_to_offload<F: NvmStorage>(&self, nvm: &NvmLogger<F>) -> bool {
        self.count(nvm) != 0
    }

    pub fn clear<F: NvmStorage>(&self, nvm: &mut NvmLogger<F>) -> Result<(), LogError> {
        nvm.empty_log(self.log)
    }
}
