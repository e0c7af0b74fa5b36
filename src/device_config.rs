use crate::byte_slice_cursor::{Cursor, CursorMut};
use crate::constants::{CONFIG_LAYOUT_VERSION, DEFAULT_TRIGGER_DURATION_MS, HALF_SYNC_ENABLE_MS};
use crate::nvm::NvmStorage;
use crate::nvm_logger::{LogConfig, LogError, LogId, LogInitError, NvmLogger};
use crate::re_exports::log::{info, warn};
use crate::tssp_detect::DetectorConfig;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum ConfigError {
    Uninitialised,
    Truncated,
    Invalid,
    Log(LogError),
}

impl From<LogError> for ConfigError {
    fn from(err: LogError) -> Self {
        ConfigError::Log(err)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub struct ReceiverConfig {
    pub rx_en_pin: u8,
    pub rx_in_pin: u8,
    pub window_duration_ms: u32,
    pub detect_logic_level: bool,
    /// Transmitter pulse period, when the receiver should only listen around each pulse.
    pub sync_ms: Option<u32>,
    pub trigger_duration_ms: u32,
    pub feedback_on_start: bool,
}

pub const CONFIG_RECORD_LEN: usize = 4 + 1 + 1 + 4 + 1 + 1 + 4 + 4 + 1;

pub const CONFIG_LOG_CONFIG: LogConfig = LogConfig {
    log_id: 1,
    entry_size: CONFIG_RECORD_LEN,
    // Two pages, so rotating onto an erased page never takes the newest config with it.
    page_count: 2,
    start_page: 2,
};

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            rx_en_pin: 3,
            rx_in_pin: 4,
            window_duration_ms: 100,
            detect_logic_level: false,
            sync_ms: None,
            trigger_duration_ms: DEFAULT_TRIGGER_DURATION_MS,
            feedback_on_start: true,
        }
    }
}

impl ReceiverConfig {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            rx_en_pin: self.rx_en_pin,
            rx_in_pin: self.rx_in_pin,
            detect_logic_level: self.detect_logic_level,
            window_duration_ms: self.window_duration_ms,
        }
    }

    /// A sync period has to leave room for the receiver to be off between pulses, and
    /// a pulse has to be due inside every window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_duration_ms == 0 || self.trigger_duration_ms == 0 {
            return Err(ConfigError::Invalid);
        }
        if let Some(sync_ms) = self.sync_ms {
            if sync_ms <= 2 * HALF_SYNC_ENABLE_MS || sync_ms >= self.window_duration_ms {
                return Err(ConfigError::Invalid);
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; CONFIG_RECORD_LEN] {
        let mut bytes = [0u8; CONFIG_RECORD_LEN];
        let mut cursor = CursorMut::new(&mut bytes);
        let _ = cursor.write_u32(CONFIG_LAYOUT_VERSION);
        let _ = cursor.write_u8(self.rx_en_pin);
        let _ = cursor.write_u8(self.rx_in_pin);
        let _ = cursor.write_u32(self.window_duration_ms);
        let _ = cursor.write_bool(self.detect_logic_level);
        let _ = cursor.write_bool(self.sync_ms.is_some());
        let _ = cursor.write_u32(self.sync_ms.unwrap_or(0));
        let _ = cursor.write_u32(self.trigger_duration_ms);
        let _ = cursor.write_bool(self.feedback_on_start);
        bytes
    }

    fn read_fields(cursor: &mut Cursor) -> Option<ReceiverConfig> {
        let rx_en_pin = cursor.read_u8()?;
        let rx_in_pin = cursor.read_u8()?;
        let window_duration_ms = cursor.read_u32()?;
        let detect_logic_level = cursor.read_bool()?;
        let has_sync = cursor.read_bool()?;
        let sync_ms = cursor.read_u32()?;
        let trigger_duration_ms = cursor.read_u32()?;
        let feedback_on_start = cursor.read_bool()?;
        Some(ReceiverConfig {
            rx_en_pin,
            rx_in_pin,
            window_duration_ms,
            detect_logic_level,
            sync_ms: has_sync.then_some(sync_ms),
            trigger_duration_ms,
            feedback_on_start,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ReceiverConfig, ConfigError> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u32().ok_or(ConfigError::Truncated)?;
        if version == u32::MAX {
            // Config is uninitialised in flash
            return Err(ConfigError::Uninitialised);
        }
        if version != CONFIG_LAYOUT_VERSION {
            return Err(ConfigError::Invalid);
        }
        let config = Self::read_fields(&mut cursor).ok_or(ConfigError::Truncated)?;
        config.validate()?;
        Ok(config)
    }
}

/// Receiver configs are appended to their own log, the newest record is the active one.
pub struct ConfigStore {
    log: LogId,
}

impl ConfigStore {
    pub fn new<F: NvmStorage>(nvm: &mut NvmLogger<F>) -> Result<ConfigStore, LogInitError> {
        let log = nvm.log_init(&CONFIG_LOG_CONFIG)?;
        Ok(ConfigStore { log })
    }

    pub fn load_existing<F: NvmStorage>(
        &self,
        nvm: &mut NvmLogger<F>,
    ) -> Result<ReceiverConfig, ConfigError> {
        let mut record = [0u8; CONFIG_RECORD_LEN];
        match nvm.fetch_tail(self.log, 0, &mut record) {
            Ok(()) => ReceiverConfig::from_bytes(&record),
            Err(LogError::Empty) => Err(ConfigError::Uninitialised),
            Err(e) => Err(e.into()),
        }
    }

    /// The stored config, or the factory default if there is none usable.
    pub fn load<F: NvmStorage>(&self, nvm: &mut NvmLogger<F>) -> ReceiverConfig {
        match self.load_existing(nvm) {
            Ok(config) => config,
            Err(ConfigError::Uninitialised) => {
                info!("No saved receiver config, using defaults");
                ReceiverConfig::default()
            }
            Err(e) => {
                warn!("Saved receiver config unusable ({:?}), using defaults", e);
                ReceiverConfig::default()
            }
        }
    }

    pub fn save<F: NvmStorage>(
        &self,
        config: &ReceiverConfig,
        nvm: &mut NvmLogger<F>,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        if self.load_existing(nvm).ok().as_ref() == Some(config) {
            return Ok(());
        }
        nvm.feed(self.log, &config.to_bytes())?;
        info!("Saved new receiver config");
        Ok(())
    }
}
