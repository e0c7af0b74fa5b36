// NOTE: Bump this whenever the on-flash config record layout changes, old records are
//  then treated as uninitialised and the factory config is used instead.
pub const CONFIG_LAYOUT_VERSION: u32 = 1;

// Detection timebase: RTC fed from the 32.768kHz LFCLK, prescaled down.
pub const LFCLK_FREQ_HZ: u32 = 32_768;
pub const TIMEBASE_FREQ_HZ: u32 = 8_192;
pub const TIMEBASE_PRESCALER: u32 = LFCLK_FREQ_HZ.div_ceil(TIMEBASE_FREQ_HZ) - 1;
// The RTC counter is 24 bits wide.
pub const TIMEBASE_COUNTER_MASK: u32 = 0x00FF_FFFF;
/// Half of the time the receiver stays powered around an expected synced pulse.
pub const HALF_SYNC_ENABLE_MS: u32 = 2;

// Detection policy timings, all in milliseconds.
pub const SINGLE_SHOT_DURATION_MS: u32 = 250;
pub const INTER_TRIGGER_TIME_MS: u32 = 750;
/// Misses closer together than this are counted as consecutive.
pub const CONSECUTIVE_MISS_WINDOW_MS: u32 = INTER_TRIGGER_TIME_MS + SINGLE_SHOT_DURATION_MS + 10;
pub const SYNC_LOSS_MISS_COUNT: u32 = 3;
pub const RELOCK_REST_MS: u32 = 1000;
pub const RELOCK_LISTEN_MS: u32 = 200;
pub const DETECT_FEEDBACK_TIMEOUT_MS: u32 = 600_000; // 10 mins of feedback after a sync
pub const CAMERA_TRIGGER_SETUP: u8 = 0;
pub const DEFAULT_TRIGGER_DURATION_MS: u32 = 1000;

// Non-volatile log geometry (nRF52832 flash pages).
pub const FLASH_PAGE_SIZE: usize = 4096;
pub const WORD_SIZE: usize = 4;
/// Bytes available for records, the rest of the page is the metadata footer.
pub const BYTES_PER_PAGE: usize = 4080;
pub const PAGE_METADATA_OFFSET: usize = BYTES_PER_PAGE;
pub const PAGE_METADATA_LEN: usize = FLASH_PAGE_SIZE - BYTES_PER_PAGE;
pub const MAX_LOGS: usize = 4;
pub const MAX_PAGES_PER_LOG: usize = 8;
pub const MAX_POOL_PAGES: usize = 32;
/// Highest page of the log pool, pool page `n` lives `n` pages below it.
pub const NVM_LOG_PAGE0_ADDRESS: u32 = 0x0007_E000;
