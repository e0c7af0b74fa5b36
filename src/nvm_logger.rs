// Multiplexes up to MAX_LOGS independent circular logs of fixed-size records over the
// pages of the nvm log pool.
//
// Each log owns a fixed ring of pool pages.  Records are appended at the write cursor,
// and when a page fills up the cursor rotates onto the next page of the ring.  That page
// is only erased at that moment (and only if it still holds data), so the most recent
// full ring of records stays readable right up until it is overwritten.
//
// The in-memory directory is the source of truth while running.  Every claimed page also
// carries a footer (see `nvm::PageMetadata`) so the directory can be rebuilt after reset.
//
// NOTE: None of this may be called from interrupt context, page erases take milliseconds.

use crate::constants::{
    BYTES_PER_PAGE, FLASH_PAGE_SIZE, MAX_LOGS, MAX_PAGES_PER_LOG, MAX_POOL_PAGES,
    PAGE_METADATA_LEN, PAGE_METADATA_OFFSET, WORD_SIZE,
};
use crate::nvm::{is_blank, Footer, NvmError, NvmStorage, PageMetadata, MEMORY_AVAILABLE};
use crate::re_exports::log::{debug, error, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub struct LogId(u8);

impl LogId {
    pub const fn new(id: u8) -> LogId {
        LogId(id)
    }
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<LogId> for u8 {
    fn from(id: LogId) -> u8 {
        id.0
    }
}

/// Admission failures for `NvmLogger::log_init`.  No log is created when one of these
/// is returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum LogInitError {
    StorageFull,
    InsufficientPages,
    PagesUnavailable,
    DirectoryFull,
    InvalidEntrySize,
    InvalidPageCount,
    Storage(NvmError),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(not(any(test, feature = "std")), derive(defmt::Format))]
pub enum LogError {
    UnknownLog,
    RecordSizeMismatch,
    Empty,
    Storage(NvmError),
}

impl From<NvmError> for LogInitError {
    fn from(err: NvmError) -> Self {
        LogInitError::Storage(err)
    }
}

impl From<NvmError> for LogError {
    fn from(err: NvmError) -> Self {
        LogError::Storage(err)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Preferred id, the next free id is used if this one is taken by another log.
    pub log_id: u8,
    pub entry_size: usize,
    pub page_count: usize,
    /// First pool page of the log, the rest follow at increasing pool indices.
    pub start_page: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LogInfo {
    pub entry_size: usize,
    pub page_count: usize,
    pub start_page: usize,
    pub entries_per_page: usize,
    pub total_entries: usize,
    pub current_page: usize,
    pub current_entry: usize,
}

#[derive(Debug, Copy, Clone)]
struct LogMetadata {
    entry_size_words: usize,
    size_bytes: usize,
    page_addrs: [usize; MAX_PAGES_PER_LOG],
    no_pages: usize,
    current_page: usize,
    current_entry_no: usize,
    last_entry_no: usize,
    total_entries: usize,
}

impl LogMetadata {
    fn new(size_bytes: usize, pages: &[usize]) -> LogMetadata {
        let entry_size_words = size_bytes.div_ceil(WORD_SIZE);
        let mut page_addrs = [0; MAX_PAGES_PER_LOG];
        page_addrs[..pages.len()].copy_from_slice(pages);
        LogMetadata {
            entry_size_words,
            size_bytes,
            page_addrs,
            no_pages: pages.len(),
            current_page: 0,
            current_entry_no: 0,
            last_entry_no: BYTES_PER_PAGE / (entry_size_words * WORD_SIZE),
            total_entries: 0,
        }
    }

    fn slot_bytes(&self) -> usize {
        self.entry_size_words * WORD_SIZE
    }

    fn pages(&self) -> &[usize] {
        &self.page_addrs[..self.no_pages]
    }

    /// Byte offset of the next free slot in the current page.
    fn current_loc(&self) -> usize {
        self.current_entry_no * self.slot_bytes()
    }

    fn capacity(&self) -> usize {
        self.no_pages * self.last_entry_no
    }

    fn matches(&self, config: &LogConfig) -> bool {
        self.size_bytes == config.entry_size
            && self.no_pages == config.page_count
            && self.page_addrs[0] == config.start_page
    }

    fn info(&self) -> LogInfo {
        LogInfo {
            entry_size: self.size_bytes,
            page_count: self.no_pages,
            start_page: self.page_addrs[0],
            entries_per_page: self.last_entry_no,
            total_entries: self.total_entries,
            current_page: self.current_page,
            current_entry: self.current_entry_no,
        }
    }
}

pub struct NvmLogger<F: NvmStorage> {
    flash: F,
    logs: [Option<LogMetadata>; MAX_LOGS],
    avail_pages: [bool; MAX_POOL_PAGES],
    no_avail_pages: usize,
    pool_pages: usize,
}

fn read_footer<F: NvmStorage>(flash: &mut F, page: usize) -> Result<Footer, NvmError> {
    let mut bytes = [0u8; PAGE_METADATA_LEN];
    flash.read(page, PAGE_METADATA_OFFSET, &mut bytes)?;
    Ok(PageMetadata::decode(&bytes))
}

fn write_footer<F: NvmStorage>(
    flash: &mut F,
    page: usize,
    meta: &PageMetadata,
) -> Result<(), NvmError> {
    flash.write(page, PAGE_METADATA_OFFSET, &meta.to_bytes())
}

/// Erases a page of a log but keeps it claimed: the footer is put back with the
/// availability sentinel restored.
fn empty_page<F: NvmStorage>(flash: &mut F, page: usize) -> Result<(), NvmError> {
    let footer = read_footer(flash, page)?;
    flash.erase_page(page)?;
    if let Footer::Claimed(mut meta) = footer {
        meta.availability = MEMORY_AVAILABLE;
        write_footer(flash, page, &meta)?;
    } else {
        warn!("Emptied page {} had no valid footer", page);
    }
    Ok(())
}

fn slot_is_blank<F: NvmStorage>(
    flash: &mut F,
    log: &LogMetadata,
    page_no: usize,
    entry_no: usize,
) -> Result<bool, NvmError> {
    is_blank(
        flash,
        log.page_addrs[page_no],
        entry_no * log.slot_bytes(),
        log.slot_bytes(),
    )
}

fn count_entries<F: NvmStorage>(flash: &mut F, log: &LogMetadata) -> Result<usize, NvmError> {
    let mut total = 0;
    for page_no in 0..log.no_pages {
        for entry_no in 0..log.last_entry_no {
            if !slot_is_blank(flash, log, page_no, entry_no)? {
                total += 1;
            }
        }
    }
    Ok(total)
}

impl<F: NvmStorage> NvmLogger<F> {
    /// Rebuilds the log directory from the page footers found in flash.  Must run before
    /// any log is read or written.  Pages with erased or unreadable footers are free.
    pub fn recover(mut flash: F) -> Result<NvmLogger<F>, NvmError> {
        let mut pool_pages = flash.page_count();
        if pool_pages > MAX_POOL_PAGES {
            warn!(
                "Log pool has {} pages, only the first {} are used",
                pool_pages, MAX_POOL_PAGES
            );
            pool_pages = MAX_POOL_PAGES;
        }
        let mut footers = [Footer::Erased; MAX_POOL_PAGES];
        for (page, footer) in footers.iter_mut().enumerate().take(pool_pages) {
            *footer = read_footer(&mut flash, page)?;
            if *footer == Footer::Invalid {
                warn!("Ignoring unreadable footer on pool page {}", page);
            }
        }

        let mut logger = NvmLogger {
            flash,
            logs: [None; MAX_LOGS],
            avail_pages: [false; MAX_POOL_PAGES],
            no_avail_pages: pool_pages,
            pool_pages,
        };
        for avail in logger.avail_pages.iter_mut().take(pool_pages) {
            *avail = true;
        }
        for log_id in 0..MAX_LOGS {
            logger.adopt_log(log_id, &footers[..pool_pages])?;
        }
        info!(
            "Recovered nvm logs, {} of {} pool pages free",
            logger.no_avail_pages, pool_pages
        );
        Ok(logger)
    }

    /// Folds the pages claimed by `log_id` back into the directory.
    fn adopt_log(&mut self, log_id: usize, footers: &[Footer]) -> Result<(), NvmError> {
        let mut positions: [Option<usize>; MAX_PAGES_PER_LOG] = [None; MAX_PAGES_PER_LOG];
        let mut next_pointers = [0usize; MAX_PAGES_PER_LOG];
        let mut size_bytes = None;
        for (page, footer) in footers.iter().enumerate() {
            let Footer::Claimed(meta) = footer else {
                continue;
            };
            if usize::from(meta.log_id) != log_id {
                continue;
            }
            let position = usize::from(meta.log_page_no);
            if positions[position].is_some()
                || *size_bytes.get_or_insert(meta.data_size) != meta.data_size
            {
                warn!("Log {} has conflicting page footers, discarding it", log_id);
                return Ok(());
            }
            positions[position] = Some(page);
            next_pointers[position] = meta.next_page as usize;
        }
        let Some(size_bytes) = size_bytes else {
            return Ok(());
        };
        let size_bytes = usize::from(size_bytes);
        if size_bytes > BYTES_PER_PAGE {
            warn!("Log {} declares oversized records, discarding it", log_id);
            return Ok(());
        }
        let claimed = positions;
        let is_free = |page: usize| {
            page < footers.len() && !matches!(footers[page], Footer::Claimed(_))
        };

        // A reset between erasing a page and rewriting its footer loses that one footer.
        // The previous page in the ring still points at it, so it can be taken back.
        let mut reclaimed = None;
        if positions[0].is_none() {
            if let Some(last) = (0..MAX_PAGES_PER_LOG).rev().find(|&p| claimed[p].is_some()) {
                if is_free(next_pointers[last]) {
                    positions[0] = Some(next_pointers[last]);
                    reclaimed = Some(0);
                }
            }
        } else {
            for position in 0..MAX_PAGES_PER_LOG - 1 {
                if claimed[position].is_none() || positions[position + 1].is_some() {
                    continue;
                }
                let next = next_pointers[position];
                if Some(next) != positions[0] && is_free(next) {
                    positions[position + 1] = Some(next);
                    reclaimed = Some(position + 1);
                    break;
                }
            }
        }

        let no_pages = positions.iter().rposition(Option::is_some).map_or(0, |p| p + 1);
        let mut pages = [0usize; MAX_PAGES_PER_LOG];
        for position in 0..no_pages {
            match positions[position] {
                Some(page) => pages[position] = page,
                None => {
                    warn!("Log {} is missing page {}, discarding it", log_id, position);
                    return Ok(());
                }
            }
        }
        for position in 0..no_pages {
            if claimed[position].is_some()
                && next_pointers[position] != pages[(position + 1) % no_pages]
            {
                warn!("Log {} page ring is broken at {}, discarding it", log_id, position);
                return Ok(());
            }
        }
        if pages[..no_pages].iter().any(|&page| !self.avail_pages[page]) {
            warn!("Log {} shares pages with another log, discarding it", log_id);
            return Ok(());
        }

        let mut log = LogMetadata::new(size_bytes, &pages[..no_pages]);
        if let Some(position) = reclaimed {
            let page = pages[position];
            info!("Reclaiming page {} as page {} of log {}", page, position, log_id);
            if footers[page] == Footer::Invalid {
                self.flash.erase_page(page)?;
            }
            write_footer(&mut self.flash, page, &Self::footer_for(log_id, &log, position))?;
        }
        for &page in log.pages() {
            self.avail_pages[page] = false;
            self.no_avail_pages -= 1;
        }
        Self::locate_cursor(&mut self.flash, &mut log)?;
        log.total_entries = count_entries(&mut self.flash, &log)?;
        info!(
            "Log {}: {} pages, {} byte records, {} entries, cursor at {}:{}",
            log_id,
            log.no_pages,
            log.size_bytes,
            log.total_entries,
            log.current_page,
            log.current_entry_no
        );
        self.logs[log_id] = Some(log);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn footer_for(log_id: usize, log: &LogMetadata, position: usize) -> PageMetadata {
        PageMetadata {
            log_id: log_id as u8,
            log_page_no: position as u8,
            data_size: log.size_bytes as u16,
            availability: MEMORY_AVAILABLE,
            next_page: log.page_addrs[(position + 1) % log.no_pages] as u32,
        }
    }

    /// Puts the write cursor on the first blank slot, walking the ring from page 0.
    fn locate_cursor(flash: &mut F, log: &mut LogMetadata) -> Result<(), NvmError> {
        for page_no in 0..log.no_pages {
            for entry_no in 0..log.last_entry_no {
                if slot_is_blank(flash, log, page_no, entry_no)? {
                    log.current_page = page_no;
                    log.current_entry_no = entry_no;
                    return Ok(());
                }
            }
        }
        // Every slot holds data, so a reset hit between filling a page and rotating off
        // it.  Which page is newest can't be told from flash, so restart the ring at 0.
        warn!("No free slot found in log, restarting it at page 0");
        empty_page(flash, log.page_addrs[0])?;
        log.current_page = 0;
        log.current_entry_no = 0;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn log_init(&mut self, config: &LogConfig) -> Result<LogId, LogInitError> {
        if config.entry_size == 0
            || config.entry_size > BYTES_PER_PAGE
            || config.entry_size > usize::from(u16::MAX)
        {
            return Err(LogInitError::InvalidEntrySize);
        }
        if config.page_count == 0 || config.page_count > MAX_PAGES_PER_LOG {
            return Err(LogInitError::InvalidPageCount);
        }
        let requested = usize::from(config.log_id) % MAX_LOGS;

        let existing = core::iter::once(requested)
            .chain(0..MAX_LOGS)
            .find(|&id| self.logs[id].is_some_and(|log| log.matches(config)));
        if let Some(id) = existing {
            if let Some(log) = self.logs[id].as_mut() {
                log.total_entries = count_entries(&mut self.flash, log)?;
                info!("Log {} already present, {} entries", id, log.total_entries);
            }
            return Ok(LogId(id as u8));
        }

        if self.no_avail_pages == 0 {
            warn!("Nvm log storage full");
            return Err(LogInitError::StorageFull);
        }
        if self.no_avail_pages < config.page_count {
            warn!(
                "Not enough pages for log, wanted {} have {}",
                config.page_count, self.no_avail_pages
            );
            return Err(LogInitError::InsufficientPages);
        }
        if config.start_page >= self.pool_pages
            || config.page_count > self.pool_pages - config.start_page
        {
            warn!(
                "Log of {} pages from {} does not fit the {} page pool",
                config.page_count, config.start_page, self.pool_pages
            );
            return Err(LogInitError::PagesUnavailable);
        }
        let pages = config.start_page..config.start_page + config.page_count;
        if pages.clone().any(|page| !self.avail_pages[page]) {
            warn!(
                "Pages {}..{} are not available for a new log",
                pages.start, pages.end
            );
            return Err(LogInitError::PagesUnavailable);
        }
        let Some(id) = (0..MAX_LOGS)
            .map(|n| (requested + n) % MAX_LOGS)
            .find(|&id| self.logs[id].is_none())
        else {
            warn!("Nvm log directory full");
            return Err(LogInitError::DirectoryFull);
        };

        let mut page_list = [0usize; MAX_PAGES_PER_LOG];
        for (slot, page) in page_list.iter_mut().zip(pages.clone()) {
            *slot = page;
        }
        let log = LogMetadata::new(config.entry_size, &page_list[..config.page_count]);
        for (position, &page) in log.pages().iter().enumerate() {
            if !is_blank(&mut self.flash, page, 0, FLASH_PAGE_SIZE)? {
                debug!("Erasing stale page {} before claiming it", page);
                self.flash.erase_page(page)?;
            }
            write_footer(&mut self.flash, page, &Self::footer_for(id, &log, position))?;
            self.avail_pages[page] = false;
        }
        self.no_avail_pages -= config.page_count;
        info!(
            "New log {}: {} pages from {}, {} entries per page",
            id, config.page_count, config.start_page, log.last_entry_no
        );
        self.logs[id] = Some(log);
        Ok(LogId(id as u8))
    }

    fn log(&self, id: LogId) -> Result<&LogMetadata, LogError> {
        self.logs
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(LogError::UnknownLog)
    }

    /// Appends a record.  The caller is expected to only write to logs it was admitted
    /// to, there is no check for running over older data, the ring simply rotates.
    pub fn feed(&mut self, id: LogId, record: &[u8]) -> Result<(), LogError> {
        let log = self
            .logs
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(LogError::UnknownLog)?;
        if record.len() != log.size_bytes {
            return Err(LogError::RecordSizeMismatch);
        }
        let page = log.page_addrs[log.current_page];
        self.flash.write(page, log.current_loc(), record)?;
        log.current_entry_no += 1;
        log.total_entries += 1;
        if log.current_entry_no < log.last_entry_no {
            return Ok(());
        }

        log.current_page = (log.current_page + 1) % log.no_pages;
        log.current_entry_no = 0;
        let next = log.page_addrs[log.current_page];
        debug!("Log {} rotating onto page {}", id.index(), next);
        if !is_blank(&mut self.flash, next, 0, BYTES_PER_PAGE)? {
            log.total_entries = log.total_entries.saturating_sub(log.last_entry_no);
            if let Err(e) = empty_page(&mut self.flash, next) {
                error!("Failed to recycle page {}: {:?}", next, e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Copies the `entry_no`-th most recent record into `dest` (0 is the newest).  Asking
    /// for more records than the log holds returns the oldest one still retrievable.
    pub fn fetch_tail(
        &mut self,
        id: LogId,
        entry_no: usize,
        dest: &mut [u8],
    ) -> Result<(), LogError> {
        let log = *self.log(id)?;
        if dest.len() < log.size_bytes {
            return Err(LogError::RecordSizeMismatch);
        }
        let dest = &mut dest[..log.size_bytes];
        if log.total_entries == 0 {
            return Err(LogError::Empty);
        }

        if entry_no >= log.total_entries {
            // Once the log has wrapped, the oldest data sits on the page after the
            // current one, otherwise it starts on the current page.
            let mut page_no = if log.total_entries == log.current_entry_no {
                log.current_page
            } else {
                (log.current_page + 1) % log.no_pages
            };
            for _ in 0..log.no_pages {
                if !slot_is_blank(&mut self.flash, &log, page_no, 0)? {
                    self.flash.read(log.page_addrs[page_no], 0, dest)?;
                    return Ok(());
                }
                page_no = (page_no + 1) % log.no_pages;
            }
            return Err(LogError::Empty);
        }

        // Position of every slot in the ring, counted from page 0 slot 0.  The newest
        // record sits just behind the cursor.
        let ring = log.capacity();
        let cursor = log.current_page * log.last_entry_no + log.current_entry_no;
        let position = (cursor + ring - 1 - entry_no) % ring;
        let page = log.page_addrs[position / log.last_entry_no];
        let offset = (position % log.last_entry_no) * log.slot_bytes();
        self.flash.read(page, offset, dest)?;
        Ok(())
    }

    /// Erases every record of a log, the log itself and its pages stay allocated.
    pub fn empty_log(&mut self, id: LogId) -> Result<(), LogError> {
        let log = self
            .logs
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(LogError::UnknownLog)?;
        for &page in &log.page_addrs[..log.no_pages] {
            empty_page(&mut self.flash, page)?;
        }
        log.current_page = 0;
        log.current_entry_no = 0;
        log.total_entries = 0;
        info!("Emptied log {}", id.index());
        Ok(())
    }

    pub fn is_log_empty(&mut self, id: LogId) -> Result<bool, LogError> {
        let log = *self.log(id)?;
        for &page in log.pages() {
            if !is_blank(&mut self.flash, page, 0, BYTES_PER_PAGE)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Erases a log's pages entirely and drops it from the directory, its pages go back
    /// to the pool.
    pub fn release_log(&mut self, id: LogId) -> Result<(), LogError> {
        let log = *self.log(id)?;
        // Pages stay claimed until every erase has succeeded.
        for &page in log.pages() {
            self.flash.erase_page(page)?;
        }
        for &page in log.pages() {
            self.avail_pages[page] = true;
        }
        self.no_avail_pages += log.no_pages;
        self.logs[id.index()] = None;
        info!("Released log {}", id.index());
        Ok(())
    }

    pub fn total_entries(&self, id: LogId) -> Result<usize, LogError> {
        self.log(id).map(|log| log.total_entries)
    }

    pub fn entries_per_page(&self, id: LogId) -> Result<usize, LogError> {
        self.log(id).map(|log| log.last_entry_no)
    }

    pub fn log_info(&self, id: LogId) -> Option<LogInfo> {
        self.log(id).ok().map(LogMetadata::info)
    }

    pub fn free_page_count(&self) -> usize {
        self.no_avail_pages
    }

    pub fn storage(&self) -> &F {
        &self.flash
    }

    pub fn storage_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_storage(self) -> F {
        self.flash
    }
}
