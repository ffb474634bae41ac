//! Handler population/binning scheduler.
//!
//! The dispatcher polls `send_test_start_signal` once per idle tick and
//! forwards bin/release commands as they arrive. The handler owns its sites
//! outright; callers only read them through the accessors below.

use crate::{
    BinCategories, Clock, CorruptionScheme, EngineError, HandlerSetup, HandlerStatus,
    QueryFault, ReprobeMode, Result, Site, SiteBin, SitePattern, SiteMask, SiteState,
    Statistics, SystemClock, TimingGate,
};

#[derive(Debug)]
pub struct Handler {
    sites: Vec<Site>,
    enabled: SiteMask,
    pattern: SitePattern,
    corruption: CorruptionScheme,
    query_fault: QueryFault,
    categories: BinCategories,
    max_bin: i32,
    reprobe_mode: ReprobeMode,
    /// Sites whose device went to the reprobe bin and has not been reloaded.
    pending_reprobe: SiteMask,
    devices_tested: u64,
    devices_to_test: Option<u64>,
    status: HandlerStatus,
    running: bool,
    gate: TimingGate,
    verify_count: u64,
    max_verify_count: Option<u64>,
}

impl Handler {
    pub fn new(setup: &HandlerSetup) -> Result<Self> {
        Self::with_clock(setup, Box::new(SystemClock::new()))
    }

    pub fn with_clock(setup: &HandlerSetup, clock: Box<dyn Clock>) -> Result<Self> {
        setup.validate()?;
        tracing::debug!(
            sites = setup.site_count,
            mask = %setup.enabled_mask(),
            pattern = ?setup.pattern,
            corruption = ?setup.corruption,
            reprobe_mode = ?setup.reprobe_mode,
            devices_to_test = ?setup.devices_to_test,
            "handler created"
        );
        Ok(Self {
            sites: (0..setup.site_count).map(Site::new).collect(),
            enabled: setup.enabled_mask(),
            pattern: SitePattern::new(setup.pattern, setup.site_count),
            corruption: CorruptionScheme::new(setup.corruption),
            query_fault: QueryFault::new(setup.query_error_every),
            categories: setup.categories(),
            max_bin: setup.max_bin,
            reprobe_mode: setup.reprobe_mode,
            pending_reprobe: SiteMask::EMPTY,
            devices_tested: 0,
            devices_to_test: setup.devices_to_test,
            status: HandlerStatus::Stopped,
            running: false,
            gate: TimingGate::new(clock, setup.handling_delay_ms, setup.auto_setup_delay_ms),
            verify_count: 0,
            max_verify_count: setup.max_verify_count,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn status(&self) -> HandlerStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn devices_tested(&self) -> u64 {
        self.devices_tested
    }

    pub fn devices_to_test(&self) -> Option<u64> {
        self.devices_to_test
    }

    pub fn pattern(&self) -> &SitePattern {
        &self.pattern
    }

    pub fn corruption(&self) -> &CorruptionScheme {
        &self.corruption
    }

    pub fn categories(&self) -> BinCategories {
        self.categories
    }

    pub fn query_fault(&mut self) -> &mut QueryFault {
        &mut self.query_fault
    }

    pub fn verify_count(&self) -> u64 {
        self.verify_count
    }

    // -----------------------------------------------------------------------
    // Site mask
    // -----------------------------------------------------------------------

    pub fn set_site_mask(&mut self, mask: SiteMask) {
        self.enabled = mask & SiteMask::all(self.sites.len());
        tracing::debug!(mask = %self.enabled, "site mask set");
    }

    pub fn sites_enabled(&self) -> SiteMask {
        self.enabled
    }

    pub fn sites_disabled(&self) -> SiteMask {
        SiteMask::all(self.sites.len()) & !self.enabled
    }

    pub fn site_enabled(&self, site: usize) -> bool {
        self.enabled.contains(site)
    }

    // -----------------------------------------------------------------------
    // Lot control
    // -----------------------------------------------------------------------

    pub fn start(&mut self) {
        self.gate.restart();
        if self.status == HandlerStatus::Stopped {
            self.status = HandlerStatus::Handling;
        }
        self.running = true;
        self.verify_count = 0;
        tracing::debug!("handler started");
    }

    pub fn stop(&mut self) {
        self.running = false;
        tracing::debug!("handler stopped");
    }

    /// New lot: the device count starts over.
    pub fn reset(&mut self) {
        tracing::info!(devices_tested = self.devices_tested, "new lot loaded");
        self.devices_tested = 0;
    }

    /// Counts one verified bin echo; stops the handler at the configured limit.
    pub fn bin_data_verified(&mut self) {
        self.verify_count += 1;
        tracing::debug!(
            count = self.verify_count,
            max = ?self.max_verify_count,
            "bin data verified"
        );
        if self.max_verify_count == Some(self.verify_count) {
            self.stop();
        }
    }

    // -----------------------------------------------------------------------
    // Poll
    // -----------------------------------------------------------------------

    /// Polled once per cycle. True when a fresh set of devices is in the
    /// sites and the tester should start.
    pub fn send_test_start_signal(&mut self) -> bool {
        if self.gate.auto_setup_due() {
            tracing::debug!("auto setup delay elapsed");
            self.start();
        }

        let signal = match self.status {
            HandlerStatus::Stopped | HandlerStatus::WaitingForTestStart => false,
            HandlerStatus::Handling => {
                if !self.running || !self.gate.handling_elapsed() {
                    false
                } else if self.populate_sites() {
                    self.status = HandlerStatus::WaitingForTestStart;
                    true
                } else {
                    if self.all_tests_complete() {
                        tracing::info!(devices_tested = self.devices_tested, "lot complete");
                        self.status = HandlerStatus::Stopped;
                        self.running = false;
                    }
                    false
                }
            }
        };
        tracing::trace!(signal, status = ?self.status, "send test start signal");
        signal
    }

    pub fn all_sites_binned(&self) -> bool {
        self.sites.iter().all(|s| !s.is_populated())
    }

    pub fn reprobe_pending(&self) -> bool {
        !self.pending_reprobe.is_empty()
    }

    pub fn all_tests_complete(&self) -> bool {
        match self.devices_to_test {
            None => false,
            Some(budget) => {
                self.devices_tested >= budget && self.all_sites_binned() && !self.reprobe_pending()
            }
        }
    }

    pub fn ready_for_release(&self) -> bool {
        self.sites.iter().all(Site::ready_for_release)
    }

    /// Bit *i* set when site *i* holds a device.
    pub fn population(&self) -> SiteMask {
        let mut mask = SiteMask::EMPTY;
        for site in self.sites.iter().filter(|s| s.is_populated()) {
            mask.insert(site.index());
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            let line: Vec<String> = self
                .sites
                .iter()
                .map(|s| format!("{}[{}]", s.index() + 1, if s.is_populated() { "P" } else { "E" }))
                .collect();
            tracing::debug!(population = %mask, "Site: {}", line.join(" "));
        }
        mask
    }

    // -----------------------------------------------------------------------
    // Site commands
    // -----------------------------------------------------------------------

    /// Loads a device into one site outside the pattern.
    pub fn populate(&mut self, site: usize) -> Result<bool> {
        self.check_site(site)?;
        if !self.enabled.contains(site) {
            tracing::debug!(site, "populate on disabled site ignored");
            return Ok(false);
        }
        if !self.under_budget() {
            tracing::debug!(site, "populate past device budget ignored");
            return Ok(false);
        }
        let loaded = self.sites[site].populate();
        if loaded {
            self.devices_tested += 1;
            if self.pending_reprobe.contains(site) {
                self.pending_reprobe.remove(site);
                tracing::debug!(site, "reprobe device reloaded");
            }
        }
        Ok(loaded)
    }

    /// Single-phase binning.
    pub fn send_to_bin(&mut self, site: usize, bin: i32) -> Result<bool> {
        self.check_site(site)?;
        self.check_bin(bin)?;
        if self.sites[site].state() != SiteState::WaitingBin {
            tracing::debug!(site, bin, "bin for site not waiting bin data ignored");
            return Ok(false);
        }
        let bin = self.apply_corruption(bin);
        self.log_bin(site, bin, "send device");
        self.sites[site].send_to_bin(bin);
        self.record_binned(site, bin);
        Ok(true)
    }

    /// Two-phase binning: store the bin until `release`.
    pub fn set_bin(&mut self, site: usize, bin: i32) -> Result<bool> {
        self.check_site(site)?;
        self.check_bin(bin)?;
        if self.sites[site].state() == SiteState::Empty {
            tracing::debug!(site, bin, "set bin data for empty site ignored");
            return Ok(false);
        }
        let bin = self.apply_corruption(bin);
        self.log_bin(site, bin, "set device");
        Ok(self.sites[site].set_bin(bin))
    }

    pub fn release(&mut self, site: usize) -> Result<bool> {
        self.check_site(site)?;
        let bin = self.sites[site].assigned_bin();
        if !self.sites[site].release() {
            return Ok(false);
        }
        tracing::debug!(site, "release device");
        if let Some(bin) = bin {
            self.record_binned(site, bin);
        }
        Ok(true)
    }

    /// The bin stored for `site`, visible only between `set_bin` and `release`.
    pub fn bin(&self, site: usize) -> Result<SiteBin> {
        self.check_site(site)?;
        let bin = match self.sites[site].assigned_bin() {
            Some(bin) => self.categories.classify(bin),
            None => SiteBin::Unassigned,
        };
        tracing::debug!(site, ?bin, "bin data requested");
        Ok(bin)
    }

    pub fn reprobe(&mut self, site: usize) -> Result<bool> {
        let bin = self
            .categories
            .reprobe
            .ok_or(EngineError::ReprobeNotConfigured)?;
        self.send_to_bin(site, bin)
    }

    pub fn retest(&mut self, site: usize) -> Result<bool> {
        let bin = self
            .categories
            .retest
            .ok_or(EngineError::RetestNotConfigured)?;
        self.send_to_bin(site, bin)
    }

    /// Moving the contact motors back onto a waiting device is a manual reprobe.
    pub fn set_contact(&mut self, site: usize, contact: bool) -> Result<bool> {
        self.check_site(site)?;
        let moved = self.sites[site].set_contact(contact);
        if contact && moved && self.sites[site].state() == SiteState::WaitingBin {
            tracing::debug!(site, "reprobe action detected");
            self.reprobe(site)?;
        }
        Ok(moved)
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    pub fn statistics(&self) -> Statistics {
        Statistics::from_histories(
            "Chuck",
            self.sites.iter().map(Site::history),
            &self.categories,
            self.devices_tested,
        )
    }

    pub fn log_statistics(&self) -> Statistics {
        let stats = self.statistics();
        for line in stats.to_string().lines() {
            tracing::info!("{line}");
        }
        stats
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn check_site(&self, site: usize) -> Result<()> {
        if site >= self.sites.len() {
            return Err(EngineError::SiteOutOfRange {
                site,
                sites: self.sites.len(),
            });
        }
        Ok(())
    }

    fn check_bin(&self, bin: i32) -> Result<()> {
        if self.categories.is_ordinary(bin) && !(0..=self.max_bin).contains(&bin) {
            return Err(EngineError::BinOutOfRange {
                bin,
                max: self.max_bin,
            });
        }
        Ok(())
    }

    fn apply_corruption(&mut self, bin: i32) -> i32 {
        if self.categories.is_ordinary(bin) {
            self.corruption.corrupt(bin)
        } else {
            bin
        }
    }

    fn log_bin(&self, site: usize, bin: i32, action: &str) {
        match self.categories.classify(bin) {
            SiteBin::Reprobe => tracing::debug!(site, "{action}: reprobe"),
            SiteBin::Retest => tracing::debug!(site, "{action}: retest"),
            SiteBin::Bin(_) | SiteBin::Unassigned => tracing::debug!(site, bin, "{action} to bin"),
        }
    }

    fn under_budget(&self) -> bool {
        self.devices_to_test
            .is_none_or(|budget| self.devices_tested < budget)
    }

    /// Bookkeeping once a bin decision has left the site.
    fn record_binned(&mut self, site: usize, bin: i32) {
        if self.categories.is_reprobe(bin) && self.reprobe_mode != ReprobeMode::Ignore {
            self.pending_reprobe.insert(site);
            self.devices_tested = self.devices_tested.saturating_sub(1);
            tracing::debug!(site, devices_tested = self.devices_tested, "reprobe pending");
        }
        if self.all_sites_binned() {
            self.handle_devices();
        }
    }

    fn handle_devices(&mut self) {
        self.gate.restart();
        if self.reprobe_mode == ReprobeMode::Separately && self.reprobe_pending() {
            tracing::trace!("reprobe pending, pattern held");
        } else {
            self.pattern.advance();
        }
        self.status = HandlerStatus::Handling;
    }

    /// Runs population passes until some site is loaded, the lot is done,
    /// or every pattern state has been tried.
    fn populate_sites(&mut self) -> bool {
        let mut loaded = self.populate_to_pattern();
        let max_retries = 2 * self.sites.len() + 1;
        let mut retries = 0;
        while !loaded && !self.all_tests_complete() && retries < max_retries {
            self.pattern.advance();
            loaded = self.populate_to_pattern();
            retries += 1;
        }
        loaded
    }

    /// True when this pass loaded at least one device.
    fn populate_to_pattern(&mut self) -> bool {
        let mut loaded = false;
        let reprobe_pass = self.reprobe_mode == ReprobeMode::Separately && self.reprobe_pending();
        for site in 0..self.sites.len() {
            if self.sites[site].is_populated() {
                tracing::trace!(site, "site not empty, not populated");
                continue;
            }
            let reprobe = self.pending_reprobe.contains(site);
            let by_pattern = self.pattern.is_populated(site)
                && self.enabled.contains(site)
                && self.under_budget();
            let load = match self.reprobe_mode {
                ReprobeMode::Separately if reprobe_pass => reprobe,
                ReprobeMode::Ignore | ReprobeMode::Separately => by_pattern,
                ReprobeMode::Interleaved => by_pattern || reprobe,
            };
            if load && self.sites[site].populate() {
                loaded = true;
                self.devices_tested += 1;
                if reprobe {
                    self.pending_reprobe.remove(site);
                    tracing::debug!(site, "reprobe device reloaded");
                }
            }
        }
        loaded
    }
}
