//! Wafer prober: wafer loading, needle stepping and die binning.
//!
//! Same polling contract as the handler. `send_test_start_signal` is called
//! once per idle tick, everything else is a direct dispatcher command.

use crate::{
    BinCategories, BinningManager, Clock, DieManager, EngineError, Position, ProbeNeedle,
    ProberMode, ProberSetup, ProberStatus, QueryFault, Result, SiteMask, SteppingMode,
    Statistics, SubDieManager, SystemClock, TimingGate,
};

#[derive(Debug)]
pub struct Prober {
    binning: BinningManager,
    needle: ProbeNeedle,
    stepping: SteppingMode,
    mode: ProberMode,
    categories: BinCategories,
    max_bin: i32,
    /// Bin log per probe, for yield statistics.
    histories: Vec<Vec<i32>>,
    /// Sub-die the tester last moved to, in tester-driven mode.
    sub_die_position: Position,
    status: ProberStatus,
    running: bool,
    gate: TimingGate,
    wafers_tested: u32,
    wafers_to_test: u32,
    query_fault: QueryFault,
}

impl Prober {
    pub fn new(setup: &ProberSetup) -> Result<Self> {
        Self::with_clock(setup, Box::new(SystemClock::new()))
    }

    pub fn with_clock(setup: &ProberSetup, clock: Box<dyn Clock>) -> Result<Self> {
        setup.validate()?;
        let dies = setup.wafer.die_positions();
        let binning = match &setup.sub_die_offsets {
            Some(offsets) => {
                let mut manager = SubDieManager::new(offsets.iter().copied());
                for die in dies {
                    manager.add_die(die);
                }
                BinningManager::SubDie(manager)
            }
            None => BinningManager::Die(DieManager::from_positions(dies)),
        };
        let needle = ProbeNeedle::with_offsets(&setup.probe_offsets);
        tracing::debug!(
            probes = needle.probe_count(),
            stepping = ?setup.stepping_mode(),
            mode = ?setup.mode,
            wafers_to_test = setup.wafers_to_test,
            sub_die = setup.sub_die_offsets.is_some(),
            "prober created"
        );
        Ok(Self {
            histories: vec![Vec::new(); needle.probe_count()],
            binning,
            needle,
            stepping: setup.stepping_mode(),
            mode: setup.mode,
            categories: setup.categories(),
            max_bin: setup.max_bin,
            sub_die_position: Position::HOME,
            status: ProberStatus::Stopped,
            running: true,
            gate: TimingGate::new(clock, setup.handling_delay_ms, setup.auto_setup_delay_ms),
            wafers_tested: 0,
            wafers_to_test: setup.wafers_to_test,
            query_fault: QueryFault::new(setup.query_error_every),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn status(&self) -> ProberStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn wafers_tested(&self) -> u32 {
        self.wafers_tested
    }

    pub fn wafers_to_test(&self) -> u32 {
        self.wafers_to_test
    }

    pub fn needle(&self) -> &ProbeNeedle {
        &self.needle
    }

    pub fn binning(&self) -> &BinningManager {
        &self.binning
    }

    pub fn stepping_mode(&self) -> SteppingMode {
        self.stepping
    }

    pub fn mode(&self) -> ProberMode {
        self.mode
    }

    pub fn categories(&self) -> BinCategories {
        self.categories
    }

    pub fn probe_count(&self) -> usize {
        self.needle.probe_count()
    }

    pub fn position(&self) -> Position {
        self.needle.primary()
    }

    pub fn sub_die_position(&self) -> Position {
        self.sub_die_position
    }

    /// 1-based sub-die number inside the current die; 0 for whole-die probing.
    pub fn site_number(&self) -> usize {
        match &self.binning {
            BinningManager::Die(_) => 0,
            BinningManager::SubDie(m) => m.site_number(),
        }
    }

    pub fn query_fault(&mut self) -> &mut QueryFault {
        &mut self.query_fault
    }

    // -----------------------------------------------------------------------
    // Lot control
    // -----------------------------------------------------------------------

    pub fn start(&mut self) {
        self.running = true;
        tracing::debug!("prober started");
    }

    pub fn stop(&mut self) {
        self.running = false;
        tracing::debug!("prober stopped");
    }

    /// New lot: the wafer count starts over.
    pub fn reset(&mut self) {
        tracing::info!(wafers_tested = self.wafers_tested, "new lot loaded");
        self.wafers_tested = 0;
        self.status = ProberStatus::Stopped;
    }

    /// Loads the next wafer, or finishes the lot when the last one is done.
    /// A load while still loading is a retest of the same wafer. True when
    /// a wafer is now loading.
    pub fn load_wafer(&mut self) -> Result<bool> {
        let fresh = match self.status {
            ProberStatus::Stopped | ProberStatus::Probing => {
                if self.status == ProberStatus::Probing {
                    self.log_wafer_map();
                }
                if self.wafers_tested < self.wafers_to_test {
                    self.wafers_tested += 1;
                    self.status = ProberStatus::LoadingWafer;
                    tracing::info!(
                        wafer = self.wafers_tested,
                        of = self.wafers_to_test,
                        "loading wafer"
                    );
                    true
                } else {
                    if self.status == ProberStatus::Probing {
                        tracing::info!(wafers_tested = self.wafers_tested, "lot complete");
                    }
                    self.status = ProberStatus::Stopped;
                    false
                }
            }
            ProberStatus::LoadingWafer => {
                tracing::debug!("wafer reloaded for retest");
                self.log_wafer_map();
                false
            }
        };

        if self.status != ProberStatus::LoadingWafer {
            return Ok(false);
        }
        self.gate.restart();
        if fresh {
            self.binning.clear_bins();
        }
        if self.mode != ProberMode::TesterDriven {
            if self.binning.is_empty() {
                return Err(EngineError::EmptyWafer);
            }
            self.binning.initialize();
            let first = self.binning.current().unwrap_or(Position::HOME);
            self.needle.move_to(first);
            tracing::debug!(position = %first, "needle at first die");
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Poll
    // -----------------------------------------------------------------------

    pub fn send_test_start_signal(&mut self) -> bool {
        if self.gate.auto_setup_due() {
            tracing::debug!("auto setup delay elapsed");
            if let Err(err) = self.load_wafer() {
                tracing::warn!(%err, "automatic wafer load failed");
            }
        }

        let signal = match self.status {
            ProberStatus::Stopped | ProberStatus::Probing => false,
            ProberStatus::LoadingWafer => {
                if self.running && self.gate.handling_elapsed() {
                    self.status = ProberStatus::Probing;
                    self.mode != ProberMode::TesterDriven
                } else {
                    false
                }
            }
        };
        tracing::trace!(signal, status = ?self.status, "send test start signal");
        signal
    }

    /// The needle has stepped past the last die of the loaded wafer.
    pub fn wafer_complete(&self) -> bool {
        self.status == ProberStatus::Probing && self.needle.primary().is_home()
    }

    pub fn all_tests_complete(&self) -> bool {
        self.status == ProberStatus::Stopped && self.wafers_tested >= self.wafers_to_test
    }

    pub fn probe_on_wafer(&self, probe: usize) -> Result<bool> {
        let pos = self.needle.position(probe)?;
        let on_wafer = self.binning.on_wafer(pos);
        tracing::trace!(probe, position = %pos, on_wafer, "probe position checked");
        Ok(on_wafer)
    }

    /// Bit *i* set when probe *i* touches a die.
    pub fn probe_mask(&self) -> SiteMask {
        let mut mask = SiteMask::EMPTY;
        for (probe, pos) in self.needle.positions().enumerate() {
            if self.binning.on_wafer(pos) {
                mask.insert(probe);
            }
        }
        mask
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advances the needle per the stepping mode. Past the last die the
    /// needle parks at home and this returns false.
    pub fn step_probe(&mut self) -> bool {
        let next = match self.stepping {
            SteppingMode::Simple => self.step_simple(),
            SteppingMode::Efficient => self.step_efficient(),
            SteppingMode::Compatible => self.step_compatible(),
        };
        match next {
            Some(pos) => {
                if pos != self.needle.primary() {
                    self.needle.move_to(pos);
                    tracing::debug!("auto step to die {pos}");
                }
                true
            }
            None => {
                tracing::debug!("auto step past last die");
                self.needle.move_to(Position::HOME);
                false
            }
        }
    }

    fn step_simple(&mut self) -> Option<Position> {
        if self.binning.step() {
            self.binning.current()
        } else {
            None
        }
    }

    fn step_efficient(&mut self) -> Option<Position> {
        while self.binning.step() {
            match self.binning.current_bin() {
                Some(bin) if self.categories.is_ordinary(bin) => {}
                _ => return self.binning.current(),
            }
        }
        None
    }

    /// Raster scan of the needle across the wafer bounding box. The row
    /// continues while the primary tip lands on a die. A miss jumps to the
    /// next row one column left of the box, then tries the box edge itself;
    /// either jump is taken when any probe touches a die.
    fn step_compatible(&mut self) -> Option<Position> {
        let bounds = self.binning.bounds()?;
        let current = self.needle.primary();
        if current.is_home() {
            return None;
        }

        let right = Position::new(current.x + 1, current.y);
        if self.binning.on_wafer(right) {
            return Some(right);
        }

        let y = current.y + 1;
        [bounds.min.x - 1, bounds.min.x]
            .into_iter()
            .map(|x| Position::new(x, y))
            .find(|&candidate| self.any_probe_on_wafer(candidate))
    }

    fn any_probe_on_wafer(&self, primary: Position) -> bool {
        self.needle
            .offsets()
            .iter()
            .any(|&offset| self.binning.on_wafer(primary + offset))
    }

    // -----------------------------------------------------------------------
    // Binning
    // -----------------------------------------------------------------------

    /// Bins the die under `probe`. Off-wafer and already binned dies are
    /// left alone.
    pub fn bin_die(&mut self, bin: i32, probe: usize) -> Result<bool> {
        let pos = self.needle.position(probe)?;
        self.check_bin(bin)?;

        let binned = match &mut self.binning {
            BinningManager::Die(manager) => {
                if !manager.on_wafer(pos) {
                    tracing::debug!("die {pos} outside wafer, not binned");
                    return Ok(false);
                }
                if let Some(old) = manager.bin_at(pos).filter(|&b| self.categories.is_ordinary(b)) {
                    tracing::debug!(old, bin, "die {pos} already binned");
                    return Ok(false);
                }
                manager.set_bin(pos, bin)
            }
            BinningManager::SubDie(manager) => {
                if self.mode == ProberMode::TesterDriven {
                    let sub_die = self.sub_die_position;
                    if !manager.on_wafer(pos) {
                        tracing::debug!("die {pos} outside wafer, not binned");
                        return Ok(false);
                    }
                    manager.set_bin(pos, sub_die, bin)
                } else {
                    if let Some(old) =
                        manager.current_bin().filter(|&b| self.categories.is_ordinary(b))
                    {
                        tracing::debug!(old, bin, "sub-die already binned");
                        return Ok(false);
                    }
                    manager.set_current_bin(bin)
                }
            }
        };

        if binned {
            tracing::debug!(probe, bin, "die {pos} binned");
            self.histories[probe].push(bin);
        } else {
            tracing::debug!(probe, bin, "no die at {pos}, not binned");
        }
        Ok(binned)
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

    // -----------------------------------------------------------------------
    // Tester-driven positioning and die learning
    // -----------------------------------------------------------------------

    pub fn move_to(&mut self, position: Position) {
        tracing::debug!("needle moved to {position}");
        self.needle.move_to(position);
    }

    pub fn move_sub_die(&mut self, position: Position) {
        tracing::debug!("sub-die moved to {position}");
        self.sub_die_position = position;
    }

    pub fn add_die(&mut self, position: Position) -> bool {
        self.binning.add_die(position)
    }

    pub fn clear_dies(&mut self) {
        tracing::debug!("die list cleared");
        self.binning.clear();
    }

    /// Adds a die to a sub-die wafer. False on a whole-die prober.
    pub fn add_sub_die(&mut self, position: Position) -> bool {
        match &mut self.binning {
            BinningManager::SubDie(manager) => manager.add_die(position),
            BinningManager::Die(_) => {
                tracing::debug!("sub-die {position} ignored by whole-die prober");
                false
            }
        }
    }

    pub fn add_sub_die_offset(&mut self, offset: Position) -> bool {
        match &mut self.binning {
            BinningManager::SubDie(manager) => manager.add_offset(offset),
            BinningManager::Die(_) => {
                tracing::debug!("sub-die offset {offset} ignored by whole-die prober");
                false
            }
        }
    }

    pub fn clear_sub_die_offsets(&mut self) {
        if let BinningManager::SubDie(manager) = &mut self.binning {
            manager.clear_offsets();
        }
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    pub fn wafer_map(&self) -> Vec<String> {
        self.binning.wafer_map()
    }

    pub fn log_wafer_map(&self) {
        for line in self.wafer_map() {
            tracing::info!("wafer result: {line}");
        }
    }

    pub fn statistics(&self) -> Statistics {
        let devices_tested = self.histories.iter().map(|h| h.len() as u64).sum();
        Statistics::from_histories(
            "Probe",
            self.histories.iter().map(Vec::as_slice),
            &self.categories,
            devices_tested,
        )
    }

    pub fn log_statistics(&self) -> Statistics {
        self.log_wafer_map();
        let stats = self.statistics();
        for line in stats.to_string().lines() {
            tracing::info!("{line}");
        }
        stats
    }
}
