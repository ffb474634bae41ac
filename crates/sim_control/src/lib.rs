//! Tester-side driver sessions played against a handler or prober.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::{
    BinCategories, EngineError, Handler, HandlerStatus, Prober, ProberMode, ProberStatus, Result,
    SiteMask, Statistics,
};

/// What the tester decided for one device or die.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinDecision {
    Bin(i32),
    Reprobe,
    Retest,
}

pub trait BinSource {
    /// Decision for the device under `unit` (site or probe index).
    fn decide(&mut self, unit: usize) -> BinDecision;
}

/// One driver cycle against a piece of equipment.
pub trait Session {
    fn step(&mut self) -> Result<CycleOutcome>;
    fn counters(&self) -> &SessionCounters;
    fn statistics(&self) -> Statistics;
    fn log_statistics(&self) -> Statistics;
    /// Single-line status summary for periodic printing.
    fn status_line(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Polled, no test start raised.
    Idle,
    /// Devices under `population` were tested and binned.
    Tested { population: SiteMask },
    LotComplete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub cycles: u64,
    pub test_starts: u64,
    pub idle_polls: u64,
    pub bins_sent: u64,
    pub reprobes: u64,
    pub retests: u64,
    pub verify_mismatches: u64,
    pub query_faults: u64,
    pub wafers_completed: u64,
}

/// Single-phase sends each bin outright; two-phase sets, optionally reads
/// the bin back, then releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BinningPhase {
    #[default]
    Single,
    Two {
        verify: bool,
    },
}

/// Runs `session` until the lot completes or `max_cycles` have passed.
/// Returns the number of cycles run.
pub fn run_cycles(session: &mut dyn Session, max_cycles: u64) -> Result<u64> {
    for cycle in 1..=max_cycles {
        if session.step()? == CycleOutcome::LotComplete {
            return Ok(cycle);
        }
    }
    Ok(max_cycles)
}

// ---------------------------------------------------------------------------
// Bin sources
// ---------------------------------------------------------------------------

/// Shape of the random bin distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinProfile {
    pub pass_bin: i32,
    pub fail_bins: Vec<i32>,
    pub fail_rate: f64,
    pub reprobe_rate: f64,
    pub retest_rate: f64,
}

impl Default for BinProfile {
    fn default() -> Self {
        Self {
            pass_bin: 1,
            fail_bins: vec![2, 3, 4, 5],
            fail_rate: 0.1,
            reprobe_rate: 0.0,
            retest_rate: 0.0,
        }
    }
}

/// Seeded random decisions; the same seed replays the same decisions.
pub struct RandomBins {
    profile: BinProfile,
    rng: ChaCha8Rng,
}

impl RandomBins {
    pub fn new(profile: BinProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl BinSource for RandomBins {
    fn decide(&mut self, _unit: usize) -> BinDecision {
        let p = &self.profile;
        let roll: f64 = self.rng.gen();
        if roll < p.reprobe_rate {
            BinDecision::Reprobe
        } else if roll < p.reprobe_rate + p.retest_rate {
            BinDecision::Retest
        } else if roll < p.reprobe_rate + p.retest_rate + p.fail_rate && !p.fail_bins.is_empty() {
            BinDecision::Bin(p.fail_bins[self.rng.gen_range(0..p.fail_bins.len())])
        } else {
            BinDecision::Bin(p.pass_bin)
        }
    }
}

/// Replays a fixed list of decisions in rotation.
pub struct CycleBins {
    decisions: Vec<BinDecision>,
    next: usize,
}

impl CycleBins {
    pub fn new(decisions: Vec<BinDecision>) -> Self {
        Self { decisions, next: 0 }
    }

    pub fn bins(bins: &[i32]) -> Self {
        Self::new(bins.iter().map(|&b| BinDecision::Bin(b)).collect())
    }
}

impl BinSource for CycleBins {
    fn decide(&mut self, _unit: usize) -> BinDecision {
        if self.decisions.is_empty() {
            return BinDecision::Retest;
        }
        let decision = self.decisions[self.next % self.decisions.len()];
        self.next += 1;
        decision
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Resolves a decision to the bin value sent over the wire.
fn decision_value(decision: BinDecision, categories: &BinCategories) -> Result<i32> {
    match decision {
        BinDecision::Bin(bin) => Ok(bin),
        BinDecision::Reprobe => categories.reprobe.ok_or(EngineError::ReprobeNotConfigured),
        BinDecision::Retest => categories.retest.ok_or(EngineError::RetestNotConfigured),
    }
}

fn count_decision(counters: &mut SessionCounters, decision: BinDecision) {
    match decision {
        BinDecision::Bin(_) => counters.bins_sent += 1,
        BinDecision::Reprobe => counters.reprobes += 1,
        BinDecision::Retest => counters.retests += 1,
    }
}

// ---------------------------------------------------------------------------
// Handler session
// ---------------------------------------------------------------------------

/// Tester side of a handler lot. Each step is one poll; a test start is
/// followed by binning every populated site.
pub struct HandlerSession<S> {
    handler: Handler,
    source: S,
    phase: BinningPhase,
    counters: SessionCounters,
}

impl<S: BinSource> HandlerSession<S> {
    pub fn new(mut handler: Handler, source: S, phase: BinningPhase) -> Self {
        handler.start();
        Self {
            handler,
            source,
            phase,
            counters: SessionCounters::default(),
        }
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Status query; a degenerate reply is queried once more.
    fn query_status(&mut self) {
        for _ in 0..2 {
            let status = self.handler.population().to_string();
            let reply = self.handler.query_fault().filter(&status);
            if !reply.trim().is_empty() {
                return;
            }
            self.counters.query_faults += 1;
            tracing::debug!("degenerate status reply, querying again");
        }
    }

    fn bin_single(&mut self, sites: &[usize]) -> Result<()> {
        let categories = self.handler.categories();
        for &site in sites {
            let decision = self.source.decide(site);
            let bin = decision_value(decision, &categories)?;
            if self.handler.send_to_bin(site, bin)? {
                count_decision(&mut self.counters, decision);
            }
        }
        Ok(())
    }

    fn bin_two_phase(&mut self, sites: &[usize], verify: bool) -> Result<()> {
        let categories = self.handler.categories();
        for &site in sites {
            let decision = self.source.decide(site);
            let bin = decision_value(decision, &categories)?;
            if !self.handler.set_bin(site, bin)? {
                continue;
            }
            count_decision(&mut self.counters, decision);
            if verify {
                self.verify(site, bin, &categories)?;
            }
        }
        for &site in sites {
            self.handler.release(site)?;
        }
        Ok(())
    }

    /// Reads the stored bin back; a mismatch is resent once.
    fn verify(&mut self, site: usize, bin: i32, categories: &BinCategories) -> Result<()> {
        let expected = categories.classify(bin);
        let echoed = self.handler.bin(site)?;
        if echoed == expected {
            self.handler.bin_data_verified();
            return Ok(());
        }
        self.counters.verify_mismatches += 1;
        tracing::debug!(site, ?expected, ?echoed, "bin echo mismatch, resending");
        self.handler.set_bin(site, bin)?;
        if self.handler.bin(site)? == expected {
            self.handler.bin_data_verified();
        }
        Ok(())
    }
}

impl<S: BinSource> Session for HandlerSession<S> {
    fn step(&mut self) -> Result<CycleOutcome> {
        self.counters.cycles += 1;
        self.query_status();

        if !self.handler.send_test_start_signal() {
            if self.handler.status() == HandlerStatus::Stopped && self.handler.all_tests_complete()
            {
                return Ok(CycleOutcome::LotComplete);
            }
            self.counters.idle_polls += 1;
            return Ok(CycleOutcome::Idle);
        }
        self.counters.test_starts += 1;

        let population = self.handler.population();
        let sites: Vec<usize> = (0..self.handler.site_count())
            .filter(|&s| population.contains(s))
            .collect();
        match self.phase {
            BinningPhase::Single => self.bin_single(&sites)?,
            BinningPhase::Two { verify } => self.bin_two_phase(&sites, verify)?,
        }
        Ok(CycleOutcome::Tested { population })
    }

    fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    fn statistics(&self) -> Statistics {
        self.handler.statistics()
    }

    fn log_statistics(&self) -> Statistics {
        self.handler.log_statistics()
    }

    fn status_line(&self) -> String {
        let devices = match self.handler.devices_to_test() {
            Some(budget) => format!("{}/{budget}", self.handler.devices_tested()),
            None => self.handler.devices_tested().to_string(),
        };
        format!(
            "cycle {:>6} | {:?} | devices {devices} | starts {} | reprobes {} | mismatches {} | query faults {}",
            self.counters.cycles,
            self.handler.status(),
            self.counters.test_starts,
            self.counters.reprobes,
            self.counters.verify_mismatches,
            self.counters.query_faults,
        )
    }
}

// ---------------------------------------------------------------------------
// Prober session
// ---------------------------------------------------------------------------

/// Tester side of a prober lot. Each probing step bins every probe on the
/// wafer and then steps the needle.
pub struct ProberSession<S> {
    prober: Prober,
    source: S,
    counters: SessionCounters,
}

impl<S: BinSource> ProberSession<S> {
    /// Tester-driven probers are positioned by the tester program, which
    /// this session does not model.
    pub fn new(prober: Prober, source: S) -> Result<Self> {
        if prober.mode() == ProberMode::TesterDriven {
            return Err(EngineError::InvalidSetup(
                "prober session needs a prober-driven mode".to_string(),
            ));
        }
        Ok(Self {
            prober,
            source,
            counters: SessionCounters::default(),
        })
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    fn bin_probes(&mut self, population: SiteMask) -> Result<()> {
        let categories = self.prober.categories();
        for probe in (0..self.prober.probe_count()).filter(|&p| population.contains(p)) {
            let decision = self.source.decide(probe);
            let bin = decision_value(decision, &categories)?;
            if self.prober.bin_die(bin, probe)? {
                count_decision(&mut self.counters, decision);
            }
        }
        Ok(())
    }
}

impl<S: BinSource> Session for ProberSession<S> {
    fn step(&mut self) -> Result<CycleOutcome> {
        self.counters.cycles += 1;
        if self.prober.query_fault().next_is_faulty() {
            self.counters.query_faults += 1;
        }

        if self.prober.status() == ProberStatus::Stopped {
            if self.prober.all_tests_complete() {
                return Ok(CycleOutcome::LotComplete);
            }
            self.prober.load_wafer()?;
        }
        if self.prober.status() == ProberStatus::LoadingWafer {
            if !self.prober.send_test_start_signal() {
                self.counters.idle_polls += 1;
                return Ok(CycleOutcome::Idle);
            }
            self.counters.test_starts += 1;
        }

        let population = self.prober.probe_mask();
        self.bin_probes(population)?;
        if !self.prober.step_probe() {
            self.counters.wafers_completed += 1;
            tracing::info!(wafer = self.prober.wafers_tested(), "wafer complete");
            self.prober.load_wafer()?;
        }
        Ok(CycleOutcome::Tested { population })
    }

    fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    fn statistics(&self) -> Statistics {
        self.prober.statistics()
    }

    fn log_statistics(&self) -> Statistics {
        self.prober.log_statistics()
    }

    fn status_line(&self) -> String {
        format!(
            "cycle {:>6} | {:?} | wafer {}/{} | die {} | probes {} | binned {} | reprobes {}",
            self.counters.cycles,
            self.prober.status(),
            self.prober.wafers_tested(),
            self.prober.wafers_to_test(),
            self.prober.position(),
            self.prober.probe_mask(),
            self.counters.bins_sent,
            self.counters.reprobes,
        )
    }
}
