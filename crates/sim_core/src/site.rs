//! One device slot on a handler.
//!
//! Lifecycle: `Empty → WaitingBin → WaitingRelease → Empty`, or straight
//! back to `Empty` from `WaitingBin` for single-phase binning. Every
//! illegal transition is a logged no-op that returns `false`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteState {
    Empty,
    WaitingBin,
    WaitingRelease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    index: usize,
    state: SiteState,
    assigned_bin: Option<i32>,
    /// Last bin this site left with; drives reprobe bookkeeping.
    last_bin: Option<i32>,
    history: Vec<i32>,
    contact: bool,
}

impl Site {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: SiteState::Empty,
            assigned_bin: None,
            last_bin: None,
            history: Vec::new(),
            contact: true,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SiteState {
        self.state
    }

    pub fn is_populated(&self) -> bool {
        self.state != SiteState::Empty
    }

    pub fn populate(&mut self) -> bool {
        if self.state != SiteState::Empty {
            tracing::debug!(site = self.index, state = ?self.state, "populate on occupied site ignored");
            return false;
        }
        self.state = SiteState::WaitingBin;
        true
    }

    /// Single-phase binning: record and empty the site in one step.
    pub fn send_to_bin(&mut self, bin: i32) -> bool {
        if self.state != SiteState::WaitingBin {
            tracing::debug!(site = self.index, state = ?self.state, bin, "bin for site not waiting bin data ignored");
            return false;
        }
        self.history.push(bin);
        self.last_bin = Some(bin);
        self.assigned_bin = None;
        self.state = SiteState::Empty;
        true
    }

    /// Two-phase binning: store the bin and wait for release. A second call
    /// while waiting release replaces the stored bin.
    pub fn set_bin(&mut self, bin: i32) -> bool {
        match self.state {
            SiteState::Empty => {
                tracing::debug!(site = self.index, bin, "set bin on empty site ignored");
                false
            }
            SiteState::WaitingBin | SiteState::WaitingRelease => {
                self.assigned_bin = Some(bin);
                self.state = SiteState::WaitingRelease;
                true
            }
        }
    }

    pub fn release(&mut self) -> bool {
        if self.state != SiteState::WaitingRelease {
            tracing::debug!(site = self.index, state = ?self.state, "release ignored");
            return false;
        }
        let Some(bin) = self.assigned_bin.take() else {
            return false;
        };
        self.history.push(bin);
        self.last_bin = Some(bin);
        self.state = SiteState::Empty;
        true
    }

    pub fn ready_for_release(&self) -> bool {
        matches!(self.state, SiteState::Empty | SiteState::WaitingRelease)
    }

    /// The stored bin; only visible while waiting release.
    pub fn assigned_bin(&self) -> Option<i32> {
        match self.state {
            SiteState::WaitingRelease => self.assigned_bin,
            SiteState::Empty | SiteState::WaitingBin => None,
        }
    }

    pub fn last_bin(&self) -> Option<i32> {
        self.last_bin
    }

    pub fn history(&self) -> &[i32] {
        &self.history
    }

    pub fn contact(&self) -> bool {
        self.contact
    }

    /// Returns true when the contact motors actually moved.
    pub fn set_contact(&mut self, contact: bool) -> bool {
        if self.contact == contact {
            return false;
        }
        if contact {
            tracing::debug!(site = self.index, "extend contact motors");
        } else {
            tracing::debug!(site = self.index, "retract contact motors");
        }
        self.contact = contact;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_phase_cycle() {
        let mut site = Site::new(0);
        assert!(site.populate());
        assert_eq!(site.state(), SiteState::WaitingBin);
        assert!(site.send_to_bin(3));
        assert_eq!(site.state(), SiteState::Empty);
        assert_eq!(site.history(), &[3]);
    }

    #[test]
    fn two_phase_cycle_exposes_bin_only_while_waiting_release() {
        let mut site = Site::new(1);
        site.populate();
        assert_eq!(site.assigned_bin(), None);
        assert!(site.set_bin(7));
        assert_eq!(site.assigned_bin(), Some(7));
        assert!(site.release());
        assert_eq!(site.assigned_bin(), None);
        assert_eq!(site.history(), &[7]);
    }

    #[test]
    fn set_bin_twice_overwrites() {
        let mut site = Site::new(0);
        site.populate();
        site.set_bin(4);
        assert!(site.set_bin(5));
        site.release();
        assert_eq!(site.history(), &[5]);
    }

    #[test]
    fn illegal_transitions_are_no_ops() {
        let mut site = Site::new(0);
        assert!(!site.release());
        assert!(!site.send_to_bin(1));
        assert!(!site.set_bin(1));
        site.populate();
        assert!(!site.populate());
        assert!(!site.release());
        site.set_bin(2);
        assert!(!site.send_to_bin(2));
        assert!(site.history().is_empty());
    }

    #[test]
    fn history_length_tracks_releases() {
        let mut site = Site::new(0);
        for k in 1..=5 {
            site.populate();
            site.set_bin(k);
            site.release();
            assert_eq!(site.history().len(), usize::try_from(k).unwrap());
        }
    }

    #[test]
    fn ready_for_release_by_state() {
        let mut site = Site::new(0);
        assert!(site.ready_for_release());
        site.populate();
        assert!(!site.ready_for_release());
        site.set_bin(1);
        assert!(site.ready_for_release());
    }

    #[test]
    fn contact_reports_movement() {
        let mut site = Site::new(0);
        assert!(!site.set_contact(true));
        assert!(site.set_contact(false));
        assert!(site.set_contact(true));
    }
}
