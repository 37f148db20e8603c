// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! How many SAT and UNSAT models have been extracted, and how many are wanted.

use serde::Serialize;

use crate::outcome::Verdict;

/// Running counts of extracted models against their targets. Counts only
/// ever go up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Quota {
    /// SAT models extracted so far
    pub num_sat: usize,
    /// UNSAT models extracted so far
    pub num_unsat: usize,
    /// SAT models wanted
    pub sat_wanted: usize,
    /// UNSAT models wanted
    pub unsat_wanted: usize,
}

impl Quota {
    /// An empty quota with the given targets.
    pub fn new(sat_wanted: usize, unsat_wanted: usize) -> Self {
        Self {
            num_sat: 0,
            num_unsat: 0,
            sat_wanted,
            unsat_wanted,
        }
    }

    /// Whether enough models with `verdict` have been extracted.
    pub fn is_met(&self, verdict: Verdict) -> bool {
        match verdict {
            Verdict::Sat => self.num_sat >= self.sat_wanted,
            Verdict::Unsat => self.num_unsat >= self.unsat_wanted,
        }
    }

    /// Whether both targets are met.
    pub fn all_met(&self) -> bool {
        self.is_met(Verdict::Sat) && self.is_met(Verdict::Unsat)
    }

    /// Count one more extracted model.
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Sat => self.num_sat += 1,
            Verdict::Unsat => self.num_unsat += 1,
        }
    }
}
