// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Statistics from a single solver run: what the process did, as seen from
//! outside (exit status, wall time, CPU usage through `getrusage`), and what
//! it printed about the command it ran.

use std::{error::Error, time::Duration};

use serde::{Deserialize, Serialize};

use crate::outcome::Verdict;

/// Marker of the stdout line carrying the solving time in nanoseconds.
pub const TIME_MARKER: &str = "Execution time(ns)";
/// Marker of the stdout line carrying the satisfiability verdict.
pub const VERDICT_MARKER: &str = "Satisfiable?";
/// Output that shows the solver ran out of memory or translation capacity.
pub const OUT_OF_MEMORY_MARKERS: [&str; 2] = [
    "java.lang.OutOfMemoryError",
    "Translation capacity exceeded.",
];

/// `RunMeasurement` holds everything observed about one run of the solver
/// child process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeasurement {
    /// Elapsed wall-clock time of the process.
    pub real_time: Duration,
    /// User time of the process and its children.
    pub user_time: Duration,
    /// System time of the process and its children.
    pub sys_time: Duration,
    /// Exit code, if the process exited on its own.
    pub exit_code: Option<i32>,
    /// Signal that terminated the process, if any.
    pub signal: Option<i32>,
    /// Whether the process was killed for running past its time limit.
    pub timed_out: bool,
    /// Whether the output reported memory exhaustion.
    pub out_of_memory: bool,
    /// Solving time reported by the solver itself.
    pub reported_time: Option<Duration>,
    /// Satisfiability reported by the solver.
    pub verdict: Option<Verdict>,
}

fn marker_value(line: &str) -> Option<&str> {
    line.split_once(": ").map(|(_, value)| value.trim())
}

impl RunMeasurement {
    /// Take note of one line of the solver's standard output.
    pub fn observe_line(&mut self, line: &str) {
        if line.contains(TIME_MARKER) {
            self.reported_time = marker_value(line)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_nanos);
        } else if line.contains(VERDICT_MARKER) {
            self.verdict = marker_value(line).and_then(|v| v.parse().ok());
        } else if OUT_OF_MEMORY_MARKERS.iter().any(|m| line.contains(m)) {
            self.out_of_memory = true;
        }
    }

    /// Print a human-readable version of these results.
    pub fn print(&self) {
        println!(
            "time: {:0.1}s{timed_out_msg}",
            &self.real_time.as_secs_f64(),
            timed_out_msg = if self.timed_out { " (timed out)" } else { "" }
        );
        println!("  user:   {:0.1}s", self.user_time.as_secs_f64());
        println!("  sys:    {:0.1}s", self.sys_time.as_secs_f64());
        if let Some(reported) = self.reported_time {
            println!("solver: {:0.2}s", reported.as_secs_f64());
        }
        match (self.exit_code, self.signal) {
            (Some(code), _) => println!("exit:   {code}"),
            (None, Some(signal)) => println!("signal: {signal}"),
            (None, None) => {}
        }
        if let Some(verdict) = self.verdict {
            println!("verdict: {verdict}");
        }
        if self.out_of_memory {
            println!("out of memory");
        }
    }

    /// Convert these results to a compact JSON representation.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("could not serialize `RunMeasurement`")
    }

    /// Parse results serialized as JSON.
    pub fn from_json(s: &str) -> Result<Self, Box<dyn Error>> {
        let v = serde_json::from_str(s)?;
        Ok(v)
    }
}
