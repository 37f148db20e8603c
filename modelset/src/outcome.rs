// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Classification of a solver run against the desired time window.
//!
//! There are five possible outcomes of running a command:
//!
//! - `SUCCESS`: it ran to completion and the solving time falls in the window;
//! - `TOOSHORT`: it ran to completion but faster than the window's lower bound;
//! - `TIMEOUT`: it took longer than the upper bound, was killed, or ran out of
//!   memory (a scope that exhausts memory is as much "too large" as one that
//!   times out);
//! - `EXCEPTION`: the solver reported some other error;
//! - `UNKNOWN`: anything else, including failing to launch the solver at all.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::measurement::RunMeasurement;

/// Exit code of a solver child that ran the command to completion.
pub const EXIT_COMPLETED: i32 = 0;
/// Exit code of a solver child whose internal timeout fired.
pub const EXIT_TIMEOUT: i32 = 1;
/// Exit code of a solver child that caught an exception.
pub const EXIT_EXCEPTION: i32 = 2;

/// Satisfiability reported by the solver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// An instance (or counterexample) was found
    #[serde(rename = "SAT")]
    Sat,
    /// No instance exists within the scope
    #[serde(rename = "UNSAT")]
    Unsat,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Sat => write!(f, "SAT"),
            Verdict::Unsat => write!(f, "UNSAT"),
        }
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SAT" => Ok(Verdict::Sat),
            "UNSAT" => Ok(Verdict::Unsat),
            _ => Err(format!("not a verdict: {s:?}")),
        }
    }
}

/// The window of solving times we are looking for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    /// Runs faster than this are too short
    pub lower: Duration,
    /// Runs slower than this are timeouts
    pub upper: Duration,
}

impl TimeWindow {
    /// Create a window from its bounds.
    pub fn new(lower: Duration, upper: Duration) -> Self {
        Self { lower, upper }
    }

    /// How long the solver process may run before it is killed.
    ///
    /// The solver starts its own clock a little after the process is
    /// launched, so it gets one extra second over the upper bound.
    pub fn time_limit(&self) -> Duration {
        self.upper + Duration::from_secs(1)
    }
}

/// The status part of a [`RunOutcome`], for reporting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    /// In the window
    Success,
    /// Below the window
    TooShort,
    /// Above the window, killed, or out of memory
    Timeout,
    /// The solver raised an error
    Exception,
    /// Unexpected process state
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "SUCCESS",
            Status::TooShort => "TOOSHORT",
            Status::Timeout => "TIMEOUT",
            Status::Exception => "EXCEPTION",
            Status::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// The classified result of running one command at one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Solving time inside the window
    Success {
        /// Solving time reported by the solver
        elapsed: Duration,
        /// Satisfiability
        verdict: Verdict,
    },
    /// Solving time below the window
    TooShort {
        /// Solving time reported by the solver
        elapsed: Duration,
        /// Satisfiability
        verdict: Verdict,
    },
    /// Too slow, killed, or out of memory
    Timeout,
    /// The solver raised an error other than running out of memory
    Exception,
    /// The run ended in a state that should not happen
    Unknown {
        /// What went wrong, for diagnostics
        cause: String,
    },
}

impl RunOutcome {
    /// The status of this outcome.
    pub fn status(&self) -> Status {
        match self {
            RunOutcome::Success { .. } => Status::Success,
            RunOutcome::TooShort { .. } => Status::TooShort,
            RunOutcome::Timeout => Status::Timeout,
            RunOutcome::Exception => Status::Exception,
            RunOutcome::Unknown { .. } => Status::Unknown,
        }
    }

    /// The verdict, for outcomes that carry one.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            RunOutcome::Success { verdict, .. } | RunOutcome::TooShort { verdict, .. } => {
                Some(*verdict)
            }
            _ => None,
        }
    }

    /// The reported solving time, for outcomes that carry one.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            RunOutcome::Success { elapsed, .. } | RunOutcome::TooShort { elapsed, .. } => {
                Some(*elapsed)
            }
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success { elapsed, verdict } | RunOutcome::TooShort { elapsed, verdict } => {
                write!(
                    f,
                    "{} ({verdict} in {:0.2}s)",
                    self.status(),
                    elapsed.as_secs_f64()
                )
            }
            RunOutcome::Unknown { cause } => write!(f, "UNKNOWN ({cause})"),
            _ => write!(f, "{}", self.status()),
        }
    }
}

/// Classify a measured run against `window`.
///
/// This only looks at the measurement, so the same measurement always gets
/// the same classification.
pub fn classify(m: &RunMeasurement, window: &TimeWindow) -> RunOutcome {
    if m.exit_code == Some(EXIT_EXCEPTION) && m.out_of_memory {
        return RunOutcome::Timeout;
    }
    if m.timed_out {
        return RunOutcome::Timeout;
    }
    match m.exit_code {
        Some(EXIT_EXCEPTION) => RunOutcome::Exception,
        Some(EXIT_TIMEOUT) => RunOutcome::Timeout,
        Some(EXIT_COMPLETED) => match (m.reported_time, m.verdict) {
            (Some(elapsed), Some(verdict)) => {
                if elapsed > window.upper {
                    RunOutcome::Timeout
                } else if elapsed >= window.lower {
                    RunOutcome::Success { elapsed, verdict }
                } else {
                    RunOutcome::TooShort { elapsed, verdict }
                }
            }
            _ => RunOutcome::Unknown {
                cause: "solver exited without reporting a time and a verdict".to_string(),
            },
        },
        Some(code) => RunOutcome::Unknown {
            cause: format!("unexpected exit code {code}"),
        },
        None => RunOutcome::Unknown {
            cause: match m.signal {
                Some(signal) => format!("terminated by signal {signal}"),
                None => "no exit status".to_string(),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> TimeWindow {
        TimeWindow::new(Duration::from_secs(120), Duration::from_secs(600))
    }

    fn completed(secs: u64, verdict: Verdict) -> RunMeasurement {
        RunMeasurement {
            exit_code: Some(EXIT_COMPLETED),
            reported_time: Some(Duration::from_secs(secs)),
            verdict: Some(verdict),
            ..Default::default()
        }
    }

    #[test]
    fn test_completed_runs() {
        let w = window();
        assert_eq!(
            classify(&completed(5, Verdict::Sat), &w),
            RunOutcome::TooShort {
                elapsed: Duration::from_secs(5),
                verdict: Verdict::Sat
            }
        );
        // both bounds are inclusive
        assert_eq!(classify(&completed(120, Verdict::Unsat), &w).status(), Status::Success);
        assert_eq!(classify(&completed(600, Verdict::Unsat), &w).status(), Status::Success);
        assert_eq!(classify(&completed(601, Verdict::Sat), &w), RunOutcome::Timeout);
    }

    #[test]
    fn test_exit_codes() {
        let w = window();
        let exited = |code, out_of_memory| RunMeasurement {
            exit_code: Some(code),
            out_of_memory,
            ..Default::default()
        };
        assert_eq!(classify(&exited(EXIT_TIMEOUT, false), &w), RunOutcome::Timeout);
        assert_eq!(classify(&exited(EXIT_EXCEPTION, false), &w), RunOutcome::Exception);
        assert_eq!(classify(&exited(EXIT_EXCEPTION, true), &w), RunOutcome::Timeout);
        assert_eq!(classify(&exited(3, false), &w).status(), Status::Unknown);
        // an out-of-memory message only matters for a crash
        assert_eq!(classify(&exited(3, true), &w).status(), Status::Unknown);
    }

    #[test]
    fn test_killed_by_watchdog() {
        let m = RunMeasurement {
            timed_out: true,
            signal: Some(15),
            ..Default::default()
        };
        assert_eq!(classify(&m, &window()), RunOutcome::Timeout);
        let m = RunMeasurement {
            signal: Some(9),
            ..Default::default()
        };
        assert_eq!(
            classify(&m, &window()),
            RunOutcome::Unknown {
                cause: "terminated by signal 9".to_string()
            }
        );
    }

    #[test]
    fn test_missing_report_is_unknown() {
        let m = RunMeasurement {
            exit_code: Some(EXIT_COMPLETED),
            reported_time: Some(Duration::from_secs(200)),
            ..Default::default()
        };
        assert_eq!(classify(&m, &window()).status(), Status::Unknown);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let w = window();
        let m = completed(300, Verdict::Sat);
        assert_eq!(classify(&m, &w), classify(&m.clone(), &w));
    }

    #[test]
    fn test_display() {
        let outcome = classify(&completed(130, Verdict::Unsat), &window());
        insta::assert_display_snapshot!(outcome, @"SUCCESS (UNSAT in 130.00s)");
    }
}
