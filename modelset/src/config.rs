// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Command-line configuration shared by the `modelset` subcommands.

use std::path::PathBuf;

use clap::Args;

use crate::{
    outcome::TimeWindow,
    runner::{solver_path, SolverCmd},
    search::{ScopeBounds, TimeoutFallback},
};

/// Name of the solver child binary, looked up through `ALLOY_RUNNER_BIN`
/// and then `$PATH`.
pub const SOLVER_BIN: &str = "alloy-runner";

#[derive(Args, Clone, Debug, PartialEq, Eq)]
/// The window of solving times to aim for.
pub struct WindowArgs {
    #[arg(long, default_value = "2m")]
    /// Runs faster than this are too short
    pub lower_bound: humantime::Duration,

    #[arg(long, default_value = "10m")]
    /// Runs slower than this are timeouts; the solver is killed one second
    /// after it
    pub upper_bound: humantime::Duration,
}

impl WindowArgs {
    /// The configured window.
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.lower_bound.into(), self.upper_bound.into())
    }
}

#[derive(Args, Clone, Debug, PartialEq, Eq)]
/// How to launch the solver child.
pub struct SolverArgs {
    #[arg(long)]
    /// Solver program (default: $ALLOY_RUNNER_BIN, or alloy-runner)
    pub solver: Option<String>,

    #[arg(long = "solver-arg", allow_hyphen_values = true)]
    /// Argument to pass to the solver before the model, command and scope
    /// (may be repeated)
    pub solver_args: Vec<String>,
}

impl SolverArgs {
    /// The solver invocation.
    pub fn solver_cmd(&self) -> SolverCmd {
        let cmd = match &self.solver {
            Some(cmd) => cmd.clone(),
            None => solver_path(SOLVER_BIN),
        };
        SolverCmd::new(cmd).args(&self.solver_args)
    }
}

/// How to pick the command to search for in each model.
#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandSelection {
    /// One command chosen uniformly at random
    Random,
    /// Every command in order, until one gets a scope
    All,
}

#[derive(Args, Clone, Debug, PartialEq, Eq)]
/// Configuration of an extraction run.
pub struct ExtractConfig {
    /// Model set directory: the corpus, and where results are written
    pub dir: PathBuf,

    #[command(flatten)]
    /// Time window
    pub window: WindowArgs,

    #[arg(long, default_value_t = 10)]
    /// Smallest overall scope to search
    pub min_scope: u32,

    #[arg(long, default_value_t = 300)]
    /// Largest overall scope to search
    pub max_scope: u32,

    #[arg(long, default_value_t = 200)]
    /// Number of SAT models wanted
    pub num_sat: usize,

    #[arg(long, default_value_t = 200)]
    /// Number of UNSAT models wanted
    pub num_unsat: usize,

    #[arg(long, default_value_t = 0)]
    /// Continue an earlier run from this many files processed
    pub file_count: usize,

    #[arg(long, conflicts_with = "file_count")]
    /// Continue an earlier run from its saved state
    pub resume: bool,

    #[arg(value_enum, long, default_value_t = CommandSelection::Random)]
    /// Which commands of a model to try
    pub commands: CommandSelection,

    #[arg(value_enum, long, default_value_t = TimeoutFallback::NarrowProbe)]
    /// Where to search when a command without an overall scope times out
    pub timeout_fallback: TimeoutFallback,

    #[arg(long)]
    /// Seed for shuffling and command selection (default: random, saved for
    /// resuming)
    pub seed: Option<u64>,
}

impl ExtractConfig {
    /// The default configuration for the model set in `dir`.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            window: WindowArgs {
                lower_bound: std::time::Duration::from_secs(120).into(),
                upper_bound: std::time::Duration::from_secs(600).into(),
            },
            min_scope: 10,
            max_scope: 300,
            num_sat: 200,
            num_unsat: 200,
            file_count: 0,
            resume: false,
            commands: CommandSelection::Random,
            timeout_fallback: TimeoutFallback::NarrowProbe,
            seed: None,
        }
    }

    /// The scope search bounds.
    pub fn bounds(&self) -> ScopeBounds {
        ScopeBounds {
            min: self.min_scope,
            max: self.max_scope,
        }
    }
}
