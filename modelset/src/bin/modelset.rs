// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Gather, clean and extract Alloy model sets.

use std::{path::PathBuf, process};

use clap::Parser;
use glob::Pattern;
use modelset::{
    config::{ExtractConfig, SolverArgs, WindowArgs},
    corpus::{clean, gather, CleanOptions, Readme},
    extract::Extractor,
    ledger::load_ledger,
    recreate::recreate,
    report::{filter_records, print_table},
    runner::ProcessRunner,
};
use rand::{rngs::StdRng, SeedableRng};

#[derive(clap::Subcommand, Clone, Debug, PartialEq, Eq)]
enum Command {
    /// Find a scope for a command of each model and sort the models into SAT
    /// and UNSAT sets.
    Extract {
        #[command(flatten)]
        config: ExtractConfig,
        #[command(flatten)]
        solver: SolverArgs,
    },
    /// Run one command of one model once and report what happened.
    Run {
        /// The model
        model: PathBuf,
        /// Ordinal of the command in the model
        command: usize,
        /// Overall scope to impose (default: keep the declared scopes)
        #[arg(long)]
        scope: Option<u32>,
        #[command(flatten)]
        window: WindowArgs,
        #[command(flatten)]
        solver: SolverArgs,
        /// Output the measurement in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Remove hidden files, files other than models, Alloy's utility models,
    /// duplicate models and earlier versions of models from a model set,
    /// then empty directories.
    Clean {
        /// Model set directory
        dir: PathBuf,
        /// Keep files other than models
        #[arg(long)]
        keep_non_models: bool,
        /// Keep Alloy's utility models
        #[arg(long)]
        keep_util_models: bool,
        /// Keep models with the same name and size
        #[arg(long)]
        keep_duplicates: bool,
        /// Keep models that look like an earlier version of another model in
        /// the same directory
        #[arg(long)]
        keep_multiple_versions: bool,
        /// Seed for choosing which duplicate to keep
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Copy existing model set directories into a new model set.
    Gather {
        /// The new model set directory
        #[arg(long)]
        into: PathBuf,
        /// Existing model set directories
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// Pin the commands recorded in a model summary in a fresh copy of a
    /// corpus.
    Recreate {
        /// The model_summary.csv of an earlier extraction
        #[arg(long)]
        summary: PathBuf,
        /// Model set directory
        dir: PathBuf,
    },
    /// Print the records of a ledger as a table.
    Report {
        /// The ledger (commandScopes.csv)
        ledger: PathBuf,
        /// Glob pattern over model paths to report
        #[arg(short = 'F', long = "filter", default_value = "*")]
        filter: String,
    },
}

#[derive(clap::Parser, Debug)]
struct App {
    /// Command to run
    #[command(subcommand)]
    command: Command,
}

fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl App {
    fn exec(self) -> Result<(), Box<dyn std::error::Error>> {
        match self.command {
            Command::Extract { config, solver } => {
                let runner = ProcessRunner::new(solver.solver_cmd(), config.window.window());
                let mut extractor = Extractor::open(config, runner)?;
                let quota = extractor.run()?;
                println!(
                    "extracted {} SAT and {} UNSAT models",
                    quota.num_sat, quota.num_unsat
                );
            }
            Command::Run {
                model,
                command,
                scope,
                window,
                solver,
                json,
            } => {
                let runner = ProcessRunner::new(solver.solver_cmd(), window.window());
                let measurement = runner.measure(&model, command, scope)?;
                if json {
                    println!("{}", measurement.to_json());
                } else {
                    measurement.print();
                    println!(
                        "outcome: {}",
                        modelset::outcome::classify(&measurement, runner.window())
                    );
                }
            }
            Command::Clean {
                dir,
                keep_non_models,
                keep_util_models,
                keep_duplicates,
                keep_multiple_versions,
                seed,
            } => {
                let options = CleanOptions {
                    non_models: !keep_non_models,
                    util_models: !keep_util_models,
                    duplicates: !keep_duplicates,
                    multiple_versions: !keep_multiple_versions,
                };
                let report = clean(&dir, options, &mut rng(seed))?;
                let readme = Readme::in_dir(&dir);
                readme.note(&format!(
                    "Removed {} files other than models.",
                    report.non_models
                ))?;
                readme.note(&format!("Removed {} util files", report.util_models))?;
                readme.note(&format!("Removed {} duplicate files.", report.duplicates))?;
                readme.note(&format!(
                    "Removed {} files that might be an earlier version of another file.",
                    report.old_versions
                ))?;
                println!("{report:?}");
            }
            Command::Gather { into, sources } => {
                let counts = gather(&sources, &into)?;
                println!(
                    "copied {} models from {} directories",
                    counts.iter().sum::<usize>(),
                    counts.len()
                );
            }
            Command::Recreate { summary, dir } => {
                let report = recreate(&summary, &dir)?;
                println!("{report:?}");
            }
            Command::Report { ledger, filter } => {
                let pattern = Pattern::new(&filter)?;
                let records = filter_records(load_ledger(&ledger)?, &pattern);
                print_table(&records);
            }
        }
        Ok(())
    }
}

fn main() {
    pretty_env_logger::init();
    let app = App::parse();
    if let Err(err) = app.exec() {
        eprintln!("modelset: {err}");
        process::exit(1);
    }
}
