// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Extract a set of SAT and UNSAT models from a corpus.
//!
//! The models of a model set directory are processed in a shuffled order
//! that is saved to disk. For each model, a command is chosen, a scope is
//! found for it with [`ScopeSearch`], the model is rewritten so that the
//! command at that scope is its only command, and the model's path is added
//! to the SAT or UNSAT list. Extraction stops once both quotas are met.
//!
//! All results are written to the model set directory as they are
//! produced, so an interrupted extraction can be resumed. The command tried
//! for a model depends only on the run's seed (saved with the progress) and
//! the model's position in the processing order, so a resumed run makes the
//! same choices as an uninterrupted one. Appending the
//! model's path to its SAT/UNSAT list is what commits a model: the counts
//! are recomputed from those lists on resume, and a model already on a list
//! is never processed again.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use alloy_text::{
    command::{parse_commands, Command, ParseError},
    rewrite::{pin_command, RewriteError},
};
use log::{info, warn};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{CommandSelection, ExtractConfig},
    corpus::{
        find_models, read_file_list, read_routed, shuffle, write_file_list, CorpusError, Readme,
        RoutedList,
    },
    ledger::{Ledger, LedgerError, LedgerRecord, SummaryRecord},
    outcome::Verdict,
    quota::Quota,
    runner::SolverRunner,
    search::{Found, ScopeSearch},
};

/// A failure of the extraction, or of processing one model.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Corpus files could not be read or written
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    /// The ledger could not be read or written
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// A model or output file could not be read or written
    #[error("{}: {source}", path.display())]
    Io {
        /// The file
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// The extraction state could not be loaded or saved
    #[error("{}: {source}", path.display())]
    State {
        /// The state file
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
    /// The commands of a model could not be extracted
    #[error("{}: {source}", path.display())]
    Parse {
        /// The model
        path: PathBuf,
        /// Underlying error
        source: ParseError,
    },
    /// A model could not be rewritten to a single command
    #[error("{}: {source}", path.display())]
    Rewrite {
        /// The model
        path: PathBuf,
        /// Underlying error
        source: RewriteError,
    },
}

/// The files an extraction writes in the model set directory.
#[derive(Debug, Clone)]
pub struct OutputFiles {
    /// The shuffled processing order
    pub file_list: PathBuf,
    /// Paths of extracted SAT models
    pub sat_list: PathBuf,
    /// Paths of extracted UNSAT models
    pub unsat_list: PathBuf,
    /// One row per attempt
    pub ledger: PathBuf,
    /// One row per extracted model
    pub summary: PathBuf,
    /// How far the extraction got
    pub state: PathBuf,
}

impl OutputFiles {
    /// The output files of the model set in `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            file_list: dir.join("random-files-list.txt"),
            sat_list: dir.join("sat_models.txt"),
            unsat_list: dir.join("unsat_models.txt"),
            ledger: dir.join("commandScopes.csv"),
            summary: dir.join("model_summary.csv"),
            state: dir.join("extraction-state.json"),
        }
    }
}

/// Progress of an extraction, saved after every model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionState {
    /// Seed of the shuffle and of the command choices
    pub seed: u64,
    /// Number of entries of the file list already processed
    pub files_processed: usize,
}

impl ExtractionState {
    /// Load the state saved at `path`.
    pub fn load(path: &Path) -> Result<Self, ExtractError> {
        let text = fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ExtractError::State {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save the state to `path`, replacing the previous state in one step.
    pub fn save(&self, path: &Path) -> Result<(), ExtractError> {
        let json = serde_json::to_string(self).map_err(|source| ExtractError::State {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|source| ExtractError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// A running extraction over one model set directory.
pub struct Extractor<R> {
    config: ExtractConfig,
    outputs: OutputFiles,
    runner: R,
    seed: u64,
    files: Vec<PathBuf>,
    next: usize,
    quota: Quota,
    routed: HashSet<String>,
    ledger: Ledger,
    sat: RoutedList,
    unsat: RoutedList,
}

impl<R: SolverRunner> Extractor<R> {
    /// Start or resume an extraction.
    ///
    /// A fresh extraction shuffles the models of the corpus and starts new
    /// output files. With `--file-count` or `--resume`, the saved file list
    /// is reloaded instead, the quota counts are taken from the existing
    /// SAT/UNSAT lists and the seed from the saved state. Any failure here is
    /// fatal to the whole extraction.
    pub fn open(config: ExtractConfig, runner: R) -> Result<Self, ExtractError> {
        let outputs = OutputFiles::in_dir(&config.dir);
        let mut quota = Quota::new(config.num_sat, config.num_unsat);

        let resuming = config.resume || config.file_count > 0;
        let (seed, files, next, ledger, sat, unsat, routed) = if resuming {
            let saved = if config.resume || outputs.state.exists() {
                Some(ExtractionState::load(&outputs.state)?)
            } else {
                None
            };
            let next = match saved {
                Some(state) if config.resume => state.files_processed,
                _ => config.file_count,
            };
            let seed = match (saved, config.seed) {
                (Some(state), Some(seed)) if seed != state.seed => {
                    warn!("ignoring --seed {seed}, resuming with saved seed {}", state.seed);
                    state.seed
                }
                (Some(state), _) => state.seed,
                (None, seed) => {
                    warn!(
                        "no saved state in {}, command choices may differ from the earlier run",
                        outputs.state.display()
                    );
                    seed.unwrap_or_else(rand::random)
                }
            };
            let files = read_file_list(&outputs.file_list)?;
            let sat_models = read_routed(&outputs.sat_list)?;
            let unsat_models = read_routed(&outputs.unsat_list)?;
            quota.num_sat = sat_models.len();
            quota.num_unsat = unsat_models.len();
            info!(
                "resuming at file {next} of {} with {} SAT and {} UNSAT models",
                files.len(),
                quota.num_sat,
                quota.num_unsat
            );
            (
                seed,
                files,
                next,
                Ledger::open(&outputs.ledger, &outputs.summary)?,
                RoutedList::open(&outputs.sat_list)?,
                RoutedList::open(&outputs.unsat_list)?,
                sat_models.into_iter().chain(unsat_models).collect::<HashSet<_>>(),
            )
        } else {
            let seed = config.seed.unwrap_or_else(rand::random);
            let mut files = find_models(&config.dir)?;
            shuffle(&mut files, &mut StdRng::seed_from_u64(seed));
            write_file_list(&outputs.file_list, &files)?;
            ExtractionState {
                seed,
                files_processed: 0,
            }
            .save(&outputs.state)?;
            info!(
                "found {} models in {} (seed {seed})",
                files.len(),
                config.dir.display()
            );
            (
                seed,
                files,
                0,
                Ledger::create(&outputs.ledger, &outputs.summary)?,
                RoutedList::create(&outputs.sat_list)?,
                RoutedList::create(&outputs.unsat_list)?,
                HashSet::new(),
            )
        };

        Ok(Self {
            config,
            outputs,
            runner,
            seed,
            files,
            next,
            quota,
            routed,
            ledger,
            sat,
            unsat,
        })
    }

    /// The models extracted so far.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// The processing order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of entries of the processing order handled so far.
    pub fn files_processed(&self) -> usize {
        self.next
    }

    /// Whether there is anything left to do.
    pub fn is_done(&self) -> bool {
        self.quota.all_met() || self.next >= self.files.len()
    }

    /// Process the next model of the processing order.
    ///
    /// Failures specific to the model are logged and the model is skipped;
    /// only failures to save progress are returned.
    pub fn step(&mut self) -> Result<(), ExtractError> {
        let Some(rel) = self.files.get(self.next).cloned() else {
            return Ok(());
        };
        info!("run no. {}, {}", self.next, rel.display());
        let file = rel.to_string_lossy().into_owned();
        if self.routed.contains(&file) {
            info!("{file} was already extracted");
        } else if !self.config.dir.join(&rel).exists() {
            info!("{file} no longer exists");
        } else if let Err(err) = self.extract_file(&file) {
            warn!("abnormal behaviour extracting {file}: {err}");
        }
        self.next += 1;
        ExtractionState {
            seed: self.seed,
            files_processed: self.next,
        }
        .save(&self.outputs.state)
    }

    /// Process models until both quotas are met or the corpus runs out,
    /// then note the counts in the README.
    pub fn run(&mut self) -> Result<Quota, ExtractError> {
        while !self.is_done() {
            self.step()?;
        }
        if self.quota.all_met() {
            info!("both quotas met after {} files", self.next);
        }
        let readme = Readme::in_dir(&self.config.dir);
        readme.note(&format!("Extracted {} SAT models.", self.quota.num_sat))?;
        readme.note(&format!("Extracted {} UNSAT models.", self.quota.num_unsat))?;
        Ok(self.quota)
    }

    /// Find a scope for a command of the model `file` and route it.
    fn extract_file(&mut self, file: &str) -> Result<(), ExtractError> {
        let path = self.config.dir.join(file);
        let source = fs::read_to_string(&path).map_err(|source| ExtractError::Io {
            path: path.clone(),
            source,
        })?;
        let commands = match parse_commands(&source) {
            Ok(commands) => commands,
            Err(err) => {
                self.ledger.record(&LedgerRecord::failure(
                    file,
                    err.index(),
                    "",
                    &format!("Parse failed: {err}"),
                ))?;
                return Err(ExtractError::Parse { path, source: err });
            }
        };
        let candidates: Vec<&Command> = match self.config.commands {
            CommandSelection::Random => {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.next as u64 + 1));
                commands.choose(&mut rng).into_iter().collect()
            }
            CommandSelection::All => commands.iter().collect(),
        };
        if candidates.is_empty() {
            info!("no commands in {file}");
            return Ok(());
        }

        let bounds = self.config.bounds();
        for command in candidates {
            info!("searching command {}: {command}", command.index);
            let resolved = ScopeSearch::new(&mut self.runner, &self.quota, bounds, &path, command.index)
                .resolve(command, self.config.timeout_fallback);
            match resolved {
                Ok(found) => return self.commit(file, &path, &source, command, &found),
                Err(failure) => {
                    info!("no scope for command {} of {file}: {failure}", command.index);
                    self.ledger.record(&LedgerRecord::failure(
                        file,
                        command.index,
                        &command.to_string(),
                        &failure.to_string(),
                    ))?;
                }
            }
        }
        Ok(())
    }

    /// Pin `command` at the scope found, and route the model.
    fn commit(
        &mut self,
        file: &str,
        path: &Path,
        source: &str,
        command: &Command,
        found: &Found,
    ) -> Result<(), ExtractError> {
        let original = command.to_string();
        let new_command = match found.scope {
            Some(scope) => command.with_overall_scope(scope).to_string(),
            None => original.clone(),
        };
        let content = match pin_command(source, &new_command) {
            Ok(content) => content,
            Err(err) => {
                self.ledger.record(&LedgerRecord::failure(
                    file,
                    command.index,
                    &original,
                    &format!("Rewrite failed: {err}"),
                ))?;
                return Err(ExtractError::Rewrite {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        fs::write(path, content).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let declared = command.overall_scope();
        self.ledger.record(&LedgerRecord::success(
            file,
            command.index,
            &original,
            &new_command,
            declared,
            found,
        ))?;
        self.ledger.summarize(&SummaryRecord {
            file: file.to_string(),
            verdict: found.verdict,
            command: new_command.clone(),
            scope: found.scope.map_or(i64::from(declared), i64::from),
        })?;
        match found.verdict {
            Verdict::Sat => self.sat.append(file)?,
            Verdict::Unsat => self.unsat.append(file)?,
        }
        self.quota.record(found.verdict);
        self.routed.insert(file.to_string());
        info!(
            "extracted {} model {file} with `{new_command}` in {:0.2}s ({} SAT, {} UNSAT)",
            found.verdict,
            found.elapsed.as_secs_f64(),
            self.quota.num_sat,
            self.quota.num_unsat
        );
        Ok(())
    }
}
