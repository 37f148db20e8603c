// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Recreate an extracted model set from its model summary, without running
//! the solver: each recorded command is pinned again in a fresh copy of the
//! corpus.

use std::{fs, path::Path};

use alloy_text::rewrite::pin_command;
use log::{info, warn};
use thiserror::Error;

use crate::{
    corpus::{CorpusError, RoutedList},
    extract::OutputFiles,
    ledger::{load_summary, CsvSink, LedgerError, RESULT_HEADER},
    outcome::Verdict,
};

/// A failure that stops recreation.
#[derive(Error, Debug)]
pub enum RecreateError {
    /// The summary or result file could not be read or written
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// A model list could not be written
    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

/// What happened to the models of the summary.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RecreateReport {
    /// Models routed as SAT
    pub sat: usize,
    /// Models routed as UNSAT
    pub unsat: usize,
    /// Models absent from the corpus
    pub missing: usize,
    /// Models that could not be rewritten
    pub failed: usize,
}

/// Pin the commands recorded in `summary` in the models under `dir`, writing
/// new SAT/UNSAT lists and a `result.csv` with the status of each model.
pub fn recreate(summary: &Path, dir: &Path) -> Result<RecreateReport, RecreateError> {
    let records = load_summary(summary)?;
    let outputs = OutputFiles::in_dir(dir);
    let mut sat = RoutedList::create(&outputs.sat_list)?;
    let mut unsat = RoutedList::create(&outputs.unsat_list)?;
    let mut results = CsvSink::create(&dir.join("result.csv"), &RESULT_HEADER)?;
    let mut report = RecreateReport::default();

    for record in records {
        let path = dir.join(&record.file);
        if !path.exists() {
            info!("{} not found", record.file);
            results.append(&(&record.file, "file not found"))?;
            report.missing += 1;
            continue;
        }
        let pinned = fs::read_to_string(&path)
            .map_err(|err| err.to_string())
            .and_then(|source| pin_command(&source, &record.command).map_err(|err| err.to_string()))
            .and_then(|content| fs::write(&path, content).map_err(|err| err.to_string()));
        if let Err(msg) = pinned {
            warn!("could not recreate {}: {msg}", record.file);
            results.append(&(&record.file, &msg))?;
            report.failed += 1;
            continue;
        }
        match record.verdict {
            Verdict::Sat => {
                sat.append(&record.file)?;
                report.sat += 1;
            }
            Verdict::Unsat => {
                unsat.append(&record.file)?;
                report.unsat += 1;
            }
        }
        results.append(&(&record.file, "success"))?;
    }
    Ok(report)
}
