// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Append-only CSV records of extraction attempts.
//!
//! Every attempt, successful or not, becomes one row of the ledger
//! (`commandScopes.csv`); every routed model also becomes one row of the
//! model summary (`model_summary.csv`). Rows are flushed as soon as they are
//! written, so a crash loses at most the row being written.

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::{outcome::Verdict, search::Found};

/// Columns of the attempt ledger.
pub const LEDGER_HEADER: [&str; 8] = [
    "File Path",
    "i-th Command",
    "Original Command",
    "New Command",
    "Overall Scope",
    "Time",
    "Satisfiable?",
    "Reason",
];

/// Columns of the model summary.
pub const SUMMARY_HEADER: [&str; 4] = ["File Path", "Satisfiable?", "New Command", "Scope"];

/// Columns of the result of recreating a model set.
pub const RESULT_HEADER: [&str; 2] = ["File Path", "Status"];

/// A failure reading or writing a CSV file.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The file could not be opened
    #[error("{}: {source}", path.display())]
    Io {
        /// The CSV file
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// A row could not be read or written
    #[error("{}: {source}", path.display())]
    Csv {
        /// The CSV file
        path: PathBuf,
        /// Underlying error
        source: csv::Error,
    },
    /// The file has a different header
    #[error("{}: unexpected header {header:?}", path.display())]
    Header {
        /// The CSV file
        path: PathBuf,
        /// The header found
        header: Vec<String>,
    },
}

/// An append-only CSV file, flushed after every row.
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvSink {
    /// Open `path` for appending, writing `header` if the file is new or
    /// empty.
    pub fn open(path: &Path, header: &[&str]) -> Result<Self, LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        let is_new = file.metadata().map_err(io_err)?.len() == 0;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);
        let mut sink = Self {
            path: path.to_path_buf(),
            writer,
        };
        if is_new {
            sink.write(|w| w.write_record(header))?;
        }
        Ok(sink)
    }

    /// Open `path` truncating anything already there, then write `header`.
    pub fn create(path: &Path, header: &[&str]) -> Result<Self, LedgerError> {
        File::create(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::open(path, header)
    }

    /// Append one record and flush it.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<(), LedgerError> {
        self.write(|w| w.serialize(record))
    }

    fn write(
        &mut self,
        f: impl FnOnce(&mut csv::Writer<File>) -> csv::Result<()>,
    ) -> Result<(), LedgerError> {
        f(&mut self.writer)
            .and_then(|_| self.writer.flush().map_err(csv::Error::from))
            .map_err(|source| LedgerError::Csv {
                path: self.path.clone(),
                source,
            })
    }
}

/// Read the records of the CSV file at `path`, checking its header. Each
/// row is returned with its line number, as a record or the reason it could
/// not be read.
fn read_records<T: DeserializeOwned>(
    path: &Path,
    header: &[&str],
) -> Result<Vec<(u64, csv::Result<T>)>, LedgerError> {
    let file = File::open(path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(file);
    let found = reader
        .headers()
        .map_err(|source| LedgerError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    if found.is_empty() {
        return Ok(vec![]);
    }
    if !found.iter().eq(header.iter().copied()) {
        return Err(LedgerError::Header {
            path: path.to_path_buf(),
            header: found.iter().map(|s| s.to_string()).collect(),
        });
    }
    Ok(reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| (i as u64 + 2, row))
        .collect())
}

/// Times are written in seconds with two decimals.
fn two_decimals<S: Serializer>(time: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match time {
        Some(t) => s.serialize_str(&format!("{t:.2}")),
        None => s.serialize_none(),
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Model path, relative to the corpus root
    #[serde(rename = "File Path")]
    pub file: String,
    /// Ordinal of the command
    #[serde(rename = "i-th Command")]
    pub command: usize,
    /// The command as declared
    #[serde(rename = "Original Command")]
    pub original: String,
    /// The command written back to the model, empty on failure
    #[serde(rename = "New Command")]
    pub rewritten: String,
    /// The declared overall scope (-1 if none) or the scope found
    #[serde(rename = "Overall Scope")]
    pub scope: Option<i64>,
    /// Solving time in seconds at that scope
    #[serde(rename = "Time", serialize_with = "two_decimals")]
    pub time: Option<f64>,
    /// Satisfiability at that scope
    #[serde(rename = "Satisfiable?")]
    pub verdict: Option<Verdict>,
    /// Why no scope was found, empty on success
    #[serde(rename = "Reason")]
    pub reason: String,
}

impl LedgerRecord {
    /// The record of a command resolved to `found` and rewritten to
    /// `rewritten`.
    pub fn success(
        file: &str,
        command: usize,
        original: &str,
        rewritten: &str,
        declared: i32,
        found: &Found,
    ) -> Self {
        Self {
            file: file.to_string(),
            command,
            original: original.to_string(),
            rewritten: rewritten.to_string(),
            scope: Some(found.scope.map_or(i64::from(declared), i64::from)),
            time: Some(found.elapsed.as_secs_f64()),
            verdict: Some(found.verdict),
            reason: String::new(),
        }
    }

    /// The record of a command that got no scope, with `reason`.
    pub fn failure(file: &str, command: usize, original: &str, reason: &str) -> Self {
        Self {
            file: file.to_string(),
            command,
            original: original.to_string(),
            rewritten: String::new(),
            scope: None,
            time: None,
            verdict: None,
            reason: reason.to_string(),
        }
    }

    /// Whether a scope was found.
    pub fn is_success(&self) -> bool {
        self.verdict.is_some()
    }

    /// The outcome for reporting: the verdict, or the failure reason.
    pub fn outcome(&self) -> String {
        match self.verdict {
            Some(verdict) => verdict.to_string(),
            None => self.reason.clone(),
        }
    }
}

/// One row of the model summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Model path, relative to the corpus root
    #[serde(rename = "File Path")]
    pub file: String,
    /// Satisfiability of the pinned command
    #[serde(rename = "Satisfiable?")]
    pub verdict: Verdict,
    /// The pinned command
    #[serde(rename = "New Command")]
    pub command: String,
    /// Its overall scope (-1 if the declared scopes were kept)
    #[serde(rename = "Scope")]
    pub scope: i64,
}

/// The ledger and model summary of one extraction.
#[derive(Debug)]
pub struct Ledger {
    attempts: CsvSink,
    summary: CsvSink,
}

impl Ledger {
    /// Open (or continue) the ledger and summary files.
    pub fn open(attempts: &Path, summary: &Path) -> Result<Self, LedgerError> {
        Ok(Self {
            attempts: CsvSink::open(attempts, &LEDGER_HEADER)?,
            summary: CsvSink::open(summary, &SUMMARY_HEADER)?,
        })
    }

    /// Start new ledger and summary files, replacing any previous ones.
    pub fn create(attempts: &Path, summary: &Path) -> Result<Self, LedgerError> {
        Ok(Self {
            attempts: CsvSink::create(attempts, &LEDGER_HEADER)?,
            summary: CsvSink::create(summary, &SUMMARY_HEADER)?,
        })
    }

    /// Record one attempt.
    pub fn record(&mut self, record: &LedgerRecord) -> Result<(), LedgerError> {
        self.attempts.append(record)
    }

    /// Record one routed model.
    pub fn summarize(&mut self, record: &SummaryRecord) -> Result<(), LedgerError> {
        self.summary.append(record)
    }
}

/// Load the records of the ledger at `path`. Rows that cannot be parsed are
/// skipped with a warning.
pub fn load_ledger(path: &Path) -> Result<Vec<LedgerRecord>, LedgerError> {
    Ok(read_records(path, &LEDGER_HEADER)?
        .into_iter()
        .filter_map(|(line, row)| match row {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("{}: skipping row {line}: {err}", path.display());
                None
            }
        })
        .collect())
}

/// Load the records of the model summary at `path`.
pub fn load_summary(path: &Path) -> Result<Vec<SummaryRecord>, LedgerError> {
    read_records(path, &SUMMARY_HEADER)?
        .into_iter()
        .map(|(_, row)| {
            row.map_err(|source| LedgerError::Csv {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use super::*;

    fn found(scope: Option<u32>, millis: u64, verdict: Verdict) -> Found {
        Found {
            scope,
            elapsed: Duration::from_millis(millis),
            verdict,
        }
    }

    #[test]
    fn test_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let mut sink = CsvSink::create(&path, &LEDGER_HEADER).unwrap();
        let found = found(Some(12), 130_456, Verdict::Unsat);
        let rec = LedgerRecord::success("m/a.als", 1, "run show for 5", "run show for 12", 5, &found);
        sink.append(&rec).unwrap();
        let rec = LedgerRecord::failure("m/b.als", 0, "run {a, b} for 3", "Scope not found above 10");
        sink.append(&rec).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        insta::assert_display_snapshot!(text.replace("\r\n", "\n"), @r###"
        File Path,i-th Command,Original Command,New Command,Overall Scope,Time,Satisfiable?,Reason
        m/a.als,1,run show for 5,run show for 12,12,130.46,UNSAT,
        m/b.als,0,"run {a, b} for 3",,,,,Scope not found above 10
        "###);
        let records = load_ledger(&path).unwrap();
        assert_eq!(records[1], rec);
        assert_eq!(records[0].time, Some(130.46));
    }

    #[test]
    fn test_quoted_fields_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let rec = LedgerRecord::failure(
            "m/\"odd\", name.als",
            3,
            "run {\n  some A\n} for 4",
            "Rewrite failed: old command left on line 2: `run x`",
        );
        CsvSink::create(&path, &LEDGER_HEADER)
            .unwrap()
            .append(&rec)
            .unwrap();
        assert_eq!(load_ledger(&path).unwrap(), vec![rec]);
    }

    #[test]
    fn test_declared_scope_recorded() {
        let found = found(None, 200_000, Verdict::Sat);
        let rec = LedgerRecord::success("a.als", 0, "run p", "run p", -1, &found);
        assert_eq!(rec.scope, Some(-1));
        assert_eq!(rec.outcome(), "SAT");
    }

    #[test]
    fn test_sink_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        {
            let mut sink = CsvSink::open(&path, &LEDGER_HEADER).unwrap();
            sink.append(&LedgerRecord::failure("a.als", 0, "run a", "Growing Sig"))
                .unwrap();
        }
        {
            let mut sink = CsvSink::open(&path, &LEDGER_HEADER).unwrap();
            sink.append(&LedgerRecord::failure("b.als", 2, "run b", "Enough sat models"))
                .unwrap();
        }
        let records = load_ledger(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].file, "b.als");
        assert_eq!(records[1].command, 2);
        assert_eq!(
            fs::read_to_string(&path)
                .unwrap()
                .matches("File Path")
                .count(),
            1
        );
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let mut text = LEDGER_HEADER.join(",");
        text.push_str("\r\n");
        text.push_str("a.als,zero,run a,,,,,x\r\n");
        text.push_str("b.als,0,run b,run b for 3,3,150.00,SAT,\r\n");
        fs::write(&path, text).unwrap();
        let records = load_ledger(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scope, Some(3));
        assert_eq!(records[0].time, Some(150.0));
    }

    #[test]
    fn test_summary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_summary.csv");
        let rec = SummaryRecord {
            file: "x/y.als".to_string(),
            verdict: Verdict::Sat,
            command: "run {} for 7".to_string(),
            scope: 7,
        };
        CsvSink::open(&path, &SUMMARY_HEADER)
            .unwrap()
            .append(&rec)
            .unwrap();
        assert_eq!(load_summary(&path).unwrap(), vec![rec]);
    }

    #[test]
    fn test_wrong_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(matches!(
            load_ledger(&path),
            Err(LedgerError::Header { .. })
        ));
    }
}
