// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Report the contents of a ledger as a table.

use std::collections::BTreeMap;

use glob::Pattern;
use tabled::settings::{
    object::{Columns, Object, Rows},
    Alignment, Color, Modify, Style, Width,
};

use crate::ledger::LedgerRecord;

/// Header used for printing the table. Make sure this stays in sync with
/// [`row`].
fn header() -> Vec<String> {
    ["file", "#", "outcome", "scope", "time s", "command"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn row(record: &LedgerRecord) -> Vec<String> {
    let command = if record.is_success() {
        &record.rewritten
    } else {
        &record.original
    };
    vec![
        record.file.clone(),
        record.command.to_string(),
        record.outcome(),
        record.scope.map(|s| s.to_string()).unwrap_or_default(),
        record
            .time
            .map(|t| format!("{t:0.1}"))
            .unwrap_or_default(),
        command.clone(),
    ]
}

/// Keep the records whose file matches `pattern`.
pub fn filter_records(records: Vec<LedgerRecord>, pattern: &Pattern) -> Vec<LedgerRecord> {
    records
        .into_iter()
        .filter(|r| pattern.matches(&r.file))
        .collect()
}

/// Count the records per outcome, in order of decreasing count.
pub fn outcome_counts(records: &[LedgerRecord]) -> Vec<(String, usize)> {
    let mut counts = BTreeMap::<String, usize>::new();
    for r in records {
        *counts.entry(r.outcome()).or_default() += 1;
    }
    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Render a table of `records` followed by the totals.
pub fn render(records: &[LedgerRecord]) -> String {
    let mut rows = vec![header()];
    rows.extend(records.iter().map(row));

    let mut table = tabled::builder::Builder::from(rows).build();
    table
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2).not(Rows::first())).with(Color::FG_RED))
        .with(Modify::new(Columns::new(3..=4)).with(Alignment::right()))
        .with(Width::truncate(200));

    let mut out = format!("{table}\n");
    out.push_str(&format!("total:    {}\n", records.len()));
    for (outcome, count) in outcome_counts(records) {
        out.push_str(&format!("{outcome}: {count}\n"));
    }
    out
}

/// Print a table of `records` followed by the totals.
pub fn print_table(records: &[LedgerRecord]) {
    print!("{}", render(records));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{outcome::Verdict, search::Found};

    fn records() -> Vec<LedgerRecord> {
        let found = Found {
            scope: Some(12),
            elapsed: Duration::from_secs(150),
            verdict: Verdict::Sat,
        };
        vec![
            LedgerRecord::success("set/a.als", 0, "run p for 3", "run p for 12", 3, &found),
            LedgerRecord::failure("set/b.als", 1, "check x", "Growing Sig"),
            LedgerRecord::failure("other/c.als", 0, "run q", "Growing Sig"),
        ]
    }

    #[test]
    fn test_outcome_counts() {
        assert_eq!(
            outcome_counts(&records()),
            vec![("Growing Sig".to_string(), 2), ("SAT".to_string(), 1)]
        );
    }

    #[test]
    fn test_filter() {
        let kept = filter_records(records(), &Pattern::new("set/*").unwrap());
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_render() {
        let out = render(&records());
        assert!(out.contains("run p for 12"));
        assert!(out.contains("150.0"));
        assert!(out.ends_with("total:    3\nGrowing Sig: 2\nSAT: 1\n"));
    }
}
