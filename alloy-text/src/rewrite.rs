// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Strip comments and commands from a model and pin a single new command.
//!
//! Rewriting is a two-pass transformation: first all comments are removed,
//! then every top-level command block is cut out, where a block runs from
//! `[label:] run|check` up to the next top-level declaration keyword. The
//! result must not contain a single `run` or `check` token before the new
//! command is appended; anything left over is reported as an error rather
//! than silently written back.

use std::ops::Range;

use lazy_regex::regex;
use thiserror::Error;

/// A failure to produce a model with exactly one command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// A `run` or `check` token survived command stripping.
    #[error("old command left on line {line}: `{snippet}`")]
    ResidualCommand {
        /// 1-based line of the leftover token
        line: usize,
        /// The line containing it
        snippet: String,
    },
}

/// Remove `//` and `--` line comments and `/* */` block comments.
pub fn strip_comments(text: &str) -> String {
    regex!(r"//.*|--.*|/\*[\s\S]*?\*/")
        .replace_all(text, "")
        .into_owned()
}

fn brace_depth(text: &str, range: Range<usize>, mut depth: i64) -> i64 {
    for b in text[range].bytes() {
        match b {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Find where the command whose keyword ends at `from` stops: the next
/// declaration or command that is not nested inside braces.
fn block_end(text: &str, from: usize) -> usize {
    let boundary = regex!(
        r"\b(?:abstract|assert|enum|fact|fun|let|module|none|open|pred|private|(?:var\s+)?(?:(?:lone|some|one)\s+)?sig)\s|(?:\b\w+\s*:\s*)?\b(?:run|check)\b"
    );
    let mut pos = from;
    let mut depth = 0;
    while let Some(m) = boundary.find_at(text, pos) {
        depth = brace_depth(text, pos..m.start(), depth);
        if depth <= 0 {
            return m.start();
        }
        pos = m.end();
    }
    text.len()
}

/// Byte ranges of the top-level command blocks of `text`, in order of
/// appearance.
///
/// `text` is expected to be free of comments already (see
/// [`strip_comments`]); a `run` inside braces is not a command and is left
/// for [`ensure_no_commands`] to catch.
pub fn command_spans(text: &str) -> Vec<Range<usize>> {
    let start = regex!(r"(?:\b\w+\s*:\s*)?\b(?:run|check)\b");
    let mut spans = vec![];
    let mut pos = 0;
    let mut depth = 0;
    while let Some(m) = start.find_at(text, pos) {
        depth = brace_depth(text, pos..m.start(), depth);
        if depth > 0 {
            pos = m.end();
            continue;
        }
        let end = block_end(text, m.end());
        depth = brace_depth(text, m.start()..end, depth);
        spans.push(m.start()..end);
        pos = end;
    }
    spans
}

/// Replace every top-level command block with a newline.
pub fn strip_commands(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for span in command_spans(text) {
        out.push_str(&text[last..span.start]);
        out.push('\n');
        last = span.end;
    }
    out.push_str(&text[last..]);
    out
}

/// Check that no `run` or `check` token remains in `text`.
pub fn ensure_no_commands(text: &str) -> Result<(), RewriteError> {
    match regex!(r"\b(?:run|check)\b").find(text) {
        None => Ok(()),
        Some(m) => {
            let line_start = text[..m.start()].rfind('\n').map_or(0, |i| i + 1);
            let line_end = text[m.start()..]
                .find('\n')
                .map_or(text.len(), |i| m.start() + i);
            Err(RewriteError::ResidualCommand {
                line: text[..m.start()].matches('\n').count() + 1,
                snippet: text[line_start..line_end].trim().to_string(),
            })
        }
    }
}

/// Rewrite `source` so that `command` is its only command.
///
/// Comments and all existing commands are removed first; the consistency
/// check runs before the new command is appended.
pub fn pin_command(source: &str, command: &str) -> Result<String, RewriteError> {
    let content = strip_commands(&strip_comments(source));
    ensure_no_commands(&content)?;
    Ok(format!("{content}\n{command}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let text = "sig A {} // trailing\n-- run old for 3\n/* check\n  X */fact {}\n";
        assert_eq!(strip_comments(text), "sig A {} \n\nfact {}\n");
    }

    #[test]
    fn test_spans_stop_at_declarations() {
        let text = "sig A {}\nrun {} for 3\nfact { some A }\ncheck X for 2\n";
        let spans: Vec<&str> = command_spans(text)
            .into_iter()
            .map(|r| &text[r])
            .collect();
        assert_eq!(spans, vec!["run {} for 3\n", "check X for 2\n"]);
    }

    #[test]
    fn test_spans_stop_at_enum_let_private() {
        let text = "run {} for 3\nenum Color { Red, Green }\ncheck X\nlet twice[x] = x + x\nrun Y for 2\nprivate pred hidden {}\n";
        let spans: Vec<&str> = command_spans(text)
            .into_iter()
            .map(|r| &text[r])
            .collect();
        assert_eq!(spans, vec!["run {} for 3\n", "check X\n", "run Y for 2\n"]);
        assert_eq!(
            strip_commands(text),
            "\nenum Color { Red, Green }\n\nlet twice[x] = x + x\n\nprivate pred hidden {}\n"
        );
    }

    #[test]
    fn test_spans_labelled_and_adjacent() {
        let text = "one sig S {}\nfirst: run { some S } for 2 second: check {no S}\nlone sig T {}";
        let spans: Vec<&str> = command_spans(text)
            .into_iter()
            .map(|r| text[r].trim())
            .collect();
        assert_eq!(
            spans,
            vec!["first: run { some S } for 2", "second: check {no S}"]
        );
    }

    #[test]
    fn test_keywords_inside_block_do_not_end_command() {
        let text = "run { one sig_x: S | fact_of[sig_x] and some sig S }\nsig S {}";
        let spans = command_spans(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(&text[spans[0].clone()], "run { one sig_x: S | fact_of[sig_x] and some sig S }\n");
    }

    #[test]
    fn test_pin_command() {
        let text = "sig A {}\nrun {} for 3\nfact { some A }\ncheck X for 2\n";
        let pinned = pin_command(text, "run {} for 7").unwrap();
        assert_eq!(pinned, "sig A {}\n\nfact { some A }\n\n\nrun {} for 7\n");
    }

    #[test]
    fn test_pin_removes_commented_commands() {
        let text = "sig A {}\n// run old for 9\npred p {}\nrun p for 3 -- note\n";
        let pinned = pin_command(text, "run p for 5").unwrap();
        assert_eq!(pinned.matches("run").count(), 1);
        assert!(pinned.ends_with("\nrun p for 5\n"));
        assert!(pinned.contains("pred p {}"));
    }

    #[test]
    fn test_leftover_command_is_an_error() {
        // the nested `run` is not a top-level command and survives stripping
        let text = "pred p { run {} }\nrun p for 3\n";
        assert_eq!(
            pin_command(text, "run p for 4"),
            Err(RewriteError::ResidualCommand {
                line: 1,
                snippet: "pred p { run {} }".to_string(),
            })
        );
    }

    #[test]
    fn test_ensure_no_commands() {
        assert!(ensure_no_commands("sig running {}\nfact checked {}").is_ok());
        let err = ensure_no_commands("sig A {}\n\ncheck A for 2").unwrap_err();
        insta::assert_display_snapshot!(err, @"old command left on line 3: `check A for 2`");
    }
}
