// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Extract the `run` and `check` commands of a model.
//!
//! Commands are numbered in order of appearance, which matches the order in
//! which the Alloy engine lists them, so a [`Command::index`] can be passed
//! straight to a solver process.

use std::fmt;

use itertools::Itertools;
use lazy_regex::{regex_captures, regex_find};
use serde::Serialize;
use thiserror::Error;

use crate::rewrite::{command_spans, strip_comments};

/// A command that could not be understood.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The braces of a command's block do not balance
    #[error("command {index}: unbalanced braces in `{text}`")]
    UnbalancedBlock {
        /// Ordinal of the command
        index: usize,
        /// Command text
        text: String,
    },
    /// The `for` clause could not be parsed
    #[error("command {index}: cannot parse scope `{scope}`")]
    BadScope {
        /// Ordinal of the command
        index: usize,
        /// The offending scope text
        scope: String,
    },
    /// Text after the command target that is neither a scope nor `expect`
    #[error("command {index}: unexpected `{rest}`")]
    Trailing {
        /// Ordinal of the command
        index: usize,
        /// The unparsed text
        rest: String,
    },
}

impl ParseError {
    /// Ordinal of the command that could not be parsed.
    pub fn index(&self) -> usize {
        match self {
            ParseError::UnbalancedBlock { index, .. }
            | ParseError::BadScope { index, .. }
            | ParseError::Trailing { index, .. } => *index,
        }
    }
}

/// Whether a command searches for an instance or a counterexample.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    /// `run`
    Run,
    /// `check`
    Check,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Run => write!(f, "run"),
            CommandKind::Check => write!(f, "check"),
        }
    }
}

/// What a command runs: a named predicate/assertion or an inline block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Target {
    /// A predicate, function or assertion name
    Name(String),
    /// An inline `{ ... }` formula, whitespace normalized
    Block(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Name(name) => write!(f, "{name}"),
            Target::Block(block) => write!(f, "{block}"),
        }
    }
}

/// One item of a `for` clause, like `exactly 3 Node` or `1..5 Time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeBound {
    /// Whether the bound is `exactly`
    pub exact: bool,
    /// Starting scope
    pub start: u32,
    /// Ending scope, `None` for an open range like `1..`
    pub end: Option<u32>,
    /// Increment of a growing range (`a..b:inc`)
    pub increment: Option<u32>,
    /// Signature (or builtin) the bound applies to
    pub sig: String,
}

impl ScopeBound {
    /// Bitwidth, sequence length and trace length bounds, which are not
    /// signatures and survive a change of overall scope.
    pub fn is_builtin(&self) -> bool {
        matches!(self.sig.as_str(), "Int" | "int" | "seq" | "steps")
    }

    /// A signature whose scope grows over a range.
    pub fn is_growing(&self) -> bool {
        !self.is_builtin() && self.end != Some(self.start)
    }
}

impl fmt::Display for ScopeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exact {
            write!(f, "exactly ")?;
        }
        write!(f, "{}", self.start)?;
        match self.end {
            Some(end) if end == self.start => {}
            Some(end) => write!(f, "..{end}")?,
            None => write!(f, "..")?,
        }
        if let Some(inc) = self.increment {
            write!(f, ":{inc}")?;
        }
        write!(f, " {}", self.sig)
    }
}

/// A `run` or `check` command of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    /// Position among the model's commands
    pub index: usize,
    /// Optional `label:` prefix
    pub label: Option<String>,
    /// `run` or `check`
    pub kind: CommandKind,
    /// What is run or checked
    pub target: Target,
    /// Overall scope (`for N`), if any
    pub overall: Option<u32>,
    /// Per-signature and builtin bounds
    pub bounds: Vec<ScopeBound>,
    /// `expect` hint
    pub expects: Option<u32>,
}

impl Command {
    /// The declared overall scope, or -1 when the command declares none.
    pub fn overall_scope(&self) -> i32 {
        self.overall
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(-1)
    }

    /// Whether any signature scope ranges over more than one value. Such
    /// commands have no single scope to search for.
    pub fn has_growing_sig(&self) -> bool {
        self.bounds.iter().any(|b| b.is_growing())
    }

    /// The same command with overall scope `scope` and no per-signature
    /// bounds; builtin bounds and the `expect` hint are kept.
    pub fn with_overall_scope(&self, scope: u32) -> Command {
        let mut cmd = self.clone();
        cmd.overall = Some(scope);
        cmd.bounds.retain(|b| b.is_builtin());
        cmd
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{label}: ")?;
        }
        write!(f, "{} {}", self.kind, self.target)?;
        let bounds = self.bounds.iter().join(", ");
        match (self.overall, bounds.is_empty()) {
            (Some(n), true) => write!(f, " for {n}")?,
            (Some(n), false) => write!(f, " for {n} but {bounds}")?,
            (None, false) => write!(f, " for {bounds}")?,
            (None, true) => {}
        }
        if let Some(expects) = self.expects {
            write!(f, " expect {expects}")?;
        }
        Ok(())
    }
}

/// Index of the brace closing the one `text` starts with.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_bounds(index: usize, items: &str) -> Result<Vec<ScopeBound>, ParseError> {
    let bad_scope = || ParseError::BadScope {
        index,
        scope: items.to_string(),
    };
    items
        .split(',')
        .map(|item| {
            let (_, exact, start, dots, end, inc, sig) = regex_captures!(
                r"^(exactly\s+)?(\d+)(?:\s*(\.\.)\s*(\d+)?(?:\s*:\s*(\d+))?)?\s+([\w/']+)$",
                item.trim()
            )
            .ok_or_else(bad_scope)?;
            let num = |s: &str| s.parse::<u32>().map_err(|_| bad_scope());
            let start = num(start)?;
            let end = match (dots.is_empty(), end.is_empty()) {
                (true, _) => Some(start),
                (false, true) => None,
                (false, false) => Some(num(end)?),
            };
            let increment = if inc.is_empty() { None } else { Some(num(inc)?) };
            Ok(ScopeBound {
                exact: !exact.is_empty(),
                start,
                end,
                increment,
                sig: sig.to_string(),
            })
        })
        .collect()
}

fn parse_command(index: usize, text: &str) -> Result<Command, ParseError> {
    let text = text.trim();
    let trailing = |rest: &str| ParseError::Trailing {
        index,
        rest: rest.to_string(),
    };
    let (_, label, kind, rest) =
        regex_captures!(r"^(?:(\w+)\s*:\s*)?(run|check)\b\s*([\s\S]*)$", text)
            .ok_or_else(|| trailing(text))?;
    let kind = if kind == "run" {
        CommandKind::Run
    } else {
        CommandKind::Check
    };

    let (target, rest) = if rest.starts_with('{') {
        let close = matching_brace(rest).ok_or_else(|| ParseError::UnbalancedBlock {
            index,
            text: text.to_string(),
        })?;
        let block = rest[..=close].split_whitespace().join(" ");
        (Target::Block(block), &rest[close + 1..])
    } else {
        match regex_find!(r"^[A-Za-z_][\w'\x22]*(?:/[A-Za-z_][\w'\x22]*)*", rest) {
            Some(name) if name != "for" && name != "expect" => {
                (Target::Name(name.to_string()), &rest[name.len()..])
            }
            _ => (Target::Block("{}".to_string()), rest),
        }
    };

    let rest = rest.trim();
    let (scope, expects) = match regex_captures!(r"^([\s\S]*?)\s*\bexpect\s+(\d+)$", rest) {
        Some((_, scope, expects)) => (
            scope.trim(),
            Some(expects.parse::<u32>().map_err(|_| trailing(rest))?),
        ),
        None => (rest, None),
    };

    let (overall, bounds) = if scope.is_empty() {
        (None, vec![])
    } else {
        let (_, spec) = regex_captures!(r"^for\s+([\s\S]+)$", scope).ok_or_else(|| trailing(scope))?;
        match regex_captures!(r"^(\d+)(?:\s+but\s+([\s\S]+))?$", spec.trim()) {
            Some((_, n, but)) => {
                let n = n.parse::<u32>().map_err(|_| ParseError::BadScope {
                    index,
                    scope: spec.to_string(),
                })?;
                let bounds = if but.is_empty() {
                    vec![]
                } else {
                    parse_bounds(index, but)?
                };
                (Some(n), bounds)
            }
            None => (None, parse_bounds(index, spec)?),
        }
    };

    Ok(Command {
        index,
        label: (!label.is_empty()).then(|| label.to_string()),
        kind,
        target,
        overall,
        bounds,
        expects,
    })
}

/// Extract all top-level commands of an Alloy model, in order of appearance.
pub fn parse_commands(source: &str) -> Result<Vec<Command>, ParseError> {
    let text = strip_comments(source);
    command_spans(&text)
        .into_iter()
        .enumerate()
        .map(|(index, span)| parse_command(index, &text[span]))
        .collect()
}
