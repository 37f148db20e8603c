// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Text-level utilities for Alloy model files.
//!
//! The Alloy engine itself is only ever run as an external process, so this
//! crate does not parse the Alloy language. It understands just enough of a
//! model's surface syntax to find its `run`/`check` commands, read their
//! declared scopes, and pin a single rewritten command into the file.

// configure clippy
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod command;
pub mod rewrite;
