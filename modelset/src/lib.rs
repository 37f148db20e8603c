// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Build sets of Alloy models whose commands take a chosen amount of time to
//! solve, tagged SAT or UNSAT.
//!
//! The core is a search over overall scopes ([`search`]) driving an external
//! solver in isolated processes ([`runner`]), run over a shuffled corpus by
//! the extraction driver ([`extract`]) with every attempt recorded in a
//! ledger ([`ledger`]).

#![deny(missing_docs)]
// configure clippy
#![deny(clippy::uninlined_format_args)]
#![allow(clippy::comparison_to_empty)]
// documentation-related lints (only checked when running rustdoc)
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod corpus;
pub mod extract;
pub mod ledger;
pub mod measurement;
pub mod outcome;
pub mod quota;
pub mod recreate;
pub mod report;
pub mod runner;
pub mod search;
