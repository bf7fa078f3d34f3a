/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Main file / top-level module for the flowcolor library.

// Make the set representation public for fuzzing.
#[cfg(feature = "fuzzing")]
pub mod nat_set;
#[cfg(not(feature = "fuzzing"))]
mod nat_set;

mod analysis_control_flow;
mod analysis_data_flow;
mod analysis_dominance;
mod checker;
mod data_structures;
mod dead_code;
mod graph_coloring;
mod inst_stream;
mod interface;

#[cfg(test)]
mod mock;

pub use crate::interface::*;
