//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Test utilities shared across the Tether workspace.
//!
//! - `streams` - collect items from async streams with timeouts
//! - `enums` - unpack enum variants in test assertions

pub mod enums;
#[macro_use]
pub mod streams;
