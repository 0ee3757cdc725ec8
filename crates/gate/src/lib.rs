// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod auth;
pub mod config;
pub mod error;
pub mod pump;
pub mod run;
pub mod state;
pub mod test_support;
pub mod transport;

pub use run::run;
