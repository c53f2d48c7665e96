//! # slimmac
//!
//! Reclaims disk space on macOS by removing resources nobody on the machine
//! uses:
//!
//! - **Localizations**: `.lproj` directories for languages outside the keep-set
//! - **Keyboard layouts**: `.bundle` layouts outside the keep-set
//! - **Architectures**: CPU slices of universal binaries outside the keep-set
//!
//! The pipeline is scan → plan → execute. Scanning and planning never modify
//! anything; a [`planner::RemovalPlan`] is meant to be reviewed before it is
//! handed to the [`executor::Executor`]. The planner never removes the last
//! localization of a bundle or the last architecture of a binary.

pub mod cli;
pub mod common;
pub mod executor;
pub mod planner;
pub mod scanner;
