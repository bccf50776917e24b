//! Vmgrade Core Library
//!
//! This library exposes the grading-harness modules for integration testing.
//! The binary entry point is in main.rs.

pub mod checksum;
pub mod config;
pub mod delivery;
pub mod error;
pub mod executor;
pub mod hypervisor;
pub mod lifecycle;
pub mod orchestrator;
pub mod precheck;
pub mod reporter;
pub mod shell;
