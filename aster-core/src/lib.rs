//! Aster Core
//!
//! Core types for the aster data-reduction pipeline tracker.
//!
//! This crate contains:
//! - Domain types: Job, QA judgments, task configuration, audit log rows
//! - The job state machine: state codes, metadata, and the transition table
//!
//! It is deliberately free of I/O: the registry crate persists these types
//! and the runner crate drives them through the state machine.

pub mod domain;
pub mod error;
