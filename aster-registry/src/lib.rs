//! Aster Registry
//!
//! Durable, transactional storage for processing jobs. The registry is the
//! sole coordination point between pollers, one-shot commands, and any
//! other process working on the same job set: all claiming and advancement
//! goes through `service::job::change_state`, whose conditioned update is
//! the optimistic-concurrency contract.
//!
//! Layout follows the repository/service split: `repository` modules hold
//! the SQL for one entity each, `service` modules hold the contracts built
//! on top of them.

pub mod db;
pub mod error;
pub mod repository;
pub mod service;

pub use error::RegistryError;
