//! Service Module
//!
//! Registry contracts built on top of the repositories: state changes
//! paired with audit rows, QA with its cached summary, and the co-add
//! submission upsert.

pub mod job;
pub mod qa;
pub mod submit;

// Re-export for convenience
pub use job as job_service;
pub use qa as qa_service;
pub use submit as submit_service;
