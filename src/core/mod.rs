//! Core domain types: jobs, quotas, templates and the compliance gate.

pub mod candidate;
pub mod compliance;
pub mod job;
pub mod quota;
pub mod retry;
pub mod template;
pub mod types;
