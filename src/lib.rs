//! Fleet compliance remediation for FastAPI services.
//!
//! The library discovers the layout of an unknown service repository,
//! decides which operational features are missing, and patches them in
//! with a validated, all-or-nothing write.

pub mod clients;
pub mod contexts;
pub mod data;
pub mod error;
pub mod registries;
pub mod run_tracker;
pub mod settings;
