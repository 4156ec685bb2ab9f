//! Review gate: criteria storage, validation pipeline, and redaction.

pub mod engine;
pub mod redaction;
pub mod store;

pub use engine::ReviewEngine;
pub use redaction::Redactor;
pub use store::{CriteriaSource, CriteriaStore, FileCriteriaSource, MemoryCriteriaSource};
