//! Compiled case definitions.
//!
//! - **types**: `CaseDefinition` and its plan item tree
//! - **loader**: YAML parsing and structural validation
//! - **repository**: versioned deployment and lookup

pub mod loader;
pub mod repository;
pub mod types;

pub use loader::{load_dir, parse_definition};
pub use repository::DefinitionRepository;
pub use types::{CaseDefinition, PlanItemDefinition};
