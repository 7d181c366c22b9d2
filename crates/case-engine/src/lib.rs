//! Case Engine Library
//!
//! This crate provides the execution core of a case-management (CMMN)
//! workflow engine, handling:
//!
//! - **Case Instances**: Create case instances from deployed case definitions
//! - **Lifecycle Commands**: Start, disable, re-enable, complete, terminate and close case executions
//! - **Completion Cascades**: Auto-complete stages and case instances once nothing is outstanding
//! - **Variables**: Case-instance and execution-local variable scopes
//! - **Embedded Instances**: Process and case tasks spawning sub-instances
//!
//! ## Architecture
//!
//! Each case instance is an arena of case executions persisted as one unit.
//! A command loads the tree, applies variable operations and at most one
//! lifecycle verb on a private copy, and saves it with an optimistic
//! revision check. Work on other instances is queued as side effects and
//! carried out after the save.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Execution store trait and in-memory store
//! - [`engine`]: State machine, transition table and command executor
//! - [`error`]: Custom error types
//! - [`model`]: Case definitions, YAML loader and repository
//! - [`services`]: Case service, queries and sub-instance coordination
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use case_engine::{
//!     config::EngineConfig,
//!     services::{CaseService, InMemoryProcessRuntime},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::load()?;
//!     case_engine::config::init_tracing(&config);
//!     let service = CaseService::in_memory(config, Arc::new(InMemoryProcessRuntime::new()));
//!     service.deploy_from_config().await?;
//!     let case = service
//!         .with_case_definition_by_key("oneTaskCase")
//!         .business_key("order-42")
//!         .create()
//!         .await?;
//!     println!("created case instance {}", case.id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod result_ext;
pub mod services;

pub use error::{EngineError, EngineResult};
pub use result_ext::ResultExt;
