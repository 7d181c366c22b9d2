//! Service layer for the case engine.
//!
//! Services encapsulate the engine core and coordinate
//! between callers, the execution store and embedded instances.

pub mod case;
pub mod coordinator;
mod journal;
pub mod query;

pub use case::{CaseExecutionCommandBuilder, CaseInstanceBuilder, CaseService};
pub use coordinator::{
    InMemoryProcessRuntime, ProcessInstance, ProcessInstanceState, ProcessRuntime,
    SubInstanceCoordinator,
};
pub use query::{
    CaseExecution, CaseExecutionQuery, CaseInstance, CaseInstanceQuery, VariableInstanceQuery,
};
