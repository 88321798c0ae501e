//! Database module - PostgreSQL persistence for every entity.

mod agent;
mod postgres;
mod recursion;
mod session;
mod task;
mod tool;

pub use agent::{Agent, AgentStore, LlmConfig, LlmConfigStore, LlmProtocolKind};
pub use postgres::{init_pool, init_pool_for_migrations, migrations, PostgresPool};
pub use recursion::{
    PlanStepStatus, ReactPlanStep, ReactPlanStepStore, ReactRecursion, ReactRecursionState,
    ReactRecursionStore, RecursionStatus,
};
pub use session::{
    DecisionDetails, MemoryDelta, MemoryItem, MemoryItemType, Session, SessionMemory,
    SessionMemoryStore, SessionStatus, SessionStore,
};
pub use task::{ReactTask, ReactTaskStore, TaskStatus};
pub use tool::{validate_tool_name, AgentToolStore, ToolRecord, ToolStore};
