//! Tool registry and dispatch for agent capabilities.
//!
//! Each tool is a self-contained module implementing the `Tool` trait.
//! Built-ins are registered programmatically; user tools are discovered
//! from `tool.json` manifests and always dispatch through the sidecar.
//!
//! ## Adding a New Tool
//!
//! 1. Create a new file in `src/tools/` (e.g. `my_tool.rs`)
//! 2. Implement the `Tool` trait
//! 3. Add `mod my_tool;` and `pub use` in this file
//! 4. Register it at startup alongside the other built-ins

mod arithmetic;
mod executor;
mod registry;
mod traits;

// Core trait and types
pub use traits::{Tool, ToolResult};

// Registry and executor
pub use executor::ToolExecutor;
pub use registry::{ToolManifest, ToolRegistry};

// Built-in tools
pub use arithmetic::{AddTool, DivideTool, MultiplyTool};

/// Register every built-in tool into a fresh registry.
pub fn builtin_registry() -> crate::error::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(AddTool)?;
    registry.register(MultiplyTool)?;
    registry.register(DivideTool)?;
    Ok(registry)
}
