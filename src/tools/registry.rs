//! Tool registry: a name-indexed catalog of callable tools, with
//! built-ins registered up front and user tools discovered from a directory
//! of declarative `tool.json` manifests.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::database::validate_tool_name;
use crate::error::{Error, Result};

use super::traits::Tool;

/// Declarative manifest for a user tool discovered on disk. The manifest
/// only describes the catalog entry; dispatch for these tools always goes
/// through the sidecar (there is no in-process function to call).
#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Registry of every tool the process knows about.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Fails with `DuplicateName` if a tool with this name
    /// is already registered, rather than silently overwriting it.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        validate_tool_name(tool.name())?;
        if self.tools.contains_key(tool.name()) {
            return Err(Error::DuplicateName(tool.name().to_string()));
        }
        self.tools.insert(tool.name().to_string(), Box::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&dyn Tool> {
        self.tools.values().map(|t| t.as_ref()).collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Scan `dir` for `*/tool.json` manifests and register each as a
    /// catalog-only entry (no in-process `func`; dispatch routes to the
    /// sidecar). Clears the registry first, so a rescan reflects the
    /// directory exactly. Missing directories are not an error.
    pub async fn discover(&mut self, dir: &Path) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };

        self.tools.clear();
        let mut discovered = 0;
        while let Some(entry) = entries.next_entry().await? {
            let manifest_path = entry.path().join("tool.json");
            if !manifest_path.is_file() {
                continue;
            }

            let raw = tokio::fs::read_to_string(&manifest_path).await?;
            let manifest: ToolManifest = match serde_json::from_str(&raw) {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping malformed tool manifest {manifest_path:?}: {e}");
                    continue;
                }
            };

            if validate_tool_name(&manifest.name).is_err() {
                warn!("skipping tool manifest with invalid name: {:?}", manifest.name);
                continue;
            }

            let name = manifest.name.clone();
            if let Err(e) = self.register(SidecarOnlyTool {
                    name: manifest.name,
                    description: manifest.description,
                    parameters: manifest.parameters,
            }) {
                warn!("skipping tool manifest {:?}: {e}", name);
                continue;
            }
            discovered += 1;
        }

        Ok(discovered)
    }

    /// Plain-text catalog for embedding in a prompt when the model isn't
    /// given structured function-calling support.
    pub fn to_text_catalog(&self) -> String {
        let mut names: Vec<&dyn Tool> = self.list();
        names.sort_by_key(|t| t.name().to_string());

        names
        .iter()
        .map(|t| format!("- {}: {}", t.name(), t.description()))
        .collect::<Vec<_>>()
        .join("\n")
    }

    /// OpenAI-style `tools` array for function-calling APIs.
    pub fn to_openai_tools(&self) -> Value {
        let mut tools: Vec<&dyn Tool> = self.list();
        tools.sort_by_key(|t| t.name().to_string());

        Value::Array(
            tools
            .iter()
            .map(|t| {
                    serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name(),
                                "description": t.description(),
                                "parameters": t.parameters_schema(),
                                "strict": true,
                            }
                    })
            })
            .collect(),
        )
    }
}

/// A catalog-only entry for a discovered tool.json manifest. `execute` is
/// never called directly on this: `ToolExecutor` routes any call whose
/// registry entry has no built-in implementation through the sidecar.
struct SidecarOnlyTool {
    name: String,
    description: String,
    parameters: Value,
}

#[async_trait::async_trait]
impl Tool for SidecarOnlyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, _args: Value) -> Result<super::traits::ToolResult> {
        Ok(super::traits::ToolResult::failure(format!(
                    "tool '{}' has no in-process implementation; dispatch must use sidecar mode",
                    self.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::arithmetic::AddTool;

    #[test]
    fn registers_and_looks_up_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(AddTool).unwrap();
        assert_eq!(registry.count(), 1);
        assert!(registry.get("add").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let mut registry = ToolRegistry::new();
        registry.register(AddTool).unwrap();
        assert!(matches!(registry.register(AddTool), Err(Error::DuplicateName(_))));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn text_catalog_is_sorted_and_human_readable() {
        let mut registry = ToolRegistry::new();
        registry.register(super::super::arithmetic::MultiplyTool).unwrap();
        registry.register(AddTool).unwrap();
        let catalog = registry.to_text_catalog();
        assert!(catalog.find("add").unwrap() < catalog.find("multiply").unwrap());
    }

    #[test]
    fn openai_tools_have_function_shape() {
        let mut registry = ToolRegistry::new();
        registry.register(AddTool).unwrap();
        let tools = registry.to_openai_tools();
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "add");
        assert_eq!(tools[0]["function"]["strict"], true);
    }
}
