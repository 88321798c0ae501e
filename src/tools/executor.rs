//! Tool Executor (C2): dispatches one tool call either to an in-process
//! function or to an ephemeral sidecar container, per `TOOL_EXECUTION_MODE`.

use std::sync::Arc;

use bollard::container::{
    AttachContainerOptions, Config as ContainerConfig, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::SidecarConfig;
use crate::error::{Error, Result};

use super::registry::ToolRegistry;
use super::traits::ToolResult;

const PIVOT_CONTEXT_KEY: &str = "__pivot_context";

/// Strip the opaque `__pivot_context` key from tool kwargs, returning the
/// cleaned arguments and the pivot context if present (logged, never
/// forwarded to the tool itself).
fn split_pivot_context(mut args: Value) -> (Value, Option<Value>) {
    if let Value::Object(map) = &mut args {
        let pivot = map.remove(PIVOT_CONTEXT_KEY);
        (Value::Object(map.clone()), pivot)
    } else {
        (args, None)
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: SidecarConfig,
    docker: Option<Docker>,
}

impl ToolExecutor {
    /// Build an executor for local dispatch only; never touches Docker/Podman.
    pub fn local(registry: Arc<ToolRegistry>, config: SidecarConfig) -> Self {
        ToolExecutor {
            registry,
            config,
            docker: None,
        }
    }

    /// Build an executor that can dispatch to the configured sidecar.
    pub async fn connect(registry: Arc<ToolRegistry>, config: SidecarConfig) -> Result<Self> {
        let socket_path = config
        .podman_host
        .strip_prefix("unix://")
        .unwrap_or(&config.podman_host);

        let docker = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
        .map_err(|e| Error::Container(format!("failed to connect to container engine: {e}")))?;

        docker
        .ping()
        .await
        .map_err(|e| Error::Container(format!("container engine ping failed: {e}")))?;

        info!("tool executor connected to container engine at {socket_path}");

        Ok(ToolExecutor {
                registry,
                config,
                docker: Some(docker),
        })
    }

    /// Dispatch one call. `kwargs` may carry an opaque `__pivot_context`,
    /// which is stripped and logged, never passed to the tool.
    pub async fn execute(&self, tool_name: &str, kwargs: Value) -> Result<ToolResult> {
        let (args, pivot_context) = split_pivot_context(kwargs);
        if let Some(ctx) = &pivot_context {
            debug!(tool = tool_name, pivot_context = %ctx, "tool call carries pivot context");
        }

        match self.config.mode {
            crate::config::ToolExecutionMode::Local => self.execute_local(tool_name, args).await,
            crate::config::ToolExecutionMode::PodmanSidecar => {
                self.execute_sidecar(tool_name, args).await
            }
        }
    }

    async fn execute_local(&self, tool_name: &str, args: Value) -> Result<ToolResult> {
        match self.registry.get(tool_name) {
            Some(tool) => tool.execute(args).await,
            None => Ok(ToolResult::failure(format!("unknown tool: {tool_name}"))),
        }
    }

    async fn execute_sidecar(&self, tool_name: &str, args: Value) -> Result<ToolResult> {
        let docker = self
        .docker
        .as_ref()
        .ok_or_else(|| Error::Container("sidecar executor has no container connection".into()))?;

        let payload = serde_json::to_vec(&serde_json::json!({
                    "tool": tool_name,
                    "arguments": args,
        }))?;

        let container_name = format!("agentrun-tool-{}", uuid::Uuid::new_v4());

        let container_config = ContainerConfig {
            image: Some(self.config.image.clone()),
            cmd: Some(vec![tool_name.to_string()]),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(self.config.network == "none"),
            host_config: Some(bollard::service::HostConfig {
                    memory: parse_memory_limit(&self.config.memory_limit),
                    network_mode: Some(self.config.network.clone()),
                    auto_remove: Some(false),
                    ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let create_result = docker
        .create_container(Some(create_options), container_config)
        .await;

        let container_id = match create_result {
            Ok(response) => response.id,
            Err(e) => {
                return Ok(ToolResult::failure(format!(
                            "failed to create sidecar container: {e}"
                )))
            }
        };

        let result = self
        .run_attached(docker, &container_id, &payload)
        .await;

        let _ = docker
        .remove_container(
            &container_id,
            Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
            }),
        )
        .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }

    async fn run_attached(
        &self,
        docker: &Docker,
        container_id: &str,
        payload: &[u8],
    ) -> Result<ToolResult> {
        let attach_options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            ..Default::default()
        };

        let attach_results = docker
        .attach_container(container_id, Some(attach_options))
        .await
        .map_err(|e| Error::Container(format!("attach failed: {e}")))?;

        let mut stdin = attach_results.input;
        let mut output = attach_results.output;

        docker
        .start_container(container_id, None::<StartContainerOptions<String>>)
        .await
        .map_err(|e| Error::Container(format!("start failed: {e}")))?;

        stdin
        .write_all(payload)
        .await
        .map_err(|e| Error::Container(format!("failed to write tool stdin: {e}")))?;
        stdin
        .shutdown()
        .await
        .map_err(|e| Error::Container(format!("failed to close tool stdin: {e}")))?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = String::new();

        let collect = async {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => stdout_buf.extend_from_slice(&message),
                    Ok(LogOutput::StdErr { message }) => {
                        stderr_buf.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(e) => warn!("error reading sidecar output: {e}"),
                }
            }
        };

        let wait = docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                    condition: "not-running",
            }),
        );
        let mut wait = Box::pin(wait);

        let timed_out = tokio::time::timeout(self.config.timeout, async {
                collect.await;
                wait.next().await
        })
        .await
        .is_err();

        if timed_out {
            return Ok(ToolResult::failure("timeout"));
        }

        let last_line = String::from_utf8_lossy(&stdout_buf)
        .lines()
        .last()
        .unwrap_or("")
        .to_string();

        if last_line.is_empty() {
            return Ok(ToolResult::failure(format!(
                        "sidecar produced no stdout; stderr: {stderr_buf}"
            )));
        }

        let parsed: Value = match serde_json::from_str(&last_line) {
            Ok(v) => v,
            Err(e) => {
                return Ok(ToolResult::failure(format!(
                            "sidecar produced invalid JSON ({e}); stderr: {stderr_buf}"
                )))
            }
        };

        let success = parsed.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        if success {
            let result = parsed.get("result").cloned().unwrap_or(Value::Null);
            Ok(ToolResult::success(result.to_string()))
        } else {
            let error = parsed
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("sidecar reported failure")
            .to_string();
            Ok(ToolResult::failure(format!("{error}; stderr: {stderr_buf}")))
        }
    }
}

fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit = limit.to_lowercase();
    let (num_str, unit) = if limit.ends_with("g") || limit.ends_with("gb") {
        (limit.trim_end_matches(|c| c == 'g' || c == 'b'), "g")
    } else if limit.ends_with("m") || limit.ends_with("mb") {
        (limit.trim_end_matches(|c| c == 'm' || c == 'b'), "m")
    } else if limit.ends_with("k") || limit.ends_with("kb") {
        (limit.trim_end_matches(|c| c == 'k' || c == 'b'), "k")
    } else {
        (limit.as_str(), "b")
    };

    let num: i64 = num_str.parse().ok()?;
    Some(match unit {
            "g" => num * 1024 * 1024 * 1024,
            "m" => num * 1024 * 1024,
            "k" => num * 1024,
            _ => num,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_pivot_context_out_of_kwargs() {
        let args = serde_json::json!({"a": 1, "__pivot_context": {"trace": "t1"}});
        let (cleaned, pivot) = split_pivot_context(args);
        assert_eq!(cleaned, serde_json::json!({"a": 1}));
        assert_eq!(pivot, Some(serde_json::json!({"trace": "t1"})));
    }

    #[test]
    fn leaves_kwargs_untouched_without_pivot_context() {
        let args = serde_json::json!({"a": 1});
        let (cleaned, pivot) = split_pivot_context(args.clone());
        assert_eq!(cleaned, args);
        assert_eq!(pivot, None);
    }

    #[test]
    fn parses_memory_limits() {
        assert_eq!(parse_memory_limit("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
    }
}
