//! Context Assembler (C4): rebuilds the full state-machine JSON from a
//! task's persisted recursions and plan steps. Typed records replace the
//! "ad-hoc JSON dict" pattern.

use crate::database::{ReactPlanStep, ReactRecursion, ReactTask};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    pub task_id: uuid::Uuid,
    pub iteration: i32,
    pub max_iteration: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentRecursion {
    pub trace_id: uuid::Uuid,
    pub iteration_index: i32,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecursionSummary {
    pub trace_id: uuid::Uuid,
    pub status: String,
    pub result: serde_json::Value,
    pub error_log: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStepView {
    pub step_id: String,
    pub description: String,
    pub status: String,
    pub recursions: Vec<RecursionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryView {
    pub short_term: Vec<ShortTermNote>,
    pub long_term_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermNote {
    pub trace_id: uuid::Uuid,
    pub memory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBody {
    pub objective: String,
    pub constraints: Vec<String>,
    pub plan: Vec<PlanStepView>,
    /// Recursions with no `plan_step_id` — orphaned, e.g. after their plan
    /// step was deleted. Kept visible here rather than silently dropped.
    pub recursions: Vec<RecursionSummary>,
    pub memory: MemoryView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResultView {
    pub tool_call_id: String,
    pub name: String,
    pub result: serde_json::Value,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastRecursion {
    pub trace_id: uuid::Uuid,
    pub observe: String,
    pub thought: String,
    pub action: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_results: Option<Vec<ToolCallResultView>>,
}

/// The full state JSON re-injected into the system prompt every recursion.
/// All fields are required even if empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactContext {
    pub global: GlobalState,
    pub current_recursion: CurrentRecursion,
    pub context: ContextBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_recursion: Option<LastRecursion>,
}

impl ReactContext {
    /// Single source-of-truth encoder: produces the exact wire JSON of.
    pub fn encode(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Enrich `output.tool_calls[]` in place with `result`/`success` from the
/// matching `ToolCallResultView`, keyed by `tool_call_id`.
fn merge_tool_results(output: &serde_json::Value, results: &[ToolCallResultView]) -> serde_json::Value {
    let mut output = output.clone();
    if let Some(tool_calls) = output.get_mut("tool_calls").and_then(|v| v.as_array_mut()) {
        for tc in tool_calls.iter_mut() {
            let id = tc
            .get("tool_call_id")
            .or_else(|| tc.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
            let Some(id) = id else { continue };
            if let Some(r) = results.iter().find(|r| r.tool_call_id == id) {
                if let Some(map) = tc.as_object_mut() {
                    map.insert("result".to_string(), r.result.clone());
                    map.insert("success".to_string(), serde_json::Value::Bool(r.success));
                }
            }
        }
    }
    output
}

/// Reconstruct the full state JSON for `task`, reading `recursions` in
/// `iteration_index` order and `plan_steps` in `step_id` order.
///
/// Routing rule: a recursion with a `plan_step_id` is pushed into
/// that step's `recursions`; otherwise it lands in the top-level
/// `context.recursions` list, so recursions orphaned by plan deletion are
/// still observable.
pub fn assemble_context(
    task: &ReactTask,
    current_trace_id: uuid::Uuid,
    recursions: &[ReactRecursion],
    plan_steps: &[ReactPlanStep],
    tool_results_by_trace: &HashMap<uuid::Uuid, Vec<ToolCallResultView>>,
    short_term_memory: &[ShortTermNote],
    long_term_refs: &[String],
) -> ReactContext {
    let mut ordered_recursions = recursions.to_vec();
    ordered_recursions.sort_by_key(|r| r.iteration_index);

    let mut by_step: HashMap<String, Vec<RecursionSummary>> = HashMap::new();
    let mut orphan_recursions: Vec<RecursionSummary> = Vec::new();
    for r in &ordered_recursions {
        let summary = RecursionSummary {
            trace_id: r.trace_id,
            status: r.status.clone(),
            result: r.action_output.clone(),
            error_log: r.error_log.clone(),
        };
        match &r.plan_step_id {
            Some(step_id) => by_step.entry(step_id.clone()).or_default().push(summary),
            None => orphan_recursions.push(summary),
        }
    }

    let mut ordered_steps = plan_steps.to_vec();
    ordered_steps.sort_by(|a, b| a.step_id.cmp(&b.step_id));

    let plan = ordered_steps
    .iter()
    .map(|s| PlanStepView {
            step_id: s.step_id.clone(),
            description: s.description.clone(),
            status: s.status.clone(),
            recursions: by_step.remove(&s.step_id).unwrap_or_default(),
    })
    .collect();

    let current = ordered_recursions
    .iter()
    .find(|r| r.trace_id == current_trace_id)
    .map(|r| CurrentRecursion {
            trace_id: r.trace_id,
            iteration_index: r.iteration_index,
            status: r.status.clone(),
    })
    .unwrap_or(CurrentRecursion {
            trace_id: current_trace_id,
            iteration_index: task.iteration,
            status: "running".to_string(),
    });

    let last_recursion = ordered_recursions
    .iter()
    .filter(|r| r.trace_id != current_trace_id)
    .max_by_key(|r| r.iteration_index)
    .map(|r| {
            let tool_call_results = tool_results_by_trace.get(&r.trace_id).cloned();
            let output = match (&r.action_type, &tool_call_results) {
                (Some(action_type), Some(results)) if action_type == "CALL_TOOL" => {
                    merge_tool_results(&r.action_output, results)
                }
                _ => r.action_output.clone(),
            };
            LastRecursion {
                trace_id: r.trace_id,
                observe: r.observe.clone(),
                thought: r.thought.clone(),
                action: serde_json::json!({ "result": { "action_type": r.action_type, "output": output } }),
                tool_call_results,
            }
    });

    ReactContext {
        global: GlobalState {
            task_id: task.task_id,
            iteration: task.iteration,
            max_iteration: task.max_iteration,
            status: task.status.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        },
        current_recursion: current,
        context: ContextBody {
            objective: task.objective.clone(),
            constraints: vec![],
            plan,
            recursions: orphan_recursions,
            memory: MemoryView {
                short_term: short_term_memory.to_vec(),
                long_term_refs: long_term_refs.to_vec(),
            },
        },
        last_recursion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_task() -> ReactTask {
        ReactTask {
            task_id: uuid::Uuid::new_v4(),
            session_id: uuid::Uuid::new_v4(),
            agent_id: uuid::Uuid::new_v4(),
            user: "u1".to_string(),
            user_message: "hi".to_string(),
            objective: "greet".to_string(),
            status: "running".to_string(),
            iteration: 0,
            max_iteration: 30,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_recursion(task_id: uuid::Uuid, iteration_index: i32, action_output: serde_json::Value) -> ReactRecursion {
        ReactRecursion {
            trace_id: uuid::Uuid::new_v4(),
            task_id,
            plan_step_id: None,
            iteration_index,
            observe: "observed".to_string(),
            thought: "thought".to_string(),
            action_type: Some("CALL_TOOL".to_string()),
            action_output,
            tool_call_results: None,
            status: "done".to_string(),
            error_log: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merges_tool_results_into_action_output_tool_calls() {
        let task = sample_task();
        let recursion = sample_recursion(
            task.task_id,
            0,
            serde_json::json!({ "tool_calls": [ { "tool_call_id": "call_1", "name": "add", "arguments": {"a":1,"b":2} } ] }),
        );
        let trace_id = recursion.trace_id;
        let mut results = HashMap::new();
        results.insert(
            trace_id,
            vec![ToolCallResultView {
                    tool_call_id: "call_1".to_string(),
                    name: "add".to_string(),
                    result: serde_json::json!("3"),
                    success: true,
            }],
        );

        let ctx = assemble_context(&task, uuid::Uuid::new_v4(), &[recursion], &[], &results, &[], &[]);
        let last = ctx.last_recursion.expect("expected a last_recursion");
        let merged_call = &last.action["result"]["output"]["tool_calls"][0];
        assert_eq!(merged_call["result"], serde_json::json!("3"));
        assert_eq!(merged_call["success"], serde_json::json!(true));
        assert_eq!(last.tool_call_results.unwrap()[0].tool_call_id, "call_1");
    }

    #[test]
    fn orphan_recursion_routes_to_top_level_list() {
        let task = sample_task();
        let recursion = sample_recursion(task.task_id, 0, serde_json::json!({}));
        let trace_id = recursion.trace_id;

        let ctx = assemble_context(&task, uuid::Uuid::new_v4(), &[recursion], &[], &HashMap::new(), &[], &[]);
        assert!(ctx.context.plan.is_empty());
        assert_eq!(ctx.context.recursions.len(), 1);
        assert_eq!(ctx.context.recursions[0].trace_id, trace_id);
    }

    #[test]
    fn assembles_empty_context_on_first_iteration() {
        let task = sample_task();
        let ctx = assemble_context(&task, uuid::Uuid::new_v4(), &[], &[], &HashMap::new(), &[], &[]);
        assert!(ctx.last_recursion.is_none());
        assert!(ctx.context.plan.is_empty());
    }

    #[test]
    fn round_trips_through_json() {
        let task = sample_task();
        let ctx = assemble_context(&task, uuid::Uuid::new_v4(), &[], &[], &HashMap::new(), &[], &[]);
        let encoded = ctx.encode().unwrap();
        let decoded: ReactContext = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.global.task_id, ctx.global.task_id);
    }
}
