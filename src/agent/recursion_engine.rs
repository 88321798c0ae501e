//! Recursion Engine (C5) — the heart of the runtime.
//!
//! Drives one `ReactTask` forward one recursion at a time: assemble state
//! (C4), call the LLM (C3) with native tool-calling disabled, parse the
//! envelope, dispatch by `action_type`, persist, and repeat until a
//! terminal or blocking state is reached.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::{
    PlanStepStatus, ReactPlanStepStore, ReactRecursionStore, ReactTask, ReactTaskStore,
    RecursionStatus, TaskStatus,
};
use crate::error::{Error, Result};
use crate::tools::ToolExecutor;

use super::context::{assemble_context, ShortTermNote, ToolCallResultView};
use super::events::{EngineEvent, EventType};
use super::loop_guard::LoopGuard;
use super::parsing::{parse_envelope, ActionType};
use super::prompts::render_system_prompt;
use super::types::{GenerationOptions, Message};
use super::LlmClient;

fn action_type_str(action_type: &ActionType) -> String {
    serde_json::to_value(action_type)
    .ok()
    .and_then(|v| v.as_str().map(|s| s.to_string()))
    .unwrap_or_default()
}

/// Fields common to every dispatch branch, threaded through so each branch
/// doesn't repeat the same five-argument signature.
struct StepMeta {
    trace_id: Uuid,
    observe: String,
    thought: String,
    prompt_tokens: i64,
    completion_tokens: i64,
}

/// Drives `ReactTask`s forward. One engine instance is shared across
/// concurrently running tasks; all per-task state lives on the stack of
/// `run_task`.
pub struct RecursionEngine {
    llm: LlmClient,
    tools: Arc<ToolExecutor>,
    allowed_tools: HashSet<String>,
    task_store: ReactTaskStore,
    recursion_store: ReactRecursionStore,
    plan_store: ReactPlanStepStore,
}

impl RecursionEngine {
    pub fn new(
        llm: LlmClient,
        tools: Arc<ToolExecutor>,
        allowed_tools: HashSet<String>,
        task_store: ReactTaskStore,
        recursion_store: ReactRecursionStore,
        plan_store: ReactPlanStepStore,
    ) -> Self {
        RecursionEngine {
            llm,
            tools,
            allowed_tools,
            task_store,
            recursion_store,
            plan_store,
        }
    }

    /// Run `task` to a terminal or blocking state, emitting one `EngineEvent`
    /// per step on `events`. Returns the task's final persisted row.
    pub async fn run_task(
        &self,
        mut task: ReactTask,
        cancel: CancellationToken,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<ReactTask> {
        if task.max_iteration <= 0 {
            task = self.task_store.set_status(task.task_id, TaskStatus::Failed).await?;
            let _ = events.send(
                EngineEvent::new(EventType::Error, task.task_id, task.iteration)
                .with_data(json!({"message": "Maximum iteration reached"})),
            );
            return Ok(task);
        }

        task = self.task_store.set_status(task.task_id, TaskStatus::Running).await?;
        let mut short_term_memory: Vec<ShortTermNote> = Vec::new();
        let mut loop_guard = LoopGuard::new(3);

        loop {
            if cancel.is_cancelled() {
                task = self.task_store.set_status(task.task_id, TaskStatus::Cancelled).await?;
                return Ok(task);
            }

            if task.iteration >= task.max_iteration {
                task = self.task_store.set_status(task.task_id, TaskStatus::Failed).await?;
                let _ = events.send(
                    EngineEvent::new(EventType::Error, task.task_id, task.iteration)
                    .with_data(json!({"message": "Maximum iteration reached"})),
                );
                return Ok(task);
            }

            let keep_going = self
            .step(&mut task, &cancel, &events, &mut short_term_memory, &mut loop_guard)
            .await?;
            if !keep_going {
                return Ok(task);
            }
        }
    }

    /// Resume a `waiting_input` task whose last recursion was `CLARIFY`,
    ///: writes the reply into that recursion and flips the task
    /// back to `running` so the next `run_task` call continues the loop.
    pub async fn resume_with_reply(&self, task: &mut ReactTask, reply: &str) -> Result<()> {
        let last = self
        .recursion_store
        .get_latest(task.task_id)
        .await?
        .ok_or_else(|| Error::Validation("task has no recursions to resume".to_string()))?;

        if last.action_type.as_deref() != Some("CLARIFY") {
            return Err(Error::Validation(
                    "task's last recursion is not awaiting clarification".to_string(),
            ));
        }

        self.recursion_store.set_clarify_reply(last.trace_id, reply).await?;
        *task = self.task_store.set_status(task.task_id, TaskStatus::Running).await?;
        Ok(())
    }

    /// One full pass of steps 1-7. Returns whether the loop should
    /// continue (`true`) or the task has reached a terminal/blocking state
    /// (`false`).
    async fn step(
        &self,
        task: &mut ReactTask,
        cancel: &CancellationToken,
        events: &UnboundedSender<EngineEvent>,
        short_term_memory: &mut Vec<ShortTermNote>,
        loop_guard: &mut LoopGuard,
    ) -> Result<bool> {
        let plan_steps = self.plan_store.get_by_task(task.task_id).await?;
        let plan_step_id = plan_steps
        .iter()
        .find(|s| {
                s.status == PlanStepStatus::Pending.as_str()
                || s.status == PlanStepStatus::Running.as_str()
        })
        .map(|s| s.step_id.clone());

        let recursion = self
        .recursion_store
        .start(task.task_id, task.iteration, plan_step_id.as_deref())
        .await?;
        let trace_id = recursion.trace_id;

        let _ = events.send(
            EngineEvent::new(EventType::RecursionStart, task.task_id, task.iteration).with_trace(trace_id),
        );

        let recursions = self.recursion_store.get_by_task(task.task_id).await?;
        let mut tool_results_by_trace: HashMap<Uuid, Vec<ToolCallResultView>> = HashMap::new();
        for r in &recursions {
            if let Some(results) = &r.tool_call_results {
                if let Ok(views) = serde_json::from_value::<Vec<ToolCallResultView>>(results.clone()) {
                    tool_results_by_trace.insert(r.trace_id, views);
                }
            }
        }

        let context = assemble_context(
            task,
            trace_id,
            &recursions,
            &plan_steps,
            &tool_results_by_trace,
            short_term_memory,
            &[],
        );
        let state_json = context.encode()?;
        let system_prompt = render_system_prompt(&state_json)?;

        // Exactly two messages per call: the fixed user
        // message first, the freshly-rendered system prompt second. No
        // assistant/tool turns accumulate — state lives in the JSON, not the
        // wire-level conversation.
        let messages = [
            Message::user(task.user_message.clone()),
            Message::system(system_prompt),
        ];

        if cancel.is_cancelled() {
            self.recursion_store
            .complete(
                trace_id,
                "",
                "",
                "ERROR",
                &Value::Null,
                None,
                RecursionStatus::Error,
                Some("task cancelled"),
                0,
                0,
            )
            .await?;
            *task = self.task_store.set_status(task.task_id, TaskStatus::Cancelled).await?;
            return Ok(false);
        }

        let response = match self.llm.chat(&messages, &GenerationOptions::precise()).await {
            Ok(response) => response,
            Err(err) => {
                return self
                .fail_recursion(task, trace_id, &err.to_string(), 0, 0, events)
                .await
                .map(|()| false);
            }
        };

        let prompt_tokens = response.usage.prompt_tokens as i64;
        let completion_tokens = response.usage.completion_tokens as i64;

        if response.choices.first().is_some_and(|c| c.message.tool_calls.is_some()) {
            let message = "provider returned native tool_calls though tools=null was requested";
            return self
            .fail_recursion(task, trace_id, message, prompt_tokens, completion_tokens, events)
            .await
            .map(|()| false);
        }

        let content = response.first_content().unwrap_or_default();
        let envelope = match parse_envelope(content) {
            Ok(envelope) => envelope,
            Err(err) => {
                return self
                .fail_recursion(task, trace_id, &err.to_string(), prompt_tokens, completion_tokens, events)
                .await
                .map(|()| false);
            }
        };

        let _ = events.send(
            EngineEvent::new(EventType::Observe, task.task_id, task.iteration)
            .with_trace(trace_id)
            .with_delta(envelope.observe.clone()),
        );
        let _ = events.send(
            EngineEvent::new(EventType::Thought, task.task_id, task.iteration)
            .with_trace(trace_id)
            .with_delta(envelope.thought.clone()),
        );

        let action_type = envelope.action.result.action_type;
        let output = envelope.action.result.output;
        let _ = events.send(
            EngineEvent::new(EventType::Action, task.task_id, task.iteration)
            .with_trace(trace_id)
            .with_data(json!({"action_type": action_type_str(&action_type), "output": output})),
        );

        let meta = StepMeta {
            trace_id,
            observe: envelope.observe,
            thought: envelope.thought,
            prompt_tokens,
            completion_tokens,
        };

        match action_type {
            ActionType::CallTool => self.dispatch_call_tool(task, meta, output, events, loop_guard).await,
            ActionType::RePlan => self.dispatch_replan(task, meta, output, events).await,
            ActionType::Answer => self.dispatch_answer(task, meta, output, events).await,
            ActionType::Clarify => self.dispatch_clarify(task, meta, output, events).await,
            ActionType::Reflect => self.dispatch_reflect(task, meta, output, short_term_memory, events).await,
            ActionType::Error => {
                let message = output
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("LLM reported ERROR")
                .to_string();
                self.fail_recursion(task, trace_id, &message, prompt_tokens, completion_tokens, events)
                .await
                .map(|()| false)
            }
        }
    }

    async fn dispatch_call_tool(
        &self,
        task: &mut ReactTask,
        meta: StepMeta,
        output: Value,
        events: &UnboundedSender<EngineEvent>,
        loop_guard: &mut LoopGuard,
    ) -> Result<bool> {
        let raw_calls = output
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

        let mut enriched_calls = Vec::with_capacity(raw_calls.len());
        let mut results = Vec::with_capacity(raw_calls.len());

        for call in &raw_calls {
            let function = call.get("function").cloned().unwrap_or_else(|| call.clone());
            let name = function
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
            let arguments = match function.get("arguments") {
                Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::Null),
                Some(v) => v.clone(),
                None => json!({}),
            };
            let tool_call_id = call
            .get("tool_call_id")
            .or_else(|| call.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));

            let outcome = if !self.allowed_tools.is_empty() && !self.allowed_tools.contains(&name) {
                crate::tools::ToolResult::failure(format!("tool '{name}' is not assigned to this agent"))
            } else {
                match self.tools.execute(&name, arguments.clone()).await {
                    Ok(result) => result,
                    Err(err) => crate::tools::ToolResult::failure(err.to_string()),
                }
            };

            if let Some(hint) = loop_guard.record(&name, &arguments.to_string(), &outcome.as_text()) {
                warn!(tool = %name, task_id = %task.task_id, "loop guard intervened");
                let _ = events.send(
                    EngineEvent::new(EventType::Error, task.task_id, task.iteration)
                    .with_trace(meta.trace_id)
                    .with_data(json!({"message": hint.clone(), "kind": "loop_guard"})),
                );
            }

            enriched_calls.push(json!({
                        "tool_call_id": tool_call_id,
                        "function": {"name": name, "arguments": arguments},
            }));
            results.push(ToolCallResultView {
                    tool_call_id,
                    name,
                    result: if outcome.success {
                        Value::String(outcome.content.clone().unwrap_or_default())
                    } else {
                        Value::String(outcome.error.clone().unwrap_or_default())
                    },
                    success: outcome.success,
            });
        }

        let action_output = json!({"tool_calls": enriched_calls});
        let tool_call_results = serde_json::to_value(&results)?;

        self.recursion_store
        .complete(
            meta.trace_id,
            &meta.observe,
            &meta.thought,
            "CALL_TOOL",
            &action_output,
            Some(&tool_call_results),
            RecursionStatus::Done,
            None,
            meta.prompt_tokens,
            meta.completion_tokens,
        )
        .await?;

        let _ = events.send(
            EngineEvent::new(EventType::ToolCall, task.task_id, task.iteration)
            .with_trace(meta.trace_id)
            .with_data(json!({"tool_calls": enriched_calls, "tool_results": results})),
        );

        self.task_store
        .accumulate_tokens(task.task_id, meta.prompt_tokens, meta.completion_tokens)
        .await?;
        *task = self.task_store.advance(task.task_id, TaskStatus::Running).await?;
        Ok(true)
    }

    async fn dispatch_replan(
        &self,
        task: &mut ReactTask,
        meta: StepMeta,
        output: Value,
        events: &UnboundedSender<EngineEvent>,
    ) -> Result<bool> {
        let steps: Vec<(String, String)> = output
        .get("plan")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|step| {
                let step_id = step.get("step_id").and_then(|v| v.as_str())?.to_string();
                let description = step.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                Some((step_id, description))
        })
        .collect();

        self.plan_store.replace_plan(task.task_id, &steps).await?;

        self.recursion_store
        .complete(
            meta.trace_id,
            &meta.observe,
            &meta.thought,
            "RE_PLAN",
            &output,
            None,
            RecursionStatus::Done,
            None,
            meta.prompt_tokens,
            meta.completion_tokens,
        )
        .await?;

        let _ = events.send(
            EngineEvent::new(EventType::PlanUpdate, task.task_id, task.iteration)
            .with_trace(meta.trace_id)
            .with_data(output),
        );

        self.task_store
        .accumulate_tokens(task.task_id, meta.prompt_tokens, meta.completion_tokens)
        .await?;
        *task = self.task_store.advance(task.task_id, TaskStatus::Running).await?;
        Ok(true)
    }

    async fn dispatch_answer(
        &self,
        task: &mut ReactTask,
        meta: StepMeta,
        output: Value,
        events: &UnboundedSender<EngineEvent>,
    ) -> Result<bool> {
        self.recursion_store
        .complete(
            meta.trace_id,
            &meta.observe,
            &meta.thought,
            "ANSWER",
            &output,
            None,
            RecursionStatus::Done,
            None,
            meta.prompt_tokens,
            meta.completion_tokens,
        )
        .await?;

        let _ = events.send(
            EngineEvent::new(EventType::Answer, task.task_id, task.iteration)
            .with_trace(meta.trace_id)
            .with_data(output),
        );

        self.task_store
        .accumulate_tokens(task.task_id, meta.prompt_tokens, meta.completion_tokens)
        .await?;
        *task = self.task_store.advance(task.task_id, TaskStatus::Completed).await?;

        let _ = events.send(EngineEvent::new(EventType::TaskComplete, task.task_id, task.iteration));
        info!(task_id = %task.task_id, "task completed");
        Ok(false)
    }

    async fn dispatch_clarify(
        &self,
        task: &mut ReactTask,
        meta: StepMeta,
        output: Value,
        events: &UnboundedSender<EngineEvent>,
    ) -> Result<bool> {
        self.recursion_store
        .complete(
            meta.trace_id,
            &meta.observe,
            &meta.thought,
            "CLARIFY",
            &output,
            None,
            RecursionStatus::Done,
            None,
            meta.prompt_tokens,
            meta.completion_tokens,
        )
        .await?;

        let _ = events.send(
            EngineEvent::new(EventType::Action, task.task_id, task.iteration)
            .with_trace(meta.trace_id)
            .with_data(json!({"action_type": "CLARIFY", "output": output})),
        );

        self.task_store
        .accumulate_tokens(task.task_id, meta.prompt_tokens, meta.completion_tokens)
        .await?;
        *task = self.task_store.advance(task.task_id, TaskStatus::WaitingInput).await?;
        Ok(false)
    }

    async fn dispatch_reflect(
        &self,
        task: &mut ReactTask,
        meta: StepMeta,
        output: Value,
        short_term_memory: &mut Vec<ShortTermNote>,
        events: &UnboundedSender<EngineEvent>,
    ) -> Result<bool> {
        let note = output
        .get("note")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

        short_term_memory.push(ShortTermNote {
                trace_id: meta.trace_id,
                memory: note,
        });

        self.recursion_store
        .complete(
            meta.trace_id,
            &meta.observe,
            &meta.thought,
            "REFLECT",
            &output,
            None,
            RecursionStatus::Done,
            None,
            meta.prompt_tokens,
            meta.completion_tokens,
        )
        .await?;

        let _ = events.send(
            EngineEvent::new(EventType::Action, task.task_id, task.iteration)
            .with_trace(meta.trace_id)
            .with_data(json!({"action_type": "REFLECT", "output": output})),
        );

        self.task_store
        .accumulate_tokens(task.task_id, meta.prompt_tokens, meta.completion_tokens)
        .await?;
        *task = self.task_store.advance(task.task_id, TaskStatus::Running).await?;
        Ok(true)
    }

    /// Shared failure path for LLM errors, protocol violations, and parse
    /// errors: all three are fatal for the task but not the process.
    async fn fail_recursion(
        &self,
        task: &mut ReactTask,
        trace_id: Uuid,
        message: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
        events: &UnboundedSender<EngineEvent>,
    ) -> Result<()> {
        self.recursion_store
        .complete(
            trace_id,
            "",
            "",
            "ERROR",
            &Value::Null,
            None,
            RecursionStatus::Error,
            Some(message),
            prompt_tokens,
            completion_tokens,
        )
        .await?;

        let _ = events.send(
            EngineEvent::new(EventType::Error, task.task_id, task.iteration)
            .with_trace(trace_id)
            .with_data(json!({"message": message})),
        );

        self.task_store
        .accumulate_tokens(task.task_id, prompt_tokens, completion_tokens)
        .await?;
        *task = self.task_store.advance(task.task_id, TaskStatus::Failed).await?;
        warn!(task_id = %task.task_id, error = %message, "task failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_serializes_to_screaming_snake_case() {
        assert_eq!(action_type_str(&ActionType::CallTool), "CALL_TOOL");
        assert_eq!(action_type_str(&ActionType::RePlan), "RE_PLAN");
        assert_eq!(action_type_str(&ActionType::Answer), "ANSWER");
        assert_eq!(action_type_str(&ActionType::Clarify), "CLARIFY");
        assert_eq!(action_type_str(&ActionType::Reflect), "REFLECT");
        assert_eq!(action_type_str(&ActionType::Error), "ERROR");
    }
}
