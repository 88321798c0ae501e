//! Agent runtime: the LLM protocol client, prompt templating, envelope
//! parsing, context assembly, and loop-guard bookkeeping the recursion
//! engine is built from.

pub mod builder;
mod client;
mod context;
pub mod events;
mod loop_guard;
mod parsing;
pub mod prompts;
mod recursion_engine;
pub mod scene_graph;
pub mod types;

pub use builder::{AgentBuilder, BuilderReply, BuilderRole, DraftAgent, DraftScene};
pub use client::LlmClient;
pub use context::{assemble_context, ReactContext, ShortTermNote, ToolCallResultView};
pub use events::{EngineEvent, EventType};
pub use loop_guard::LoopGuard;
pub use parsing::{parse_envelope, Action, ActionResult, ActionType, Envelope};
pub use prompts::{render_system_prompt, PromptTemplate};
pub use recursion_engine::RecursionEngine;
pub use scene_graph::{run_preview_chat, MatchedConnection, PreviewChatRequest, SceneEvent, SceneEventType, SceneGraph, SceneUpdate};
pub use types::{
    FinishReason, GenerationOptions, LlmProtocol, Message, Response, ResponseChoice,
    ResponseChunk, Role, ToolCall, Usage,
};
