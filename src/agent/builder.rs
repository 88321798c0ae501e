//! Agent Builder (C9): a small multi-turn helper that turns a rolling
//! conversation of user requirements into a draft agent definition.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::types::{GenerationOptions, Message};
use super::LlmClient;

const SYSTEM_PROMPT: &str = r#"You help a user design an agent by iterating on its definition with them.

On every turn, reply with a single JSON object of exactly this shape:

{ "response": "<what you say to the user>",
 "reason": "<why you made these changes>",
 "agent": { "name": "...", "description": "...", "scenes": [ { "name": "...", "description": "..." } ] } }

Worked example:

{ "response": "I've added a greeting scene to get things started.",
 "reason": "Every agent needs an entry point.",
 "agent": { "name": "Concierge", "description": "Greets guests and routes requests.",
 "scenes": [ { "name": "greeting", "description": "Welcomes the guest and asks what they need." } ] } }

Reply with the JSON object only, optionally wrapped in a ```json fenced block. Never include any other text."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderRole {
    User,
    Assistant,
}

/// One scene in a draft agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftScene {
    pub name: String,
    pub description: String,
}

/// The agent definition under construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftAgent {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub scenes: Vec<DraftScene>,
}

/// The builder's parsed reply for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderReply {
    pub response: String,
    pub reason: String,
    pub agent: DraftAgent,
}

/// Maintains the rolling history of a single build session. Not persisted
/// across process restarts; `/build/chat` callers pass the prior turns back
/// in via `session_id`-scoped storage owned by the HTTP layer, if any.
pub struct AgentBuilder {
    history: Vec<Message>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        AgentBuilder {
            history: vec![Message::system(SYSTEM_PROMPT)],
        }
    }

    /// Rebuild a builder from a previously-serialized history (role, text).
    pub fn from_history(turns: &[(BuilderRole, String)]) -> Self {
        let mut builder = Self::new();
        for (role, content) in turns {
            builder.history.push(match role {
                    BuilderRole::User => Message::user(content.clone()),
                    BuilderRole::Assistant => Message::assistant(content.clone()),
            });
        }
        builder
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Append the user's new requirement, call the LLM, and parse its reply.
    /// On success the exchange is appended to `history` for the next turn.
    pub async fn step(&mut self, llm: &LlmClient, content: &str) -> Result<BuilderReply> {
        self.history.push(Message::user(content));

        let response = llm.chat(&self.history, &GenerationOptions::default()).await?;
        let raw = response
        .first_content()
        .ok_or_else(|| Error::Internal("builder LLM response had no content".to_string()))?;

        let reply = parse_builder_reply(raw)?;
        self.history.push(Message::assistant(raw.to_string()));
        Ok(reply)
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts a raw JSON object or one wrapped in ```json / ``` fences.
fn parse_builder_reply(content: &str) -> Result<BuilderReply> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("builder reply was empty".to_string()));
    }

    if let Some(fenced) = extract_fenced(trimmed) {
        if let Ok(reply) = serde_json::from_str::<BuilderReply>(&fenced) {
            return Ok(reply);
        }
    }

    serde_json::from_str::<BuilderReply>(trimmed)
    .map_err(|e| Error::Validation(format!("could not parse builder reply: {e}")))
}

fn extract_fenced(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"response":"ok","reason":"because","agent":{"name":"A","description":"D","scenes":[]}}"#;

    #[test]
    fn parses_direct_json() {
        let reply = parse_builder_reply(VALID).unwrap();
        assert_eq!(reply.agent.name, "A");
    }

    #[test]
    fn parses_fenced_json() {
        let text = format!("```json\n{VALID}\n```");
        let reply = parse_builder_reply(&text).unwrap();
        assert_eq!(reply.response, "ok");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_builder_reply("not json").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_builder_reply("").is_err());
    }

    #[test]
    fn from_history_seeds_prior_turns() {
        let builder = AgentBuilder::from_history(&[
                (BuilderRole::User, "make me a concierge bot".to_string()),
                (BuilderRole::Assistant, VALID.to_string()),
        ]);
        assert_eq!(builder.history().len(), 3);
    }
}
