//! Protocol-agnostic LLM client (C3).
//!
//! Generalizes the teacher's single OpenRouter-wire client into a dispatch
//! over `LlmProtocol`: `OpenaiCompatible` (the original wire format,
//! unchanged) and `AnthropicCompatible` (new). Both bindings adapt into the
//! common `Response`/`ResponseChunk` shapes so the recursion engine never
//! sees protocol-specific types.

use crate::agent::types::{
    FinishReason, GenerationOptions, LlmProtocol, Message, Response, ResponseChoice,
    ResponseChunk, Role, ToolCall, Usage,
};
use crate::error::{Error, Result};
use futures::stream::{Stream, StreamExt};
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, warn};

/// Everything the client needs to reach one configured LLM endpoint
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    endpoint: String,
    model: String,
    protocol: LlmProtocol,
}

impl LlmClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: &SecretString,
        protocol: LlmProtocol,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        match protocol {
            LlmProtocol::OpenaiCompatible => {
                headers.insert(
                    header::AUTHORIZATION,
                    header::HeaderValue::from_str(&format!(
                            "Bearer {}",
                            api_key.expose_secret()
                    ))
                    .map_err(|e| Error::Config(format!("invalid API key: {e}")))?,
                );
            }
            LlmProtocol::AnthropicCompatible => {
                headers.insert(
                    "x-api-key",
                    header::HeaderValue::from_str(api_key.expose_secret())
                    .map_err(|e| Error::Config(format!("invalid API key: {e}")))?,
                );
                headers.insert(
                    "anthropic-version",
                    header::HeaderValue::from_static("2023-06-01"),
                );
            }
        }
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http = Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?;

        Ok(LlmClient {
                http,
                endpoint: endpoint.into(),
                model: model.into(),
                protocol,
        })
    }

    /// Single round-trip chat call. `tools = null` is always sent: the engine
    /// forbids native tool-calling (see recursion engine step 4).
    pub async fn chat(&self, messages: &[Message], opts: &GenerationOptions) -> Result<Response> {
        match self.protocol {
            LlmProtocol::OpenaiCompatible => {
                openai::chat(&self.http, &self.endpoint, &self.model, messages, opts).await
            }
            LlmProtocol::AnthropicCompatible => {
                anthropic::chat(&self.http, &self.endpoint, &self.model, messages, opts).await
            }
        }
    }

    /// Lazy, finite stream of response chunks. Not restartable.
    pub async fn chat_stream(
        &self,
        messages: &[Message],
        opts: &GenerationOptions,
    ) -> Result<impl Stream<Item = Result<ResponseChunk>>> {
        match self.protocol {
            LlmProtocol::OpenaiCompatible => {
                openai::chat_stream(&self.http, &self.endpoint, &self.model, messages, opts).await
            }
            LlmProtocol::AnthropicCompatible => {
                anthropic::chat_stream(&self.http, &self.endpoint, &self.model, messages, opts).await
            }
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Buffers raw bytes into complete SSE records (`\n\n`-delimited) and yields
/// the text of each `data: ` line, skipping the terminal `[DONE]` marker.
/// Shared by both protocol bindings' streaming paths.
fn sse_data_lines(
    bytes_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    let state = (Box::pin(bytes_stream), String::new());
    futures::stream::unfold(state, |(mut stream, mut buf)| async move {
            loop {
                if let Some(pos) = buf.find("\n\n") {
                    let record = buf[..pos].to_string();
                    buf.drain(..pos + 2);
                    for line in record.lines() {
                        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                            let data = data.trim();
                            if data == "[DONE]" {
                                return Some((Ok(String::new()), (stream, buf)));
                            }
                            if !data.is_empty() {
                                return Some((Ok(data.to_string()), (stream, buf)));
                            }
                        }
                    }
                    continue;
                }
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buf.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => return Some((Err(Error::Http(e)), (stream, buf))),
                    None => return None,
                }
            }
    })
    .filter(|item| {
            let keep = !matches!(item, Ok(s) if s.is_empty());
            async move { keep }
    })
}

/// OpenAI-compatible binding: POST `.../chat/completions`, bearer auth,
/// SSE `data: {...}` lines terminated by `data: [DONE]`.
mod openai {
    use super::*;
    use serde_json::{json, Value};

    pub async fn chat(
        http: &Client,
        endpoint: &str,
        model: &str,
        messages: &[Message],
        opts: &GenerationOptions,
    ) -> Result<Response> {
        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        let body = request_body(model, messages, opts, false);

        debug!(url = %url, model = %model, "openai-compatible chat request");
        let resp = http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("{endpoint} returned {status}: {text}")));
        }
        let raw: Value = resp.json().await?;
        parse_response(raw)
    }

    pub async fn chat_stream(
        http: &Client,
        endpoint: &str,
        model: &str,
        messages: &[Message],
        opts: &GenerationOptions,
    ) -> Result<impl Stream<Item = Result<ResponseChunk>>> {
        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        let body = request_body(model, messages, opts, true);

        let resp = http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("{endpoint} returned {status}: {text}")));
        }

        let lines = super::sse_data_lines(resp.bytes_stream());
        Ok(lines.map(|line| {
                    let line = line?;
                    let raw: Value = serde_json::from_str(&line)?;
                    Ok(parse_chunk(raw))
        }))
    }

    fn request_body(model: &str, messages: &[Message], opts: &GenerationOptions, stream: bool) -> Value {
        let wire_messages: Vec<Value> = messages
        .iter()
        .map(|m| {
                let mut obj = json!({
                        "role": role_str(m.role),
                        "content": m.content.clone().unwrap_or_default(),
                });
                if let Some(id) = &m.tool_call_id {
                    obj["tool_call_id"] = json!(id);
                }
                obj
        })
        .collect();

        json!({
                "model": model,
                "messages": wire_messages,
                "max_tokens": opts.max_tokens,
                "temperature": opts.temperature,
                "top_p": opts.top_p,
                "stop": opts.stop,
                "stream": stream,
                "tools": Value::Null,
        })
    }

    fn parse_response(raw: Value) -> Result<Response> {
        let id = raw.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let model = raw.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let created = raw.get("created").and_then(|v| v.as_i64()).unwrap_or(0);

        let choices = raw
        .get("choices")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
                let msg = c.get("message").cloned().unwrap_or_else(|| json!({}));
                let content = msg.get("content").and_then(|v| v.as_str()).map(String::from);
                let reasoning = msg
                .get("reasoning_content")
                .and_then(|v| v.as_str())
                .map(String::from);
                let finish_reason = c
                .get("finish_reason")
                .and_then(|v| v.as_str())
                .map(parse_finish_reason);
                let tool_calls = parse_tool_calls(&msg);

                ResponseChoice {
                    index: i as u32,
                    message: Message {
                        role: Role::Assistant,
                        content,
                        reasoning_content: reasoning,
                        tool_calls,
                        tool_call_id: None,
                    },
                    finish_reason,
                }
        })
        .collect();

        let usage = raw
        .get("usage")
        .map(|u| Usage {
                prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        })
        .unwrap_or_else(|| {
                warn!("openai-compatible response omitted usage; treating as zero");
                Usage::default()
        });

        Ok(Response { id, model, created, choices, usage })
    }

    /// Reads `message.tool_calls` (an array of `{id, function:{name, arguments}}`,
    /// `arguments` a JSON-encoded string) so the recursion engine's
    /// tools-must-be-null protocol check can see a provider that ignored it.
    fn parse_tool_calls(msg: &Value) -> Option<Vec<ToolCall>> {
        let calls = msg.get("tool_calls")?.as_array()?;
        if calls.is_empty() {
            return None;
        }
        Some(
            calls
            .iter()
            .map(|c| {
                    let id = c.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let function = c.get("function").cloned().unwrap_or_else(|| json!({}));
                    let name = function.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let arguments = function
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .map(|s| serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string())))
                    .unwrap_or(Value::Null);
                    ToolCall { id, name, arguments }
            })
            .collect(),
        )
    }

    fn parse_chunk(raw: Value) -> ResponseChunk {
        let choice = raw.get("choices").and_then(|c| c.as_array()).and_then(|c| c.first());
        let delta = choice.and_then(|c| c.get("delta"));
        ResponseChunk {
            delta_content: delta.and_then(|d| d.get("content")).and_then(|v| v.as_str()).map(String::from),
            delta_reasoning: delta
            .and_then(|d| d.get("reasoning_content"))
            .and_then(|v| v.as_str())
            .map(String::from),
            finish_reason: choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(|v| v.as_str())
            .map(parse_finish_reason),
            usage: raw.get("usage").map(|u| Usage {
                    prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            }),
        }
    }

    fn parse_finish_reason(s: &str) -> FinishReason {
        match s {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Null,
        }
    }
}

/// Anthropic-compatible binding: POST `.../messages`; system is a separate
/// top-level field; stream events carry `content_block_delta`.
mod anthropic {
    use super::*;
    use serde_json::{json, Value};

    pub async fn chat(
        http: &Client,
        endpoint: &str,
        model: &str,
        messages: &[Message],
        opts: &GenerationOptions,
    ) -> Result<Response> {
        let url = format!("{}/messages", endpoint.trim_end_matches('/'));
        let body = request_body(model, messages, opts, false);

        debug!(url = %url, model = %model, "anthropic-compatible chat request");
        let resp = http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("{endpoint} returned {status}: {text}")));
        }
        let raw: Value = resp.json().await?;
        parse_response(raw, model)
    }

    pub async fn chat_stream(
        http: &Client,
        endpoint: &str,
        model: &str,
        messages: &[Message],
        opts: &GenerationOptions,
    ) -> Result<impl Stream<Item = Result<ResponseChunk>>> {
        let url = format!("{}/messages", endpoint.trim_end_matches('/'));
        let body = request_body(model, messages, opts, true);

        let resp = http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("{endpoint} returned {status}: {text}")));
        }

        let lines = super::sse_data_lines(resp.bytes_stream());
        Ok(lines.map(|line| {
                    let line = line?;
                    let raw: Value = serde_json::from_str(&line)?;
                    Ok(parse_event(raw))
        }))
    }

    fn request_body(model: &str, messages: &[Message], opts: &GenerationOptions, stream: bool) -> Value {
        let system: String = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .filter_map(|m| m.content.clone())
        .collect::<Vec<_>>()
        .join("\n\n");

        let wire_messages: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
                json!({
                        "role": if m.role == Role::Assistant { "assistant" } else { "user" },
                        "content": m.content.clone().unwrap_or_default(),
                })
        })
        .collect();

        json!({
                "model": model,
                "system": system,
                "messages": wire_messages,
                "max_tokens": opts.max_tokens.unwrap_or(4096),
                "temperature": opts.temperature,
                "top_p": opts.top_p,
                "stop_sequences": opts.stop,
                "stream": stream,
        })
    }

    fn parse_response(raw: Value, model: &str) -> Result<Response> {
        let id = raw.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let content = raw
        .get("content")
        .and_then(|v| v.as_array())
        .map(|blocks| {
                blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

        let tool_calls = raw.get("content").and_then(|v| v.as_array()).map(|blocks| {
                blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
                .map(|b| ToolCall {
                        id: b.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        name: b.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        arguments: b.get("input").cloned().unwrap_or(Value::Null),
                })
                .collect::<Vec<_>>()
        }).filter(|v: &Vec<ToolCall>| !v.is_empty());

        let finish_reason = raw
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(|s| match s {
                "end_turn" | "stop_sequence" => FinishReason::Stop,
                "max_tokens" => FinishReason::Length,
                "tool_use" => FinishReason::ToolCalls,
                _ => FinishReason::Null,
        });

        let usage = raw
        .get("usage")
        .map(|u| {
                let prompt = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let completion = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                }
        })
        .unwrap_or_else(|| {
                warn!("anthropic-compatible response omitted usage; treating as zero");
                Usage::default()
        });

        Ok(Response {
                id,
                model: model.to_string(),
                created: 0,
                choices: vec![ResponseChoice {
                        index: 0,
                        message: Message {
                            role: Role::Assistant,
                            content: Some(content),
                            reasoning_content: None,
                            tool_calls,
                            tool_call_id: None,
                        },
                        finish_reason,
                }],
                usage,
        })
    }

    fn parse_event(raw: Value) -> ResponseChunk {
        let event_type = raw.get("type").and_then(|v| v.as_str()).unwrap_or_default();
        let mut chunk = ResponseChunk::default();

        if event_type == "content_block_delta" {
            if let Some(delta) = raw.get("delta") {
                let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or_default();
                if delta_type == "text_delta" {
                    chunk.delta_content = delta.get("text").and_then(|v| v.as_str()).map(String::from);
                }
            }
        } else if event_type == "message_delta" {
            chunk.finish_reason = raw
            .get("delta")
            .and_then(|d| d.get("stop_reason"))
            .and_then(|v| v.as_str())
            .map(|s| match s {
                    "end_turn" | "stop_sequence" => FinishReason::Stop,
                    "max_tokens" => FinishReason::Length,
                    "tool_use" => FinishReason::ToolCalls,
                    _ => FinishReason::Null,
            });
            chunk.usage = raw.get("usage").map(|u| Usage {
                    prompt_tokens: 0,
                    completion_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    total_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            });
        }

        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation_openai() {
        let key = SecretString::from("test-key".to_string());
        let client = LlmClient::new(
            "https://api.example.com/v1",
            "gpt-test",
            &key,
            LlmProtocol::OpenaiCompatible,
            Duration::from_secs(30),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn client_creation_anthropic() {
        let key = SecretString::from("test-key".to_string());
        let client = LlmClient::new(
            "https://api.anthropic.com/v1",
            "claude-test",
            &key,
            LlmProtocol::AnthropicCompatible,
            Duration::from_secs(30),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn generation_options_precise() {
        let opts = GenerationOptions::precise();
        assert_eq!(opts.temperature, Some(0.0));
    }
}
