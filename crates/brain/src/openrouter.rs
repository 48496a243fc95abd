//! OpenRouter intent resolution backend
//!
//! Posts the transcript, conversation history, and the latest camera frame
//! to a vision-capable chat completions model and maps its JSON reply onto
//! the closed `Reply` set. The model decides conversational-vs-action; this
//! module only parses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use wink_config::ProviderConfig;
use wink_core::{DeviceAction, MessageHistory, TaskStatus};

use crate::intent::{DeviceDirectory, DeviceInfo, IntentResolver, Reply};
use crate::BrainError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TEMPERATURE: f64 = 0.3;
const MAX_TOKENS: u32 = 512;

/// Intent resolver backed by the OpenRouter chat completions API.
pub struct OpenRouterResolver {
    client: Client,
    api_key: String,
    url: String,
    model: String,
    directory: Arc<dyn DeviceDirectory>,
}

impl OpenRouterResolver {
    /// Create a resolver. Fails fast when the API key is missing.
    pub fn new(
        providers: &ProviderConfig,
        directory: Arc<dyn DeviceDirectory>,
    ) -> Result<Self, BrainError> {
        let api_key = providers
            .require_openrouter_key()
            .map_err(|e| BrainError::Configuration(e.to_string()))?
            .to_string();

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BrainError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            url: providers.openrouter_url.clone(),
            model: providers.intent_model.clone(),
            directory,
        })
    }

    fn system_prompt(devices: &[DeviceInfo], task_status: Option<&TaskStatus>) -> String {
        let devices_block = if devices.is_empty() {
            "  (no devices connected)".to_string()
        } else {
            devices
                .iter()
                .map(|d| {
                    format!(
                        "  - device_id: \"{}\", platform: \"{}\", capabilities: [{}]",
                        d.device_id,
                        d.platform.as_deref().unwrap_or("unknown"),
                        d.capabilities.join(", ")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut prompt = format!(
            "You are Wink, a live voice assistant. You either answer questions \
             conversationally or help the user control their devices.\n\
             \n\
             ## Connected devices:\n{devices_block}\n\
             \n\
             ## Response format:\n\
             Respond with valid JSON only. No other text.\n\
             \n\
             For conversational responses:\n\
             {{\"answer\": \"<your helpful response>\"}}\n\
             \n\
             For device control requests:\n\
             {{\"answer\": \"<brief spoken confirmation>\", \"device_id\": \"<id from the list>\", \
             \"goal\": \"<clear single instruction>\", \"task_type\": \"laptop\", \"confirm\": true}}\n\
             \n\
             Set \"confirm\" to true unless the request is trivially safe to run \
             unprompted. Keep answers brief and natural for speech."
        );

        if let Some(status) = task_status {
            prompt.push_str("\n\n## Current task status:\n");
            prompt.push_str(&status.prompt_context());
        }

        prompt
    }

    fn build_messages(
        &self,
        transcript: &str,
        latest_frame: Option<&[u8]>,
        history: &MessageHistory,
        task_status: Option<&TaskStatus>,
    ) -> Vec<serde_json::Value> {
        let devices = self.directory.devices();
        let mut messages = vec![json!({
            "role": "system",
            "content": Self::system_prompt(&devices, task_status),
        })];

        for message in history.messages() {
            messages.push(json!({
                "role": message.role.as_str(),
                "content": message.content,
            }));
        }

        let mut content = vec![json!({ "type": "text", "text": transcript })];
        if let Some(frame) = latest_frame {
            let b64 = BASE64.encode(frame);
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{}", b64) },
            }));
        }
        messages.push(json!({ "role": "user", "content": content }));

        messages
    }
}

#[async_trait]
impl IntentResolver for OpenRouterResolver {
    async fn resolve(
        &self,
        transcript: &str,
        latest_frame: Option<&[u8]>,
        history: &MessageHistory,
        task_status: Option<&TaskStatus>,
    ) -> Result<Reply, BrainError> {
        let messages = self.build_messages(transcript, latest_frame, history, task_status);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": TEMPERATURE,
                "max_tokens": MAX_TOKENS,
            }))
            .send()
            .await
            .map_err(|e| BrainError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BrainError::Provider(format!(
                "OpenRouter returned {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| BrainError::Parse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BrainError::Parse("empty choices in completion".to_string()))?;

        Ok(parse_reply(&content))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Map raw model output to a `Reply`. Unparseable output degrades to a
/// plain answer rather than an error: one mangled completion should cost a
/// clumsy reply, not a failed turn.
fn parse_reply(raw: &str) -> Reply {
    let cleaned = strip_code_fences(raw.trim());

    let value: serde_json::Value = match serde_json::from_str(&cleaned) {
        Ok(value) => value,
        Err(_) => {
            let text = if cleaned.is_empty() {
                "I didn't catch that. Could you try again?".to_string()
            } else {
                cleaned
            };
            return Reply::Answer { text };
        },
    };

    let goal = value.get("goal").and_then(|v| v.as_str());
    let device_id = value.get("device_id").and_then(|v| v.as_str());

    if let (Some(goal), Some(device_id)) = (goal, device_id) {
        let text = value
            .get("answer")
            .and_then(|v| v.as_str())
            .unwrap_or("Okay, I'll do that.")
            .to_string();
        let action = DeviceAction::new(device_id, goal).with_task_type(
            value
                .get("task_type")
                .and_then(|v| v.as_str())
                .unwrap_or("laptop"),
        );
        // Actions require confirmation unless the model opts out.
        if value.get("confirm").and_then(|v| v.as_bool()).unwrap_or(true) {
            return Reply::ProposedAction { text, action };
        }
        return Reply::Action { text, action };
    }

    let text = value
        .get("answer")
        .and_then(|v| v.as_str())
        .unwrap_or("I'm here to help!")
        .to_string();
    Reply::Answer { text }
}

/// Models occasionally wrap JSON in markdown fences despite instructions.
fn strip_code_fences(raw: &str) -> String {
    if !raw.starts_with("```") {
        return raw.to_string();
    }
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_answer() {
        let reply = parse_reply(r#"{"answer": "It's four."}"#);
        assert_eq!(
            reply,
            Reply::Answer {
                text: "It's four.".to_string()
            }
        );
    }

    #[test]
    fn test_parse_action_defaults_to_proposed() {
        let reply = parse_reply(
            r#"{"answer": "Opening Chrome", "device_id": "laptop-1", "goal": "open chrome"}"#,
        );
        match reply {
            Reply::ProposedAction { action, .. } => {
                assert_eq!(action.device_id, "laptop-1");
                assert_eq!(action.task_type, "laptop");
            },
            other => panic!("expected proposed action, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unconfirmed_action_is_immediate() {
        let reply = parse_reply(
            r#"{"answer": "Done", "device_id": "laptop-1", "goal": "mute volume", "confirm": false}"#,
        );
        assert!(matches!(reply, Reply::Action { .. }));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"answer\": \"hello\"}\n```";
        assert_eq!(
            parse_reply(raw),
            Reply::Answer {
                text: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_parse_non_json_degrades_to_answer() {
        let reply = parse_reply("Sure, happy to help with that.");
        assert_eq!(
            reply,
            Reply::Answer {
                text: "Sure, happy to help with that.".to_string()
            }
        );
    }

    #[test]
    fn test_system_prompt_lists_devices_and_task() {
        let devices = vec![DeviceInfo {
            device_id: "laptop-1".to_string(),
            platform: Some("Darwin".to_string()),
            capabilities: vec!["mouse".to_string(), "keyboard".to_string()],
        }];
        let action = DeviceAction::new("laptop-1", "open chrome");
        let status = TaskStatus::queued(&action);

        let prompt = OpenRouterResolver::system_prompt(&devices, Some(&status));
        assert!(prompt.contains("laptop-1"));
        assert!(prompt.contains("Darwin"));
        assert!(prompt.contains("open chrome"));

        let prompt = OpenRouterResolver::system_prompt(&[], None);
        assert!(prompt.contains("no devices connected"));
    }
}
