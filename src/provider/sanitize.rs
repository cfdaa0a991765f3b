//! Provider-specific transcript and schema normalization.

use serde_json::Value;

use crate::config::ProviderKind;
use crate::types::{Message, Role};

/// Rewrite canonical history into the shape a vendor accepts.
///
/// - `tool` entries become `user` turns; canonical history carries no vendor
///   call ids to pair them with.
/// - Assistant entries without content are sent as `""` to OpenAI-compatible
///   endpoints and dropped for Anthropic and Gemini.
/// - Gemini has no system role, so system text becomes a `System: ` user turn.
/// - Anthropic and Gemini get consecutive same-role turns merged.
pub fn sanitize_messages_for_provider(messages: &[Message], provider: ProviderKind) -> Vec<Message> {
    let mut sanitized: Vec<Message> = messages
        .iter()
        .filter_map(|message| rewrite_message(message, provider))
        .collect();

    if requires_alternation(provider) {
        sanitized = merge_consecutive_roles(sanitized);
    }

    sanitized
}

fn requires_alternation(provider: ProviderKind) -> bool {
    matches!(provider, ProviderKind::Anthropic | ProviderKind::Gemini)
}

fn rewrite_message(message: &Message, provider: ProviderKind) -> Option<Message> {
    match (message.role, message.content.as_deref()) {
        (Role::Assistant, None) => match provider {
            ProviderKind::OpenAi | ProviderKind::Custom => Some(Message::assistant("")),
            ProviderKind::Anthropic | ProviderKind::Gemini => None,
        },
        (Role::Tool, content) => Some(Message::user(content.unwrap_or_default())),
        (Role::System, content) if provider == ProviderKind::Gemini => Some(Message::user(
            format!("System: {}", content.unwrap_or_default()),
        )),
        _ => Some(message.clone()),
    }
}

fn merge_consecutive_roles(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match out.last_mut() {
            Some(prev) if prev.role == message.role => {
                let merged = format!("{}\n\n{}", prev.text(), message.text());
                prev.content = Some(merged);
            }
            _ => out.push(message),
        }
    }
    out
}

/// Normalize a tool parameter schema for a specific provider.
///
/// Gemini rejects `additionalProperties` and `$schema` keywords anywhere in a
/// function declaration; other vendors take the schema as-is.
pub fn normalize_schema_for_provider(schema: &Value, provider: ProviderKind) -> Value {
    match provider {
        ProviderKind::Gemini => strip_unsupported_keywords(schema),
        _ => schema.clone(),
    }
}

fn strip_unsupported_keywords(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut normalized = serde_json::Map::new();
            for (key, value) in obj {
                if key == "additionalProperties" || key == "$schema" {
                    continue;
                }
                normalized.insert(key.clone(), strip_unsupported_keywords(value));
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_unsupported_keywords).collect()),
        _ => schema.clone(),
    }
}
