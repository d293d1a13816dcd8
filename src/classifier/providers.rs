//! Chat-completion backends and the prompts sent to them.

use crate::classifier::transport::HttpTransport;
use crate::config::{CustomProviderConfig, ProviderId};
use crate::error::ClassifierError;
use serde_json::{json, Value};

pub const OPENAI_MODERATION_URL: &str = "https://api.openai.com/v1/moderations";
const CLAUDE_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_API_VERSION: &str = "2023-06-01";

pub const IMAGE_RUBRIC: &str = r#"You are a strict content moderation system. Your job is to detect "thirst trap" content - images designed to be sexually suggestive or attention-seeking.

FILTER (respond "yes") if the image contains:
- Selfies with revealing clothing or poses
- Body-focused photos (showing abs, curves, cleavage, etc)
- Sexually suggestive poses or expressions
- Photos clearly designed to attract sexual attention
- Bathroom/mirror selfies with revealing outfits
- Photos emphasizing physical appearance over content

ALLOW (respond "no") if the image contains:
- Regular photos of people fully clothed
- Professional headshots or casual photos
- Group photos, landscape, objects
- Memes, screenshots, art

Respond with ONLY "yes" or "no"."#;

pub const IMAGE_QUESTION: &str = "Is this a thirst trap or sexually suggestive image?";

pub const CRYPTO_SYSTEM_PROMPT: &str = "You are a content filter. Determine if the given text is about cryptocurrency, blockchain, NFTs, trading, or related topics. Respond with only \"yes\" or \"no\".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub name: &'static str,
    pub base_url: String,
    pub vision_model: String,
    pub text_model: String,
    /// Only OpenAI offers the free moderation endpoint.
    pub supports_moderation: bool,
}

impl ProviderSpec {
    pub fn resolve(id: ProviderId, custom: &CustomProviderConfig) -> Self {
        match id {
            ProviderId::Openai => Self {
                id,
                name: "OpenAI",
                base_url: "https://api.openai.com/v1".to_string(),
                vision_model: "gpt-4o-mini".to_string(),
                text_model: "gpt-4o-mini".to_string(),
                supports_moderation: true,
            },
            ProviderId::Claude => Self {
                id,
                name: "Claude",
                base_url: "https://api.anthropic.com/v1".to_string(),
                vision_model: "claude-sonnet-4-20250514".to_string(),
                text_model: "claude-haiku-4-20250514".to_string(),
                supports_moderation: false,
            },
            ProviderId::Kimi => Self {
                id,
                name: "Kimi",
                base_url: "https://api.moonshot.cn/v1".to_string(),
                vision_model: "moonshot-v1-8k-vision-preview".to_string(),
                text_model: "moonshot-v1-8k".to_string(),
                supports_moderation: false,
            },
            ProviderId::Custom => Self {
                id,
                name: "Custom (OpenAI-compatible)",
                base_url: custom.base_url.trim_end_matches('/').to_string(),
                vision_model: custom.vision_model.clone(),
                text_model: custom.text_model.clone(),
                supports_moderation: false,
            },
        }
    }

    fn model(&self, vision: bool) -> &str {
        if vision {
            &self.vision_model
        } else {
            &self.text_model
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatPart {
    Text(String),
    /// `https://` or `data:<media type>;base64,` URL.
    ImageUrl(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: ChatContent,
}

impl ChatMessage {
    pub fn system(text: &str) -> Self {
        Self {
            role: "system",
            content: ChatContent::Text(text.to_string()),
        }
    }

    pub fn user(text: &str) -> Self {
        Self {
            role: "user",
            content: ChatContent::Text(text.to_string()),
        }
    }

    pub fn user_parts(parts: Vec<ChatPart>) -> Self {
        Self {
            role: "user",
            content: ChatContent::Parts(parts),
        }
    }
}

pub fn vision_messages(image_url: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(IMAGE_RUBRIC),
        ChatMessage::user_parts(vec![
            ChatPart::Text(IMAGE_QUESTION.to_string()),
            ChatPart::ImageUrl(image_url.to_string()),
        ]),
    ]
}

pub fn crypto_messages(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(CRYPTO_SYSTEM_PROMPT),
        ChatMessage::user(&format!(
            "Is this text about cryptocurrency or related topics? \"{text}\""
        )),
    ]
}

/// Any reply containing "yes" counts as a positive answer.
pub fn interpret_yes_no(reply: &str) -> bool {
    reply.to_lowercase().contains("yes")
}

pub fn openai_body(model: &str, messages: &[ChatMessage], max_tokens: u32) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            let content = match &m.content {
                ChatContent::Text(text) => json!(text),
                ChatContent::Parts(parts) => Value::Array(
                    parts
                        .iter()
                        .map(|part| match part {
                            ChatPart::Text(text) => json!({ "type": "text", "text": text }),
                            ChatPart::ImageUrl(url) => {
                                json!({ "type": "image_url", "image_url": { "url": url } })
                            }
                        })
                        .collect(),
                ),
            };
            json!({ "role": m.role, "content": content })
        })
        .collect();

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "temperature": 0.1,
    })
}

/// The messages API takes the system prompt separately and wants images as
/// `source` objects.
pub fn claude_body(model: &str, messages: &[ChatMessage], max_tokens: u32) -> Value {
    let system = messages
        .iter()
        .find(|m| m.role == "system")
        .and_then(|m| match &m.content {
            ChatContent::Text(text) => Some(text.clone()),
            ChatContent::Parts(_) => None,
        })
        .unwrap_or_default();

    let converted: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| {
            let content = match &m.content {
                ChatContent::Text(text) => json!(text),
                ChatContent::Parts(parts) => Value::Array(
                    parts
                        .iter()
                        .map(|part| match part {
                            ChatPart::Text(text) => json!({ "type": "text", "text": text }),
                            ChatPart::ImageUrl(url) => claude_image_source(url),
                        })
                        .collect(),
                ),
            };
            json!({ "role": m.role, "content": content })
        })
        .collect();

    json!({
        "model": model,
        "max_tokens": max_tokens,
        "system": system,
        "messages": converted,
    })
}

fn claude_image_source(url: &str) -> Value {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data }
            });
        }
    }
    json!({ "type": "image", "source": { "type": "url", "url": url } })
}

fn parse_openai_reply(body: &str) -> Result<String, ClassifierError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;
    Ok(value["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string())
}

fn parse_claude_reply(body: &str) -> Result<String, ClassifierError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;
    Ok(value["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string())
}

/// One chat-completion round trip. No retries.
pub async fn chat(
    transport: &dyn HttpTransport,
    spec: &ProviderSpec,
    api_key: &str,
    messages: &[ChatMessage],
    vision: bool,
) -> Result<String, ClassifierError> {
    let model = spec.model(vision);
    if model.is_empty() {
        return Err(ClassifierError::MissingConfig(format!(
            "no {} model configured for {}",
            if vision { "vision" } else { "text" },
            spec.name
        )));
    }

    let (url, headers, body) = match spec.id {
        ProviderId::Claude => (
            CLAUDE_MESSAGES_URL.to_string(),
            vec![
                ("x-api-key".to_string(), api_key.to_string()),
                ("anthropic-version".to_string(), CLAUDE_API_VERSION.to_string()),
            ],
            claude_body(model, messages, 10),
        ),
        _ => {
            if spec.base_url.is_empty() {
                return Err(ClassifierError::MissingConfig(format!(
                    "base URL is required for {}",
                    spec.name
                )));
            }
            (
                format!("{}/chat/completions", spec.base_url),
                vec![("Authorization".to_string(), format!("Bearer {api_key}"))],
                openai_body(model, messages, 10),
            )
        }
    };

    let response = transport.post_json(&url, &headers, &body).await?;
    if !response.is_success() {
        return Err(ClassifierError::Http {
            status: response.status,
            body: response.body,
        });
    }

    match spec.id {
        ProviderId::Claude => parse_claude_reply(&response.body),
        _ => parse_openai_reply(&response.body),
    }
}

pub fn moderation_body(input: &str) -> Value {
    json!({ "input": input })
}

/// Free moderation verdict: flagged as sexual, or scores above the
/// configured sexual threshold or the fixed harassment threshold.
pub fn parse_moderation(body: &str, sexual_threshold: f64) -> Result<bool, ClassifierError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;
    let result = &value["results"][0];
    if result.is_null() {
        return Err(ClassifierError::InvalidResponse(
            "moderation response has no results".to_string(),
        ));
    }

    let flagged = result["flagged"].as_bool().unwrap_or(false);
    let categories = &result["categories"];
    let sexual = categories["sexual"].as_bool().unwrap_or(false)
        || categories["sexual/minors"].as_bool().unwrap_or(false)
        || categories["sexual_minors"].as_bool().unwrap_or(false);
    let scores = &result["category_scores"];
    let sexual_score = scores["sexual"].as_f64().unwrap_or(0.0);
    let harassment_score = scores["harassment"].as_f64().unwrap_or(0.0);

    log::debug!(
        "Moderation scores: flagged={flagged} sexual={sexual} sexual_score={sexual_score:.3} harassment_score={harassment_score:.3}"
    );

    Ok((flagged && sexual) || sexual_score > sexual_threshold || harassment_score > 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_provider_uses_user_config() {
        let custom = CustomProviderConfig {
            base_url: "https://llm.local/v1/".to_string(),
            vision_model: "llava".to_string(),
            text_model: "llama3".to_string(),
        };
        let spec = ProviderSpec::resolve(ProviderId::Custom, &custom);
        assert_eq!(spec.base_url, "https://llm.local/v1");
        assert_eq!(spec.model(true), "llava");
        assert!(!spec.supports_moderation);
        assert!(ProviderSpec::resolve(ProviderId::Openai, &custom).supports_moderation);
    }

    #[test]
    fn test_claude_body_splits_system_and_converts_images() {
        let body = claude_body("m", &vision_messages("data:image/png;base64,AAAA"), 10);
        assert_eq!(body["system"].as_str(), Some(IMAGE_RUBRIC));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        let image = &messages[0]["content"][1];
        assert_eq!(image["source"]["type"], "base64");
        assert_eq!(image["source"]["media_type"], "image/png");
        assert_eq!(image["source"]["data"], "AAAA");

        let body = claude_body("m", &vision_messages("https://pbs.twimg.com/media/x.jpg"), 10);
        assert_eq!(body["messages"][0]["content"][1]["source"]["type"], "url");
    }

    #[test]
    fn test_openai_body_shape() {
        let body = openai_body("gpt-4o-mini", &crypto_messages("gm"), 10);
        assert_eq!(body["max_tokens"], 10);
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("\"gm\""));
    }

    #[test]
    fn test_interpret_yes_no() {
        assert!(interpret_yes_no("Yes."));
        assert!(interpret_yes_no("YES"));
        assert!(!interpret_yes_no("No"));
        assert!(!interpret_yes_no(""));
    }

    #[test]
    fn test_parse_moderation() {
        let sexual = r#"{"results":[{"flagged":true,"categories":{"sexual":true},"category_scores":{"sexual":0.2}}]}"#;
        assert!(parse_moderation(sexual, 0.3).unwrap());

        let borderline = r#"{"results":[{"flagged":false,"categories":{},"category_scores":{"sexual":0.35}}]}"#;
        assert!(parse_moderation(borderline, 0.3).unwrap());
        assert!(!parse_moderation(borderline, 0.5).unwrap());

        let violent = r#"{"results":[{"flagged":true,"categories":{"violence":true},"category_scores":{"violence":0.9}}]}"#;
        assert!(!parse_moderation(violent, 0.3).unwrap());

        let harassment = r#"{"results":[{"flagged":true,"categories":{},"category_scores":{"harassment":0.6}}]}"#;
        assert!(parse_moderation(harassment, 0.3).unwrap());

        assert!(parse_moderation(r#"{"results":[]}"#, 0.3).is_err());
        assert!(parse_moderation("not json", 0.3).is_err());
    }
}
