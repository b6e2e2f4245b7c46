//! Microsoft Teams adapter: fires a notification card at an incoming
//! webhook URL. Write-only, fire-and-forget — there is nothing to read
//! back from a webhook post, so this adapter exposes exactly one tool.

use serde_json::Value;

use ki_domain::error::ToolErrorKind;
use ki_domain::tool::{ToolCategory, ToolDefinition, ToolOutcome};

use crate::adapter::ToolAdapter;

pub struct TeamsAdapter {
    client: reqwest::Client,
    webhook_url: String,
}

impl TeamsAdapter {
    pub fn new(webhook_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self { client, webhook_url }
    }

    async fn post_notification(&self, call_id: &str, args: &Value) -> ToolOutcome {
        let title = match require_str(args, "title", call_id) {
            Ok(v) => v,
            Err(o) => return o,
        };
        let text = match require_str(args, "text", call_id) {
            Ok(v) => v,
            Err(o) => return o,
        };

        let card = serde_json::json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": args.get("theme_color").and_then(|v| v.as_str()).unwrap_or("E81123"),
            "title": title,
            "text": text,
        });

        let resp = match self.client.post(&self.webhook_url).json(&card).send().await {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_timeout() {
                    ToolErrorKind::Timeout
                } else {
                    ToolErrorKind::Upstream
                };
                return ToolOutcome::error(call_id, kind, e.to_string());
            }
        };

        let status = resp.status();
        if status.as_u16() == 429 {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Throttled,
                "teams webhook rate limit exceeded",
            );
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Upstream,
                format!("teams webhook returned {status}: {body}"),
            );
        }

        ToolOutcome::ok(call_id, "notification sent")
    }
}

fn require_str<'a>(args: &'a Value, key: &str, call_id: &str) -> Result<&'a str, ToolOutcome> {
    args.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        ToolOutcome::error(
            call_id,
            ToolErrorKind::Validation,
            format!("missing required argument: {key}"),
        )
    })
}

#[async_trait::async_trait]
impl ToolAdapter for TeamsAdapter {
    fn descriptors(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "post_notification".into(),
            description: "Post a notification card to the configured Teams channel webhook."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "text": { "type": "string" },
                    "theme_color": { "type": "string" }
                },
                "required": ["title", "text"],
                "additionalProperties": false
            }),
            category: ToolCategory::Write,
            target_system: "teams".into(),
        }]
    }

    async fn invoke(&self, call_id: &str, tool_name: &str, arguments: Value) -> ToolOutcome {
        match tool_name {
            "post_notification" => self.post_notification(call_id, &arguments).await,
            _ => ToolOutcome::error(
                call_id,
                ToolErrorKind::NotFound,
                format!("unknown teams tool '{tool_name}'"),
            ),
        }
    }
}
