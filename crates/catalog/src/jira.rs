//! Jira adapter: JQL search, issue create/update/comment/transition. Used
//! both as a plain tool (subagents may query tickets directly) and by the
//! Ticket Correlation Engine, which calls `search_issues`/`create_issue`/
//! `add_comment` directly through the catalog rather than via the LLM.

use base64::Engine;
use serde_json::Value;

use ki_domain::error::ToolErrorKind;
use ki_domain::tool::{ToolCategory, ToolDefinition, ToolOutcome};

use crate::adapter::ToolAdapter;

pub struct JiraAdapter {
    client: reqwest::Client,
    base_url: String,
    project_key: String,
    auth_header: String,
}

impl JiraAdapter {
    pub fn new(base_url: String, project_key: String, email: String, api_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{email}:{api_token}"));
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_key,
            auth_header: format!("Basic {basic}"),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
    }

    async fn request(
        &self,
        call_id: &str,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ToolOutcome> {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        builder = self.authed(builder);
        if let Some(b) = body {
            builder = builder.json(&b);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ToolOutcome::error(call_id, classify_reqwest(&e), e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(ToolOutcome::error(call_id, ToolErrorKind::NotFound, "issue not found"));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ToolOutcome::error(
                call_id,
                ToolErrorKind::Unauthorized,
                "jira authorization rejected",
            ));
        }
        if status.as_u16() == 429 {
            return Err(ToolOutcome::error(
                call_id,
                ToolErrorKind::Throttled,
                "jira rate limit exceeded",
            ));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolOutcome::error(
                call_id,
                ToolErrorKind::Upstream,
                format!("jira returned {status}: {text}"),
            ));
        }
        if status.as_u16() == 204 {
            return Ok(Value::Null);
        }
        resp.json::<Value>()
            .await
            .or_else(|_| Ok(Value::Null))
    }
}

fn classify_reqwest(e: &reqwest::Error) -> ToolErrorKind {
    if e.is_timeout() {
        ToolErrorKind::Timeout
    } else {
        ToolErrorKind::Upstream
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
impl ToolAdapter for JiraAdapter {
    fn descriptors(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "search_issues".into(),
                description: "Search tickets via JQL, scoped to the configured project.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "jql": { "type": "string" } },
                    "required": ["jql"],
                    "additionalProperties": false
                }),
                category: ToolCategory::Read,
                target_system: "jira".into(),
            },
            ToolDefinition {
                name: "get_issue".into(),
                description: "Fetch a single ticket by key.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "key": { "type": "string" } },
                    "required": ["key"],
                    "additionalProperties": false
                }),
                category: ToolCategory::Read,
                target_system: "jira".into(),
            },
            ToolDefinition {
                name: "create_issue".into(),
                description: "File a new ticket in the configured project.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "summary": { "type": "string" },
                        "description": { "type": "string" },
                        "issue_type": { "type": "string" },
                        "priority": { "type": "string", "enum": ["Highest", "High", "Medium", "Low"] }
                    },
                    "required": ["summary", "description"],
                    "additionalProperties": false
                }),
                category: ToolCategory::Write,
                target_system: "jira".into(),
            },
            ToolDefinition {
                name: "add_comment".into(),
                description: "Comment on an existing ticket.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "key": { "type": "string" },
                        "body": { "type": "string" }
                    },
                    "required": ["key", "body"],
                    "additionalProperties": false
                }),
                category: ToolCategory::Write,
                target_system: "jira".into(),
            },
            ToolDefinition {
                name: "transition_issue".into(),
                description: "Move a ticket to a new workflow status.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "key": { "type": "string" },
                        "transition_id": { "type": "string" }
                    },
                    "required": ["key", "transition_id"],
                    "additionalProperties": false
                }),
                category: ToolCategory::Write,
                target_system: "jira".into(),
            },
        ]
    }

    async fn invoke(&self, call_id: &str, tool_name: &str, arguments: Value) -> ToolOutcome {
        let result = match tool_name {
            "search_issues" => {
                let jql = match require_str(&arguments, "jql", call_id) {
                    Ok(j) => j.to_string(),
                    Err(outcome) => return outcome,
                };
                self.request(
                    call_id,
                    reqwest::Method::POST,
                    "/rest/api/3/search",
                    Some(serde_json::json!({ "jql": jql, "maxResults": 50 })),
                )
                .await
            }
            "get_issue" => {
                let key = match require_str(&arguments, "key", call_id) {
                    Ok(k) => k.to_string(),
                    Err(outcome) => return outcome,
                };
                self.request(
                    call_id,
                    reqwest::Method::GET,
                    &format!("/rest/api/3/issue/{key}"),
                    None,
                )
                .await
            }
            "create_issue" => {
                let summary = match require_str(&arguments, "summary", call_id) {
                    Ok(s) => s.to_string(),
                    Err(outcome) => return outcome,
                };
                let description = match require_str(&arguments, "description", call_id) {
                    Ok(d) => d.to_string(),
                    Err(outcome) => return outcome,
                };
                let issue_type = arguments
                    .get("issue_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Task");
                let mut fields = serde_json::json!({
                    "project": { "key": self.project_key },
                    "summary": summary,
                    "description": {
                        "type": "doc",
                        "version": 1,
                        "content": [{
                            "type": "paragraph",
                            "content": [{ "type": "text", "text": description }]
                        }]
                    },
                    "issuetype": { "name": issue_type }
                });
                if let Some(priority) = arguments.get("priority").and_then(|v| v.as_str()) {
                    fields["priority"] = serde_json::json!({ "name": priority });
                }
                let body = serde_json::json!({ "fields": fields });
                self.request(call_id, reqwest::Method::POST, "/rest/api/3/issue", Some(body))
                    .await
            }
            "add_comment" => {
                let key = match require_str(&arguments, "key", call_id) {
                    Ok(k) => k.to_string(),
                    Err(outcome) => return outcome,
                };
                let text = match require_str(&arguments, "body", call_id) {
                    Ok(b) => b.to_string(),
                    Err(outcome) => return outcome,
                };
                let body = serde_json::json!({
                    "body": {
                        "type": "doc",
                        "version": 1,
                        "content": [{
                            "type": "paragraph",
                            "content": [{ "type": "text", "text": text }]
                        }]
                    }
                });
                self.request(
                    call_id,
                    reqwest::Method::POST,
                    &format!("/rest/api/3/issue/{key}/comment"),
                    Some(body),
                )
                .await
            }
            "transition_issue" => {
                let key = match require_str(&arguments, "key", call_id) {
                    Ok(k) => k.to_string(),
                    Err(outcome) => return outcome,
                };
                let transition_id = match require_str(&arguments, "transition_id", call_id) {
                    Ok(t) => t.to_string(),
                    Err(outcome) => return outcome,
                };
                self.request(
                    call_id,
                    reqwest::Method::POST,
                    &format!("/rest/api/3/issue/{key}/transitions"),
                    Some(serde_json::json!({ "transition": { "id": transition_id } })),
                )
                .await
            }
            _ => {
                return ToolOutcome::error(
                    call_id,
                    ToolErrorKind::NotFound,
                    format!("unknown jira tool '{tool_name}'"),
                )
            }
        };

        match result {
            Ok(value) => ToolOutcome::ok(call_id, value.to_string()),
            Err(outcome) => outcome,
        }
    }
}
