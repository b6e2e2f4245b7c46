//! GitHub adapter: PR/issue lookups (read) and issue comment/creation
//! (write). Speaks the plain REST API directly, the same way the teacher's
//! `OpenAiCompatProvider` speaks a JSON-over-HTTPS contract with a bearer
//! token — there is no official GitHub Rust SDK in this stack, so this
//! adapter is a small `reqwest::Client` wrapper rather than an SDK binding.

use serde_json::Value;

use ki_domain::error::ToolErrorKind;
use ki_domain::tool::{ToolCategory, ToolDefinition, ToolOutcome};

use crate::adapter::ToolAdapter;

const API_BASE: &str = "https://api.github.com";

pub struct GithubAdapter {
    client: reqwest::Client,
    token: String,
    default_owner: String,
    default_repo: String,
}

impl GithubAdapter {
    pub fn new(token: String, default_owner: String, default_repo: String) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("ki-gateway")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            client,
            token,
            default_owner,
            default_repo,
        }
    }

    fn owner_repo(&self, args: &Value) -> (String, String) {
        let owner = args
            .get("owner")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_owner.clone());
        let repo = args
            .get("repo")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_repo.clone());
        (owner, repo)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get(&self, call_id: &str, path: &str) -> Result<Value, ToolOutcome> {
        let resp = self
            .authed(self.client.get(format!("{API_BASE}{path}")))
            .send()
            .await
            .map_err(|e| ToolOutcome::error(call_id, classify_reqwest(&e), e.to_string()))?;

        handle_response(call_id, resp).await
    }

    async fn post(&self, call_id: &str, path: &str, body: Value) -> Result<Value, ToolOutcome> {
        let resp = self
            .authed(self.client.post(format!("{API_BASE}{path}")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolOutcome::error(call_id, classify_reqwest(&e), e.to_string()))?;

        handle_response(call_id, resp).await
    }
}

fn classify_reqwest(e: &reqwest::Error) -> ToolErrorKind {
    if e.is_timeout() {
        ToolErrorKind::Timeout
    } else {
        ToolErrorKind::Upstream
    }
}

async fn handle_response(call_id: &str, resp: reqwest::Response) -> Result<Value, ToolOutcome> {
    let status = resp.status();
    if status.as_u16() == 404 {
        return Err(ToolOutcome::error(call_id, ToolErrorKind::NotFound, "not found"));
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ToolOutcome::error(
            call_id,
            ToolErrorKind::Unauthorized,
            "github authorization rejected",
        ));
    }
    if status.as_u16() == 429 {
        return Err(ToolOutcome::error(
            call_id,
            ToolErrorKind::Throttled,
            "github rate limit exceeded",
        ));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ToolOutcome::error(
            call_id,
            ToolErrorKind::Upstream,
            format!("github returned {status}: {body}"),
        ));
    }
    resp.json::<Value>()
        .await
        .map_err(|e| ToolOutcome::error(call_id, ToolErrorKind::Upstream, e.to_string()))
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
impl ToolAdapter for GithubAdapter {
    fn descriptors(&self) -> Vec<ToolDefinition> {
        let owner_repo_schema = |extra: Value| {
            let mut props = serde_json::json!({
                "owner": { "type": "string" },
                "repo": { "type": "string" },
            });
            if let Value::Object(extra_props) = extra {
                props.as_object_mut().unwrap().extend(extra_props);
            }
            serde_json::json!({
                "type": "object",
                "properties": props,
                "additionalProperties": false
            })
        };

        vec![
            ToolDefinition {
                name: "list_prs".into(),
                description: "List open pull requests in a repository.".into(),
                parameters: owner_repo_schema(serde_json::json!({
                    "state": { "type": "string" }
                })),
                category: ToolCategory::Read,
                target_system: "github".into(),
            },
            ToolDefinition {
                name: "list_issues".into(),
                description: "List issues in a repository, optionally filtered by label."
                    .into(),
                parameters: owner_repo_schema(serde_json::json!({
                    "labels": { "type": "string" },
                    "state": { "type": "string" }
                })),
                category: ToolCategory::Read,
                target_system: "github".into(),
            },
            ToolDefinition {
                name: "search_code".into(),
                description: "Search code across a repository for a query string.".into(),
                parameters: owner_repo_schema(serde_json::json!({
                    "query": { "type": "string" }
                })),
                category: ToolCategory::Read,
                target_system: "github".into(),
            },
            ToolDefinition {
                name: "get_file".into(),
                description: "Fetch the contents of a file at a path/ref.".into(),
                parameters: owner_repo_schema(serde_json::json!({
                    "path": { "type": "string" },
                    "ref": { "type": "string" }
                })),
                category: ToolCategory::Read,
                target_system: "github".into(),
            },
            ToolDefinition {
                name: "github_create_issue".into(),
                description: "File a new issue.".into(),
                parameters: owner_repo_schema(serde_json::json!({
                    "title": { "type": "string" },
                    "body": { "type": "string" },
                    "labels": { "type": "array", "items": { "type": "string" } }
                })),
                category: ToolCategory::Write,
                target_system: "github".into(),
            },
            ToolDefinition {
                name: "add_issue_comment".into(),
                description: "Comment on an existing issue or pull request.".into(),
                parameters: owner_repo_schema(serde_json::json!({
                    "issue_number": { "type": "integer" },
                    "body": { "type": "string" }
                })),
                category: ToolCategory::Write,
                target_system: "github".into(),
            },
        ]
    }

    async fn invoke(&self, call_id: &str, tool_name: &str, arguments: Value) -> ToolOutcome {
        let (owner, repo) = self.owner_repo(&arguments);

        let result = match tool_name {
            "list_prs" => {
                let state = arguments
                    .get("state")
                    .and_then(|v| v.as_str())
                    .unwrap_or("open");
                self.get(call_id, &format!("/repos/{owner}/{repo}/pulls?state={state}"))
                    .await
            }
            "list_issues" => {
                let state = arguments
                    .get("state")
                    .and_then(|v| v.as_str())
                    .unwrap_or("open");
                let mut path = format!("/repos/{owner}/{repo}/issues?state={state}");
                if let Some(labels) = arguments.get("labels").and_then(|v| v.as_str()) {
                    path.push_str(&format!("&labels={labels}"));
                }
                self.get(call_id, &path).await
            }
            "search_code" => {
                let query = match require_str(&arguments, "query", call_id) {
                    Ok(q) => q,
                    Err(outcome) => return outcome,
                };
                let q = format!("{query}+repo:{owner}/{repo}");
                self.get(call_id, &format!("/search/code?q={q}")).await
            }
            "get_file" => {
                let path = match require_str(&arguments, "path", call_id) {
                    Ok(p) => p,
                    Err(outcome) => return outcome,
                };
                let mut url = format!("/repos/{owner}/{repo}/contents/{path}");
                if let Some(r) = arguments.get("ref").and_then(|v| v.as_str()) {
                    url.push_str(&format!("?ref={r}"));
                }
                self.get(call_id, &url).await
            }
            "github_create_issue" => {
                let title = match require_str(&arguments, "title", call_id) {
                    Ok(t) => t,
                    Err(outcome) => return outcome,
                };
                let mut body = serde_json::json!({ "title": title });
                if let Some(b) = arguments.get("body") {
                    body["body"] = b.clone();
                }
                if let Some(labels) = arguments.get("labels") {
                    body["labels"] = labels.clone();
                }
                self.post(call_id, &format!("/repos/{owner}/{repo}/issues"), body)
                    .await
            }
            "add_issue_comment" => {
                let issue_number = match arguments.get("issue_number").and_then(|v| v.as_i64()) {
                    Some(n) => n,
                    None => {
                        return ToolOutcome::error(
                            call_id,
                            ToolErrorKind::Validation,
                            "missing required argument: issue_number",
                        )
                    }
                };
                let body = match require_str(&arguments, "body", call_id) {
                    Ok(b) => b,
                    Err(outcome) => return outcome,
                };
                self.post(
                    call_id,
                    &format!("/repos/{owner}/{repo}/issues/{issue_number}/comments"),
                    serde_json::json!({ "body": body }),
                )
                .await
            }
            _ => {
                return ToolOutcome::error(
                    call_id,
                    ToolErrorKind::NotFound,
                    format!("unknown github tool '{tool_name}'"),
                )
            }
        };

        match result {
            Ok(value) => ToolOutcome::ok(call_id, value.to_string()),
            Err(outcome) => outcome,
        }
    }
}
