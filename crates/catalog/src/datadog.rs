//! Datadog adapter: timeseries metric queries, read-only and cacheable —
//! same 5-minute TTL contract as the CloudWatch side of `AwsAdapter`.

use serde_json::Value;

use ki_domain::error::ToolErrorKind;
use ki_domain::tool::{ToolCategory, ToolDefinition, ToolOutcome};

use crate::adapter::ToolAdapter;
use crate::cache::TtlCache;

pub struct DatadogAdapter {
    client: reqwest::Client,
    site: String,
    api_key: String,
    app_key: String,
    cache: TtlCache<Value>,
}

impl DatadogAdapter {
    pub fn new(site: String, api_key: String, app_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            client,
            site,
            api_key,
            app_key,
            cache: TtlCache::with_default_ttl(),
        }
    }

    async fn query_timeseries(&self, call_id: &str, args: &Value) -> ToolOutcome {
        let query = match require_str(args, "query", call_id) {
            Ok(v) => v,
            Err(o) => return o,
        };
        let minutes_back = args.get("minutes_back").and_then(|v| v.as_i64()).unwrap_or(15);

        let cache_key = format!("dd:{query}:{minutes_back}");
        if let Some(cached) = self.cache.get(&cache_key) {
            return ToolOutcome::ok(call_id, cached.to_string());
        }

        let now = chrono::Utc::now().timestamp();
        let from = now - minutes_back * 60;

        let url = format!("https://api.{}/api/v1/query", self.site);

        let resp = match self
            .client
            .get(&url)
            .query(&[
                ("from", from.to_string()),
                ("to", now.to_string()),
                ("query", query.to_string()),
            ])
            .header("DD-API-KEY", &self.api_key)
            .header("DD-APPLICATION-KEY", &self.app_key)
            .send()
            .await
        {
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
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Unauthorized,
                "datadog authorization rejected",
            );
        }
        if status.as_u16() == 429 {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Throttled,
                "datadog rate limit exceeded",
            );
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Upstream,
                format!("datadog returned {status}: {body}"),
            );
        }

        match resp.json::<Value>().await {
            Ok(value) => {
                self.cache.put(cache_key, value.clone());
                ToolOutcome::ok(call_id, value.to_string())
            }
            Err(e) => ToolOutcome::error(call_id, ToolErrorKind::Upstream, e.to_string()),
        }
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
impl ToolAdapter for DatadogAdapter {
    fn descriptors(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "dd_query_timeseries".into(),
            description: "Query a Datadog timeseries metric over a recent window.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "minutes_back": { "type": "integer" }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
            category: ToolCategory::Read,
            target_system: "datadog".into(),
        }]
    }

    async fn invoke(&self, call_id: &str, tool_name: &str, arguments: Value) -> ToolOutcome {
        match tool_name {
            "dd_query_timeseries" => self.query_timeseries(call_id, &arguments).await,
            _ => ToolOutcome::error(
                call_id,
                ToolErrorKind::NotFound,
                format!("unknown datadog tool '{tool_name}'"),
            ),
        }
    }
}
