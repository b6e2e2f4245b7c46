//! AWS adapter: CloudWatch metric queries and EC2/VPC topology lookups,
//! both read-only. Backed by the official `aws-sdk-*` crates rather than a
//! hand-rolled REST client — this stack already pulls them in for exactly
//! this purpose.

use serde_json::Value;

use ki_domain::error::ToolErrorKind;
use ki_domain::tool::{ToolCategory, ToolDefinition, ToolOutcome};

use crate::adapter::ToolAdapter;
use crate::cache::TtlCache;

pub struct AwsAdapter {
    cloudwatch: aws_sdk_cloudwatch::Client,
    ec2: aws_sdk_ec2::Client,
    cache: TtlCache<Value>,
}

impl AwsAdapter {
    pub async fn new() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            cloudwatch: aws_sdk_cloudwatch::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
            cache: TtlCache::with_default_ttl(),
        }
    }

    async fn cw_get_metric(&self, call_id: &str, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(v) => v,
            Err(o) => return o,
        };
        let metric_name = match require_str(args, "metric_name", call_id) {
            Ok(v) => v,
            Err(o) => return o,
        };
        let period = args.get("period_seconds").and_then(|v| v.as_i64()).unwrap_or(300) as i32;
        let minutes_back = args.get("minutes_back").and_then(|v| v.as_i64()).unwrap_or(15);

        let cache_key = format!("cw:{namespace}:{metric_name}:{period}:{minutes_back}");
        if let Some(cached) = self.cache.get(&cache_key) {
            return ToolOutcome::ok(call_id, cached.to_string());
        }

        let end = chrono::Utc::now();
        let start = end - chrono::Duration::minutes(minutes_back);

        let mut req = self
            .cloudwatch
            .get_metric_statistics()
            .namespace(namespace)
            .metric_name(metric_name)
            .start_time(aws_sdk_cloudwatch::primitives::DateTime::from_millis(
                start.timestamp_millis(),
            ))
            .end_time(aws_sdk_cloudwatch::primitives::DateTime::from_millis(
                end.timestamp_millis(),
            ))
            .period(period)
            .statistics(aws_sdk_cloudwatch::types::Statistic::Average)
            .statistics(aws_sdk_cloudwatch::types::Statistic::Maximum);

        if let Some(dims) = args.get("dimensions").and_then(|v| v.as_object()) {
            for (k, v) in dims {
                if let Some(vs) = v.as_str() {
                    req = req.dimensions(
                        aws_sdk_cloudwatch::types::Dimension::builder()
                            .name(k)
                            .value(vs)
                            .build(),
                    );
                }
            }
        }

        match req.send().await {
            Ok(resp) => {
                let points: Vec<Value> = resp
                    .datapoints()
                    .iter()
                    .map(|dp| {
                        serde_json::json!({
                            "timestamp": dp.timestamp().map(|t| t.as_secs_f64()),
                            "average": dp.average(),
                            "maximum": dp.maximum(),
                            "unit": dp.unit().map(|u| u.as_str().to_string()),
                        })
                    })
                    .collect();
                let result = serde_json::json!({ "datapoints": points });
                self.cache.put(cache_key, result.clone());
                ToolOutcome::ok(call_id, result.to_string())
            }
            Err(e) => {
                let message = e.to_string();
                ToolOutcome::error(call_id, classify_sdk_error(&message), message)
            }
        }
    }

    async fn ec2_describe_nat_gateways(&self, call_id: &str, args: &Value) -> ToolOutcome {
        let cache_key = format!(
            "nat:{}",
            args.get("vpc_id").and_then(|v| v.as_str()).unwrap_or("")
        );
        if let Some(cached) = self.cache.get(&cache_key) {
            return ToolOutcome::ok(call_id, cached.to_string());
        }

        let mut req = self.ec2.describe_nat_gateways();
        if let Some(vpc_id) = args.get("vpc_id").and_then(|v| v.as_str()) {
            req = req.filter(
                aws_sdk_ec2::types::Filter::builder()
                    .name("vpc-id")
                    .values(vpc_id)
                    .build(),
            );
        }

        match req.send().await {
            Ok(resp) => {
                let gateways: Vec<Value> = resp
                    .nat_gateways()
                    .iter()
                    .map(|gw| {
                        serde_json::json!({
                            "nat_gateway_id": gw.nat_gateway_id(),
                            "state": gw.state().map(|s| s.as_str().to_string()),
                            "vpc_id": gw.vpc_id(),
                            "subnet_id": gw.subnet_id(),
                        })
                    })
                    .collect();
                let result = serde_json::json!({ "nat_gateways": gateways });
                self.cache.put(cache_key, result.clone());
                ToolOutcome::ok(call_id, result.to_string())
            }
            Err(e) => {
                let message = e.to_string();
                ToolOutcome::error(call_id, classify_sdk_error(&message), message)
            }
        }
    }

    async fn ec2_describe_vpcs(&self, call_id: &str, _args: &Value) -> ToolOutcome {
        match self.ec2.describe_vpcs().send().await {
            Ok(resp) => {
                let vpcs: Vec<Value> = resp
                    .vpcs()
                    .iter()
                    .map(|v| {
                        serde_json::json!({
                            "vpc_id": v.vpc_id(),
                            "cidr_block": v.cidr_block(),
                            "state": v.state().map(|s| s.as_str().to_string()),
                        })
                    })
                    .collect();
                ToolOutcome::ok(call_id, serde_json::json!({ "vpcs": vpcs }).to_string())
            }
            Err(e) => {
                let message = e.to_string();
                ToolOutcome::error(call_id, classify_sdk_error(&message), message)
            }
        }
    }
}

/// AWS SDK errors are a different generated type per operation, so rather
/// than fight the generics, classify off the rendered message — every
/// generated error's `Display` surfaces the AWS error code (`Throttling`,
/// `AccessDenied`, `ResourceNotFoundException`, ...).
fn classify_sdk_error(message: &str) -> ToolErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        ToolErrorKind::Timeout
    } else if lower.contains("throttl") || lower.contains("rate exceeded") {
        ToolErrorKind::Throttled
    } else if lower.contains("accessdenied")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        ToolErrorKind::Unauthorized
    } else if lower.contains("notfound") || lower.contains("does not exist") {
        ToolErrorKind::NotFound
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
impl ToolAdapter for AwsAdapter {
    fn descriptors(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "cw_get_metric".into(),
                description: "Query a CloudWatch metric's average/maximum over a recent window."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "namespace": { "type": "string" },
                        "metric_name": { "type": "string" },
                        "dimensions": { "type": "object" },
                        "period_seconds": { "type": "integer" },
                        "minutes_back": { "type": "integer" }
                    },
                    "required": ["namespace", "metric_name"],
                    "additionalProperties": false
                }),
                category: ToolCategory::Read,
                target_system: "aws".into(),
            },
            ToolDefinition {
                name: "ec2_describe_nat_gateways".into(),
                description: "List NAT gateways, optionally filtered by VPC.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "vpc_id": { "type": "string" } },
                    "additionalProperties": false
                }),
                category: ToolCategory::Read,
                target_system: "aws".into(),
            },
            ToolDefinition {
                name: "ec2_describe_vpcs".into(),
                description: "List VPCs in the configured account/region.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false
                }),
                category: ToolCategory::Read,
                target_system: "aws".into(),
            },
        ]
    }

    async fn invoke(&self, call_id: &str, tool_name: &str, arguments: Value) -> ToolOutcome {
        match tool_name {
            "cw_get_metric" => self.cw_get_metric(call_id, &arguments).await,
            "ec2_describe_nat_gateways" => self.ec2_describe_nat_gateways(call_id, &arguments).await,
            "ec2_describe_vpcs" => self.ec2_describe_vpcs(call_id, &arguments).await,
            _ => ToolOutcome::error(
                call_id,
                ToolErrorKind::NotFound,
                format!("unknown aws tool '{tool_name}'"),
            ),
        }
    }
}
