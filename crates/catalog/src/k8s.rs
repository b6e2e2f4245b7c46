//! Kubernetes adapter: read tools (`list_pods`, `get_pod`, `get_events`,
//! `get_logs`, `top_pods`, `list_nodes`) and destructive tools
//! (`rollout_restart`, `scale_deployment`, `delete_pod`, `apply_manifest`).
//!
//! One `kube::Client` per allow-listed cluster, constructed lazily and
//! cached — clusters outside the allow-list never get a client at all.

use std::collections::HashMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams};
use kube::discovery::Discovery;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::Client;
use parking_lot::RwLock;
use serde_json::Value;

use ki_domain::error::ToolErrorKind;
use ki_domain::tool::{ToolCategory, ToolDefinition, ToolOutcome};

use crate::adapter::ToolAdapter;

/// Hard cap on rows/lines returned per list/log call, per §4.1's
/// result-truncation contract.
const MAX_LIST_ITEMS: usize = 200;
const MAX_LOG_LINES: usize = 500;

pub struct K8sAdapter {
    allow_list: Vec<String>,
    clients: RwLock<HashMap<String, Client>>,
}

impl K8sAdapter {
    pub fn new(allow_list: Vec<String>) -> Self {
        Self {
            allow_list,
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn is_allowed(&self, cluster: &str) -> bool {
        self.allow_list.iter().any(|c| c == cluster)
    }

    /// Resolve (and cache) a client for `cluster`. Each distinct kubeconfig
    /// context is connected to at most once per process lifetime.
    async fn client_for(&self, cluster: &str) -> Result<Client, String> {
        if let Some(client) = self.clients.read().get(cluster).cloned() {
            return Ok(client);
        }

        let config = kube::Config::from_kubeconfig(&kube::config::KubeConfigOptions {
            context: Some(cluster.to_string()),
            ..Default::default()
        })
        .await
        .map_err(|e| format!("loading kubeconfig context '{cluster}': {e}"))?;

        let client = Client::try_from(config)
            .map_err(|e| format!("building client for cluster '{cluster}': {e}"))?;

        self.clients
            .write()
            .insert(cluster.to_string(), client.clone());
        Ok(client)
    }

    fn reject_unlisted(&self, cluster: &str, call_id: &str) -> Option<ToolOutcome> {
        if self.is_allowed(cluster) {
            None
        } else {
            Some(ToolOutcome::error(
                call_id,
                ToolErrorKind::Unauthorized,
                format!("cluster '{cluster}' is not in the allow-list"),
            ))
        }
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn require_str<'a>(args: &'a Value, key: &str, call_id: &str) -> Result<&'a str, ToolOutcome> {
    arg_str(args, key).ok_or_else(|| {
        ToolOutcome::error(
            call_id,
            ToolErrorKind::Validation,
            format!("missing required argument: {key}"),
        )
    })
}

#[async_trait::async_trait]
impl ToolAdapter for K8sAdapter {
    fn descriptors(&self) -> Vec<ToolDefinition> {
        let cluster_namespace_schema = |extra: Value| {
            let mut props = serde_json::json!({
                "cluster": { "type": "string" },
                "namespace": { "type": "string" },
            });
            if let Value::Object(extra_props) = extra {
                props.as_object_mut().unwrap().extend(extra_props);
            }
            serde_json::json!({
                "type": "object",
                "properties": props,
                "required": ["cluster", "namespace"],
                "additionalProperties": false
            })
        };

        vec![
            ToolDefinition {
                name: "list_pods".into(),
                description: "List pods in a namespace, optionally filtered by label selector."
                    .into(),
                parameters: cluster_namespace_schema(serde_json::json!({
                    "label_selector": { "type": "string" }
                })),
                category: ToolCategory::Read,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "get_pod".into(),
                description: "Get full status of a single pod.".into(),
                parameters: cluster_namespace_schema(serde_json::json!({
                    "name": { "type": "string" }
                })),
                category: ToolCategory::Read,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "get_events".into(),
                description: "List recent events in a namespace.".into(),
                parameters: cluster_namespace_schema(Value::Null),
                category: ToolCategory::Read,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "get_logs".into(),
                description: "Get recent log lines for a pod container.".into(),
                parameters: cluster_namespace_schema(serde_json::json!({
                    "name": { "type": "string" },
                    "container": { "type": "string" },
                    "tail_lines": { "type": "integer" },
                    "previous": { "type": "boolean" }
                })),
                category: ToolCategory::Read,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "top_pods".into(),
                description: "Get CPU/memory usage for pods in a namespace via metrics.k8s.io."
                    .into(),
                parameters: cluster_namespace_schema(Value::Null),
                category: ToolCategory::Read,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "list_nodes".into(),
                description: "List cluster nodes and their conditions/allocatable resources."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "cluster": { "type": "string" } },
                    "required": ["cluster"],
                    "additionalProperties": false
                }),
                category: ToolCategory::Read,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "rollout_restart".into(),
                description: "Restart a deployment's pods by patching its restart annotation."
                    .into(),
                parameters: cluster_namespace_schema(serde_json::json!({
                    "deployment": { "type": "string" }
                })),
                category: ToolCategory::Destructive,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "scale_deployment".into(),
                description: "Change a deployment's replica count.".into(),
                parameters: cluster_namespace_schema(serde_json::json!({
                    "deployment": { "type": "string" },
                    "replicas": { "type": "integer" }
                })),
                category: ToolCategory::Destructive,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "delete_pod".into(),
                description: "Delete a single pod (it will be recreated if owned by a controller)."
                    .into(),
                parameters: cluster_namespace_schema(serde_json::json!({
                    "name": { "type": "string" }
                })),
                category: ToolCategory::Destructive,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "apply_manifest".into(),
                description: "Server-side apply a single JSON/YAML-as-JSON manifest.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "cluster": { "type": "string" },
                        "manifest": { "type": "object" }
                    },
                    "required": ["cluster", "manifest"],
                    "additionalProperties": false
                }),
                category: ToolCategory::Destructive,
                target_system: "kubernetes".into(),
            },
        ]
    }

    async fn invoke(&self, call_id: &str, tool_name: &str, arguments: Value) -> ToolOutcome {
        let cluster = match require_str(&arguments, "cluster", call_id) {
            Ok(c) => c.to_string(),
            Err(outcome) => return outcome,
        };

        if let Some(denied) = self.reject_unlisted(&cluster, call_id) {
            return denied;
        }

        let client = match self.client_for(&cluster).await {
            Ok(c) => c,
            Err(e) => return ToolOutcome::error(call_id, ToolErrorKind::Upstream, e),
        };

        match tool_name {
            "list_pods" => self.list_pods(call_id, client, &arguments).await,
            "get_pod" => self.get_pod(call_id, client, &arguments).await,
            "get_events" => self.get_events(call_id, client, &arguments).await,
            "get_logs" => self.get_logs(call_id, client, &arguments).await,
            "top_pods" => self.top_pods(call_id, client, &arguments).await,
            "list_nodes" => self.list_nodes(call_id, client).await,
            "rollout_restart" => self.rollout_restart(call_id, client, &arguments).await,
            "scale_deployment" => self.scale_deployment(call_id, client, &arguments).await,
            "delete_pod" => self.delete_pod(call_id, client, &arguments).await,
            "apply_manifest" => self.apply_manifest(call_id, client, &arguments).await,
            _ => ToolOutcome::error(
                call_id,
                ToolErrorKind::NotFound,
                format!("unknown kubernetes tool '{tool_name}'"),
            ),
        }
    }

    /// Reads the target deployment's current `spec.replicas` for the Safety
    /// Hook Chain's replica-floor and scale-delta rules. A no-op for any call
    /// missing `cluster`/`namespace`/`deployment` (e.g. `list_pods`), or
    /// whose cluster isn't allow-listed, or whose deployment can't be read.
    async fn current_replicas(&self, arguments: &Value) -> Option<i64> {
        let cluster = arg_str(arguments, "cluster")?;
        if !self.is_allowed(cluster) {
            return None;
        }
        let namespace = arg_str(arguments, "namespace")?;
        let deployment = arg_str(arguments, "deployment")?;

        let client = self.client_for(cluster).await.ok()?;
        let api: Api<Deployment> = Api::namespaced(client, namespace);
        let dep = api.get(deployment).await.ok()?;
        dep.spec.and_then(|s| s.replicas).map(i64::from)
    }
}

impl K8sAdapter {
    async fn list_pods(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let api: Api<Pod> = Api::namespaced(client, namespace);
        let mut lp = ListParams::default();
        if let Some(sel) = arg_str(args, "label_selector") {
            lp = lp.labels(sel);
        }

        match api.list(&lp).await {
            Ok(list) => {
                let total = list.items.len();
                let truncated = total > MAX_LIST_ITEMS;
                let names: Vec<_> = list
                    .items
                    .iter()
                    .take(MAX_LIST_ITEMS)
                    .map(|p| {
                        serde_json::json!({
                            "name": p.metadata.name,
                            "phase": p.status.as_ref().and_then(|s| s.phase.clone()),
                            "restart_count": p.status.as_ref()
                                .and_then(|s| s.container_statuses.as_ref())
                                .map(|cs| cs.iter().map(|c| c.restart_count).sum::<i32>()),
                        })
                    })
                    .collect();
                ok_json(
                    call_id,
                    serde_json::json!({
                        "pods": names,
                        "count": total.min(MAX_LIST_ITEMS),
                        "truncated": truncated,
                        "truncation_reason": if truncated { Some("result exceeded pod list cap, narrow the label selector") } else { None },
                    }),
                )
            }
            Err(e) => upstream_err(call_id, e),
        }
    }

    async fn get_pod(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let name = match require_str(args, "name", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let api: Api<Pod> = Api::namespaced(client, namespace);
        match api.get(name).await {
            Ok(pod) => ok_json(call_id, serde_json::to_value(&pod).unwrap_or_default()),
            Err(e) => upstream_err(call_id, e),
        }
    }

    async fn get_events(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let api: Api<Event> = Api::namespaced(client, namespace);
        match api.list(&ListParams::default()).await {
            Ok(list) => {
                let total = list.items.len();
                let truncated = total > MAX_LIST_ITEMS;
                let events: Vec<_> = list
                    .items
                    .iter()
                    .take(MAX_LIST_ITEMS)
                    .map(|e| {
                        serde_json::json!({
                            "reason": e.reason,
                            "message": e.message,
                            "involved_object": e.involved_object.name,
                            "type": e.type_,
                            "count": e.count,
                        })
                    })
                    .collect();
                ok_json(
                    call_id,
                    serde_json::json!({ "events": events, "truncated": truncated }),
                )
            }
            Err(e) => upstream_err(call_id, e),
        }
    }

    async fn get_logs(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let name = match require_str(args, "name", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let tail_lines = args
            .get("tail_lines")
            .and_then(|v| v.as_i64())
            .unwrap_or(MAX_LOG_LINES as i64)
            .min(MAX_LOG_LINES as i64);

        let api: Api<Pod> = Api::namespaced(client, namespace);
        let lp = LogParams {
            container: arg_str(args, "container").map(String::from),
            tail_lines: Some(tail_lines),
            previous: args
                .get("previous")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            ..Default::default()
        };

        match api.logs(name, &lp).await {
            Ok(logs) => {
                let line_count = logs.lines().count();
                let truncated = line_count as i64 >= tail_lines;
                ok_json(
                    call_id,
                    serde_json::json!({ "logs": logs, "truncated": truncated }),
                )
            }
            Err(e) => upstream_err(call_id, e),
        }
    }

    /// Queries `metrics.k8s.io/v1beta1` PodMetrics via the dynamic API since
    /// that API group isn't in `k8s-openapi`'s typed set.
    async fn top_pods(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };

        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let discovery = match Discovery::new(client.clone()).run().await {
            Ok(d) => d,
            Err(e) => return ToolOutcome::error(call_id, ToolErrorKind::Upstream, e.to_string()),
        };
        let Some((ar, _)) = discovery.resolve_gvk(&gvk) else {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Upstream,
                "metrics-server not installed on this cluster (metrics.k8s.io unavailable)",
            );
        };

        let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, &ar);
        match api.list(&ListParams::default()).await {
            Ok(list) => ok_json(
                call_id,
                serde_json::json!({ "pod_metrics": list.items, "truncated": false }),
            ),
            Err(e) => upstream_err(call_id, e),
        }
    }

    async fn list_nodes(&self, call_id: &str, client: Client) -> ToolOutcome {
        let api: Api<Node> = Api::all(client);
        match api.list(&ListParams::default()).await {
            Ok(list) => {
                let nodes: Vec<_> = list
                    .items
                    .iter()
                    .map(|n| {
                        serde_json::json!({
                            "name": n.metadata.name,
                            "conditions": n.status.as_ref().and_then(|s| s.conditions.clone()),
                            "allocatable": n.status.as_ref().and_then(|s| s.allocatable.clone()),
                        })
                    })
                    .collect();
                ok_json(call_id, serde_json::json!({ "nodes": nodes }))
            }
            Err(e) => upstream_err(call_id, e),
        }
    }

    async fn rollout_restart(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let deployment = match require_str(args, "deployment", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };

        let api: Api<Deployment> = Api::namespaced(client, namespace);
        let now = chrono::Utc::now().to_rfc3339();
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            "kubectl.kubernetes.io/restartedAt": now
                        }
                    }
                }
            }
        });

        match api
            .patch(deployment, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => ok_json(call_id, serde_json::json!({ "restarted": deployment })),
            Err(e) => upstream_err(call_id, e),
        }
    }

    async fn scale_deployment(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let deployment = match require_str(args, "deployment", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let Some(replicas) = args.get("replicas").and_then(|v| v.as_i64()) else {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Validation,
                "missing required argument: replicas",
            );
        };

        let api: Api<Deployment> = Api::namespaced(client, namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });

        match api
            .patch(deployment, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => ok_json(
                call_id,
                serde_json::json!({ "scaled": deployment, "replicas": replicas }),
            ),
            Err(e) => upstream_err(call_id, e),
        }
    }

    async fn delete_pod(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let namespace = match require_str(args, "namespace", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };
        let name = match require_str(args, "name", call_id) {
            Ok(n) => n,
            Err(e) => return e,
        };

        let api: Api<Pod> = Api::namespaced(client, namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => ok_json(call_id, serde_json::json!({ "deleted": name })),
            Err(e) => upstream_err(call_id, e),
        }
    }

    async fn apply_manifest(&self, call_id: &str, client: Client, args: &Value) -> ToolOutcome {
        let Some(manifest) = args.get("manifest") else {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Validation,
                "missing required argument: manifest",
            );
        };

        let obj: DynamicObject = match serde_json::from_value(manifest.clone()) {
            Ok(o) => o,
            Err(e) => {
                return ToolOutcome::error(
                    call_id,
                    ToolErrorKind::Validation,
                    format!("invalid manifest: {e}"),
                )
            }
        };

        let Some(types) = obj.types.clone() else {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Validation,
                "manifest is missing apiVersion/kind",
            );
        };
        let gvk = match GroupVersionKind::try_from(&types) {
            Ok(g) => g,
            Err(e) => return ToolOutcome::error(call_id, ToolErrorKind::Validation, e.to_string()),
        };

        let discovery = match Discovery::new(client.clone()).run().await {
            Ok(d) => d,
            Err(e) => return ToolOutcome::error(call_id, ToolErrorKind::Upstream, e.to_string()),
        };
        let Some((ar, _)) = discovery.resolve_gvk(&gvk) else {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::Validation,
                format!("unknown resource kind '{}'", gvk.kind),
            );
        };

        let api: Api<DynamicObject> = match obj.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None => Api::all_with(client, &ar),
        };

        let name = obj.metadata.name.clone().unwrap_or_default();
        let pp = PatchParams::apply("ki-gateway").force();
        match api.patch(&name, &pp, &Patch::Apply(&obj)).await {
            Ok(_) => ok_json(call_id, serde_json::json!({ "applied": name })),
            Err(e) => upstream_err(call_id, e),
        }
    }
}

fn ok_json(call_id: &str, value: Value) -> ToolOutcome {
    ToolOutcome::ok(call_id, value.to_string())
}

fn upstream_err(call_id: &str, e: kube::Error) -> ToolOutcome {
    let kind = match &e {
        kube::Error::Api(resp) if resp.code == 404 => ToolErrorKind::NotFound,
        kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
            ToolErrorKind::Unauthorized
        }
        kube::Error::Api(resp) if resp.code == 429 => ToolErrorKind::Throttled,
        _ => ToolErrorKind::Upstream,
    };
    ToolOutcome::error(call_id, kind, e.to_string())
}
