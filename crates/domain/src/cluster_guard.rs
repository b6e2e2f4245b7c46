//! Cluster Guard — the process-wide invariant that only a configured
//! allow-list of clusters is ever contacted (§3, §4.10, §9).
//!
//! Built once at boot from [`crate::config::ClusterConfig`] and held as
//! plain immutable state on the gateway's `AppState` — not a `lazy_static`
//! global, per the teacher's explicit-construction-and-passing style.

/// Immutable allow-list check. Every K8s-targeting tool call and every
/// cycle/request naming a cluster must pass through [`ClusterGuard::require`]
/// before a client is built or a request is served.
#[derive(Debug, Clone)]
pub struct ClusterGuard {
    allow_list: Vec<String>,
}

/// Returned by [`ClusterGuard::require`] when the named cluster is not
/// allow-listed. Fatal at boot; a normal `Unauthorized` tool error at
/// runtime (§7's error taxonomy).
#[derive(Debug, Clone, thiserror::Error)]
#[error("cluster '{0}' is not in the allow-list")]
pub struct ClusterNotAllowed(pub String);

impl ClusterGuard {
    pub fn new(allow_list: Vec<String>) -> Self {
        Self { allow_list }
    }

    pub fn require(&self, cluster: &str) -> Result<(), ClusterNotAllowed> {
        if self.allow_list.iter().any(|c| c == cluster) {
            Ok(())
        } else {
            Err(ClusterNotAllowed(cluster.to_string()))
        }
    }

    pub fn is_allowed(&self, cluster: &str) -> bool {
        self.allow_list.iter().any(|c| c == cluster)
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_listed_cluster_passes() {
        let guard = ClusterGuard::new(vec!["dev-eks".into()]);
        assert!(guard.require("dev-eks").is_ok());
    }

    #[test]
    fn non_allow_listed_cluster_is_rejected() {
        let guard = ClusterGuard::new(vec!["dev-eks".into()]);
        let err = guard.require("prod-eks").unwrap_err();
        assert_eq!(err.0, "prod-eks");
    }
}
