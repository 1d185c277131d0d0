//! Wire model for the three control-plane APIs. Everything here is transient:
//! built or decoded for a single request/response cycle and discarded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Rule set written to the mixer scopes API. A PUT replaces the subject's
/// entire rule set, so writing one denial rule drops whatever was there.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<AccessRule>,
}

/// A policy statement selecting traffic by source-label predicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub selector: String,
    pub aspects: Vec<Aspect>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aspect {
    pub kind: String,
}

impl RuleSet {
    /// The single-rule set denying traffic whose `app` label is `from`.
    pub fn deny_from(from: &str) -> Self {
        Self {
            rules: vec![AccessRule {
                selector: format!("source.labels[\"app\"]==\"{from}\""),
                aspects: vec![Aspect { kind: "denials".to_string() }],
            }],
        }
    }
}

/// Read-only view of a routing rule served by the config API. Constructed
/// only by deserialization of a remote response.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RouteRule {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub spec: RouteSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteSpec {
    pub destination: String,
    pub http_req_retries: HttpRetryPolicy,
    pub http_req_timeout: HttpTimeoutPolicy,
    pub precedence: i64,
    pub route: Vec<WeightedRoute>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpRetryPolicy {
    pub simple_retry: SimpleRetry,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimpleRetry {
    pub attempts: i64,
    pub per_try_timeout: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpTimeoutPolicy {
    pub simple_timeout: SimpleTimeout,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimpleTimeout {
    pub timeout: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WeightedRoute {
    pub tags: HashMap<String, String>,
    pub weight: i64,
}

impl RouteRule {
    /// HTTP retry attempt count, zero when no retry policy is configured.
    pub fn retry_attempts(&self) -> i64 {
        self.spec.http_req_retries.simple_retry.attempts
    }
}

/// Service-graph snapshot: node attributes keyed by service name, plus the
/// observed call edges.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub nodes: HashMap<String, HashMap<String, String>>,
    pub edges: Vec<Edge>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub labels: HashMap<String, String>,
}
