//! The webhook endpoint: decodes the assistant request, dispatches to the
//! matching action handler, and renders the fulfillment response.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use meshvoice_core::intent::{Action, FulfillmentResponse, WebhookRequest};
use meshvoice_istio::{ClientError, ControlPlane};

#[derive(Clone)]
pub struct WebhookState {
    mesh: Arc<dyn ControlPlane>,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{action} requires the `{name}` parameter")]
    MissingParameter { action: Action, name: &'static str },
    #[error(transparent)]
    ControlPlane(#[from] ClientError),
}

pub fn router(mesh: Arc<dyn ControlPlane>) -> Router {
    Router::new().route("/", post(handle)).with_state(WebhookState { mesh })
}

/// Failures never leak a cause to the caller: the assistant platform gets a
/// generic 500 while the detail lands in the server log.
async fn handle(State(state): State<WebhookState>, body: String) -> Response {
    let request_id = Uuid::new_v4().simple().to_string();

    let request: WebhookRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(decode_error) => {
            warn!(
                request_id = %request_id,
                error = %decode_error,
                "failed to decode request body"
            );
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to decode request body")
                .into_response();
        }
    };

    let raw_action = request.result.action;
    info!(request_id = %request_id, action = %raw_action, "new webhook request");

    let Some(action) = Action::parse(&raw_action) else {
        warn!(request_id = %request_id, action = %raw_action, "unrecognized action");
        let unsupported = FulfillmentResponse::speak(format!(
            "Sorry, I don't know how to handle the {raw_action} action."
        ));
        return fulfillment_response(&unsupported, &request_id);
    };

    match dispatch(action, &request.result.parameters, state.mesh.as_ref()).await {
        Ok(response) => fulfillment_response(&response, &request_id),
        Err(action_error) => {
            error!(
                request_id = %request_id,
                action = %action,
                error = %action_error,
                "failed to perform action"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to perform action").into_response()
        }
    }
}

// The assistant platform renders indented JSON in its debug console, so the
// body is pretty-printed rather than compact.
fn fulfillment_response(response: &FulfillmentResponse, request_id: &str) -> Response {
    match serde_json::to_string_pretty(response) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(serialize_error) => {
            error!(
                request_id = %request_id,
                error = %serialize_error,
                "failed to serialize response"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "unable to serialize response").into_response()
        }
    }
}

async fn dispatch(
    action: Action,
    parameters: &HashMap<String, String>,
    mesh: &dyn ControlPlane,
) -> Result<FulfillmentResponse, ActionError> {
    match action {
        Action::AllowAccess => allow_access(parameters, mesh).await,
        Action::DenyAccess => deny_access(parameters, mesh).await,
        Action::GetTopology => get_topology(parameters, mesh).await,
        Action::SetRoute => set_route(parameters, mesh).await,
        Action::GetRoute => get_route(parameters, mesh).await,
    }
}

fn require<'a>(
    parameters: &'a HashMap<String, String>,
    action: Action,
    name: &'static str,
) -> Result<&'a str, ActionError> {
    parameters
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(ActionError::MissingParameter { action, name })
}

async fn allow_access(
    _parameters: &HashMap<String, String>,
    _mesh: &dyn ControlPlane,
) -> Result<FulfillmentResponse, ActionError> {
    // TODO: wire up ControlPlane::grant_access once the product copy for the
    // confirmation sentence is settled.
    Ok(FulfillmentResponse::speak("Allowing access between services is not available yet."))
}

async fn deny_access(
    parameters: &HashMap<String, String>,
    mesh: &dyn ControlPlane,
) -> Result<FulfillmentResponse, ActionError> {
    let to = require(parameters, Action::DenyAccess, "to")?;
    let from = require(parameters, Action::DenyAccess, "from")?;

    mesh.deny_access(to, from).await?;

    Ok(FulfillmentResponse::speak(format!(
        "Access to the {to} service is prohibited from the {from} service."
    )))
}

async fn get_topology(
    _parameters: &HashMap<String, String>,
    _mesh: &dyn ControlPlane,
) -> Result<FulfillmentResponse, ActionError> {
    Ok(FulfillmentResponse::speak("Describing the service topology is not available yet."))
}

async fn set_route(
    _parameters: &HashMap<String, String>,
    _mesh: &dyn ControlPlane,
) -> Result<FulfillmentResponse, ActionError> {
    Ok(FulfillmentResponse::speak("Changing service routes is not available yet."))
}

async fn get_route(
    parameters: &HashMap<String, String>,
    mesh: &dyn ControlPlane,
) -> Result<FulfillmentResponse, ActionError> {
    let name = require(parameters, Action::GetRoute, "serviceName")?;

    let rule = mesh.route_rule(name).await?;

    Ok(FulfillmentResponse::speak(format!(
        "The {name} route has HTTP retries set to {}",
        rule.retry_attempts()
    )))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use meshvoice_istio::types::{HttpRetryPolicy, RouteRule, RouteSpec, SimpleRetry, Topology};
    use meshvoice_istio::{ClientError, ControlPlane};

    use super::router;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum MeshCall {
        Grant { to: String, from: String },
        Deny { to: String, from: String },
        RouteRule { service: String },
        Topology,
    }

    #[derive(Default)]
    struct FakeControlPlane {
        calls: Mutex<Vec<MeshCall>>,
        fail_with_status: Option<StatusCode>,
        route_attempts: i64,
    }

    impl FakeControlPlane {
        fn with_route_attempts(attempts: i64) -> Self {
            Self { route_attempts: attempts, ..Self::default() }
        }

        fn failing_with(status: StatusCode) -> Self {
            Self { fail_with_status: Some(status), ..Self::default() }
        }

        fn record(&self, call: MeshCall) {
            self.calls.lock().expect("call lock").push(call);
        }

        fn calls(&self) -> Vec<MeshCall> {
            self.calls.lock().expect("call lock").clone()
        }

        fn failure(&self, operation: &'static str) -> Option<ClientError> {
            self.fail_with_status.map(|status| ClientError::Status { operation, status })
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn grant_access(&self, to: &str, from: &str) -> Result<(), ClientError> {
            self.record(MeshCall::Grant { to: to.to_string(), from: from.to_string() });
            self.failure("grant-access").map_or(Ok(()), Err)
        }

        async fn deny_access(&self, to: &str, from: &str) -> Result<(), ClientError> {
            self.record(MeshCall::Deny { to: to.to_string(), from: from.to_string() });
            self.failure("deny-access").map_or(Ok(()), Err)
        }

        async fn route_rule(&self, service: &str) -> Result<RouteRule, ClientError> {
            self.record(MeshCall::RouteRule { service: service.to_string() });
            if let Some(error) = self.failure("get-route-rule") {
                return Err(error);
            }
            Ok(RouteRule {
                kind: "route-rule".to_string(),
                name: format!("{service}-default"),
                spec: RouteSpec {
                    http_req_retries: HttpRetryPolicy {
                        simple_retry: SimpleRetry {
                            attempts: self.route_attempts,
                            per_try_timeout: "2s".to_string(),
                        },
                    },
                    ..RouteSpec::default()
                },
            })
        }

        async fn topology(&self) -> Result<Topology, ClientError> {
            self.record(MeshCall::Topology);
            if let Some(error) = self.failure("get-topology") {
                return Err(error);
            }
            Ok(Topology::default())
        }
    }

    fn intent_body(action: &str, parameters: &[(&str, &str)]) -> String {
        let parameters: HashMap<&str, &str> = parameters.iter().copied().collect();
        serde_json::json!({"result": {"action": action, "parameters": parameters}}).to_string()
    }

    async fn post_webhook(mesh: Arc<FakeControlPlane>, body: String) -> (StatusCode, String) {
        let response = router(mesh)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .expect("request should build"),
            )
            .await
            .expect("router should respond");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        (status, String::from_utf8(bytes.to_vec()).expect("body should be utf-8"))
    }

    fn speech_of(body: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(body).expect("body should be JSON");
        value["speech"].as_str().expect("speech should be a string").to_string()
    }

    #[tokio::test]
    async fn deny_access_invokes_the_client_and_renders_the_sentence() {
        let mesh = Arc::new(FakeControlPlane::default());
        let body = intent_body("deny-access", &[("to", "reviews"), ("from", "ratings")]);

        let (status, body) = post_webhook(mesh.clone(), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            speech_of(&body),
            "Access to the reviews service is prohibited from the ratings service."
        );
        assert_eq!(
            mesh.calls(),
            vec![MeshCall::Deny { to: "reviews".to_string(), from: "ratings".to_string() }]
        );
    }

    #[tokio::test]
    async fn responses_are_indented_json_with_platform_fields() {
        let mesh = Arc::new(FakeControlPlane::default());
        let body = intent_body("deny-access", &[("to", "reviews"), ("from", "ratings")]);

        let (_, body) = post_webhook(mesh, body).await;

        assert!(body.starts_with("{\n"), "response body should be pretty-printed: {body}");
        let value: serde_json::Value = serde_json::from_str(&body).expect("body should be JSON");
        assert_eq!(value["displayText"], value["speech"]);
        assert_eq!(value["source"], "Istio Action");
    }

    #[tokio::test]
    async fn get_route_reports_the_retry_attempt_count() {
        let mesh = Arc::new(FakeControlPlane::with_route_attempts(3));
        let body = intent_body("get-route", &[("serviceName", "reviews")]);

        let (status, body) = post_webhook(mesh.clone(), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(speech_of(&body), "The reviews route has HTTP retries set to 3");
        assert_eq!(mesh.calls(), vec![MeshCall::RouteRule { service: "reviews".to_string() }]);
    }

    #[tokio::test]
    async fn each_action_dispatches_to_exactly_its_handler() {
        let cases: [(&str, Vec<(&str, &str)>, Vec<MeshCall>); 5] = [
            ("allow-access", vec![("to", "reviews"), ("from", "ratings")], vec![]),
            (
                "deny-access",
                vec![("to", "reviews"), ("from", "ratings")],
                vec![MeshCall::Deny { to: "reviews".to_string(), from: "ratings".to_string() }],
            ),
            ("get-topology", vec![], vec![]),
            ("set-route", vec![("serviceName", "reviews")], vec![]),
            (
                "get-route",
                vec![("serviceName", "reviews")],
                vec![MeshCall::RouteRule { service: "reviews".to_string() }],
            ),
        ];

        for (action, parameters, expected_calls) in cases {
            let mesh = Arc::new(FakeControlPlane::default());
            let body = intent_body(action, &parameters);

            let (status, _) = post_webhook(mesh.clone(), body).await;

            assert_eq!(status, StatusCode::OK, "action `{action}` should succeed");
            assert_eq!(mesh.calls(), expected_calls, "unexpected client calls for `{action}`");
        }
    }

    #[tokio::test]
    async fn control_plane_failure_yields_a_generic_500() {
        let mesh = Arc::new(FakeControlPlane::failing_with(StatusCode::SERVICE_UNAVAILABLE));
        let body = intent_body("deny-access", &[("to", "reviews"), ("from", "ratings")]);

        let (status, body) = post_webhook(mesh, body).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Failed to perform action");
        assert!(!body.contains("503"), "control-plane detail must not leak to the caller");
    }

    #[tokio::test]
    async fn malformed_body_yields_500_without_any_dispatch() {
        let mesh = Arc::new(FakeControlPlane::default());

        let (status, body) = post_webhook(mesh.clone(), "{not json at all".to_string()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Failed to decode request body");
        assert!(mesh.calls().is_empty(), "no handler should run for a malformed body");
    }

    #[tokio::test]
    async fn unrecognized_action_yields_the_unsupported_response() {
        let mesh = Arc::new(FakeControlPlane::default());
        let body = intent_body("reboot-cluster", &[]);

        let (status, body) = post_webhook(mesh.clone(), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            speech_of(&body),
            "Sorry, I don't know how to handle the reboot-cluster action."
        );
        assert!(mesh.calls().is_empty(), "unrecognized actions must not reach the client");
    }

    #[tokio::test]
    async fn missing_parameter_yields_500_without_an_outbound_call() {
        let mesh = Arc::new(FakeControlPlane::default());
        let body = intent_body("deny-access", &[("to", "reviews")]);

        let (status, body) = post_webhook(mesh.clone(), body).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Failed to perform action");
        assert!(mesh.calls().is_empty(), "a half-specified deny must not reach the client");
    }
}
