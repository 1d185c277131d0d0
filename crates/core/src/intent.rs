//! Assistant intent model: the inbound webhook body and the fulfillment
//! response rendered back to the assistant platform.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Response `source` attribution expected by the assistant platform.
pub const RESPONSE_SOURCE: &str = "Istio Action";

/// Inbound webhook body, `{"result": {"action": ..., "parameters": {...}}}`.
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookRequest {
    pub result: IntentResult,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IntentResult {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Rendered natural-language answer. `speech` and `display_text` carry the
/// same sentence; the platform picks whichever fits the surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FulfillmentResponse {
    pub speech: String,
    #[serde(rename = "displayText")]
    pub display_text: String,
    pub source: String,
}

impl FulfillmentResponse {
    pub fn speak(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            speech: message.clone(),
            display_text: message,
            source: RESPONSE_SOURCE.to_string(),
        }
    }
}

/// The assistant action vocabulary, matched exactly against the inbound
/// action identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    AllowAccess,
    DenyAccess,
    GetTopology,
    SetRoute,
    GetRoute,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "allow-access" => Some(Self::AllowAccess),
            "deny-access" => Some(Self::DenyAccess),
            "get-topology" => Some(Self::GetTopology),
            "set-route" => Some(Self::SetRoute),
            "get-route" => Some(Self::GetRoute),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowAccess => "allow-access",
            Self::DenyAccess => "deny-access",
            Self::GetTopology => "get-topology",
            Self::SetRoute => "set-route",
            Self::GetRoute => "get-route",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
