pub mod config;
pub mod intent;

pub use config::{
    AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, LoggingConfig, MeshConfig,
    ServerConfig,
};
pub use intent::{Action, FulfillmentResponse, IntentResult, WebhookRequest, RESPONSE_SOURCE};
