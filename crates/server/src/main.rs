mod health;
mod tls;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use meshvoice_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use meshvoice_istio::IstioClient;

/// Webhook bridging assistant intents to the Istio control plane.
#[derive(Debug, Parser)]
#[command(name = "meshvoice-server", version, about)]
struct Flags {
    /// The Istio config API service.
    #[arg(long, value_name = "HOST:PORT")]
    config_api_service: Option<String>,
    /// The mixer API service.
    #[arg(long, value_name = "HOST:PORT")]
    mixer_api_service: Option<String>,
    /// The service-graph API service.
    #[arg(long, value_name = "HOST:PORT")]
    servicegraph_api_service: Option<String>,
    /// The Istio config service username.
    #[arg(long)]
    username: Option<String>,
    /// The Istio config service password.
    #[arg(long)]
    password: Option<String>,
    /// Explicit path to a meshvoice.toml config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log level override (trace|debug|info|warn|error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Flags {
    fn into_load_options(self) -> LoadOptions {
        LoadOptions {
            config_path: self.config,
            require_file: false,
            overrides: ConfigOverrides {
                config_api_service: self.config_api_service,
                mixer_api_service: self.mixer_api_service,
                servicegraph_api_service: self.servicegraph_api_service,
                username: self.username,
                password: self.password,
                log_level: self.log_level,
            },
        }
    }
}

fn init_logging(config: &AppConfig) {
    use meshvoice_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Flags::parse()).await
}

async fn run(flags: Flags) -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(flags.into_load_options())?;
    init_logging(&config);

    // reqwest's rustls backend may compile in a second crypto provider, so
    // pin the process default before building any TLS config.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mesh = Arc::new(IstioClient::new(&config.mesh));

    health::spawn(&config.server.bind_address, config.server.health_check_port).await?;

    let tls_config =
        tls::load_server_config(&config.server.tls_cert_path, &config.server.tls_key_path)?;

    let address = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        config_api_service = %config.mesh.config_api_service,
        mixer_api_service = %config.mesh.mixer_api_service,
        servicegraph_api_service = %config.mesh.servicegraph_api_service,
        "istio webhook service started"
    );

    let app = webhook::router(mesh);

    tokio::select! {
        serve_result = tls::serve(listener, tls_config, app) => {
            serve_result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(
                event_name = "system.server.stopping",
                "istio webhook service stopping"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::Flags;

    #[test]
    fn flags_map_onto_config_overrides() {
        let flags = Flags::try_parse_from([
            "meshvoice-server",
            "--config-api-service",
            "istio-pilot:8081",
            "--mixer-api-service",
            "istio-mixer:9094",
            "--username",
            "admin",
            "--password",
            "secret",
        ])
        .expect("flags should parse");

        let options = flags.into_load_options();
        assert_eq!(options.overrides.config_api_service.as_deref(), Some("istio-pilot:8081"));
        assert_eq!(options.overrides.mixer_api_service.as_deref(), Some("istio-mixer:9094"));
        assert_eq!(options.overrides.username.as_deref(), Some("admin"));
        assert_eq!(options.overrides.password.as_deref(), Some("secret"));
        assert!(options.overrides.servicegraph_api_service.is_none());
        assert!(options.config_path.is_none());
    }

    #[test]
    fn bare_invocation_parses_with_no_overrides() {
        let flags = Flags::try_parse_from(["meshvoice-server"]).expect("flags should parse");
        let options = flags.into_load_options();

        assert!(options.overrides.config_api_service.is_none());
        assert!(options.overrides.password.is_none());
        assert!(!options.require_file);
    }
}
