use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub mesh: MeshConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Connection targets and credentials for the mesh control plane.
#[derive(Clone, Debug)]
pub struct MeshConfig {
    pub config_api_service: String,
    pub mixer_api_service: String,
    pub servicegraph_api_service: String,
    pub username: String,
    pub password: SecretString,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Highest-precedence overrides, fed from the command line.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub config_api_service: Option<String>,
    pub mixer_api_service: Option<String>,
    pub servicegraph_api_service: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mesh: MeshConfig {
                config_api_service: "istio-pilot:8081".to_string(),
                mixer_api_service: "istio-mixer:9094".to_string(),
                servicegraph_api_service: "servicegraph:8088".to_string(),
                username: String::new(),
                password: String::new().into(),
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 443,
                health_check_port: 8080,
                tls_cert_path: PathBuf::from("/etc/istio-webhook/tls.crt"),
                tls_key_path: PathBuf::from("/etc/istio-webhook/tls.key"),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("meshvoice.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(mesh) = patch.mesh {
            if let Some(config_api_service) = mesh.config_api_service {
                self.mesh.config_api_service = config_api_service;
            }
            if let Some(mixer_api_service) = mesh.mixer_api_service {
                self.mesh.mixer_api_service = mixer_api_service;
            }
            if let Some(servicegraph_api_service) = mesh.servicegraph_api_service {
                self.mesh.servicegraph_api_service = servicegraph_api_service;
            }
            if let Some(username) = mesh.username {
                self.mesh.username = username;
            }
            if let Some(password_value) = mesh.password {
                self.mesh.password = secret_value(password_value);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(tls_cert_path) = server.tls_cert_path {
                self.server.tls_cert_path = tls_cert_path;
            }
            if let Some(tls_key_path) = server.tls_key_path {
                self.server.tls_key_path = tls_key_path;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MESHVOICE_MESH_CONFIG_API_SERVICE") {
            self.mesh.config_api_service = value;
        }
        if let Some(value) = read_env("MESHVOICE_MESH_MIXER_API_SERVICE") {
            self.mesh.mixer_api_service = value;
        }
        if let Some(value) = read_env("MESHVOICE_MESH_SERVICEGRAPH_API_SERVICE") {
            self.mesh.servicegraph_api_service = value;
        }
        if let Some(value) = read_env("MESHVOICE_MESH_USERNAME") {
            self.mesh.username = value;
        }
        if let Some(value) = read_env("MESHVOICE_MESH_PASSWORD") {
            self.mesh.password = secret_value(value);
        }

        if let Some(value) = read_env("MESHVOICE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("MESHVOICE_SERVER_PORT") {
            self.server.port = parse_u16("MESHVOICE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("MESHVOICE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("MESHVOICE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("MESHVOICE_SERVER_TLS_CERT_PATH") {
            self.server.tls_cert_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("MESHVOICE_SERVER_TLS_KEY_PATH") {
            self.server.tls_key_path = PathBuf::from(value);
        }

        let log_level =
            read_env("MESHVOICE_LOGGING_LEVEL").or_else(|| read_env("MESHVOICE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("MESHVOICE_LOGGING_FORMAT").or_else(|| read_env("MESHVOICE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(config_api_service) = overrides.config_api_service {
            self.mesh.config_api_service = config_api_service;
        }
        if let Some(mixer_api_service) = overrides.mixer_api_service {
            self.mesh.mixer_api_service = mixer_api_service;
        }
        if let Some(servicegraph_api_service) = overrides.servicegraph_api_service {
            self.mesh.servicegraph_api_service = servicegraph_api_service;
        }
        if let Some(username) = overrides.username {
            self.mesh.username = username;
        }
        if let Some(password) = overrides.password {
            self.mesh.password = secret_value(password);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_mesh(&self.mesh)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("meshvoice.toml"), PathBuf::from("config/meshvoice.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_mesh(mesh: &MeshConfig) -> Result<(), ConfigError> {
    validate_service_address("mesh.config_api_service", &mesh.config_api_service)?;
    validate_service_address("mesh.mixer_api_service", &mesh.mixer_api_service)?;
    validate_service_address("mesh.servicegraph_api_service", &mesh.servicegraph_api_service)?;

    // Basic auth against the config API is optional, but half a credential
    // pair always means a misconfigured deployment.
    let has_username = !mesh.username.trim().is_empty();
    let has_password = !mesh.password.expose_secret().trim().is_empty();
    if has_username != has_password {
        return Err(ConfigError::Validation(
            "mesh.username and mesh.password must be configured together".to_string(),
        ));
    }

    Ok(())
}

fn validate_service_address(key: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Validation(format!("{key} must not be empty")));
    }

    match trimmed.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(ConfigError::Validation(format!(
            "{key} must be a `host:port` address, got `{trimmed}`"
        ))),
    }
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.health_check_port == server.port {
        return Err(ConfigError::Validation(
            "server.health_check_port must differ from server.port".to_string(),
        ));
    }

    if server.tls_cert_path.as_os_str().is_empty() || server.tls_key_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "server.tls_cert_path and server.tls_key_path must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    mesh: Option<MeshPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct MeshPatch {
    config_api_service: Option<String>,
    mixer_api_service: Option<String>,
    servicegraph_api_service: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    tls_cert_path: Option<PathBuf>,
    tls_key_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
