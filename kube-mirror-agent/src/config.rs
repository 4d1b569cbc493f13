use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::{Error, Result};

pub const DEFAULT_FOLDER_ANNOTATION: &str = "k8s-sidecar-target-directory";

#[derive(Debug, Parser)]
#[command(version, about = "Mirrors labelled ConfigMaps and Secrets into a local directory")]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long)]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub output: OutputConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    pub resources: ResourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.output.folder.as_os_str().is_empty() {
            return Err(Error::Config("output.folder is required".into()));
        }
        if self.resources.labels.is_empty() {
            return Err(Error::Config(
                "at least one resources.labels entry is required".into(),
            ));
        }
        for (i, bundle) in self.resources.labels.iter().enumerate() {
            if bundle.name.is_empty() {
                return Err(Error::Config(format!(
                    "resources.labels[{i}].name is required"
                )));
            }
            if let Some(script) = &bundle.script
                && script.path.is_empty()
            {
                return Err(Error::Config(format!(
                    "resources.labels[{i}].script.path is required"
                )));
            }
            if let Some(request) = &bundle.request {
                if request.url.is_empty() {
                    return Err(Error::Config(format!(
                        "resources.labels[{i}].request.url is required"
                    )));
                }
                if request.timeout < 0.0 {
                    return Err(Error::Config(format!(
                        "resources.labels[{i}].request.timeout cannot be negative"
                    )));
                }
                if request.retry.backoff_factor < 1.0 {
                    return Err(Error::Config(format!(
                        "resources.labels[{i}].request.retry.backoffFactor must be >= 1.0"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Base directory every mirrored file lands under.
    pub folder: PathBuf,

    /// Annotation key whose value overrides the base directory per resource.
    #[serde(default = "default_folder_annotation")]
    pub folder_annotation: String,

    /// `<ns>/<name>-<key>` flat layout instead of `<ns>/<name>/<key>`.
    #[serde(default)]
    pub unique_filenames: bool,

    /// Octal mode string applied to every written file.
    #[serde(default = "default_file_mode")]
    pub default_file_mode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Comma-separated namespace list; absent or `ALL` watches everything.
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default, rename = "skipTLSVerify")]
    pub skip_tls_verify: bool,
}

impl KubernetesConfig {
    /// Namespaces to watch; a `None` entry means cluster-wide.
    pub fn namespaces(&self) -> Vec<Option<String>> {
        let Some(raw) = self.namespace.as_deref() else {
            return vec![None];
        };
        let names: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() || names.contains(&"ALL") {
            return vec![None];
        }
        names.into_iter().map(|n| Some(n.to_string())).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub kind: ResourceType,

    #[serde(default)]
    pub method: WatchMethod,

    #[serde(default)]
    pub watch_config: WatchConfig,

    pub labels: Vec<LabelConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Configmap,
    Secret,
    Both,
}

impl ResourceType {
    pub fn includes_configmaps(self) -> bool {
        matches!(self, Self::Configmap | Self::Both)
    }

    pub fn includes_secrets(self) -> bool {
        matches!(self, Self::Secret | Self::Both)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchMethod {
    #[default]
    Watch,
    List,
    Sleep,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    /// Seconds before the server closes a watch and the informer resyncs.
    #[serde(default = "default_server_timeout")]
    pub server_timeout: u64,

    /// Client-side read deadline; must outlive the server timeout.
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,

    /// Seconds to pause a pipeline after a stream error.
    #[serde(default = "default_error_throttle_time")]
    pub error_throttle_time: u64,

    /// Skip events whose resourceVersion was already fully processed.
    #[serde(default)]
    pub ignore_processed: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            server_timeout: default_server_timeout(),
            client_timeout: default_client_timeout(),
            error_throttle_time: default_error_throttle_time(),
            ignore_processed: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelConfig {
    /// Label that must be present on the resource.
    pub name: String,

    /// Exact value to require; absent or empty accepts any value.
    #[serde(default)]
    pub value: Option<String>,

    #[serde(default)]
    pub script: Option<ScriptConfig>,

    #[serde(default)]
    pub request: Option<RequestConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    /// Command line handed to `/bin/sh -c`.
    pub path: String,

    /// Seconds before the child is killed; 0 disables the deadline.
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout: f64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    #[serde(default, rename = "skipTLSVerify")]
    pub skip_tls_verify: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Additional attempts after the first.
    #[serde(default = "default_retry_total")]
    pub total: u32,

    #[serde(default = "default_retry_connect")]
    pub connect: u32,

    #[serde(default = "default_retry_read")]
    pub read: u32,

    /// Multiplied by the attempt number for the wait between attempts.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            total: default_retry_total(),
            connect: default_retry_connect(),
            read: default_retry_read(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub basic: BasicAuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthConfig {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    #[serde(alias = "JSON")]
    Json,
    #[serde(alias = "TEXT")]
    Text,
}

fn default_folder_annotation() -> String {
    DEFAULT_FOLDER_ANNOTATION.to_string()
}

fn default_file_mode() -> String {
    "644".to_string()
}

fn default_server_timeout() -> u64 {
    60
}

fn default_client_timeout() -> u64 {
    66
}

fn default_error_throttle_time() -> u64 {
    5
}

fn default_request_timeout() -> f64 {
    10.0
}

fn default_retry_total() -> u32 {
    5
}

fn default_retry_connect() -> u32 {
    10
}

fn default_retry_read() -> u32 {
    5
}

fn default_backoff_factor() -> f64 {
    1.1
}

fn default_log_level() -> String {
    "info".to_string()
}
