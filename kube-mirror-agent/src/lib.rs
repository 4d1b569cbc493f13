pub mod agent;
pub mod config;
pub mod dispatch;
pub mod kubernetes;
pub mod labels;
pub mod script;
pub mod sink;
pub mod webhook;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("in-cluster config error: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {status}: {body}")]
    WebhookStatus { status: u16, body: String },

    #[error("webhook failed after {attempts} attempts: {last}")]
    WebhookExhausted { attempts: u32, last: Box<Error> },

    #[error("invalid file mode {mode:?}: {source}")]
    FileMode {
        mode: String,
        source: std::num::ParseIntError,
    },

    #[error("script {path:?} exited with code {code:?}: {output}")]
    ScriptFailed {
        path: String,
        code: Option<i32>,
        output: String,
    },

    #[error("script {path:?} timed out after {timeout_secs}s")]
    ScriptTimeout { path: String, timeout_secs: u64 },

    #[error("task error: {0}")]
    Task(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
