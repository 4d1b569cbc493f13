use std::time::Duration;

use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};

use crate::Result;
use crate::config::{KubernetesConfig, WatchConfig};

/// Builds the API client from an explicit kubeconfig path or the ambient
/// (in-cluster or local) configuration.
pub async fn client(cfg: &KubernetesConfig, watch: &WatchConfig) -> Result<Client> {
    let mut config = match &cfg.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };

    if cfg.skip_tls_verify {
        config.accept_invalid_certs = true;
    }
    // The client deadline must outlive the server-side watch timeout.
    config.read_timeout = Some(Duration::from_secs(watch.client_timeout));

    Ok(Client::try_from(config)?)
}
