pub mod cluster;
pub mod resource;

use std::fmt::Debug;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::ListParams;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use kube_mirror_k8s_utils::{ObjectEvent, list_objects, namespaced_api, watch_objects};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::WatchConfig;
use crate::dispatch::Dispatcher;
use crate::kubernetes::resource::{Mirrored, ResourceEvent};

/// Pipeline settings derived from the validated configuration.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub server_timeout: u32,
    pub error_throttle: Duration,
    pub selector: Option<String>,
}

impl WatchSettings {
    pub fn new(cfg: &WatchConfig, selector: Option<String>) -> Self {
        Self {
            server_timeout: cfg.server_timeout.min(u64::from(u32::MAX)) as u32,
            error_throttle: Duration::from_secs(cfg.error_throttle_time),
            selector,
        }
    }
}

/// Watches one kind in one namespace until cancelled, feeding every
/// add/update/delete into the dispatcher in arrival order.
pub async fn watch_pipeline<K>(
    client: Client,
    namespace: Option<String>,
    settings: WatchSettings,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) -> Result<()>
where
    K: Mirrored + Send + Clone + Debug + DeserializeOwned + Sync + 'static,
{
    let api: Api<K> = namespaced_api(client, namespace.as_deref());
    let mut config = watcher::Config::default().timeout(settings.server_timeout);
    if let Some(selector) = &settings.selector {
        config = config.labels(selector);
    }

    let scope = namespace.as_deref().unwrap_or("*").to_string();
    info!(kind = %K::KIND, namespace = %scope, "starting watch");

    let stream = watch_objects(api, config);
    let mut stream = pin!(stream);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(kind = %K::KIND, namespace = %scope, "watch cancelled");
                return Ok(());
            }
            event = stream.next() => match event {
                Some(Ok(ObjectEvent::Applied(obj))) => {
                    debug!(kind = %K::KIND, name = %obj.name_any(), "observed apply");
                    dispatcher.dispatch(ResourceEvent::Applied(obj.snapshot())).await;
                }
                Some(Ok(ObjectEvent::Deleted(obj))) => {
                    debug!(kind = %K::KIND, name = %obj.name_any(), "observed delete");
                    dispatcher.dispatch(ResourceEvent::Deleted(obj.snapshot())).await;
                }
                Some(Err(e)) => {
                    warn!(kind = %K::KIND, namespace = %scope, error = %e, "watch stream error");
                    if throttle(settings.error_throttle, &cancel).await {
                        return Ok(());
                    }
                }
                None => {
                    info!(kind = %K::KIND, namespace = %scope, "watch stream ended");
                    return Ok(());
                }
            }
        }
    }
}

/// Lists one kind in one namespace once, emitting every item as applied.
pub async fn list_pipeline<K>(
    client: Client,
    namespace: Option<String>,
    settings: WatchSettings,
    dispatcher: Arc<Dispatcher>,
) -> Result<()>
where
    K: Mirrored + Send + Clone + Debug + DeserializeOwned + Sync + 'static,
{
    let api: Api<K> = namespaced_api(client, namespace.as_deref());
    let mut params = ListParams::default();
    if let Some(selector) = &settings.selector {
        params = params.labels(selector);
    }

    let scope = namespace.as_deref().unwrap_or("*").to_string();
    let items = list_objects(&api, &params).await?;
    info!(kind = %K::KIND, namespace = %scope, count = items.len(), "listed resources");

    for obj in items {
        dispatcher
            .dispatch(ResourceEvent::Applied(obj.snapshot()))
            .await;
    }
    Ok(())
}

/// Returns true when cancelled while throttling.
async fn throttle(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
