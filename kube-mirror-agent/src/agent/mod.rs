use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Client;
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Config, WatchMethod};
use crate::dispatch::Dispatcher;
use crate::kubernetes::resource::Mirrored;
use crate::kubernetes::{WatchSettings, list_pipeline, watch_pipeline};
use crate::labels::Matcher;
use crate::{Error, Result};

/// Starts one pipeline per (namespace × kind) and blocks until every
/// pipeline finished or the token was cancelled.
pub async fn run(cfg: Config, client: Client, cancel: CancellationToken) -> Result<()> {
    let matcher = Matcher::new(&cfg.resources.labels);
    let settings = WatchSettings::new(&cfg.resources.watch_config, matcher.server_selector());
    let dispatcher = Arc::new(Dispatcher::new(&cfg, matcher)?);

    let method = cfg.resources.method;
    if method == WatchMethod::Sleep {
        info!("watch method SLEEP configured, idling until shutdown");
        cancel.cancelled().await;
        return Ok(());
    }

    let kind = cfg.resources.kind;
    let mut pipelines = JoinSet::new();
    for namespace in cfg.kubernetes.namespaces() {
        if kind.includes_configmaps() {
            spawn_pipeline::<ConfigMap>(
                &mut pipelines,
                method,
                client.clone(),
                namespace.clone(),
                settings.clone(),
                dispatcher.clone(),
                cancel.child_token(),
            );
        }
        if kind.includes_secrets() {
            spawn_pipeline::<Secret>(
                &mut pipelines,
                method,
                client.clone(),
                namespace.clone(),
                settings.clone(),
                dispatcher.clone(),
                cancel.child_token(),
            );
        }
    }

    let mut failed = false;
    while let Some(joined) = pipelines.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed = true;
                error!(error = %e, "pipeline failed");
            }
            Err(e) => {
                failed = true;
                error!(error = %e, "pipeline task failed to complete");
            }
        }
    }

    if failed && !cancel.is_cancelled() {
        return Err(Error::Task("one or more pipelines failed".into()));
    }
    Ok(())
}

fn spawn_pipeline<K>(
    pipelines: &mut JoinSet<Result<()>>,
    method: WatchMethod,
    client: Client,
    namespace: Option<String>,
    settings: WatchSettings,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) where
    K: Mirrored + Send + Clone + Debug + DeserializeOwned + Sync + 'static,
{
    match method {
        WatchMethod::Watch => {
            pipelines.spawn(watch_pipeline::<K>(
                client, namespace, settings, dispatcher, cancel,
            ));
        }
        WatchMethod::List => {
            pipelines.spawn(list_pipeline::<K>(client, namespace, settings, dispatcher));
        }
        WatchMethod::Sleep => {}
    }
}
