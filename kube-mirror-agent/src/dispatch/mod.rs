pub mod ledger;

use tracing::{debug, error, info};

use crate::Result;
use crate::config::{Config, LabelConfig, ScriptConfig};
use crate::dispatch::ledger::Ledger;
use crate::kubernetes::resource::ResourceEvent;
use crate::labels::Matcher;
use crate::script;
use crate::sink::FileSink;
use crate::webhook::{Notification, WebhookClient};

/// Runtime side effects for one configured bundle.
struct BundleActions {
    script: Option<ScriptConfig>,
    webhook: Option<WebhookClient>,
}

impl BundleActions {
    fn new(bundle: &LabelConfig) -> Result<Self> {
        let webhook = bundle
            .request
            .as_ref()
            .map(WebhookClient::new)
            .transpose()?;
        Ok(Self {
            script: bundle.script.clone(),
            webhook,
        })
    }
}

/// Fans each pipeline event out to the matching bundles.
pub struct Dispatcher {
    matcher: Matcher,
    ledger: Ledger,
    sink: FileSink,
    actions: Vec<BundleActions>,
    ignore_processed: bool,
}

impl Dispatcher {
    pub fn new(cfg: &Config, matcher: Matcher) -> Result<Self> {
        let actions = cfg
            .resources
            .labels
            .iter()
            .map(BundleActions::new)
            .collect::<Result<_>>()?;
        Ok(Self {
            matcher,
            ledger: Ledger::default(),
            sink: FileSink::new(&cfg.output),
            actions,
            ignore_processed: cfg.resources.watch_config.ignore_processed,
        })
    }

    /// Applies every matching bundle to the event. Bundles and the steps
    /// within a bundle are independent: a failed step is logged and the
    /// remaining work still runs. The ledger only advances after a cycle
    /// in which every attempted step succeeded, so an identical
    /// re-delivery retries a failed cycle.
    pub async fn dispatch(&self, event: ResourceEvent) {
        let snapshot = event.snapshot();
        let id = &snapshot.id;

        if self.ignore_processed && self.ledger.seen(id, &snapshot.resource_version) {
            debug!(
                resource = %id,
                resource_version = %snapshot.resource_version,
                "skipping already processed version"
            );
            return;
        }

        let matched = self.matcher.matches(&snapshot.labels);
        if matched.is_empty() {
            debug!(resource = %id, "no bundle matches");
            return;
        }

        info!(
            resource = %id,
            action = event.action(),
            resource_version = %snapshot.resource_version,
            matches = matched.len(),
            "processing resource"
        );

        let mut clean = true;
        for index in matched {
            if !self.run_bundle(index, &event).await {
                clean = false;
            }
        }

        if clean {
            self.ledger
                .mark(id.clone(), snapshot.resource_version.clone());
        }
    }

    /// Runs one bundle's steps in order; returns false when any step failed.
    async fn run_bundle(&self, index: usize, event: &ResourceEvent) -> bool {
        let snapshot = event.snapshot();
        let id = &snapshot.id;
        let mut clean = true;

        if !event.is_delete() {
            for (key, bytes) in &snapshot.payload {
                match self.sink.write(snapshot, key, bytes).await {
                    Ok(path) => {
                        debug!(bundle = index, resource = %id, path = %path.display(), "wrote file")
                    }
                    Err(e) => {
                        error!(
                            bundle = index,
                            resource = %id.name,
                            namespace = %id.namespace,
                            kind = %id.kind,
                            step = "sink",
                            key = %key,
                            error = %e,
                            "failed to write file"
                        );
                        clean = false;
                    }
                }
            }
        }

        let actions = &self.actions[index];
        if let Some(script) = &actions.script {
            match script::run(script).await {
                Ok(output) => {
                    info!(bundle = index, resource = %id, path = %script.path, output = %output, "script succeeded")
                }
                Err(e) => {
                    error!(
                        bundle = index,
                        resource = %id.name,
                        namespace = %id.namespace,
                        kind = %id.kind,
                        step = "script",
                        error = %e,
                        "script failed"
                    );
                    clean = false;
                }
            }
        }

        if let Some(webhook) = &actions.webhook {
            let notification = Notification::for_snapshot(snapshot);
            if let Err(e) = webhook.send(&notification).await {
                error!(
                    bundle = index,
                    resource = %id.name,
                    namespace = %id.namespace,
                    kind = %id.kind,
                    step = "webhook",
                    error = %e,
                    "webhook failed"
                );
                clean = false;
            }
        }

        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        HttpMethod, KubernetesConfig, LoggingConfig, OutputConfig, RequestConfig, ResourceConfig,
        ResourceType, RetryConfig, WatchConfig, WatchMethod,
    };
    use crate::kubernetes::resource::{ResourceId, ResourceKind, Snapshot};
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bundle(name: &str, value: Option<&str>) -> LabelConfig {
        LabelConfig {
            name: name.into(),
            value: value.map(Into::into),
            script: None,
            request: None,
        }
    }

    fn webhook_request(url: String) -> RequestConfig {
        RequestConfig {
            url,
            method: HttpMethod::Post,
            timeout: 5.0,
            retry: RetryConfig {
                total: 0,
                ..Default::default()
            },
            auth: None,
            skip_tls_verify: false,
        }
    }

    fn make_dispatcher(
        folder: &Path,
        labels: Vec<LabelConfig>,
        ignore_processed: bool,
    ) -> Dispatcher {
        let cfg = Config {
            output: OutputConfig {
                folder: folder.to_path_buf(),
                folder_annotation: "k8s-sidecar-target-directory".into(),
                unique_filenames: false,
                default_file_mode: "644".into(),
            },
            kubernetes: KubernetesConfig::default(),
            resources: ResourceConfig {
                kind: ResourceType::Both,
                method: WatchMethod::Watch,
                watch_config: WatchConfig {
                    ignore_processed,
                    ..Default::default()
                },
                labels,
            },
            logging: LoggingConfig::default(),
        };
        let matcher = Matcher::new(&cfg.resources.labels);
        Dispatcher::new(&cfg, matcher).expect("dispatcher")
    }

    fn make_snapshot(
        name: &str,
        resource_version: &str,
        labels: &[(&str, &str)],
        payload: &[(&str, &[u8])],
    ) -> Snapshot {
        Snapshot {
            id: ResourceId {
                kind: ResourceKind::ConfigMap,
                namespace: "default".into(),
                name: name.into(),
            },
            resource_version: resource_version.into(),
            payload: payload
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_apply_materializes_payload() {
        let dir = TempDir::new().expect("tempdir");
        let dispatcher = make_dispatcher(dir.path(), vec![bundle("app", Some("myapp"))], false);
        let snapshot = make_snapshot(
            "cfg",
            "1",
            &[("app", "myapp")],
            &[("a.txt", b"hello"), ("b.txt", b"world")],
        );

        dispatcher.dispatch(ResourceEvent::Applied(snapshot)).await;

        let base = dir.path().join("default/cfg");
        assert_eq!(std::fs::read(base.join("a.txt")).expect("read a"), b"hello");
        assert_eq!(std::fs::read(base.join("b.txt")).expect("read b"), b"world");
    }

    #[tokio::test]
    async fn test_unmatched_resource_is_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let dispatcher = make_dispatcher(dir.path(), vec![bundle("app", Some("myapp"))], false);
        let snapshot = make_snapshot("cfg", "1", &[("app", "other")], &[("a.txt", b"hello")]);

        dispatcher.dispatch(ResourceEvent::Applied(snapshot)).await;

        assert!(!dir.path().join("default").exists());
    }

    #[tokio::test]
    async fn test_ignore_processed_suppresses_redelivery() {
        let dir = TempDir::new().expect("tempdir");
        let dispatcher = make_dispatcher(dir.path(), vec![bundle("app", None)], true);
        let snapshot = make_snapshot("cfg", "1", &[("app", "x")], &[("a.txt", b"hello")]);
        let target = dir.path().join("default/cfg/a.txt");

        dispatcher
            .dispatch(ResourceEvent::Applied(snapshot.clone()))
            .await;
        assert!(target.exists());

        std::fs::remove_file(&target).expect("remove");
        dispatcher.dispatch(ResourceEvent::Applied(snapshot)).await;
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_redelivery_reprocessed_without_ignore_processed() {
        let dir = TempDir::new().expect("tempdir");
        let dispatcher = make_dispatcher(dir.path(), vec![bundle("app", None)], false);
        let snapshot = make_snapshot("cfg", "1", &[("app", "x")], &[("a.txt", b"hello")]);
        let target = dir.path().join("default/cfg/a.txt");

        dispatcher
            .dispatch(ResourceEvent::Applied(snapshot.clone()))
            .await;
        std::fs::remove_file(&target).expect("remove");

        dispatcher.dispatch(ResourceEvent::Applied(snapshot)).await;
        assert!(target.exists());
    }

    #[tokio::test]
    async fn test_failed_step_leaves_ledger_unmarked() {
        let dir = TempDir::new().expect("tempdir");
        let mut failing = bundle("app", None);
        failing.script = Some(ScriptConfig {
            path: "exit 1".into(),
            timeout: 0,
        });
        let dispatcher = make_dispatcher(dir.path(), vec![failing], true);
        let snapshot = make_snapshot("cfg", "1", &[("app", "x")], &[("a.txt", b"hello")]);
        let target = dir.path().join("default/cfg/a.txt");

        dispatcher
            .dispatch(ResourceEvent::Applied(snapshot.clone()))
            .await;
        assert!(target.exists());

        // the failed cycle must not be deduplicated away
        std::fs::remove_file(&target).expect("remove");
        dispatcher.dispatch(ResourceEvent::Applied(snapshot)).await;
        assert!(target.exists());
    }

    #[tokio::test]
    async fn test_bundle_failure_does_not_block_siblings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().expect("tempdir");
        let mut failing = bundle("app", None);
        failing.script = Some(ScriptConfig {
            path: "exit 1".into(),
            timeout: 0,
        });
        let mut notifying = bundle("app", None);
        notifying.request = Some(webhook_request(format!("{}/hook", server.uri())));

        let dispatcher = make_dispatcher(dir.path(), vec![failing, notifying], false);
        let snapshot = make_snapshot("cfg", "1", &[("app", "x")], &[("a.txt", b"hello")]);

        dispatcher.dispatch(ResourceEvent::Applied(snapshot)).await;
        assert!(dir.path().join("default/cfg/a.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_skips_files_but_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().expect("tempdir");
        let mut notifying = bundle("app", None);
        notifying.request = Some(webhook_request(format!("{}/hook", server.uri())));
        let dispatcher = make_dispatcher(dir.path(), vec![notifying], false);
        let snapshot = make_snapshot("cfg", "2", &[("app", "x")], &[("a.txt", b"hello")]);

        dispatcher.dispatch(ResourceEvent::Deleted(snapshot)).await;
        assert!(!dir.path().join("default/cfg/a.txt").exists());
    }

    #[tokio::test]
    async fn test_webhook_fires_once_per_configured_bundle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().expect("tempdir");
        let plain = bundle("env", Some("prod"));
        let mut notifying = bundle("env", Some("prod"));
        notifying.request = Some(webhook_request(format!("{}/hook", server.uri())));

        let dispatcher = make_dispatcher(dir.path(), vec![plain, notifying], false);
        let snapshot = make_snapshot("cfg", "1", &[("env", "prod")], &[("a.txt", b"hello")]);

        dispatcher.dispatch(ResourceEvent::Applied(snapshot)).await;
        assert!(dir.path().join("default/cfg/a.txt").exists());
    }
}
