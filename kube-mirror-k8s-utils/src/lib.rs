use std::fmt::Debug;
use std::hash::Hash;

use futures::{Stream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::serde::de::DeserializeOwned;
use kube::api::ListParams;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Resource};

/// A watch event reduced to the two transitions downstream consumers
/// act on. Bookkeeping markers around the initial list are dropped.
#[derive(Debug, Clone)]
pub enum ObjectEvent<K> {
    Applied(K),
    Deleted(K),
}

pub fn flatten<K>(event: watcher::Event<K>) -> Option<ObjectEvent<K>> {
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
            Some(ObjectEvent::Applied(obj))
        }
        watcher::Event::Delete(obj) => Some(ObjectEvent::Deleted(obj)),
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

/// Continuous list+watch over one api scope with the default backoff
/// applied on desync. Errors stay in the stream so callers can apply
/// their own throttling on top.
pub fn watch_objects<K>(
    api: Api<K>,
    config: watcher::Config,
) -> impl Stream<Item = Result<ObjectEvent<K>, watcher::Error>>
where
    K: Resource + Send + Clone + Debug + DeserializeOwned + Sync + 'static,
    <K as Resource>::DynamicType: Default + Eq + Send + Hash + Clone,
{
    watcher(api, config)
        .default_backoff()
        .filter_map(|res| async move {
            match res {
                Ok(event) => flatten(event).map(Ok),
                Err(e) => Some(Err(e)),
            }
        })
}

pub async fn list_objects<K>(api: &Api<K>, params: &ListParams) -> Result<Vec<K>, kube::Error>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    Ok(api.list(params).await?.items)
}

/// Api scoped to one namespace, or cluster-wide when none is given.
pub fn namespaced_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}
