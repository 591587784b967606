//! Onload, Module and DaemonSet operations for MockClusterClient
//!
//! Modules and DaemonSets share one create/replace/delete implementation,
//! parameterised by the map that stores them.

use super::{key_of, MockClusterClient, MockState, ObjectKey};
use crate::error::ClusterError;
use crds::OnloadStatus;
use kube::Resource;
use std::collections::BTreeMap;

type Store<K> = fn(&mut MockState) -> &mut BTreeMap<ObjectKey, K>;

pub fn patch_onload_status(
    client: &MockClusterClient,
    namespace: &str,
    name: &str,
    status: &OnloadStatus,
) -> Result<(), ClusterError> {
    let mut state = client.state();
    let version = state.bump_version();
    let onload = state
        .onloads
        .get_mut(&(namespace.to_string(), name.to_string()))
        .ok_or_else(|| ClusterError::NotFound(format!("Onload {}/{}", namespace, name)))?;
    onload.status = Some(status.clone());
    onload.metadata.resource_version = Some(version);
    state.actions.push(format!("patch onload-status/{}/{}", namespace, name));
    Ok(())
}

pub fn create<K>(client: &MockClusterClient, obj: &K, kind: &str, store: Store<K>) -> Result<K, ClusterError>
where
    K: Resource + Clone,
{
    let key = key_of(obj);
    let mut state = client.state();
    if store(&mut *state).contains_key(&key) {
        return Err(ClusterError::Conflict(format!("{} {}/{} already exists", kind, key.0, key.1)));
    }

    let mut created = obj.clone();
    state.admit(&mut created);
    state.actions.push(format!("create {}/{}/{}", kind, key.0, key.1));
    store(&mut *state).insert(key, created.clone());
    Ok(created)
}

pub fn replace<K>(client: &MockClusterClient, obj: &K, kind: &str, store: Store<K>) -> Result<K, ClusterError>
where
    K: Resource + Clone,
{
    let key = key_of(obj);
    let mut state = client.state();
    let current_version = store(&mut *state)
        .get(&key)
        .ok_or_else(|| ClusterError::NotFound(format!("{} {}/{}", kind, key.0, key.1)))?
        .meta()
        .resource_version
        .clone();
    if obj.meta().resource_version.is_some() && obj.meta().resource_version != current_version {
        return Err(ClusterError::Conflict(format!("{} {}/{} was modified", kind, key.0, key.1)));
    }

    let mut replaced = obj.clone();
    replaced.meta_mut().resource_version = Some(state.bump_version());
    state.actions.push(format!("replace {}/{}/{}", kind, key.0, key.1));
    store(&mut *state).insert(key, replaced.clone());
    Ok(replaced)
}

pub fn delete<K>(client: &MockClusterClient, namespace: &str, name: &str, kind: &str, store: Store<K>) {
    let key = (namespace.to_string(), name.to_string());
    let mut state = client.state();
    if store(&mut *state).remove(&key).is_some() {
        state.actions.push(format!("delete {}/{}/{}", kind, namespace, name));
    }
}
