use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::command::{Command, ErrorReason, Response};
use crate::managed_ocs::ManagedOcs;
use crate::meta::{ObjectKey, Resource};
use crate::storage_cluster::StorageCluster;
use crate::store::Event;

/// In-memory object state. Mutated only through [`StoreState::apply`].
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    managed_ocs: HashMap<ObjectKey, ManagedOcs>,
    storage_clusters: HashMap<ObjectKey, StorageCluster>,
    /// Last resource version handed out. Shared by all kinds.
    resource_version: u64,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource_version(&self) -> u64 {
        self.resource_version
    }

    // =========================================================================
    // ManagedOCS queries
    // =========================================================================

    pub fn get_managed_ocs(&self, key: &ObjectKey) -> Option<&ManagedOcs> {
        self.managed_ocs.get(key)
    }

    /// List ManagedOCS objects, sorted by key.
    pub fn list_managed_ocs(&self, namespace: Option<&str>) -> Vec<&ManagedOcs> {
        list_sorted(&self.managed_ocs, namespace)
    }

    // =========================================================================
    // StorageCluster queries
    // =========================================================================

    pub fn get_storage_cluster(&self, key: &ObjectKey) -> Option<&StorageCluster> {
        self.storage_clusters.get(key)
    }

    /// List StorageCluster objects, sorted by key.
    pub fn list_storage_clusters(&self, namespace: Option<&str>) -> Vec<&StorageCluster> {
        list_sorted(&self.storage_clusters, namespace)
    }

    /// Apply a command, returning the response and the events it produced.
    ///
    /// Writes that change nothing succeed without bumping the resource
    /// version and without emitting events.
    pub fn apply(&mut self, cmd: Command) -> (Response, Vec<Event>) {
        match cmd {
            Command::CreateManagedOcs {
                uid,
                timestamp,
                object,
            } => match create_object(
                &mut self.managed_ocs,
                &mut self.resource_version,
                object,
                uid,
                timestamp,
            ) {
                Ok(created) => (
                    Response::ManagedOcs(created.clone()),
                    vec![Event::ManagedOcsCreated(created)],
                ),
                Err(response) => (response, vec![]),
            },

            Command::UpdateManagedOcs { object } => {
                match update_object(&mut self.managed_ocs, &mut self.resource_version, object) {
                    Ok(Written::Changed { old, new }) => (
                        Response::ManagedOcs(new.clone()),
                        vec![Event::ManagedOcsUpdated {
                            key: new.key(),
                            old,
                            new,
                        }],
                    ),
                    Ok(Written::Unchanged(current)) => (Response::ManagedOcs(current), vec![]),
                    Err(response) => (response, vec![]),
                }
            }

            Command::UpdateManagedOcsStatus { object } => self.update_managed_ocs_status(object),

            Command::DeleteManagedOcs { key } => match self.managed_ocs.remove(&key) {
                Some(deleted) => (
                    Response::Deleted { key },
                    vec![Event::ManagedOcsDeleted(deleted)],
                ),
                None => (not_found::<ManagedOcs>(&key), vec![]),
            },

            Command::CreateStorageCluster {
                uid,
                timestamp,
                object,
            } => match create_object(
                &mut self.storage_clusters,
                &mut self.resource_version,
                object,
                uid,
                timestamp,
            ) {
                Ok(created) => (
                    Response::StorageCluster(created.clone()),
                    vec![Event::StorageClusterCreated(created)],
                ),
                Err(response) => (response, vec![]),
            },

            Command::UpdateStorageCluster { object } => {
                match update_object(
                    &mut self.storage_clusters,
                    &mut self.resource_version,
                    object,
                ) {
                    Ok(Written::Changed { old, new }) => (
                        Response::StorageCluster(new.clone()),
                        vec![Event::StorageClusterUpdated {
                            key: new.key(),
                            old,
                            new,
                        }],
                    ),
                    Ok(Written::Unchanged(current)) => (Response::StorageCluster(current), vec![]),
                    Err(response) => (response, vec![]),
                }
            }

            Command::DeleteStorageCluster { key } => match self.storage_clusters.remove(&key) {
                Some(deleted) => (
                    Response::Deleted { key },
                    vec![Event::StorageClusterDeleted(deleted)],
                ),
                None => (not_found::<StorageCluster>(&key), vec![]),
            },
        }
    }

    fn update_managed_ocs_status(&mut self, object: ManagedOcs) -> (Response, Vec<Event>) {
        let key = object.key();
        let Some(current) = self.managed_ocs.get_mut(&key) else {
            return (not_found::<ManagedOcs>(&key), vec![]);
        };
        if let Err(response) = check_version(current, &object) {
            return (response, vec![]);
        }
        if current.status == object.status {
            return (Response::ManagedOcs(current.clone()), vec![]);
        }

        let old = current.clone();
        self.resource_version += 1;
        current.status = object.status;
        current.metadata.resource_version = self.resource_version;
        let new = current.clone();

        (
            Response::ManagedOcs(new.clone()),
            vec![Event::ManagedOcsStatusUpdated { key, old, new }],
        )
    }
}

enum Written<T> {
    Changed { old: T, new: T },
    Unchanged(T),
}

fn list_sorted<'a, T: Resource>(
    objects: &'a HashMap<ObjectKey, T>,
    namespace: Option<&str>,
) -> Vec<&'a T> {
    let mut items: Vec<&T> = objects
        .values()
        .filter(|o| namespace.is_none_or(|ns| o.metadata().namespace == ns))
        .collect();
    items.sort_by(|a, b| a.key().cmp(&b.key()));
    items
}

fn not_found<T: Resource>(key: &ObjectKey) -> Response {
    Response::error(ErrorReason::NotFound, format!("{} {} not found", T::KIND, key))
}

fn check_version<T: Resource>(current: &T, requested: &T) -> Result<(), Response> {
    let expected = requested.metadata().resource_version;
    let actual = current.metadata().resource_version;
    if expected != actual {
        return Err(Response::error(
            ErrorReason::Conflict,
            format!(
                "{} {} has been modified (read version {}, current version {})",
                T::KIND,
                current.key(),
                expected,
                actual
            ),
        ));
    }
    Ok(())
}

fn create_object<T: Resource>(
    objects: &mut HashMap<ObjectKey, T>,
    resource_version: &mut u64,
    mut object: T,
    uid: Uuid,
    timestamp: DateTime<Utc>,
) -> Result<T, Response> {
    let key = object.key();
    if key.name.is_empty() || key.namespace.is_empty() {
        return Err(Response::error(
            ErrorReason::Invalid,
            format!("{} requires a name and a namespace", T::KIND),
        ));
    }
    if objects.contains_key(&key) {
        return Err(Response::error(
            ErrorReason::AlreadyExists,
            format!("{} {} already exists", T::KIND, key),
        ));
    }

    *resource_version += 1;
    let meta = object.metadata_mut();
    meta.uid = Some(uid);
    meta.generation = 1;
    meta.resource_version = *resource_version;
    meta.creation_timestamp = Some(timestamp);

    objects.insert(key, object.clone());
    Ok(object)
}

fn update_object<T: Resource>(
    objects: &mut HashMap<ObjectKey, T>,
    resource_version: &mut u64,
    object: T,
) -> Result<Written<T>, Response> {
    let key = object.key();
    let Some(current) = objects.get_mut(&key) else {
        return Err(not_found::<T>(&key));
    };
    check_version(current, &object)?;

    let spec_changed = current.spec() != object.spec();
    let labels_changed = current.metadata().labels != object.metadata().labels;
    let owners_changed =
        current.metadata().owner_references != object.metadata().owner_references;
    if !spec_changed && !labels_changed && !owners_changed {
        return Ok(Written::Unchanged(current.clone()));
    }

    let old = current.clone();
    *resource_version += 1;
    *current.spec_mut() = object.spec().clone();
    let meta = current.metadata_mut();
    meta.labels = object.metadata().labels.clone();
    meta.owner_references = object.metadata().owner_references.clone();
    meta.resource_version = *resource_version;
    if spec_changed {
        meta.generation += 1;
    }

    Ok(Written::Changed {
        old,
        new: current.clone(),
    })
}
