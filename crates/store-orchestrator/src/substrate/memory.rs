use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use super::{
    DeleteOutcome, Labels, NamespaceInfo, ObjectKind, Substrate, SubstrateError, WorkloadKind,
    WorkloadStatus,
};

#[derive(Debug, Clone)]
struct StoredObject {
    manifest: Value,
    ready: u32,
}

/// Call that [`InMemorySubstrate::hold`] can park until released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldCall {
    CreateObject(ObjectKind),
    DeleteNamespace,
}

#[derive(Debug, Default)]
struct Namespace {
    info: Option<NamespaceInfo>,
    objects: HashMap<(ObjectKind, String), StoredObject>,
}

/// Process-local substrate.
///
/// Keeps namespaces and objects in memory, reports workload readiness from
/// values set by the caller (or immediately, with `auto_ready`), and can be
/// told to fail specific calls.
#[derive(Debug, Default)]
pub struct InMemorySubstrate {
    namespaces: Mutex<BTreeMap<String, Namespace>>,
    auto_ready: bool,
    unreachable: AtomicBool,
    fail_delete: AtomicBool,
    fail_kind: Mutex<Option<ObjectKind>>,
    held: Mutex<Option<(HeldCall, Arc<Semaphore>)>>,
    status_reads: AtomicUsize,
}

impl InMemorySubstrate {
    /// Workloads report zero ready replicas until [`Self::set_ready`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Workloads report all desired replicas ready as soon as they exist
    pub fn auto_ready() -> Self {
        Self {
            auto_ready: true,
            ..Self::default()
        }
    }

    pub fn set_ready(&self, namespace: &str, name: &str, ready: u32) {
        let mut namespaces = self.namespaces.lock();
        if let Some(ns) = namespaces.get_mut(namespace) {
            for ((kind, obj_name), obj) in ns.objects.iter_mut() {
                if obj_name == name
                    && matches!(kind, ObjectKind::StatefulSet | ObjectKind::Deployment)
                {
                    obj.ready = ready;
                }
            }
        }
    }

    /// Mark both workloads of every namespace ready
    pub fn set_all_ready(&self) {
        let mut namespaces = self.namespaces.lock();
        for ns in namespaces.values_mut() {
            for ((kind, _), obj) in ns.objects.iter_mut() {
                if matches!(kind, ObjectKind::StatefulSet | ObjectKind::Deployment) {
                    obj.ready = desired_replicas(&obj.manifest);
                }
            }
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Make every `create_object` of `kind` fail
    pub fn fail_on(&self, kind: Option<ObjectKind>) {
        *self.fail_kind.lock() = kind;
    }

    /// Park every matching call until [`Self::release`]
    pub fn hold(&self, call: HeldCall) {
        *self.held.lock() = Some((call, Arc::new(Semaphore::new(0))));
    }

    /// Let parked and future calls through
    pub fn release(&self) {
        if let Some((_, gate)) = self.held.lock().take() {
            gate.close();
        }
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.lock().contains_key(name)
    }

    pub fn object(&self, namespace: &str, kind: ObjectKind, name: &str) -> Option<Value> {
        self.namespaces
            .lock()
            .get(namespace)?
            .objects
            .get(&(kind, name.to_string()))
            .map(|o| o.manifest.clone())
    }

    pub fn object_count(&self, namespace: &str) -> usize {
        self.namespaces
            .lock()
            .get(namespace)
            .map(|ns| ns.objects.len())
            .unwrap_or(0)
    }

    /// Insert a namespace as if created by an earlier process
    pub fn seed_namespace(&self, name: &str, labels: Labels) {
        self.namespaces.lock().insert(
            name.to_string(),
            Namespace {
                info: Some(NamespaceInfo {
                    name: name.to_string(),
                    labels,
                    created_at: Some(Utc::now()),
                    terminating: false,
                }),
                objects: HashMap::new(),
            },
        );
    }

    /// Insert a workload with fixed replica counts
    pub fn seed_workload(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
        status: WorkloadStatus,
    ) {
        let mut namespaces = self.namespaces.lock();
        let ns = namespaces.entry(namespace.to_string()).or_default();
        ns.objects.insert(
            (kind.object_kind(), name.to_string()),
            StoredObject {
                manifest: serde_json::json!({ "spec": { "replicas": status.desired } }),
                ready: status.ready,
            },
        );
    }

    async fn wait_if_held(&self, call: HeldCall) {
        let gate = self
            .held
            .lock()
            .as_ref()
            .filter(|(held, _)| *held == call)
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            // Closed on release
            let _ = gate.acquire().await;
        }
    }

    fn check_reachable(&self) -> Result<(), SubstrateError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SubstrateError::Unreachable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

fn desired_replicas(manifest: &Value) -> u32 {
    manifest["spec"]["replicas"].as_u64().unwrap_or(1) as u32
}

fn object_name(manifest: &Value) -> Result<String, SubstrateError> {
    manifest["metadata"]["name"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SubstrateError::Decode("manifest without metadata.name".to_string()))
}

#[async_trait]
impl Substrate for InMemorySubstrate {
    async fn read_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, SubstrateError> {
        self.check_reachable()?;
        Ok(self
            .namespaces
            .lock()
            .get(name)
            .and_then(|ns| ns.info.clone()))
    }

    async fn create_namespace(&self, name: &str, labels: &Labels) -> Result<(), SubstrateError> {
        self.check_reachable()?;
        let mut namespaces = self.namespaces.lock();
        if namespaces.get(name).is_some_and(|ns| ns.info.is_some()) {
            return Err(SubstrateError::AlreadyExists {
                kind: "Namespace",
                name: name.to_string(),
            });
        }
        let ns = namespaces.entry(name.to_string()).or_default();
        ns.info = Some(NamespaceInfo {
            name: name.to_string(),
            labels: labels.clone(),
            created_at: Some(Utc::now()),
            terminating: false,
        });
        debug!(namespace = name, "namespace created");
        Ok(())
    }

    async fn create_object(
        &self,
        namespace: &str,
        kind: ObjectKind,
        manifest: Value,
    ) -> Result<(), SubstrateError> {
        self.wait_if_held(HeldCall::CreateObject(kind)).await;
        self.check_reachable()?;
        if *self.fail_kind.lock() == Some(kind) {
            return Err(SubstrateError::Api {
                status: 422,
                message: format!("{} rejected", kind),
            });
        }

        let name = object_name(&manifest)?;
        let mut namespaces = self.namespaces.lock();
        let ns = namespaces
            .get_mut(namespace)
            .filter(|ns| ns.info.is_some())
            .ok_or_else(|| SubstrateError::NotFound {
                kind: "Namespace",
                name: namespace.to_string(),
            })?;

        let key = (kind, name.clone());
        if ns.objects.contains_key(&key) {
            return Err(SubstrateError::AlreadyExists {
                kind: kind.as_str(),
                name,
            });
        }

        let ready = if self.auto_ready {
            desired_replicas(&manifest)
        } else {
            0
        };
        ns.objects.insert(key, StoredObject { manifest, ready });
        Ok(())
    }

    async fn read_workload_status(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<WorkloadStatus, SubstrateError> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let namespaces = self.namespaces.lock();
        let obj = namespaces
            .get(namespace)
            .and_then(|ns| ns.objects.get(&(kind.object_kind(), name.to_string())))
            .ok_or_else(|| SubstrateError::NotFound {
                kind: kind.object_kind().as_str(),
                name: name.to_string(),
            })?;

        Ok(WorkloadStatus {
            desired: desired_replicas(&obj.manifest),
            ready: obj.ready,
        })
    }

    async fn list_namespaces(
        &self,
        selector: &Labels,
    ) -> Result<Vec<NamespaceInfo>, SubstrateError> {
        self.check_reachable()?;
        Ok(self
            .namespaces
            .lock()
            .values()
            .filter_map(|ns| ns.info.clone())
            .filter(|info| {
                selector
                    .iter()
                    .all(|(k, v)| info.labels.get(k).is_some_and(|val| val == v))
            })
            .collect())
    }

    async fn delete_namespace(&self, name: &str) -> Result<DeleteOutcome, SubstrateError> {
        self.wait_if_held(HeldCall::DeleteNamespace).await;
        self.check_reachable()?;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SubstrateError::Api {
                status: 500,
                message: "internal error".to_string(),
            });
        }

        match self.namespaces.lock().remove(name) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }
}
