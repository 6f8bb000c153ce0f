//! Metadata store interface.
//!
//! The controller only needs a hierarchical record store: values addressed by
//! `/`-separated paths, with child listing. The production store (a
//! coordination service with watches and ephemeral nodes) lives outside this
//! crate; [`InMemoryStore`] is the embedded implementation used by the
//! runtime's bootstrap mode and by tests.
//!
//! Every mutation is published as a [`StoreChange`] to subscribers, which is
//! how cluster-change notifications reach the controllers.

use crate::core::error::{StewardError, StewardResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Hierarchical record store.
pub trait MetadataStore: Send + Sync {
    /// Read the value at `path`.
    fn get(&self, path: &str) -> StewardResult<Option<Vec<u8>>>;

    /// Write the value at `path`, creating it if needed.
    fn set(&self, path: &str, value: Vec<u8>) -> StewardResult<()>;

    /// Remove `path` and everything below it. Returns whether anything was removed.
    fn remove(&self, path: &str) -> StewardResult<bool>;

    /// Names of the immediate children of `path`, sorted.
    fn children(&self, path: &str) -> StewardResult<Vec<String>>;
}

/// Which subtree of a cluster a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    DesiredState,
    LiveInstance,
    InstanceConfig,
    ObservedState,
    Instruction,
    ErrorMarker,
    StateModel,
    Other,
}

impl ChangeKind {
    /// Classify a record path.
    pub fn from_path(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [_, "IDEALSTATES", ..] => Self::DesiredState,
            [_, "LIVEINSTANCES", ..] => Self::LiveInstance,
            [_, "CONFIGS", ..] => Self::InstanceConfig,
            [_, "STATEMODELDEFS", ..] => Self::StateModel,
            [_, "INSTANCES", _, "CURRENTSTATES", ..] => Self::ObservedState,
            [_, "INSTANCES", _, "MESSAGES", ..] => Self::Instruction,
            [_, "INSTANCES", _, "ERRORS", ..] => Self::ErrorMarker,
            _ => Self::Other,
        }
    }
}

/// A mutation published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Cluster the path belongs to.
    pub cluster: String,
    /// Full record path.
    pub path: String,
    /// Subtree classification.
    pub kind: ChangeKind,
}

impl StoreChange {
    fn for_path(path: &str) -> Self {
        let cluster = path
            .split('/')
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string();
        Self {
            cluster,
            path: path.to_string(),
            kind: ChangeKind::from_path(path),
        }
    }
}

/// Injectable store failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFault {
    /// Every operation fails with `MetadataUnavailable`.
    Unavailable,
    /// Writes and removals under the prefix fail.
    FailWrites { prefix: String },
    /// Reads sleep before answering.
    ReadDelay(Duration),
}

/// In-memory [`MetadataStore`] with change notification and fault injection.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    subscribers: RwLock<Vec<mpsc::UnboundedSender<StoreChange>>>,
    faults: RwLock<Vec<StoreFault>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every subsequent change.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Inject a fault.
    pub fn inject(&self, fault: StoreFault) {
        self.faults.write().push(fault);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.faults.write().clear();
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check_read(&self) -> StewardResult<()> {
        let delay = {
            let faults = self.faults.read();
            if faults.contains(&StoreFault::Unavailable) {
                return Err(StewardError::metadata_unavailable("store unreachable"));
            }
            faults.iter().find_map(|f| match f {
                StoreFault::ReadDelay(d) => Some(*d),
                _ => None,
            })
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn check_write(&self, path: &str) -> StewardResult<()> {
        let faults = self.faults.read();
        for fault in faults.iter() {
            match fault {
                StoreFault::Unavailable => {
                    return Err(StewardError::metadata_unavailable("store unreachable"));
                }
                StoreFault::FailWrites { prefix } if path.starts_with(prefix.as_str()) => {
                    return Err(StewardError::metadata_unavailable(format!(
                        "write rejected at {}",
                        path
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn publish(&self, path: &str) {
        let change = StoreChange::for_path(path);
        self.subscribers
            .write()
            .retain(|tx| tx.send(change.clone()).is_ok());
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl MetadataStore for InMemoryStore {
    fn get(&self, path: &str) -> StewardResult<Option<Vec<u8>>> {
        self.check_read()?;
        Ok(self.records.read().get(&normalize(path)).cloned())
    }

    fn set(&self, path: &str, value: Vec<u8>) -> StewardResult<()> {
        let path = normalize(path);
        self.check_write(&path)?;
        self.records.write().insert(path.clone(), value);
        self.publish(&path);
        Ok(())
    }

    fn remove(&self, path: &str) -> StewardResult<bool> {
        let path = normalize(path);
        self.check_write(&path)?;
        let prefix = format!("{}/", path);
        let removed = {
            let mut records = self.records.write();
            let before = records.len();
            records.retain(|k, _| *k != path && !k.starts_with(&prefix));
            before != records.len()
        };
        if removed {
            self.publish(&path);
        }
        Ok(removed)
    }

    fn children(&self, path: &str) -> StewardResult<Vec<String>> {
        self.check_read()?;
        let prefix = format!("{}/", normalize(path));
        let records = self.records.read();
        let mut names: Vec<String> = records
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split('/').next().map(String::from))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
