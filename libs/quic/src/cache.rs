//! Per-thread cache of persistent QUIC info, keyed by cluster name.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::cluster::ClusterInfo;
use crate::dispatcher::Dispatcher;
use crate::error::ConfigError;
use crate::persistent_info::{create_persistent_quic_info_for_cluster, PersistentQuicInfo};

/// Persistent QUIC info for every cluster a worker talks to.
pub struct PersistentQuicInfoCache {
    dispatcher: Rc<dyn Dispatcher>,
    infos: HashMap<String, PersistentQuicInfo>,
}

impl PersistentQuicInfoCache {
    pub fn new(dispatcher: Rc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            infos: HashMap::new(),
        }
    }

    /// Return the info for `cluster`, building it on first use.
    pub fn get_or_create(&mut self, cluster: &ClusterInfo) -> Result<&PersistentQuicInfo, ConfigError> {
        match self.infos.entry(cluster.name.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let info = create_persistent_quic_info_for_cluster(&self.dispatcher, cluster)?;
                Ok(entry.insert(info))
            }
        }
    }

    /// Rebuild the info for `cluster` after its descriptor changed.
    ///
    /// On error the previous info, if any, is kept.
    pub fn refresh(&mut self, cluster: &ClusterInfo) -> Result<&PersistentQuicInfo, ConfigError> {
        let info = create_persistent_quic_info_for_cluster(&self.dispatcher, cluster)?;
        debug!(cluster = %cluster.name, "Refreshed persistent QUIC info");

        match self.infos.entry(cluster.name.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(info);
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => Ok(entry.insert(info)),
        }
    }

    pub fn get(&self, cluster_name: &str) -> Option<&PersistentQuicInfo> {
        self.infos.get(cluster_name)
    }

    /// Forget a cluster. Connections already created keep working.
    pub fn remove(&mut self, cluster_name: &str) -> Option<PersistentQuicInfo> {
        self.infos.remove(cluster_name)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn dispatcher(&self) -> &Rc<dyn Dispatcher> {
        &self.dispatcher
    }
}

impl std::fmt::Debug for PersistentQuicInfoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentQuicInfoCache")
            .field("dispatcher", &self.dispatcher.id())
            .field("clusters", &self.infos.keys().collect::<Vec<_>>())
            .finish()
    }
}
