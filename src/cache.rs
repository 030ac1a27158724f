//! Root index: package hash → candidate loaders.
//!
//! Two maps keyed by the hash of the package prefix of a name, one for
//! `.class` entries and one for everything else. Buckets hold loader ids in
//! realization order, which is search order, and only ever grow. Each
//! loader's name filter is kept next to the maps so candidates can be
//! rejected before any loader is touched.
//!
//! Writers (root realization) take the write lock only to merge one loader's
//! data. Readers snapshot a bucket under the read lock and query loaders
//! after releasing it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::index::IndexData;
use crate::names::{is_class_entry, package_hash};

/// Position of a loader in the class path's append-only loader list.
pub type LoaderId = usize;

type Bucket = SmallVec<[LoaderId; 2]>;

#[derive(Debug, Clone, Default)]
pub struct Candidates {
    /// Loaders that may hold the name, in search order.
    pub ids: SmallVec<[LoaderId; 4]>,
    /// Number of leading loaders the index accounts for. Loaders at or
    /// beyond this position have not been merged yet.
    pub covered: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexStats {
    pub indexed_loaders: usize,
    pub unindexed_loaders: usize,
    pub class_packages: usize,
    pub resource_packages: usize,
}

#[derive(Debug, Default)]
struct Maps {
    class_packages: HashMap<i32, Bucket>,
    resource_packages: HashMap<i32, Bucket>,
    data: Vec<Option<Arc<IndexData>>>,
    /// Loaders whose index could not be built; always candidates.
    unindexed: Vec<LoaderId>,
}

#[derive(Debug, Default)]
pub struct RootIndex {
    maps: RwLock<Maps>,
}

impl RootIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges loader `id`. Ids must arrive in order, each exactly once.
    pub fn apply_loader_data(&self, id: LoaderId, data: Option<Arc<IndexData>>) {
        let mut maps = self.maps.write();
        debug_assert_eq!(id, maps.data.len(), "loaders must be indexed in order");

        match data.as_deref() {
            Some(index) => {
                for hash in &index.class_package_hashes {
                    push_unique(maps.class_packages.entry(*hash).or_default(), id);
                }
                for hash in &index.resource_package_hashes {
                    push_unique(maps.resource_packages.entry(*hash).or_default(), id);
                }
            }
            None => maps.unindexed.push(id),
        }
        maps.data.push(data);
    }

    pub fn candidates(&self, name: &str) -> Candidates {
        let hash = package_hash(name);
        let maps = self.maps.read();
        let bucket = if is_class_entry(name) {
            maps.class_packages.get(&hash)
        } else {
            maps.resource_packages.get(&hash)
        };

        let mut ids: SmallVec<[LoaderId; 4]> = bucket
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| {
                maps.data[*id]
                    .as_ref()
                    .is_none_or(|data| data.might_contain(name))
            })
            .collect();
        if !maps.unindexed.is_empty() {
            ids.extend(maps.unindexed.iter().copied());
            ids.sort_unstable();
        }

        Candidates {
            ids,
            covered: maps.data.len(),
        }
    }

    pub fn stats(&self) -> IndexStats {
        let maps = self.maps.read();
        IndexStats {
            indexed_loaders: maps.data.len() - maps.unindexed.len(),
            unindexed_loaders: maps.unindexed.len(),
            class_packages: maps.class_packages.len(),
            resource_packages: maps.resource_packages.len(),
        }
    }
}

fn push_unique(bucket: &mut Bucket, id: LoaderId) {
    debug_assert!(!bucket.contains(&id), "loader {id} inserted twice");
    bucket.push(id);
}
