//! Object-record projection (§4.D): a read-through cache so `Head`/`Get`
//! can skip the storage driver for known-consistent objects. A miss is
//! never fatal — the facade always falls back to `driver.open`.

use dashmap::DashMap;

use crate::{errors::StoreError, model::Object};

pub trait Projection: Send + Sync {
    fn get(&self, id: &str) -> Option<Object>;
    fn put(&self, object: &Object);
    fn remove(&self, id: &str);
}

/// Pure in-memory projection backed by `dashmap`, used whenever no
/// `sled` path is configured.
#[derive(Default)]
pub struct MemoryProjection {
    entries: DashMap<String, Object>,
}

impl MemoryProjection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for MemoryProjection {
    fn get(&self, id: &str) -> Option<Object> {
        self.entries.get(id).map(|e| e.clone())
    }

    fn put(&self, object: &Object) {
        self.entries.insert(object.id(), object.clone());
    }

    fn remove(&self, id: &str) {
        self.entries.remove(id);
    }
}

/// `sled`-backed persistent projection: survives process restarts
/// without a cold cache, at the cost of a JSON (de)serialization round
/// trip per access.
pub struct SledProjection {
    tree: sled::Db,
}

impl SledProjection {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let tree = sled::open(path).map_err(|e| StoreError::Config(format!("opening projection store: {e}")))?;
        Ok(Self { tree })
    }
}

impl Projection for SledProjection {
    fn get(&self, id: &str) -> Option<Object> {
        let bytes = self.tree.get(id).ok().flatten()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn put(&self, object: &Object) {
        if let Ok(bytes) = serde_json::to_vec(object) {
            let _ = self.tree.insert(object.id(), bytes);
        }
    }

    fn remove(&self, id: &str) {
        let _ = self.tree.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hash::ContentHash, model::{Manifest, Meta, meta::ItemMeta, object::ObjectType}};
    use chrono::Utc;

    fn sample_object(id_path: &str) -> Object {
        let now = Utc::now();
        Object {
            bucket: "bucket".into(),
            path: id_path.into(),
            hash_id: ContentHash::ZERO,
            content_type: "image/jpeg".into(),
            object_type: ObjectType::Image,
            size: 0,
            created_at: now,
            updated_at: now,
            meta: Meta::new(ItemMeta::new("main")),
            manifest: Manifest::default(),
        }
    }

    #[test]
    fn memory_projection_round_trips() {
        let projection = MemoryProjection::new();
        let obj = sample_object("a/b");
        projection.put(&obj);
        assert!(projection.get(&obj.id()).is_some());
        projection.remove(&obj.id());
        assert!(projection.get(&obj.id()).is_none());
    }

    #[test]
    fn sled_projection_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let projection = SledProjection::open(dir.path().join("projection.sled")).unwrap();
        let obj = sample_object("a/b");
        projection.put(&obj);
        let fetched = projection.get(&obj.id()).unwrap();
        assert_eq!(fetched.path, obj.path);
    }
}
