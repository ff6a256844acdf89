//! Filesystem storage backend: one directory per object
//! (`<root>/<bucket>/<path>/`), holding `original.<ext>`, derived
//! `<name>.<ext>` files, `meta.json`, and a bucket-level `manifest.json`.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;

use crate::{
    errors::StoreError,
    hash::ContentHash,
    model::{
        Manifest, Object,
        manifest::Stage,
        meta::{ItemMeta, Meta},
        object::{ObjectStatus, ObjectType, is_original_name, original_filename, source_filename},
    },
    storage::{CreateParams, StorageDriver, path::PathChecker, path::PathGenerator},
};

const MANIFEST_FILE: &str = "manifest.json";
const META_FILE: &str = "meta.json";

pub struct FsDriver {
    root: PathBuf,
    path_generator: PathGenerator,
}

impl FsDriver {
    pub fn new(root: impl Into<PathBuf>, path_generator: PathGenerator) -> Self {
        Self {
            root: root.into(),
            path_generator,
        }
    }

    fn object_dir(&self, bucket: &str, path: &str) -> PathBuf {
        self.root.join(bucket).join(path)
    }

    fn manifest_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket).join(MANIFEST_FILE)
    }

    fn meta_path(&self, bucket: &str, path: &str) -> PathBuf {
        self.object_dir(bucket, path).join(META_FILE)
    }

    fn load_meta(&self, bucket: &str, path: &str) -> Result<Option<Meta>, StoreError> {
        let p = self.meta_path(bucket, path);
        if !p.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&p)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save_meta(&self, bucket: &str, path: &str, meta: &mut Meta) -> Result<(), StoreError> {
        meta.updated_at = Utc::now();
        let dir = self.object_dir(bucket, path);
        fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec_pretty(meta)?;
        fs::write(self.meta_path(bucket, path), bytes)?;
        Ok(())
    }

    fn resolve_basename(&self, object: &Object, name: &str) -> Result<String, StoreError> {
        if is_original_name(name) {
            return Ok(original_filename(&object.meta.main.name_ext));
        }
        let task = object
            .manifest
            .all_tasks()
            .find(|t| t.target == name)
            .ok_or_else(|| StoreError::MissingSource(name.to_string(), object.id()))?;
        let item = object
            .meta
            .item_by_name(&task.target)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(item.fullname())
    }
}

struct FsPathChecker<'a> {
    root: &'a Path,
    bucket: &'a str,
}

impl PathChecker for FsPathChecker<'_> {
    fn is_free(&self, candidate: &str) -> bool {
        !self.root.join(self.bucket).join(candidate).exists()
    }
}

impl StorageDriver for FsDriver {
    fn read_manifest(&self, bucket: &str) -> Result<Manifest, StoreError> {
        let path = self.manifest_path(bucket);
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn update_manifest(&self, bucket: &str, manifest: &Manifest) -> Result<(), StoreError> {
        let dir = self.root.join(bucket);
        fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec_pretty(manifest)?;
        fs::write(self.manifest_path(bucket), bytes)?;
        Ok(())
    }

    fn create(
        &self,
        bucket: &str,
        id: Option<&str>,
        overwrite: bool,
        params: &CreateParams,
    ) -> Result<Object, StoreError> {
        let path = match id {
            Some(custom) => {
                let dir = self.object_dir(bucket, custom);
                if dir.exists() && !overwrite {
                    return Err(StoreError::CustomIdInUse(custom.to_string()));
                }
                custom.to_string()
            }
            None => {
                let checker = FsPathChecker { root: &self.root, bucket };
                self.path_generator.generate(&checker)?
            }
        };

        if overwrite {
            let dir = self.object_dir(bucket, &path);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
        }

        let manifest = self.read_manifest(bucket)?;
        let now = Utc::now();
        let mut main = ItemMeta::new("main");
        main.updated_at = now;
        let mut meta = Meta::new(main);
        meta.tags = params.tags.clone();
        meta.manifest_version = manifest.version.clone();
        meta.created_at = now;
        self.save_meta(bucket, &path, &mut meta)?;

        Ok(Object {
            bucket: bucket.to_string(),
            path,
            hash_id: ContentHash::ZERO,
            content_type: String::new(),
            object_type: ObjectType::Other,
            size: 0,
            created_at: now,
            updated_at: now,
            meta,
            manifest,
        })
    }

    fn open(&self, id: &str) -> Result<Object, StoreError> {
        let (bucket, path) = id
            .split_once('/')
            .ok_or_else(|| StoreError::InvalidId(id.to_string()))?;
        let dir = self.object_dir(bucket, path);
        let fs_meta = fs::metadata(&dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::from(e)
            }
        })?;
        if !fs_meta.is_dir() {
            return Err(StoreError::InvalidPath(id.to_string()));
        }
        let manifest = self.read_manifest(bucket)?;
        let meta = self.load_meta(bucket, path)?.unwrap_or_else(|| Meta::new(ItemMeta::new("main")));
        let created_at = meta.created_at;
        let updated_at = meta.updated_at;
        Ok(Object {
            bucket: bucket.to_string(),
            path: path.to_string(),
            hash_id: meta.main.hash_id,
            content_type: meta.main.content_type.clone(),
            object_type: meta.main.object_type,
            size: meta.main.size,
            created_at,
            updated_at,
            meta,
            manifest,
        })
    }

    fn read(&self, object: &Object, name: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        let basename = self.resolve_basename(object, name)?;
        let full = self.object_dir(&object.bucket, &object.path).join(&basename);
        let file = fs::File::open(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(format!("{}/{}", object.id(), name))
            } else {
                StoreError::from(e)
            }
        })?;
        Ok(Box::new(file))
    }

    fn update(
        &self,
        object: &mut Object,
        name: &str,
        reader: &mut dyn Read,
        meta: Option<&ItemMeta>,
    ) -> Result<(), StoreError> {
        let mut head = [0u8; 64];
        let n = {
            let mut total = 0;
            loop {
                let read = reader.read(&mut head[total..])?;
                if read == 0 {
                    break;
                }
                total += read;
                if total == head.len() {
                    break;
                }
            }
            total
        };
        let content_type = crate::utils::sniff_content_type(&head[..n]);
        if is_original_name(name)
            && !crate::utils::content_type_allowed(&object.manifest.content_types, content_type)
        {
            return Err(StoreError::UnsupportedContentType(content_type.to_string()));
        }
        let ext = crate::utils::extension_for_content_type(content_type);
        let basename = if is_original_name(name) {
            original_filename(ext)
        } else {
            source_filename(name, ext)
        };

        let dir = self.object_dir(&object.bucket, &object.path);
        fs::create_dir_all(&dir)?;
        let full = dir.join(&basename);
        let mut file = fs::File::create(&full)?;
        let mut hasher = crate::hash::HashingWriter::new(&mut file);
        hasher.write_all(&head[..n])?;
        let mut size = n as u64;
        let mut buf = [0u8; 8192];
        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.write_all(&buf[..read])?;
            size += read as u64;
        }
        let (_, hash_id) = hasher.finalize();

        let now = Utc::now();
        if is_original_name(name) {
            object.meta.main.content_type = content_type.to_string();
            object.meta.main.object_type = ObjectType::from_content_type(content_type);
            object.meta.main.name_ext = ext.to_string();
            object.meta.main.hash_id = hash_id;
            object.meta.main.size = size;
            object.meta.main.updated_at = now;
            if let Some(m) = meta {
                object.meta.main.width = m.width;
                object.meta.main.height = m.height;
            }
            object.hash_id = hash_id;
            object.content_type = content_type.to_string();
            object.object_type = object.meta.main.object_type;
            object.size = size;
        } else {
            let item = object.meta.find_or_create_item(name);
            item.content_type = content_type.to_string();
            item.object_type = ObjectType::from_content_type(content_type);
            item.name_ext = ext.to_string();
            item.hash_id = hash_id;
            item.size = size;
            item.updated_at = now;
            if let Some(m) = meta {
                item.width = m.width;
                item.height = m.height;
                item.ext = m.ext.clone();
            }
        }
        object.updated_at = now;
        self.save_meta(&object.bucket, &object.path, &mut object.meta)?;
        Ok(())
    }

    fn update_meta(&self, object: &mut Object, name: &str, meta: &ItemMeta) -> Result<(), StoreError> {
        if is_original_name(name) {
            object.meta.main = meta.clone();
        } else {
            *object.meta.find_or_create_item(name) = meta.clone();
        }
        object.updated_at = Utc::now();
        self.save_meta(&object.bucket, &object.path, &mut object.meta)?;
        Ok(())
    }

    fn clean(&self, object: &mut Object) -> Result<(), StoreError> {
        let dir = self.object_dir(&object.bucket, &object.path);
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    continue;
                }
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                if file_name == META_FILE || file_name.starts_with("original.") {
                    continue;
                }
                fs::remove_file(entry.path())?;
            }
        }
        object.meta.items.clear();
        object.meta.reset_completion();
        self.save_meta(&object.bucket, &object.path, &mut object.meta)?;
        Ok(())
    }

    fn remove(&self, object: &Object, names: &[String]) -> Result<(), StoreError> {
        let dir = self.object_dir(&object.bucket, &object.path);
        if names.is_empty() {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            let mut cur = dir.as_path();
            while let Some(parent) = cur.parent() {
                if parent == self.root || !parent.starts_with(&self.root) {
                    break;
                }
                if fs::read_dir(parent).map(|mut it| it.next().is_none()).unwrap_or(false) {
                    if fs::remove_dir(parent).is_err() {
                        break;
                    }
                    cur = parent;
                } else {
                    break;
                }
            }
            return Ok(());
        }
        for name in names {
            let basename = self.resolve_basename(object, name).unwrap_or_else(|_| name.clone());
            let full = dir.join(&basename);
            if full.exists() {
                fs::remove_file(&full)?;
            }
        }
        Ok(())
    }
}

/// Derive the bucket-level processing status for logging/diagnostics —
/// not part of the trait contract, used by the CLI's `get-manifest`.
pub fn summarize_stages(manifest: &Manifest) -> Vec<(&str, usize)> {
    manifest
        .stages
        .iter()
        .map(|s: &Stage| (s.name.as_str(), s.tasks.len()))
        .collect()
}

pub fn default_status_for_empty_manifest() -> ObjectStatus {
    ObjectStatus::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::path::PathGenerator;
    use tempfile::tempdir;

    fn driver() -> (tempfile::TempDir, FsDriver) {
        let dir = tempdir().unwrap();
        let driver = FsDriver::new(dir.path(), PathGenerator::new("fixed/path", 5));
        (dir, driver)
    }

    #[test]
    fn create_then_open_round_trips() {
        let (_tmp, driver) = driver();
        let created = driver.create("bucket", None, false, &CreateParams::default()).unwrap();
        let opened = driver.open(&created.id()).unwrap();
        assert_eq!(opened.path, created.path);
    }

    #[test]
    fn create_with_custom_id_then_duplicate_rejected() {
        let (_tmp, driver) = driver();
        driver.create("bucket", Some("custom/one"), false, &CreateParams::default()).unwrap();
        let err = driver.create("bucket", Some("custom/one"), false, &CreateParams::default());
        assert!(matches!(err, Err(StoreError::CustomIdInUse(_))));
    }

    #[test]
    fn update_then_read_original_round_trips() {
        let (_tmp, driver) = driver();
        let mut obj = driver.create("bucket", Some("custom/two"), false, &CreateParams::default()).unwrap();
        let data = vec![0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4];
        driver.update(&mut obj, "", &mut data.as_slice(), None).unwrap();
        assert_eq!(obj.content_type, "image/jpeg");
        let mut out = Vec::new();
        driver.read(&obj, "").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn remove_whole_object_prunes_empty_ancestor_dirs() {
        let (_tmp, driver) = driver();
        let obj = driver.create("bucket", Some("a/b/c"), false, &CreateParams::default()).unwrap();
        let dir = driver.object_dir("bucket", "a/b/c");
        assert!(dir.exists());
        driver.remove(&obj, &[]).unwrap();
        assert!(!dir.exists());
    }
}
