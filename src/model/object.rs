//! The `Object` record, its `ObjectType`/`ObjectStatus` enums, and the
//! basename helpers ("names") used to resolve item filenames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    hash::ContentHash,
    model::{manifest::Manifest, meta::Meta},
};

/// Coarse content classification carried on `Object` and `ItemMeta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Image,
    Video,
    Audio,
    Other,
    Htmlarch,
}

impl ObjectType {
    pub fn is_image(&self) -> bool {
        matches!(self, ObjectType::Image)
    }

    /// Best-effort classification from a detected content type.
    pub fn from_content_type(content_type: &str) -> ObjectType {
        if let Some(prefix) = content_type.split('/').next() {
            match prefix {
                "image" => return ObjectType::Image,
                "video" => return ObjectType::Video,
                "audio" => return ObjectType::Audio,
                _ => {}
            }
        }
        if content_type == "text/html" || content_type == "application/zip" {
            return ObjectType::Htmlarch;
        }
        ObjectType::Other
    }
}

impl Default for ObjectType {
    fn default() -> Self {
        ObjectType::Other
    }
}

/// Derived (never stored) status of an object relative to its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectStatus {
    Undefined,
    Processing,
    Ok,
    Error,
    NotFound,
}

impl ObjectStatus {
    /// Merge two statuses, keeping whichever is "more important" — an
    /// error always wins over processing, which wins over ok, matching
    /// the original program's priority-merge logic used when multiple
    /// task outcomes are folded into one object status.
    pub fn merge(self, other: ObjectStatus) -> ObjectStatus {
        fn rank(s: ObjectStatus) -> u8 {
            match s {
                ObjectStatus::NotFound => 4,
                ObjectStatus::Error => 3,
                ObjectStatus::Processing => 2,
                ObjectStatus::Undefined => 1,
                ObjectStatus::Ok => 0,
            }
        }
        if rank(other) > rank(self) { other } else { self }
    }
}

/// True when `name` denotes the original item (invariant §3: original
/// names `""`, `"@"`, `"original"`, `"original.*"`).
pub fn is_original_name(name: &str) -> bool {
    name.is_empty() || name == "@" || name == "original" || name.starts_with("original.")
}

/// The on-disk/on-key basename for the original item given its content
/// type extension.
pub fn original_filename(ext: &str) -> String {
    format!("original.{ext}")
}

/// The on-disk/on-key basename for a derived item.
pub fn source_filename(name: &str, ext: &str) -> String {
    if ext.is_empty() {
        name.to_string()
    } else {
        format!("{name}.{ext}")
    }
}

/// The unit of storage: identity `bucket + "/" + path`, one original
/// binary, zero or more derived items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub bucket: String,
    pub path: String,
    pub hash_id: ContentHash,
    pub content_type: String,
    pub object_type: ObjectType,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub meta: Meta,
    pub manifest: Manifest,
}

impl Object {
    /// `bucket + "/" + path`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.bucket, self.path)
    }

    /// An object is consistent when its meta ledger matches the manifest
    /// version, every task is processing-complete, there are no excess
    /// items, and invariant 6 holds — see `Meta::is_consistent`.
    pub fn is_consistent(&self) -> bool {
        self.meta.is_consistent(&self.manifest)
    }

    pub fn status(&self) -> ObjectStatus {
        self.meta.derive_status(&self.manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_original_name_variants() {
        for name in ["", "@", "original", "original.jpg", "original.png"] {
            assert!(is_original_name(name), "{name} should be original");
        }
        assert!(!is_original_name("small"));
        assert!(!is_original_name("small.jpg"));
    }

    #[test]
    fn status_merge_prefers_error_over_processing() {
        assert_eq!(
            ObjectStatus::Processing.merge(ObjectStatus::Error),
            ObjectStatus::Error
        );
        assert_eq!(ObjectStatus::Ok.merge(ObjectStatus::Ok), ObjectStatus::Ok);
    }

    #[test]
    fn classifies_content_type() {
        assert_eq!(ObjectType::from_content_type("image/png"), ObjectType::Image);
        assert_eq!(ObjectType::from_content_type("video/mp4"), ObjectType::Video);
        assert_eq!(ObjectType::from_content_type("text/plain"), ObjectType::Other);
    }
}
