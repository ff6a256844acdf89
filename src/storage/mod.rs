//! The pluggable storage driver contract (§4.A): filesystem and
//! S3-compatible backends, plus the shared path generator (§4.A "Path
//! generator").

pub mod fs;
pub mod path;
pub mod s3;

use std::{io::Read, str::FromStr};

use crate::{
    errors::StoreError,
    model::{Manifest, Object, meta::ItemMeta},
};

/// Parameters accepted by `StorageDriver::create`.
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    pub tags: Vec<String>,
}

/// The storage backend contract every driver (filesystem, S3-compatible)
/// must satisfy.
pub trait StorageDriver: Send + Sync {
    fn read_manifest(&self, bucket: &str) -> Result<Manifest, StoreError>;
    fn update_manifest(&self, bucket: &str, manifest: &Manifest) -> Result<(), StoreError>;

    /// Allocate a new object. If `id` is `None` a path is produced by the
    /// path generator; if `Some` and `overwrite` is false, an existing
    /// path fails with `CustomIdInUse`.
    fn create(
        &self,
        bucket: &str,
        id: Option<&str>,
        overwrite: bool,
        params: &CreateParams,
    ) -> Result<Object, StoreError>;

    fn open(&self, id: &str) -> Result<Object, StoreError>;

    fn read(&self, object: &Object, name: &str) -> Result<Box<dyn Read + Send>, StoreError>;

    fn update(
        &self,
        object: &mut Object,
        name: &str,
        reader: &mut dyn Read,
        meta: Option<&ItemMeta>,
    ) -> Result<(), StoreError>;

    fn update_meta(&self, object: &mut Object, name: &str, meta: &ItemMeta) -> Result<(), StoreError>;

    /// Delete all non-original items and reset their meta entries.
    fn clean(&self, object: &mut Object) -> Result<(), StoreError>;

    /// Delete specific items, or (when `names` is empty) the whole
    /// object and its now-empty ancestor directories/prefix.
    fn remove(&self, object: &Object, names: &[String]) -> Result<(), StoreError>;
}

/// A parsed storage URL: `fs:///abs/path` or
/// `s3://host/bucket?access=...&secret=...&region=...&insecure=...`.
#[derive(Debug, Clone)]
pub enum StorageUrl {
    Fs { root: std::path::PathBuf },
    S3 { host: String, bucket: String, access: String, secret: String, region: String, insecure: bool },
}

impl FromStr for StorageUrl {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("fs://") {
            return Ok(StorageUrl::Fs {
                root: std::path::PathBuf::from(rest),
            });
        }
        if let Some(rest) = s.strip_prefix("s3://") {
            let (authority, query) = rest.split_once('?').unwrap_or((rest, ""));
            let (host, bucket) = authority.split_once('/').unwrap_or((authority, ""));
            let mut access = String::new();
            let mut secret = String::new();
            let mut region = "us-east-1".to_string();
            let mut insecure = false;
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                if let Some((k, v)) = pair.split_once('=') {
                    match k {
                        "access" => access = v.to_string(),
                        "secret" => secret = v.to_string(),
                        "region" => region = v.to_string(),
                        "insecure" => insecure = v == "true" || v == "1",
                        _ => {}
                    }
                }
            }
            return Ok(StorageUrl::S3 {
                host: host.to_string(),
                bucket: bucket.to_string(),
                access,
                secret,
                region,
                insecure,
            });
        }
        Err(StoreError::Config(format!("unrecognized storage url: {s}")))
    }
}

/// Construct a driver from a config URL.
pub fn open_driver(url: &str, path_generator: path::PathGenerator) -> Result<Box<dyn StorageDriver>, StoreError> {
    match url.parse::<StorageUrl>()? {
        StorageUrl::Fs { root } => Ok(Box::new(fs::FsDriver::new(root, path_generator))),
        StorageUrl::S3 { host, bucket, access, secret, region, insecure } => Ok(Box::new(
            s3::S3Driver::new(host, bucket, access, secret, region, insecure, path_generator),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fs_url() {
        let url: StorageUrl = "fs:///var/lib/castore".parse().unwrap();
        match url {
            StorageUrl::Fs { root } => assert_eq!(root, std::path::PathBuf::from("/var/lib/castore")),
            _ => panic!("expected fs url"),
        }
    }

    #[test]
    fn parses_s3_url_with_query_params() {
        let url: StorageUrl = "s3://minio.local/assets?access=AKIA&secret=shh&region=eu-west-1"
            .parse()
            .unwrap();
        match url {
            StorageUrl::S3 { host, bucket, access, secret, region, .. } => {
                assert_eq!(host, "minio.local");
                assert_eq!(bucket, "assets");
                assert_eq!(access, "AKIA");
                assert_eq!(secret, "shh");
                assert_eq!(region, "eu-west-1");
            }
            _ => panic!("expected s3 url"),
        }
    }
}
