//! S3-compatible storage backend: every key is prefixed with the
//! object's group (`<bucket>/<path>/original.<ext>`,
//! `<bucket>/<path>/<name>.<ext>`, `<bucket>/<path>/meta.json`,
//! `<bucket>/manifest.json`) so two groups never collide on the same
//! path, signed with a hand-rolled AWS SigV4 request signer over
//! `ureq` (§4.A "S3 client stack (added)"). Meta/manifest JSON is
//! written private; data items are written public-read with any
//! upload tags attached natively via `x-amz-tagging`.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
};

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::{
    errors::StoreError,
    hash::ContentHash,
    model::{
        Manifest, Object,
        meta::{ItemMeta, Meta},
        object::{ObjectType, is_original_name, original_filename, source_filename},
    },
    storage::{CreateParams, StorageDriver, path::PathChecker, path::PathGenerator},
};

const MANIFEST_KEY: &str = "manifest.json";
const META_KEY: &str = "meta.json";

pub struct S3Driver {
    host: String,
    bucket: String,
    access: String,
    secret: String,
    region: String,
    scheme: &'static str,
    path_generator: PathGenerator,
}

impl S3Driver {
    pub fn new(
        host: String,
        bucket: String,
        access: String,
        secret: String,
        region: String,
        insecure: bool,
        path_generator: PathGenerator,
    ) -> Self {
        Self {
            host,
            bucket,
            access,
            secret,
            region,
            scheme: if insecure { "http" } else { "https" },
            path_generator,
        }
    }

    fn endpoint(&self, key: &str) -> String {
        format!("{}://{}/{}/{}", self.scheme, self.host, self.bucket, key)
    }

    /// Keys every object under its group so two buckets with the same
    /// `path` never collide (§4.A invariant 1).
    fn object_key(&self, bucket: &str, path: &str, basename: &str) -> String {
        format!("{bucket}/{path}/{basename}")
    }

    fn manifest_key(bucket: &str) -> String {
        format!("{bucket}/{MANIFEST_KEY}")
    }

    /// Upload with an explicit ACL and no tagging — used for meta/manifest
    /// JSON, which §4.A requires stored private.
    fn put(&self, key: &str, body: &[u8], content_type: &str) -> Result<(), StoreError> {
        self.put_with(key, body, content_type, "private", None)
    }

    /// Upload a data item: public-read per §4.A, with any object tags
    /// attached via the store's native tagging rather than only in the
    /// meta blob.
    fn put_data(&self, key: &str, body: &[u8], content_type: &str, tags: &[String]) -> Result<(), StoreError> {
        let tagging = build_tagging(tags);
        self.put_with(key, body, content_type, "public-read", tagging.as_deref())
    }

    fn put_with(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
        acl: &str,
        tagging: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut request = SignedRequest::new("PUT", &self.host, &self.bucket, key, &self.region, self.scheme)
            .with_body(body)
            .with_header("content-type", content_type)
            .with_header("x-amz-acl", acl);
        if let Some(tagging) = tagging {
            request = request.with_header("x-amz-tagging", tagging);
        }
        let signed = request.sign(&self.access, &self.secret);
        let mut req = ureq::put(&signed.url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.payload_hash)
            .header("content-type", content_type)
            .header("x-amz-acl", acl);
        if let Some(tagging) = tagging {
            req = req.header("x-amz-tagging", tagging);
        }
        let response = req.send(body).map_err(|e| StoreError::DriverIo(e.to_string()))?;
        if response.status().as_u16() >= 300 {
            return Err(StoreError::DriverIo(format!("PUT {key} returned {}", response.status())));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let request = SignedRequest::new("GET", &self.host, &self.bucket, key, &self.region, self.scheme);
        let signed = request.sign(&self.access, &self.secret);
        let mut response = ureq::get(&signed.url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.payload_hash)
            .call()
            .map_err(|e| {
                if matches!(&e, ureq::Error::StatusCode(404)) {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::DriverIo(e.to_string())
                }
            })?;
        let mut buf = Vec::new();
        response
            .body_mut()
            .as_reader()
            .read_to_end(&mut buf)
            .map_err(|e| StoreError::DriverIo(e.to_string()))?;
        Ok(buf)
    }

    fn head(&self, key: &str) -> bool {
        let request = SignedRequest::new("HEAD", &self.host, &self.bucket, key, &self.region, self.scheme);
        let signed = request.sign(&self.access, &self.secret);
        ureq::head(&signed.url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.payload_hash)
            .call()
            .is_ok()
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let request = SignedRequest::new("DELETE", &self.host, &self.bucket, key, &self.region, self.scheme);
        let signed = request.sign(&self.access, &self.secret);
        match ureq::delete(&signed.url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.payload_hash)
            .call()
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::StatusCode(404)) => Ok(()),
            Err(e) => Err(StoreError::DriverIo(e.to_string())),
        }
    }

    fn load_meta(&self, bucket: &str, path: &str) -> Result<Option<Meta>, StoreError> {
        let key = self.object_key(bucket, path, META_KEY);
        if !self.head(&key) {
            return Ok(None);
        }
        let bytes = self.get(&key)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save_meta(&self, bucket: &str, path: &str, meta: &mut Meta) -> Result<(), StoreError> {
        meta.updated_at = Utc::now();
        let bytes = serde_json::to_vec(meta)?;
        self.put(&self.object_key(bucket, path, META_KEY), &bytes, "application/json")
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

struct S3PathChecker<'a> {
    driver: &'a S3Driver,
    bucket: &'a str,
}

impl PathChecker for S3PathChecker<'_> {
    fn is_free(&self, candidate: &str) -> bool {
        !self.driver.head(&self.driver.object_key(self.bucket, candidate, META_KEY))
    }
}

impl StorageDriver for S3Driver {
    fn read_manifest(&self, bucket: &str) -> Result<Manifest, StoreError> {
        let key = Self::manifest_key(bucket);
        if !self.head(&key) {
            return Ok(Manifest::default());
        }
        let bytes = self.get(&key)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn update_manifest(&self, bucket: &str, manifest: &Manifest) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(manifest)?;
        self.put(&Self::manifest_key(bucket), &bytes, "application/json")
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
                if !overwrite && self.head(&self.object_key(bucket, custom, META_KEY)) {
                    return Err(StoreError::CustomIdInUse(custom.to_string()));
                }
                custom.to_string()
            }
            None => {
                let checker = S3PathChecker { driver: self, bucket };
                self.path_generator.generate(&checker)?
            }
        };

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
        let meta = self
            .load_meta(bucket, path)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let manifest = self.read_manifest(bucket)?;
        Ok(Object {
            bucket: bucket.to_string(),
            path: path.to_string(),
            hash_id: meta.main.hash_id,
            content_type: meta.main.content_type.clone(),
            object_type: meta.main.object_type,
            size: meta.main.size,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            meta,
            manifest,
        })
    }

    fn read(&self, object: &Object, name: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        let basename = self.resolve_basename(object, name)?;
        let bytes = self.get(&self.object_key(&object.bucket, &object.path, &basename))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn update(
        &self,
        object: &mut Object,
        name: &str,
        reader: &mut dyn Read,
        meta: Option<&ItemMeta>,
    ) -> Result<(), StoreError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let content_type = crate::utils::sniff_content_type(&bytes);
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
        let hash_id = ContentHash::of(&bytes);
        let size = bytes.len() as u64;
        self.put_data(
            &self.object_key(&object.bucket, &object.path, &basename),
            &bytes,
            content_type,
            &object.meta.tags,
        )?;

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
        self.save_meta(&object.bucket, &object.path, &mut object.meta)
    }

    fn clean(&self, object: &mut Object) -> Result<(), StoreError> {
        for item in object.meta.items.drain(..).collect::<Vec<_>>() {
            let _ = self.delete(&self.object_key(&object.bucket, &object.path, &item.fullname()));
        }
        object.meta.reset_completion();
        self.save_meta(&object.bucket, &object.path, &mut object.meta)
    }

    fn remove(&self, object: &Object, names: &[String]) -> Result<(), StoreError> {
        if names.is_empty() {
            self.delete(&self.object_key(&object.bucket, &object.path, META_KEY))?;
            self.delete(&self.object_key(&object.bucket, &object.path, &original_filename(&object.meta.main.name_ext)))?;
            for item in &object.meta.items {
                self.delete(&self.object_key(&object.bucket, &object.path, &item.fullname()))?;
            }
            return Ok(());
        }
        for name in names {
            let basename = self.resolve_basename(object, name).unwrap_or_else(|_| name.clone());
            self.delete(&self.object_key(&object.bucket, &object.path, &basename))?;
        }
        Ok(())
    }
}

/// A minimal AWS SigV4 request signer for path-style S3-compatible
/// endpoints. The teacher crate hand-rolls its HTTP dispatch rather than
/// depending on generated client stubs; this follows the same pattern
/// rather than pulling in an AWS SDK.
struct SignedRequest<'a> {
    method: &'static str,
    host: &'a str,
    bucket: &'a str,
    key: &'a str,
    region: &'a str,
    scheme: &'static str,
    body: &'a [u8],
    extra_headers: BTreeMap<String, String>,
}

struct Signed {
    url: String,
    authorization: String,
    amz_date: String,
    payload_hash: String,
}

type HmacSha256 = Hmac<Sha256>;

impl<'a> SignedRequest<'a> {
    fn new(method: &'static str, host: &'a str, bucket: &'a str, key: &'a str, region: &'a str, scheme: &'static str) -> Self {
        Self {
            method,
            host,
            bucket,
            key,
            region,
            scheme,
            body: &[],
            extra_headers: BTreeMap::new(),
        }
    }

    fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = body;
        self
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.insert(name.to_string(), value.to_string());
        self
    }

    fn canonical_path(&self) -> String {
        format!("/{}/{}", self.bucket, self.key)
    }

    /// Sign the request per AWS SigV4, returning the fully-qualified URL
    /// and the headers to attach (`Authorization`, `x-amz-date`,
    /// `x-amz-content-sha256`).
    fn sign(&self, access_key: &str, secret_key: &str) -> Signed {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(self.body));

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        headers.insert("host".to_string(), self.host.to_string());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        for (k, v) in &self.extra_headers {
            headers.insert(k.to_lowercase(), v.clone());
        }

        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            self.method,
            self.canonical_path(),
            canonical_headers,
            signed_headers,
            payload_hash
        );
        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{canonical_request_hash}"
        );

        let k_date = hmac_sign(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sign(&k_date, self.region.as_bytes());
        let k_service = hmac_sign(&k_region, b"s3");
        let k_signing = hmac_sign(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sign(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}"
        );

        Signed {
            url: format!("{}://{}{}", self.scheme, self.host, self.canonical_path()),
            authorization,
            amz_date,
            payload_hash,
        }
    }
}

/// Render object tags as an `x-amz-tagging` query-string value
/// (`tag0=foo&tag1=bar`). Returns `None` for an empty tag list so the
/// header is omitted entirely rather than sent empty.
fn build_tagging(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    Some(
        tags.iter()
            .enumerate()
            .map(|(i, tag)| format!("tag{i}={}", urlencode(tag)))
            .collect::<Vec<_>>()
            .join("&"),
    )
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn hmac_sign(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic_for_fixed_inputs() {
        let request = SignedRequest::new("GET", "s3.example.com", "bucket", "a/b", "us-east-1", "https");
        let signed_a = request.sign("AKIAEXAMPLE", "secret");
        // Same millisecond window is unlikely across two calls; assert
        // structural shape instead of byte-identical signatures.
        assert!(signed_a.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIAEXAMPLE/"));
        assert!(signed_a.authorization.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert_eq!(signed_a.payload_hash.len(), 64);
    }

    #[test]
    fn canonical_path_joins_bucket_and_key() {
        let request = SignedRequest::new("PUT", "host", "bucket", "a/original.jpg", "us-east-1", "https");
        assert_eq!(request.canonical_path(), "/bucket/a/original.jpg");
    }
}
