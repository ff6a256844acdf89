//! The object service facade (§4.E): the single entry point both the
//! HTTP gateway and (by contract) a gRPC binding would call into.

use std::{
    io::{Read, Seek},
    sync::Arc,
};

use tempfile::NamedTempFile;

use crate::{
    errors::StoreError,
    events::{Event, EventBus, EventType},
    kv::Interlock,
    model::{Manifest, Object},
    projection::Projection,
    storage::{CreateParams, StorageDriver},
};

/// The wire-agnostic contract both the HTTP gateway and a future gRPC
/// binding serve. A gRPC binding generated from §6's method table would
/// implement the same seven operations against this trait.
pub trait ObjectService: Send + Sync {
    fn head(&self, id: &str) -> Result<Object, StoreError>;
    fn get(&self, id: &str, name: &str) -> Result<(Object, Box<dyn Read + Send>), StoreError>;
    fn upload(
        &self,
        group: &str,
        id: Option<&str>,
        overwrite: bool,
        tags: Vec<String>,
        reader: &mut dyn Read,
    ) -> Result<Object, StoreError>;
    fn refresh(&self, id: &str) -> Result<(), StoreError>;
    fn delete(&self, id: &str, names: &[String]) -> Result<(), StoreError>;
    fn set_manifest(&self, group: &str, manifest: Manifest) -> Result<(), StoreError>;
    fn get_manifest(&self, group: &str) -> Result<Manifest, StoreError>;
}

pub struct ObjectFacade {
    driver: Arc<dyn StorageDriver>,
    events: Arc<dyn EventBus>,
    interlock: Arc<dyn Interlock>,
    projection: Arc<dyn Projection>,
}

impl ObjectFacade {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        events: Arc<dyn EventBus>,
        interlock: Arc<dyn Interlock>,
        projection: Arc<dyn Projection>,
    ) -> Self {
        Self { driver, events, interlock, projection }
    }

    fn publish(&self, event_type: EventType, object_id: &str) {
        let bus = self.events.clone();
        let event = Event::new(event_type, object_id);
        tokio::spawn(async move { bus.publish(event).await });
    }

    fn load(&self, id: &str) -> Result<Object, StoreError> {
        if let Some(cached) = self.projection.get(id) {
            return Ok(cached);
        }
        let object = self.driver.open(id)?;
        self.projection.put(&object);
        Ok(object)
    }

    fn maybe_trigger_reconciliation(&self, object: &Object) {
        if object.is_consistent() {
            return;
        }
        let lease_key = format!("processing_status:{}:{}", object.bucket, object.path);
        if self.interlock.try_begin_update(&lease_key) {
            self.publish(EventType::Update, &object.id());
        }
    }
}

impl ObjectService for ObjectFacade {
    fn head(&self, id: &str) -> Result<Object, StoreError> {
        crate::utils::validate_object_id(id)?;
        let object = self.load(id)?;
        self.maybe_trigger_reconciliation(&object);
        Ok(object)
    }

    fn get(&self, id: &str, name: &str) -> Result<(Object, Box<dyn Read + Send>), StoreError> {
        crate::utils::validate_object_id(id)?;
        let object = self.load(id)?;
        self.maybe_trigger_reconciliation(&object);
        let reader = self.driver.read(&object, name)?;
        Ok((object, reader))
    }

    fn upload(
        &self,
        group: &str,
        id: Option<&str>,
        overwrite: bool,
        tags: Vec<String>,
        reader: &mut dyn Read,
    ) -> Result<Object, StoreError> {
        // Buffer to a seekable temp file so the driver can compute MD5
        // and sniff the content type without a second network/disk pass.
        let mut spooled = NamedTempFile::new()?;
        std::io::copy(reader, &mut spooled)?;
        spooled.rewind()?;

        let mut object = self.driver.create(group, id, overwrite, &CreateParams { tags })?;
        self.driver.update(&mut object, "", &mut spooled, None)?;
        self.projection.put(&object);
        self.publish(EventType::Update, &object.id());
        Ok(object)
    }

    fn refresh(&self, id: &str) -> Result<(), StoreError> {
        crate::utils::validate_object_id(id)?;
        let _ = self.load(id)?;
        self.publish(EventType::Refresh, id);
        Ok(())
    }

    fn delete(&self, id: &str, names: &[String]) -> Result<(), StoreError> {
        crate::utils::validate_object_id(id)?;
        let object = self.load(id)?;
        self.driver.remove(&object, names)?;
        if names.is_empty() {
            self.projection.remove(id);
        }
        self.publish(EventType::Delete, id);
        Ok(())
    }

    fn set_manifest(&self, group: &str, mut manifest: Manifest) -> Result<(), StoreError> {
        manifest.prepare_info()?;
        self.driver.update_manifest(group, &manifest)
    }

    fn get_manifest(&self, group: &str) -> Result<Manifest, StoreError> {
        self.driver.read_manifest(group)
    }
}
