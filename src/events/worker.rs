//! The worker pool that drains the event bus and drives the engine
//! (§4.G). Sized by `num_cpus` by default; each event is acked exactly
//! once and a panic inside a single event's handling is caught so it
//! cannot take down the pool.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    engine::{self, EngineLimits},
    events::{Event, EventBus, EventType},
    kv::Interlock,
    projection::Projection,
    storage::StorageDriver,
    converters::ConverterRegistry,
};

/// What `reconcile` decided should happen to the event stream after it
/// ran: republish `processed`/`update`/`delete`, or nothing if the event
/// type itself carried no follow-up (e.g. `processed`/`delete` events are
/// terminal and only logged).
type Republish = Option<EventType>;

pub struct WorkerPool {
    pub bus: Arc<dyn EventBus>,
    pub driver: Arc<dyn StorageDriver>,
    pub registry: Arc<ConverterRegistry>,
    pub interlock: Arc<dyn Interlock>,
    pub projection: Arc<dyn Projection>,
    pub limits: EngineLimits,
}

impl WorkerPool {
    /// Run `size` concurrent consumer loops until the bus closes or
    /// `shutdown` resolves. Defaults to the host's logical CPU count
    /// when `size` is `None`.
    pub async fn run(self: Arc<Self>, size: Option<usize>, shutdown: tokio_util::sync::CancellationToken) {
        let width = size.unwrap_or_else(num_cpus::get);
        let mut handles = Vec::with_capacity(width);
        for worker_id in 0..width {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id, shutdown).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: tokio_util::sync::CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.bus.recv() => event,
            };
            let Some(event) = event else { break };
            if let Err(panic) = self.handle_one(event.clone()).await {
                error!(worker_id, event = %event.event_type, panic = ?panic, "event handler panicked");
            }
        }
    }

    /// Wraps `handle_event` in `catch_unwind`-equivalent error recovery:
    /// since the engine's own work is synchronous, run it on a blocking
    /// thread and translate a JoinError (panic) into a logged failure
    /// rather than crashing the worker. Publishing back onto the bus
    /// happens here, after the blocking work returns, since `EventBus`
    /// is async and the reconciliation itself is not.
    async fn handle_one(&self, event: Event) -> Result<(), tokio::task::JoinError> {
        let driver = self.driver.clone();
        let registry = self.registry.clone();
        let interlock = self.interlock.clone();
        let projection = self.projection.clone();
        let limits = self.limits;
        let object_id = event.object_id.clone();
        let republish = tokio::task::spawn_blocking(move || {
            handle_event(event, driver.as_ref(), registry.as_ref(), interlock.as_ref(), projection.as_ref(), limits)
        })
        .await?;
        if let Some(event_type) = republish {
            self.bus.publish(Event::new(event_type, object_id)).await;
        }
        Ok(())
    }
}

fn handle_event(
    event: Event,
    driver: &dyn StorageDriver,
    registry: &ConverterRegistry,
    interlock: &dyn Interlock,
    projection: &dyn Projection,
    limits: EngineLimits,
) -> Republish {
    match event.event_type {
        EventType::Update | EventType::Refresh => {
            match reconcile(&event.object_id, event.event_type, driver, registry, interlock, projection, limits) {
                Ok(republish) => republish,
                Err(e) => {
                    warn!(object_id = %event.object_id, error = %e, "reconciliation failed");
                    None
                }
            }
        }
        EventType::Processed => {
            info!(object_id = %event.object_id, "processed");
            None
        }
        EventType::Delete => {
            info!(object_id = %event.object_id, "deleted");
            None
        }
    }
}

/// Runs one reconciliation pass and decides what the worker should
/// publish next: `processed` once every stage completes, `update` again
/// if work remains (retried tasks, a stage limit was hit), or `delete`
/// if the object vanished mid-run.
fn reconcile(
    object_id: &str,
    event_type: EventType,
    driver: &dyn StorageDriver,
    registry: &ConverterRegistry,
    interlock: &dyn Interlock,
    projection: &dyn Projection,
    limits: EngineLimits,
) -> Result<Republish, crate::errors::StoreError> {
    let mut object = match driver.open(object_id) {
        Ok(o) => o,
        Err(e) if e.is_not_found() => {
            projection.remove(object_id);
            return Ok(Some(EventType::Delete));
        }
        Err(e) => return Err(e),
    };

    if object.meta.main.content_type.is_empty() {
        driver.clean(&mut object)?;
        projection.remove(object_id);
        return Ok(Some(EventType::Delete));
    }

    if event_type == EventType::Refresh {
        engine::reset_for_refresh(&mut object, driver)?;
    }

    let all_complete = match engine::process_tasks(&mut object, driver, registry, interlock, limits) {
        Ok(all_complete) => all_complete,
        Err(crate::errors::StoreError::ObjectInProcessing(_)) => return Ok(None),
        Err(e) if e.is_not_found() => {
            projection.remove(object_id);
            return Ok(Some(EventType::Delete));
        }
        Err(e) => return Err(e),
    };

    engine::sweep_excess_items(&mut object, driver)?;
    projection.put(&object);

    if all_complete {
        Ok(Some(EventType::Processed))
    } else {
        Ok(Some(EventType::Update))
    }
}
