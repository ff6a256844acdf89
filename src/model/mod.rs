//! Entity definitions shared by every component: the manifest pipeline
//! description, the object record, and the per-object metadata ledger.

pub mod manifest;
pub mod meta;
pub mod object;

pub use manifest::{Action, Manifest, Stage, Task};
pub use meta::{ItemMeta, Meta, TaskInfo, TaskStatus};
pub use object::{Object, ObjectStatus, ObjectType};
