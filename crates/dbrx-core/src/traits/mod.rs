//! Core traits for the reconciliation engine
//!
//! This module defines the abstract interfaces of the external collaborators.
//!
//! - [`RemoteClient`]: Create/read/update/delete remote resources
//! - [`ObjectStore`]: Versioned desired-state storage

pub mod object_store;
pub mod remote_client;

pub use object_store::{ObjectStore, ObjectStoreFactory};
pub use remote_client::{ChildKind, RemoteChild, RemoteClient, RemoteClientFactory, RemoteObject};
