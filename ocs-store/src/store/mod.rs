//! DataStore abstraction for the deployer.
//!
//! The reconciler only talks to the traits in this module, never to a
//! concrete backend, so the object store stays an external collaborator.
//!
//! # Architecture
//!
//! ```text
//! Reconciler → Arc<dyn DataStore>
//!                     ↓
//!               store.get_storage_cluster(&key)          // Reads
//!               store.update_storage_cluster(obj).await  // Compare-and-swap on resource_version
//!               store.subscribe()                        // Watch events
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ocs_store::{DataStore, ManagedOcs, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut events = store.subscribe();
//!
//! store.create_managed_ocs(ManagedOcs::new("openshift-storage", "managedocs")).await?;
//! let event = events.recv().await?;
//! ```

mod error;
mod event;
mod fault;
mod memory_store;
mod traits;

pub use error::{Result, StoreError};
pub use event::Event;
pub use fault::Operation;
pub use memory_store::MemoryStore;
pub use traits::*;
