//! Registry of live listeners and connections, force-closed on shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::transport::{HttpConn, ResourceId, TransportError};

/// Something the server owns and must close exactly once.
pub trait Resource: Send + Sync {
    fn id(&self) -> ResourceId;

    fn close(&self) -> Result<(), TransportError>;

    fn local_addr(&self) -> Option<SocketAddr>;
}

impl Resource for HttpConn {
    fn id(&self) -> ResourceId {
        HttpConn::id(self)
    }

    fn close(&self) -> Result<(), TransportError> {
        HttpConn::close(self)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.info().local_addr)
    }
}

/// A mutex-guarded set of resources keyed by id.
///
/// Once [`close_all`](Self::close_all) has run the tracker is sealed and
/// refuses new entries, so a resource accepted concurrently with shutdown is
/// never left open.
#[derive(Debug)]
pub struct ResourceTracker<T: ?Sized> {
    state: Mutex<State<T>>,
}

#[derive(Debug)]
struct State<T: ?Sized> {
    sealed: bool,
    items: HashMap<ResourceId, Arc<T>>,
}

impl<T: Resource + ?Sized> ResourceTracker<T> {
    /// Creates an empty, unsealed tracker.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                sealed: false,
                items: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `resource`. Returns `false` if the tracker is sealed, in which
    /// case the caller still owns closing it.
    pub fn track(&self, resource: Arc<T>) -> bool {
        let mut state = self.lock();
        if state.sealed {
            return false;
        }
        state.items.entry(resource.id()).or_insert(resource);
        true
    }

    /// Removes the resource with `id`, if present.
    pub fn untrack(&self, id: ResourceId) -> Option<Arc<T>> {
        self.lock().items.remove(&id)
    }

    /// Number of tracked resources.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.lock().items.values().cloned().collect()
    }

    /// Seals the tracker and closes everything in it.
    ///
    /// Already-closed resources are skipped silently; every other close
    /// failure is returned for the caller to report.
    pub fn close_all(&self) -> Vec<TransportError> {
        let drained: Vec<Arc<T>> = {
            let mut state = self.lock();
            state.sealed = true;
            state.items.drain().map(|(_, resource)| resource).collect()
        };

        drained
            .iter()
            .filter_map(|resource| match resource.close() {
                Ok(()) => None,
                Err(err) if err.is_bad_resource() => None,
                Err(err) => Some(err),
            })
            .collect()
    }
}

impl<T: Resource + ?Sized> Default for ResourceTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}
