//! Per-context liveness tracking for transfers that have not been compiled yet.
//!
//! The registry only holds weak references; transfers stay owned by whoever created them. When an
//! execution context goes away abnormally, [`TransferRegistry::terminate_context`] force-releases
//! every transfer still associated with it.
//!
//! Lock order is always transfer → registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::map::MappingService;
use crate::transfer::Transfer;

/// Identity of the execution context (guest process/thread) a transfer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

pub type SharedTransfer<M> = Arc<Mutex<Transfer<M>>>;

trait ForceRelease: Send + Sync {
    fn force_release(&self) -> usize;
}

impl<M: MappingService + Send> ForceRelease for Mutex<Transfer<M>> {
    fn force_release(&self) -> usize {
        let mut transfer = self.lock().unwrap_or_else(PoisonError::into_inner);
        transfer.registration = None;
        transfer.release()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    contexts: HashMap<ContextId, BTreeMap<u64, Weak<dyn ForceRelease>>>,
}

fn lock_state(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Membership token held by a registered transfer. Dropping it removes the association.
#[derive(Debug)]
pub(crate) struct Registration {
    state: Weak<Mutex<RegistryState>>,
    context: ContextId,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = lock_state(&state);
        if let Some(entries) = state.contexts.get_mut(&self.context) {
            entries.remove(&self.id);
            if entries.is_empty() {
                state.contexts.remove(&self.context);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransferRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `transfer` with `context`, replacing any previous association.
    ///
    /// Compiled transfers are never registered; returns `false` for them.
    pub fn register<M>(&self, context: ContextId, transfer: &SharedTransfer<M>) -> bool
    where
        M: MappingService + Send + 'static,
    {
        let mut guard = transfer.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_compiled() {
            return false;
        }
        guard.registration = None;

        let weak: Weak<dyn ForceRelease> = Arc::downgrade(transfer) as Weak<_>;
        let id = {
            let mut state = lock_state(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.contexts.entry(context).or_default().insert(id, weak);
            id
        };

        guard.registration = Some(Registration {
            state: Arc::downgrade(&self.state),
            context,
            id,
        });
        true
    }

    /// Drop `transfer`'s association, if it has one.
    pub fn unregister<M: MappingService>(&self, transfer: &SharedTransfer<M>) -> bool {
        let mut guard = transfer.lock().unwrap_or_else(PoisonError::into_inner);
        guard.registration.take().is_some()
    }

    /// Number of live transfers associated with `context`.
    pub fn live_count(&self, context: ContextId) -> usize {
        let state = lock_state(&self.state);
        state.contexts.get(&context).map_or(0, |entries| {
            entries.values().filter(|w| w.strong_count() > 0).count()
        })
    }

    /// Forget every association of `context` and release each transfer that is still alive.
    /// Returns the number of transfers released.
    pub fn terminate_context(&self, context: ContextId) -> usize {
        let entries = lock_state(&self.state)
            .contexts
            .remove(&context)
            .unwrap_or_default();

        let mut released = 0;
        let mut spans = 0;
        for transfer in entries.values().filter_map(Weak::upgrade) {
            spans += transfer.force_release();
            released += 1;
        }
        tracing::debug!(context = context.0, released, spans, "terminated transfer context");
        released
    }
}
