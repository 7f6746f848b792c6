use crate::core::error::GantryError;
use crate::core::state::GovernanceState;
use crate::core::store::StateStore;
use crate::plugins::audit;
use std::sync::Mutex;
use std::time::Instant;

/// What a transaction body decided.
#[derive(Debug)]
pub enum Txn<R> {
    /// Persist the mutated state, then return `R`.
    Commit(R),
    /// Discard any in-memory changes and return `R`.
    Abort(R),
}

/// The state broker is the "thin waist" for mutations.
///
/// Every write runs as validate → mutate → persist while holding both an
/// in-process mutex and the store's cross-process lock, so no two
/// transactions on the same document interleave. A commit that rewrites or
/// drops existing audit entries is refused. Reads bypass the broker.
pub struct StateBroker<S: StateStore> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: StateStore> StateBroker<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load a snapshot without taking the write lock.
    pub fn read(&self) -> Result<GovernanceState, GantryError> {
        self.store.load()
    }

    /// Run `f` against freshly loaded state as one serialized transaction.
    pub fn with_state<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, GantryError>
    where
        F: FnOnce(&mut GovernanceState) -> Result<Txn<R>, GantryError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GantryError::LockError("state broker mutex poisoned".to_string()))?;
        let _store_lock = self.store.lock()?;
        let started = Instant::now();

        let mut state = self.store.load()?;
        let before = state.log.clone();
        let outcome = f(&mut state);

        let (status, result) = match outcome {
            Ok(Txn::Commit(r)) => match audit::validate_append_only(&before, &state.log)
                .map_err(GantryError::ValidationError)
                .and_then(|()| self.store.save(&mut state))
            {
                Ok(()) => ("committed", Ok(r)),
                Err(e) => ("error", Err(e)),
            },
            Ok(Txn::Abort(r)) => ("aborted", Ok(r)),
            Err(e) => ("error", Err(e)),
        };

        tracing::debug!(
            actor,
            op = op_name,
            status,
            store = %self.store.describe(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "state transaction"
        );
        result
    }
}
