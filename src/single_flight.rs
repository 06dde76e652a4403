//! Per-key request deduplication with permanent results.
//!
//! Each key moves through `NotStarted -> InProgress(waiters) -> Done | Failed`.
//! A key absent from the map is `NotStarted`. The first caller for a key leads the
//! fetch; later callers register a waiter and receive the leader's result.
//!
//! Transient failures (see [`Error::is_transient`]) are delivered to the current
//! waiters but reset the key to `NotStarted`, so the next caller fetches again.

use std::{collections::HashMap, future::Future, hash::Hash, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::Error;

type Outcome<V> = Result<V, Arc<Error>>;

enum FlightState<V> {
    InProgress(Vec<oneshot::Sender<Outcome<V>>>),
    Done(V),
    Failed(Arc<Error>),
}

type States<K, V> = Mutex<HashMap<K, FlightState<V>>>;

/// A cache whose entries are computed at most once, even under concurrent access.
pub struct SingleFlight<K, V> {
    states: States<K, V>,
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("keys", &self.states.lock().len())
            .finish()
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }
}

enum Role<V> {
    Leader,
    Waiter(oneshot::Receiver<Outcome<V>>),
    Finished(Outcome<V>),
}

impl<K: Eq + Hash + Clone, V: Clone> SingleFlight<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The completed value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        match self.states.lock().get(key) {
            Some(FlightState::Done(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Number of keys that are in progress or completed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn join(&self, key: &K) -> Role<V> {
        let mut states = self.states.lock();
        match states.get_mut(key) {
            Some(FlightState::Done(value)) => Role::Finished(Ok(value.clone())),
            Some(FlightState::Failed(error)) => Role::Finished(Err(error.clone())),
            Some(FlightState::InProgress(waiters)) => {
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                Role::Waiter(receiver)
            }
            None => {
                states.insert(key.clone(), FlightState::InProgress(Vec::new()));
                Role::Leader
            }
        }
    }

    /// Return the value for `key`, running `fetch` only if no other caller has done so.
    ///
    /// # Errors
    /// Returns the error of the fetch that resolved `key`. Errors shared with other
    /// callers are wrapped in [`Error::Shared`].
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> crate::Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<V>>,
    {
        loop {
            match self.join(&key) {
                Role::Finished(outcome) => return outcome.map_err(Error::Shared),
                Role::Waiter(receiver) => match receiver.await {
                    Ok(outcome) => return outcome.map_err(Error::Shared),
                    // the leader was dropped before finishing; try to lead
                    Err(_) => continue,
                },
                Role::Leader => break,
            }
        }

        let mut guard = LeaderGuard {
            states: &self.states,
            key: Some(key),
        };
        let result = fetch().await;
        guard.finish(result)
    }
}

/// Resets an unfinished key if the leading future is dropped.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    states: &'a States<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V: Clone> LeaderGuard<'_, K, V> {
    fn finish(&mut self, result: crate::Result<V>) -> crate::Result<V> {
        let Some(key) = self.key.take() else {
            return result;
        };
        let mut states = self.states.lock();
        let previous = states.remove(&key);
        let result = result.map_err(Arc::new);
        match &result {
            Ok(value) => {
                states.insert(key, FlightState::Done(value.clone()));
            }
            Err(error) if error.is_transient() => {}
            Err(error) => {
                states.insert(key, FlightState::Failed(error.clone()));
            }
        }
        drop(states);

        if let Some(FlightState::InProgress(waiters)) = previous {
            for waiter in waiters {
                // the waiter may have been dropped
                let _ = waiter.send(result.clone());
            }
        }
        result.map_err(Error::Shared)
    }
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut states = self.states.lock();
            if matches!(states.get(&key), Some(FlightState::InProgress(_))) {
                // dropping the senders wakes the waiters, which retry
                states.remove(&key);
            }
        }
    }
}
