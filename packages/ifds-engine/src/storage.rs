//! Deduplicating pub/sub storage for cross-unit summaries.
//!
//! Runners publish summary facts keyed by method; other runners subscribe to
//! a method's stream and are guaranteed to observe every distinct fact
//! exactly once, whether it was published before or after they subscribed.
//! Callbacks run outside the shard lock, so a callback may itself publish
//! or subscribe without deadlocking.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashSet;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SummaryStream<T> {
    facts: Vec<T>,
    seen: FxHashSet<T>,
    subscribers: Vec<Callback<T>>,
}

impl<T> Default for SummaryStream<T> {
    fn default() -> Self {
        Self {
            facts: Vec::new(),
            seen: FxHashSet::default(),
            subscribers: Vec::new(),
        }
    }
}

/// Per-key append-only fact log with replay-on-subscribe.
pub struct SummaryStorage<K, T>
where
    K: Clone + Eq + Hash,
{
    streams: DashMap<K, SummaryStream<T>>,
}

impl<K, T> Default for SummaryStorage<K, T>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }
}

impl<K, T> SummaryStorage<K, T>
where
    K: Clone + Eq + Hash,
    T: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `fact` under `key`. Duplicate facts are dropped; a new fact is
    /// delivered to every current subscriber after the shard lock is
    /// released.
    pub fn add(&self, key: K, fact: T) {
        let subscribers = {
            let mut stream = self.streams.entry(key).or_default();
            if !stream.seen.insert(fact.clone()) {
                return;
            }
            stream.facts.push(fact.clone());
            stream.subscribers.clone()
        };
        for subscriber in subscribers {
            subscriber(&fact);
        }
    }

    /// Subscribe to the stream of `key`. The callback first receives every
    /// fact already published (replay), then every later fact, each distinct
    /// fact exactly once.
    pub fn subscribe(&self, key: K, callback: Callback<T>) {
        let snapshot = {
            let mut stream = self.streams.entry(key).or_default();
            stream.subscribers.push(callback.clone());
            stream.facts.clone()
        };
        for fact in &snapshot {
            callback(fact);
        }
    }

    /// Facts currently published under `key`, in publication order.
    pub fn facts_for(&self, key: &K) -> Vec<T> {
        self.streams
            .get(key)
            .map(|stream| stream.facts.clone())
            .unwrap_or_default()
    }

    /// All facts across every key.
    pub fn all_facts(&self) -> Vec<T> {
        self.streams
            .iter()
            .flat_map(|entry| entry.facts.clone())
            .collect()
    }

    /// Drop every registered subscriber, keeping the fact logs. Used at
    /// shutdown to break the reference cycle between storage callbacks and
    /// the runners they capture.
    pub fn clear_subscribers(&self) {
        for mut entry in self.streams.iter_mut() {
            entry.subscribers.clear();
        }
    }

    /// Keys that have at least one published fact.
    pub fn known_keys(&self) -> Vec<K> {
        self.streams
            .iter()
            .filter(|entry| !entry.facts.is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn recorder() -> (Callback<u32>, Arc<Mutex<Vec<u32>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let callback: Callback<u32> = Arc::new(move |fact: &u32| sink.lock().push(*fact));
        (callback, log)
    }

    #[test]
    fn late_subscriber_replays_earlier_facts() {
        let storage: SummaryStorage<&str, u32> = SummaryStorage::new();
        storage.add("m", 1);
        storage.add("m", 2);

        let (callback, log) = recorder();
        storage.subscribe("m", callback);
        storage.add("m", 3);

        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_facts_are_delivered_once() {
        let storage: SummaryStorage<&str, u32> = SummaryStorage::new();
        let (callback, log) = recorder();
        storage.subscribe("m", callback);

        storage.add("m", 7);
        storage.add("m", 7);

        assert_eq!(*log.lock(), vec![7]);
        assert_eq!(storage.facts_for(&"m"), vec![7]);
    }

    #[test]
    fn streams_are_independent_per_key() {
        let storage: SummaryStorage<&str, u32> = SummaryStorage::new();
        let (callback, log) = recorder();
        storage.subscribe("a", callback);

        storage.add("a", 1);
        storage.add("b", 2);

        assert_eq!(*log.lock(), vec![1]);
        let mut keys = storage.known_keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(storage.all_facts().len(), 2);
    }

    #[test]
    fn callback_may_publish_back_into_the_storage() {
        let storage: Arc<SummaryStorage<&str, u32>> = Arc::new(SummaryStorage::new());
        let (recording, log) = recorder();
        storage.subscribe("out", recording);

        let inner = Arc::clone(&storage);
        let forward: Callback<u32> = Arc::new(move |fact: &u32| inner.add("out", fact + 100));
        storage.subscribe("in", forward);

        storage.add("in", 1);
        storage.add("in", 2);

        assert_eq!(*log.lock(), vec![101, 102]);
    }
}
