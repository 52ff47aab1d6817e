pub mod medium;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use medium::{FileMedium, MediumError, NullMedium, StorageMedium};

/// Persistence behavior for one store.
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// Pure in-memory store, never written to the medium.
    pub skip_persist: bool,
    /// Top-level state keys stripped from the snapshot before each durable
    /// write. Transient UI flags and in-flight progress go here.
    pub exclude_from_persist: Vec<String>,
}

impl StoreConfig {
    pub fn unpersisted() -> Self {
        Self {
            skip_persist: true,
            exclude_from_persist: Vec::new(),
        }
    }

    pub fn exclude(keys: &[&str]) -> Self {
        Self {
            skip_persist: false,
            exclude_from_persist: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<S> = Arc<dyn Fn(&S) + Send + Sync>;

struct Inner<S> {
    state: S,
    subscribers: HashMap<u64, Subscriber<S>>,
    next_subscriber: u64,
}

/// A reactive state container with draft-mutation commit semantics and
/// optional persistence to a [`StorageMedium`].
///
/// Handlers mutate a draft copy in [`Store::set`]; the draft is committed as
/// a whole, subscribers see the committed state, and the snapshot (minus
/// excluded keys) is written through. Medium failures never fail the
/// mutation; they are logged and the in-memory state stays authoritative.
pub struct Store<S> {
    name: String,
    config: StoreConfig,
    medium: Arc<dyn StorageMedium>,
    inner: Arc<Mutex<Inner<S>>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            medium: Arc::clone(&self.medium),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Store<S>
where
    S: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    /// Create a store, hydrating from the medium when a usable snapshot
    /// exists. A corrupt snapshot falls back to the initializer.
    pub fn new(
        name: impl Into<String>,
        initializer: impl FnOnce() -> S,
        config: StoreConfig,
        medium: Arc<dyn StorageMedium>,
    ) -> Self {
        let name = name.into();
        let state = if config.skip_persist {
            initializer()
        } else {
            match medium.read(&name) {
                Ok(Some(snapshot)) => match serde_json::from_str(&snapshot) {
                    Ok(state) => state,
                    Err(e) => {
                        log::warn!("store '{}': snapshot unreadable, reinitializing: {}", name, e);
                        initializer()
                    }
                },
                Ok(None) => initializer(),
                Err(e) => {
                    log::warn!("store '{}': {}", name, e);
                    initializer()
                }
            }
        };

        Self {
            name,
            config,
            medium,
            inner: Arc::new(Mutex::new(Inner {
                state,
                subscribers: HashMap::new(),
                next_subscriber: 0,
            })),
        }
    }

    /// An unpersisted store (no medium involved at all).
    pub fn in_memory(name: impl Into<String>, initializer: impl FnOnce() -> S) -> Self {
        Self::new(name, initializer, StoreConfig::unpersisted(), Arc::new(NullMedium))
    }

    /// Current state (a clone; the store keeps ownership of the live copy).
    pub fn get(&self) -> S {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state.clone()
    }

    /// Apply a draft mutation. The mutator runs against a copy; the copy is
    /// committed, subscribers are notified with it, and it is persisted.
    pub fn set(&self, mutate: impl FnOnce(&mut S)) {
        let (committed, subscribers) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut draft = inner.state.clone();
            mutate(&mut draft);
            inner.state = draft.clone();
            let subs: Vec<Subscriber<S>> = inner.subscribers.values().cloned().collect();
            (draft, subs)
        };

        // Subscribers run outside the lock so they can read the store back.
        for sub in subscribers {
            sub(&committed);
        }

        self.persist(&committed);
    }

    pub fn subscribe(&self, f: impl Fn(&S) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.insert(id, Arc::new(f));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.remove(&id.0);
    }

    /// Drop the durable snapshot (state in memory is untouched).
    pub fn clear_persisted(&self) {
        if self.config.skip_persist {
            return;
        }
        if let Err(e) = self.medium.remove(&self.name) {
            log::warn!("store '{}': {}", self.name, e);
        }
    }

    fn persist(&self, state: &S) {
        if self.config.skip_persist {
            return;
        }

        let mut value = match serde_json::to_value(state) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("store '{}': failed to serialize state: {}", self.name, e);
                return;
            }
        };

        if let serde_json::Value::Object(ref mut map) = value {
            for key in &self.config.exclude_from_persist {
                map.remove(key);
            }
        }

        let json = match serde_json::to_string_pretty(&value) {
            Ok(j) => j,
            Err(e) => {
                log::warn!("store '{}': failed to serialize state: {}", self.name, e);
                return;
            }
        };

        if let Err(e) = self.medium.write(&self.name, &json) {
            log::warn!("store '{}': {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
    struct UiState {
        #[serde(default)]
        counter: u32,
        #[serde(default)]
        sidebar_open: bool,
        /// Transient: excluded from persistence in the tests below.
        #[serde(default)]
        upload_progress: u32,
    }

    fn file_medium(dir: &tempfile::TempDir) -> Arc<dyn StorageMedium> {
        Arc::new(FileMedium::new(dir.path().to_path_buf()))
    }

    #[test]
    fn excluded_field_stripped_from_snapshot_but_live_in_get() {
        let dir = tempfile::tempdir().unwrap();
        let medium = file_medium(&dir);
        let store = Store::new(
            "ui",
            UiState::default,
            StoreConfig::exclude(&["upload_progress"]),
            Arc::clone(&medium),
        );

        store.set(|s| {
            s.counter = 7;
            s.upload_progress = 55;
        });

        assert_eq!(store.get().upload_progress, 55);

        let raw = medium.read("ui").unwrap().expect("snapshot written");
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["counter"], 7);
        assert!(value.get("upload_progress").is_none());
    }

    #[test]
    fn skip_persist_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let medium = file_medium(&dir);
        let store = Store::new("scratch", UiState::default, StoreConfig::unpersisted(), Arc::clone(&medium));
        store.set(|s| s.counter = 1);
        assert!(medium.read("scratch").unwrap().is_none());
    }

    #[test]
    fn reload_hydrates_from_snapshot_and_defaults_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let medium = file_medium(&dir);
        {
            let store = Store::new(
                "ui",
                UiState::default,
                StoreConfig::exclude(&["upload_progress"]),
                Arc::clone(&medium),
            );
            store.set(|s| {
                s.counter = 3;
                s.upload_progress = 90;
            });
        }

        let reloaded = Store::new("ui", UiState::default, StoreConfig::default(), Arc::clone(&medium));
        let state = reloaded.get();
        assert_eq!(state.counter, 3);
        // Stripped at write time, so it comes back at its default.
        assert_eq!(state.upload_progress, 0);
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_initializer() {
        let dir = tempfile::tempdir().unwrap();
        let medium = file_medium(&dir);
        medium.write("ui", "{not json").unwrap();
        let store = Store::new("ui", UiState::default, StoreConfig::default(), medium);
        assert_eq!(store.get(), UiState::default());
    }

    #[test]
    fn null_medium_reads_nothing_and_drops_writes() {
        let store = Store::new(
            "ssr",
            || UiState { counter: 42, ..Default::default() },
            StoreConfig::default(),
            Arc::new(NullMedium),
        );
        assert_eq!(store.get().counter, 42);
        // Must not panic despite having nowhere to write.
        store.set(|s| s.counter = 43);
        assert_eq!(store.get().counter, 43);
    }

    #[test]
    fn subscribers_see_committed_state_until_unsubscribed() {
        let store: Store<UiState> = Store::in_memory("ui", UiState::default);
        let seen = Arc::new(AtomicUsize::new(0));

        let seen2 = Arc::clone(&seen);
        let sub = store.subscribe(move |s| {
            seen2.store(s.counter as usize, Ordering::SeqCst);
        });

        store.set(|s| s.counter = 5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        store.unsubscribe(sub);
        store.set(|s| s.counter = 9);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn subscriber_can_read_the_store_back() {
        let store: Store<UiState> = Store::in_memory("ui", UiState::default);
        let observed = Arc::new(AtomicUsize::new(0));

        let handle = store.clone();
        let observed2 = Arc::clone(&observed);
        store.subscribe(move |_| {
            observed2.store(handle.get().counter as usize, Ordering::SeqCst);
        });

        store.set(|s| s.counter = 11);
        assert_eq!(observed.load(Ordering::SeqCst), 11);
    }
}
