//! Subscription registry: routes publishes to interested observers and
//! reclaims cache entries nobody is watching anymore.
//!
//! The registry exclusively owns its [`ObjectCache`]; everything outside
//! reads through the publish path and writes through the explicit
//! [`apply_write`](SubscriberRegistry::apply_write) /
//! [`evict`](SubscriberRegistry::evict) passthroughs.
//!
//! Each observer is in exactly one mode at a time: id-scoped (an explicit
//! id set) or all-scoped (everything, optionally narrowed by a predicate).
//! A reverse index id → observers is kept consistent with the per-observer
//! mode at every step; both live under one lock, and the lock is never held
//! across a suspension point or a callback invocation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use relic_core::{ObjectId, RelicResult};

use crate::cache::ObjectCache;
use crate::observer::{Callback, Observer, ObserverId, Predicate};

/// Subscription mode of one observer.
enum SubscriptionScope<T> {
    /// Interested in an explicit, non-empty id set.
    Ids(HashSet<ObjectId>),
    /// Interested in every object, optionally narrowed by a predicate.
    All(Option<Predicate<T>>),
}

struct Registration<T> {
    deliver: Callback<T>,
    scope: SubscriptionScope<T>,
}

struct RegistryState<T> {
    observers: HashMap<ObserverId, Registration<T>>,
    /// Reverse index over id-scoped registrations.
    by_id: HashMap<ObjectId, HashSet<ObserverId>>,
}

impl<T> RegistryState<T> {
    fn new() -> Self {
        Self {
            observers: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    fn any_all_scoped(&self) -> bool {
        self.observers
            .values()
            .any(|r| matches!(r.scope, SubscriptionScope::All(_)))
    }
}

/// Pub/sub hub for one object store.
pub struct SubscriberRegistry<T> {
    cache: ObjectCache<T>,
    state: Mutex<RegistryState<T>>,
}

impl<T: Clone + Send + Sync + 'static> SubscriberRegistry<T> {
    /// Take exclusive ownership of a cache and start routing publishes.
    pub fn new(cache: ObjectCache<T>) -> Self {
        Self {
            cache,
            state: Mutex::new(RegistryState::new()),
        }
    }

    // ========================================================================
    // SUBSCRIPTION LIFECYCLE
    // ========================================================================

    /// Subscribe an observer to an explicit id set.
    ///
    /// An empty id set is a no-op. Repeated calls union with the existing
    /// set; they do not replace it. An observer currently subscribed to all
    /// objects is switched to id-scoped mode, silently and without orphan
    /// eviction.
    pub fn subscribe(&self, observer: &Observer<T>, ids: &[ObjectId]) {
        if ids.is_empty() {
            return;
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let registration = state
            .observers
            .entry(observer.id())
            .or_insert_with(|| Registration {
                deliver: observer.callback(),
                scope: SubscriptionScope::Ids(HashSet::new()),
            });
        match &mut registration.scope {
            SubscriptionScope::Ids(set) => {
                set.extend(ids.iter().cloned());
            }
            scope => {
                *scope = SubscriptionScope::Ids(ids.iter().cloned().collect());
            }
        }

        for id in ids {
            state
                .by_id
                .entry(id.clone())
                .or_default()
                .insert(observer.id());
        }
    }

    /// Subscribe an observer to all objects, optionally narrowed by a
    /// predicate.
    ///
    /// Any prior id-scoped registration is silently dropped first, without
    /// orphan eviction; eviction is deferred until the observer actually
    /// unsubscribes.
    pub fn subscribe_all(&self, observer: &Observer<T>, predicate: Option<Predicate<T>>) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if let Some(registration) = state.observers.get(&observer.id()) {
            if let SubscriptionScope::Ids(set) = &registration.scope {
                for id in set {
                    if let Some(subscribers) = state.by_id.get_mut(id) {
                        subscribers.remove(&observer.id());
                        if subscribers.is_empty() {
                            state.by_id.remove(id);
                        }
                    }
                }
            }
        }

        state.observers.insert(
            observer.id(),
            Registration {
                deliver: observer.callback(),
                scope: SubscriptionScope::All(predicate),
            },
        );
    }

    /// Unsubscribe an observer, evicting newly orphaned cache entries.
    pub fn unsubscribe(&self, observer: &Observer<T>) {
        self.unsubscribe_with(observer, true);
    }

    /// Unsubscribe an observer, optionally skipping orphan eviction.
    ///
    /// Eviction rules: any remaining all-scoped observer (filtered or not)
    /// keeps every id warm. Otherwise, removing the last all-scoped
    /// observer evicts every id with no id-scoped observer, and removing an
    /// id-scoped observer evicts the ids it alone was watching.
    pub fn unsubscribe_with(&self, observer: &Observer<T>, evict_orphans: bool) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let registration = match state.observers.remove(&observer.id()) {
            Some(registration) => registration,
            None => return,
        };

        match registration.scope {
            SubscriptionScope::All(_) => {
                if evict_orphans && !state.any_all_scoped() {
                    let keep: Vec<ObjectId> = state.by_id.keys().cloned().collect();
                    tracing::debug!(
                        store = %self.cache.name(),
                        kept = keep.len(),
                        "last all-scoped observer left; evicting orphaned entries"
                    );
                    self.cache.delete_all_but(&keep);
                }
            }
            SubscriptionScope::Ids(set) => {
                let mut orphans = Vec::new();
                for id in set {
                    if let Some(subscribers) = state.by_id.get_mut(&id) {
                        subscribers.remove(&observer.id());
                        if subscribers.is_empty() {
                            state.by_id.remove(&id);
                            orphans.push(id);
                        }
                    }
                }

                // No id is orphaned while anyone is subscribed to all.
                if evict_orphans && !orphans.is_empty() && !state.any_all_scoped() {
                    tracing::debug!(
                        store = %self.cache.name(),
                        ids = ?orphans,
                        "evicting newly orphaned entries"
                    );
                    self.cache.delete(&orphans);
                }
            }
        }
    }

    // ========================================================================
    // PUBLISHING
    // ========================================================================

    /// Publish current data to the given observers.
    ///
    /// Each observer first receives the loading marker synchronously, then
    /// its own view of the resolved data: everything for an unfiltered
    /// all-scoped observer, the predicate-passing subset for a filtered
    /// one, the intersection with its id set for an id-scoped one. Missing
    /// ids are simply absent, never null-padded.
    pub async fn publish(&self, observers: &[ObserverId]) -> RelicResult<()> {
        let targets: Vec<(ObserverId, Callback<T>)> = {
            let state = self.state.lock().unwrap();
            observers
                .iter()
                .filter_map(|id| {
                    state
                        .observers
                        .get(id)
                        .map(|r| (*id, Callback::clone(&r.deliver)))
                })
                .collect()
        };
        self.publish_to(targets).await
    }

    /// Publish to exactly the observers affected by the given created or
    /// updated objects: all-scoped observers whose predicate (if any)
    /// matches at least one changed value, plus id-scoped observers
    /// subscribed to at least one changed id.
    pub async fn publish_changed(&self, changed: &[(ObjectId, T)]) -> RelicResult<()> {
        let targets = self.affected_by(changed);
        self.publish_to(targets).await
    }

    /// Publish a deletion.
    ///
    /// The affected observer set is computed against the pre-deletion
    /// values, so predicates can still match the last-known state. Every
    /// observer is then forcibly unsubscribed from the deleted ids before
    /// data is resolved, so the publish below cannot re-fetch objects that
    /// no longer exist. Observers left with an empty id set are removed
    /// entirely and only receive the loading marker.
    pub async fn publish_deleted(&self, deleted: &[(ObjectId, T)]) -> RelicResult<()> {
        let targets = self.affected_by(deleted);

        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;

            for (id, _) in deleted {
                state.by_id.remove(id);
            }

            let mut emptied = Vec::new();
            for (observer_id, registration) in state.observers.iter_mut() {
                if let SubscriptionScope::Ids(set) = &mut registration.scope {
                    for (id, _) in deleted {
                        set.remove(id);
                    }
                    if set.is_empty() {
                        emptied.push(*observer_id);
                    }
                }
            }
            for observer_id in emptied {
                state.observers.remove(&observer_id);
            }
        }

        self.publish_to(targets).await
    }

    fn affected_by(&self, touched: &[(ObjectId, T)]) -> Vec<(ObserverId, Callback<T>)> {
        let state = self.state.lock().unwrap();
        state
            .observers
            .iter()
            .filter(|(_, registration)| match &registration.scope {
                SubscriptionScope::All(None) => true,
                SubscriptionScope::All(Some(filter)) => {
                    touched.iter().any(|(_, value)| filter(value))
                }
                SubscriptionScope::Ids(set) => touched.iter().any(|(id, _)| set.contains(id)),
            })
            .map(|(id, registration)| (*id, Callback::clone(&registration.deliver)))
            .collect()
    }

    async fn publish_to(&self, targets: Vec<(ObserverId, Callback<T>)>) -> RelicResult<()> {
        if targets.is_empty() {
            return Ok(());
        }

        // Loading marker before any resolution so consumers can render a
        // pending state immediately.
        for (_, deliver) in &targets {
            deliver(None);
        }

        // Minimal resolution: the whole set iff any target is all-scoped,
        // otherwise the union of the targets' id sets.
        let (ids, any_all_scoped) = {
            let state = self.state.lock().unwrap();
            let mut ids: IndexSet<ObjectId> = IndexSet::new();
            let mut any_all_scoped = false;
            for (observer_id, _) in &targets {
                match state.observers.get(observer_id).map(|r| &r.scope) {
                    Some(SubscriptionScope::All(_)) => {
                        any_all_scoped = true;
                        break;
                    }
                    Some(SubscriptionScope::Ids(set)) => ids.extend(set.iter().cloned()),
                    None => {}
                }
            }
            (ids.into_iter().collect::<Vec<_>>(), any_all_scoped)
        };

        let resolved = if any_all_scoped {
            self.cache.get_all().await?
        } else {
            self.cache.get(&ids).await?
        };

        // Views are computed from the registrations as they stand now; a
        // registration that vanished while resolving gets no data delivery.
        let views: Vec<(Callback<T>, IndexMap<ObjectId, T>)> = {
            let state = self.state.lock().unwrap();
            targets
                .iter()
                .filter_map(|(observer_id, deliver)| {
                    let scope = state.observers.get(observer_id).map(|r| &r.scope)?;
                    let view = match scope {
                        SubscriptionScope::All(None) => resolved.clone(),
                        SubscriptionScope::All(Some(filter)) => resolved
                            .iter()
                            .filter(|(_, value)| filter(value))
                            .map(|(id, value)| (id.clone(), value.clone()))
                            .collect(),
                        SubscriptionScope::Ids(set) => resolved
                            .iter()
                            .filter(|(id, _)| set.contains(*id))
                            .map(|(id, value)| (id.clone(), value.clone()))
                            .collect(),
                    };
                    Some((Callback::clone(deliver), view))
                })
                .collect()
        };

        for (deliver, view) in views {
            deliver(Some(view));
        }
        Ok(())
    }

    // ========================================================================
    // WRITE-PATH PLUMBING
    // ========================================================================

    /// Write-through just-written values, stamped with the current time.
    pub fn apply_write(&self, values: impl IntoIterator<Item = (ObjectId, T)>) {
        self.cache.update(values, Utc::now());
    }

    /// Drop the given ids from the cache after a backend delete.
    pub fn evict(&self, ids: &[ObjectId]) {
        self.cache.delete(ids);
    }

    /// Resolve the given ids through the cache.
    pub async fn resolve(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, T>> {
        self.cache.get(ids).await
    }

    /// Resolve the whole object set through the cache.
    pub async fn resolve_all(&self) -> RelicResult<IndexMap<ObjectId, T>> {
        self.cache.get_all().await
    }

    // ========================================================================
    // DIAGNOSTICS
    // ========================================================================

    /// Whether an id is currently cached.
    pub fn is_cached(&self, id: &str) -> bool {
        self.cache.contains(id)
    }

    /// Number of cached entries.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.state.lock().unwrap().observers.len()
    }

    /// The ids an observer is currently subscribed to; empty for all-scoped
    /// or unregistered observers.
    pub fn subscribed_ids(&self, observer: &Observer<T>) -> Vec<ObjectId> {
        let state = self.state.lock().unwrap();
        match state.observers.get(&observer.id()).map(|r| &r.scope) {
            Some(SubscriptionScope::Ids(set)) => {
                let mut ids: Vec<ObjectId> = set.iter().cloned().collect();
                ids.sort();
                ids
            }
            _ => Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for SubscriberRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("cache", &self.cache)
            .finish()
    }
}
