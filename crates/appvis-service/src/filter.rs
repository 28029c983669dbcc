//! The `VisibilityFilter` facade.
//!
//! This is the entry point the surrounding package-management service
//! talks to. Queries resolve in the decision cache once the system is
//! ready; before that they fall through to the uncached engine walk.
//! Mutations update the relation store and then either patch the cache
//! incrementally or leave it to the system-ready rebuild.
//!
//! # Locking
//!
//! Three locks are involved, always acquired in the order
//! package-manager-lock (owned by the [`StateProvider`]) ->
//! relation-store lock -> cache lock. Mutations run on the caller's
//! thread inside `run_with_state`; the initial cache build runs on the
//! background executor, which takes the package-manager lock twice (once
//! to snapshot, once to validate) without holding the other locks in
//! between.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use appvis_core::config::FeatureConfig;
use appvis_core::engine::{self, Setting};
use appvis_core::ident::{AppId, Uid, UserId};
use appvis_core::overlay::OverlayActors;
use appvis_core::package::{PackageManifest, PackageSetting, PackageSnapshot};
use appvis_core::store::RelationStore;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheLookup, DecisionCache};
use crate::executor::BackgroundExecutor;
use crate::state::StateProvider;

/// Build-time switch for verbose decision logging regardless of per-app
/// opt-in.
pub const DEBUG_LOGGING: bool = false;

/// Decides, for every pair of installed applications, whether one may
/// observe the other.
pub struct VisibilityFilter {
    state: Arc<dyn StateProvider>,
    config: Arc<dyn FeatureConfig>,
    overlay: Arc<dyn OverlayActors>,
    executor: BackgroundExecutor,
    relations: Arc<RwLock<RelationStore>>,
    cache: Arc<Mutex<Option<DecisionCache>>>,
}

/// Outcome of consulting the decision cache.
enum CachedVerdict {
    /// Cached as visible.
    Allow,
    /// Cached as filtered.
    Block,
    /// Hard miss: the caller is unknown to the cache.
    Unknown,
    /// No cache exists yet.
    NoCache,
}

impl VisibilityFilter {
    /// Creates a filter with a dedicated background worker for the
    /// initial cache build.
    ///
    /// `device_force_queryable` and `system_apps_queryable` are the
    /// device configuration inputs, read once here.
    #[must_use]
    pub fn new(
        state: Arc<dyn StateProvider>,
        config: Arc<dyn FeatureConfig>,
        overlay: Arc<dyn OverlayActors>,
        device_force_queryable: Vec<String>,
        system_apps_queryable: bool,
    ) -> Self {
        Self::with_executor(
            state,
            config,
            overlay,
            device_force_queryable,
            system_apps_queryable,
            BackgroundExecutor::new("appvis-filter"),
        )
    }

    /// Creates a filter with a caller-supplied executor. Tests inject
    /// [`BackgroundExecutor::inline`] for deterministic completion.
    #[must_use]
    pub fn with_executor(
        state: Arc<dyn StateProvider>,
        config: Arc<dyn FeatureConfig>,
        overlay: Arc<dyn OverlayActors>,
        device_force_queryable: Vec<String>,
        system_apps_queryable: bool,
        executor: BackgroundExecutor,
    ) -> Self {
        Self {
            state,
            config,
            overlay,
            executor,
            relations: Arc::new(RwLock::new(RelationStore::new(
                device_force_queryable,
                system_apps_queryable,
            ))),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns true if the caller must not see the target package.
    ///
    /// Must not be invoked while holding the package-manager lock or any
    /// lock acquired after it; use [`should_filter_at`] from inside
    /// `run_with_state`.
    ///
    /// [`should_filter_at`]: Self::should_filter_at
    #[must_use]
    pub fn should_filter(
        &self,
        caller_uid: Uid,
        caller_setting: Option<&Setting>,
        target: &PackageSetting,
        target_user: UserId,
    ) -> bool {
        if exempt_pair(caller_uid, target) {
            return false;
        }
        match self.lookup_cached(caller_uid, target, target_user) {
            CachedVerdict::Allow => false,
            CachedVerdict::Unknown => true,
            CachedVerdict::Block => self.finish_blocked(caller_uid, target),
            CachedVerdict::NoCache => {
                let mut filtered = true;
                self.state.run_with_state(&mut |snapshot, _users| {
                    filtered = self.evaluate_uncached(
                        snapshot,
                        caller_uid,
                        caller_setting,
                        target,
                        target_user,
                    );
                });
                if filtered {
                    self.finish_blocked(caller_uid, target)
                } else {
                    false
                }
            }
        }
    }

    /// [`should_filter`] for callers that already hold the
    /// package-manager lock and can supply the snapshot directly.
    ///
    /// [`should_filter`]: Self::should_filter
    #[must_use]
    pub fn should_filter_at(
        &self,
        snapshot: &PackageSnapshot,
        caller_uid: Uid,
        caller_setting: Option<&Setting>,
        target: &PackageSetting,
        target_user: UserId,
    ) -> bool {
        if exempt_pair(caller_uid, target) {
            return false;
        }
        match self.lookup_cached(caller_uid, target, target_user) {
            CachedVerdict::Allow => false,
            CachedVerdict::Unknown => true,
            CachedVerdict::Block => self.finish_blocked(caller_uid, target),
            CachedVerdict::NoCache => {
                if self.evaluate_uncached(snapshot, caller_uid, caller_setting, target, target_user)
                {
                    self.finish_blocked(caller_uid, target)
                } else {
                    false
                }
            }
        }
    }

    /// Grants runtime visibility of `visible_uid` to `recipient_uid`.
    /// No-op when the two are equal. The effect is observable as soon as
    /// this returns.
    pub fn grant_implicit_access(&self, recipient_uid: Uid, visible_uid: Uid) {
        if recipient_uid == visible_uid {
            return;
        }
        let newly_added = self
            .relations
            .write()
            .expect("lock poisoned")
            .add_implicit_access(recipient_uid, visible_uid);
        if newly_added {
            debug!(%recipient_uid, %visible_uid, "implicit access granted");
        }
        let mut guard = self.cache.lock().expect("lock poisoned");
        if let Some(cache) = guard.as_mut() {
            // One-off update; we already have all the information we need.
            cache.insert(recipient_uid, visible_uid, false);
        }
    }

    /// Marks the system ready: kicks off the asynchronous build of the
    /// decision cache.
    pub fn on_system_ready(&self) {
        self.overlay.rebuild_if_deferred();
        self.config.on_system_ready();

        let state = Arc::clone(&self.state);
        let relations = Arc::clone(&self.relations);
        let cache = Arc::clone(&self.cache);
        let config = Arc::clone(&self.config);
        let overlay = Arc::clone(&self.overlay);
        let submitted = self.executor.execute(move || {
            rebuild_cache_async(&state, &relations, &cache, config.as_ref(), overlay.as_ref());
        });
        if submitted.is_err() {
            warn!("background executor unavailable; building cache on the caller's thread");
            rebuild_cache_sync(
                &self.state,
                &self.relations,
                &self.cache,
                self.config.as_ref(),
                self.overlay.as_ref(),
            );
        }
    }

    /// Adds a package to the filter. With `is_replace` the prior rules
    /// for the package are removed first, within the same state snapshot
    /// discipline.
    pub fn add_package(&self, setting: &Arc<PackageSetting>, is_replace: bool) {
        if is_replace {
            self.remove_package(setting);
        }
        self.state.run_with_state(&mut |snapshot, users| {
            let mut store = self.relations.write().expect("lock poisoned");
            store.add_package(setting, snapshot, self.overlay.as_ref(), self.config.as_ref());
            let mut guard = self.cache.lock().expect("lock poisoned");
            if let Some(cache) = guard.as_mut() {
                update_cache_rows(
                    cache,
                    &mut store,
                    self.config.as_ref(),
                    self.overlay.as_ref(),
                    snapshot,
                    users,
                    setting,
                    None,
                );
            }
            // Without a cache the entire thing is built at system ready.
        });
    }

    /// Removes a package from the filter. Surviving shared-user siblings
    /// are re-added to the relation store and their cache rows recomputed.
    pub fn remove_package(&self, setting: &Arc<PackageSetting>) {
        self.state.run_with_state(&mut |snapshot, users| {
            let mut store = self.relations.write().expect("lock poisoned");
            store.remove_package(
                setting,
                snapshot,
                users,
                self.overlay.as_ref(),
                self.config.as_ref(),
            );
            let mut guard = self.cache.lock().expect("lock poisoned");
            if let Some(cache) = guard.as_mut() {
                cache.remove_app_id(setting.app_id);
                if let Some(shared_user) = setting.shared_user {
                    let siblings: Vec<_> = snapshot
                        .shared_user_members(shared_user, Some(&setting.name))
                        .cloned()
                        .collect();
                    for sibling in siblings {
                        update_cache_rows(
                            cache,
                            &mut store,
                            self.config.as_ref(),
                            self.overlay.as_ref(),
                            snapshot,
                            users,
                            &sibling,
                            Some(&setting.name),
                        );
                    }
                }
            }
        });
    }

    /// Rebuilds the cache after the active-user set changed. No-op before
    /// the system is ready.
    pub fn on_users_changed(&self) {
        let cache_present = self.cache.lock().expect("lock poisoned").is_some();
        if cache_present {
            rebuild_cache_sync(
                &self.state,
                &self.relations,
                &self.cache,
                self.config.as_ref(),
                self.overlay.as_ref(),
            );
        }
    }

    /// Recomputes the cache rows touching one package after its
    /// compatibility flag flipped.
    pub fn on_compat_change(&self, package_name: &str) {
        self.state.run_with_state(&mut |snapshot, users| {
            let Some(subject) = snapshot.get(package_name).cloned() else {
                return;
            };
            let mut store = self.relations.write().expect("lock poisoned");
            let mut guard = self.cache.lock().expect("lock poisoned");
            if let Some(cache) = guard.as_mut() {
                update_cache_rows(
                    cache,
                    &mut store,
                    self.config.as_ref(),
                    self.overlay.as_ref(),
                    snapshot,
                    users,
                    &subject,
                    None,
                );
            }
        });
    }

    /// Computes, per user, the sorted app ids that may see `target`.
    /// Returns `None` when the target is force-queryable and therefore
    /// visible to all. Callers hold the package-manager lock and pass the
    /// snapshot.
    #[must_use]
    pub fn visibility_whitelist(
        &self,
        target: &Arc<PackageSetting>,
        users: &[UserId],
        snapshot: &PackageSnapshot,
    ) -> Option<HashMap<UserId, Vec<AppId>>> {
        if self
            .relations
            .read()
            .expect("lock poisoned")
            .is_force_queryable(target.app_id)
        {
            return None;
        }
        let mut result = HashMap::with_capacity(users.len());
        for &user in users {
            let mut visible = BTreeSet::new();
            for existing in snapshot.settings() {
                if existing.app_id.is_privileged() || visible.contains(&existing.app_id) {
                    continue;
                }
                let caller_uid = Uid::new(user, existing.app_id);
                let caller_setting = Setting::Package(existing.clone());
                if !self.should_filter_at(snapshot, caller_uid, Some(&caller_setting), target, user)
                {
                    visible.insert(existing.app_id);
                }
            }
            result.insert(user, visible.into_iter().collect());
        }
        Some(result)
    }

    /// Waits for background work submitted so far (the asynchronous cache
    /// build) to finish. Intended for tests and orderly shutdown.
    pub fn flush_background(&self) {
        self.executor.flush();
    }

    /// Clones the current decision cache, if one has been published.
    /// Diagnostic surface; the filter itself always reads under the cache
    /// lock.
    #[must_use]
    pub fn cache_snapshot(&self) -> Option<DecisionCache> {
        self.cache.lock().expect("lock poisoned").clone()
    }

    fn lookup_cached(
        &self,
        caller_uid: Uid,
        target: &PackageSetting,
        target_user: UserId,
    ) -> CachedVerdict {
        let guard = self.cache.lock().expect("lock poisoned");
        let Some(cache) = guard.as_ref() else {
            return CachedVerdict::NoCache;
        };
        let target_uid = Uid::new(target_user, target.app_id);
        match cache.lookup(caller_uid, target_uid) {
            CacheLookup::Hit(true) => CachedVerdict::Block,
            CacheLookup::Hit(false) => CachedVerdict::Allow,
            CacheLookup::MissingRow => {
                error!(%caller_uid, "encountered calling uid with no cached rules");
                CachedVerdict::Unknown
            }
            CacheLookup::MissingEntry => {
                warn!(%caller_uid, %target_uid, "encountered calling -> target with no cached rules");
                CachedVerdict::Unknown
            }
        }
    }

    fn evaluate_uncached(
        &self,
        snapshot: &PackageSnapshot,
        caller_uid: Uid,
        caller_setting: Option<&Setting>,
        target: &PackageSetting,
        target_user: UserId,
    ) -> bool {
        let mut store = self.relations.write().expect("lock poisoned");
        engine::evaluate(
            &mut store,
            self.config.as_ref(),
            self.overlay.as_ref(),
            snapshot,
            caller_uid,
            caller_setting,
            target,
            target_user,
        )
    }

    fn finish_blocked(&self, caller_uid: Uid, target: &PackageSetting) -> bool {
        if DEBUG_LOGGING || self.config.is_logging_enabled(caller_uid.app_id()) {
            info!(%caller_uid, target = %target.name, "BLOCKED");
        }
        !engine::DEBUG_ALLOW_ALL
    }

    pub(crate) fn relations_for_dump(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, RelationStore> {
        self.relations.read().expect("lock poisoned")
    }

    /// The feature configuration this filter consults.
    #[must_use]
    pub fn feature_config(&self) -> &dyn FeatureConfig {
        self.config.as_ref()
    }
}

/// Rule (1) of the decision precedence: privileged identities and
/// self-queries are never filtered.
fn exempt_pair(caller_uid: Uid, target: &PackageSetting) -> bool {
    let caller_app_id = caller_uid.app_id();
    caller_app_id.is_privileged()
        || target.app_id.is_privileged()
        || caller_app_id == target.app_id
}

/// Recomputes the cache rows for `subject` against every other package,
/// in both directions, across every user pair.
#[allow(clippy::too_many_arguments)]
fn update_cache_rows(
    cache: &mut DecisionCache,
    store: &mut RelationStore,
    config: &dyn FeatureConfig,
    overlay: &dyn OverlayActors,
    snapshot: &PackageSnapshot,
    users: &[UserId],
    subject: &Arc<PackageSetting>,
    skip_package: Option<&str>,
) {
    let subject_setting = Setting::Package(Arc::clone(subject));
    for other in snapshot.settings() {
        if other.app_id == subject.app_id {
            continue;
        }
        if Some(other.name.as_str()) == skip_package
            || Some(subject.name.as_str()) == skip_package
        {
            continue;
        }
        let other_setting = Setting::Package(Arc::clone(other));
        for &subject_user in users {
            for &other_user in users {
                let subject_uid = Uid::new(subject_user, subject.app_id);
                let other_uid = Uid::new(other_user, other.app_id);
                let filtered = engine::evaluate(
                    store,
                    config,
                    overlay,
                    snapshot,
                    subject_uid,
                    Some(&subject_setting),
                    other,
                    other_user,
                );
                cache.insert(subject_uid, other_uid, filtered);
                let filtered = engine::evaluate(
                    store,
                    config,
                    overlay,
                    snapshot,
                    other_uid,
                    Some(&other_setting),
                    subject,
                    subject_user,
                );
                cache.insert(other_uid, subject_uid, filtered);
            }
        }
    }
}

fn build_cache(
    store: &mut RelationStore,
    config: &dyn FeatureConfig,
    overlay: &dyn OverlayActors,
    snapshot: &PackageSnapshot,
    users: &[UserId],
) -> DecisionCache {
    let mut cache = DecisionCache::new();
    for setting in snapshot.settings() {
        update_cache_rows(&mut cache, store, config, overlay, snapshot, users, setting, None);
    }
    cache
}

/// Builds and publishes the cache synchronously under the
/// package-manager lock.
fn rebuild_cache_sync(
    state: &Arc<dyn StateProvider>,
    relations: &Arc<RwLock<RelationStore>>,
    cache: &Arc<Mutex<Option<DecisionCache>>>,
    config: &dyn FeatureConfig,
    overlay: &dyn OverlayActors,
) {
    state.run_with_state(&mut |snapshot, users| {
        let mut store = relations.write().expect("lock poisoned");
        let fresh = build_cache(&mut store, config, overlay, snapshot, users);
        *cache.lock().expect("lock poisoned") = Some(fresh);
    });
}

/// The asynchronous rebuild protocol: snapshot under the lock, compute
/// without it, validate, publish; falls back to one synchronous
/// rebuild when the world changed underneath.
fn rebuild_cache_async(
    state: &Arc<dyn StateProvider>,
    relations: &Arc<RwLock<RelationStore>>,
    cache: &Arc<Mutex<Option<DecisionCache>>>,
    config: &dyn FeatureConfig,
    overlay: &dyn OverlayActors,
) {
    let mut captured: Option<(PackageSnapshot, Vec<UserId>)> = None;
    let mut manifests: HashMap<String, Option<Arc<PackageManifest>>> = HashMap::new();
    state.run_with_state(&mut |snapshot, users| {
        // Drain any pending component recompute while the authoritative
        // snapshot is at hand, so the lock-free phase only reads.
        let mut store = relations.write().expect("lock poisoned");
        if store.component_recompute_required() {
            store.recompute_component_edges(snapshot);
        }
        drop(store);
        // Settings are retained across updates; the manifest references
        // are what change, so they are what we validate against.
        manifests = snapshot
            .settings()
            .map(|setting| (setting.name.clone(), setting.pkg.clone()))
            .collect();
        captured = Some((snapshot.clone(), users.to_vec()));
    });
    let Some((snapshot, users)) = captured else {
        return;
    };

    let fresh = {
        let mut store = relations.write().expect("lock poisoned");
        build_cache(&mut store, config, overlay, &snapshot, &users)
    };

    let mut changed = false;
    state.run_with_state(&mut |snapshot, _users| {
        changed = !snapshot_unchanged(snapshot, &manifests);
    });
    if changed {
        info!("package state changed during async cache build; rebuilding under lock");
        rebuild_cache_sync(state, relations, cache, config, overlay);
    } else {
        *cache.lock().expect("lock poisoned") = Some(fresh);
    }
}

fn snapshot_unchanged(
    snapshot: &PackageSnapshot,
    manifests: &HashMap<String, Option<Arc<PackageManifest>>>,
) -> bool {
    if snapshot.len() != manifests.len() {
        return false;
    }
    snapshot.settings().all(|setting| {
        manifests
            .get(&setting.name)
            .is_some_and(|previous| match (previous, &setting.pkg) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            })
    })
}
