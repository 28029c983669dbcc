//! The relation store: the normalized graph of pairwise visibility
//! relations.
//!
//! Four maps record the reasons one application may see another:
//!
//! - `force_queryable`: app ids visible to every caller
//! - `queries_via_package`: caller -> targets named by package (or related
//!   through install provenance or instrumentation)
//! - `queries_via_component`: caller -> targets whose exported components
//!   match the caller's `<queries>` intents or provider authorities
//! - `implicitly_queryable`: uid -> uids made visible by runtime
//!   interaction
//!
//! The maps are redundant views of a single "who sees whom" graph, kept
//! separate for lookup speed and so each can be maintained incrementally.
//!
//! Component edges are computed against the protected-broadcast set, which
//! is itself the union of declarations across all installed packages.
//! When that set grows (or shrinks on removal) previously computed edges
//! may be wrong, so the store raises `component_recompute_required`
//! instead of recomputing eagerly; the next consumer that needs component
//! edges drains it with [`RelationStore::recompute_component_edges`].
//!
//! All mutation happens under the package-manager lock via snapshots; the
//! store itself holds no locks.

use std::collections::{HashMap, HashSet};
use std::mem;

use tracing::debug;

use crate::config::FeatureConfig;
use crate::ident::{AppId, Uid, UserId};
use crate::intent::Intent;
use crate::overlay::OverlayActors;
use crate::package::{
    PackageManifest, PackageSetting, PackageSnapshot, ParsedComponent, SigningFingerprint,
    PLATFORM_PACKAGE, QUERY_ALL_PACKAGES,
};

/// The normalized graph of pairwise visibility relations, plus the
/// protected-broadcast set and the device-level force-queryable
/// configuration it is evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationStore {
    force_queryable: HashSet<AppId>,
    queries_via_package: HashMap<AppId, HashSet<AppId>>,
    queries_via_component: HashMap<AppId, HashSet<AppId>>,
    implicitly_queryable: HashMap<Uid, HashSet<Uid>>,
    protected_broadcasts: HashSet<String>,
    component_recompute_required: bool,
    platform_fingerprint: Option<SigningFingerprint>,
    device_force_queryable: Vec<String>,
    system_apps_queryable: bool,
}

impl RelationStore {
    /// Creates an empty store.
    ///
    /// `device_force_queryable` is the device-provided list of package
    /// names that are always queryable; `system_apps_queryable` makes
    /// every system package queryable, in which case the per-package list
    /// is redundant and ignored.
    #[must_use]
    pub fn new(device_force_queryable: Vec<String>, system_apps_queryable: bool) -> Self {
        let device_force_queryable = if system_apps_queryable {
            Vec::new()
        } else {
            device_force_queryable
        };
        Self {
            force_queryable: HashSet::new(),
            queries_via_package: HashMap::new(),
            queries_via_component: HashMap::new(),
            implicitly_queryable: HashMap::new(),
            protected_broadcasts: HashSet::new(),
            component_recompute_required: false,
            platform_fingerprint: None,
            device_force_queryable,
            system_apps_queryable,
        }
    }

    /// True if every system package is queryable on this device.
    #[must_use]
    pub fn system_apps_queryable(&self) -> bool {
        self.system_apps_queryable
    }

    /// True if the target app id is visible to every caller.
    #[must_use]
    pub fn is_force_queryable(&self, app_id: AppId) -> bool {
        self.force_queryable.contains(&app_id)
    }

    /// True if a package-name-based edge exists from caller to target.
    #[must_use]
    pub fn queries_via_package(&self, caller: AppId, target: AppId) -> bool {
        self.queries_via_package
            .get(&caller)
            .is_some_and(|targets| targets.contains(&target))
    }

    /// True if a component-match edge exists from caller to target.
    #[must_use]
    pub fn queries_via_component(&self, caller: AppId, target: AppId) -> bool {
        self.queries_via_component
            .get(&caller)
            .is_some_and(|targets| targets.contains(&target))
    }

    /// True if a runtime-interaction edge exists from caller to target.
    #[must_use]
    pub fn is_implicitly_queryable(&self, caller: Uid, target: Uid) -> bool {
        self.implicitly_queryable
            .get(&caller)
            .is_some_and(|targets| targets.contains(&target))
    }

    /// Records a runtime-interaction grant. Returns true if the edge was
    /// newly added.
    pub fn add_implicit_access(&mut self, recipient: Uid, visible: Uid) -> bool {
        self.implicitly_queryable
            .entry(recipient)
            .or_default()
            .insert(visible)
    }

    /// True if component edges are stale and must be recomputed before
    /// they are consulted.
    #[must_use]
    pub fn component_recompute_required(&self) -> bool {
        self.component_recompute_required
    }

    /// The union of protected-broadcast actions across installed packages.
    #[must_use]
    pub fn protected_broadcasts(&self) -> &HashSet<String> {
        &self.protected_broadcasts
    }

    /// The set of force-queryable app ids, for diagnostics.
    #[must_use]
    pub fn force_queryable_set(&self) -> &HashSet<AppId> {
        &self.force_queryable
    }

    /// The package-name edge map, for diagnostics.
    #[must_use]
    pub fn package_edges(&self) -> &HashMap<AppId, HashSet<AppId>> {
        &self.queries_via_package
    }

    /// The component edge map, for diagnostics.
    #[must_use]
    pub fn component_edges(&self) -> &HashMap<AppId, HashSet<AppId>> {
        &self.queries_via_component
    }

    /// The runtime-interaction edge map, for diagnostics.
    #[must_use]
    pub fn implicit_edges(&self) -> &HashMap<Uid, HashSet<Uid>> {
        &self.implicitly_queryable
    }

    /// Adds a package to the relation graph.
    ///
    /// `snapshot` is the authoritative package table, already containing
    /// the new setting. Also invoked to re-establish the edges of
    /// surviving shared-user siblings after a member is removed.
    pub fn add_package(
        &mut self,
        new_setting: &PackageSetting,
        snapshot: &PackageSnapshot,
        overlay: &dyn OverlayActors,
        config: &dyn FeatureConfig,
    ) {
        if new_setting.name == PLATFORM_PACKAGE {
            // The platform package defines the reference signing identity;
            // packages added before it are revisited for promotion.
            self.platform_fingerprint = Some(new_setting.signing.fingerprint.clone());
            for existing in snapshot.settings() {
                if is_platform_signed(&new_setting.signing.fingerprint, existing) {
                    self.force_queryable.insert(existing.app_id);
                }
            }
        }

        let Some(new_pkg) = &new_setting.pkg else {
            return;
        };

        let before = self.protected_broadcasts.len();
        self.protected_broadcasts
            .extend(new_pkg.protected_broadcasts.iter().cloned());
        if self.protected_broadcasts.len() > before {
            debug!(
                package = %new_setting.name,
                "protected broadcasts grew; component edges marked stale"
            );
            self.component_recompute_required = true;
        }

        let new_is_force_queryable = self.force_queryable.contains(&new_setting.app_id)
            || new_setting.force_queryable_override
            || (new_pkg.force_queryable && new_setting.signing.platform_equivalent)
            || (new_setting.is_system
                && (self.system_apps_queryable
                    || new_pkg.force_queryable
                    || self
                        .device_force_queryable
                        .iter()
                        .any(|name| name == &new_pkg.package_name)));
        if new_is_force_queryable
            || self
                .platform_fingerprint
                .as_ref()
                .is_some_and(|fp| is_platform_signed(fp, new_setting))
        {
            self.force_queryable.insert(new_setting.app_id);
        }

        for existing in snapshot.settings() {
            if existing.app_id == new_setting.app_id {
                continue;
            }
            let Some(existing_pkg) = &existing.pkg else {
                continue;
            };
            // The ability of already-present packages to see the new one.
            if !new_is_force_queryable {
                if !self.component_recompute_required
                    && can_query_via_components(existing_pkg, new_pkg, &self.protected_broadcasts)
                {
                    add_edge(
                        &mut self.queries_via_component,
                        existing.app_id,
                        new_setting.app_id,
                    );
                }
                if can_query_via_package(existing_pkg, new_pkg)
                    || can_query_as_installer(existing, new_pkg)
                {
                    add_edge(
                        &mut self.queries_via_package,
                        existing.app_id,
                        new_setting.app_id,
                    );
                }
            }
            // The new package's ability to see the ones already present.
            if !self.force_queryable.contains(&existing.app_id) {
                if !self.component_recompute_required
                    && can_query_via_components(new_pkg, existing_pkg, &self.protected_broadcasts)
                {
                    add_edge(
                        &mut self.queries_via_component,
                        new_setting.app_id,
                        existing.app_id,
                    );
                }
                if can_query_via_package(new_pkg, existing_pkg)
                    || can_query_as_installer(new_setting, existing_pkg)
                {
                    add_edge(
                        &mut self.queries_via_package,
                        new_setting.app_id,
                        existing.app_id,
                    );
                }
            }
            // Instrumentation in either direction makes the pair mutually
            // visible.
            if pkg_instruments(new_pkg, existing_pkg) || pkg_instruments(existing_pkg, new_pkg) {
                add_edge(
                    &mut self.queries_via_package,
                    new_setting.app_id,
                    existing.app_id,
                );
                add_edge(
                    &mut self.queries_via_package,
                    existing.app_id,
                    new_setting.app_id,
                );
            }
        }

        overlay.package_added(new_setting, snapshot);
        config.update_package_state(new_setting, false);
    }

    /// Removes a package from the relation graph.
    ///
    /// `snapshot` is the authoritative table and may still contain the
    /// departing setting; it is excluded by name where that matters.
    /// Surviving shared-user siblings are re-added afterwards to restore
    /// the symmetric edges the departing member carried.
    pub fn remove_package(
        &mut self,
        setting: &PackageSetting,
        snapshot: &PackageSnapshot,
        users: &[UserId],
        overlay: &dyn OverlayActors,
        config: &dyn FeatureConfig,
    ) {
        for &user in users {
            let removing = Uid::new(user, setting.app_id);
            self.implicitly_queryable.remove(&removing);
            for targets in self.implicitly_queryable.values_mut() {
                targets.remove(&removing);
            }
        }
        self.implicitly_queryable.retain(|_, targets| !targets.is_empty());

        // When a recompute is already pending the component map is about to
        // be rebuilt from scratch; scrubbing it now would be wasted work.
        if !self.component_recompute_required {
            remove_app(&mut self.queries_via_component, setting.app_id);
        }
        remove_app(&mut self.queries_via_package, setting.app_id);

        self.force_queryable.remove(&setting.app_id);

        if let Some(pkg) = &setting.pkg {
            if !pkg.protected_broadcasts.is_empty() {
                let previous = mem::take(&mut self.protected_broadcasts);
                self.protected_broadcasts =
                    snapshot.collect_protected_broadcasts(Some(&pkg.package_name));
                if !previous
                    .iter()
                    .all(|action| self.protected_broadcasts.contains(action))
                {
                    // Receiver matches suppressed by the departing
                    // declarations may now be valid; edges are stale in the
                    // other direction this time.
                    self.component_recompute_required = true;
                }
            }
        }

        overlay.package_removed(&setting.name);
        config.update_package_state(setting, true);

        if let Some(shared_user) = setting.shared_user {
            let siblings: Vec<_> = snapshot
                .shared_user_members(shared_user, Some(&setting.name))
                .cloned()
                .collect();
            for sibling in siblings {
                self.add_package(&sibling, snapshot, overlay, config);
            }
        }
    }

    /// Rebuilds the component edge map from scratch against the current
    /// protected-broadcast set and clears the recompute sentinel.
    pub fn recompute_component_edges(&mut self, snapshot: &PackageSnapshot) {
        self.queries_via_component.clear();
        for caller in snapshot.settings() {
            let Some(caller_pkg) = &caller.pkg else {
                continue;
            };
            if requests_query_all_packages(caller_pkg) {
                continue;
            }
            for target in snapshot.settings() {
                if caller.name == target.name {
                    continue;
                }
                let Some(target_pkg) = &target.pkg else {
                    continue;
                };
                if self.force_queryable.contains(&target.app_id) {
                    continue;
                }
                if can_query_via_components(caller_pkg, target_pkg, &self.protected_broadcasts) {
                    add_edge(&mut self.queries_via_component, caller.app_id, target.app_id);
                }
            }
        }
        self.component_recompute_required = false;
    }
}

fn add_edge(map: &mut HashMap<AppId, HashSet<AppId>>, from: AppId, to: AppId) {
    map.entry(from).or_default().insert(to);
}

/// Removes the app id from the map as a key and as a value, dropping rows
/// left empty so that removal restores the map to its pre-add shape.
fn remove_app(map: &mut HashMap<AppId, HashSet<AppId>>, app_id: AppId) {
    map.remove(&app_id);
    map.retain(|_, targets| {
        targets.remove(&app_id);
        !targets.is_empty()
    });
}

fn is_platform_signed(platform: &SigningFingerprint, setting: &PackageSetting) -> bool {
    setting.is_system && setting.signing.fingerprint.matches_exactly(platform)
}

/// True iff the querying manifest names the target by package.
#[must_use]
pub fn can_query_via_package(querying: &PackageManifest, target: &PackageManifest) -> bool {
    querying
        .queries_packages
        .iter()
        .any(|name| name == &target.package_name)
}

/// True iff the target is the querying package's installer or (still
/// installed) initiating installer.
#[must_use]
pub fn can_query_as_installer(querying: &PackageSetting, target: &PackageManifest) -> bool {
    let source = &querying.install_source;
    if source.installer_package_name.as_deref() == Some(target.package_name.as_str()) {
        return true;
    }
    !source.is_initiating_package_uninstalled
        && source.initiating_package_name.as_deref() == Some(target.package_name.as_str())
}

/// True iff any of the querying package's `<queries>` intents matches an
/// exported component of the target, or any of its queried provider
/// authorities is exported by the target.
///
/// Receiver matches are disqualified when the queried action is in
/// `protected_broadcasts`; activity, service, and provider matches are
/// not.
#[must_use]
pub fn can_query_via_components(
    querying: &PackageManifest,
    target: &PackageManifest,
    protected_broadcasts: &HashSet<String>,
) -> bool {
    for intent in &querying.queries_intents {
        if matches_package(intent, target, protected_broadcasts) {
            return true;
        }
    }
    !querying.queries_providers.is_empty()
        && matches_providers(&querying.queries_providers, target)
}

fn matches_package(
    intent: &Intent,
    target: &PackageManifest,
    protected_broadcasts: &HashSet<String>,
) -> bool {
    if matches_any_components(intent, &target.services) {
        return true;
    }
    if matches_any_components(intent, &target.activities) {
        return true;
    }
    let receiver_action_protected = intent
        .action
        .as_deref()
        .is_some_and(|action| protected_broadcasts.contains(action));
    if !receiver_action_protected && matches_any_components(intent, &target.receivers) {
        return true;
    }
    target.providers.iter().any(|provider| {
        provider.exported
            && provider
                .intent_filters
                .iter()
                .any(|filter| filter.matches(intent))
    })
}

fn matches_any_components(intent: &Intent, components: &[ParsedComponent]) -> bool {
    components.iter().any(|component| {
        component.exported
            && component
                .intent_filters
                .iter()
                .any(|filter| filter.matches(intent))
    })
}

fn matches_providers(queried_authorities: &HashSet<String>, target: &PackageManifest) -> bool {
    target.providers.iter().any(|provider| {
        provider.exported
            && provider
                .authority
                .as_deref()
                .is_some_and(|authorities| {
                    authorities
                        .split(';')
                        .any(|authority| queried_authorities.contains(authority))
                })
    })
}

/// True iff the source manifest declares an instrumentation targeting the
/// target package.
#[must_use]
pub fn pkg_instruments(source: &PackageManifest, target: &PackageManifest) -> bool {
    source
        .instrumentations
        .iter()
        .any(|inst| inst.target_package == target.package_name)
}

/// True iff the package requests the query-all-packages permission.
#[must_use]
pub fn requests_query_all_packages(pkg: &PackageManifest) -> bool {
    pkg.requested_permissions.contains(QUERY_ALL_PACKAGES)
}
