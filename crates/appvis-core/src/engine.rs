//! The uncached visibility decision.
//!
//! [`evaluate`] is the exhaustive rule walk behind `should_filter`: the
//! decision cache is a materialization of exactly this function, and any
//! query arriving before the cache exists falls through to it directly.
//! Rules are evaluated in a fixed precedence and the first matching rule
//! determines the verdict; a caller that matches none is filtered
//! (default-deny).

use std::sync::Arc;

use tracing::{debug, error};

use crate::config::FeatureConfig;
use crate::ident::{Uid, UserId};
use crate::overlay::OverlayActors;
use crate::package::{PackageSetting, PackageSnapshot};
use crate::store::{requests_query_all_packages, RelationStore};

/// Build-time escape hatch: when set, blocked verdicts are logged but not
/// enforced.
pub const DEBUG_ALLOW_ALL: bool = false;

/// The caller's identity as known to the package store: a plain package,
/// or a shared user expanded to its member packages.
#[derive(Debug, Clone)]
pub enum Setting {
    /// A single package setting. If the package belongs to a shared user,
    /// the engine expands it to the full member list via the snapshot.
    Package(Arc<PackageSetting>),
    /// A shared-user identity with its member packages.
    SharedUser(Vec<Arc<PackageSetting>>),
}

/// Evaluates the full rule precedence for one caller/target pair.
///
/// Returns true iff the caller must not see the target. The component
/// recompute sentinel is drained here if it is raised, against the
/// provided snapshot; callers hold whatever lock guards the store for the
/// duration.
#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
pub fn evaluate(
    store: &mut RelationStore,
    config: &dyn FeatureConfig,
    overlay: &dyn OverlayActors,
    snapshot: &PackageSnapshot,
    caller_uid: Uid,
    caller_setting: Option<&Setting>,
    target: &PackageSetting,
    target_user: UserId,
) -> bool {
    if !config.is_globally_enabled() {
        debug!("filtering disabled; skipped");
        return false;
    }

    let Some(caller_setting) = caller_setting else {
        error!(%caller_uid, "no setting found for non-system uid");
        return true;
    };

    let members: Vec<&Arc<PackageSetting>> = match caller_setting {
        Setting::Package(setting) => match setting.shared_user {
            None => vec![setting],
            Some(shared_user) => {
                let members: Vec<_> =
                    snapshot.shared_user_members(shared_user, None).collect();
                if members.is_empty() {
                    vec![setting]
                } else {
                    members
                }
            }
        },
        Setting::SharedUser(list) => list.iter().collect(),
    };
    if members.is_empty() {
        error!(%caller_uid, "shared-user caller with no member packages");
        return true;
    }

    // A caller whose every package has been opted out by the
    // compatibility framework is exempt from filtering.
    let all_disabled = members.iter().all(|member| {
        member
            .pkg
            .as_ref()
            .is_some_and(|pkg| !config.package_is_enabled(pkg))
    });
    if all_disabled {
        debug!(caller = %members[0].name, target = %target.name, rule = "DISABLED");
        return false;
    }

    // Not technically installed right now; treat as filtered until it is
    // available again.
    let Some(target_pkg) = &target.pkg else {
        return true;
    };
    if target_pkg.static_shared_library {
        // Library visibility is governed at a higher level.
        return false;
    }

    let caller_app_id = members[0].app_id;
    let target_app_id = target.app_id;
    if caller_app_id.is_privileged()
        || target_app_id.is_privileged()
        || caller_app_id == target_app_id
    {
        debug!(caller = %members[0].name, target = %target.name, rule = "same or privileged app id");
        return false;
    }

    if members
        .iter()
        .any(|member| member.pkg.as_ref().is_some_and(|pkg| requests_query_all_packages(pkg)))
    {
        return false;
    }

    if store.is_force_queryable(target_app_id) {
        debug!(caller = %members[0].name, target = %target.name, rule = "force queryable");
        return false;
    }

    if store.queries_via_package(caller_app_id, target_app_id) {
        debug!(caller = %members[0].name, target = %target.name, rule = "queries package");
        return false;
    }

    if store.component_recompute_required() {
        store.recompute_component_edges(snapshot);
    }
    if store.queries_via_component(caller_app_id, target_app_id) {
        debug!(caller = %members[0].name, target = %target.name, rule = "queries component");
        return false;
    }

    let target_uid = Uid::new(target_user, target_app_id);
    if store.is_implicitly_queryable(caller_uid, target_uid) {
        debug!(caller = %members[0].name, target = %target.name, rule = "implicitly queryable for user");
        return false;
    }

    if members
        .iter()
        .any(|member| overlay.is_valid_actor(&target_pkg.package_name, &member.name))
    {
        debug!(caller = %members[0].name, target = %target.name, rule = "acts on target of overlay");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::AppId;
    use crate::overlay::NoOverlayActors;
    use crate::package::{InstallSource, PackageManifest, SigningInfo};

    struct TestConfig {
        enabled: bool,
        disabled_packages: Vec<String>,
    }

    impl TestConfig {
        fn new() -> Self {
            Self {
                enabled: true,
                disabled_packages: Vec::new(),
            }
        }
    }

    impl FeatureConfig for TestConfig {
        fn on_system_ready(&self) {}
        fn is_globally_enabled(&self) -> bool {
            self.enabled
        }
        fn package_is_enabled(&self, pkg: &PackageManifest) -> bool {
            !self.disabled_packages.contains(&pkg.package_name)
        }
        fn is_logging_enabled(&self, _app_id: AppId) -> bool {
            false
        }
        fn enable_logging(&self, _app_id: AppId, _enable: bool) {}
        fn update_package_state(&self, _setting: &PackageSetting, _removed: bool) {}
    }

    fn setting(name: &str, app_id: u32) -> Arc<PackageSetting> {
        Arc::new(PackageSetting {
            name: name.to_string(),
            app_id: AppId::new(app_id),
            is_system: false,
            signing: SigningInfo::new(format!("fp:{name}")),
            install_source: InstallSource::default(),
            shared_user: None,
            force_queryable_override: false,
            pkg: Some(Arc::new(PackageManifest {
                package_name: name.to_string(),
                ..PackageManifest::default()
            })),
        })
    }

    fn eval(
        store: &mut RelationStore,
        config: &TestConfig,
        snapshot: &PackageSnapshot,
        caller: &Arc<PackageSetting>,
        target: &Arc<PackageSetting>,
    ) -> bool {
        let caller_uid = Uid::new(UserId::new(0), caller.app_id);
        evaluate(
            store,
            config,
            &NoOverlayActors,
            snapshot,
            caller_uid,
            Some(&Setting::Package(caller.clone())),
            target,
            UserId::new(0),
        )
    }

    #[test]
    fn unrelated_packages_are_filtered() {
        let a = setting("com.a", 10_100);
        let b = setting("com.b", 10_101);
        let mut snapshot = PackageSnapshot::new();
        snapshot.insert(a.clone());
        snapshot.insert(b.clone());
        let mut store = RelationStore::new(Vec::new(), false);

        assert!(eval(&mut store, &TestConfig::new(), &snapshot, &a, &b));
    }

    #[test]
    fn disabled_feature_filters_nothing() {
        let a = setting("com.a", 10_100);
        let b = setting("com.b", 10_101);
        let mut snapshot = PackageSnapshot::new();
        snapshot.insert(a.clone());
        snapshot.insert(b.clone());
        let mut store = RelationStore::new(Vec::new(), false);

        let mut config = TestConfig::new();
        config.enabled = false;
        assert!(!eval(&mut store, &config, &snapshot, &a, &b));
    }

    #[test]
    fn missing_caller_setting_is_filtered() {
        let b = setting("com.b", 10_101);
        let snapshot = PackageSnapshot::new();
        let mut store = RelationStore::new(Vec::new(), false);

        assert!(evaluate(
            &mut store,
            &TestConfig::new(),
            &NoOverlayActors,
            &snapshot,
            Uid::new(UserId::new(0), AppId::new(10_100)),
            None,
            &b,
            UserId::new(0),
        ));
    }

    #[test]
    fn fully_disabled_caller_is_exempt() {
        let a = setting("com.a", 10_100);
        let b = setting("com.b", 10_101);
        let mut snapshot = PackageSnapshot::new();
        snapshot.insert(a.clone());
        snapshot.insert(b.clone());
        let mut store = RelationStore::new(Vec::new(), false);

        let mut config = TestConfig::new();
        config.disabled_packages = vec!["com.a".to_string()];
        assert!(!eval(&mut store, &config, &snapshot, &a, &b));
    }

    #[test]
    fn missing_target_manifest_is_filtered() {
        let a = setting("com.a", 10_100);
        let mut bare = PackageSetting::clone(&setting("com.b", 10_101));
        bare.pkg = None;
        let bare = Arc::new(bare);
        let mut snapshot = PackageSnapshot::new();
        snapshot.insert(a.clone());
        snapshot.insert(bare.clone());
        let mut store = RelationStore::new(Vec::new(), false);

        assert!(eval(&mut store, &TestConfig::new(), &snapshot, &a, &bare));
    }

    #[test]
    fn static_shared_library_is_never_filtered() {
        let a = setting("com.a", 10_100);
        let mut lib = PackageSetting::clone(&setting("com.lib", 10_101));
        lib.pkg = Some(Arc::new(PackageManifest {
            package_name: "com.lib".to_string(),
            static_shared_library: true,
            ..PackageManifest::default()
        }));
        let lib = Arc::new(lib);
        let mut snapshot = PackageSnapshot::new();
        snapshot.insert(a.clone());
        snapshot.insert(lib.clone());
        let mut store = RelationStore::new(Vec::new(), false);

        assert!(!eval(&mut store, &TestConfig::new(), &snapshot, &a, &lib));
    }

    #[test]
    fn recompute_sentinel_is_drained_before_component_check() {
        let mut provider = PackageManifest {
            package_name: "com.provider".to_string(),
            ..PackageManifest::default()
        };
        provider.activities = vec![crate::package::ParsedComponent {
            exported: true,
            intent_filters: vec![crate::intent::IntentFilter::for_action("foo.ACTION")],
        }];
        let mut provider_setting = PackageSetting::clone(&setting("com.provider", 10_100));
        provider_setting.pkg = Some(Arc::new(provider));
        let provider_setting = Arc::new(provider_setting);

        let mut consumer = PackageManifest {
            package_name: "com.consumer".to_string(),
            ..PackageManifest::default()
        };
        consumer.queries_intents = vec![crate::intent::Intent::with_action("foo.ACTION")];
        let mut consumer_setting = PackageSetting::clone(&setting("com.consumer", 10_101));
        consumer_setting.pkg = Some(Arc::new(consumer));
        let consumer_setting = Arc::new(consumer_setting);

        let mut snapshot = PackageSnapshot::new();
        snapshot.insert(provider_setting.clone());
        snapshot.insert(consumer_setting.clone());

        // A store with the sentinel raised and no edges materialized: the
        // drain inside evaluate must rebuild them and find the match.
        let mut declarer = PackageManifest {
            package_name: "com.declarer".to_string(),
            ..PackageManifest::default()
        };
        declarer.protected_broadcasts = vec!["other.GUARDED".to_string()];
        let mut declarer_setting = PackageSetting::clone(&setting("com.declarer", 10_102));
        declarer_setting.pkg = Some(Arc::new(declarer));
        let declarer_setting = Arc::new(declarer_setting);
        snapshot.insert(declarer_setting.clone());

        let mut store = RelationStore::new(Vec::new(), false);
        store.add_package(&declarer_setting, &snapshot, &NoOverlayActors, &TestConfig::new());
        assert!(store.component_recompute_required());

        assert!(!eval(
            &mut store,
            &TestConfig::new(),
            &snapshot,
            &consumer_setting,
            &provider_setting
        ));
        assert!(!store.component_recompute_required());
    }
}
