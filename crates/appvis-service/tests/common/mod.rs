//! Shared fixtures for the filter integration tests.
//!
//! The authoritative package table and the collaborators are all test
//! doubles here; the production service wires the real ones in.

#![allow(dead_code)] // not every suite uses every fixture

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use appvis_core::engine::Setting;
use appvis_core::ident::{AppId, Uid, UserId};
use appvis_core::intent::{Intent, IntentFilter};
use appvis_core::overlay::{NoOverlayActors, OverlayActors};
use appvis_core::package::{
    InstallSource, PackageManifest, PackageSetting, PackageSnapshot, ParsedComponent,
    ParsedInstrumentation, ParsedProvider, SharedUserId, SigningInfo,
};
use appvis_service::config::DeviceFeatureConfig;
use appvis_service::executor::BackgroundExecutor;
use appvis_service::filter::VisibilityFilter;
use appvis_service::state::StateProvider;

/// In-memory authoritative package table behind its own lock, standing in
/// for the package-manager lock.
#[derive(Default)]
pub struct TestState {
    inner: Mutex<(PackageSnapshot, Vec<UserId>)>,
}

impl TestState {
    pub fn new(users: &[u32]) -> Arc<Self> {
        let state = Self::default();
        state.inner.lock().unwrap().1 = users.iter().copied().map(UserId::new).collect();
        Arc::new(state)
    }

    pub fn install(&self, setting: Arc<PackageSetting>) {
        self.inner.lock().unwrap().0.insert(setting);
    }

    pub fn uninstall(&self, name: &str) {
        self.inner.lock().unwrap().0.remove(name);
    }

    pub fn set_users(&self, users: &[u32]) {
        self.inner.lock().unwrap().1 = users.iter().copied().map(UserId::new).collect();
    }

    pub fn snapshot(&self) -> PackageSnapshot {
        self.inner.lock().unwrap().0.clone()
    }
}

impl StateProvider for TestState {
    fn run_with_state(&self, callback: &mut dyn FnMut(&PackageSnapshot, &[UserId])) {
        let guard = self.inner.lock().unwrap();
        callback(&guard.0, &guard.1);
    }
}

/// Overlay double with an explicit actor list.
#[derive(Default)]
pub struct TestOverlay {
    actors: Mutex<HashSet<(String, String)>>,
}

impl TestOverlay {
    pub fn allow_actor(&self, target: &str, actor: &str) {
        self.actors
            .lock()
            .unwrap()
            .insert((target.to_string(), actor.to_string()));
    }
}

impl OverlayActors for TestOverlay {
    fn package_added(&self, _setting: &PackageSetting, _snapshot: &PackageSnapshot) {}

    fn package_removed(&self, _package_name: &str) {}

    fn is_valid_actor(&self, target_package: &str, actor_package: &str) -> bool {
        self.actors
            .lock()
            .unwrap()
            .contains(&(target_package.to_string(), actor_package.to_string()))
    }
}

/// Fluent builder for package settings.
pub struct PackageBuilder {
    name: String,
    app_id: u32,
    is_system: bool,
    signing: SigningInfo,
    install_source: InstallSource,
    shared_user: Option<u32>,
    force_queryable_override: bool,
    manifest: Option<PackageManifest>,
}

pub fn pkg(name: &str, app_id: u32) -> PackageBuilder {
    PackageBuilder {
        name: name.to_string(),
        app_id,
        is_system: false,
        signing: SigningInfo::new(format!("fp:{name}")),
        install_source: InstallSource::default(),
        shared_user: None,
        force_queryable_override: false,
        manifest: Some(PackageManifest {
            package_name: name.to_string(),
            ..PackageManifest::default()
        }),
    }
}

impl PackageBuilder {
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn signed(mut self, fingerprint: &str) -> Self {
        self.signing = SigningInfo::new(fingerprint);
        self
    }

    pub fn platform_equivalent_signer(mut self) -> Self {
        self.signing.platform_equivalent = true;
        self
    }

    pub fn shared_user(mut self, id: u32) -> Self {
        self.shared_user = Some(id);
        self
    }

    pub fn installer(mut self, name: &str) -> Self {
        self.install_source.installer_package_name = Some(name.to_string());
        self
    }

    pub fn initiating_installer(mut self, name: &str, uninstalled: bool) -> Self {
        self.install_source.initiating_package_name = Some(name.to_string());
        self.install_source.is_initiating_package_uninstalled = uninstalled;
        self
    }

    pub fn force_queryable_override(mut self) -> Self {
        self.force_queryable_override = true;
        self
    }

    pub fn no_manifest(mut self) -> Self {
        self.manifest = None;
        self
    }

    fn manifest_mut(&mut self) -> &mut PackageManifest {
        self.manifest.as_mut().expect("builder has no manifest")
    }

    pub fn queries_package(mut self, name: &str) -> Self {
        self.manifest_mut().queries_packages.push(name.to_string());
        self
    }

    pub fn queries_intent(mut self, intent: Intent) -> Self {
        self.manifest_mut().queries_intents.push(intent);
        self
    }

    pub fn queries_provider(mut self, authority: &str) -> Self {
        self.manifest_mut()
            .queries_providers
            .insert(authority.to_string());
        self
    }

    pub fn exported_activity(mut self, action: &str) -> Self {
        self.manifest_mut().activities.push(ParsedComponent {
            exported: true,
            intent_filters: vec![IntentFilter::for_action(action)],
        });
        self
    }

    pub fn exported_receiver(mut self, action: &str) -> Self {
        self.manifest_mut().receivers.push(ParsedComponent {
            exported: true,
            intent_filters: vec![IntentFilter::for_action(action)],
        });
        self
    }

    pub fn exported_provider(mut self, authorities: &str) -> Self {
        self.manifest_mut().providers.push(ParsedProvider {
            exported: true,
            authority: Some(authorities.to_string()),
            intent_filters: Vec::new(),
        });
        self
    }

    pub fn protected_broadcast(mut self, action: &str) -> Self {
        self.manifest_mut()
            .protected_broadcasts
            .push(action.to_string());
        self
    }

    pub fn instruments(mut self, target: &str) -> Self {
        self.manifest_mut().instrumentations.push(ParsedInstrumentation {
            target_package: target.to_string(),
        });
        self
    }

    pub fn requests_permission(mut self, permission: &str) -> Self {
        self.manifest_mut()
            .requested_permissions
            .insert(permission.to_string());
        self
    }

    pub fn force_queryable(mut self) -> Self {
        self.manifest_mut().force_queryable = true;
        self
    }

    pub fn static_shared_library(mut self) -> Self {
        self.manifest_mut().static_shared_library = true;
        self
    }

    pub fn debuggable(mut self) -> Self {
        self.manifest_mut().debuggable = true;
        self
    }

    pub fn build(self) -> Arc<PackageSetting> {
        Arc::new(PackageSetting {
            name: self.name,
            app_id: AppId::new(self.app_id),
            is_system: self.is_system,
            signing: self.signing,
            install_source: self.install_source,
            shared_user: self.shared_user.map(SharedUserId),
            force_queryable_override: self.force_queryable_override,
            pkg: self.manifest.map(Arc::new),
        })
    }
}

/// A filter wired to in-memory doubles with an inline executor.
pub struct Harness {
    pub state: Arc<TestState>,
    pub config: Arc<DeviceFeatureConfig>,
    pub filter: VisibilityFilter,
}

impl Harness {
    pub fn new(users: &[u32]) -> Self {
        Self::build(users, Arc::new(NoOverlayActors), Vec::new(), false)
    }

    pub fn with_overlay(users: &[u32], overlay: Arc<dyn OverlayActors>) -> Self {
        Self::build(users, overlay, Vec::new(), false)
    }

    pub fn with_device_config(
        users: &[u32],
        device_force_queryable: Vec<String>,
        system_apps_queryable: bool,
    ) -> Self {
        Self::build(
            users,
            Arc::new(NoOverlayActors),
            device_force_queryable,
            system_apps_queryable,
        )
    }

    fn build(
        users: &[u32],
        overlay: Arc<dyn OverlayActors>,
        device_force_queryable: Vec<String>,
        system_apps_queryable: bool,
    ) -> Self {
        let state = TestState::new(users);
        let config = Arc::new(DeviceFeatureConfig::new());
        let filter = VisibilityFilter::with_executor(
            state.clone(),
            config.clone(),
            overlay,
            device_force_queryable,
            system_apps_queryable,
            BackgroundExecutor::inline(),
        );
        Self {
            state,
            config,
            filter,
        }
    }

    /// Installs into the authoritative table, then tells the filter.
    pub fn install(&self, setting: &Arc<PackageSetting>) {
        self.state.install(setting.clone());
        self.filter.add_package(setting, false);
    }

    /// Tells the filter, then removes from the authoritative table (the
    /// filter observes the departing package in its final snapshot).
    pub fn uninstall(&self, setting: &Arc<PackageSetting>) {
        self.filter.remove_package(setting);
        self.state.uninstall(&setting.name);
    }

    pub fn replace(&self, setting: &Arc<PackageSetting>) {
        self.state.install(setting.clone());
        self.filter.add_package(setting, true);
    }

    pub fn should_filter(
        &self,
        caller: &Arc<PackageSetting>,
        caller_user: u32,
        target: &Arc<PackageSetting>,
        target_user: u32,
    ) -> bool {
        let caller_uid = Uid::new(UserId::new(caller_user), caller.app_id);
        self.filter.should_filter(
            caller_uid,
            Some(&Setting::Package(caller.clone())),
            target,
            UserId::new(target_user),
        )
    }
}

pub fn uid(user: u32, app_id: u32) -> Uid {
    Uid::new(UserId::new(user), AppId::new(app_id))
}
