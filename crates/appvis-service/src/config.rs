//! Reference [`FeatureConfig`] implementation.
//!
//! The master switch lives in a device-config namespace and the
//! per-package opt-out is driven by the external compatibility framework;
//! both push their state into this object through the setters. The filter
//! only ever reads. After a compatibility flip the embedder must also
//! call [`VisibilityFilter::on_compat_change`] so the affected cache rows
//! are recomputed.
//!
//! [`VisibilityFilter::on_compat_change`]: crate::filter::VisibilityFilter::on_compat_change

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use appvis_core::config::FeatureConfig;
use appvis_core::ident::AppId;
use appvis_core::package::{PackageManifest, PackageSetting};

/// Device-config property name of the master switch.
pub const FILTERING_ENABLED_NAME: &str = "package_query_filtering_enabled";

/// Master switch default: filtering is on unless the device says
/// otherwise.
pub const ENABLED_BY_DEFAULT: bool = true;

/// Feature configuration backed by device config and the compatibility
/// framework.
#[derive(Debug)]
pub struct DeviceFeatureConfig {
    feature_enabled: AtomicBool,
    disabled_packages: Mutex<HashSet<String>>,
    logging_enabled: Mutex<HashSet<AppId>>,
}

impl DeviceFeatureConfig {
    /// Creates a configuration with the default-on master switch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            feature_enabled: AtomicBool::new(ENABLED_BY_DEFAULT),
            disabled_packages: Mutex::new(HashSet::new()),
            logging_enabled: Mutex::new(HashSet::new()),
        }
    }

    /// Updates the master switch; wired to the device-config listener for
    /// [`FILTERING_ENABLED_NAME`].
    pub fn set_globally_enabled(&self, enabled: bool) {
        self.feature_enabled.store(enabled, Ordering::Release);
    }

    /// Records a compatibility-framework decision for one package.
    pub fn set_package_enabled(&self, package_name: &str, enabled: bool) {
        let mut disabled = self.disabled_packages.lock().expect("lock poisoned");
        if enabled {
            disabled.remove(package_name);
        } else {
            disabled.insert(package_name.to_string());
        }
    }
}

impl Default for DeviceFeatureConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureConfig for DeviceFeatureConfig {
    fn on_system_ready(&self) {
        // The device-config read and listener registration belong to the
        // embedder, which pushes the result through set_globally_enabled.
    }

    fn is_globally_enabled(&self) -> bool {
        self.feature_enabled.load(Ordering::Acquire)
    }

    fn package_is_enabled(&self, pkg: &PackageManifest) -> bool {
        !self
            .disabled_packages
            .lock()
            .expect("lock poisoned")
            .contains(&pkg.package_name)
    }

    fn is_logging_enabled(&self, app_id: AppId) -> bool {
        self.logging_enabled
            .lock()
            .expect("lock poisoned")
            .contains(&app_id)
    }

    fn enable_logging(&self, app_id: AppId, enable: bool) {
        let mut logging = self.logging_enabled.lock().expect("lock poisoned");
        if enable {
            logging.insert(app_id);
        } else {
            logging.remove(&app_id);
        }
    }

    fn update_package_state(&self, setting: &PackageSetting, removed: bool) {
        let enable_logging = !removed
            && setting
                .pkg
                .as_ref()
                .is_some_and(|pkg| pkg.test_only || pkg.debuggable);
        self.enable_logging(setting.app_id, enable_logging);
        if removed {
            self.disabled_packages
                .lock()
                .expect("lock poisoned")
                .remove(&setting.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use appvis_core::package::{InstallSource, SigningInfo};

    use super::*;

    fn debuggable_setting(name: &str, app_id: u32) -> PackageSetting {
        PackageSetting {
            name: name.to_string(),
            app_id: AppId::new(app_id),
            is_system: false,
            signing: SigningInfo::new("fp"),
            install_source: InstallSource::default(),
            shared_user: None,
            force_queryable_override: false,
            pkg: Some(Arc::new(PackageManifest {
                package_name: name.to_string(),
                debuggable: true,
                ..PackageManifest::default()
            })),
        }
    }

    #[test]
    fn master_switch_round_trip() {
        let config = DeviceFeatureConfig::new();
        assert!(config.is_globally_enabled());
        config.set_globally_enabled(false);
        assert!(!config.is_globally_enabled());
    }

    #[test]
    fn compat_disable_round_trip() {
        let config = DeviceFeatureConfig::new();
        let pkg = PackageManifest {
            package_name: "com.a".to_string(),
            ..PackageManifest::default()
        };
        assert!(config.package_is_enabled(&pkg));
        config.set_package_enabled("com.a", false);
        assert!(!config.package_is_enabled(&pkg));
        config.set_package_enabled("com.a", true);
        assert!(config.package_is_enabled(&pkg));
    }

    #[test]
    fn debuggable_packages_opt_into_logging() {
        let config = DeviceFeatureConfig::new();
        let setting = debuggable_setting("com.dbg", 10_100);

        config.update_package_state(&setting, false);
        assert!(config.is_logging_enabled(AppId::new(10_100)));

        config.update_package_state(&setting, true);
        assert!(!config.is_logging_enabled(AppId::new(10_100)));
    }
}
