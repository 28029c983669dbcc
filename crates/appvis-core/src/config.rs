//! Feature-configuration seam.
//!
//! The filter's master switch and per-package disable state are owned by
//! external configuration machinery (a device-config namespace and a
//! compatibility framework). The core consumes them through this narrow
//! trait; implementations must be internally synchronized since the filter
//! calls them from whichever thread a query or mutation arrives on.

use crate::ident::AppId;
use crate::package::{PackageManifest, PackageSetting};

/// External feature configuration consumed by the visibility filter.
pub trait FeatureConfig: Send + Sync {
    /// Called when the system is ready and configuration can be read.
    fn on_system_ready(&self);

    /// True if visibility filtering is enabled at all.
    fn is_globally_enabled(&self) -> bool;

    /// True if filtering is enabled for the given package. A package whose
    /// compatibility flag opts it out is treated as an unfiltered caller.
    fn package_is_enabled(&self, pkg: &PackageManifest) -> bool;

    /// True if decision logging is enabled for the given app id.
    fn is_logging_enabled(&self, app_id: AppId) -> bool;

    /// Turns decision logging for the given app id on or off.
    fn enable_logging(&self, app_id: AppId, enable: bool);

    /// Notifies the configuration of a package entering (`removed` false)
    /// or leaving (`removed` true) the system, giving it the opportunity
    /// to precompute per-package state ahead of the actual checks.
    fn update_package_state(&self, setting: &PackageSetting, removed: bool);
}
