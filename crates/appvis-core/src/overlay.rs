//! Overlay-actor seam.
//!
//! The overlay subsystem may designate a package as a valid actor on an
//! overlay target; actors are granted visibility of their targets even
//! without a manifest relationship. The mapping is owned by that
//! subsystem; the filter consumes it through this trait and keeps it
//! informed of package churn.

use crate::package::{PackageSetting, PackageSnapshot};

/// External overlay-reference mapping consumed by the visibility filter.
pub trait OverlayActors: Send + Sync {
    /// Notifies the mapper of a newly added package and the table it was
    /// added against.
    fn package_added(&self, setting: &PackageSetting, snapshot: &PackageSnapshot);

    /// Notifies the mapper of a removed package.
    fn package_removed(&self, package_name: &str);

    /// Rebuilds any state whose construction was deferred until system
    /// ready.
    fn rebuild_if_deferred(&self) {}

    /// True if `actor_package` is permitted to act on overlays targeting
    /// `target_package`.
    fn is_valid_actor(&self, target_package: &str, actor_package: &str) -> bool;
}

/// Overlay mapping for deployments without an overlay subsystem: nothing
/// is ever a valid actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverlayActors;

impl OverlayActors for NoOverlayActors {
    fn package_added(&self, _setting: &PackageSetting, _snapshot: &PackageSnapshot) {}

    fn package_removed(&self, _package_name: &str) {}

    fn is_valid_actor(&self, _target_package: &str, _actor_package: &str) -> bool {
        false
    }
}
