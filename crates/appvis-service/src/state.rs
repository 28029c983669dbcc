//! The authoritative-state seam.
//!
//! The package table and the active-user list are owned by the
//! surrounding package-management service and guarded by its coarse lock.
//! The filter reads them only through [`StateProvider::run_with_state`],
//! which invokes the callback with the lock held; nothing handed to the
//! callback may be retained past its return except the manifest `Arc`s
//! that the asynchronous cache rebuild captures for its
//! reference-equality validation.

use appvis_core::ident::UserId;
use appvis_core::package::PackageSnapshot;

/// Provides a consistent view of the authoritative package table.
pub trait StateProvider: Send + Sync {
    /// Invokes `callback` with the package table and active users while
    /// holding the package-manager lock.
    fn run_with_state(&self, callback: &mut dyn FnMut(&PackageSnapshot, &[UserId]));
}
