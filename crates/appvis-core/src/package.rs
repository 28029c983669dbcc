//! The package data model consumed by the visibility filter.
//!
//! Package records are owned by the authoritative package store and handed
//! to the filter as snapshots; nothing here is persisted by the filter
//! itself. A [`PackageSetting`] carries the install-time state (app id,
//! install source, shared-user membership) while the parsed manifest view
//! lives in an immutable [`PackageManifest`] behind an `Arc`. The `Arc`
//! identity doubles as a version fingerprint: the asynchronous cache
//! rebuild detects concurrent mutation by comparing manifest references,
//! so a package update must swap in a new `Arc` rather than mutate in
//! place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ident::AppId;
use crate::intent::{Intent, IntentFilter};

/// The reserved name of the platform package. Its signing identity becomes
/// the reference for system-signed force-queryable promotion.
pub const PLATFORM_PACKAGE: &str = "android";

/// The permission that exempts its holder from visibility filtering
/// entirely.
pub const QUERY_ALL_PACKAGES: &str = "android.permission.QUERY_ALL_PACKAGES";

/// A signing-certificate fingerprint.
///
/// Opaque to the filter; equality is the only operation the filter needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningFingerprint(String);

impl SigningFingerprint {
    /// Creates a fingerprint from its encoded form.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Strict equality check. Rotation history is deliberately not
    /// consulted; a rotated signer does not inherit platform promotion.
    #[must_use]
    pub fn matches_exactly(&self, other: &Self) -> bool {
        self == other
    }
}

/// Signing state of an installed package, resolved upstream by the
/// signature verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInfo {
    /// Fingerprint of the current signing certificate.
    pub fingerprint: SigningFingerprint,
    /// True if the verifier recognized the signer as a platform-equivalent
    /// identity. Gates the manifest `force_queryable` opt-in for non-system
    /// packages.
    pub platform_equivalent: bool,
}

impl SigningInfo {
    /// Convenience constructor for an ordinary (non-platform) signer.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: SigningFingerprint::new(fingerprint),
            platform_equivalent: false,
        }
    }
}

/// Where a package's install came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSource {
    /// The package that performed the install, if any.
    pub installer_package_name: Option<String>,
    /// The package that initiated the install session, if any.
    pub initiating_package_name: Option<String>,
    /// True if the initiating package has since been uninstalled; its
    /// visibility claim over the installee lapses with it.
    pub is_initiating_package_uninstalled: bool,
}

/// Identity of a shared user group. Membership is immutable post-install;
/// a package changing groups is expressed as remove + add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedUserId(
    /// Raw group id.
    pub u32,
);

/// An exported-or-not component (activity, receiver, or service) with its
/// declared intent filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedComponent {
    /// True if other applications may resolve this component.
    pub exported: bool,
    /// Declared intent filters.
    pub intent_filters: Vec<IntentFilter>,
}

/// A declared content provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedProvider {
    /// True if other applications may resolve this provider.
    pub exported: bool,
    /// Semicolon-separated authority list, if declared.
    pub authority: Option<String>,
    /// Declared intent filters.
    pub intent_filters: Vec<IntentFilter>,
}

/// An instrumentation declaration; mutual visibility with the target
/// follows from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedInstrumentation {
    /// The package this instrumentation tests.
    pub target_package: String,
}

/// The immutable parsed-manifest view of an installed package.
///
/// Instances are shared via `Arc` and never mutated after parse; the
/// async cache rebuild relies on reference identity to detect swaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Unique package name.
    pub package_name: String,
    /// Broadcast actions this package declares as protected.
    pub protected_broadcasts: Vec<String>,
    /// Declared activities.
    pub activities: Vec<ParsedComponent>,
    /// Declared broadcast receivers.
    pub receivers: Vec<ParsedComponent>,
    /// Declared services.
    pub services: Vec<ParsedComponent>,
    /// Declared content providers.
    pub providers: Vec<ParsedProvider>,
    /// `<queries>` package-name entries.
    pub queries_packages: Vec<String>,
    /// `<queries>` intent patterns.
    pub queries_intents: Vec<Intent>,
    /// `<queries>` provider authorities.
    pub queries_providers: HashSet<String>,
    /// Instrumentation declarations.
    pub instrumentations: Vec<ParsedInstrumentation>,
    /// Permissions requested in the manifest.
    pub requested_permissions: HashSet<String>,
    /// Manifest `force_queryable` opt-in.
    pub force_queryable: bool,
    /// True for static shared libraries; their visibility is governed by a
    /// separate mechanism and never filtered here.
    pub static_shared_library: bool,
    /// Manifest test-only flag; enables per-app decision logging.
    pub test_only: bool,
    /// Manifest debuggable flag; enables per-app decision logging.
    pub debuggable: bool,
}

/// Install-time state of a package, supplied by the authoritative store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSetting {
    /// Unique package name.
    pub name: String,
    /// The identity visibility rules are expressed against.
    pub app_id: AppId,
    /// True for packages on a system image.
    pub is_system: bool,
    /// Signing state.
    pub signing: SigningInfo,
    /// Install provenance.
    pub install_source: InstallSource,
    /// Shared-user membership, if any.
    pub shared_user: Option<SharedUserId>,
    /// Force-queryable override set at install time (debug tooling).
    pub force_queryable_override: bool,
    /// Parsed manifest view. `None` while the package is not technically
    /// installed (for example mid-update); such packages are treated as
    /// filtered.
    pub pkg: Option<Arc<PackageManifest>>,
}

/// A consistent view of the authoritative package table, valid only while
/// the package-manager lock is held (or for a shallow copy captured under
/// it).
///
/// Cloning is shallow: settings are shared via `Arc`.
#[derive(Debug, Clone, Default)]
pub struct PackageSnapshot {
    packages: HashMap<String, Arc<PackageSetting>>,
}

impl PackageSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a setting, keyed by its package name.
    pub fn insert(&mut self, setting: Arc<PackageSetting>) -> Option<Arc<PackageSetting>> {
        self.packages.insert(setting.name.clone(), setting)
    }

    /// Removes a setting by package name.
    pub fn remove(&mut self, name: &str) -> Option<Arc<PackageSetting>> {
        self.packages.remove(name)
    }

    /// Looks up a setting by package name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<PackageSetting>> {
        self.packages.get(name)
    }

    /// Iterates over all settings in the snapshot.
    pub fn settings(&self) -> impl Iterator<Item = &Arc<PackageSetting>> {
        self.packages.values()
    }

    /// Number of settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// True if the snapshot holds no settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterates over the members of a shared user, excluding the named
    /// package if given.
    pub fn shared_user_members<'a>(
        &'a self,
        shared_user: SharedUserId,
        exclude: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Arc<PackageSetting>> {
        self.packages.values().filter(move |setting| {
            setting.shared_user == Some(shared_user) && Some(setting.name.as_str()) != exclude
        })
    }

    /// Collects the union of protected-broadcast declarations across the
    /// snapshot, skipping the excluded package if given.
    #[must_use]
    pub fn collect_protected_broadcasts(&self, exclude: Option<&str>) -> HashSet<String> {
        let mut out = HashSet::new();
        for setting in self.packages.values() {
            let Some(pkg) = &setting.pkg else { continue };
            if Some(pkg.package_name.as_str()) == exclude {
                continue;
            }
            out.extend(pkg.protected_broadcasts.iter().cloned());
        }
        out
    }
}
