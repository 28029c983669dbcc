//! # appvis-core
//!
//! Core library for appvis - the package visibility filter of a multi-user
//! package-management service.
//!
//! Applications on the platform are mutually invisible by default and become
//! visible only when one of a small, enumerated set of relationships is
//! declared in the source application's manifest or established dynamically
//! through interaction. This crate provides the building blocks that record
//! and answer those relationships:
//!
//! - **Identities**: app ids, user ids, and the flattened uid encoding
//! - **Package model**: the externally-owned package settings and the
//!   immutable parsed manifest view they carry
//! - **Intent matching**: the filter-side match algorithm used to resolve
//!   `<queries>` intents against exported components
//! - **Relation store**: the normalized graph of pairwise visibility
//!   relations, maintained incrementally as packages come and go
//! - **Decision engine**: the uncached `should_filter` evaluation with its
//!   fixed rule precedence
//!
//! # Security Properties
//!
//! - **Default-deny**: a caller that matches no relationship rule cannot see
//!   the target
//! - **Fail-closed**: unknown callers, missing settings, and mid-query
//!   uninstalls all resolve to "filtered"
//! - **Deterministic**: the same store state and arguments always produce the
//!   same verdict
//!
//! The locked runtime around these types (decision cache, background rebuild,
//! state-provider seam) lives in `appvis-service`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod engine;
pub mod ident;
pub mod intent;
pub mod overlay;
pub mod package;
pub mod store;

pub use config::FeatureConfig;
pub use engine::Setting;
pub use ident::{AppId, Uid, UserId, FIRST_APP_ID};
pub use overlay::{NoOverlayActors, OverlayActors};
pub use package::{PackageManifest, PackageSetting, PackageSnapshot};
pub use store::RelationStore;
