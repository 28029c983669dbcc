//! # appvis-service
//!
//! The locked runtime around the `appvis-core` visibility logic.
//!
//! This crate provides the [`VisibilityFilter`] facade the surrounding
//! package-management service talks to: queries resolve against a
//! materialized decision cache once the system is ready, mutations flow
//! through the incremental maintainer, and a dedicated background thread
//! performs the initial cache build off the critical path.
//!
//! # Architecture
//!
//! ```text
//! install / remove / replace          queries
//!          |                             |
//!          v                             v
//!   VisibilityFilter ----------- should_filter
//!    |      |     \                  |      \
//!    v      v      v                 v       v
//!  StateProvider  RelationStore   DecisionCache  (fallback: engine)
//!  (pm lock)      (relations lock)  (cache lock)
//! ```
//!
//! # Lock order
//!
//! `package-manager lock -> relation-store lock -> cache lock`, never the
//! reverse. The state provider owns the package-manager lock; every read
//! of the authoritative package table happens inside
//! [`StateProvider::run_with_state`]. Queries that must fall back to the
//! uncached engine re-enter the state provider only from call sites that
//! hold none of the three locks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod config;
mod dump;
pub mod executor;
pub mod filter;
pub mod state;

pub use cache::{CacheLookup, DecisionCache};
pub use config::DeviceFeatureConfig;
pub use executor::BackgroundExecutor;
pub use filter::VisibilityFilter;
pub use state::StateProvider;
