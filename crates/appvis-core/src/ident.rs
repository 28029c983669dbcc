//! Application, user, and uid identities.
//!
//! Visibility rules are expressed against the **app id**: the integer
//! identity shared by all co-signed applications that opt into a shared
//! user. Each tenant on the device is a **user id**, and the pair is
//! flattened into a **uid** by a stable encoding so that per-user state
//! (the decision cache, runtime interaction grants) can be keyed by a
//! single integer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The first app id available to ordinary applications.
///
/// Every identity below this threshold is a privileged platform identity
/// and is unconditionally visible to, and able to see, everything.
pub const FIRST_APP_ID: AppId = AppId(10_000);

/// The size of the uid range reserved for each user.
pub const PER_USER_RANGE: u32 = 100_000;

/// The identity against which visibility rules are expressed.
///
/// One per package, or one per shared user for packages that opted into a
/// shared identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct AppId(u32);

impl AppId {
    /// Creates an app id from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns true if this identity falls below [`FIRST_APP_ID`] and is
    /// therefore exempt from filtering in both directions.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        self.0 < FIRST_APP_ID.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tenant on the device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    /// Creates a user id from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (user, app) pair flattened into a single integer.
///
/// The encoding is `user * PER_USER_RANGE + app_id`, which leaves holes in
/// the integer space; consumers must treat uids as sparse keys rather than
/// dense indices.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Uid(u32);

impl Uid {
    /// Encodes a (user, app) pair.
    #[must_use]
    pub const fn new(user: UserId, app: AppId) -> Self {
        Self(user.0 * PER_USER_RANGE + app.0)
    }

    /// Creates a uid from an already-encoded raw value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw encoded value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Extracts the app-id component.
    #[must_use]
    pub const fn app_id(self) -> AppId {
        AppId(self.0 % PER_USER_RANGE)
    }

    /// Extracts the user-id component.
    #[must_use]
    pub const fn user_id(self) -> UserId {
        UserId(self.0 / PER_USER_RANGE)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
