//! Intent and intent-filter matching.
//!
//! A `<queries>` declaration carries intent patterns; each is resolved
//! against the exported components of every other package using the
//! standard filter match over action, categories, data scheme, data
//! authority, and MIME type. This module implements only the filter-side
//! algorithm; which component kinds consult the protected-broadcast set is
//! decided by the relation store.
//!
//! # Match rules
//!
//! - **Action**: an intent with an action matches only filters listing
//!   that action. An intent without an action skips the action test.
//! - **Categories**: every category carried by the intent must be listed
//!   by the filter.
//! - **Data and type**: a filter with neither schemes nor types matches
//!   only intents with neither data nor type. A filter with schemes
//!   requires a matching scheme (and, when the filter lists authorities, a
//!   matching authority). A filter with types requires a type match, with
//!   `*/*` and `type/*` wildcard support on the filter side.

use serde::{Deserialize, Serialize};

/// An intent pattern from a `<queries>` declaration, or a synthesized
/// query used at resolution time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// The action to perform.
    pub action: Option<String>,
    /// Categories the handler must declare.
    pub categories: Vec<String>,
    /// Data URI, if any.
    pub data: Option<String>,
    /// Explicit MIME type, if any.
    pub mime_type: Option<String>,
}

impl Intent {
    /// Creates an intent with only an action, the common `<queries>` form.
    pub fn with_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    /// The scheme of the data URI, if any.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.data.as_deref().and_then(|d| d.split_once(':')).map(|(s, _)| s)
    }

    /// The authority (host) of the data URI, if any.
    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        let rest = self.data.as_deref()?.split_once("://")?.1;
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        Some(&rest[..end])
    }
}

/// A component's declared intent filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFilter {
    /// Actions handled.
    pub actions: Vec<String>,
    /// Categories provided.
    pub categories: Vec<String>,
    /// Data schemes handled.
    pub schemes: Vec<String>,
    /// Data authorities (hosts) handled.
    pub authorities: Vec<String>,
    /// MIME types handled; `*/*` and `type/*` wildcards allowed.
    pub data_types: Vec<String>,
}

impl IntentFilter {
    /// Creates a filter handling a single action.
    pub fn for_action(action: impl Into<String>) -> Self {
        Self {
            actions: vec![action.into()],
            ..Self::default()
        }
    }

    /// Returns true if `intent` matches this filter.
    #[must_use]
    pub fn matches(&self, intent: &Intent) -> bool {
        self.match_action(intent) && self.match_categories(intent) && self.match_data(intent)
    }

    fn match_action(&self, intent: &Intent) -> bool {
        match &intent.action {
            Some(action) => self.actions.iter().any(|a| a == action),
            None => true,
        }
    }

    fn match_categories(&self, intent: &Intent) -> bool {
        intent
            .categories
            .iter()
            .all(|c| self.categories.iter().any(|fc| fc == c))
    }

    fn match_data(&self, intent: &Intent) -> bool {
        if self.schemes.is_empty() && self.data_types.is_empty() {
            // A filter with no data spec only matches intents carrying none.
            return intent.data.is_none() && intent.mime_type.is_none();
        }
        if !self.schemes.is_empty() {
            let Some(scheme) = intent.scheme() else {
                return false;
            };
            if !self.schemes.iter().any(|s| s == scheme) {
                return false;
            }
            if !self.authorities.is_empty() {
                let Some(authority) = intent.authority() else {
                    return false;
                };
                if !self.authorities.iter().any(|a| a == authority) {
                    return false;
                }
            }
        }
        match &intent.mime_type {
            Some(mime) => self.data_types.iter().any(|t| type_matches(t, mime)),
            None => self.data_types.is_empty(),
        }
    }
}

/// Filter-side MIME wildcard match: `*/*` matches everything, `image/*`
/// matches any image subtype, otherwise exact.
fn type_matches(filter_type: &str, intent_type: &str) -> bool {
    if filter_type == "*/*" {
        return true;
    }
    if let Some(base) = filter_type.strip_suffix("/*") {
        return intent_type
            .split_once('/')
            .is_some_and(|(intent_base, _)| intent_base == base);
    }
    filter_type == intent_type
}
