//! Configuration types
//!
//! Typed mirror of `~/.lagoon.yml`. Profiles are keyed by name in a
//! `BTreeMap` so listing order is stable for a given file.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Whole on-disk configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Profile used when nothing else is selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Profile most recently selected with `--lagoon`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,

    #[serde(flatten)]
    pub features: FeatureFlags,

    /// Older files call this map `lagoons`
    #[serde(default, alias = "lagoons")]
    pub profiles: BTreeMap<String, Profile>,
}

impl ConfigFile {
    /// Fold legacy keys into their current location and drop pointers that
    /// reference profiles which no longer exist.
    ///
    /// Returns the names of the pointers that were cleared.
    pub fn normalize(&mut self) -> Vec<&'static str> {
        for profile in self.profiles.values_mut() {
            profile.migrate_legacy();
        }

        let mut cleared = Vec::new();
        if clear_dangling(&mut self.default, &self.profiles) {
            cleared.push("default");
        }
        if clear_dangling(&mut self.current, &self.profiles) {
            cleared.push("current");
        }
        cleared
    }
}

/// Reset `pointer` if it does not name a profile. Empty names are cleared
/// silently; returns `true` only when a real name was dropped.
fn clear_dangling(pointer: &mut Option<String>, profiles: &BTreeMap<String, Profile>) -> bool {
    match pointer.as_deref() {
        Some(name) if !profiles.contains_key(name) => {
            let dropped = !name.is_empty();
            *pointer = None;
            dropped
        }
        _ => false,
    }
}

/// CLI feature switches persisted next to the profiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    #[serde(default)]
    pub update_check_disable: bool,

    #[serde(default)]
    pub project_directory_check_disable: bool,
}

/// One named remote Lagoon instance
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// SSH endpoint that issues tokens
    pub hostname: String,

    /// SSH port, kept as text to match the file format
    pub port: String,

    /// GraphQL API the token authorizes
    #[serde(alias = "graphql")]
    pub api_endpoint: String,

    #[serde(default, skip_serializing_if = "Auxiliary::is_empty")]
    pub auxiliary: Auxiliary,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    // Pre-`auxiliary` layouts stored these at the top level.
    #[serde(default, rename = "ui", skip_serializing)]
    legacy_ui: Option<String>,

    #[serde(default, rename = "kibana", skip_serializing)]
    legacy_kibana: Option<String>,
}

impl Profile {
    pub fn new(
        hostname: impl Into<String>,
        port: impl Into<String>,
        api_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port: port.into(),
            api_endpoint: api_endpoint.into(),
            ..Default::default()
        }
    }

    /// Cached token, treating an empty string as absent
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Port as a number, if it is one
    pub fn port_number(&self) -> Option<u16> {
        self.port.trim().parse().ok().filter(|p| *p != 0)
    }

    fn migrate_legacy(&mut self) {
        if let Some(ui) = self.legacy_ui.take().filter(|v| !v.is_empty()) {
            self.auxiliary.ui.get_or_insert(ui);
        }
        if let Some(logs) = self.legacy_kibana.take().filter(|v| !v.is_empty()) {
            self.auxiliary.logs.get_or_insert(logs);
        }
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("api_endpoint", &self.api_endpoint)
            .field("auxiliary", &self.auxiliary)
            .field("token", &self.token().map(|_| "<redacted>"))
            .finish()
    }
}

/// Display-only URLs attached to a profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auxiliary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl Auxiliary {
    pub fn is_empty(&self) -> bool {
        self.ui.is_none() && self.logs.is_none()
    }
}

/// Fields supplied to `ProfileStore::upsert`. `None` and empty strings are
/// both treated as "not supplied".
#[derive(Debug, Clone, Default)]
pub struct ProfileFields {
    pub hostname: Option<String>,
    pub port: Option<String>,
    pub api_endpoint: Option<String>,
    pub ui: Option<String>,
    pub logs: Option<String>,
    pub token: Option<String>,
}

impl ProfileFields {
    /// The three fields a new profile cannot be created without
    pub fn connection(
        hostname: impl Into<String>,
        port: impl Into<String>,
        api_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            hostname: Some(hostname.into()),
            port: Some(port.into()),
            api_endpoint: Some(api_endpoint.into()),
            ..Default::default()
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    pub(crate) fn supplied(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}
