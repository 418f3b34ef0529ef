//! Policy document schema definitions.
//!
//! This module defines the complete layered-configuration structure for the
//! host. All types derive Serde traits for deserialization from config
//! layers (TOML or JSON).
//!
//! # Design Decisions
//! - Optional scalars are `Option<T>` so an unset field is never conflated
//!   with a zero value; the merge engine only lets an overlay win when the
//!   overlay explicitly set the field.
//! - Free-form config and schema maps are `serde_json::Map` so an explicit
//!   `null` survives parsing and can act as a delete tombstone during merge.
//! - Named collections are `BTreeMap` for deterministic iteration order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Free-form JSON object used for plugin config values and JSON schemas.
pub type JsonMap = Map<String, Value>;

/// Root policy document for one configuration layer, and also the shape of
/// the fully merged policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
    /// Bind address (e.g. "localhost:1324" or "unix:hearth.sock").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,

    /// API address plugins use to call back into the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    /// Externally visible URL. Derived from `addr` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Ordered plugin activation list. Entries may carry a `+` (no-op) or
    /// `-` (remove) modifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_plugins: Option<Vec<String>>,

    /// Usernames granted admin rights. Same `+`/`-` list algebra as
    /// `active_plugins`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_users: Option<Vec<String>>,

    /// Usernames that may never log in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forbidden_users: Option<Vec<String>>,

    /// Global scope map (scope name -> description). Additive across layers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<BTreeMap<String, String>>,

    /// Registered data-object categories.
    #[serde(rename = "type", skip_serializing_if = "BTreeMap::is_empty")]
    pub object_types: BTreeMap<String, ObjectType>,

    /// Registered job-executor kinds.
    #[serde(rename = "runtype", skip_serializing_if = "BTreeMap::is_empty")]
    pub run_types: BTreeMap<String, RunType>,

    /// Plugin registry (name -> declaration).
    #[serde(rename = "plugin", skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, Plugin>,

    /// JSON schema for the core user settings.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub user_settings_schema: JsonMap,

    /// Log level (trace, debug, info, warn, error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Log directory, or "stdout".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Not settable from config files; passed as a process argument and
    /// carried here so plugins inherit it.
    #[serde(skip)]
    pub verbose: bool,
}

impl Configuration {
    /// Effective activation list: modifiers stripped, removals skipped.
    pub fn active_plugins(&self) -> Vec<&str> {
        self.active_plugins
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter(|p| !p.starts_with('-'))
            .map(|p| p.strip_prefix('+').unwrap_or(p.as_str()))
            .collect()
    }

    pub fn user_is_admin(&self, username: &str) -> bool {
        self.admin_users
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .any(|u| u == username)
    }

    pub fn user_is_forbidden(&self, username: &str) -> bool {
        self.forbidden_users
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .any(|u| u == username)
    }

    /// Bind address, with the builtin default applied.
    pub fn effective_addr(&self) -> &str {
        self.addr.as_deref().unwrap_or("localhost:1324")
    }
}

/// A plugin declaration contributed by one or more layers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Plugin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Semver range of host versions this plugin is compatible with.
    /// Unset means any version is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_version: Option<String>,

    /// Route map: `"<verb>? <path>"` -> target URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<BTreeMap<String, String>>,

    /// Event name -> POST target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<BTreeMap<String, String>>,

    /// Event trigger blocks. Concatenated, never replaced, across layers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on: Vec<Event>,

    /// Declared run jobs (name -> job).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub run: BTreeMap<String, RunJob>,

    /// Plugin config values, validated against `config_schema`.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub config: JsonMap,

    #[serde(skip_serializing_if = "Map::is_empty")]
    pub config_schema: JsonMap,

    /// JSON schema for per-user plugin settings.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub user_settings_schema: JsonMap,

    /// Application templates created on behalf of this plugin.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub apps: BTreeMap<String, App>,
}

/// An application template with auto-created objects.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct App {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_create: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<bool>,

    /// Settings payload; requires `settings_schema`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_schema: Option<JsonMap>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub objects: BTreeMap<String, AppObject>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on: Vec<Event>,
}

/// A data object auto-created inside an app on behalf of a plugin.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppObject {
    /// Name of a registered `ObjectType`. Required once merged.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_create: Option<bool>,

    /// Object metadata, validated against the type's `meta_schema`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<JsonMap>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on: Vec<Event>,
}

/// An event trigger: when `event` fires, POST to `post`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Event {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
}

/// A named data-object category.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ObjectType {
    /// Route map served for objects of this type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<BTreeMap<String, String>>,

    /// JSON schema for object metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_schema: Option<JsonMap>,

    /// Scope requirements (scope name -> description).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<BTreeMap<String, String>>,
}

/// A named job-executor kind.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RunType {
    /// Target invoked to run jobs of this kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    /// JSON schema every job config of this kind must satisfy.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub config_schema: JsonMap,
}

/// A run job declared by a plugin.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RunJob {
    /// Run-type name; defaults to "exec" at validation time.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Cron-style schedule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Job config, validated against the run type's schema.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub config: JsonMap,
}
