//! Layer merge engine.
//!
//! # Responsibilities
//! - Fold two policy layers into one, deterministically and without error
//! - Apply one field policy per field kind: replace-if-set for optional
//!   scalars, `+`/`-` algebra for string lists, null-tombstone merge for
//!   free-form maps, key-wise recursion for named collections, and
//!   concatenation for event trigger lists
//!
//! # Design Decisions
//! - One `MergeFrom` visitor trait applied uniformly to every named-entity
//!   type instead of hand-unrolled per-struct copy code
//! - Merge is pure and total: the overlay is assumed individually
//!   well-formed, consistency is checked later by the validator
//! - List removals are layer-scoped: a `-x` entry filters entries from
//!   strictly earlier layers and never suppresses an addition made by the
//!   same overlay

use std::collections::{BTreeMap, HashSet};

use crate::config::schema::{
    App, AppObject, Configuration, Event, JsonMap, ObjectType, Plugin, RunJob, RunType,
};

/// Merge `overlay` on top of `base`, producing a new document.
/// Later layers win ties; see the per-field rules on [`MergeFrom`] impls.
pub fn merge(base: &Configuration, overlay: &Configuration) -> Configuration {
    let mut merged = base.clone();
    merged.merge_from(overlay);
    merged
}

/// Structural merge visitor. Each implementation lists its fields once and
/// delegates to the shared field-policy helpers below.
pub trait MergeFrom {
    fn merge_from(&mut self, overlay: &Self);
}

/// Optional scalar: overlay wins iff it explicitly set the field.
fn merge_opt<T: Clone>(base: &mut Option<T>, overlay: &Option<T>) {
    if let Some(v) = overlay {
        *base = Some(v.clone());
    }
}

/// Add/remove string-list algebra.
///
/// The base is filtered first: entries whose name also appears in the
/// overlay with a `-` prefix are dropped, a leading `+` is stripped before
/// comparison, and duplicates collapse to the first occurrence. The
/// overlay's non-removal entries are then appended in order if absent.
pub fn merge_string_lists(
    base: Option<&[String]>,
    overlay: Option<&[String]>,
) -> Option<Vec<String>> {
    if base.is_none() && overlay.is_none() {
        return None;
    }
    let overlay_entries = overlay.unwrap_or(&[]);
    let removed: HashSet<&str> = overlay_entries
        .iter()
        .filter_map(|e| e.strip_prefix('-'))
        .collect();

    let mut out: Vec<String> = Vec::new();
    for entry in base.unwrap_or(&[]) {
        // A removal entry in the base has already done its work upstream.
        if entry.starts_with('-') {
            continue;
        }
        let name = entry.strip_prefix('+').unwrap_or(entry);
        if removed.contains(name) || out.iter().any(|n| n == name) {
            continue;
        }
        out.push(name.to_string());
    }
    for entry in overlay_entries {
        if entry.starts_with('-') {
            continue;
        }
        let name = entry.strip_prefix('+').unwrap_or(entry);
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    Some(out)
}

fn merge_list_field(base: &mut Option<Vec<String>>, overlay: &Option<Vec<String>>) {
    if let Some(merged) = merge_string_lists(base.as_deref(), overlay.as_deref()) {
        *base = Some(merged);
    }
}

/// Shallow map merge with tombstones: an explicit null deletes the base
/// key, any other value inserts or overwrites.
pub fn merge_value_map(base: &mut JsonMap, overlay: &JsonMap) {
    for (key, value) in overlay {
        if value.is_null() {
            base.remove(key);
        } else {
            base.insert(key.clone(), value.clone());
        }
    }
}

fn merge_opt_value_map(base: &mut Option<JsonMap>, overlay: &Option<JsonMap>) {
    if let Some(over) = overlay {
        match base {
            Some(b) => merge_value_map(b, over),
            None => {
                let mut fresh = JsonMap::new();
                merge_value_map(&mut fresh, over);
                *base = Some(fresh);
            }
        }
    }
}

/// Key-wise additive overwrite (scope maps, route maps, event maps).
fn merge_string_map(
    base: &mut Option<BTreeMap<String, String>>,
    overlay: &Option<BTreeMap<String, String>>,
) {
    if let Some(over) = overlay {
        let target = base.get_or_insert_with(BTreeMap::new);
        for (k, v) in over {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// Named-entity collection: unseen keys are inserted wholesale, seen keys
/// recurse with the same rules.
fn merge_keyed<T: MergeFrom + Clone>(base: &mut BTreeMap<String, T>, overlay: &BTreeMap<String, T>) {
    for (key, value) in overlay {
        match base.get_mut(key) {
            Some(existing) => existing.merge_from(value),
            None => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Event trigger lists concatenate; an entry identical to one already
/// present is skipped so that folding a layer onto itself is a no-op.
fn merge_events(base: &mut Vec<Event>, overlay: &[Event]) {
    for event in overlay {
        if !base.contains(event) {
            base.push(event.clone());
        }
    }
}

impl MergeFrom for Configuration {
    fn merge_from(&mut self, overlay: &Self) {
        merge_opt(&mut self.addr, &overlay.addr);
        merge_opt(&mut self.api, &overlay.api);
        merge_opt(&mut self.url, &overlay.url);
        merge_opt(&mut self.log_level, &overlay.log_level);
        merge_opt(&mut self.log_dir, &overlay.log_dir);

        merge_list_field(&mut self.active_plugins, &overlay.active_plugins);
        merge_list_field(&mut self.admin_users, &overlay.admin_users);
        merge_list_field(&mut self.forbidden_users, &overlay.forbidden_users);

        merge_string_map(&mut self.scope, &overlay.scope);
        merge_value_map(&mut self.user_settings_schema, &overlay.user_settings_schema);

        merge_keyed(&mut self.object_types, &overlay.object_types);
        merge_keyed(&mut self.run_types, &overlay.run_types);
        merge_keyed(&mut self.plugins, &overlay.plugins);

        self.verbose = self.verbose || overlay.verbose;
    }
}

impl MergeFrom for Plugin {
    fn merge_from(&mut self, overlay: &Self) {
        merge_opt(&mut self.version, &overlay.version);
        merge_opt(&mut self.description, &overlay.description);
        merge_opt(&mut self.icon, &overlay.icon);
        merge_opt(&mut self.homepage, &overlay.homepage);
        merge_opt(&mut self.license, &overlay.license);
        merge_opt(&mut self.host_version, &overlay.host_version);

        merge_string_map(&mut self.routes, &overlay.routes);
        merge_string_map(&mut self.events, &overlay.events);
        merge_events(&mut self.on, &overlay.on);

        merge_keyed(&mut self.run, &overlay.run);
        merge_keyed(&mut self.apps, &overlay.apps);

        merge_value_map(&mut self.config, &overlay.config);
        merge_value_map(&mut self.config_schema, &overlay.config_schema);
        merge_value_map(&mut self.user_settings_schema, &overlay.user_settings_schema);
    }
}

impl MergeFrom for App {
    fn merge_from(&mut self, overlay: &Self) {
        merge_opt(&mut self.description, &overlay.description);
        merge_opt(&mut self.icon, &overlay.icon);
        merge_opt(&mut self.scope, &overlay.scope);
        merge_opt(&mut self.enabled, &overlay.enabled);
        merge_opt(&mut self.auto_create, &overlay.auto_create);
        merge_opt(&mut self.unique, &overlay.unique);
        merge_opt(&mut self.access_token, &overlay.access_token);

        merge_opt_value_map(&mut self.settings, &overlay.settings);
        merge_opt_value_map(&mut self.settings_schema, &overlay.settings_schema);

        merge_keyed(&mut self.objects, &overlay.objects);
        merge_events(&mut self.on, &overlay.on);
    }
}

impl MergeFrom for AppObject {
    fn merge_from(&mut self, overlay: &Self) {
        merge_opt(&mut self.object_type, &overlay.object_type);
        merge_opt(&mut self.description, &overlay.description);
        merge_opt(&mut self.icon, &overlay.icon);
        merge_opt(&mut self.owner_scope, &overlay.owner_scope);
        merge_opt(&mut self.tags, &overlay.tags);
        merge_opt(&mut self.auto_create, &overlay.auto_create);

        merge_opt_value_map(&mut self.meta, &overlay.meta);
        merge_events(&mut self.on, &overlay.on);
    }
}

impl MergeFrom for ObjectType {
    fn merge_from(&mut self, overlay: &Self) {
        merge_string_map(&mut self.routes, &overlay.routes);
        merge_string_map(&mut self.scope, &overlay.scope);
        merge_opt_value_map(&mut self.meta_schema, &overlay.meta_schema);
    }
}

impl MergeFrom for RunType {
    fn merge_from(&mut self, overlay: &Self) {
        merge_opt(&mut self.api, &overlay.api);
        merge_value_map(&mut self.config_schema, &overlay.config_schema);
    }
}

impl MergeFrom for RunJob {
    fn merge_from(&mut self, overlay: &Self) {
        merge_opt(&mut self.job_type, &overlay.job_type);
        merge_opt(&mut self.enabled, &overlay.enabled);
        merge_opt(&mut self.cron, &overlay.cron);
        merge_value_map(&mut self.config, &overlay.config);
    }
}
