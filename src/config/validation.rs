//! Policy validation.
//!
//! # Responsibilities
//! - Semantic validation of the fully merged policy (serde handles syntax)
//! - Referential integrity: activation list, run targets, object types
//! - Route verb / target prefix allow-lists
//! - Plugin compatibility ranges against the running host version
//! - Schema-driven payload validation with default insertion
//!
//! # Design Decisions
//! - Fails fast: the first violation aborts with no partial result
//! - Successful validation compiles and caches schema instances for
//!   reuse; the cache lives alongside the policy, never inside it
//! - Payload validation inserts declared defaults in place, which is the
//!   one documented mutation of the policy during validation

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use semver::{Version, VersionReq};
use thiserror::Error;

use crate::config::jsonschema::{CompiledSchema, SchemaEngine, SchemaError};
use crate::config::schema::Configuration;

/// The http verbs permitted in route maps.
const HTTP_VERBS: [&str; 5] = ["GET", "POST", "PATCH", "PUT", "DELETE"];

/// The permitted route target prefixes.
const TARGET_PREFIXES: [&str; 5] = ["http:", "https:", "unix:", "builtin:", "run:"];

/// Log levels understood by the observability layer.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Run types that are executed by the host itself and need no api target.
const IMPLICIT_RUN_TYPES: [&str; 2] = ["exec", "builtin"];

const DEFAULT_RUN_TYPE: &str = "exec";

/// Version of the running host, checked against plugin compatibility ranges.
pub fn host_version() -> Version {
    // The crate version is always valid semver.
    Version::parse(env!("CARGO_PKG_VERSION")).expect("crate version is valid semver")
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("plugin '{0}' is active but has no configuration")]
    UnknownActivePlugin(String),

    #[error("plugin '{plugin}' is not compatible with host version {running}, only '{range}' accepted")]
    IncompatiblePlugin {
        plugin: String,
        range: String,
        running: Version,
    },

    #[error("plugin '{plugin}' host_version invalid: {detail}")]
    InvalidVersionRange { plugin: String, detail: String },

    #[error("empty route")]
    EmptyRoute,

    #[error("route '{0}' needs to start with a verb or /")]
    RouteNeedsSlash(String),

    #[error("route '{0}' must be in format '<verb (optional)> <path>'")]
    RouteFormat(String),

    #[error("unrecognized http verb '{verb}' in route '{route}'")]
    UnknownVerb { verb: String, route: String },

    #[error("route target '{0}' is missing a prefix")]
    TargetMissingPrefix(String),

    #[error("route target '{target}': unrecognized prefix '{prefix}'")]
    UnknownTargetPrefix { target: String, prefix: String },

    #[error("route target '{0}' does not exist")]
    UnknownRunTarget(String),

    #[error("route target '{0}' invalid")]
    InvalidRunTarget(String),

    #[error("[plugin: {plugin}, app: {app}, object: {object}] unrecognized type ({object_type})")]
    UnknownObjectType {
        plugin: String,
        app: String,
        object: String,
        object_type: String,
    },

    #[error("[plugin: {plugin}, app: {app}, object: {object}] no type specified")]
    MissingObjectType {
        plugin: String,
        app: String,
        object: String,
    },

    #[error("run type '{0}' does not specify an api target")]
    RunTypeMissingApi(String),

    #[error("unrecognized run type '{run_type}' for job '{job}' in plugin '{plugin}'")]
    UnknownRunType {
        plugin: String,
        job: String,
        run_type: String,
    },

    #[error("app settings without associated settings_schema (plugin '{plugin}', app '{app}')")]
    SettingsWithoutSchema { plugin: String, app: String },

    #[error("'on' trigger '{event}' in '{owner}' must have post specified")]
    EventMissingPost { owner: String, event: String },

    #[error("{context}: {source}")]
    Schema {
        context: String,
        source: SchemaError,
    },

    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),

    #[error("parent directory does not exist for log dir '{0}'")]
    InvalidLogDir(String),
}

/// Compiled schemas produced by a successful validation pass. Stored
/// alongside the accepted policy; compile-once, validate-many.
#[derive(Debug, Default)]
pub struct SchemaCache {
    /// Core user-settings schema, when one is declared.
    pub user_settings: Option<Arc<CompiledSchema>>,

    /// Per-plugin user-settings schemas.
    pub plugin_user_settings: BTreeMap<String, Arc<CompiledSchema>>,

    /// Per-object-type metadata schemas (always present, possibly empty).
    pub object_meta: BTreeMap<String, Arc<CompiledSchema>>,
}

fn compile(
    engine: &dyn SchemaEngine,
    doc: &crate::config::schema::JsonMap,
    context: &str,
) -> Result<Arc<CompiledSchema>, ValidationError> {
    engine.compile(doc).map_err(|source| ValidationError::Schema {
        context: context.to_string(),
        source,
    })
}

fn is_valid_route(route: &str) -> Result<(), ValidationError> {
    let tokens: Vec<&str> = route.split_whitespace().collect();
    match tokens.len() {
        0 => Err(ValidationError::EmptyRoute),
        1 => {
            if tokens[0].starts_with('/') {
                Ok(())
            } else {
                Err(ValidationError::RouteNeedsSlash(route.to_string()))
            }
        }
        2 => {
            if HTTP_VERBS.contains(&tokens[0]) {
                Ok(())
            } else {
                Err(ValidationError::UnknownVerb {
                    verb: tokens[0].to_string(),
                    route: route.to_string(),
                })
            }
        }
        _ => Err(ValidationError::RouteFormat(route.to_string())),
    }
}

/// Check a route target. `declaring_plugin` resolves bare `run:<job>`
/// targets; targets declared outside a plugin must name a plugin
/// explicitly.
fn is_valid_target(
    config: &Configuration,
    declaring_plugin: Option<&str>,
    target: &str,
) -> Result<(), ValidationError> {
    let Some((scheme, rest)) = target.split_once(':') else {
        return Err(ValidationError::TargetMissingPrefix(target.to_string()));
    };
    let prefix = format!("{scheme}:");
    if !TARGET_PREFIXES.contains(&prefix.as_str()) {
        return Err(ValidationError::UnknownTargetPrefix {
            target: target.to_string(),
            prefix,
        });
    }
    if prefix != "run:" {
        return Ok(());
    }

    // run:<plugin>.<job>[/...] or run:<job>[/...] within the declaring plugin
    let head = rest.split('/').next().unwrap_or("");
    let parts: Vec<&str> = head.split('.').collect();
    let (plugin_name, job_name) = match parts.as_slice() {
        [job] if !job.is_empty() => (declaring_plugin.unwrap_or(""), *job),
        [plugin, job] if !plugin.is_empty() && !job.is_empty() => (*plugin, *job),
        _ => return Err(ValidationError::InvalidRunTarget(target.to_string())),
    };
    let exists = config
        .plugins
        .get(plugin_name)
        .is_some_and(|p| p.run.contains_key(job_name));
    if exists {
        Ok(())
    } else {
        Err(ValidationError::UnknownRunTarget(target.to_string()))
    }
}

/// Validate a fully merged policy. On success, returns the compiled schema
/// cache. Default insertion mutates run-job configs, plugin configs, and
/// app settings in place.
pub fn validate(
    config: &mut Configuration,
    engine: &dyn SchemaEngine,
    running: &Version,
) -> Result<SchemaCache, ValidationError> {
    let mut cache = SchemaCache::default();

    if !config.user_settings_schema.is_empty() {
        cache.user_settings = Some(compile(
            engine,
            &config.user_settings_schema,
            "user_settings_schema",
        )?);
    }

    // Metadata schemas compile for every registered object type, declared
    // or not, so that runtime lookups never compile lazily.
    let empty = crate::config::schema::JsonMap::new();
    for (name, object_type) in &config.object_types {
        let doc = object_type.meta_schema.as_ref().unwrap_or(&empty);
        let compiled = compile(engine, doc, &format!("object type '{name}' meta schema"))?;
        cache.object_meta.insert(name.clone(), compiled);
    }

    let active: Vec<String> = config
        .active_plugins()
        .iter()
        .map(|s| s.to_string())
        .collect();

    for name in &active {
        let Some(plugin) = config.plugins.get(name) else {
            return Err(ValidationError::UnknownActivePlugin(name.clone()));
        };
        if let Some(range) = &plugin.host_version {
            let req = VersionReq::parse(range).map_err(|e| {
                ValidationError::InvalidVersionRange {
                    plugin: name.clone(),
                    detail: e.to_string(),
                }
            })?;
            if !req.matches(running) {
                return Err(ValidationError::IncompatiblePlugin {
                    plugin: name.clone(),
                    range: range.clone(),
                    running: running.clone(),
                });
            }
        }
        for (app_name, app) in &plugin.apps {
            for (object_name, object) in &app.objects {
                let Some(object_type) = &object.object_type else {
                    return Err(ValidationError::MissingObjectType {
                        plugin: name.clone(),
                        app: app_name.clone(),
                        object: object_name.clone(),
                    });
                };
                if !config.object_types.contains_key(object_type) {
                    return Err(ValidationError::UnknownObjectType {
                        plugin: name.clone(),
                        app: app_name.clone(),
                        object: object_name.clone(),
                        object_type: object_type.clone(),
                    });
                }
            }
        }
    }

    // Run types must name a valid api target (the implicit kinds are run
    // by the host itself) and carry a compilable config schema.
    let mut runners: BTreeMap<String, Arc<CompiledSchema>> = BTreeMap::new();
    for (name, run_type) in &config.run_types {
        match &run_type.api {
            Some(api) => is_valid_target(config, None, api)?,
            None => {
                if !IMPLICIT_RUN_TYPES.contains(&name.as_str()) {
                    return Err(ValidationError::RunTypeMissingApi(name.clone()));
                }
            }
        }
        let compiled = compile(
            engine,
            &run_type.config_schema,
            &format!("run type '{name}' config schema"),
        )?;
        runners.insert(name.clone(), compiled);
    }

    // Route maps, event maps and triggers, and app settings pairing, for
    // every plugin in the registry whether active or not.
    for (plugin_name, plugin) in &config.plugins {
        if let Some(routes) = &plugin.routes {
            for (route, target) in routes {
                is_valid_route(route)?;
                is_valid_target(config, Some(plugin_name), target)?;
            }
        }
        if let Some(events) = &plugin.events {
            for target in events.values() {
                is_valid_target(config, Some(plugin_name), target)?;
            }
        }
        for event in &plugin.on {
            let Some(post) = &event.post else {
                return Err(ValidationError::EventMissingPost {
                    owner: format!("plugin '{plugin_name}'"),
                    event: event.event.clone(),
                });
            };
            is_valid_target(config, Some(plugin_name), post)?;
        }
        for (app_name, app) in &plugin.apps {
            for event in app.on.iter().chain(app.objects.values().flat_map(|o| o.on.iter())) {
                let Some(post) = &event.post else {
                    return Err(ValidationError::EventMissingPost {
                        owner: format!("plugin '{plugin_name}', app '{app_name}'"),
                        event: event.event.clone(),
                    });
                };
                is_valid_target(config, Some(plugin_name), post)?;
            }
            if app.settings_schema.is_none()
                && app.settings.as_ref().is_some_and(|s| !s.is_empty())
            {
                return Err(ValidationError::SettingsWithoutSchema {
                    plugin: plugin_name.clone(),
                    app: app_name.clone(),
                });
            }
        }
    }

    for object_type in config.object_types.values() {
        if let Some(routes) = &object_type.routes {
            for (route, target) in routes {
                is_valid_route(route)?;
                // No declaring plugin here: bare run targets cannot resolve.
                is_valid_target(config, None, target)?;
            }
        }
    }

    // Logging settings.
    if let Some(level) = &mut config.log_level {
        if level.is_empty() {
            *level = "info".to_string();
        }
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ValidationError::InvalidLogLevel(level.clone()));
        }
    }
    if let Some(dir) = &mut config.log_dir {
        if dir.is_empty() {
            *dir = "stdout".to_string();
        }
        if dir != "stdout" {
            let abs = std::path::absolute(Path::new(dir.as_str()))
                .map_err(|_| ValidationError::InvalidLogDir(dir.clone()))?;
            if abs != Path::new("/") {
                let parent_exists = abs.parent().is_some_and(Path::exists);
                if !parent_exists {
                    return Err(ValidationError::InvalidLogDir(dir.clone()));
                }
            }
        }
    }

    // Mutating pass: insert defaults and validate payloads for every
    // active plugin, and compile per-plugin user-settings schemas.
    for name in &active {
        let run_schemas: Vec<(String, Option<Arc<CompiledSchema>>, String)> = {
            let plugin = &config.plugins[name];
            plugin
                .run
                .iter()
                .map(|(job_name, job)| {
                    let kind = job
                        .job_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_RUN_TYPE.to_string());
                    (job_name.clone(), runners.get(&kind).cloned(), kind)
                })
                .collect()
        };

        let plugin = config
            .plugins
            .get_mut(name)
            .expect("active plugin presence checked above");

        let config_schema = compile(
            engine,
            &plugin.config_schema,
            &format!("plugin '{name}' config schema"),
        )?;
        config_schema
            .validate_and_insert_defaults(&mut plugin.config)
            .map_err(|source| ValidationError::Schema {
                context: format!("plugin '{name}' config"),
                source,
            })?;

        for (job_name, schema, kind) in run_schemas {
            let Some(schema) = schema else {
                return Err(ValidationError::UnknownRunType {
                    plugin: name.clone(),
                    job: job_name,
                    run_type: kind,
                });
            };
            let job = plugin
                .run
                .get_mut(&job_name)
                .expect("job names collected from this map");
            schema
                .validate_and_insert_defaults(&mut job.config)
                .map_err(|source| ValidationError::Schema {
                    context: format!("plugin '{name}' run job '{job_name}' config"),
                    source,
                })?;
        }

        for (app_name, app) in plugin.apps.iter_mut() {
            if let Some(settings_schema) = &app.settings_schema {
                let schema = engine.compile(settings_schema).map_err(|source| {
                    ValidationError::Schema {
                        context: format!("plugin '{name}' app '{app_name}' settings_schema"),
                        source,
                    }
                })?;
                let settings = app.settings.get_or_insert_with(Default::default);
                schema
                    .validate_and_insert_defaults(settings)
                    .map_err(|source| ValidationError::Schema {
                        context: format!("plugin '{name}' app '{app_name}' settings"),
                        source,
                    })?;
            }
        }

        if !plugin.user_settings_schema.is_empty() {
            let compiled = compile(
                engine,
                &plugin.user_settings_schema,
                &format!("plugin '{name}' user_settings_schema"),
            )?;
            cache.plugin_user_settings.insert(name.clone(), compiled);
        }
    }

    Ok(cache)
}
