//! Policy assembly pipeline.
//!
//! # Responsibilities
//! - Resolve the canonical activation list (builtin list ⊕ root list)
//! - Fold layers in activation order: builtin, plugins in list order,
//!   root last (root always wins ties)
//! - Build the copy-on-write asset overlay with identical precedence
//! - Normalize endpoint fields, then validate the merged policy
//! - Swap the `(config, overlay, schemas)` generation atomically
//! - Append/remove admin users with persist-or-keep semantics
//!
//! # Design Decisions
//! - A generation is replaced wholesale; nothing else ever mutates the
//!   accepted policy
//! - Reload failure keeps the previous generation: install is
//!   all-or-nothing
//! - The admin mutation path swaps the in-memory generation only after
//!   the root config file write succeeds

pub mod overlay;

use std::fs;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use semver::Version;

use crate::config::jsonschema::{JsonSchemaEngine, SchemaEngine};
use crate::config::loader::{self, ConfigError};
use crate::config::merge::{merge, merge_string_lists};
use crate::config::schema::Configuration;
use crate::config::validation::{self, SchemaCache};

pub use overlay::AssetOverlay;

/// One accepted policy generation: the validated configuration, the asset
/// overlay built alongside it, and the schemas compiled during validation.
#[derive(Debug)]
pub struct Generation {
    pub config: Arc<Configuration>,
    pub overlay: Arc<AssetOverlay>,
    pub schemas: Arc<SchemaCache>,
}

/// The assembled asset tree: builtin layer, activated plugin folders, and
/// the user-editable root folder, merged into one policy.
pub struct Assets {
    builtin_path: PathBuf,

    /// Root folder. `None` means running purely on builtin assets
    /// (setup mode).
    folder_path: Option<PathBuf>,

    /// Merged on top of the root layer before folding.
    config_override: Option<Configuration>,

    engine: Arc<dyn SchemaEngine>,
    running: Version,

    current: ArcSwap<Generation>,

    /// Serializes the admin-list read-modify-persist sequence.
    admin_lock: Mutex<()>,
}

impl Assets {
    /// Open and assemble the asset tree. Fails if any layer is unreadable
    /// or the merged policy does not validate.
    pub fn open(
        builtin_path: impl Into<PathBuf>,
        folder_path: Option<PathBuf>,
        config_override: Option<Configuration>,
    ) -> Result<Self, ConfigError> {
        let builtin_path = builtin_path.into();
        let folder_path = match folder_path {
            Some(p) => Some(fs::canonicalize(&p)?),
            None => None,
        };
        let engine: Arc<dyn SchemaEngine> = Arc::new(JsonSchemaEngine);
        let running = validation::host_version();

        let generation = assemble(
            &builtin_path,
            folder_path.as_deref(),
            config_override.as_ref(),
            engine.as_ref(),
            &running,
        )?;

        Ok(Self {
            builtin_path,
            folder_path,
            config_override,
            engine,
            running,
            current: ArcSwap::from_pointee(generation),
            admin_lock: Mutex::new(()),
        })
    }

    /// Reassemble from disk. On failure the previous generation stays
    /// active.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let generation = assemble(
            &self.builtin_path,
            self.folder_path.as_deref(),
            self.config_override.as_ref(),
            self.engine.as_ref(),
            &self.running,
        )?;
        self.current.store(Arc::new(generation));
        Ok(())
    }

    /// The current policy generation.
    pub fn generation(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    /// The accepted policy document.
    pub fn config(&self) -> Arc<Configuration> {
        self.current.load().config.clone()
    }

    /// The copy-on-write asset stack of the current generation.
    pub fn overlay(&self) -> Arc<AssetOverlay> {
        self.current.load().overlay.clone()
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.current.load().config.user_is_admin(username)
    }

    /// Directory holding runtime data (databases, sockets).
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.folder_path.as_ref().map(|p| p.join("data"))
    }

    /// Directory plugins are installed into.
    pub fn plugin_dir(&self) -> Option<PathBuf> {
        self.folder_path.as_ref().map(|p| p.join("plugins"))
    }

    /// Resolved log directory, or "stdout".
    pub fn log_dir(&self) -> Option<PathBuf> {
        let config = self.config();
        let dir = config.log_dir.as_deref()?;
        if dir == "stdout" {
            return None;
        }
        let path = Path::new(dir);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.folder_path.as_deref()?.join(path))
        }
    }

    /// Grant admin rights and persist the change to the root config file.
    /// The in-memory policy is only replaced once the write succeeds.
    pub fn add_admin(&self, username: &str) -> Result<(), ConfigError> {
        let _guard = self.admin_lock.lock().expect("admin lock poisoned");
        let generation = self.current.load_full();
        let mut users = generation
            .config
            .admin_users
            .clone()
            .unwrap_or_default();
        if users.iter().any(|u| u == username) {
            return Ok(());
        }
        users.push(username.to_string());
        self.persist_and_swap(&generation, users)
    }

    /// Revoke admin rights; removing an absent user is a no-op.
    pub fn remove_admin(&self, username: &str) -> Result<(), ConfigError> {
        let _guard = self.admin_lock.lock().expect("admin lock poisoned");
        let generation = self.current.load_full();
        let Some(current) = &generation.config.admin_users else {
            return Ok(());
        };
        if !current.iter().any(|u| u == username) {
            return Ok(());
        }
        let users: Vec<String> = current.iter().filter(|u| *u != username).cloned().collect();
        self.persist_and_swap(&generation, users)
    }

    fn persist_and_swap(
        &self,
        generation: &Arc<Generation>,
        users: Vec<String>,
    ) -> Result<(), ConfigError> {
        let folder = self.folder_path.as_deref().ok_or_else(|| {
            ConfigError::Structure("cannot persist admin users without a config folder".into())
        })?;
        persist_admin_users(folder, &users)?;

        let mut config = (*generation.config).clone();
        config.admin_users = Some(users);
        self.current.store(Arc::new(Generation {
            config: Arc::new(config),
            overlay: generation.overlay.clone(),
            schemas: generation.schemas.clone(),
        }));
        Ok(())
    }
}

/// Fold all layers into one validated generation.
fn assemble(
    builtin_path: &Path,
    folder_path: Option<&Path>,
    config_override: Option<&Configuration>,
    engine: &dyn SchemaEngine,
    running: &Version,
) -> Result<Generation, ConfigError> {
    let builtin = loader::load_layer_dir(builtin_path)?;

    // Builtin self-check: plugins the builtin layer activates must also be
    // defined by it.
    for name in builtin.active_plugins() {
        if !builtin.plugins.contains_key(name) {
            return Err(ConfigError::Structure(format!(
                "builtin configuration does not define plugin '{name}'"
            )));
        }
    }

    let mut stack = vec![builtin_path.to_path_buf()];
    let mut merged = builtin.clone();

    if let Some(folder) = folder_path {
        let mut root = loader::load_layer_dir(folder)?;
        if let Some(over) = config_override {
            root = merge(&root, over);
        }

        // The canonical activation list comes from the builtin and root
        // layers only; plugin layers cannot activate other plugins.
        let canonical = merge_string_lists(
            builtin.active_plugins.as_deref(),
            root.active_plugins.as_deref(),
        );

        for name in canonical.as_deref().unwrap_or(&[]) {
            let plugin_folder = folder.join("plugins").join(name);
            if !plugin_folder.is_dir() {
                return Err(ConfigError::Structure(format!(
                    "could not find plugin '{}' at {}: not a directory",
                    name,
                    plugin_folder.display()
                )));
            }
            let layer = loader::load_layer_dir(&plugin_folder)?;
            merged = merge(&merged, &layer);
            stack.push(plugin_folder);
        }

        merged = merge(&merged, &root);
        stack.push(folder.to_path_buf());
        merged.active_plugins = canonical;
    } else if let Some(over) = config_override {
        merged = merge(&merged, over);
    }

    normalize_endpoints(&mut merged);

    let schemas = validation::validate(&mut merged, engine, running)?;

    tracing::debug!(
        layers = stack.len(),
        active = ?merged.active_plugins(),
        addr = merged.effective_addr(),
        "policy assembled"
    );

    Ok(Generation {
        config: Arc::new(merged),
        overlay: Arc::new(AssetOverlay::new(stack)),
        schemas: Arc::new(schemas),
    })
}

/// Rewrite the `admin_users` entry of the root config file, preserving
/// everything else in it. Writes the same file format the root layer
/// already uses.
fn persist_admin_users(folder: &Path, users: &[String]) -> Result<(), ConfigError> {
    let toml_path = folder.join("hearth.toml");
    let json_path = folder.join("hearth.json");

    if json_path.is_file() && !toml_path.is_file() {
        let raw = fs::read_to_string(&json_path)?;
        let mut doc: serde_json::Value = serde_json::from_str(&raw)?;
        let object = doc.as_object_mut().ok_or_else(|| {
            ConfigError::Structure("root config file is not an object".into())
        })?;
        object.insert("admin_users".to_string(), serde_json::json!(users));
        fs::write(&json_path, serde_json::to_string_pretty(&doc)?)?;
    } else {
        let raw = if toml_path.is_file() {
            fs::read_to_string(&toml_path)?
        } else {
            String::new()
        };
        let mut doc: toml::Table = raw.parse::<toml::Table>()?;
        doc.insert(
            "admin_users".to_string(),
            toml::Value::Array(
                users
                    .iter()
                    .map(|u| toml::Value::String(u.clone()))
                    .collect(),
            ),
        );
        fs::write(&toml_path, toml::to_string_pretty(&doc)?)?;
    }
    Ok(())
}

/// Pin down the endpoint fields after folding: apply the default bind
/// address, derive the external URL when unset, and strip a trailing
/// slash.
fn normalize_endpoints(config: &mut Configuration) {
    let addr = config.effective_addr().to_string();
    config.addr = Some(addr.clone());

    let unset = config.url.as_deref().is_none_or(str::is_empty);
    if unset {
        if addr.starts_with("unix:") {
            config.url = Some(addr.clone());
        } else {
            let (host, port) = addr.rsplit_once(':').unwrap_or((addr.as_str(), "80"));
            let host = match host {
                "" | "0.0.0.0" | "::" | "[::]" => outbound_ip(),
                h => h.to_string(),
            };
            config.url = Some(format!("http://{host}:{port}"));
        }
    }
    if let Some(url) = &mut config.url {
        while url.ends_with('/') {
            url.pop();
        }
    }
}

/// Outbound-facing IP, used when the bind host is a wildcard. The socket
/// is never actually written to; connect() only selects a local address.
fn outbound_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}
