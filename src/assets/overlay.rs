//! Copy-on-write filesystem overlay.
//!
//! # Responsibilities
//! - Resolve reads against a stack of layer folders, highest precedence
//!   first (root on top, builtin at the bottom)
//! - Land all writes in the top (root) layer only
//!
//! # Design Decisions
//! - The stack mirrors the policy merge precedence exactly; it is built in
//!   lockstep with the configuration fold but is not part of the policy
//! - Relative paths only; `..` components are rejected so a plugin asset
//!   cannot escape its layer

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// A stack of layer roots, ordered bottom (lowest precedence) to top.
#[derive(Debug, Clone)]
pub struct AssetOverlay {
    layers: Vec<PathBuf>,
}

fn check_relative(path: &str) -> io::Result<&Path> {
    let p = Path::new(path);
    let escapes = p
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if escapes || p.is_absolute() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid overlay path '{path}'"),
        ));
    }
    Ok(p)
}

impl AssetOverlay {
    /// Build an overlay from layer roots ordered bottom to top.
    pub fn new(layers: Vec<PathBuf>) -> Self {
        Self { layers }
    }

    /// Number of layers in the stack.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Full path of the highest-precedence layer containing `path`.
    pub fn resolve(&self, path: &str) -> io::Result<Option<PathBuf>> {
        let rel = check_relative(path)?;
        for layer in self.layers.iter().rev() {
            let candidate = layer.join(rel);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    pub fn exists(&self, path: &str) -> bool {
        matches!(self.resolve(path), Ok(Some(_)))
    }

    /// Read the file from the highest-precedence layer that has it.
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        match self.resolve(path)? {
            Some(full) => fs::read(full),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("'{path}' not found in any layer"),
            )),
        }
    }

    /// Write into the top layer, shadowing lower layers. Parent
    /// directories are created as needed.
    pub fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        let rel = check_relative(path)?;
        let top = self.layers.last().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "overlay has no layers")
        })?;
        let full = top.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, contents)
    }
}
