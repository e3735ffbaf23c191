//! Dynamically loaded class modules
//!
//! A module is a shared library exporting, for each class it provides, a
//! constructor named after the class (see [`class_symbol`]). Loaded modules
//! are shared between classes through an arena of weak handles; each class
//! holds a [`ModuleGuard`] and a module is unloaded once the last class using
//! it is unregistered.
//!
//! [`class_symbol`]: super::class_symbol

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use libloading::Library;
use tracing::{debug, info};

use super::class::ClassDef;
use crate::error::{CoreError, CoreResult};

/// Constructor exported by a class module.
///
/// Modules must be built with the same toolchain as the host.
pub type ClassCtor = fn() -> ClassDef;

/// A loaded shared library
pub struct LoadedModule {
    name: String,
    path: PathBuf,
    lib: Library,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl LoadedModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a class constructor
    fn class_ctor(&self, symbol: &str) -> Option<ClassCtor> {
        // SAFETY: class modules export `symbol` with the `ClassCtor` signature.
        unsafe { self.lib.get::<ClassCtor>(symbol.as_bytes()).ok().map(|s| *s) }
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        debug!("unloading module {}", self.path.display());
    }
}

/// Modules backing one class; dropping the guard releases them
#[derive(Debug, Default)]
pub struct ModuleGuard {
    modules: Vec<Arc<LoadedModule>>,
}

impl ModuleGuard {
    pub fn modules(&self) -> &[Arc<LoadedModule>] {
        &self.modules
    }
}

/// Arena of loaded modules keyed by path
#[derive(Debug, Default)]
pub struct ModuleArena {
    loaded: HashMap<PathBuf, Weak<LoadedModule>>,
}

impl ModuleArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of modules currently loaded
    pub fn live_count(&self) -> usize {
        self.loaded.values().filter(|w| w.strong_count() > 0).count()
    }

    /// Locate `name` in the module directories
    fn locate(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
        let given = Path::new(name);
        if given.components().count() > 1 || given.extension().is_some() {
            return given.is_file().then(|| given.to_path_buf());
        }
        let file = libloading::library_filename(name);
        dirs.iter().map(|d| d.join(&file)).find(|p| p.is_file())
    }

    /// Open a module, reusing it if it is already loaded
    pub fn open(&mut self, name: &str, dirs: &[PathBuf]) -> CoreResult<Arc<LoadedModule>> {
        let path = Self::locate(name, dirs).ok_or_else(|| CoreError::ModuleLoad {
            module: name.to_string(),
            reason: format!("not found in {} module directories", dirs.len()),
        })?;

        if let Some(existing) = self.loaded.get(&path).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        // SAFETY: loading runs the library's initializers; class modules are
        // trusted the same way as the host binary.
        let lib = unsafe { Library::new(&path) }.map_err(|e| CoreError::ModuleLoad {
            module: name.to_string(),
            reason: e.to_string(),
        })?;
        info!("loaded module {} from {}", name, path.display());

        let module = Arc::new(LoadedModule {
            name: name.to_string(),
            path: path.clone(),
            lib,
        });
        self.loaded.retain(|_, w| w.strong_count() > 0);
        self.loaded.insert(path, Arc::downgrade(&module));
        Ok(module)
    }

    /// Open every module in order and resolve `symbol` from the first that
    /// exports it. On any failure the modules opened so far are released.
    pub fn load_class_def(
        &mut self,
        libs: &[String],
        symbol: &str,
        dirs: &[PathBuf],
    ) -> CoreResult<(ClassDef, ModuleGuard)> {
        let mut guard = ModuleGuard::default();
        for lib in libs {
            guard.modules.push(self.open(lib, dirs)?);
        }

        let ctor = guard
            .modules
            .iter()
            .find_map(|m| m.class_ctor(symbol))
            .ok_or_else(|| CoreError::ModuleLoad {
                module: libs.join(","),
                reason: format!("symbol {} not found", symbol),
            })?;
        Ok((ctor(), guard))
    }
}
