//! Loading plugin modules from disk.
//!
//! External plugins are `cdylib`s built against `treeline-plugin-sdk` and
//! exported with `export_plugin!`. Each load copies the library into the
//! module cache under a name unique to its content and load generation, so
//! the OS loader never hands back an image it already mapped for an earlier
//! load of the same path.

use crate::error::{PluginHostError, PluginHostResult};
use libloading::{Library, Symbol};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use treeline_plugin_sdk::{
    ABI_VERSION_SYMBOL, AbiVersionFn, CREATE_SYMBOL, PLUGIN_ABI_VERSION, Plugin, PluginCreateFn,
};

/// What to load and on behalf of which plugin.
#[derive(Debug, Clone, Copy)]
pub struct ModuleRequest<'a> {
    pub plugin_id: &'a str,
    pub entry: &'a Path,
    /// Increases on every load the runtime performs.
    pub generation: u64,
}

pub trait ModuleLoader: Send {
    fn load(&mut self, request: &ModuleRequest<'_>) -> PluginHostResult<Box<dyn Plugin>>;
}

/// Loads native plugin libraries.
///
/// Libraries stay mapped for the loader's lifetime: closures and view mounts
/// handed out by a plugin point into its code, and nothing tracks when the
/// last of them is gone.
pub struct DylibLoader {
    cache_dir: PathBuf,
    libraries: Vec<Library>,
}

impl DylibLoader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            libraries: Vec::new(),
        }
    }

    pub fn from_config(config: &crate::config::RuntimeConfig) -> Self {
        Self::new(&config.module_cache_dir)
    }

    pub fn loaded_libraries(&self) -> usize {
        self.libraries.len()
    }

    /// Copies `entry` into the cache as `<id>-<sha256 prefix>-<generation>.<ext>`.
    fn stage(&self, request: &ModuleRequest<'_>) -> PluginHostResult<PathBuf> {
        let bytes = std::fs::read(request.entry).map_err(|e| {
            PluginHostError::import(
                request.plugin_id,
                format!("cannot read {}: {e}", request.entry.display()),
            )
        })?;
        let digest = hex::encode(Sha256::digest(&bytes));
        let ext = request
            .entry
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(std::env::consts::DLL_EXTENSION);
        let name = format!(
            "{}-{}-{}.{ext}",
            request.plugin_id,
            &digest[..12],
            request.generation
        );

        std::fs::create_dir_all(&self.cache_dir)?;
        let staged = self.cache_dir.join(name);
        if !staged.exists() {
            std::fs::write(&staged, &bytes)?;
        }
        debug!(plugin_id = request.plugin_id, staged = %staged.display(), "Staged plugin module");
        Ok(staged)
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&mut self, request: &ModuleRequest<'_>) -> PluginHostResult<Box<dyn Plugin>> {
        let plugin_id = request.plugin_id;
        let staged = self.stage(request)?;

        // SAFETY: loading runs the library's initializers; plugins are trusted
        // to be built against this SDK, which the ABI check below confirms.
        let library = unsafe { Library::new(&staged) }
            .map_err(|e| PluginHostError::import(plugin_id, e))?;

        let found = {
            let abi: Symbol<AbiVersionFn> = unsafe { library.get(ABI_VERSION_SYMBOL) }
                .map_err(|_| PluginHostError::MissingExport {
                    plugin_id: plugin_id.to_string(),
                })?;
            unsafe { abi() }
        };
        if found != PLUGIN_ABI_VERSION {
            return Err(PluginHostError::AbiMismatch {
                plugin_id: plugin_id.to_string(),
                expected: PLUGIN_ABI_VERSION,
                found,
            });
        }

        let handle = {
            let create: Symbol<PluginCreateFn> = unsafe { library.get(CREATE_SYMBOL) }
                .map_err(|_| PluginHostError::MissingExport {
                    plugin_id: plugin_id.to_string(),
                })?;
            unsafe { create() }
        };
        if handle.is_null() {
            return Err(PluginHostError::import(plugin_id, "plugin constructor panicked"));
        }

        // SAFETY: the pointer came from `Box::into_raw` in `export_plugin!`
        // and ownership is transferred to us exactly once.
        let plugin = unsafe { Box::from_raw(handle) }.into_plugin();
        self.libraries.push(library);

        info!(plugin_id, generation = request.generation, "Loaded plugin module");
        Ok(plugin)
    }
}
