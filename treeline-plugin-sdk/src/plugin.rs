//! The plugin trait and the dynamic-library entry-point contract.

use crate::context::PluginContext;
use crate::manifest::PluginManifest;
use crate::migration::Migration;

/// Bumped whenever `Plugin`, `PluginContext`, or the exported symbols change
/// incompatibly. The host refuses libraries that report a different value.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// `extern "C" fn() -> u32`
pub const ABI_VERSION_SYMBOL: &[u8] = b"treeline_plugin_abi_version\0";
/// `extern "C" fn() -> *mut PluginHandle`
pub const CREATE_SYMBOL: &[u8] = b"treeline_plugin_create\0";

pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
#[allow(improper_ctypes_definitions)]
pub type PluginCreateFn = unsafe extern "C" fn() -> *mut PluginHandle;

/// A unit of UI and data functionality.
pub trait Plugin: Send {
    /// The manifest compiled into the plugin. For external plugins the
    /// on-disk `manifest.json` takes precedence over this value.
    fn manifest(&self) -> PluginManifest;

    /// Schema migrations, applied once each in ascending version order.
    fn migrations(&self) -> Vec<Migration> {
        Vec::new()
    }

    fn activate(&mut self, ctx: &mut dyn PluginContext) -> anyhow::Result<()>;

    /// Called before the plugin is unregistered during a reload or uninstall.
    fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Heap handle passed across the dynamic-library boundary.
#[repr(C)]
pub struct PluginHandle {
    plugin: Box<dyn Plugin>,
}

impl PluginHandle {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        Self { plugin }
    }

    pub fn into_plugin(self) -> Box<dyn Plugin> {
        self.plugin
    }
}
