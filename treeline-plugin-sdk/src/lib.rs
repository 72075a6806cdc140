//! Guest SDK for building Treeline plugins.
//!
//! Plugin authors implement the [`Plugin`] trait and register their views,
//! sidebar entries, commands, and status-bar widgets through the
//! [`PluginContext`] handed to `activate`. External plugins are built as
//! dynamic libraries and exported with [`export_plugin!`].
//!
//! # Example
//!
//! ```
//! use treeline_plugin_sdk::prelude::*;
//!
//! #[derive(Default)]
//! struct Budget;
//!
//! impl Plugin for Budget {
//!     fn manifest(&self) -> PluginManifest {
//!         PluginManifest::new("budget", "Budget")
//!     }
//!
//!     fn migrations(&self) -> Vec<Migration> {
//!         vec![Migration::new(
//!             1,
//!             "create_categories",
//!             "CREATE TABLE plugin_budget.categories (id VARCHAR PRIMARY KEY, name VARCHAR);",
//!         )]
//!     }
//!
//!     fn activate(&mut self, ctx: &mut dyn PluginContext) -> anyhow::Result<()> {
//!         ctx.register_view(View::component("budget", "Budget", "BudgetView"));
//!         ctx.register_sidebar_item(SidebarItem::new("budget", "Budget", "budget"));
//!         Ok(())
//!     }
//! }
//!
//! treeline_plugin_sdk::export_plugin!(Budget);
//! ```

pub mod capability;
pub mod context;
pub mod manifest;
pub mod migration;
pub mod plugin;
pub mod prelude;

pub use capability::*;
pub use context::PluginContext;
pub use manifest::*;
pub use migration::Migration;
pub use plugin::*;

// ---- Dynamic library export ----

/// Export a plugin type from a `cdylib` so the host can load it.
///
/// ```ignore
/// // Uses `Default::default()` to build the instance:
/// treeline_plugin_sdk::export_plugin!(MyPlugin);
///
/// // Or an explicit constructor:
/// treeline_plugin_sdk::export_plugin!(MyPlugin, MyPlugin::new);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($plugin_ty:ty) => {
        $crate::export_plugin!($plugin_ty, <$plugin_ty as ::core::default::Default>::default);
    };
    ($plugin_ty:ty, $ctor:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn treeline_plugin_abi_version() -> u32 {
            $crate::PLUGIN_ABI_VERSION
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn treeline_plugin_create() -> *mut $crate::PluginHandle {
            // a panic must not cross the C boundary; null tells the host construction failed
            match ::std::panic::catch_unwind(|| {
                let instance: $plugin_ty = ($ctor)();
                let plugin: ::std::boxed::Box<dyn $crate::Plugin> = ::std::boxed::Box::new(instance);
                plugin
            }) {
                Ok(plugin) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(
                    $crate::PluginHandle::new(plugin),
                )),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
