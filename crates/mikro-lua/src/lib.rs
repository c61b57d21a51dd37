//! Lua plugin host for the MIKRO runtime.
//!
//! This crate plugs Lua bundles into the kernel's loader seam: it turns a
//! bundle's entry file into a live plugin behind the kernel's facade.
//!
//! # Bundle layout
//!
//! ```text
//! <plugin_root>/<bundle>/
//!     config.json      manifest (name, version, dependencies, entry)
//!     init.lua         entry file (override with "entry" in the manifest)
//!     <modules>.lua    co-located modules, reachable via require()
//! ```
//!
//! # Plugin contract
//!
//! The entry file must define a global factory `Plugin(api)` returning a
//! table with `start` and `stop` functions:
//!
//! ```lua
//! -- init.lua
//! function Plugin(api)
//!     local count = 0
//!
//!     return {
//!         start = function()
//!             api.log("hello up")
//!             api.on("greet", function(args)
//!                 count = count + 1
//!                 return "hello " .. (args.who or "world")
//!             end)
//!             api.spawn_task(function()
//!                 api.append_data("data", { beat = count })
//!             end, { interval_ms = 1000, name = "heartbeat" })
//!         end,
//!
//!         stop = function()
//!             api.log("hello down after " .. count .. " greetings")
//!         end,
//!     }
//! end
//! ```
//!
//! Each load builds a fresh, hardened Lua state (no `io`, no `load`
//! family, no `os.execute`), so reloads always run the code currently on
//! disk and unloads can reclaim the whole unit. The state lock is
//! re-entrant per plugin; plugin callbacks may be invoked from pool
//! workers and from inline dispatch alike.

mod api;
mod convert;
mod error;
mod loader;
mod plugin;

pub use convert::{json_map_to_table, json_to_lua, lua_to_json, table_to_json_map};
pub use error::HostError;
pub use loader::LuaBundleLoader;
pub use plugin::LuaPlugin;
