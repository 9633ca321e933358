//! Ops shipped with the runtime, collected through the inventory like any plugin.

pub mod add;
pub mod identity;
pub mod scale;

/// Domain of the built-in ops.
pub const BUILTIN_DOMAIN: &str = "sable.builtin";
