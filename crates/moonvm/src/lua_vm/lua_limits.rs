// VM limits and well-known indices.

/// Free slots guaranteed to a host function on entry, and the slack
/// added on top of a prototype's register count for each Lua frame.
pub const LUA_MIN_STACK: usize = 20;

/// Hard cap on a single frame's slot count.
pub const LUA_MAX_STACK: usize = 1_000_000;

/// Pseudo-index naming the registry as a virtual stack slot. Upvalue
/// pseudo-indices of the running host closure sit below it at
/// `LUA_REGISTRY_INDEX - i`.
pub const LUA_REGISTRY_INDEX: isize = -(LUA_MAX_STACK as isize) - 1000;

/// Registry slot holding the globals table.
pub const LUA_RIDX_GLOBALS: i64 = 2;

/// SETLIST batch size.
pub const FIELDS_PER_FLUSH: i64 = 50;

// Status codes returned by `load` and `pcall`.
pub const LUA_OK: i32 = 0;
pub const LUA_ERR_RUN: i32 = 2;
pub const LUA_ERR_SYNTAX: i32 = 3;

/// Metamethod chain depth bound; past this a lookup loop is assumed.
pub const MAX_META_DEPTH: usize = 100;
