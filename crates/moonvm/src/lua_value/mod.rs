// Lua value model: tagged values, byte strings, the hybrid table,
// function prototypes, and binary chunk I/O.

mod chunk;
mod chunk_reader;
mod chunk_writer;
pub mod lua_convert;
mod lua_table;
#[allow(clippy::module_inception)]
mod lua_value;

pub use chunk::{Constant, LocalVar, Prototype, UpvalueDesc};
pub use chunk_reader::undump;
pub use chunk_writer::dump;
pub use lua_table::LuaTable;
pub use lua_value::{LuaStr, LuaType, LuaValue};
