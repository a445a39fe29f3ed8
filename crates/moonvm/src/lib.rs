// Lua 5.3 runtime core
// A precompiled-chunk loader and register-based bytecode VM with a
// stack-API front-end. The source-text frontend is out of scope; the
// VM consumes function prototypes produced elsewhere.

#[cfg(test)]
mod test;

pub mod lua_value;
pub mod lua_vm;

pub use lua_value::{Constant, LuaStr, LuaTable, LuaType, LuaValue, Prototype, UpvalueDesc};
pub use lua_vm::{
    ArithOp, CFunction, ClosureKind, CompareOp, Instruction, LuaClosure, LuaError, LuaErrorKind,
    LuaResult, LuaState, OpCode,
};

/// Load a precompiled chunk into a fresh state and run its main function,
/// returning every result it produces.
pub fn execute_chunk(bytes: &[u8], chunk_name: &str) -> LuaResult<Vec<LuaValue>> {
    let mut state = LuaState::new();
    state.load(bytes, chunk_name)?;
    state.call(0, -1)?;
    let n = state.get_top();
    Ok(state.pop_values(n as usize))
}
