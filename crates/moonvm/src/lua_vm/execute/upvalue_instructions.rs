// Upvalue reads and writes, and closure instantiation.

use crate::lua_vm::{Instruction, LuaResult, LuaState};

// R(A) := UpValue[B]
pub(crate) fn get_upval(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let val = state.get_upvalue(b as usize);
    state.push(val)?;
    state.replace(a + 1)
}

// UpValue[B] := R(A)
pub(crate) fn set_upval(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let val = state.stack_get(a + 1);
    state.set_upvalue(b as usize, val);
    Ok(())
}

// R(A) := closure(KPROTO[Bx]), capturing upvalues per the
// sub-prototype's descriptors
pub(crate) fn closure_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, bx) = inst.abx();
    state.load_proto(bx)?;
    state.replace(a + 1)
}
