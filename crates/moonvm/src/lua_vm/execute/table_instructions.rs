// Table creation, access through upvalues and registers, and the
// batched SETLIST constructor.

use crate::lua_vm::opcode::fb_to_int;
use crate::lua_vm::{
    FIELDS_PER_FLUSH, Instruction, LuaError, LuaResult, LuaState, OpCode,
};

// R(A) := {} with array/hash size hints decoded from the B and C
// floating-point bytes
pub(crate) fn new_table(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    state.create_table(fb_to_int(b as usize), fb_to_int(c as usize))?;
    state.replace(a + 1)
}

// R(A) := R(B)[RK(C)]
pub(crate) fn get_table(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let (a, b) = (a + 1, b + 1);
    state.get_rk(c)?;
    state.get_table(b)?;
    state.replace(a)
}

// R(A)[RK(B)] := RK(C)
pub(crate) fn set_table(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let a = a + 1;
    state.get_rk(b)?;
    state.get_rk(c)?;
    state.set_table(a)
}

// R(A) := UpValue[B][RK(C)]
pub(crate) fn get_tab_up(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let a = a + 1;
    let t = state.get_upvalue(b as usize);
    state.get_rk(c)?;
    let key = state.pop_checked()?;
    let val = state.table_get_value(&t, &key, false)?;
    state.push(val)?;
    state.replace(a)
}

// UpValue[A][RK(B)] := RK(C)
pub(crate) fn set_tab_up(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let t = state.get_upvalue(a as usize);
    state.get_rk(b)?;
    state.get_rk(c)?;
    let val = state.pop_checked()?;
    let key = state.pop_checked()?;
    state.table_set_value(&t, &key, val, false)
}

// R(A)[(C-1)*FPF + i] := R(A+i), 1 <= i <= B. C == 0 takes the real
// batch index from a following EXTRAARG; B == 0 flushes everything
// from the registers to the floating top.
pub(crate) fn set_list(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let a = a + 1;
    let mut b = b;

    // EXTRAARG substitutes for C; the -1 of the batch formula applies
    // uniformly to both paths
    let c = if c > 0 {
        c
    } else {
        let extra = state.fetch()?;
        if extra.opcode() != Some(OpCode::ExtraArg) {
            return Err(LuaError::runtime("SETLIST C=0 must be followed by EXTRAARG"));
        }
        extra.ax() as isize
    } - 1;

    let b_is_zero = b == 0;
    if b_is_zero {
        b = state.to_integer(-1) as isize - a - 1;
        state.pop(1)?;
    }

    if !state.check_stack(1) {
        return Err(LuaError::overflow());
    }
    let mut idx = c as i64 * FIELDS_PER_FLUSH;
    for i in 1..=b {
        idx += 1;
        state.push_value(a + i)?;
        state.set_i(a, idx)?;
    }

    if b_is_zero {
        // the values above the registers came from a multi-result
        // expression; flush them too, then retract the top
        let reg_count = state.register_count();
        for i in reg_count + 1..=state.get_top() {
            idx += 1;
            state.push_value(i)?;
            state.set_i(a, idx)?;
        }
        state.set_top(reg_count)?;
    }
    Ok(())
}
