// Register moves, loads, jumps, the call/return protocol, and both
// for-loop variants.
//
// Operands count registers from 0 while the stack API counts from 1,
// hence the `+ 1` at the top of every handler.

use crate::lua_value::{LuaValue, lua_convert};
use crate::lua_vm::{CompareOp, Instruction, LuaError, LuaResult, LuaState, OpCode};

// R(A) := R(B)
pub(crate) fn move_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    state.copy(b + 1, a + 1)
}

// R(A) := Kst(Bx)
pub(crate) fn load_k(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, bx) = inst.abx();
    state.get_const(bx)?;
    state.replace(a + 1)
}

// R(A) := Kst(extra arg); the next instruction must be EXTRAARG
pub(crate) fn load_kx(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, _) = inst.abx();
    let extra = state.fetch()?;
    if extra.opcode() != Some(OpCode::ExtraArg) {
        return Err(LuaError::runtime("LOADKX must be followed by EXTRAARG"));
    }
    state.get_const(extra.ax())?;
    state.replace(a + 1)
}

// R(A) := (bool)B; if C then pc++
pub(crate) fn load_bool(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    state.push_boolean(b != 0)?;
    state.replace(a + 1)?;
    if c != 0 {
        state.add_pc(1);
    }
    Ok(())
}

// R(A), R(A+1), ..., R(A+B) := nil
pub(crate) fn load_nil(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let a = a + 1;
    state.push_nil()?;
    for i in a..=a + b {
        state.copy(-1, i)?;
    }
    state.pop(1)
}

// pc += sBx; if A != 0 close every upvalue with slot >= A-1
pub(crate) fn jmp(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, sbx) = inst.asbx();
    state.add_pc(sbx);
    if a != 0 {
        state.close_upvalues(a);
    }
    Ok(())
}

// R(A+1) := R(B); R(A) := R(B)[RK(C)]
pub(crate) fn self_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let (a, b) = (a + 1, b + 1);
    state.copy(b, a + 1)?;
    state.get_rk(c)?;
    state.get_table(b)?;
    state.replace(a)
}

/// Push the callee and its arguments above the registers. `b >= 1`
/// names `b - 1` fixed arguments; `b == 0` absorbs the floating
/// results a previous C=0 instruction left on top.
pub(crate) fn push_func_and_args(
    state: &mut LuaState,
    a: isize,
    b: isize,
) -> LuaResult<usize> {
    if b >= 1 {
        if !state.check_stack(b as usize) {
            return Err(LuaError::overflow());
        }
        for i in a..a + b {
            state.push_value(i)?;
        }
        Ok(b as usize - 1)
    } else {
        fix_stack(state, a)?;
        Ok((state.get_top() - state.register_count() - 1).max(0) as usize)
    }
}

/// Rearrange the stack for a B=0 instruction: the top holds the
/// register cursor a previous C=0 call recorded, below it the floating
/// results. Pull the fixed part `R(a)..R(cursor-1)` up and rotate it
/// in front of the floating part.
fn fix_stack(state: &mut LuaState, a: isize) -> LuaResult<()> {
    let dst = state.to_integer(-1) as isize;
    state.pop(1)?;
    if dst > a {
        if !state.check_stack((dst - a) as usize) {
            return Err(LuaError::overflow());
        }
        for i in a..dst {
            state.push_value(i)?;
        }
        state.rotate(state.register_count() + 1, dst - a)?;
    }
    Ok(())
}

/// Move call results into the registers from `a` upward. `c > 1`
/// stores exactly `c - 1`; `c == 1` wants none; `c == 0` leaves them
/// floating on top and records the cursor for a later B=0 absorber.
pub(crate) fn pop_results(state: &mut LuaState, a: isize, c: isize) -> LuaResult<()> {
    if c == 1 {
        // no results wanted
    } else if c > 1 {
        for i in (a..=a + c - 2).rev() {
            state.replace(i)?;
        }
    } else {
        if !state.check_stack(1) {
            return Err(LuaError::overflow());
        }
        state.push_integer(a as i64)?;
    }
    Ok(())
}

// R(A), ..., R(A+C-2) := R(A)(R(A+1), ..., R(A+B-1))
pub(crate) fn call_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let a = a + 1;
    let n_args = push_func_and_args(state, a, b)?;
    state.call(n_args, c - 1)?;
    pop_results(state, a, c)
}

// return R(A)(R(A+1), ..., R(A+B-1)), run as an ordinary call whose
// results stay floating for the RETURN that follows
pub(crate) fn tail_call_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let a = a + 1;
    let c = 0;
    let n_args = push_func_and_args(state, a, b)?;
    state.call(n_args, c - 1)?;
    pop_results(state, a, c)
}

// return R(A), ..., R(A+B-2)
pub(crate) fn return_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let a = a + 1;
    if b == 1 {
        // no return values
        Ok(())
    } else if b > 1 {
        if !state.check_stack(b as usize - 1) {
            return Err(LuaError::overflow());
        }
        for i in a..=a + b - 2 {
            state.push_value(i)?;
        }
        Ok(())
    } else {
        fix_stack(state, a)
    }
}

// R(A), R(A+1), ..., R(A+B-2) := vararg
pub(crate) fn vararg_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let a = a + 1;
    if b != 1 {
        state.load_vararg(b - 1)?;
        pop_results(state, a, b)?;
    }
    Ok(())
}

fn ensure_loop_number(state: &mut LuaState, idx: isize, what: &str) -> LuaResult<()> {
    let val = state.stack_get(idx);
    if val.is_number() {
        return Ok(());
    }
    if let LuaValue::String(s) = &val {
        if let Some(n) = lua_convert::str_to_number(s.as_bytes()) {
            return state.stack_set(idx, n);
        }
    }
    Err(LuaError::arith(format!("'for' {what} must be a number")))
}

// R(A) -= R(A+2); pc += sBx
pub(crate) fn for_prep(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, sbx) = inst.asbx();
    let a = a + 1;
    ensure_loop_number(state, a, "initial value")?;
    ensure_loop_number(state, a + 1, "limit")?;
    ensure_loop_number(state, a + 2, "step")?;
    state.push_value(a)?;
    state.push_value(a + 2)?;
    state.arith(crate::lua_vm::ArithOp::Sub)?;
    state.replace(a)?;
    state.add_pc(sbx);
    Ok(())
}

// R(A) += R(A+2); while the loop condition holds: pc += sBx; R(A+3) := R(A)
pub(crate) fn for_loop(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, sbx) = inst.asbx();
    let a = a + 1;
    state.push_value(a + 2)?;
    state.push_value(a)?;
    state.arith(crate::lua_vm::ArithOp::Add)?;
    state.replace(a)?;

    let positive_step = state.to_number(a + 2) >= 0.0;
    let keep_going = if positive_step {
        state.compare(a, a + 1, CompareOp::Le)?
    } else {
        state.compare(a + 1, a, CompareOp::Le)?
    };
    if keep_going {
        state.add_pc(sbx);
        state.copy(a, a + 3)?;
    }
    Ok(())
}

// R(A+3), ..., R(A+2+C) := R(A)(R(A+1), R(A+2))
pub(crate) fn tfor_call(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, _, c) = inst.abc();
    let a = a + 1;
    push_func_and_args(state, a, 3)?;
    state.call(2, c)?;
    pop_results(state, a + 3, c + 1)
}

// if R(A+1) != nil then R(A) := R(A+1); pc += sBx
pub(crate) fn tfor_loop(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, sbx) = inst.asbx();
    let a = a + 1;
    if !state.stack_get(a + 1).is_nil() {
        state.copy(a + 1, a)?;
        state.add_pc(sbx);
    }
    Ok(())
}
