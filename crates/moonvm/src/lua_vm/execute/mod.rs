// The dispatch loop. Fetch, decode, and execute instructions of the
// current frame until its RETURN unwinds it. Calls re-enter through
// `LuaState::call`, so metamethods and nested Lua calls recurse
// through this same loop.

mod arithmetic_instructions;
mod control_instructions;
mod metamethod;
mod table_instructions;
mod upvalue_instructions;

pub use metamethod::TmKind;
pub(crate) use arithmetic_instructions::raw_arith;
pub(crate) use metamethod::{arith_event, call_metamethod, get_metafield};

use crate::lua_vm::{ArithOp, CompareOp, Instruction, LuaError, LuaResult, LuaState, OpCode};

use arithmetic_instructions as arith;
use control_instructions as control;
use table_instructions as table;
use upvalue_instructions as upvalue;

/// Run the current frame to its RETURN.
pub(crate) fn run_frame(state: &mut LuaState) -> LuaResult<()> {
    loop {
        let inst = state.fetch()?;
        let op = inst.opcode().ok_or_else(|| {
            LuaError::runtime(format!("invalid opcode {:#04x}", inst.raw_opcode()))
        })?;
        execute(state, inst, op)?;
        if op == OpCode::Return {
            return Ok(());
        }
    }
}

fn execute(state: &mut LuaState, inst: Instruction, op: OpCode) -> LuaResult<()> {
    match op {
        OpCode::Move => control::move_inst(state, inst),
        OpCode::LoadK => control::load_k(state, inst),
        OpCode::LoadKX => control::load_kx(state, inst),
        OpCode::LoadBool => control::load_bool(state, inst),
        OpCode::LoadNil => control::load_nil(state, inst),
        OpCode::GetUpval => upvalue::get_upval(state, inst),
        OpCode::GetTabUp => table::get_tab_up(state, inst),
        OpCode::GetTable => table::get_table(state, inst),
        OpCode::SetTabUp => table::set_tab_up(state, inst),
        OpCode::SetUpval => upvalue::set_upval(state, inst),
        OpCode::SetTable => table::set_table(state, inst),
        OpCode::NewTable => table::new_table(state, inst),
        OpCode::Self_ => control::self_inst(state, inst),
        OpCode::Add => arith::binary_arith(state, inst, ArithOp::Add),
        OpCode::Sub => arith::binary_arith(state, inst, ArithOp::Sub),
        OpCode::Mul => arith::binary_arith(state, inst, ArithOp::Mul),
        OpCode::Mod => arith::binary_arith(state, inst, ArithOp::Mod),
        OpCode::Pow => arith::binary_arith(state, inst, ArithOp::Pow),
        OpCode::Div => arith::binary_arith(state, inst, ArithOp::Div),
        OpCode::IDiv => arith::binary_arith(state, inst, ArithOp::IDiv),
        OpCode::BAnd => arith::binary_arith(state, inst, ArithOp::BAnd),
        OpCode::BOr => arith::binary_arith(state, inst, ArithOp::BOr),
        OpCode::BXor => arith::binary_arith(state, inst, ArithOp::BXor),
        OpCode::Shl => arith::binary_arith(state, inst, ArithOp::Shl),
        OpCode::Shr => arith::binary_arith(state, inst, ArithOp::Shr),
        OpCode::Unm => arith::unary_arith(state, inst, ArithOp::Unm),
        OpCode::BNot => arith::unary_arith(state, inst, ArithOp::BNot),
        OpCode::Not => arith::not_inst(state, inst),
        OpCode::Len => arith::len_inst(state, inst),
        OpCode::Concat => arith::concat_inst(state, inst),
        OpCode::Jmp => control::jmp(state, inst),
        OpCode::Eq => arith::compare_inst(state, inst, CompareOp::Eq),
        OpCode::Lt => arith::compare_inst(state, inst, CompareOp::Lt),
        OpCode::Le => arith::compare_inst(state, inst, CompareOp::Le),
        OpCode::Test => arith::test_inst(state, inst),
        OpCode::TestSet => arith::test_set_inst(state, inst),
        OpCode::Call => control::call_inst(state, inst),
        OpCode::TailCall => control::tail_call_inst(state, inst),
        OpCode::Return => control::return_inst(state, inst),
        OpCode::ForLoop => control::for_loop(state, inst),
        OpCode::ForPrep => control::for_prep(state, inst),
        OpCode::TForCall => control::tfor_call(state, inst),
        OpCode::TForLoop => control::tfor_loop(state, inst),
        OpCode::SetList => table::set_list(state, inst),
        OpCode::Closure => upvalue::closure_inst(state, inst),
        OpCode::Vararg => control::vararg_inst(state, inst),
        OpCode::ExtraArg => Err(LuaError::runtime("misplaced EXTRAARG")),
    }
}
