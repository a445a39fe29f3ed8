// Metamethod resolution. Operators fall through to here when direct
// evaluation does not apply; table access goes through `__index` and
// `__newindex` chains in the state's table accessors.

use crate::lua_value::LuaValue;
use crate::lua_vm::{ArithOp, LuaError, LuaResult, LuaState};

/// The metamethod events the core dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmKind {
    Index,
    NewIndex,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Eq,
    Lt,
    Le,
    Len,
    Concat,
    Call,
}

impl TmKind {
    pub fn event_name(self) -> &'static str {
        match self {
            TmKind::Index => "__index",
            TmKind::NewIndex => "__newindex",
            TmKind::Add => "__add",
            TmKind::Sub => "__sub",
            TmKind::Mul => "__mul",
            TmKind::Mod => "__mod",
            TmKind::Pow => "__pow",
            TmKind::Div => "__div",
            TmKind::IDiv => "__idiv",
            TmKind::BAnd => "__band",
            TmKind::BOr => "__bor",
            TmKind::BXor => "__bxor",
            TmKind::Shl => "__shl",
            TmKind::Shr => "__shr",
            TmKind::Unm => "__unm",
            TmKind::BNot => "__bnot",
            TmKind::Eq => "__eq",
            TmKind::Lt => "__lt",
            TmKind::Le => "__le",
            TmKind::Len => "__len",
            TmKind::Concat => "__concat",
            TmKind::Call => "__call",
        }
    }
}

pub(crate) fn arith_event(op: ArithOp) -> TmKind {
    match op {
        ArithOp::Add => TmKind::Add,
        ArithOp::Sub => TmKind::Sub,
        ArithOp::Mul => TmKind::Mul,
        ArithOp::Mod => TmKind::Mod,
        ArithOp::Pow => TmKind::Pow,
        ArithOp::Div => TmKind::Div,
        ArithOp::IDiv => TmKind::IDiv,
        ArithOp::BAnd => TmKind::BAnd,
        ArithOp::BOr => TmKind::BOr,
        ArithOp::BXor => TmKind::BXor,
        ArithOp::Shl => TmKind::Shl,
        ArithOp::Shr => TmKind::Shr,
        ArithOp::Unm => TmKind::Unm,
        ArithOp::BNot => TmKind::BNot,
    }
}

/// Look up an event on the metatable governing `val`; nil when absent.
pub(crate) fn get_metafield(state: &LuaState, val: &LuaValue, tm: TmKind) -> LuaValue {
    match state.get_metatable_of(val) {
        Some(mt) => mt.get(&LuaValue::str(tm.event_name())),
        None => LuaValue::Nil,
    }
}

/// Resolve an event on either operand's metatable and invoke it as
/// `handler(a, b)` for one result. `Ok(None)` means neither operand
/// has the event.
pub(crate) fn call_metamethod(
    state: &mut LuaState,
    a: &LuaValue,
    b: &LuaValue,
    tm: TmKind,
) -> LuaResult<Option<LuaValue>> {
    let mut handler = get_metafield(state, a, tm);
    if handler.is_nil() {
        handler = get_metafield(state, b, tm);
    }
    if handler.is_nil() {
        return Ok(None);
    }
    if !state.check_stack(4) {
        return Err(LuaError::overflow());
    }
    state.push(handler)?;
    state.push(a.clone())?;
    state.push(b.clone())?;
    state.call(2, 1)?;
    Ok(Some(state.pop_checked()?))
}
