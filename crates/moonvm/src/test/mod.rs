// Scenario tests. The frontend is out of scope, so executable cases
// assemble prototypes directly with the instruction encoders (or go
// through dump/undump) and drive them through the stack API.

mod test_exec;
mod test_stack_api;

use std::rc::Rc;

use crate::lua_value::{Constant, Prototype, UpvalueDesc};
use crate::lua_vm::{Instruction, LuaClosure, LuaResult, LuaState, Upvalue};
use crate::lua_value::LuaValue;

pub(crate) struct ProtoSpec {
    pub max_stack: u8,
    pub num_params: u8,
    pub is_vararg: bool,
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<UpvalueDesc>,
    pub protos: Vec<Rc<Prototype>>,
}

impl Default for ProtoSpec {
    fn default() -> Self {
        ProtoSpec {
            max_stack: 2,
            num_params: 0,
            is_vararg: false,
            code: Vec::new(),
            constants: Vec::new(),
            upvalues: Vec::new(),
            protos: Vec::new(),
        }
    }
}

pub(crate) fn build_proto(spec: ProtoSpec) -> Rc<Prototype> {
    Rc::new(Prototype {
        source: b"@test".to_vec(),
        line_defined: 0,
        last_line_defined: 0,
        num_params: spec.num_params,
        is_vararg: if spec.is_vararg { 2 } else { 0 },
        max_stack_size: spec.max_stack,
        code: spec.code.into_iter().map(|i| i.0).collect(),
        constants: spec.constants,
        upvalues: spec.upvalues,
        protos: spec.protos,
        line_info: Vec::new(),
        loc_vars: Vec::new(),
        upvalue_names: Vec::new(),
    })
}

/// Upvalue descriptor capturing the environment from the enclosing
/// closure (what the main chunk's `_ENV` looks like).
pub(crate) fn env_upvalue() -> UpvalueDesc {
    UpvalueDesc { in_stack: false, index: 0 }
}

/// Run a main prototype in the state, wiring its first upvalue (if
/// any) to the globals table, and collect every result.
pub(crate) fn run_main(state: &mut LuaState, proto: Rc<Prototype>) -> LuaResult<Vec<LuaValue>> {
    let n_upvals = proto.upvalues.len();
    let mut upvalues = Vec::with_capacity(n_upvals);
    if n_upvals > 0 {
        upvalues.push(Upvalue::closed(LuaValue::Table(state.globals())));
        for _ in 1..n_upvals {
            upvalues.push(Upvalue::closed(LuaValue::Nil));
        }
    }
    let closure = LuaClosure::from_proto(proto, upvalues);
    let base = state.get_top();
    state.push(LuaValue::Closure(closure))?;
    state.call(0, -1)?;
    let n_results = (state.get_top() - base) as usize;
    Ok(state.pop_values(n_results))
}
