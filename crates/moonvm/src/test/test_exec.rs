// Dispatch-loop scenarios over hand-assembled prototypes.

use crate::lua_value::{Constant, LuaValue};
use crate::lua_vm::{Instruction as I, LuaState, OpCode as Op};

use super::{ProtoSpec, build_proto, run_main};

#[test]
fn literal_addition() {
    // return 1 + 2
    let proto = build_proto(ProtoSpec {
        max_stack: 2,
        code: vec![
            I::iabc(Op::Add, 0, I::rk(0), I::rk(1)),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::Integer(1), Constant::Integer(2)],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(3)]);
}

#[test]
fn move_and_loadk() {
    // local a = "hi"; local b = a; return b
    let proto = build_proto(ProtoSpec {
        max_stack: 3,
        code: vec![
            I::iabx(Op::LoadK, 0, 0),
            I::iabc(Op::Move, 1, 0, 0),
            I::iabc(Op::Return, 1, 2, 0),
        ],
        constants: vec![Constant::str("hi")],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::str("hi")]);
}

#[test]
fn loadbool_skips_and_loadnil_clears() {
    // R0 = true (skip next); R1..R2 = nil; return R0, R1
    let proto = build_proto(ProtoSpec {
        max_stack: 4,
        code: vec![
            I::iabc(Op::LoadBool, 0, 1, 1),
            I::iabc(Op::LoadBool, 0, 0, 0), // skipped
            I::iabc(Op::LoadNil, 1, 1, 0),
            I::iabc(Op::Return, 0, 3, 0),
        ],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Boolean(true), LuaValue::Nil]);
}

#[test]
fn numeric_for_loop_sums() {
    // s = 0; for i = 1, 5 do s = s + i end; return s
    let proto = build_proto(ProtoSpec {
        max_stack: 6,
        code: vec![
            I::iabx(Op::LoadK, 0, 0),
            I::iabx(Op::LoadK, 1, 1),
            I::iabx(Op::LoadK, 2, 2),
            I::iabx(Op::LoadK, 3, 1),
            I::iasbx(Op::ForPrep, 1, 1),
            I::iabc(Op::Add, 0, 0, 4),
            I::iasbx(Op::ForLoop, 1, -2),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::Integer(0), Constant::Integer(1), Constant::Integer(5)],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(15)]);
}

#[test]
fn numeric_for_loop_with_negative_step() {
    // s = 0; for i = 3, 1, -1 do s = s + i end; return s
    let proto = build_proto(ProtoSpec {
        max_stack: 6,
        code: vec![
            I::iabx(Op::LoadK, 0, 0),
            I::iabx(Op::LoadK, 1, 1),
            I::iabx(Op::LoadK, 2, 2),
            I::iabx(Op::LoadK, 3, 3),
            I::iasbx(Op::ForPrep, 1, 1),
            I::iabc(Op::Add, 0, 0, 4),
            I::iasbx(Op::ForLoop, 1, -2),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![
            Constant::Integer(0),
            Constant::Integer(3),
            Constant::Integer(1),
            Constant::Integer(-1),
        ],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(6)]);
}

#[test]
fn table_constructor_and_length() {
    // t = {"a", "b", "c"}; return #t
    let proto = build_proto(ProtoSpec {
        max_stack: 5,
        code: vec![
            I::iabc(Op::NewTable, 0, 0, 0),
            I::iabx(Op::LoadK, 1, 0),
            I::iabx(Op::LoadK, 2, 1),
            I::iabx(Op::LoadK, 3, 2),
            I::iabc(Op::SetList, 0, 3, 1),
            I::iabc(Op::Len, 1, 0, 0),
            I::iabc(Op::Return, 1, 2, 0),
        ],
        constants: vec![Constant::str("a"), Constant::str("b"), Constant::str("c")],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(3)]);
}

#[test]
fn settable_and_gettable() {
    // t = {}; t["k"] = 7; return t["k"]
    let proto = build_proto(ProtoSpec {
        max_stack: 2,
        code: vec![
            I::iabc(Op::NewTable, 0, 0, 0),
            I::iabc(Op::SetTable, 0, I::rk(0), I::rk(1)),
            I::iabc(Op::GetTable, 0, 0, I::rk(0)),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::str("k"), Constant::Integer(7)],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(7)]);
}

#[test]
fn concat_instruction() {
    // return "x" .. 1 .. 2.5
    let proto = build_proto(ProtoSpec {
        max_stack: 4,
        code: vec![
            I::iabx(Op::LoadK, 0, 0),
            I::iabx(Op::LoadK, 1, 1),
            I::iabx(Op::LoadK, 2, 2),
            I::iabc(Op::Concat, 0, 0, 2),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::str("x"), Constant::Integer(1), Constant::Float(2.5)],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::str("x12.5")]);
}

#[test]
fn comparison_drives_a_branch() {
    // if 2 < 1 then return "wrong" else return "right" end
    let proto = build_proto(ProtoSpec {
        max_stack: 2,
        code: vec![
            I::iabc(Op::Lt, 1, I::rk(0), I::rk(1)), // (2 < 1) != 1 → skip jmp
            I::iasbx(Op::Jmp, 0, 2),                // to the "wrong" branch
            I::iabx(Op::LoadK, 0, 2),
            I::iabc(Op::Return, 0, 2, 0),
            I::iabx(Op::LoadK, 0, 3), // "wrong"
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![
            Constant::Integer(2),
            Constant::Integer(1),
            Constant::str("right"),
            Constant::str("wrong"),
        ],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::str("right")]);
}

#[test]
fn test_and_testset_instructions() {
    // local a = nil; local b = a or 5; return b
    let proto = build_proto(ProtoSpec {
        max_stack: 3,
        code: vec![
            I::iabc(Op::LoadNil, 0, 0, 0),
            I::iabc(Op::TestSet, 1, 0, 1), // b := a if truthy, else skip
            I::iasbx(Op::Jmp, 0, 1),
            I::iabx(Op::LoadK, 1, 0),
            I::iabc(Op::Return, 1, 2, 0),
        ],
        constants: vec![Constant::Integer(5)],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(5)]);
}

#[test]
fn vararg_spreads_into_results() {
    // local f = function(...) return ... end; return f(1, 2, 3)
    let va = build_proto(ProtoSpec {
        max_stack: 2,
        is_vararg: true,
        code: vec![
            I::iabc(Op::Vararg, 0, 0, 0),
            I::iabc(Op::Return, 0, 0, 0),
        ],
        ..Default::default()
    });
    let main = build_proto(ProtoSpec {
        max_stack: 5,
        code: vec![
            I::iabx(Op::Closure, 0, 0),
            I::iabx(Op::LoadK, 1, 0),
            I::iabx(Op::LoadK, 2, 1),
            I::iabx(Op::LoadK, 3, 2),
            I::iabc(Op::Call, 0, 4, 0),
            I::iabc(Op::Return, 0, 0, 0),
        ],
        constants: vec![Constant::Integer(1), Constant::Integer(2), Constant::Integer(3)],
        protos: vec![va],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, main).unwrap();
    assert_eq!(
        results,
        vec![LuaValue::Integer(1), LuaValue::Integer(2), LuaValue::Integer(3)]
    );
}

#[test]
fn call_with_fixed_results_pads_with_nil() {
    // local f = function() return 1 end; local a, b = f(); return a, b
    let one = build_proto(ProtoSpec {
        max_stack: 2,
        code: vec![
            I::iabx(Op::LoadK, 0, 0),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::Integer(1)],
        ..Default::default()
    });
    let main = build_proto(ProtoSpec {
        max_stack: 3,
        code: vec![
            I::iabx(Op::Closure, 0, 0),
            I::iabc(Op::Call, 0, 1, 3), // two results into R0, R1
            I::iabc(Op::Return, 0, 3, 0),
        ],
        protos: vec![one],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, main).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(1), LuaValue::Nil]);
}

#[test]
fn tailcall_behaves_like_return_of_a_call() {
    // local f = function() return 7, 8 end; return f()
    let inner = build_proto(ProtoSpec {
        max_stack: 2,
        code: vec![
            I::iabx(Op::LoadK, 0, 0),
            I::iabx(Op::LoadK, 1, 1),
            I::iabc(Op::Return, 0, 3, 0),
        ],
        constants: vec![Constant::Integer(7), Constant::Integer(8)],
        ..Default::default()
    });
    let main = build_proto(ProtoSpec {
        max_stack: 2,
        code: vec![
            I::iabx(Op::Closure, 0, 0),
            I::iabc(Op::TailCall, 0, 1, 0),
            I::iabc(Op::Return, 0, 0, 0),
        ],
        protos: vec![inner],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, main).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(7), LuaValue::Integer(8)]);
}

#[test]
fn generic_for_visits_the_array() {
    // s = 0; for _, v in next, t, nil do s = s + v end; return s
    fn native_next(state: &mut LuaState) -> crate::lua_vm::LuaResult<usize> {
        state.push_value(2)?;
        if state.next(1)? {
            Ok(2)
        } else {
            state.push_nil()?;
            Ok(1)
        }
    }

    let mut state = LuaState::new();
    state.register("next", native_next).unwrap();
    state.create_table(3, 0).unwrap();
    for (i, v) in [10, 20, 30].iter().enumerate() {
        state.push_integer(*v).unwrap();
        state.set_i(-2, i as i64 + 1).unwrap();
    }
    state.set_global("t").unwrap();

    let proto = build_proto(ProtoSpec {
        max_stack: 8,
        code: vec![
            I::iabx(Op::LoadK, 0, 0),
            I::iabc(Op::GetTabUp, 1, 0, I::rk(1)),
            I::iabc(Op::GetTabUp, 2, 0, I::rk(2)),
            I::iabc(Op::LoadNil, 3, 0, 0),
            I::iasbx(Op::Jmp, 0, 1),
            I::iabc(Op::Add, 0, 0, 5),
            I::iabc(Op::TForCall, 1, 0, 2),
            I::iasbx(Op::TForLoop, 3, -3),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::Integer(0), Constant::str("next"), Constant::str("t")],
        upvalues: vec![super::env_upvalue()],
        ..Default::default()
    });
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(60)]);
}

#[test]
fn globals_via_gettabup_and_settabup() {
    // x = 21; return x + x
    let proto = build_proto(ProtoSpec {
        max_stack: 2,
        code: vec![
            I::iabc(Op::SetTabUp, 0, I::rk(0), I::rk(1)),
            I::iabc(Op::GetTabUp, 0, 0, I::rk(0)),
            I::iabc(Op::Add, 0, 0, 0),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::str("x"), Constant::Integer(21)],
        upvalues: vec![super::env_upvalue()],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(42)]);
    assert_eq!(
        state.globals().get(&LuaValue::str("x")),
        LuaValue::Integer(21)
    );
}

#[test]
fn self_prepares_a_method_call() {
    // obj = { get = function(self) return self.v end, v = 9 }
    // return obj:get()
    fn getter(state: &mut LuaState) -> crate::lua_vm::LuaResult<usize> {
        state.get_field(1, "v")?;
        Ok(1)
    }

    let mut state = LuaState::new();
    state.create_table(0, 2).unwrap();
    state.push_cfunction(getter).unwrap();
    state.set_field(-2, "get").unwrap();
    state.push_integer(9).unwrap();
    state.set_field(-2, "v").unwrap();
    state.set_global("obj").unwrap();

    let proto = build_proto(ProtoSpec {
        max_stack: 3,
        code: vec![
            I::iabc(Op::GetTabUp, 0, 0, I::rk(0)),
            I::iabc(Op::Self_, 0, 0, I::rk(1)),
            I::iabc(Op::Call, 0, 2, 2),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::str("obj"), Constant::str("get")],
        upvalues: vec![super::env_upvalue()],
        ..Default::default()
    });
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(9)]);
}

#[test]
fn setlist_with_extraarg_batch() {
    // a SETLIST whose C is carried by EXTRAARG; batch index 1 names
    // the first batch, so the value lands at t[1]
    let proto = build_proto(ProtoSpec {
        max_stack: 3,
        code: vec![
            I::iabc(Op::NewTable, 0, 0, 0),
            I::iabx(Op::LoadK, 1, 0),
            I::iabc(Op::SetList, 0, 1, 0),
            I::iax(Op::ExtraArg, 1),
            I::iabc(Op::GetTable, 0, 0, I::rk(1)),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::str("v"), Constant::Integer(1)],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::str("v")]);
}

#[test]
fn fixed_parameters_land_in_the_first_registers() {
    // local f = function(a, b) return a - b end; return f(10, 4)
    let sub = build_proto(ProtoSpec {
        max_stack: 3,
        num_params: 2,
        code: vec![
            I::iabc(Op::Sub, 2, 0, 1),
            I::iabc(Op::Return, 2, 2, 0),
        ],
        ..Default::default()
    });
    let main = build_proto(ProtoSpec {
        max_stack: 4,
        code: vec![
            I::iabx(Op::Closure, 0, 0),
            I::iabx(Op::LoadK, 1, 0),
            I::iabx(Op::LoadK, 2, 1),
            I::iabc(Op::Call, 0, 3, 2),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::Integer(10), Constant::Integer(4)],
        protos: vec![sub],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, main).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(6)]);
}

#[test]
fn integer_overflow_wraps_in_bytecode() {
    let proto = build_proto(ProtoSpec {
        max_stack: 2,
        code: vec![
            I::iabc(Op::Add, 0, I::rk(0), I::rk(1)),
            I::iabc(Op::Return, 0, 2, 0),
        ],
        constants: vec![Constant::Integer(i64::MAX), Constant::Integer(1)],
        ..Default::default()
    });
    let mut state = LuaState::new();
    let results = run_main(&mut state, proto).unwrap();
    assert_eq!(results, vec![LuaValue::Integer(i64::MIN)]);
}
