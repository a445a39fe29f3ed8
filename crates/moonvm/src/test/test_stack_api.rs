// The pseudo-stack API surface: indexing, manipulation, coercions,
// table access, globals, iteration.

use crate::lua_value::{LuaType, LuaValue};
use crate::lua_vm::{ArithOp, CompareOp, LUA_REGISTRY_INDEX, LuaState};

#[test]
fn push_pop_and_indexing() {
    let mut state = LuaState::new();
    assert_eq!(state.get_top(), 0);
    state.push_integer(1).unwrap();
    state.push_string("two").unwrap();
    state.push_boolean(true).unwrap();
    assert_eq!(state.get_top(), 3);

    // positive and negative indices name the same slots
    assert_eq!(state.to_integer(1), 1);
    assert_eq!(state.to_integer(-3), 1);
    assert!(state.to_boolean(-1));
    assert_eq!(state.abs_index(-2), 2);
    assert_eq!(state.abs_index(2), 2);

    assert_eq!(state.pop_value(), LuaValue::Boolean(true));
    assert_eq!(state.get_top(), 2);
}

#[test]
fn out_of_range_indices_report_none() {
    let mut state = LuaState::new();
    state.push_integer(1).unwrap();
    assert_eq!(state.type_of(1), LuaType::Number);
    assert_eq!(state.type_of(2), LuaType::None);
    assert_eq!(state.type_of(-2), LuaType::None);
    assert!(state.is_none(5));
    assert!(state.is_none_or_nil(5));
}

#[test]
fn rotate_insert_remove_replace() {
    let mut state = LuaState::new();
    for i in 1..=5 {
        state.push_integer(i).unwrap();
    }
    // [1 2 3 4 5] → insert top at index 2 → [1 5 2 3 4]
    state.insert(2).unwrap();
    let vals = state.pop_values(5);
    assert_eq!(
        vals,
        [1, 5, 2, 3, 4].map(LuaValue::Integer).to_vec()
    );

    for i in 1..=4 {
        state.push_integer(i).unwrap();
    }
    state.remove(2).unwrap(); // [1 3 4]
    assert_eq!(state.get_top(), 3);
    assert_eq!(state.pop_values(3), [1, 3, 4].map(LuaValue::Integer).to_vec());

    state.push_integer(1).unwrap();
    state.push_integer(2).unwrap();
    state.push_integer(9).unwrap();
    state.replace(1).unwrap(); // [9 2]
    assert_eq!(state.pop_values(2), [9, 2].map(LuaValue::Integer).to_vec());
}

#[test]
fn set_top_grows_with_nil_and_shrinks() {
    let mut state = LuaState::new();
    state.push_integer(1).unwrap();
    state.set_top(3).unwrap();
    assert_eq!(state.get_top(), 3);
    assert!(state.is_nil(3));
    state.set_top(1).unwrap();
    assert_eq!(state.get_top(), 1);
    state.set_top(0).unwrap();
    assert_eq!(state.get_top(), 0);
}

#[test]
fn registry_pseudo_index() {
    let mut state = LuaState::new();
    assert_eq!(state.type_of(LUA_REGISTRY_INDEX), LuaType::Table);
    state.push_value(LUA_REGISTRY_INDEX).unwrap();
    assert!(state.is_table(-1));
    // the globals table lives in the registry
    state.get_i(-1, crate::lua_vm::LUA_RIDX_GLOBALS).unwrap();
    assert!(state.is_table(-1));
}

#[test]
fn numeric_coercions() {
    let mut state = LuaState::new();
    state.push_string("0x10").unwrap();
    assert_eq!(state.to_integer_x(-1), Some(16));
    state.push_number(3.0).unwrap();
    assert_eq!(state.to_integer_x(-1), Some(3));
    state.push_number(3.5).unwrap();
    assert_eq!(state.to_integer_x(-1), None);
    assert_eq!(state.to_number(-1), 3.5);
    state.push_boolean(true).unwrap();
    assert_eq!(state.to_number_x(-1), None);
    assert!(state.is_number(-2));
    assert!(!state.is_number(-1));
}

#[test]
fn to_string_converts_numbers_in_place() {
    let mut state = LuaState::new();
    state.push_integer(42).unwrap();
    let s = state.to_string_x(-1).unwrap();
    assert_eq!(s.as_bytes(), b"42");
    // the slot itself became a string
    assert_eq!(state.type_of(-1), LuaType::String);

    state.push_number(2.5).unwrap();
    assert_eq!(state.to_string_x(-1).unwrap().as_bytes(), b"2.5");

    state.push_nil().unwrap();
    assert!(state.to_string_x(-1).is_none());
}

#[test]
fn arith_api_operates_on_the_top() {
    let mut state = LuaState::new();
    state.push_integer(2).unwrap();
    state.push_integer(3).unwrap();
    state.arith(ArithOp::Pow).unwrap();
    assert_eq!(state.pop_value(), LuaValue::Float(8.0));

    state.push_integer(7).unwrap();
    state.push_integer(2).unwrap();
    state.arith(ArithOp::IDiv).unwrap();
    assert_eq!(state.pop_value(), LuaValue::Integer(3));

    state.push_integer(-5).unwrap();
    state.push_integer(3).unwrap();
    state.arith(ArithOp::Mod).unwrap();
    assert_eq!(state.pop_value(), LuaValue::Integer(1));

    state.push_integer(1).unwrap();
    state.push_integer(70).unwrap();
    state.arith(ArithOp::Shl).unwrap();
    assert_eq!(state.pop_value(), LuaValue::Integer(0));

    state.push_integer(6).unwrap();
    state.arith(ArithOp::Unm).unwrap();
    assert_eq!(state.pop_value(), LuaValue::Integer(-6));

    state.push_integer(0).unwrap();
    state.arith(ArithOp::BNot).unwrap();
    assert_eq!(state.pop_value(), LuaValue::Integer(-1));
}

#[test]
fn comparisons_cross_numeric_subtypes() {
    let mut state = LuaState::new();
    state.push_integer(1).unwrap();
    state.push_number(1.0).unwrap();
    assert!(state.compare(-2, -1, CompareOp::Eq).unwrap());
    assert!(state.compare(-2, -1, CompareOp::Le).unwrap());
    assert!(!state.compare(-2, -1, CompareOp::Lt).unwrap());

    state.push_number(f64::NAN).unwrap();
    assert!(!state.compare(-1, -1, CompareOp::Eq).unwrap());

    state.push_string("abc").unwrap();
    state.push_string("abd").unwrap();
    assert!(state.compare(-2, -1, CompareOp::Lt).unwrap());
    // comparing a string with a number has no order
    assert!(state.compare(-1, -4, CompareOp::Lt).is_err());
}

#[test]
fn string_length_and_concat() {
    let mut state = LuaState::new();
    state.push_string("hello").unwrap();
    state.len(-1).unwrap();
    assert_eq!(state.pop_value(), LuaValue::Integer(5));

    state.pop(1).unwrap();
    state.push_string("a").unwrap();
    state.push_integer(1).unwrap();
    state.push_number(2.5).unwrap();
    state.concat(3).unwrap();
    assert_eq!(state.pop_value(), LuaValue::str("a12.5"));

    // n == 0 pushes the empty string, n == 1 is a no-op
    state.concat(0).unwrap();
    assert_eq!(state.pop_value(), LuaValue::str(""));
    state.push_string("solo").unwrap();
    state.concat(1).unwrap();
    assert_eq!(state.pop_value(), LuaValue::str("solo"));
}

#[test]
fn table_access_and_raw_variants() {
    let mut state = LuaState::new();
    state.create_table(2, 2).unwrap();
    state.push_integer(10).unwrap();
    state.set_i(-2, 1).unwrap();
    state.push_string("v").unwrap();
    state.set_field(-2, "k").unwrap();

    assert_eq!(state.get_i(-1, 1).unwrap(), LuaType::Number);
    assert_eq!(state.pop_value(), LuaValue::Integer(10));
    assert_eq!(state.get_field(-1, "k").unwrap(), LuaType::String);
    assert_eq!(state.pop_value(), LuaValue::str("v"));

    state.push_string("k").unwrap();
    state.get_table(-2).unwrap();
    assert_eq!(state.pop_value(), LuaValue::str("v"));

    state.push_integer(2).unwrap();
    state.push_string("w").unwrap();
    state.raw_set(-3).unwrap();
    state.raw_get_i(-1, 2).unwrap();
    assert_eq!(state.pop_value(), LuaValue::str("w"));
    assert_eq!(state.raw_len(-1), 2);
}

#[test]
fn globals_round_trip() {
    let mut state = LuaState::new();
    state.push_integer(12).unwrap();
    state.set_global("answer").unwrap();
    assert_eq!(state.get_global("answer").unwrap(), LuaType::Number);
    assert_eq!(state.pop_value(), LuaValue::Integer(12));

    state.push_global_table().unwrap();
    state.get_field(-1, "answer").unwrap();
    assert_eq!(state.pop_value(), LuaValue::Integer(12));
}

#[test]
fn next_iterates_through_the_api() {
    let mut state = LuaState::new();
    state.create_table(2, 1).unwrap();
    state.push_integer(10).unwrap();
    state.set_i(-2, 1).unwrap();
    state.push_integer(20).unwrap();
    state.set_i(-2, 2).unwrap();
    state.push_integer(30).unwrap();
    state.set_field(-2, "x").unwrap();

    let mut sum = 0i64;
    let mut visits = 0;
    state.push_nil().unwrap();
    while state.next(-2).unwrap() {
        sum += state.to_integer(-1);
        visits += 1;
        state.pop(1).unwrap(); // drop the value, keep the key
    }
    assert_eq!(visits, 3);
    assert_eq!(sum, 60);
}

#[test]
fn type_predicates_are_exclusive() {
    let mut state = LuaState::new();
    state.push_nil().unwrap();
    state.push_boolean(false).unwrap();
    state.push_integer(0).unwrap();
    state.push_string("s").unwrap();
    state.new_table().unwrap();
    state.push_cfunction(|_| Ok(0)).unwrap();

    let types: Vec<LuaType> = (1..=6).map(|i| state.type_of(i)).collect();
    assert_eq!(
        types,
        vec![
            LuaType::Nil,
            LuaType::Boolean,
            LuaType::Number,
            LuaType::String,
            LuaType::Table,
            LuaType::Function,
        ]
    );
    assert!(state.is_function(6));
    assert!(state.is_native_function(6));
    assert!(state.is_integer(3));
    assert!(!state.is_integer(4));
}

#[test]
fn copy_and_push_value() {
    let mut state = LuaState::new();
    state.push_integer(1).unwrap();
    state.push_integer(2).unwrap();
    state.copy(2, 1).unwrap();
    assert_eq!(state.to_integer(1), 2);
    state.push_value(1).unwrap();
    assert_eq!(state.get_top(), 3);
    assert_eq!(state.pop_value(), LuaValue::Integer(2));
}
