// Arithmetic, comparison, and the other operator instructions, plus
// the direct-evaluation core the stack API's `arith` shares.
//
// Integer arithmetic wraps modulo 2^64. Integer MOD takes the sign of
// the divisor and IDIV floors; DIV and POW always produce floats.
// Bitwise operands coerce to integers by exact representation, shifts
// are logical, and a negative shift count shifts the other way.

use crate::lua_value::{LuaValue, lua_convert};
use crate::lua_vm::{ArithOp, CompareOp, Instruction, LuaError, LuaResult, LuaState};

pub(crate) fn ifloordiv(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        q.wrapping_sub(1)
    } else {
        q
    }
}

pub(crate) fn imod(a: i64, b: i64) -> i64 {
    a.wrapping_sub(ifloordiv(a, b).wrapping_mul(b))
}

pub(crate) fn fmod(a: f64, b: f64) -> f64 {
    a - (a / b).floor() * b
}

pub(crate) fn shift_left(a: i64, n: i64) -> i64 {
    if n >= 0 {
        if n >= 64 { 0 } else { ((a as u64) << n) as i64 }
    } else if n == i64::MIN {
        0
    } else {
        shift_right(a, -n)
    }
}

pub(crate) fn shift_right(a: i64, n: i64) -> i64 {
    if n >= 0 {
        if n >= 64 { 0 } else { ((a as u64) >> n) as i64 }
    } else if n == i64::MIN {
        0
    } else {
        shift_left(a, -n)
    }
}

/// Coerce an operand to a number, preserving the integer/float
/// subtype of string literals.
fn coerce_number(val: &LuaValue) -> Option<LuaValue> {
    match val {
        LuaValue::Integer(_) | LuaValue::Float(_) => Some(val.clone()),
        LuaValue::String(s) => lua_convert::str_to_number(s.as_bytes()),
        _ => None,
    }
}

fn as_f64(val: &LuaValue) -> f64 {
    match val {
        LuaValue::Integer(i) => *i as f64,
        LuaValue::Float(f) => *f,
        _ => 0.0,
    }
}

/// Integer op when both operands coerce to integers, float op after
/// float coercion otherwise.
fn arith_ii_ff(
    a: &LuaValue,
    b: &LuaValue,
    i_op: fn(i64, i64) -> i64,
    f_op: fn(f64, f64) -> f64,
) -> Option<LuaValue> {
    let x = coerce_number(a)?;
    let y = coerce_number(b)?;
    if let (LuaValue::Integer(i), LuaValue::Integer(j)) = (&x, &y) {
        return Some(LuaValue::Integer(i_op(*i, *j)));
    }
    Some(LuaValue::Float(f_op(as_f64(&x), as_f64(&y))))
}

fn arith_ff(a: &LuaValue, b: &LuaValue, f_op: fn(f64, f64) -> f64) -> Option<LuaValue> {
    let x = lua_convert::to_number(a)?;
    let y = lua_convert::to_number(b)?;
    Some(LuaValue::Float(f_op(x, y)))
}

fn arith_ii(a: &LuaValue, b: &LuaValue, i_op: fn(i64, i64) -> i64) -> Option<LuaValue> {
    let x = lua_convert::to_integer(a)?;
    let y = lua_convert::to_integer(b)?;
    Some(LuaValue::Integer(i_op(x, y)))
}

/// Direct evaluation of an operator. `Ok(None)` means the operands do
/// not admit it and the metamethod should be consulted; `Err` is an
/// unconditional fault (integer division by zero).
pub(crate) fn raw_arith(
    a: &LuaValue,
    b: &LuaValue,
    op: ArithOp,
) -> LuaResult<Option<LuaValue>> {
    let result = match op {
        ArithOp::Add => arith_ii_ff(a, b, i64::wrapping_add, |x, y| x + y),
        ArithOp::Sub => arith_ii_ff(a, b, i64::wrapping_sub, |x, y| x - y),
        ArithOp::Mul => arith_ii_ff(a, b, i64::wrapping_mul, |x, y| x * y),
        ArithOp::Mod => match (coerce_number(a), coerce_number(b)) {
            (Some(LuaValue::Integer(x)), Some(LuaValue::Integer(y))) => {
                if y == 0 {
                    return Err(LuaError::arith("attempt to perform 'n%%0'"));
                }
                Some(LuaValue::Integer(imod(x, y)))
            }
            (Some(x), Some(y)) => Some(LuaValue::Float(fmod(as_f64(&x), as_f64(&y)))),
            _ => None,
        },
        ArithOp::Pow => arith_ff(a, b, f64::powf),
        ArithOp::Div => arith_ff(a, b, |x, y| x / y),
        ArithOp::IDiv => match (coerce_number(a), coerce_number(b)) {
            (Some(LuaValue::Integer(x)), Some(LuaValue::Integer(y))) => {
                if y == 0 {
                    return Err(LuaError::arith("attempt to perform 'n//0'"));
                }
                Some(LuaValue::Integer(ifloordiv(x, y)))
            }
            (Some(x), Some(y)) => Some(LuaValue::Float((as_f64(&x) / as_f64(&y)).floor())),
            _ => None,
        },
        ArithOp::BAnd => arith_ii(a, b, |x, y| x & y),
        ArithOp::BOr => arith_ii(a, b, |x, y| x | y),
        ArithOp::BXor => arith_ii(a, b, |x, y| x ^ y),
        ArithOp::Shl => arith_ii(a, b, shift_left),
        ArithOp::Shr => arith_ii(a, b, shift_right),
        ArithOp::Unm => match coerce_number(a) {
            Some(LuaValue::Integer(x)) => Some(LuaValue::Integer(x.wrapping_neg())),
            Some(LuaValue::Float(x)) => Some(LuaValue::Float(-x)),
            _ => None,
        },
        ArithOp::BNot => lua_convert::to_integer(a).map(|x| LuaValue::Integer(!x)),
    };
    Ok(result)
}

// R(A) := RK(B) op RK(C)
pub(crate) fn binary_arith(
    state: &mut LuaState,
    inst: Instruction,
    op: ArithOp,
) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let a = a + 1;
    state.get_rk(b)?;
    state.get_rk(c)?;
    state.arith(op)?;
    state.replace(a)
}

// R(A) := op R(B)
pub(crate) fn unary_arith(
    state: &mut LuaState,
    inst: Instruction,
    op: ArithOp,
) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let (a, b) = (a + 1, b + 1);
    state.push_value(b)?;
    state.arith(op)?;
    state.replace(a)
}

// if (RK(B) op RK(C)) != A then pc++
pub(crate) fn compare_inst(
    state: &mut LuaState,
    inst: Instruction,
    op: CompareOp,
) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    state.get_rk(b)?;
    state.get_rk(c)?;
    let holds = state.compare(-2, -1, op)?;
    if holds != (a != 0) {
        state.add_pc(1);
    }
    state.pop(2)
}

// R(A) := not R(B)
pub(crate) fn not_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let (a, b) = (a + 1, b + 1);
    let value = !state.to_boolean(b);
    state.push_boolean(value)?;
    state.replace(a)
}

// R(A) := #R(B)
pub(crate) fn len_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, _) = inst.abc();
    let (a, b) = (a + 1, b + 1);
    state.len(b)?;
    state.replace(a)
}

// R(A) := R(B) .. ... .. R(C)
pub(crate) fn concat_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let (a, b, c) = (a + 1, b + 1, c + 1);
    let n = (c - b + 1) as usize;
    if !state.check_stack(n) {
        return Err(LuaError::overflow());
    }
    for i in b..=c {
        state.push_value(i)?;
    }
    state.concat(n)?;
    state.replace(a)
}

// if bool(R(A)) != C then pc++
pub(crate) fn test_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, _, c) = inst.abc();
    let a = a + 1;
    if state.to_boolean(a) != (c != 0) {
        state.add_pc(1);
    }
    Ok(())
}

// if bool(R(B)) == C then R(A) := R(B) else pc++
pub(crate) fn test_set_inst(state: &mut LuaState, inst: Instruction) -> LuaResult<()> {
    let (a, b, c) = inst.abc();
    let (a, b) = (a + 1, b + 1);
    if state.to_boolean(b) == (c != 0) {
        state.copy(b, a)
    } else {
        state.add_pc(1);
        Ok(())
    }
}
