use std::rc::Rc;

use crate::lua_value::{LuaStr, LuaTable, LuaType, LuaValue, lua_convert, undump};
use crate::lua_vm::execute::{self, TmKind};
use crate::lua_vm::lua_closure::{upvalue_close, upvalue_get, upvalue_set};
use crate::lua_vm::{
    ArithOp, CFunction, CompareOp, FramePtr, LUA_ERR_RUN, LUA_MIN_STACK, LUA_OK,
    LUA_REGISTRY_INDEX, LUA_RIDX_GLOBALS, LuaClosure, LuaError, LuaFrame, LuaResult, MAX_META_DEPTH,
    Upvalue, UpvaluePtr,
};

/// The interpreter state: the registry (which roots the globals table
/// and the per-type metatables) and the chain of call frames, exposed
/// to hosts through a pseudo-stack API.
///
/// A state is single-threaded; concurrency is partitioned one state
/// per thread.
pub struct LuaState {
    registry: Rc<LuaTable>,
    frame: FramePtr,
}

impl LuaState {
    pub fn new() -> LuaState {
        let registry = LuaTable::new(2, 8);
        let globals = LuaTable::new(0, 20);
        registry.put_int(LUA_RIDX_GLOBALS, LuaValue::Table(globals));
        LuaState {
            registry,
            frame: LuaFrame::new(LUA_MIN_STACK),
        }
    }

    pub fn registry(&self) -> Rc<LuaTable> {
        self.registry.clone()
    }

    pub fn globals(&self) -> Rc<LuaTable> {
        let v = self.registry.get_int(LUA_RIDX_GLOBALS);
        v.as_table().cloned().unwrap_or_else(|| LuaTable::new(0, 0))
    }

    // ------------------------------------------------------------
    // frame chain
    // ------------------------------------------------------------

    pub(crate) fn current_frame(&self) -> FramePtr {
        self.frame.clone()
    }

    pub(crate) fn push_frame(&mut self, frame: FramePtr) {
        frame.borrow_mut().prev = Some(self.frame.clone());
        self.frame = frame;
    }

    /// Pop the current frame, closing any upvalues that still alias
    /// its registers.
    pub(crate) fn pop_frame(&mut self) {
        let departing = self.frame.clone();
        let open: Vec<UpvaluePtr> = departing.borrow_mut().openuvs.drain().map(|(_, uv)| uv).collect();
        for uv in open {
            upvalue_close(&uv);
        }
        let prev = departing.borrow_mut().prev.take();
        if let Some(prev) = prev {
            self.frame = prev;
        }
    }

    // ------------------------------------------------------------
    // slot access, pseudo-indices included
    // ------------------------------------------------------------

    pub(crate) fn current_closure(&self) -> Option<Rc<LuaClosure>> {
        self.frame.borrow().closure.clone()
    }

    pub(crate) fn stack_get(&self, idx: isize) -> LuaValue {
        if idx == LUA_REGISTRY_INDEX {
            return LuaValue::Table(self.registry.clone());
        }
        if idx < LUA_REGISTRY_INDEX {
            // upvalue pseudo-index of the running closure
            let i = (LUA_REGISTRY_INDEX - idx) as usize;
            let closure = self.current_closure();
            if let Some(c) = closure {
                if i >= 1 && i <= c.upvalues.len() {
                    return upvalue_get(&c.upvalues[i - 1]);
                }
            }
            return LuaValue::Nil;
        }
        self.frame.borrow().get(idx)
    }

    pub(crate) fn stack_set(&mut self, idx: isize, val: LuaValue) -> LuaResult<()> {
        if idx == LUA_REGISTRY_INDEX {
            match val {
                LuaValue::Table(t) => {
                    self.registry = t;
                    return Ok(());
                }
                _ => return Err(LuaError::runtime("registry must be a table")),
            }
        }
        if idx < LUA_REGISTRY_INDEX {
            let i = (LUA_REGISTRY_INDEX - idx) as usize;
            let closure = self.current_closure();
            if let Some(c) = closure {
                if i >= 1 && i <= c.upvalues.len() {
                    upvalue_set(&c.upvalues[i - 1], val);
                    return Ok(());
                }
            }
            return Err(LuaError::runtime(format!("invalid upvalue pseudo-index {idx}")));
        }
        self.frame.borrow_mut().set(idx, val)
    }

    /// Push a value onto the current frame.
    pub fn push(&mut self, val: LuaValue) -> LuaResult<()> {
        self.frame.borrow_mut().push(val)
    }

    pub(crate) fn pop_checked(&mut self) -> LuaResult<LuaValue> {
        self.frame.borrow_mut().pop()
    }

    /// Pop the top value; nil when the frame is empty.
    pub fn pop_value(&mut self) -> LuaValue {
        self.pop_checked().unwrap_or(LuaValue::Nil)
    }

    /// Pop `n` values in bottom-to-top order.
    pub fn pop_values(&mut self, n: usize) -> Vec<LuaValue> {
        self.frame
            .borrow_mut()
            .pop_n(n)
            .unwrap_or_else(|_| Vec::new())
    }

    // ------------------------------------------------------------
    // basic stack manipulation
    // ------------------------------------------------------------

    pub fn get_top(&self) -> isize {
        self.frame.borrow().top as isize
    }

    pub fn abs_index(&self, idx: isize) -> isize {
        if idx <= LUA_REGISTRY_INDEX {
            return idx;
        }
        self.frame.borrow().abs_index(idx)
    }

    /// Ensure `n` free slots. Reports false only when the hard stack
    /// cap would be exceeded.
    pub fn check_stack(&mut self, n: usize) -> bool {
        self.frame.borrow_mut().check(n).is_ok()
    }

    pub fn pop(&mut self, n: usize) -> LuaResult<()> {
        for _ in 0..n {
            self.pop_checked()?;
        }
        Ok(())
    }

    /// `stack[to] = stack[from]`.
    pub fn copy(&mut self, from: isize, to: isize) -> LuaResult<()> {
        let val = self.stack_get(from);
        self.stack_set(to, val)
    }

    /// Push a copy of the value at `idx`.
    pub fn push_value(&mut self, idx: isize) -> LuaResult<()> {
        let val = self.stack_get(idx);
        self.push(val)
    }

    /// Pop the top value into `idx`.
    pub fn replace(&mut self, idx: isize) -> LuaResult<()> {
        let val = self.pop_checked()?;
        self.stack_set(idx, val)
    }

    /// Pop the top value and insert it at `idx`, shifting up.
    pub fn insert(&mut self, idx: isize) -> LuaResult<()> {
        self.rotate(idx, 1)
    }

    /// Remove the value at `idx`, shifting down.
    pub fn remove(&mut self, idx: isize) -> LuaResult<()> {
        self.rotate(idx, -1)?;
        self.pop(1)
    }

    /// Rotate the segment `[idx, top]` by `n` steps, towards the top
    /// for positive `n`.
    pub fn rotate(&mut self, idx: isize, n: isize) -> LuaResult<()> {
        let fp = self.current_frame();
        let mut f = fp.borrow_mut();
        let b = f.abs_index(idx) - 1;
        let e = f.top as isize - 1;
        if b < 0 {
            return Err(LuaError::runtime(format!("invalid stack index {idx}")));
        }
        if b >= e {
            return Ok(());
        }
        let m = if n >= 0 { e - n } else { b - n - 1 };
        if m < b - 1 || m > e {
            return Err(LuaError::runtime("rotation out of range"));
        }
        if m >= b {
            f.reverse(b as usize, m as usize);
        }
        if m + 1 <= e {
            f.reverse((m + 1) as usize, e as usize);
        }
        f.reverse(b as usize, e as usize);
        Ok(())
    }

    /// Grow (with nils) or shrink the frame to the given top.
    pub fn set_top(&mut self, idx: isize) -> LuaResult<()> {
        let fp = self.current_frame();
        let new_top = fp.borrow().abs_index(idx);
        if new_top < 0 {
            return Err(LuaError::runtime("stack underflow"));
        }
        let mut f = fp.borrow_mut();
        let diff = f.top as isize - new_top;
        if diff > 0 {
            for _ in 0..diff {
                f.pop()?;
            }
        } else {
            for _ in 0..(-diff) {
                f.push(LuaValue::Nil)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------
    // typed pushes (host -> stack)
    // ------------------------------------------------------------

    pub fn push_nil(&mut self) -> LuaResult<()> {
        self.push(LuaValue::Nil)
    }

    pub fn push_boolean(&mut self, b: bool) -> LuaResult<()> {
        self.push(LuaValue::Boolean(b))
    }

    pub fn push_integer(&mut self, i: i64) -> LuaResult<()> {
        self.push(LuaValue::Integer(i))
    }

    pub fn push_number(&mut self, n: f64) -> LuaResult<()> {
        self.push(LuaValue::Float(n))
    }

    pub fn push_string(&mut self, s: &str) -> LuaResult<()> {
        self.push(LuaValue::str(s))
    }

    pub fn push_cfunction(&mut self, f: CFunction) -> LuaResult<()> {
        self.push(LuaValue::Closure(LuaClosure::from_native(f, Vec::new())))
    }

    /// Pop `n` upvalues and push a host closure owning them (closed).
    pub fn push_native_closure(&mut self, f: CFunction, n: usize) -> LuaResult<()> {
        let mut upvalues = vec![Upvalue::closed(LuaValue::Nil); n];
        for i in (0..n).rev() {
            upvalues[i] = Upvalue::closed(self.pop_checked()?);
        }
        self.push(LuaValue::Closure(LuaClosure::from_native(f, upvalues)))
    }

    /// `globals[name] = f`.
    pub fn register(&mut self, name: &str, f: CFunction) -> LuaResult<()> {
        self.push_cfunction(f)?;
        self.set_global(name)
    }

    // ------------------------------------------------------------
    // typed queries (stack -> host)
    // ------------------------------------------------------------

    pub fn type_of(&self, idx: isize) -> LuaType {
        if idx == LUA_REGISTRY_INDEX {
            return LuaType::Table;
        }
        if idx > LUA_REGISTRY_INDEX && !self.frame.borrow().is_valid(idx) {
            return LuaType::None;
        }
        self.stack_get(idx).type_of()
    }

    pub fn is_none(&self, idx: isize) -> bool {
        self.type_of(idx) == LuaType::None
    }

    pub fn is_nil(&self, idx: isize) -> bool {
        self.type_of(idx) == LuaType::Nil
    }

    pub fn is_none_or_nil(&self, idx: isize) -> bool {
        matches!(self.type_of(idx), LuaType::None | LuaType::Nil)
    }

    pub fn is_boolean(&self, idx: isize) -> bool {
        self.type_of(idx) == LuaType::Boolean
    }

    /// String or number: anything convertible to a string.
    pub fn is_string(&self, idx: isize) -> bool {
        matches!(self.type_of(idx), LuaType::String | LuaType::Number)
    }

    /// Number, or convertible to one.
    pub fn is_number(&self, idx: isize) -> bool {
        self.to_number_x(idx).is_some()
    }

    pub fn is_integer(&self, idx: isize) -> bool {
        self.stack_get(idx).is_integer()
    }

    pub fn is_table(&self, idx: isize) -> bool {
        self.type_of(idx) == LuaType::Table
    }

    pub fn is_function(&self, idx: isize) -> bool {
        self.type_of(idx) == LuaType::Function
    }

    pub fn is_native_function(&self, idx: isize) -> bool {
        self.stack_get(idx)
            .as_closure()
            .is_some_and(|c| c.is_native())
    }

    pub fn to_boolean(&self, idx: isize) -> bool {
        self.stack_get(idx).is_truthy()
    }

    pub fn to_integer_x(&self, idx: isize) -> Option<i64> {
        lua_convert::to_integer(&self.stack_get(idx))
    }

    pub fn to_integer(&self, idx: isize) -> i64 {
        self.to_integer_x(idx).unwrap_or(0)
    }

    pub fn to_number_x(&self, idx: isize) -> Option<f64> {
        lua_convert::to_number(&self.stack_get(idx))
    }

    pub fn to_number(&self, idx: isize) -> f64 {
        self.to_number_x(idx).unwrap_or(0.0)
    }

    /// String coercion. Numbers are converted in place so the slot can
    /// be referenced stably afterwards.
    pub fn to_string_x(&mut self, idx: isize) -> Option<Rc<LuaStr>> {
        let val = self.stack_get(idx);
        match &val {
            LuaValue::String(s) => Some(s.clone()),
            LuaValue::Integer(_) | LuaValue::Float(_) => {
                let s = lua_convert::to_lua_string(&val)?;
                let _ = self.stack_set(idx, LuaValue::String(s.clone()));
                Some(s)
            }
            _ => None,
        }
    }

    pub fn to_rust_string(&mut self, idx: isize) -> String {
        self.to_string_x(idx).map(|s| s.to_string()).unwrap_or_default()
    }

    pub fn to_native_function(&self, idx: isize) -> Option<CFunction> {
        self.stack_get(idx).as_closure().and_then(|c| c.native_fn())
    }

    /// Raw length: byte length for strings, array length for tables,
    /// zero otherwise. No metamethods.
    pub fn raw_len(&self, idx: isize) -> usize {
        match self.stack_get(idx) {
            LuaValue::String(s) => s.len(),
            LuaValue::Table(t) => t.len() as usize,
            _ => 0,
        }
    }

    /// Primitive equality between two indices, without `__eq`.
    pub fn raw_equal(&self, idx1: isize, idx2: isize) -> bool {
        let valid =
            |idx: isize| idx == LUA_REGISTRY_INDEX || self.frame.borrow().is_valid(idx);
        if !valid(idx1) || !valid(idx2) {
            return false;
        }
        self.stack_get(idx1).raw_equal(&self.stack_get(idx2))
    }

    // ------------------------------------------------------------
    // arithmetic, comparison, length, concatenation
    // ------------------------------------------------------------

    /// Pop one or two operands and push `a op b`, with metamethod
    /// fallback when direct evaluation does not apply.
    pub fn arith(&mut self, op: ArithOp) -> LuaResult<()> {
        let b = self.pop_checked()?;
        let a = if op.is_unary() { b.clone() } else { self.pop_checked()? };

        if let Some(result) = execute::raw_arith(&a, &b, op)? {
            return self.push(result);
        }
        if let Some(result) = execute::call_metamethod(self, &a, &b, execute::arith_event(op))? {
            return self.push(result);
        }

        let bitwise = matches!(
            op,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        );
        let culprit = if bitwise {
            if lua_convert::to_integer(&a).is_none() { &a } else { &b }
        } else if lua_convert::to_number(&a).is_none() {
            &a
        } else {
            &b
        };
        if bitwise && lua_convert::to_number(culprit).is_some() {
            return Err(LuaError::arith("number has no integer representation"));
        }
        let action = if bitwise { "perform bitwise operation on" } else { "perform arithmetic on" };
        Err(LuaError::arith(format!("attempt to {action} a {} value", culprit.type_name())))
    }

    /// Compare the values at two indices.
    pub fn compare(&mut self, idx1: isize, idx2: isize, op: CompareOp) -> LuaResult<bool> {
        let a = self.stack_get(idx1);
        let b = self.stack_get(idx2);
        match op {
            CompareOp::Eq => self.lua_equal(&a, &b),
            CompareOp::Lt => self.lua_less_than(&a, &b),
            CompareOp::Le => self.lua_less_equal(&a, &b),
        }
    }

    /// Equality with `__eq`: identity first, and the metamethod is
    /// consulted only when both operands are tables of different
    /// identity. The result coerces to a boolean.
    pub(crate) fn lua_equal(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if let (LuaValue::Table(x), LuaValue::Table(y)) = (a, b) {
            if !Rc::ptr_eq(x, y) {
                if let Some(result) = execute::call_metamethod(self, a, b, TmKind::Eq)? {
                    return Ok(result.is_truthy());
                }
            }
        }
        Ok(a.raw_equal(b))
    }

    fn number_lt(a: &LuaValue, b: &LuaValue) -> Option<bool> {
        match (a, b) {
            (LuaValue::Integer(x), LuaValue::Integer(y)) => Some(x < y),
            _ => {
                let x = lua_convert::to_number(a)?;
                let y = lua_convert::to_number(b)?;
                Some(x < y)
            }
        }
    }

    fn number_le(a: &LuaValue, b: &LuaValue) -> Option<bool> {
        match (a, b) {
            (LuaValue::Integer(x), LuaValue::Integer(y)) => Some(x <= y),
            _ => {
                let x = lua_convert::to_number(a)?;
                let y = lua_convert::to_number(b)?;
                Some(x <= y)
            }
        }
    }

    pub(crate) fn lua_less_than(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if a.is_number() && b.is_number() {
            if let Some(r) = Self::number_lt(a, b) {
                return Ok(r);
            }
        }
        if let (LuaValue::String(x), LuaValue::String(y)) = (a, b) {
            return Ok(x.as_bytes() < y.as_bytes());
        }
        if let Some(result) = execute::call_metamethod(self, a, b, TmKind::Lt)? {
            return Ok(result.is_truthy());
        }
        Err(LuaError::compare(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        )))
    }

    /// `a <= b`, falling back to `not (b < a)` when `__le` is missing.
    pub(crate) fn lua_less_equal(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if a.is_number() && b.is_number() {
            if let Some(r) = Self::number_le(a, b) {
                return Ok(r);
            }
        }
        if let (LuaValue::String(x), LuaValue::String(y)) = (a, b) {
            return Ok(x.as_bytes() <= y.as_bytes());
        }
        if let Some(result) = execute::call_metamethod(self, a, b, TmKind::Le)? {
            return Ok(result.is_truthy());
        }
        if let Some(result) = execute::call_metamethod(self, b, a, TmKind::Lt)? {
            return Ok(!result.is_truthy());
        }
        Err(LuaError::compare(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        )))
    }

    /// Push `#v` for the value at `idx`: byte length for strings,
    /// `__len` when present, otherwise the table array length.
    pub fn len(&mut self, idx: isize) -> LuaResult<()> {
        let val = self.stack_get(idx);
        if let LuaValue::String(s) = &val {
            return self.push_integer(s.len() as i64);
        }
        if let Some(result) = execute::call_metamethod(self, &val, &val, TmKind::Len)? {
            return self.push(result);
        }
        if let LuaValue::Table(t) = &val {
            return self.push_integer(t.len());
        }
        Err(LuaError::runtime(format!(
            "attempt to get length of a {} value",
            val.type_name()
        )))
    }

    /// Pop `n` values and push their left-to-right concatenation.
    /// Adjacent string/number pairs concatenate directly; anything
    /// else goes through `__concat`.
    pub fn concat(&mut self, n: usize) -> LuaResult<()> {
        if n == 0 {
            if !self.check_stack(1) {
                return Err(LuaError::overflow());
            }
            return self.push(LuaValue::str(""));
        }
        for _ in 1..n {
            let b = self.stack_get(-1);
            let a = self.stack_get(-2);
            if let (Some(sa), Some(sb)) = (lua_convert::to_lua_string(&a), lua_convert::to_lua_string(&b)) {
                self.pop(2)?;
                let mut bytes = Vec::with_capacity(sa.len() + sb.len());
                bytes.extend_from_slice(sa.as_bytes());
                bytes.extend_from_slice(sb.as_bytes());
                self.push(LuaValue::str_from_bytes(bytes))?;
                continue;
            }
            self.pop(2)?;
            if let Some(result) = execute::call_metamethod(self, &a, &b, TmKind::Concat)? {
                self.push(result)?;
                continue;
            }
            let culprit = if lua_convert::to_lua_string(&a).is_none() { &a } else { &b };
            return Err(LuaError::concat(format!(
                "attempt to concatenate a {} value",
                culprit.type_name()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------
    // table access
    // ------------------------------------------------------------

    pub fn new_table(&mut self) -> LuaResult<()> {
        self.create_table(0, 0)
    }

    pub fn create_table(&mut self, n_arr: usize, n_rec: usize) -> LuaResult<()> {
        self.push(LuaValue::Table(LuaTable::new(n_arr, n_rec)))
    }

    /// Read through `__index` chains: tables recurse, closures are
    /// invoked with `(t, key)`.
    pub(crate) fn table_get_value(
        &mut self,
        t: &LuaValue,
        key: &LuaValue,
        raw: bool,
    ) -> LuaResult<LuaValue> {
        let mut target = t.clone();
        for _ in 0..MAX_META_DEPTH {
            if let LuaValue::Table(tb) = &target {
                let val = tb.get(key);
                if raw || !val.is_nil() {
                    return Ok(val);
                }
                match execute::get_metafield(self, &target, TmKind::Index) {
                    LuaValue::Nil => return Ok(LuaValue::Nil),
                    mf @ LuaValue::Closure(_) => return self.call_index_handler(mf, &target, key),
                    other => {
                        target = other;
                        continue;
                    }
                }
            }
            if raw {
                return Err(LuaError::index(format!(
                    "attempt to index a {} value",
                    target.type_name()
                )));
            }
            match execute::get_metafield(self, &target, TmKind::Index) {
                LuaValue::Nil => {
                    return Err(LuaError::index(format!(
                        "attempt to index a {} value",
                        target.type_name()
                    )));
                }
                mf @ LuaValue::Closure(_) => return self.call_index_handler(mf, &target, key),
                other => {
                    target = other;
                    continue;
                }
            }
        }
        Err(LuaError::index("'__index' chain too long; possible loop"))
    }

    fn call_index_handler(
        &mut self,
        handler: LuaValue,
        t: &LuaValue,
        key: &LuaValue,
    ) -> LuaResult<LuaValue> {
        if !self.check_stack(4) {
            return Err(LuaError::overflow());
        }
        self.push(handler)?;
        self.push(t.clone())?;
        self.push(key.clone())?;
        self.call(2, 1)?;
        self.pop_checked()
    }

    /// Write through `__newindex` chains.
    pub(crate) fn table_set_value(
        &mut self,
        t: &LuaValue,
        key: &LuaValue,
        val: LuaValue,
        raw: bool,
    ) -> LuaResult<()> {
        let mut target = t.clone();
        for _ in 0..MAX_META_DEPTH {
            if let LuaValue::Table(tb) = &target {
                let existing = tb.get(key);
                if raw || !existing.is_nil() {
                    return tb.put(key.clone(), val);
                }
                match execute::get_metafield(self, &target, TmKind::NewIndex) {
                    LuaValue::Nil => return tb.put(key.clone(), val),
                    mf @ LuaValue::Closure(_) => return self.call_newindex_handler(mf, &target, key, val),
                    other => {
                        target = other;
                        continue;
                    }
                }
            }
            if raw {
                return Err(LuaError::index(format!(
                    "attempt to index a {} value",
                    target.type_name()
                )));
            }
            match execute::get_metafield(self, &target, TmKind::NewIndex) {
                LuaValue::Nil => {
                    return Err(LuaError::index(format!(
                        "attempt to index a {} value",
                        target.type_name()
                    )));
                }
                mf @ LuaValue::Closure(_) => return self.call_newindex_handler(mf, &target, key, val),
                other => {
                    target = other;
                    continue;
                }
            }
        }
        Err(LuaError::index("'__newindex' chain too long; possible loop"))
    }

    fn call_newindex_handler(
        &mut self,
        handler: LuaValue,
        t: &LuaValue,
        key: &LuaValue,
        val: LuaValue,
    ) -> LuaResult<()> {
        if !self.check_stack(5) {
            return Err(LuaError::overflow());
        }
        self.push(handler)?;
        self.push(t.clone())?;
        self.push(key.clone())?;
        self.push(val)?;
        self.call(3, 0)
    }

    /// Pop a key and push `t[key]`; returns the pushed value's type.
    pub fn get_table(&mut self, idx: isize) -> LuaResult<LuaType> {
        let t = self.stack_get(idx);
        let key = self.pop_checked()?;
        let val = self.table_get_value(&t, &key, false)?;
        let ty = val.type_of();
        self.push(val)?;
        Ok(ty)
    }

    pub fn get_field(&mut self, idx: isize, k: &str) -> LuaResult<LuaType> {
        let t = self.stack_get(idx);
        let val = self.table_get_value(&t, &LuaValue::str(k), false)?;
        let ty = val.type_of();
        self.push(val)?;
        Ok(ty)
    }

    pub fn get_i(&mut self, idx: isize, i: i64) -> LuaResult<LuaType> {
        let t = self.stack_get(idx);
        let val = self.table_get_value(&t, &LuaValue::Integer(i), false)?;
        let ty = val.type_of();
        self.push(val)?;
        Ok(ty)
    }

    /// Pop a value then a key and set `t[key] = value`.
    pub fn set_table(&mut self, idx: isize) -> LuaResult<()> {
        let t = self.stack_get(idx);
        let val = self.pop_checked()?;
        let key = self.pop_checked()?;
        self.table_set_value(&t, &key, val, false)
    }

    pub fn set_field(&mut self, idx: isize, k: &str) -> LuaResult<()> {
        let t = self.stack_get(idx);
        let val = self.pop_checked()?;
        self.table_set_value(&t, &LuaValue::str(k), val, false)
    }

    pub fn set_i(&mut self, idx: isize, i: i64) -> LuaResult<()> {
        let t = self.stack_get(idx);
        let val = self.pop_checked()?;
        self.table_set_value(&t, &LuaValue::Integer(i), val, false)
    }

    /// `get_table` without metamethods.
    pub fn raw_get(&mut self, idx: isize) -> LuaResult<LuaType> {
        let t = self.stack_get(idx);
        let key = self.pop_checked()?;
        let val = self.table_get_value(&t, &key, true)?;
        let ty = val.type_of();
        self.push(val)?;
        Ok(ty)
    }

    pub fn raw_set(&mut self, idx: isize) -> LuaResult<()> {
        let t = self.stack_get(idx);
        let val = self.pop_checked()?;
        let key = self.pop_checked()?;
        self.table_set_value(&t, &key, val, true)
    }

    pub fn raw_get_i(&mut self, idx: isize, i: i64) -> LuaResult<LuaType> {
        let t = self.stack_get(idx);
        let val = self.table_get_value(&t, &LuaValue::Integer(i), true)?;
        let ty = val.type_of();
        self.push(val)?;
        Ok(ty)
    }

    pub fn raw_set_i(&mut self, idx: isize, i: i64) -> LuaResult<()> {
        let t = self.stack_get(idx);
        let val = self.pop_checked()?;
        self.table_set_value(&t, &LuaValue::Integer(i), val, true)
    }

    // ------------------------------------------------------------
    // globals
    // ------------------------------------------------------------

    pub fn push_global_table(&mut self) -> LuaResult<()> {
        let globals = self.globals();
        self.push(LuaValue::Table(globals))
    }

    pub fn get_global(&mut self, name: &str) -> LuaResult<LuaType> {
        let t = LuaValue::Table(self.globals());
        let val = self.table_get_value(&t, &LuaValue::str(name), false)?;
        let ty = val.type_of();
        self.push(val)?;
        Ok(ty)
    }

    /// Pop the top value into `globals[name]`.
    pub fn set_global(&mut self, name: &str) -> LuaResult<()> {
        let t = LuaValue::Table(self.globals());
        let val = self.pop_checked()?;
        self.table_set_value(&t, &LuaValue::str(name), val, false)
    }

    // ------------------------------------------------------------
    // metatables
    // ------------------------------------------------------------

    /// The metatable governing a value: a table's own slot, or the
    /// per-type entry the registry keeps under `_MT<typetag>`.
    pub(crate) fn get_metatable_of(&self, val: &LuaValue) -> Option<Rc<LuaTable>> {
        if let LuaValue::Table(t) = val {
            return t.metatable();
        }
        let key = LuaValue::str(&format!("_MT{}", val.type_of().tag()));
        let entry = self.registry.get(&key);
        entry.as_table().cloned()
    }

    pub(crate) fn set_metatable_of(&mut self, val: &LuaValue, mt: Option<Rc<LuaTable>>) {
        if let LuaValue::Table(t) = val {
            t.set_metatable(mt);
            return;
        }
        let key = LuaValue::str(&format!("_MT{}", val.type_of().tag()));
        let entry = mt.map(LuaValue::Table).unwrap_or(LuaValue::Nil);
        let _ = self.registry.put(key, entry);
    }

    /// Push the metatable of the value at `idx`; false (and nothing
    /// pushed) when it has none.
    pub fn get_metatable(&mut self, idx: isize) -> LuaResult<bool> {
        let val = self.stack_get(idx);
        match self.get_metatable_of(&val) {
            Some(mt) => {
                self.push(LuaValue::Table(mt))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pop a table (or nil) and install it as the metatable of the
    /// value at `idx`.
    pub fn set_metatable(&mut self, idx: isize) -> LuaResult<()> {
        let val = self.stack_get(idx);
        let mt_val = self.pop_checked()?;
        match mt_val {
            LuaValue::Nil => {
                self.set_metatable_of(&val, None);
                Ok(())
            }
            LuaValue::Table(mt) => {
                self.set_metatable_of(&val, Some(mt));
                Ok(())
            }
            _ => Err(LuaError::runtime("table expected")),
        }
    }

    // ------------------------------------------------------------
    // iteration
    // ------------------------------------------------------------

    /// Pop a key and push the next key/value pair of the table at
    /// `idx`; false (and nothing pushed) when iteration is over.
    pub fn next(&mut self, idx: isize) -> LuaResult<bool> {
        let t = self.stack_get(idx);
        let Some(tb) = t.as_table().cloned() else {
            return Err(LuaError::runtime("table expected"));
        };
        let key = self.pop_checked()?;
        match tb.next(&key)? {
            Some((k, v)) => {
                if !self.check_stack(2) {
                    return Err(LuaError::overflow());
                }
                self.push(k)?;
                self.push(v)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------
    // load / call / pcall / error
    // ------------------------------------------------------------

    /// Parse a precompiled chunk and push its main closure, wiring the
    /// first upvalue (by convention `_ENV`) to the globals table.
    pub fn load(&mut self, bytes: &[u8], chunk_name: &str) -> LuaResult<()> {
        let proto = undump(bytes, chunk_name)?;
        let n_upvals = proto.upvalues.len();
        let mut upvalues = Vec::with_capacity(n_upvals);
        if n_upvals > 0 {
            upvalues.push(Upvalue::closed(LuaValue::Table(self.globals())));
            for _ in 1..n_upvals {
                upvalues.push(Upvalue::closed(LuaValue::Nil));
            }
        }
        if !self.check_stack(1) {
            return Err(LuaError::overflow());
        }
        self.push(LuaValue::Closure(LuaClosure::from_proto(proto, upvalues)))
    }

    /// Call the function below `n_args` arguments on the stack.
    /// `n_results < 0` keeps every result; otherwise the result list
    /// is padded or truncated to exactly `n_results`.
    pub fn call(&mut self, n_args: usize, n_results: isize) -> LuaResult<()> {
        let mut n_args = n_args;
        let mut callee = self.stack_get(-(n_args as isize) - 1);

        let mut depth = 0usize;
        let closure = loop {
            if let LuaValue::Closure(c) = &callee {
                break c.clone();
            }
            // follow the __call chain, making the current callee the
            // first argument of its handler
            let handler = execute::get_metafield(self, &callee, TmKind::Call);
            if handler.is_nil() {
                return Err(LuaError::call(format!(
                    "attempt to call a {} value",
                    callee.type_name()
                )));
            }
            depth += 1;
            if depth >= MAX_META_DEPTH {
                return Err(LuaError::call("'__call' chain too long; possible loop"));
            }
            if !self.check_stack(1) {
                return Err(LuaError::overflow());
            }
            self.push(callee.clone())?;
            self.insert(-(n_args as isize) - 2)?;
            n_args += 1;
            callee = handler;
        };

        if closure.is_native() {
            self.call_native_closure(n_args, n_results, closure)
        } else {
            self.call_lua_closure(n_args, n_results, closure)
        }
    }

    fn call_lua_closure(
        &mut self,
        n_args: usize,
        n_results: isize,
        closure: Rc<LuaClosure>,
    ) -> LuaResult<()> {
        let proto = match closure.proto() {
            Some(p) => p.clone(),
            None => return Err(LuaError::runtime("expected a lua closure")),
        };
        let n_regs = proto.max_stack_size as usize;
        let n_params = proto.num_params as usize;
        let is_vararg = proto.is_vararg != 0;

        let new_frame = LuaFrame::new(n_regs + LUA_MIN_STACK);
        let mut func_and_args = {
            let fp = self.current_frame();
            let mut f = fp.borrow_mut();
            f.pop_n(n_args + 1)?
        };
        {
            let mut nf = new_frame.borrow_mut();
            nf.closure = Some(closure);
            nf.push_n(&func_and_args[1..], n_params as isize)?;
            nf.top = n_regs;
            if n_args > n_params && is_vararg {
                nf.varargs = func_and_args.split_off(n_params + 1);
            }
        }

        self.push_frame(new_frame.clone());
        // an error leaves the frame chain intact for pcall to unwind
        execute::run_frame(self)?;
        self.pop_frame();

        if n_results != 0 {
            let results = {
                let mut nf = new_frame.borrow_mut();
                let n_ret = nf
                    .top
                    .checked_sub(n_regs)
                    .ok_or_else(|| LuaError::runtime("corrupted frame top"))?;
                nf.pop_n(n_ret)?
            };
            let fp = self.current_frame();
            let mut f = fp.borrow_mut();
            f.check(results.len())?;
            f.push_n(&results, n_results)?;
        }
        Ok(())
    }

    fn call_native_closure(
        &mut self,
        n_args: usize,
        n_results: isize,
        closure: Rc<LuaClosure>,
    ) -> LuaResult<()> {
        let func = match closure.native_fn() {
            Some(f) => f,
            None => return Err(LuaError::runtime("expected a native closure")),
        };

        let new_frame = LuaFrame::new(n_args + LUA_MIN_STACK);
        let args = {
            let fp = self.current_frame();
            let mut f = fp.borrow_mut();
            let args = f.pop_n(n_args)?;
            f.pop()?; // the function slot
            args
        };
        {
            let mut nf = new_frame.borrow_mut();
            nf.closure = Some(closure);
            nf.push_n(&args, n_args as isize)?;
        }

        self.push_frame(new_frame.clone());
        let n_ret = func(self)?;
        self.pop_frame();

        if n_results != 0 {
            let results = new_frame.borrow_mut().pop_n(n_ret)?;
            let fp = self.current_frame();
            let mut f = fp.borrow_mut();
            f.check(results.len())?;
            f.push_n(&results, n_results)?;
        }
        Ok(())
    }

    /// Protected call: on error the frame chain and stack top are
    /// restored to their state at entry and the error value is pushed.
    pub fn pcall(&mut self, n_args: usize, n_results: isize, _msgh: isize) -> i32 {
        let saved_frame = self.current_frame();
        let base_top = saved_frame.borrow().top.saturating_sub(n_args + 1);

        match self.call(n_args, n_results) {
            Ok(()) => LUA_OK,
            Err(err) => {
                while !Rc::ptr_eq(&self.frame, &saved_frame) {
                    if self.frame.borrow().prev.is_none() {
                        break;
                    }
                    self.pop_frame();
                }
                {
                    let fp = self.current_frame();
                    let mut f = fp.borrow_mut();
                    while f.top > base_top {
                        let _ = f.pop();
                    }
                }
                let _ = self.push(err.into_value());
                LUA_ERR_RUN
            }
        }
    }

    /// Pop a value and turn it into a raised error; host closures use
    /// this as `return Err(state.error())`.
    pub fn error(&mut self) -> LuaError {
        let value = self.pop_value();
        LuaError::new(crate::lua_vm::LuaErrorKind::Runtime, value)
    }

    // ------------------------------------------------------------
    // VM-internal operations used by the dispatch loop
    // ------------------------------------------------------------

    pub(crate) fn fetch(&mut self) -> LuaResult<crate::lua_vm::Instruction> {
        let fp = self.current_frame();
        let mut f = fp.borrow_mut();
        let closure = f
            .closure
            .clone()
            .ok_or_else(|| LuaError::runtime("no running closure"))?;
        let proto = closure
            .proto()
            .ok_or_else(|| LuaError::runtime("not a lua closure"))?;
        let word = proto
            .code
            .get(f.pc)
            .copied()
            .ok_or_else(|| LuaError::runtime("program counter out of range"))?;
        f.pc += 1;
        Ok(crate::lua_vm::Instruction(word))
    }

    pub(crate) fn add_pc(&mut self, n: isize) {
        let fp = self.current_frame();
        let mut f = fp.borrow_mut();
        let new_pc = f.pc as isize + n;
        // a negative pc is malformed bytecode; park it out of range so
        // the next fetch reports it
        f.pc = if new_pc < 0 { usize::MAX } else { new_pc as usize };
    }

    /// Push constant `idx` of the running prototype.
    pub(crate) fn get_const(&mut self, idx: usize) -> LuaResult<()> {
        let closure = self
            .current_closure()
            .ok_or_else(|| LuaError::runtime("no running closure"))?;
        let proto = closure
            .proto()
            .ok_or_else(|| LuaError::runtime("not a lua closure"))?;
        let constant = proto
            .constants
            .get(idx)
            .ok_or_else(|| LuaError::runtime("invalid constant index"))?
            .to_value();
        self.push(constant)
    }

    /// Push the register or constant named by a 9-bit RK operand.
    pub(crate) fn get_rk(&mut self, rk: isize) -> LuaResult<()> {
        if rk > 0xFF {
            self.get_const(rk as usize & 0xFF)
        } else {
            // operands count registers from 0, the stack from 1
            self.push_value(rk + 1)
        }
    }

    pub(crate) fn register_count(&self) -> isize {
        match self.current_closure().as_ref().and_then(|c| c.proto()) {
            Some(proto) => proto.max_stack_size as isize,
            None => 0,
        }
    }

    /// Push `n` varargs (all of them when `n < 0`).
    pub(crate) fn load_vararg(&mut self, n: isize) -> LuaResult<()> {
        let fp = self.current_frame();
        let varargs = fp.borrow().varargs.clone();
        let n = if n < 0 { varargs.len() as isize } else { n };
        let mut f = fp.borrow_mut();
        f.check(n as usize)?;
        f.push_n(&varargs, n)
    }

    /// Instantiate sub-prototype `idx` of the running closure and push
    /// the result, capturing upvalues per the descriptors: stack
    /// captures share the frame's open cell for that slot, the rest
    /// alias the enclosing closure's cells.
    pub(crate) fn load_proto(&mut self, idx: usize) -> LuaResult<()> {
        let parent = self
            .current_closure()
            .ok_or_else(|| LuaError::runtime("no running closure"))?;
        let proto = parent
            .proto()
            .ok_or_else(|| LuaError::runtime("not a lua closure"))?;
        let sub = proto
            .protos
            .get(idx)
            .cloned()
            .ok_or_else(|| LuaError::runtime("invalid prototype index"))?;

        let fp = self.current_frame();
        let mut upvalues = Vec::with_capacity(sub.upvalues.len());
        for desc in &sub.upvalues {
            let slot = desc.index as usize;
            if desc.in_stack {
                let cell = {
                    let mut f = fp.borrow_mut();
                    f.openuvs
                        .entry(slot)
                        .or_insert_with(|| Upvalue::open(fp.clone(), slot))
                        .clone()
                };
                upvalues.push(cell);
            } else {
                let cell = parent
                    .upvalues
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| LuaError::runtime("invalid upvalue index"))?;
                upvalues.push(cell);
            }
        }

        self.push(LuaValue::Closure(LuaClosure::from_proto(sub, upvalues)))
    }

    /// Close every open upvalue aliasing slot `a - 1` or above, for
    /// JMP's close hint (`break` out of a scope with captured locals).
    pub(crate) fn close_upvalues(&mut self, a: isize) {
        let fp = self.current_frame();
        let mut to_close = Vec::new();
        {
            let mut f = fp.borrow_mut();
            f.openuvs.retain(|&slot, uv| {
                if slot as isize >= a - 1 {
                    to_close.push(uv.clone());
                    false
                } else {
                    true
                }
            });
        }
        for uv in to_close {
            upvalue_close(&uv);
        }
    }

    /// Read upvalue `i` of the running closure.
    pub(crate) fn get_upvalue(&self, i: usize) -> LuaValue {
        match self.current_closure() {
            Some(c) if i < c.upvalues.len() => upvalue_get(&c.upvalues[i]),
            _ => LuaValue::Nil,
        }
    }

    /// Write upvalue `i` of the running closure.
    pub(crate) fn set_upvalue(&mut self, i: usize, val: LuaValue) {
        if let Some(c) = self.current_closure() {
            if i < c.upvalues.len() {
                upvalue_set(&c.upvalues[i], val);
            }
        }
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}
