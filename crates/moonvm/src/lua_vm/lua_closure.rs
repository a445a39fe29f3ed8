use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::lua_value::{LuaValue, Prototype};
use crate::lua_vm::{CFunction, FramePtr};

pub type UpvaluePtr = Rc<RefCell<Upvalue>>;

/// An upvalue cell. While open it aliases a register of a live frame
/// by index (never by pointer, so slot-vector growth is harmless);
/// closing copies the value into the cell and severs the alias.
pub enum Upvalue {
    Open { frame: FramePtr, slot: usize },
    Closed(LuaValue),
}

impl Upvalue {
    pub fn open(frame: FramePtr, slot: usize) -> UpvaluePtr {
        Rc::new(RefCell::new(Upvalue::Open { frame, slot }))
    }

    pub fn closed(value: LuaValue) -> UpvaluePtr {
        Rc::new(RefCell::new(Upvalue::Closed(value)))
    }
}

/// Read through an upvalue cell, transparent to its open/closed state.
pub fn upvalue_get(uv: &UpvaluePtr) -> LuaValue {
    match &*uv.borrow() {
        Upvalue::Open { frame, slot } => frame.borrow().slots[*slot].clone(),
        Upvalue::Closed(v) => v.clone(),
    }
}

/// Write through an upvalue cell.
pub fn upvalue_set(uv: &UpvaluePtr, value: LuaValue) {
    match &mut *uv.borrow_mut() {
        Upvalue::Open { frame, slot } => frame.borrow_mut().slots[*slot] = value,
        Upvalue::Closed(v) => *v = value,
    }
}

/// Transition a cell from open to closed, preserving its current value.
pub fn upvalue_close(uv: &UpvaluePtr) {
    let value = upvalue_get(uv);
    *uv.borrow_mut() = Upvalue::Closed(value);
}

impl fmt::Debug for Upvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upvalue::Open { slot, .. } => write!(f, "open(slot {slot})"),
            Upvalue::Closed(v) => write!(f, "closed({v:?})"),
        }
    }
}

/// What a closure executes: compiled bytecode or a host function.
#[derive(Clone)]
pub enum ClosureKind {
    Lua(Rc<Prototype>),
    Native(CFunction),
}

/// A callable value: a prototype or host function bundled with its
/// captured upvalue cells. The cell array is fixed at creation; the
/// cells themselves are shared and interior-mutable.
pub struct LuaClosure {
    pub kind: ClosureKind,
    pub upvalues: Vec<UpvaluePtr>,
}

impl LuaClosure {
    pub fn from_proto(proto: Rc<Prototype>, upvalues: Vec<UpvaluePtr>) -> Rc<LuaClosure> {
        Rc::new(LuaClosure {
            kind: ClosureKind::Lua(proto),
            upvalues,
        })
    }

    pub fn from_native(func: CFunction, upvalues: Vec<UpvaluePtr>) -> Rc<LuaClosure> {
        Rc::new(LuaClosure {
            kind: ClosureKind::Native(func),
            upvalues,
        })
    }

    pub fn proto(&self) -> Option<&Rc<Prototype>> {
        match &self.kind {
            ClosureKind::Lua(proto) => Some(proto),
            ClosureKind::Native(_) => None,
        }
    }

    pub fn native_fn(&self) -> Option<CFunction> {
        match &self.kind {
            ClosureKind::Lua(_) => None,
            ClosureKind::Native(f) => Some(*f),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, ClosureKind::Native(_))
    }
}

impl fmt::Debug for LuaClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ClosureKind::Lua(proto) => {
                write!(f, "lua closure ({}, {} upvalues)", proto.source_name(), self.upvalues.len())
            }
            ClosureKind::Native(func) => write!(f, "native closure ({func:p})"),
        }
    }
}
