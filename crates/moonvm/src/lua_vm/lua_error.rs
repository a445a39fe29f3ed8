use std::fmt;

use crate::lua_value::LuaValue;

/// Classifies a raised condition by source. All kinds travel the same
/// raise/catch path and are distinguished by the attached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaErrorKind {
    /// No numeric conversion applied and no metamethod was found.
    Arith,
    /// Indexing a value that is not a table and has no `__index`.
    Index,
    /// Uncomparable operands without `__lt`/`__le`.
    Compare,
    /// Unconcatenable operands without `__concat`.
    Concat,
    /// Calling a value that is not callable and has no `__call`.
    Call,
    /// A frame ran out of slots.
    StackOverflow,
    /// A nil or NaN table key, or an invalid key passed to `next`.
    TableKey,
    /// Malformed precompiled chunk.
    Chunk,
    /// Host-raised or internal; carries whatever value was supplied.
    Runtime,
}

/// A raised Lua error: the kind plus the error value that `pcall`
/// delivers to the caller.
#[derive(Debug, Clone)]
pub struct LuaError {
    kind: LuaErrorKind,
    value: LuaValue,
}

impl LuaError {
    pub fn new(kind: LuaErrorKind, value: LuaValue) -> LuaError {
        LuaError { kind, value }
    }

    fn with_message(kind: LuaErrorKind, message: impl Into<String>) -> LuaError {
        LuaError::new(kind, LuaValue::str(&message.into()))
    }

    pub fn arith(message: impl Into<String>) -> LuaError {
        Self::with_message(LuaErrorKind::Arith, message)
    }

    pub fn index(message: impl Into<String>) -> LuaError {
        Self::with_message(LuaErrorKind::Index, message)
    }

    pub fn compare(message: impl Into<String>) -> LuaError {
        Self::with_message(LuaErrorKind::Compare, message)
    }

    pub fn concat(message: impl Into<String>) -> LuaError {
        Self::with_message(LuaErrorKind::Concat, message)
    }

    pub fn call(message: impl Into<String>) -> LuaError {
        Self::with_message(LuaErrorKind::Call, message)
    }

    pub fn table_key(message: impl Into<String>) -> LuaError {
        Self::with_message(LuaErrorKind::TableKey, message)
    }

    pub fn chunk(message: impl Into<String>) -> LuaError {
        Self::with_message(LuaErrorKind::Chunk, message)
    }

    pub fn overflow() -> LuaError {
        Self::with_message(LuaErrorKind::StackOverflow, "stack overflow")
    }

    pub fn runtime(message: impl Into<String>) -> LuaError {
        Self::with_message(LuaErrorKind::Runtime, message)
    }

    pub fn kind(&self) -> LuaErrorKind {
        self.kind
    }

    pub fn value(&self) -> &LuaValue {
        &self.value
    }

    pub fn into_value(self) -> LuaValue {
        self.value
    }
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl std::error::Error for LuaError {}
