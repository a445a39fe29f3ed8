// Binary chunk deserialization. Every header field is checked against
// the expected Lua 5.3 value before any prototype data is touched; a
// mismatch or truncation fails without yielding a partial prototype.

use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::lua_value::chunk::*;
use crate::lua_value::{Constant, LocalVar, LuaStr, Prototype, UpvalueDesc};
use crate::lua_vm::{LuaError, LuaResult};

/// Parse a precompiled chunk into its root prototype. `chunk_name` is
/// used as the source name wherever the chunk itself records none.
pub fn undump(data: &[u8], chunk_name: &str) -> LuaResult<Rc<Prototype>> {
    let mut r = ChunkReader { data };
    r.check_header()?;
    r.read_u8()?; // root upvalue count, redundant with the descriptors
    let proto = r.read_proto(chunk_name.as_bytes())?;
    Ok(Rc::new(proto))
}

struct ChunkReader<'a> {
    data: &'a [u8],
}

fn truncated() -> LuaError {
    LuaError::chunk("truncated precompiled chunk")
}

impl ChunkReader<'_> {
    fn read_u8(&mut self) -> LuaResult<u8> {
        self.data.read_u8().map_err(|_| truncated())
    }

    fn read_u32(&mut self) -> LuaResult<u32> {
        self.data.read_u32::<LittleEndian>().map_err(|_| truncated())
    }

    fn read_u64(&mut self) -> LuaResult<u64> {
        self.data.read_u64::<LittleEndian>().map_err(|_| truncated())
    }

    fn read_i64(&mut self) -> LuaResult<i64> {
        self.data.read_i64::<LittleEndian>().map_err(|_| truncated())
    }

    fn read_f64(&mut self) -> LuaResult<f64> {
        self.data.read_f64::<LittleEndian>().map_err(|_| truncated())
    }

    fn read_bytes(&mut self, n: usize) -> LuaResult<&[u8]> {
        if self.data.len() < n {
            return Err(truncated());
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn expect_u8(&mut self, want: u8, what: &str) -> LuaResult<()> {
        let got = self.read_u8()?;
        if got != want {
            return Err(LuaError::chunk(format!(
                "bad {what} in precompiled chunk: expected {want:#04x}, got {got:#04x}"
            )));
        }
        Ok(())
    }

    fn check_header(&mut self) -> LuaResult<()> {
        if self.read_bytes(4)? != LUA_SIGNATURE {
            return Err(LuaError::chunk("not a precompiled chunk"));
        }
        self.expect_u8(LUAC_VERSION, "version")?;
        self.expect_u8(LUAC_FORMAT, "format")?;
        if self.read_bytes(6)? != LUAC_DATA {
            return Err(LuaError::chunk("corrupted precompiled chunk"));
        }
        self.expect_u8(CINT_SIZE, "int size")?;
        self.expect_u8(CSIZET_SIZE, "size_t size")?;
        self.expect_u8(INSTRUCTION_SIZE, "instruction size")?;
        self.expect_u8(LUA_INTEGER_SIZE, "lua integer size")?;
        self.expect_u8(LUA_NUMBER_SIZE, "lua number size")?;
        if self.read_i64()? != LUAC_INT {
            return Err(LuaError::chunk("endianness mismatch in precompiled chunk"));
        }
        if self.read_f64()? != LUAC_NUM {
            return Err(LuaError::chunk("float format mismatch in precompiled chunk"));
        }
        Ok(())
    }

    // NULL           -> length byte 0
    // short string   -> length byte n+1, then n bytes
    // long string    -> length byte 0xFF, u64 n+1, then n bytes
    fn read_string(&mut self) -> LuaResult<Vec<u8>> {
        let mut size = self.read_u8()? as u64;
        if size == 0 {
            return Ok(Vec::new());
        }
        if size == 0xFF {
            size = self.read_u64()?;
        }
        Ok(self.read_bytes(size as usize - 1)?.to_vec())
    }

    fn read_code(&mut self) -> LuaResult<Vec<u32>> {
        let n = self.read_u32()? as usize;
        let mut code = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            code.push(self.read_u32()?);
        }
        Ok(code)
    }

    fn read_constant(&mut self) -> LuaResult<Constant> {
        let tag = self.read_u8()?;
        Ok(match tag {
            TAG_NIL => Constant::Nil,
            TAG_BOOLEAN => Constant::Boolean(self.read_u8()? != 0),
            TAG_NUMBER => Constant::Float(self.read_f64()?),
            TAG_INTEGER => Constant::Integer(self.read_i64()?),
            TAG_SHORT_STRING | TAG_LONG_STRING => {
                Constant::Str(LuaStr::from_bytes(self.read_string()?))
            }
            _ => {
                return Err(LuaError::chunk(format!(
                    "unknown constant tag {tag:#04x} in precompiled chunk"
                )));
            }
        })
    }

    fn read_constants(&mut self) -> LuaResult<Vec<Constant>> {
        let n = self.read_u32()? as usize;
        let mut constants = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            constants.push(self.read_constant()?);
        }
        Ok(constants)
    }

    fn read_upvalues(&mut self) -> LuaResult<Vec<UpvalueDesc>> {
        let n = self.read_u32()? as usize;
        let mut upvalues = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            upvalues.push(UpvalueDesc {
                in_stack: self.read_u8()? != 0,
                index: self.read_u8()?,
            });
        }
        Ok(upvalues)
    }

    fn read_protos(&mut self, parent_source: &[u8]) -> LuaResult<Vec<Rc<Prototype>>> {
        let n = self.read_u32()? as usize;
        let mut protos = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            protos.push(Rc::new(self.read_proto(parent_source)?));
        }
        Ok(protos)
    }

    fn read_line_info(&mut self) -> LuaResult<Vec<u32>> {
        let n = self.read_u32()? as usize;
        let mut line_info = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            line_info.push(self.read_u32()?);
        }
        Ok(line_info)
    }

    fn read_loc_vars(&mut self) -> LuaResult<Vec<LocalVar>> {
        let n = self.read_u32()? as usize;
        let mut loc_vars = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            loc_vars.push(LocalVar {
                name: self.read_string()?,
                start_pc: self.read_u32()?,
                end_pc: self.read_u32()?,
            });
        }
        Ok(loc_vars)
    }

    fn read_upvalue_names(&mut self) -> LuaResult<Vec<Vec<u8>>> {
        let n = self.read_u32()? as usize;
        let mut names = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            names.push(self.read_string()?);
        }
        Ok(names)
    }

    fn read_proto(&mut self, parent_source: &[u8]) -> LuaResult<Prototype> {
        let mut source = self.read_string()?;
        if source.is_empty() {
            source = parent_source.to_vec();
        }

        Ok(Prototype {
            line_defined: self.read_u32()?,
            last_line_defined: self.read_u32()?,
            num_params: self.read_u8()?,
            is_vararg: self.read_u8()?,
            max_stack_size: self.read_u8()?,
            code: self.read_code()?,
            constants: self.read_constants()?,
            upvalues: self.read_upvalues()?,
            protos: self.read_protos(&source)?,
            line_info: self.read_line_info()?,
            loc_vars: self.read_loc_vars()?,
            upvalue_names: self.read_upvalue_names()?,
            source,
        })
    }
}
