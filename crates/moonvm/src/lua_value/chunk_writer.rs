// Binary chunk serialization, the exact inverse of the reader: a
// prototype dumped here loads back byte-for-byte identical in meaning.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::lua_value::chunk::*;
use crate::lua_value::{Constant, Prototype};

/// Serialize a prototype as a precompiled chunk.
pub fn dump<W: Write>(mut out: W, proto: &Prototype) -> io::Result<()> {
    write_header(&mut out)?;
    out.write_u8(proto.upvalues.len() as u8)?;
    write_proto(&mut out, proto)
}

fn write_header<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(LUA_SIGNATURE)?;
    out.write_u8(LUAC_VERSION)?;
    out.write_u8(LUAC_FORMAT)?;
    out.write_all(LUAC_DATA)?;
    out.write_u8(CINT_SIZE)?;
    out.write_u8(CSIZET_SIZE)?;
    out.write_u8(INSTRUCTION_SIZE)?;
    out.write_u8(LUA_INTEGER_SIZE)?;
    out.write_u8(LUA_NUMBER_SIZE)?;
    out.write_i64::<LittleEndian>(LUAC_INT)?;
    out.write_f64::<LittleEndian>(LUAC_NUM)
}

fn write_string<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    if bytes.is_empty() {
        return out.write_u8(0);
    }
    let size = bytes.len() as u64 + 1;
    if size < 0xFF {
        out.write_u8(size as u8)?;
    } else {
        out.write_u8(0xFF)?;
        out.write_u64::<LittleEndian>(size)?;
    }
    out.write_all(bytes)
}

fn write_constant<W: Write>(out: &mut W, constant: &Constant) -> io::Result<()> {
    match constant {
        Constant::Nil => out.write_u8(TAG_NIL),
        Constant::Boolean(b) => {
            out.write_u8(TAG_BOOLEAN)?;
            out.write_u8(*b as u8)
        }
        Constant::Float(f) => {
            out.write_u8(TAG_NUMBER)?;
            out.write_f64::<LittleEndian>(*f)
        }
        Constant::Integer(i) => {
            out.write_u8(TAG_INTEGER)?;
            out.write_i64::<LittleEndian>(*i)
        }
        Constant::Str(s) => {
            let tag = if s.len() < 0xFE { TAG_SHORT_STRING } else { TAG_LONG_STRING };
            out.write_u8(tag)?;
            write_string(out, s.as_bytes())
        }
    }
}

fn write_proto<W: Write>(out: &mut W, proto: &Prototype) -> io::Result<()> {
    write_string(out, &proto.source)?;
    out.write_u32::<LittleEndian>(proto.line_defined)?;
    out.write_u32::<LittleEndian>(proto.last_line_defined)?;
    out.write_u8(proto.num_params)?;
    out.write_u8(proto.is_vararg)?;
    out.write_u8(proto.max_stack_size)?;

    out.write_u32::<LittleEndian>(proto.code.len() as u32)?;
    for inst in &proto.code {
        out.write_u32::<LittleEndian>(*inst)?;
    }

    out.write_u32::<LittleEndian>(proto.constants.len() as u32)?;
    for constant in &proto.constants {
        write_constant(out, constant)?;
    }

    out.write_u32::<LittleEndian>(proto.upvalues.len() as u32)?;
    for upvalue in &proto.upvalues {
        out.write_u8(upvalue.in_stack as u8)?;
        out.write_u8(upvalue.index)?;
    }

    out.write_u32::<LittleEndian>(proto.protos.len() as u32)?;
    for sub in &proto.protos {
        write_proto(out, sub)?;
    }

    out.write_u32::<LittleEndian>(proto.line_info.len() as u32)?;
    for line in &proto.line_info {
        out.write_u32::<LittleEndian>(*line)?;
    }

    out.write_u32::<LittleEndian>(proto.loc_vars.len() as u32)?;
    for var in &proto.loc_vars {
        write_string(out, &var.name)?;
        out.write_u32::<LittleEndian>(var.start_pc)?;
        out.write_u32::<LittleEndian>(var.end_pc)?;
    }

    out.write_u32::<LittleEndian>(proto.upvalue_names.len() as u32)?;
    for name in &proto.upvalue_names {
        write_string(out, name)?;
    }
    Ok(())
}
