// The Lua 5.3 opcode set and instruction word layout.
//
//       31                                   0
//       +-------------------------------------+
// iABC  |   B:9   |   C:9   |  A:8   |opcode:6|
//       +-------------------------------------+
// iABx  |       Bx:18       |  A:8   |opcode:6|
//       +-------------------------------------+
// iAsBx |      sBx:18       |  A:8   |opcode:6|
//       +-------------------------------------+
// iAx   |          Ax:26             |opcode:6|
//       +-------------------------------------+

mod instruction;

pub use instruction::{Instruction, fb_to_int, int_to_fb};

/// Instruction formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// Operand roles, used by disassembly and encoding sanity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArg {
    /// unused
    N,
    /// used as-is
    U,
    /// register or jump offset
    R,
    /// constant or register/constant (RK)
    K,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0, // R(A) := R(B)
    LoadK,    // R(A) := Kst(Bx)
    LoadKX,   // R(A) := Kst(extra arg)
    LoadBool, // R(A) := (bool)B; if C then pc++
    LoadNil,  // R(A), ..., R(A+B) := nil
    GetUpval, // R(A) := UpValue[B]
    GetTabUp, // R(A) := UpValue[B][RK(C)]
    GetTable, // R(A) := R(B)[RK(C)]
    SetTabUp, // UpValue[A][RK(B)] := RK(C)
    SetUpval, // UpValue[B] := R(A)
    SetTable, // R(A)[RK(B)] := RK(C)
    NewTable, // R(A) := {} (size hints fb(B), fb(C))
    Self_,    // R(A+1) := R(B); R(A) := R(B)[RK(C)]
    Add,      // R(A) := RK(B) + RK(C)
    Sub,      // R(A) := RK(B) - RK(C)
    Mul,      // R(A) := RK(B) * RK(C)
    Mod,      // R(A) := RK(B) % RK(C)
    Pow,      // R(A) := RK(B) ^ RK(C)
    Div,      // R(A) := RK(B) / RK(C)
    IDiv,     // R(A) := RK(B) // RK(C)
    BAnd,     // R(A) := RK(B) & RK(C)
    BOr,      // R(A) := RK(B) | RK(C)
    BXor,     // R(A) := RK(B) ~ RK(C)
    Shl,      // R(A) := RK(B) << RK(C)
    Shr,      // R(A) := RK(B) >> RK(C)
    Unm,      // R(A) := -R(B)
    BNot,     // R(A) := ~R(B)
    Not,      // R(A) := not R(B)
    Len,      // R(A) := #R(B)
    Concat,   // R(A) := R(B) .. ... .. R(C)
    Jmp,      // pc += sBx; if A then close upvalues >= A-1
    Eq,       // if (RK(B) == RK(C)) != A then pc++
    Lt,       // if (RK(B) <  RK(C)) != A then pc++
    Le,       // if (RK(B) <= RK(C)) != A then pc++
    Test,     // if bool(R(A)) != C then pc++
    TestSet,  // if bool(R(B)) == C then R(A) := R(B) else pc++
    Call,     // R(A), ..., R(A+C-2) := R(A)(R(A+1), ..., R(A+B-1))
    TailCall, // return R(A)(R(A+1), ..., R(A+B-1))
    Return,   // return R(A), ..., R(A+B-2)
    ForLoop,  // R(A) += R(A+2); if in range then pc += sBx; R(A+3) := R(A)
    ForPrep,  // R(A) -= R(A+2); pc += sBx
    TForCall, // R(A+3), ..., R(A+2+C) := R(A)(R(A+1), R(A+2))
    TForLoop, // if R(A+1) != nil then R(A) := R(A+1); pc += sBx
    SetList,  // R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    Closure,  // R(A) := closure(KPROTO[Bx])
    Vararg,   // R(A), ..., R(A+B-2) := vararg
    ExtraArg, // extra (larger) argument for the previous opcode
}

struct OpDesc {
    /// comparison/test: the next instruction must be a jump
    test: bool,
    b_mode: OpArg,
    c_mode: OpArg,
    mode: OpMode,
    name: &'static str,
}

use OpArg::{K, N, R, U};
use OpMode::{IABC, IABx, IAsBx, IAx};

#[rustfmt::skip]
static OPCODE_DESCS: [OpDesc; 47] = [
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IABC,  name: "MOVE" },
    OpDesc { test: false, b_mode: K, c_mode: N, mode: IABx,  name: "LOADK" },
    OpDesc { test: false, b_mode: N, c_mode: N, mode: IABx,  name: "LOADKX" },
    OpDesc { test: false, b_mode: U, c_mode: U, mode: IABC,  name: "LOADBOOL" },
    OpDesc { test: false, b_mode: U, c_mode: N, mode: IABC,  name: "LOADNIL" },
    OpDesc { test: false, b_mode: U, c_mode: N, mode: IABC,  name: "GETUPVAL" },
    OpDesc { test: false, b_mode: U, c_mode: K, mode: IABC,  name: "GETTABUP" },
    OpDesc { test: false, b_mode: R, c_mode: K, mode: IABC,  name: "GETTABLE" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "SETTABUP" },
    OpDesc { test: false, b_mode: U, c_mode: N, mode: IABC,  name: "SETUPVAL" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "SETTABLE" },
    OpDesc { test: false, b_mode: U, c_mode: U, mode: IABC,  name: "NEWTABLE" },
    OpDesc { test: false, b_mode: R, c_mode: K, mode: IABC,  name: "SELF" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "ADD" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "SUB" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "MUL" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "MOD" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "POW" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "DIV" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "IDIV" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "BAND" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "BOR" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "BXOR" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "SHL" },
    OpDesc { test: false, b_mode: K, c_mode: K, mode: IABC,  name: "SHR" },
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IABC,  name: "UNM" },
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IABC,  name: "BNOT" },
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IABC,  name: "NOT" },
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IABC,  name: "LEN" },
    OpDesc { test: false, b_mode: R, c_mode: R, mode: IABC,  name: "CONCAT" },
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IAsBx, name: "JMP" },
    OpDesc { test: true,  b_mode: K, c_mode: K, mode: IABC,  name: "EQ" },
    OpDesc { test: true,  b_mode: K, c_mode: K, mode: IABC,  name: "LT" },
    OpDesc { test: true,  b_mode: K, c_mode: K, mode: IABC,  name: "LE" },
    OpDesc { test: true,  b_mode: N, c_mode: U, mode: IABC,  name: "TEST" },
    OpDesc { test: true,  b_mode: R, c_mode: U, mode: IABC,  name: "TESTSET" },
    OpDesc { test: false, b_mode: U, c_mode: U, mode: IABC,  name: "CALL" },
    OpDesc { test: false, b_mode: U, c_mode: U, mode: IABC,  name: "TAILCALL" },
    OpDesc { test: false, b_mode: U, c_mode: N, mode: IABC,  name: "RETURN" },
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IAsBx, name: "FORLOOP" },
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IAsBx, name: "FORPREP" },
    OpDesc { test: false, b_mode: N, c_mode: U, mode: IABC,  name: "TFORCALL" },
    OpDesc { test: false, b_mode: R, c_mode: N, mode: IAsBx, name: "TFORLOOP" },
    OpDesc { test: false, b_mode: U, c_mode: U, mode: IABC,  name: "SETLIST" },
    OpDesc { test: false, b_mode: U, c_mode: N, mode: IABx,  name: "CLOSURE" },
    OpDesc { test: false, b_mode: U, c_mode: N, mode: IABC,  name: "VARARG" },
    OpDesc { test: false, b_mode: U, c_mode: U, mode: IAx,   name: "EXTRAARG" },
];

impl OpCode {
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        if byte <= OpCode::ExtraArg as u8 {
            // SAFETY: contiguous discriminants 0..=46, checked above
            Some(unsafe { std::mem::transmute::<u8, OpCode>(byte) })
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        OPCODE_DESCS[self as usize].name
    }

    pub fn mode(self) -> OpMode {
        OPCODE_DESCS[self as usize].mode
    }

    pub fn b_mode(self) -> OpArg {
        OPCODE_DESCS[self as usize].b_mode
    }

    pub fn c_mode(self) -> OpArg {
        OPCODE_DESCS[self as usize].c_mode
    }

    /// True for EQ/LT/LE/TEST/TESTSET, which the code generator always
    /// follows with a JMP.
    pub fn is_test(self) -> bool {
        OPCODE_DESCS[self as usize].test
    }
}
