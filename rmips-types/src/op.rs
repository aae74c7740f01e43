use crate::constants::REGISTER_NAMES;
use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::io;
use thiserror::Error;

/// Raised when a word does not encode an instruction of the supported
/// R2000/R3000 integer subset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("invalid instruction")]
pub struct InvalidOpError;

/// Primary operation codes (top six bits of a word)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Opcode {
    Special = 0b000000,
    RegImm = 0b000001,
    J = 0b000010,
    Jal = 0b000011,
    Beq = 0b000100,
    Bne = 0b000101,
    Blez = 0b000110,
    Bgtz = 0b000111,
    Addi = 0b001000,
    Addiu = 0b001001,
    Slti = 0b001010,
    Sltiu = 0b001011,
    Andi = 0b001100,
    Ori = 0b001101,
    Xori = 0b001110,
    Lui = 0b001111,
    Mtc0 = 0b010000,
    Lb = 0b100000,
    Lh = 0b100001,
    Lw = 0b100011,
    Lbu = 0b100100,
    Lhu = 0b100101,
    Sb = 0b101000,
    Sh = 0b101001,
    Sw = 0b101011,
}

impl Opcode {
    pub fn from_word(op: u32) -> Result<Self, InvalidOpError> {
        Ok(match op {
            0b000000 => Opcode::Special,
            0b000001 => Opcode::RegImm,
            0b000010 => Opcode::J,
            0b000011 => Opcode::Jal,
            0b000100 => Opcode::Beq,
            0b000101 => Opcode::Bne,
            0b000110 => Opcode::Blez,
            0b000111 => Opcode::Bgtz,
            0b001000 => Opcode::Addi,
            0b001001 => Opcode::Addiu,
            0b001010 => Opcode::Slti,
            0b001011 => Opcode::Sltiu,
            0b001100 => Opcode::Andi,
            0b001101 => Opcode::Ori,
            0b001110 => Opcode::Xori,
            0b001111 => Opcode::Lui,
            0b010000 => Opcode::Mtc0,
            0b100000 => Opcode::Lb,
            0b100001 => Opcode::Lh,
            0b100011 => Opcode::Lw,
            0b100100 => Opcode::Lbu,
            0b100101 => Opcode::Lhu,
            0b101000 => Opcode::Sb,
            0b101001 => Opcode::Sh,
            0b101011 => Opcode::Sw,
            _ => return Err(InvalidOpError),
        })
    }

    /// Check if this is one of the delayed load instructions
    pub fn is_load(self) -> bool {
        matches!(
            self,
            Opcode::Lb | Opcode::Lh | Opcode::Lw | Opcode::Lbu | Opcode::Lhu
        )
    }
}

/// R-type function codes (bottom six bits of a SPECIAL word)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Funct {
    Sll = 0b000000,
    Srl = 0b000010,
    Sra = 0b000011,
    Sllv = 0b000100,
    Srlv = 0b000110,
    Srav = 0b000111,
    Jr = 0b001000,
    Jalr = 0b001001,
    Syscall = 0b001100,
    Mfhi = 0b010000,
    Mthi = 0b010001,
    Mflo = 0b010010,
    Mtlo = 0b010011,
    Mult = 0b011000,
    Multu = 0b011001,
    Div = 0b011010,
    Divu = 0b011011,
    Add = 0b100000,
    Addu = 0b100001,
    Sub = 0b100010,
    Subu = 0b100011,
    And = 0b100100,
    Or = 0b100101,
    Xor = 0b100110,
    Nor = 0b100111,
    Slt = 0b101010,
    Sltu = 0b101011,
}

impl Funct {
    pub fn from_word(funct: u32) -> Result<Self, InvalidOpError> {
        Ok(match funct {
            0b000000 => Funct::Sll,
            0b000010 => Funct::Srl,
            0b000011 => Funct::Sra,
            0b000100 => Funct::Sllv,
            0b000110 => Funct::Srlv,
            0b000111 => Funct::Srav,
            0b001000 => Funct::Jr,
            0b001001 => Funct::Jalr,
            0b001100 => Funct::Syscall,
            0b010000 => Funct::Mfhi,
            0b010001 => Funct::Mthi,
            0b010010 => Funct::Mflo,
            0b010011 => Funct::Mtlo,
            0b011000 => Funct::Mult,
            0b011001 => Funct::Multu,
            0b011010 => Funct::Div,
            0b011011 => Funct::Divu,
            0b100000 => Funct::Add,
            0b100001 => Funct::Addu,
            0b100010 => Funct::Sub,
            0b100011 => Funct::Subu,
            0b100100 => Funct::And,
            0b100101 => Funct::Or,
            0b100110 => Funct::Xor,
            0b100111 => Funct::Nor,
            0b101010 => Funct::Slt,
            0b101011 => Funct::Sltu,
            _ => return Err(InvalidOpError),
        })
    }
}

// REGIMM branch selectors, carried in the rt field
pub const REGIMM_BLTZ: u8 = 0b00000;
pub const REGIMM_BGEZ: u8 = 0b00001;
pub const REGIMM_BLTZAL: u8 = 0b10000;
pub const REGIMM_BGEZAL: u8 = 0b10001;

/// One decoded instruction. Only the fields appropriate to the encoded
/// shape are meaningful; everything else is zero, so that
/// `encode(decode(w)) == w` for every accepted word.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Op {
    pub opcode: Opcode,
    pub rs: u8,
    pub rt: u8,
    pub rd: u8,
    pub shamt: u8,
    pub funct: Funct,
    pub imm: u16,
    pub addr: u32,
}

impl Op {
    /// The null instruction (`sll $zero, $zero, 0`)
    pub fn nop() -> Self {
        Op {
            opcode: Opcode::Special,
            rs: 0,
            rt: 0,
            rd: 0,
            shamt: 0,
            funct: Funct::Sll,
            imm: 0,
            addr: 0,
        }
    }

    pub fn special(funct: Funct, rs: u8, rt: u8, rd: u8, shamt: u8) -> Self {
        Op {
            funct,
            rs,
            rt,
            rd,
            shamt,
            ..Op::nop()
        }
    }

    pub fn immediate(opcode: Opcode, rs: u8, rt: u8, imm: u16) -> Self {
        Op {
            opcode,
            rs,
            rt,
            imm,
            ..Op::nop()
        }
    }

    pub fn regimm(selector: u8, rs: u8, simm: i16) -> Self {
        Op::immediate(Opcode::RegImm, rs, selector, simm as u16)
    }

    pub fn jump(opcode: Opcode, addr: u32) -> Self {
        Op {
            opcode,
            addr: addr & 0x03ff_ffff,
            ..Op::nop()
        }
    }

    /// Decode a 32-bit word
    pub fn decode(word: u32) -> Result<Self, InvalidOpError> {
        let opcode = Opcode::from_word(word >> 26)?;
        let mut op = Op::nop();
        op.opcode = opcode;

        match opcode {
            Opcode::Special => {
                op.rs = ((word >> 21) & 0x1f) as u8;
                op.rt = ((word >> 16) & 0x1f) as u8;
                op.rd = ((word >> 11) & 0x1f) as u8;
                op.shamt = ((word >> 6) & 0x1f) as u8;
                op.funct = Funct::from_word(word & 0x3f)?;
            }
            Opcode::J | Opcode::Jal => {
                op.addr = word & 0x03ff_ffff;
            }
            // REGIMM and MTC0 share the I-type layout
            _ => {
                op.rs = ((word >> 21) & 0x1f) as u8;
                op.rt = ((word >> 16) & 0x1f) as u8;
                op.imm = (word & 0xffff) as u16;
            }
        }

        Ok(op)
    }

    /// Encode back into a 32-bit word; the exact inverse of `decode`
    pub fn encode(&self) -> u32 {
        let opcode = self.opcode as u32;

        match self.opcode {
            Opcode::Special => {
                ((self.rs as u32 & 0x1f) << 21)
                    | ((self.rt as u32 & 0x1f) << 16)
                    | ((self.rd as u32 & 0x1f) << 11)
                    | ((self.shamt as u32 & 0x1f) << 6)
                    | self.funct as u32
            }
            Opcode::J | Opcode::Jal => (opcode << 26) | (self.addr & 0x03ff_ffff),
            _ => {
                (opcode << 26)
                    | ((self.rs as u32 & 0x1f) << 21)
                    | ((self.rt as u32 & 0x1f) << 16)
                    | self.imm as u32
            }
        }
    }

    /// The immediate interpreted as two's complement
    pub fn simm(&self) -> i16 {
        self.imm as i16
    }

    /// Convert the 26-bit jump target to a full address. The first four
    /// bits come from the program counter of the delay slot.
    pub fn real_address(&self, pc: u32) -> u32 {
        (pc.wrapping_add(4) & 0xf000_0000) | (self.addr << 2)
    }

    /// Decode and format the instruction at address `pc`
    pub fn stringify(&self, pc: u32) -> String {
        let (mnemonic, operands) = match self.opcode {
            Opcode::Special => self.stringify_special(),
            Opcode::RegImm => {
                let mnemonic = match self.rt {
                    REGIMM_BLTZ => "bltz",
                    REGIMM_BGEZ => "bgez",
                    REGIMM_BLTZAL => "bltzal",
                    REGIMM_BGEZAL => "bgezal",
                    _ => return format!(".word   0x{:08x}", self.encode()),
                };
                (mnemonic, format!("{}, {}", Register(self.rs), self.simm()))
            }
            Opcode::J => ("j", format!("0x{:08x}", self.real_address(pc))),
            Opcode::Jal => ("jal", format!("0x{:08x}", self.real_address(pc))),
            Opcode::Beq | Opcode::Bne => (
                if self.opcode == Opcode::Beq { "beq" } else { "bne" },
                format!(
                    "{}, {}, {}",
                    Register(self.rs),
                    Register(self.rt),
                    self.simm()
                ),
            ),
            Opcode::Blez => ("blez", format!("{}, {}", Register(self.rs), self.simm())),
            Opcode::Bgtz => ("bgtz", format!("{}, {}", Register(self.rs), self.simm())),
            Opcode::Addi => ("addi", self.arith_operands()),
            Opcode::Addiu => ("addiu", self.arith_operands()),
            Opcode::Slti => ("slti", self.arith_operands()),
            Opcode::Sltiu => ("sltiu", self.arith_operands()),
            Opcode::Andi => ("andi", self.logic_operands()),
            Opcode::Ori => ("ori", self.logic_operands()),
            Opcode::Xori => ("xori", self.logic_operands()),
            Opcode::Lui => ("lui", format!("{}, 0x{:x}", Register(self.rt), self.imm)),
            Opcode::Mtc0 => (
                "mtc0",
                format!("{}, ${}", Register(self.rt), (self.imm >> 11) & 0x1f),
            ),
            Opcode::Lb => ("lb", self.mem_operands()),
            Opcode::Lh => ("lh", self.mem_operands()),
            Opcode::Lw => ("lw", self.mem_operands()),
            Opcode::Lbu => ("lbu", self.mem_operands()),
            Opcode::Lhu => ("lhu", self.mem_operands()),
            Opcode::Sb => ("sb", self.mem_operands()),
            Opcode::Sh => ("sh", self.mem_operands()),
            Opcode::Sw => ("sw", self.mem_operands()),
        };

        if operands.is_empty() {
            mnemonic.to_string()
        } else {
            format!("{:<7} {}", mnemonic, operands)
        }
    }

    fn stringify_special(&self) -> (&'static str, String) {
        let rrr = || {
            format!(
                "{}, {}, {}",
                Register(self.rd),
                Register(self.rs),
                Register(self.rt)
            )
        };
        let hilo_pair = || format!("{}, {}", Register(self.rs), Register(self.rt));
        let shift_imm = |mnemonic| {
            (
                mnemonic,
                format!(
                    "{}, {}, {}",
                    Register(self.rd),
                    Register(self.rt),
                    self.shamt
                ),
            )
        };
        let shift_var = |mnemonic| {
            (
                mnemonic,
                format!(
                    "{}, {}, {}",
                    Register(self.rd),
                    Register(self.rt),
                    Register(self.rs)
                ),
            )
        };

        match self.funct {
            Funct::Sll => {
                if self.rd == 0 && self.rt == 0 && self.shamt == 0 {
                    ("nop", String::new())
                } else {
                    shift_imm("sll")
                }
            }
            Funct::Srl => shift_imm("srl"),
            Funct::Sra => shift_imm("sra"),
            Funct::Sllv => shift_var("sllv"),
            Funct::Srlv => shift_var("srlv"),
            Funct::Srav => shift_var("srav"),
            Funct::Jr => ("jr", format!("{}", Register(self.rs))),
            Funct::Jalr => (
                "jalr",
                format!("{}, {}", Register(self.rd), Register(self.rs)),
            ),
            Funct::Syscall => ("syscall", String::new()),
            Funct::Mfhi => ("mfhi", format!("{}", Register(self.rd))),
            Funct::Mthi => ("mthi", format!("{}", Register(self.rs))),
            Funct::Mflo => ("mflo", format!("{}", Register(self.rd))),
            Funct::Mtlo => ("mtlo", format!("{}", Register(self.rs))),
            Funct::Mult => ("mult", hilo_pair()),
            Funct::Multu => ("multu", hilo_pair()),
            Funct::Div => ("div", hilo_pair()),
            Funct::Divu => ("divu", hilo_pair()),
            Funct::Add => ("add", rrr()),
            Funct::Addu => ("addu", rrr()),
            Funct::Sub => ("sub", rrr()),
            Funct::Subu => ("subu", rrr()),
            Funct::And => ("and", rrr()),
            Funct::Or => ("or", rrr()),
            Funct::Xor => ("xor", rrr()),
            Funct::Nor => ("nor", rrr()),
            Funct::Slt => ("slt", rrr()),
            Funct::Sltu => ("sltu", rrr()),
        }
    }

    fn arith_operands(&self) -> String {
        format!("{}, {}, {}", Register(self.rt), Register(self.rs), self.simm())
    }

    fn logic_operands(&self) -> String {
        format!("{}, {}, 0x{:x}", Register(self.rt), Register(self.rs), self.imm)
    }

    fn mem_operands(&self) -> String {
        format!("{}, {}({})", Register(self.rt), self.simm(), Register(self.rs))
    }

    /// Disassemble a big-endian code buffer loaded at `base`, one
    /// instruction per line
    pub fn disassemble<W: io::Write>(
        data: &[u8],
        base: u32,
        out: &mut W,
    ) -> Result<(), DisassembleError> {
        let mut chunks = data.chunks_exact(4);
        let mut addr = base;

        for chunk in &mut chunks {
            let op = Op::decode(BigEndian::read_u32(chunk))?;
            writeln!(out, "{:08x}  {}", addr, op.stringify(addr))?;
            addr = addr.wrapping_add(4);
        }

        if chunks.remainder().is_empty() {
            Ok(())
        } else {
            Err(DisassembleError::Truncated)
        }
    }
}

#[derive(Debug, Error)]
pub enum DisassembleError {
    #[error(transparent)]
    InvalidOp(#[from] InvalidOpError),
    #[error("trailing bytes after the last full instruction")]
    Truncated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Pretty-print the register using its name
struct Register(u8);

impl Display for Register {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(REGISTER_NAMES[self.0 as usize & 0x1f])
    }
}
