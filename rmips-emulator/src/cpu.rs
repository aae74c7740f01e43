use crate::mem::{MemoryError, Ram};
use rmips_types::op::{
    Funct, Op, Opcode, REGIMM_BGEZ, REGIMM_BGEZAL, REGIMM_BLTZ, REGIMM_BLTZAL,
};
use thiserror::Error;

/// A fault surfaced at a step boundary. Each variant carries the
/// faulting program counter.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CpuException {
    #[error("program halted")]
    Halt { pc: u32 },
    #[error("misaligned program counter 0x{pc:08x}")]
    MisalignedPc { pc: u32 },
    #[error("invalid instruction at 0x{pc:08x}")]
    InvalidOp { pc: u32 },
    #[error("memory exception at 0x{pc:08x}: {source}")]
    Memory { pc: u32, source: MemoryError },
    #[error("arithmetic exception at 0x{pc:08x}: {message}")]
    Arithmetic { pc: u32, message: &'static str },
}

/// Fault discovered while prefetching, raised at the top of the next
/// cycle so the branch-delay slot of the faulting jump still retires
#[derive(Clone, Debug, Eq, PartialEq)]
enum DelayedException {
    MisalignedPc,
    Halt,
    InvalidOp,
    Memory(MemoryError),
}

/// The load-delay record: populated for exactly one cycle after a load
/// instruction, consumed between execute and zero-register clearing of
/// the following cycle
#[derive(Clone, Debug)]
struct PendingLoad {
    opcode: Opcode,
    target: u8,
    addr: u32,
}

/// A MIPS R3000 integer core stepped one architectural cycle at a
/// time. The register file, pipeline registers and memory fabric are
/// exposed publicly and can be manipulated between steps (with obvious
/// consequences). Jumping to address 0 halts the processor.
#[derive(Debug)]
pub struct Cpu {
    pub r: [u32; 32],
    pub hi: u32,
    pub lo: u32,
    pub pc: u32,
    pub entrypoint: u32,
    pub ram: Ram,
    op: Op,
    next_op: Op,
    pending_load: Option<PendingLoad>,
    delayed: Option<DelayedException>,
}

impl Cpu {
    pub fn new(entrypoint: u32) -> Self {
        Cpu {
            r: [0; 32],
            hi: 0,
            lo: 0,
            pc: entrypoint,
            entrypoint,
            ram: Ram::new(),
            op: Op::nop(),
            next_op: Op::nop(),
            pending_load: None,
            delayed: None,
        }
    }

    /// Reset all registers to zero, set the pc to the entrypoint and
    /// refill the pipeline with nops. Memory contents are untouched.
    pub fn reset(&mut self) {
        self.r = [0; 32];
        self.hi = 0;
        self.lo = 0;
        self.op = Op::nop();
        self.next_op = Op::nop();
        self.pc = self.entrypoint;
        self.pending_load = None;
        self.delayed = None;
    }

    fn reg(&self, index: u8) -> u32 {
        self.r[index as usize]
    }

    /// Signed view of a register
    fn sreg(&self, index: u8) -> i32 {
        self.r[index as usize] as i32
    }

    fn set_reg(&mut self, index: u8, value: u32) {
        self.r[index as usize] = value;
    }

    /// Effective address of the executing load or store
    fn effective_addr(&self) -> u32 {
        self.reg(self.op.rs).wrapping_add(self.op.simm() as i32 as u32)
    }

    /// Branch target relative to the delay slot; the pc has already
    /// been advanced past the delay-slot fetch when this runs
    fn branch(&mut self, taken: bool) {
        if taken {
            let offset = (self.op.simm() as i32) << 2;
            self.pc = self.pc.wrapping_sub(4).wrapping_add(offset as u32);
        }
    }

    /// Perform one CPU cycle: raise a delayed exception, retire the
    /// prefetched instruction, prefetch the next one, execute, retire
    /// the pending load, clear the zero register and schedule a new
    /// pending load.
    pub fn step(&mut self) -> Result<(), CpuException> {
        if let Some(dex) = self.delayed.clone() {
            return Err(match dex {
                DelayedException::MisalignedPc => CpuException::MisalignedPc { pc: self.pc },
                DelayedException::Halt => CpuException::Halt { pc: self.pc },
                DelayedException::InvalidOp => CpuException::InvalidOp { pc: self.pc },
                DelayedException::Memory(source) => CpuException::Memory {
                    pc: self.pc,
                    source,
                },
            });
        }

        // Fetch the next instruction. On a latch the pc stays at the
        // faulting fetch target.
        self.op = self.next_op;
        if self.pc & 0x3 != 0 {
            self.delayed = Some(DelayedException::MisalignedPc);
        } else if self.pc == 0 {
            self.delayed = Some(DelayedException::Halt);
        } else {
            match self.ram.load_instruction_word(self.pc) {
                Ok(word) => match Op::decode(word) {
                    Ok(op) => {
                        self.next_op = op;
                        self.pc = self.pc.wrapping_add(4);
                    }
                    Err(_) => self.delayed = Some(DelayedException::InvalidOp),
                },
                Err(e) => self.delayed = Some(DelayedException::Memory(e)),
            }
        }

        self.execute()?;
        self.retire_pending_load()?;

        // The zero register is architecturally zero
        self.r[0] = 0;

        // Schedule the delay slot of a load executed this cycle
        if self.op.opcode.is_load() {
            self.pending_load = Some(PendingLoad {
                opcode: self.op.opcode,
                target: self.op.rt,
                addr: self.effective_addr(),
            });
        }

        Ok(())
    }

    /// Repeatedly step until the program jumps to address 0
    pub fn run(&mut self) -> Result<(), CpuException> {
        loop {
            match self.step() {
                Ok(()) => {}
                Err(CpuException::Halt { .. }) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn execute(&mut self) -> Result<(), CpuException> {
        let op = self.op;
        // The executing instruction sits two fetches behind the pc
        let epc = self.pc.wrapping_sub(8);

        match op.opcode {
            Opcode::Special => match op.funct {
                Funct::Sll => self.set_reg(op.rd, self.reg(op.rt) << op.shamt),
                Funct::Srl => self.set_reg(op.rd, self.reg(op.rt) >> op.shamt),
                Funct::Sra => self.set_reg(op.rd, (self.sreg(op.rt) >> op.shamt) as u32),
                Funct::Sllv => {
                    self.set_reg(op.rd, self.reg(op.rt) << (self.reg(op.rs) & 0x1f))
                }
                Funct::Srlv => {
                    self.set_reg(op.rd, self.reg(op.rt) >> (self.reg(op.rs) & 0x1f))
                }
                Funct::Srav => self.set_reg(
                    op.rd,
                    (self.sreg(op.rt) >> (self.reg(op.rs) & 0x1f)) as u32,
                ),
                Funct::Jalr => {
                    self.set_reg(op.rd, self.pc);
                    self.pc = self.reg(op.rs);
                }
                Funct::Jr => self.pc = self.reg(op.rs),
                Funct::Syscall => return Err(CpuException::InvalidOp { pc: epc }),
                Funct::Mfhi => self.set_reg(op.rd, self.hi),
                Funct::Mthi => self.hi = self.reg(op.rs),
                Funct::Mflo => self.set_reg(op.rd, self.lo),
                Funct::Mtlo => self.lo = self.reg(op.rs),
                Funct::Mult => {
                    let prod = self.sreg(op.rs) as i64 * self.sreg(op.rt) as i64;
                    self.hi = ((prod as u64) >> 32) as u32;
                    self.lo = prod as u32;
                }
                Funct::Multu => {
                    let prod = self.reg(op.rs) as u64 * self.reg(op.rt) as u64;
                    self.hi = (prod >> 32) as u32;
                    self.lo = prod as u32;
                }
                Funct::Div => {
                    if self.sreg(op.rt) == 0 {
                        return Err(CpuException::Arithmetic {
                            pc: epc,
                            message: "divided by zero",
                        });
                    }
                    self.hi = self.sreg(op.rs).wrapping_rem(self.sreg(op.rt)) as u32;
                    self.lo = self.sreg(op.rs).wrapping_div(self.sreg(op.rt)) as u32;
                }
                Funct::Divu => {
                    if self.reg(op.rt) == 0 {
                        return Err(CpuException::Arithmetic {
                            pc: epc,
                            message: "divided by zero",
                        });
                    }
                    self.hi = self.reg(op.rs) % self.reg(op.rt);
                    self.lo = self.reg(op.rs) / self.reg(op.rt);
                }
                Funct::Add => {
                    self.set_reg(op.rd, self.reg(op.rs).wrapping_add(self.reg(op.rt)))
                }
                Funct::Addu => {
                    self.set_reg(op.rd, self.reg(op.rs).wrapping_add(self.reg(op.rt)))
                }
                Funct::Sub => {
                    self.set_reg(op.rd, self.reg(op.rs).wrapping_sub(self.reg(op.rt)))
                }
                Funct::Subu => {
                    self.set_reg(op.rd, self.reg(op.rs).wrapping_sub(self.reg(op.rt)))
                }
                Funct::And => self.set_reg(op.rd, self.reg(op.rs) & self.reg(op.rt)),
                Funct::Or => self.set_reg(op.rd, self.reg(op.rs) | self.reg(op.rt)),
                Funct::Xor => self.set_reg(op.rd, self.reg(op.rs) ^ self.reg(op.rt)),
                Funct::Nor => self.set_reg(op.rd, !(self.reg(op.rs) | self.reg(op.rt))),
                Funct::Slt => {
                    self.set_reg(op.rd, (self.sreg(op.rs) < self.sreg(op.rt)) as u32)
                }
                Funct::Sltu => {
                    self.set_reg(op.rd, (self.reg(op.rs) < self.reg(op.rt)) as u32)
                }
            },
            Opcode::RegImm => match op.rt {
                REGIMM_BLTZ => self.branch(self.sreg(op.rs) < 0),
                REGIMM_BGEZ => self.branch(self.sreg(op.rs) >= 0),
                // The link register is written whether or not the
                // branch is taken
                REGIMM_BLTZAL => {
                    self.r[31] = self.pc;
                    self.branch(self.sreg(op.rs) < 0);
                }
                REGIMM_BGEZAL => {
                    self.r[31] = self.pc;
                    self.branch(self.sreg(op.rs) >= 0);
                }
                _ => return Err(CpuException::InvalidOp { pc: epc }),
            },
            Opcode::Jal => {
                self.r[31] = self.pc;
                self.pc = (self.pc & 0xf000_0000) | (op.addr << 2);
            }
            Opcode::J => self.pc = (self.pc & 0xf000_0000) | (op.addr << 2),
            Opcode::Beq => self.branch(self.reg(op.rs) == self.reg(op.rt)),
            Opcode::Bne => self.branch(self.reg(op.rs) != self.reg(op.rt)),
            Opcode::Blez => self.branch(self.sreg(op.rs) <= 0),
            Opcode::Bgtz => self.branch(self.sreg(op.rs) > 0),
            Opcode::Addi => self.set_reg(
                op.rt,
                self.sreg(op.rs).wrapping_add(op.simm() as i32) as u32,
            ),
            Opcode::Addiu => {
                self.set_reg(op.rt, self.reg(op.rs).wrapping_add(op.imm as u32))
            }
            Opcode::Slti => {
                self.set_reg(op.rt, (self.sreg(op.rs) < op.simm() as i32) as u32)
            }
            Opcode::Sltiu => self.set_reg(op.rt, (self.reg(op.rs) < op.imm as u32) as u32),
            Opcode::Andi => self.set_reg(op.rt, self.reg(op.rs) & op.imm as u32),
            Opcode::Ori => self.set_reg(op.rt, self.reg(op.rs) | op.imm as u32),
            Opcode::Xori => self.set_reg(op.rt, self.reg(op.rs) ^ op.imm as u32),
            Opcode::Lui => self.set_reg(op.rt, (op.imm as u32) << 16),
            // Coprocessor 0 moves are not modelled
            Opcode::Mtc0 => {}
            // Loads retire through the load-delay record
            Opcode::Lb | Opcode::Lh | Opcode::Lw | Opcode::Lbu | Opcode::Lhu => {}
            Opcode::Sb => {
                let addr = self.effective_addr();
                let value = self.reg(op.rt) as u8;
                self.ram
                    .store_byte(addr, value)
                    .map_err(|source| CpuException::Memory { pc: epc, source })?;
            }
            Opcode::Sh => {
                let addr = self.effective_addr();
                let value = self.reg(op.rt) as u16;
                self.ram
                    .store_half(addr, value)
                    .map_err(|source| CpuException::Memory { pc: epc, source })?;
            }
            Opcode::Sw => {
                let addr = self.effective_addr();
                let value = self.reg(op.rt);
                self.ram
                    .store_word(addr, value)
                    .map_err(|source| CpuException::Memory { pc: epc, source })?;
            }
        }

        Ok(())
    }

    fn retire_pending_load(&mut self) -> Result<(), CpuException> {
        let load = match self.pending_load.take() {
            Some(load) => load,
            None => return Ok(()),
        };
        let epc = self.pc.wrapping_sub(8);
        let memory = |source| CpuException::Memory { pc: epc, source };

        let value = match load.opcode {
            Opcode::Lb => self.ram.load_byte(load.addr).map_err(memory)? as i8 as i32 as u32,
            Opcode::Lh => self.ram.load_half(load.addr).map_err(memory)? as i16 as i32 as u32,
            Opcode::Lw => self.ram.load_word(load.addr).map_err(memory)?,
            Opcode::Lbu => self.ram.load_byte(load.addr).map_err(memory)? as u32,
            Opcode::Lhu => self.ram.load_half(load.addr).map_err(memory)? as u32,
            _ => return Ok(()),
        };
        self.set_reg(load.target, value);

        Ok(())
    }
}
