// Register numbers
pub const REG_AT: u8 = 1;
pub const REG_V0: u8 = 2;
/// The global pointer register
pub const REG_GP: u8 = 28;
/// The stack pointer register
pub const REG_SP: u8 = 29;
pub const REG_RA: u8 = 31;

pub static REGISTER_NAMES: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3", "$t0", "$t1", "$t2", "$t3",
    "$t4", "$t5", "$t6", "$t7", "$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7",
    "$t8", "$t9", "$k0", "$k1", "$gp", "$sp", "$fp", "$ra",
];

// Default address map
/// Where the flat code image is loaded and execution starts
pub const DEFAULT_ENTRY: u32 = 0x1000_0000;
/// Base of the work RAM region
pub const DEFAULT_DATA_ADDR: u32 = 0x2000_0000;
/// Size of the work RAM region
pub const DEFAULT_DATA_SIZE: u32 = 0x0400_0000;
/// Reading this address consumes one byte from the input stream
pub const DEFAULT_INPUT_ADDR: u32 = 0x3000_0000;
/// Writing this address emits one byte to the output stream
pub const DEFAULT_OUTPUT_ADDR: u32 = 0x3000_0004;
