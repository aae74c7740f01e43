mod cpu;
mod mem;

pub use {cpu::*, mem::*};
