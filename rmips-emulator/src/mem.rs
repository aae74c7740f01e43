use bitflags::bitflags;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum MemoryError {
    #[error("Segmentation fault")]
    Unmapped,
    #[error("Memory not accessible for reading")]
    NotReadable,
    #[error("Memory not accessible for writing")]
    NotWritable,
    #[error("Memory not accessible for executing")]
    NotExecutable,
    #[error("i/o error on memory-mapped port: {0}")]
    Io(String),
}

bitflags! {
    pub struct MapperFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const EXECUTABLE = 1 << 2;
    }
}

/// A range-responder in the memory fabric. The default method bodies
/// refuse the access, so concrete mappers override only what their
/// permission flags allow. Load methods take `&mut self` because the
/// input port consumes its stream.
pub trait Mapper {
    fn responds_to(&self, addr: u32) -> bool;

    fn load_byte(&mut self, addr: u32) -> Result<u8, MemoryError> {
        let _ = addr;
        Err(MemoryError::NotReadable)
    }

    fn load_half(&mut self, addr: u32) -> Result<u16, MemoryError> {
        let _ = addr;
        Err(MemoryError::NotReadable)
    }

    fn load_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        let _ = addr;
        Err(MemoryError::NotReadable)
    }

    fn store_byte(&mut self, addr: u32, value: u8) -> Result<(), MemoryError> {
        let _ = (addr, value);
        Err(MemoryError::NotWritable)
    }

    fn store_half(&mut self, addr: u32, value: u16) -> Result<(), MemoryError> {
        let _ = (addr, value);
        Err(MemoryError::NotWritable)
    }

    fn store_word(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        let _ = (addr, value);
        Err(MemoryError::NotWritable)
    }

    fn load_instruction_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        let _ = addr;
        Err(MemoryError::NotExecutable)
    }
}

/// General-purpose mapper backed by an owned byte buffer. Multi-byte
/// accesses are big-endian and must fit entirely inside the buffer.
pub struct ArrayMapper {
    offset: u32,
    data: Vec<u8>,
    flags: MapperFlags,
}

impl ArrayMapper {
    pub fn new(offset: u32, data: Vec<u8>, flags: MapperFlags) -> Self {
        ArrayMapper {
            offset,
            data,
            flags,
        }
    }

    /// A zero-filled mapper of the given length
    pub fn zeroed(offset: u32, length: u32, flags: MapperFlags) -> Self {
        ArrayMapper::new(offset, vec![0; length as usize], flags)
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn index(&self, addr: u32) -> usize {
        (addr - self.offset) as usize
    }

    fn is_readable(&self) -> bool {
        self.flags.contains(MapperFlags::READABLE)
    }

    fn is_writable(&self) -> bool {
        self.flags.contains(MapperFlags::WRITABLE)
    }

    fn is_executable(&self) -> bool {
        self.flags.contains(MapperFlags::EXECUTABLE)
    }
}

impl Mapper for ArrayMapper {
    fn responds_to(&self, addr: u32) -> bool {
        addr as u64 >= self.offset as u64
            && (addr as u64) < self.offset as u64 + self.data.len() as u64
    }

    fn load_byte(&mut self, addr: u32) -> Result<u8, MemoryError> {
        if !self.is_readable() {
            return Err(MemoryError::NotReadable);
        }
        Ok(self.data[self.index(addr)])
    }

    fn load_half(&mut self, addr: u32) -> Result<u16, MemoryError> {
        if !self.responds_to(addr.wrapping_add(1)) {
            return Err(MemoryError::Unmapped);
        }
        if !self.is_readable() {
            return Err(MemoryError::NotReadable);
        }
        let i = self.index(addr);
        Ok(((self.data[i] as u16) << 8) | self.data[i + 1] as u16)
    }

    fn load_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        if !self.responds_to(addr.wrapping_add(3)) {
            return Err(MemoryError::Unmapped);
        }
        if !self.is_readable() {
            return Err(MemoryError::NotReadable);
        }
        let i = self.index(addr);
        Ok(((self.data[i] as u32) << 24)
            | ((self.data[i + 1] as u32) << 16)
            | ((self.data[i + 2] as u32) << 8)
            | self.data[i + 3] as u32)
    }

    fn store_byte(&mut self, addr: u32, value: u8) -> Result<(), MemoryError> {
        if !self.is_writable() {
            return Err(MemoryError::NotWritable);
        }
        let i = self.index(addr);
        self.data[i] = value;
        Ok(())
    }

    fn store_half(&mut self, addr: u32, value: u16) -> Result<(), MemoryError> {
        if !self.responds_to(addr.wrapping_add(1)) {
            return Err(MemoryError::Unmapped);
        }
        if !self.is_writable() {
            return Err(MemoryError::NotWritable);
        }
        let i = self.index(addr);
        self.data[i] = (value >> 8) as u8;
        self.data[i + 1] = value as u8;
        Ok(())
    }

    fn store_word(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        if !self.responds_to(addr.wrapping_add(3)) {
            return Err(MemoryError::Unmapped);
        }
        if !self.is_writable() {
            return Err(MemoryError::NotWritable);
        }
        let i = self.index(addr);
        self.data[i] = (value >> 24) as u8;
        self.data[i + 1] = (value >> 16) as u8;
        self.data[i + 2] = (value >> 8) as u8;
        self.data[i + 3] = value as u8;
        Ok(())
    }

    fn load_instruction_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        if !self.is_executable() {
            return Err(MemoryError::NotExecutable);
        }
        self.load_word(addr)
    }
}

/// Single-address port pulling bytes from an input stream. Half and
/// word loads return the one byte zero-extended; end of stream yields
/// `0xff`.
pub struct InputMapper {
    offset: u32,
    input: Box<dyn Read>,
}

impl InputMapper {
    pub fn new(offset: u32, input: Box<dyn Read>) -> Self {
        InputMapper { offset, input }
    }
}

impl Mapper for InputMapper {
    fn responds_to(&self, addr: u32) -> bool {
        addr == self.offset
    }

    fn load_byte(&mut self, _addr: u32) -> Result<u8, MemoryError> {
        let mut byte = [0u8; 1];
        match self.input.read(&mut byte) {
            Ok(0) => Ok(0xff),
            Ok(_) => Ok(byte[0]),
            Err(e) => Err(MemoryError::Io(e.to_string())),
        }
    }

    fn load_half(&mut self, addr: u32) -> Result<u16, MemoryError> {
        self.load_byte(addr).map(u16::from)
    }

    fn load_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        self.load_byte(addr).map(u32::from)
    }
}

/// Single-address port pushing the low byte of every store to an
/// output stream
pub struct OutputMapper {
    offset: u32,
    output: Box<dyn Write>,
}

impl OutputMapper {
    pub fn new(offset: u32, output: Box<dyn Write>) -> Self {
        OutputMapper { offset, output }
    }
}

impl Mapper for OutputMapper {
    fn responds_to(&self, addr: u32) -> bool {
        addr == self.offset
    }

    fn store_byte(&mut self, _addr: u32, value: u8) -> Result<(), MemoryError> {
        self.output
            .write_all(&[value])
            .and_then(|_| self.output.flush())
            .map_err(|e| MemoryError::Io(e.to_string()))
    }

    fn store_half(&mut self, addr: u32, value: u16) -> Result<(), MemoryError> {
        self.store_byte(addr, value as u8)
    }

    fn store_word(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.store_byte(addr, value as u8)
    }
}

/// Handle returned by `Ram::add_mapper`, usable to remove the mapper
/// again
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MapperId(u64);

/// An ordered chain of mappers. The most recently installed mapper
/// that responds to an address services the access; overlapping
/// mappers shadow older ones.
#[derive(Default)]
pub struct Ram {
    mappers: Vec<(MapperId, Box<dyn Mapper>)>,
    next_id: u64,
}

impl Ram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mapper(&mut self, mapper: Box<dyn Mapper>) -> MapperId {
        let id = MapperId(self.next_id);
        self.next_id += 1;
        self.mappers.push((id, mapper));
        id
    }

    pub fn remove_mapper(&mut self, id: MapperId) -> Option<Box<dyn Mapper>> {
        let index = self.mappers.iter().position(|(mapper_id, _)| *mapper_id == id)?;
        Some(self.mappers.remove(index).1)
    }

    pub fn remove_all_mappers(&mut self) {
        self.mappers.clear();
    }

    fn find(&mut self, addr: u32) -> Result<&mut dyn Mapper, MemoryError> {
        for (_, mapper) in self.mappers.iter_mut().rev() {
            if mapper.responds_to(addr) {
                return Ok(mapper.as_mut());
            }
        }

        Err(MemoryError::Unmapped)
    }

    pub fn load_byte(&mut self, addr: u32) -> Result<u8, MemoryError> {
        self.find(addr)?.load_byte(addr)
    }

    pub fn load_half(&mut self, addr: u32) -> Result<u16, MemoryError> {
        self.find(addr)?.load_half(addr)
    }

    pub fn load_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        self.find(addr)?.load_word(addr)
    }

    pub fn store_byte(&mut self, addr: u32, value: u8) -> Result<(), MemoryError> {
        self.find(addr)?.store_byte(addr, value)
    }

    pub fn store_half(&mut self, addr: u32, value: u16) -> Result<(), MemoryError> {
        self.find(addr)?.store_half(addr, value)
    }

    pub fn store_word(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.find(addr)?.store_word(addr, value)
    }

    pub fn load_instruction_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        self.find(addr)?.load_instruction_word(addr)
    }
}

impl Debug for Ram {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Ram({} mappers)", self.mappers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn work_ram(offset: u32, length: u32) -> Box<ArrayMapper> {
        Box::new(ArrayMapper::zeroed(
            offset,
            length,
            MapperFlags::READABLE | MapperFlags::WRITABLE,
        ))
    }

    #[test]
    fn stores_words_big_endian() {
        let mut ram = Ram::new();
        ram.add_mapper(work_ram(0x100, 16));

        ram.store_word(0x104, 0x0102_0304).unwrap();
        assert_eq!(ram.load_byte(0x104).unwrap(), 0x01);
        assert_eq!(ram.load_byte(0x105).unwrap(), 0x02);
        assert_eq!(ram.load_byte(0x106).unwrap(), 0x03);
        assert_eq!(ram.load_byte(0x107).unwrap(), 0x04);
        assert_eq!(ram.load_half(0x104).unwrap(), 0x0102);
        assert_eq!(ram.load_word(0x104).unwrap(), 0x0102_0304);
    }

    #[test]
    fn newer_mappers_shadow_older_ones() {
        let mut ram = Ram::new();
        ram.add_mapper(work_ram(0x100, 16));
        ram.store_byte(0x100, 0xaa).unwrap();

        let shadow = ram.add_mapper(work_ram(0x100, 16));
        ram.store_byte(0x100, 0xbb).unwrap();
        assert_eq!(ram.load_byte(0x100).unwrap(), 0xbb);

        // Removing the newer mapper restores the older one
        ram.remove_mapper(shadow).unwrap();
        assert_eq!(ram.load_byte(0x100).unwrap(), 0xaa);
    }

    #[test]
    fn unmatched_access_is_a_segmentation_fault() {
        let mut ram = Ram::new();
        ram.add_mapper(work_ram(0x100, 16));

        assert_eq!(ram.load_byte(0x200), Err(MemoryError::Unmapped));
        assert_eq!(ram.store_word(0xff, 0), Err(MemoryError::Unmapped));
    }

    #[test]
    fn accesses_must_not_cross_the_mapper_end() {
        let mut ram = Ram::new();
        ram.add_mapper(work_ram(0x100, 4));

        assert_eq!(ram.load_byte(0x103).unwrap(), 0);
        assert_eq!(ram.load_half(0x103), Err(MemoryError::Unmapped));
        assert_eq!(ram.load_word(0x101), Err(MemoryError::Unmapped));
        assert_eq!(ram.store_word(0x102, 0), Err(MemoryError::Unmapped));
    }

    #[test]
    fn permission_flags_gate_accesses() {
        let mut ram = Ram::new();
        ram.add_mapper(Box::new(ArrayMapper::zeroed(
            0x100,
            16,
            MapperFlags::READABLE,
        )));
        ram.add_mapper(Box::new(ArrayMapper::zeroed(
            0x200,
            16,
            MapperFlags::WRITABLE,
        )));

        assert_eq!(ram.store_byte(0x100, 1), Err(MemoryError::NotWritable));
        assert_eq!(ram.load_byte(0x200), Err(MemoryError::NotReadable));
        assert_eq!(
            ram.load_instruction_word(0x100),
            Err(MemoryError::NotExecutable)
        );
    }

    #[test]
    fn instruction_fetch_requires_executable() {
        let mut ram = Ram::new();
        ram.add_mapper(Box::new(ArrayMapper::new(
            0x100,
            vec![0x24, 0x02, 0x00, 0x07],
            MapperFlags::READABLE | MapperFlags::EXECUTABLE,
        )));

        assert_eq!(ram.load_instruction_word(0x100).unwrap(), 0x2402_0007);
        assert_eq!(ram.store_byte(0x100, 0), Err(MemoryError::NotWritable));
    }

    #[test]
    fn input_port_pulls_one_byte_per_load() {
        let mut ram = Ram::new();
        ram.add_mapper(Box::new(InputMapper::new(
            0x3000_0000,
            Box::new(Cursor::new(vec![0x41, 0x42])),
        )));

        // Any access size consumes exactly one byte, zero-extended
        assert_eq!(ram.load_word(0x3000_0000).unwrap(), 0x41);
        assert_eq!(ram.load_byte(0x3000_0000).unwrap(), 0x42);
        // End of stream
        assert_eq!(ram.load_byte(0x3000_0000).unwrap(), 0xff);
        // The port responds to exactly one address
        assert_eq!(ram.load_byte(0x3000_0001), Err(MemoryError::Unmapped));
    }

    #[test]
    fn output_port_pushes_the_low_byte() {
        let sink = SharedSink::default();
        let mut ram = Ram::new();
        ram.add_mapper(Box::new(OutputMapper::new(
            0x3000_0004,
            Box::new(sink.clone()),
        )));

        ram.store_word(0x3000_0004, 0x1234_5678).unwrap();
        ram.store_half(0x3000_0004, 0x4142).unwrap();
        ram.store_byte(0x3000_0004, 0x0a).unwrap();
        assert_eq!(*sink.0.borrow(), vec![0x78, 0x42, 0x0a]);

        // Loads are refused
        assert_eq!(ram.load_byte(0x3000_0004), Err(MemoryError::NotReadable));
    }
}
