use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

/// Size of an ELF32 file header
pub const ELF_HEADER_SIZE: usize = 52;
/// Size of an ELF32 section header
pub const SECTION_HEADER_SIZE: usize = 40;
/// Size of an ELF32 symbol table entry
pub const SYMBOL_ENTRY_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum ElfParseError {
    #[error("file is too small to be an ELF32 object")]
    TooSmall,
    #[error("bad ELF magic or identification")]
    BadIdent,
    #[error("unsupported ELF version {0}")]
    BadVersion(u32),
    #[error("unexpected ELF header size {0}")]
    BadHeaderSize(u16),
    #[error("unexpected section header size {0}")]
    BadSectionHeaderSize(u16),
    #[error("section table extends past the end of the file")]
    SectionTableOutOfBounds,
    #[error("section {0} extends past the end of the file")]
    SectionOutOfBounds(usize),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataEncoding {
    Lsb,
    Msb,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ObjectType {
    None,
    Rel,
    Exec,
    Dyn,
    Core,
    Other(u16),
}

impl From<u16> for ObjectType {
    fn from(value: u16) -> Self {
        match value {
            0 => ObjectType::None,
            1 => ObjectType::Rel,
            2 => ObjectType::Exec,
            3 => ObjectType::Dyn,
            4 => ObjectType::Core,
            other => ObjectType::Other(other),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MachineType {
    None,
    Sparc,
    I386,
    M68k,
    Mips,
    Ppc,
    Arm,
    X86_64,
    Other(u16),
}

impl From<u16> for MachineType {
    fn from(value: u16) -> Self {
        match value {
            0 => MachineType::None,
            2 => MachineType::Sparc,
            3 => MachineType::I386,
            4 => MachineType::M68k,
            8 => MachineType::Mips,
            20 => MachineType::Ppc,
            40 => MachineType::Arm,
            62 => MachineType::X86_64,
            other => MachineType::Other(other),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SectionType {
    Null,
    ProgBits,
    SymTab,
    StrTab,
    RelA,
    Hash,
    Dynamic,
    Note,
    NoBits,
    Rel,
    ShLib,
    DynSym,
    Other(u32),
}

impl From<u32> for SectionType {
    fn from(value: u32) -> Self {
        match value {
            0 => SectionType::Null,
            1 => SectionType::ProgBits,
            2 => SectionType::SymTab,
            3 => SectionType::StrTab,
            4 => SectionType::RelA,
            5 => SectionType::Hash,
            6 => SectionType::Dynamic,
            7 => SectionType::Note,
            8 => SectionType::NoBits,
            9 => SectionType::Rel,
            10 => SectionType::ShLib,
            11 => SectionType::DynSym,
            other => SectionType::Other(other),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SymbolType {
    NoType,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
    Other(u8),
}

impl From<u8> for SymbolType {
    fn from(value: u8) -> Self {
        match value {
            0 => SymbolType::NoType,
            1 => SymbolType::Object,
            2 => SymbolType::Func,
            3 => SymbolType::Section,
            4 => SymbolType::File,
            5 => SymbolType::Common,
            6 => SymbolType::Tls,
            other => SymbolType::Other(other),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelType {
    MipsNone,
    Mips16,
    Mips32,
    MipsRel32,
    Mips26,
    MipsHi16,
    MipsLo16,
    MipsGpRel16,
    MipsLiteral,
    MipsGot16,
    MipsPc16,
    MipsCall16,
    MipsGpRel32,
    Other(u8),
}

impl From<u8> for RelType {
    fn from(value: u8) -> Self {
        match value {
            0 => RelType::MipsNone,
            1 => RelType::Mips16,
            2 => RelType::Mips32,
            3 => RelType::MipsRel32,
            4 => RelType::Mips26,
            5 => RelType::MipsHi16,
            6 => RelType::MipsLo16,
            7 => RelType::MipsGpRel16,
            8 => RelType::MipsLiteral,
            9 => RelType::MipsGot16,
            10 => RelType::MipsPc16,
            11 => RelType::MipsCall16,
            12 => RelType::MipsGpRel32,
            other => RelType::Other(other),
        }
    }
}

/// One entry of a `.symtab` section
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub size: u32,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
}

impl Symbol {
    pub fn is_local(&self) -> bool {
        self.info >> 4 == 0
    }

    pub fn is_global(&self) -> bool {
        self.info >> 4 == 1
    }

    pub fn is_weak(&self) -> bool {
        self.info >> 4 == 2
    }

    pub fn is_visible(&self) -> bool {
        self.other & 0x3 == 0
    }

    pub fn symbol_type(&self) -> SymbolType {
        SymbolType::from(self.info & 0x0f)
    }
}

/// One entry of a relocation section (`Rel` entries have no addend)
#[derive(Copy, Clone, Debug)]
pub struct RelEntry {
    pub offset: u32,
    pub info: u32,
    pub addend: i32,
}

impl RelEntry {
    /// Index of the symbol this relocation refers to
    pub fn sym(&self) -> u32 {
        self.info >> 8
    }

    pub fn rel_type(&self) -> RelType {
        RelType::from(self.info as u8)
    }
}

#[derive(Clone, Debug)]
pub struct Section {
    pub name_index: u32,
    pub name: String,
    pub section_type: SectionType,
    pub flags: u32,
    pub addr: u32,
    pub offset: u32,
    pub size: u32,
    pub link: u32,
    pub info: u32,
    pub addralign: u32,
    pub entsize: u32,
    /// Eagerly parsed for `SymTab` sections
    pub symbols: Vec<Symbol>,
    /// Eagerly parsed for `Rel` and `RelA` sections
    pub relocations: Vec<RelEntry>,
}

/// A parsed ELF32 object. Section payloads stay in the caller's byte
/// buffer; `section_data` hands out bounds-checked slices of it.
#[derive(Debug)]
pub struct Elf32Object {
    pub encoding: DataEncoding,
    pub object_type: ObjectType,
    pub machine: MachineType,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub shoff: u32,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
    pub sections: Vec<Section>,
}

impl Elf32Object {
    /// Parse the byte buffer as an ELF32 object
    pub fn parse(data: &[u8]) -> Result<Self, ElfParseError> {
        if data.len() < ELF_HEADER_SIZE {
            return Err(ElfParseError::TooSmall);
        }
        if data[0..4] != [0x7f, b'E', b'L', b'F'] || data[4] != 1 {
            return Err(ElfParseError::BadIdent);
        }
        if data[6] != 1 || data[7..16].iter().any(|byte| *byte != 0) {
            return Err(ElfParseError::BadIdent);
        }

        let encoding = match data[5] {
            1 => DataEncoding::Lsb,
            2 => DataEncoding::Msb,
            _ => return Err(ElfParseError::BadIdent),
        };

        let enc = encoding;
        let mut obj = Elf32Object {
            encoding,
            object_type: ObjectType::from(half(enc, data, 16)),
            machine: MachineType::from(half(enc, data, 18)),
            version: word(enc, data, 20),
            entry: word(enc, data, 24),
            phoff: word(enc, data, 28),
            shoff: word(enc, data, 32),
            flags: word(enc, data, 36),
            ehsize: half(enc, data, 40),
            phentsize: half(enc, data, 42),
            phnum: half(enc, data, 44),
            shentsize: half(enc, data, 46),
            shnum: half(enc, data, 48),
            shstrndx: half(enc, data, 50),
            sections: Vec::new(),
        };

        if obj.version != 1 {
            return Err(ElfParseError::BadVersion(obj.version));
        }
        if obj.ehsize as usize != ELF_HEADER_SIZE {
            return Err(ElfParseError::BadHeaderSize(obj.ehsize));
        }
        if obj.shoff == 0 {
            return Ok(obj);
        }
        if obj.shnum != 0 && (obj.shentsize as usize) < SECTION_HEADER_SIZE {
            return Err(ElfParseError::BadSectionHeaderSize(obj.shentsize));
        }

        let table_end = obj.shoff as u64 + obj.shnum as u64 * obj.shentsize as u64;
        if table_end > data.len() as u64 {
            return Err(ElfParseError::SectionTableOutOfBounds);
        }

        let mut sections = Vec::with_capacity(obj.shnum as usize);
        for i in 0..obj.shnum as usize {
            let offset = obj.shoff as usize + i * obj.shentsize as usize;
            sections.push(parse_section_header(enc, data, offset));
        }

        let shstrtab = table_bounds(&sections, obj.shstrndx as usize);
        for section in sections.iter_mut() {
            section.name = read_str(data, shstrtab, section.name_index as usize);
        }

        for i in 0..sections.len() {
            match sections[i].section_type {
                SectionType::SymTab => {
                    let strtab = table_bounds(&sections, sections[i].link as usize);
                    let symbols = parse_symbols(enc, data, &sections[i], strtab, i)?;
                    sections[i].symbols = symbols;
                }
                SectionType::Rel => {
                    let relocations = parse_relocations(enc, data, &sections[i], false, i)?;
                    sections[i].relocations = relocations;
                }
                SectionType::RelA => {
                    let relocations = parse_relocations(enc, data, &sections[i], true, i)?;
                    sections[i].relocations = relocations;
                }
                _ => {}
            }
        }

        obj.sections = sections;
        Ok(obj)
    }

    /// Index of the first section with the given name
    pub fn index_of_section(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|section| section.name == name)
    }

    /// The payload bytes of a section. `NoBits` sections occupy no file
    /// space and yield an empty slice.
    pub fn section_data<'a>(
        &self,
        data: &'a [u8],
        index: usize,
    ) -> Result<&'a [u8], ElfParseError> {
        let section = &self.sections[index];

        if section.section_type == SectionType::NoBits {
            return Ok(&[]);
        }

        let offset = section.offset as usize;
        let end = offset + section.size as usize;
        if end > data.len() {
            return Err(ElfParseError::SectionOutOfBounds(index));
        }

        Ok(&data[offset..end])
    }
}

fn half(enc: DataEncoding, data: &[u8], offset: usize) -> u16 {
    match enc {
        DataEncoding::Msb => BigEndian::read_u16(&data[offset..offset + 2]),
        DataEncoding::Lsb => LittleEndian::read_u16(&data[offset..offset + 2]),
    }
}

fn word(enc: DataEncoding, data: &[u8], offset: usize) -> u32 {
    match enc {
        DataEncoding::Msb => BigEndian::read_u32(&data[offset..offset + 4]),
        DataEncoding::Lsb => LittleEndian::read_u32(&data[offset..offset + 4]),
    }
}

fn parse_section_header(enc: DataEncoding, data: &[u8], offset: usize) -> Section {
    Section {
        name_index: word(enc, data, offset),
        name: String::new(),
        section_type: SectionType::from(word(enc, data, offset + 4)),
        flags: word(enc, data, offset + 8),
        addr: word(enc, data, offset + 12),
        offset: word(enc, data, offset + 16),
        size: word(enc, data, offset + 20),
        link: word(enc, data, offset + 24),
        info: word(enc, data, offset + 28),
        addralign: word(enc, data, offset + 32),
        entsize: word(enc, data, offset + 36),
        symbols: Vec::new(),
        relocations: Vec::new(),
    }
}

/// File-offset bounds of a string table section, if the index is valid
fn table_bounds(sections: &[Section], index: usize) -> Option<(usize, usize)> {
    if index == 0 || index >= sections.len() {
        return None;
    }

    let section = &sections[index];
    Some((section.offset as usize, section.size as usize))
}

/// Read a NUL-terminated string out of a string table
fn read_str(data: &[u8], table: Option<(usize, usize)>, index: usize) -> String {
    let (offset, size) = match table {
        Some(bounds) => bounds,
        None => return String::new(),
    };

    if index >= size || offset + size > data.len() {
        return String::new();
    }

    let table = &data[offset..offset + size];
    match table[index..].iter().position(|byte| *byte == 0) {
        Some(len) => String::from_utf8_lossy(&table[index..index + len]).into_owned(),
        None => String::new(),
    }
}

fn parse_symbols(
    enc: DataEncoding,
    data: &[u8],
    section: &Section,
    strtab: Option<(usize, usize)>,
    index: usize,
) -> Result<Vec<Symbol>, ElfParseError> {
    if section.offset == 0 || (section.entsize as usize) < SYMBOL_ENTRY_SIZE {
        return Ok(Vec::new());
    }

    let end = section.offset as u64 + section.size as u64;
    if end > data.len() as u64 {
        return Err(ElfParseError::SectionOutOfBounds(index));
    }

    let mut symbols = Vec::new();
    let mut offset = section.offset as usize;
    let table_end = end as usize;
    while offset + SYMBOL_ENTRY_SIZE <= table_end {
        symbols.push(Symbol {
            name: read_str(data, strtab, word(enc, data, offset) as usize),
            value: word(enc, data, offset + 4),
            size: word(enc, data, offset + 8),
            info: data[offset + 12],
            other: data[offset + 13],
            shndx: half(enc, data, offset + 14),
        });
        offset += section.entsize as usize;
    }

    Ok(symbols)
}

fn parse_relocations(
    enc: DataEncoding,
    data: &[u8],
    section: &Section,
    has_addend: bool,
    index: usize,
) -> Result<Vec<RelEntry>, ElfParseError> {
    let entry_size = if has_addend { 12 } else { 8 };
    if section.offset == 0 || (section.entsize as usize) < entry_size {
        return Ok(Vec::new());
    }

    let end = section.offset as u64 + section.size as u64;
    if end > data.len() as u64 {
        return Err(ElfParseError::SectionOutOfBounds(index));
    }

    let mut relocations = Vec::new();
    let mut offset = section.offset as usize;
    let table_end = end as usize;
    while offset + entry_size <= table_end {
        relocations.push(RelEntry {
            offset: word(enc, data, offset),
            info: word(enc, data, offset + 4),
            addend: if has_addend {
                word(enc, data, offset + 8) as i32
            } else {
                0
            },
        });
        offset += section.entsize as usize;
    }

    Ok(relocations)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal object: null section, .text, .shstrtab
    fn build_object(enc: DataEncoding) -> Vec<u8> {
        let mut out = ElfBuilder::new(enc);
        let text = out.add_data(&[0x24, 0x02, 0x00, 0x07]);
        let names = out.add_data(b"\0.text\0.shstrtab\0");
        out.add_section(1, SectionType::ProgBits, text, 4, 0, 0, 0);
        out.add_section(7, SectionType::StrTab, names, 17, 0, 0, 0);
        out.shstrndx = 2;
        out.finish()
    }

    /// Assembles header + payload + section table, in either byte order
    pub struct ElfBuilder {
        enc: DataEncoding,
        payload: Vec<u8>,
        headers: Vec<[u32; 10]>,
        pub shstrndx: u16,
        pub machine: u16,
        pub object_type: u16,
    }

    impl ElfBuilder {
        pub fn new(enc: DataEncoding) -> Self {
            let mut builder = ElfBuilder {
                enc,
                payload: Vec::new(),
                headers: Vec::new(),
                shstrndx: 0,
                machine: 8,
                object_type: 1,
            };
            // Index 0 is the null section
            builder.headers.push([0; 10]);
            builder
        }

        /// Append payload bytes, returning their file offset
        pub fn add_data(&mut self, data: &[u8]) -> u32 {
            let offset = ELF_HEADER_SIZE + self.payload.len();
            self.payload.extend_from_slice(data);
            offset as u32
        }

        #[allow(clippy::too_many_arguments)]
        pub fn add_section(
            &mut self,
            name_index: u32,
            section_type: SectionType,
            offset: u32,
            size: u32,
            link: u32,
            info: u32,
            entsize: u32,
        ) {
            let type_word = match section_type {
                SectionType::ProgBits => 1,
                SectionType::SymTab => 2,
                SectionType::StrTab => 3,
                SectionType::NoBits => 8,
                SectionType::Rel => 9,
                _ => 0,
            };
            self.headers.push([
                name_index, type_word, 0, 0, offset, size, link, info, 0, entsize,
            ]);
        }

        pub fn finish(self) -> Vec<u8> {
            let enc = self.enc;
            let mut out = vec![0u8; ELF_HEADER_SIZE];
            out[0..5].copy_from_slice(&[0x7f, b'E', b'L', b'F', 1]);
            out[5] = match enc {
                DataEncoding::Lsb => 1,
                DataEncoding::Msb => 2,
            };
            out[6] = 1;

            let shoff = ELF_HEADER_SIZE + self.payload.len();
            put_half(enc, &mut out, 16, self.object_type);
            put_half(enc, &mut out, 18, self.machine);
            put_word(enc, &mut out, 20, 1);
            put_word(enc, &mut out, 32, shoff as u32);
            put_half(enc, &mut out, 40, ELF_HEADER_SIZE as u16);
            put_half(enc, &mut out, 46, SECTION_HEADER_SIZE as u16);
            put_half(enc, &mut out, 48, self.headers.len() as u16);
            put_half(enc, &mut out, 50, self.shstrndx);

            out.extend_from_slice(&self.payload);
            for header in &self.headers {
                for field in header {
                    let mut bytes = [0u8; 4];
                    put_word(enc, &mut bytes, 0, *field);
                    out.extend_from_slice(&bytes);
                }
            }

            out
        }
    }

    fn put_half(enc: DataEncoding, data: &mut [u8], offset: usize, value: u16) {
        match enc {
            DataEncoding::Msb => BigEndian::write_u16(&mut data[offset..offset + 2], value),
            DataEncoding::Lsb => LittleEndian::write_u16(&mut data[offset..offset + 2], value),
        }
    }

    fn put_word(enc: DataEncoding, data: &mut [u8], offset: usize, value: u32) {
        match enc {
            DataEncoding::Msb => BigEndian::write_u32(&mut data[offset..offset + 4], value),
            DataEncoding::Lsb => LittleEndian::write_u32(&mut data[offset..offset + 4], value),
        }
    }

    #[test]
    fn parses_both_encodings() {
        for enc in &[DataEncoding::Lsb, DataEncoding::Msb] {
            let data = build_object(*enc);
            let obj = Elf32Object::parse(&data).unwrap();
            assert_eq!(obj.encoding, *enc);
            assert_eq!(obj.machine, MachineType::Mips);
            assert_eq!(obj.object_type, ObjectType::Rel);
            assert_eq!(obj.sections.len(), 3);
            assert_eq!(obj.sections[1].name, ".text");
            assert_eq!(obj.sections[2].name, ".shstrtab");
            assert_eq!(obj.index_of_section(".text"), Some(1));
            assert_eq!(obj.index_of_section(".data"), None);
            assert_eq!(
                obj.section_data(&data, 1).unwrap(),
                &[0x24, 0x02, 0x00, 0x07]
            );
        }
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(matches!(
            Elf32Object::parse(&[0u8; 20]),
            Err(ElfParseError::TooSmall)
        ));

        let mut data = build_object(DataEncoding::Msb);
        data[0] = 0;
        assert!(matches!(
            Elf32Object::parse(&data),
            Err(ElfParseError::BadIdent)
        ));

        // 64-bit class byte
        let mut data = build_object(DataEncoding::Msb);
        data[4] = 2;
        assert!(matches!(
            Elf32Object::parse(&data),
            Err(ElfParseError::BadIdent)
        ));

        let mut data = build_object(DataEncoding::Msb);
        BigEndian::write_u32(&mut data[20..24], 2);
        assert!(matches!(
            Elf32Object::parse(&data),
            Err(ElfParseError::BadVersion(2))
        ));

        let mut data = build_object(DataEncoding::Msb);
        BigEndian::write_u16(&mut data[40..42], 64);
        assert!(matches!(
            Elf32Object::parse(&data),
            Err(ElfParseError::BadHeaderSize(64))
        ));
    }

    #[test]
    fn rejects_truncated_section_table() {
        let mut data = build_object(DataEncoding::Msb);
        let len = data.len();
        data.truncate(len - 8);
        assert!(matches!(
            Elf32Object::parse(&data),
            Err(ElfParseError::SectionTableOutOfBounds)
        ));
    }

    #[test]
    fn parses_symbol_table() {
        let mut out = ElfBuilder::new(DataEncoding::Msb);
        let text = out.add_data(&[0u8; 8]);
        let strtab = out.add_data(b"\0main\0");
        // One null symbol, then `main`: global func, shndx 1
        let mut symtab = vec![0u8; SYMBOL_ENTRY_SIZE];
        let mut entry = [0u8; SYMBOL_ENTRY_SIZE];
        BigEndian::write_u32(&mut entry[0..4], 1); // name index
        BigEndian::write_u32(&mut entry[4..8], 0); // value
        BigEndian::write_u32(&mut entry[8..12], 8); // size
        entry[12] = 0x12; // global, func
        BigEndian::write_u16(&mut entry[14..16], 1);
        symtab.extend_from_slice(&entry);
        let symtab_offset = out.add_data(&symtab);
        let names = out.add_data(b"\0.text\0.strtab\0.symtab\0.shstrtab\0");

        out.add_section(1, SectionType::ProgBits, text, 8, 0, 0, 0);
        out.add_section(7, SectionType::StrTab, strtab, 6, 0, 0, 0);
        out.add_section(
            15,
            SectionType::SymTab,
            symtab_offset,
            32,
            2,
            0,
            SYMBOL_ENTRY_SIZE as u32,
        );
        out.add_section(23, SectionType::StrTab, names, 33, 0, 0, 0);
        out.shstrndx = 4;

        let data = out.finish();
        let obj = Elf32Object::parse(&data).unwrap();
        let symtab = &obj.sections[obj.index_of_section(".symtab").unwrap()];
        assert_eq!(symtab.symbols.len(), 2);

        let main = &symtab.symbols[1];
        assert_eq!(main.name, "main");
        assert_eq!(main.shndx, 1);
        assert_eq!(main.symbol_type(), SymbolType::Func);
        assert!(main.is_global());
        assert!(main.is_visible());
    }

    #[test]
    fn parses_relocation_table() {
        let mut out = ElfBuilder::new(DataEncoding::Msb);
        let text = out.add_data(&[0u8; 8]);
        // GOT16 against symbol 1 at offset 0, LO16 at offset 4
        let mut rel = [0u8; 16];
        BigEndian::write_u32(&mut rel[0..4], 0);
        BigEndian::write_u32(&mut rel[4..8], (1 << 8) | 9);
        BigEndian::write_u32(&mut rel[8..12], 4);
        BigEndian::write_u32(&mut rel[12..16], (1 << 8) | 6);
        let rel_offset = out.add_data(&rel);
        let names = out.add_data(b"\0.text\0.rel.text\0.shstrtab\0");

        out.add_section(1, SectionType::ProgBits, text, 8, 0, 0, 0);
        out.add_section(7, SectionType::Rel, rel_offset, 16, 0, 1, 8);
        out.add_section(17, SectionType::StrTab, names, 27, 0, 0, 0);
        out.shstrndx = 3;

        let data = out.finish();
        let obj = Elf32Object::parse(&data).unwrap();
        let rel = &obj.sections[obj.index_of_section(".rel.text").unwrap()];
        assert_eq!(rel.info, 1);
        assert_eq!(rel.relocations.len(), 2);
        assert_eq!(rel.relocations[0].rel_type(), RelType::MipsGot16);
        assert_eq!(rel.relocations[0].sym(), 1);
        assert_eq!(rel.relocations[1].rel_type(), RelType::MipsLo16);
        assert_eq!(rel.relocations[1].offset, 4);
    }
}
