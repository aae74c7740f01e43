use rmips_types::constants::{REG_AT, REG_GP, REG_SP};
use rmips_types::elf::{
    Elf32Object, ElfParseError, MachineType, ObjectType, RelType, SectionType, SymbolType,
};
use rmips_types::io::{read_binary_file, IoError, DEFAULT_MAX_FILE_SIZE};
use rmips_types::op::{DisassembleError, Funct, Op, Opcode, REGIMM_BGEZAL};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("'{path}' is not an ELF32 object file: {source}")]
    NotElf {
        path: String,
        source: ElfParseError,
    },
    #[error("unsupported machine type in ELF object file '{path}'")]
    WrongMachine { path: String },
    #[error("unsupported ELF object type in file '{path}'")]
    WrongType { path: String },
    #[error("object file '{path}' does not contain any code")]
    MissingText { path: String },
    #[error("object file '{path}' does not contain a symbol table")]
    MissingSymtab { path: String },
    #[error("code relocation table of object file '{path}' does not point to the correct symbol table")]
    RelSymtabMismatch { path: String },
    #[error("object file '{path}' does not contain a \"main\" symbol")]
    MissingMain { path: String },
    #[error("\"main\" symbol in object file '{path}' must be a function or point to the first instruction")]
    BadMainSymbol { path: String },
    #[error("\"main\" symbol in object file '{path}' does not reference a code section")]
    BadMainSection { path: String },
    #[error(".data section of object file '{path}' does not fit the reserved data region")]
    DataTooLarge { path: String },
    #[error(".data section of object file '{path}' contains non-zero data (initialized data is not supported)")]
    DataNotZero { path: String },
    #[error("unsupported relocation in object file '{path}'")]
    UnsupportedRelocation { path: String },
    #[error("unsupported relocation target in object file '{path}'")]
    UnsupportedRelocationTarget { path: String },
    #[error("relocation in object file '{path}' is out of bounds")]
    RelocationOutOfBounds { path: String },
    #[error("no input files")]
    NoInput,
    #[error("currently only a single input file is supported")]
    MultipleInputs,
    #[error(transparent)]
    Disassemble(#[from] DisassembleError),
    #[error("could not write output file: {0}")]
    Write(std::io::Error),
}

/// Everything extracted from a validated input object: the (patched)
/// text bytes and the two facts that shape the prologue
struct Analysis {
    text: Vec<u8>,
    has_data: bool,
    main_is_function: bool,
}

/// Turns a single relocatable ELF32/MIPS object into a flat big-endian
/// code image: an optional GP/stack prologue followed by the patched
/// `.text` bytes.
pub struct Linker {
    input: Vec<PathBuf>,
    entry: u32,
    tdata: u32,
    sdata: u32,
}

impl Linker {
    pub fn new(input: Vec<PathBuf>, entry: u32, tdata: u32, sdata: u32) -> Self {
        Linker {
            input,
            entry,
            tdata,
            sdata,
        }
    }

    /// Link the input object and write the flat image
    pub fn run<W: Write>(&self, out: &mut W) -> Result<(), LinkError> {
        let path = self.single_input()?;
        let data = read_binary_file(path, DEFAULT_MAX_FILE_SIZE)?;
        let analysis = self.analyze(path, &data)?;

        let prologue = self.prologue(analysis.has_data, analysis.main_is_function);
        log::info!(
            "Linking {}: {} prologue bytes, {} text bytes",
            path.display(),
            prologue.len() * 4,
            analysis.text.len()
        );

        for op in &prologue {
            out.write_all(&op.encode().to_be_bytes())
                .map_err(LinkError::Write)?;
        }
        out.write_all(&analysis.text).map_err(LinkError::Write)?;

        Ok(())
    }

    /// Print the input's name and a disassembly of its text section
    pub fn disassemble<W: Write>(&self, out: &mut W) -> Result<(), LinkError> {
        let path = self.single_input()?;
        let data = read_binary_file(path, DEFAULT_MAX_FILE_SIZE)?;
        let analysis = self.analyze(path, &data)?;

        writeln!(out, "{}:", path.display()).map_err(LinkError::Write)?;
        Op::disassemble(&analysis.text, self.entry, out)?;

        Ok(())
    }

    fn single_input(&self) -> Result<&Path, LinkError> {
        match self.input.as_slice() {
            [] => Err(LinkError::NoInput),
            [path] => Ok(path),
            _ => Err(LinkError::MultipleInputs),
        }
    }

    /// Validation cascade: ELF32, MIPS, relocatable, `.text` and
    /// `.symtab` present, a usable `main` symbol, an all-zero `.data`
    /// that fits the reserved region, and only GOT16+LO16 pairs in the
    /// relocation table.
    fn analyze(&self, path: &Path, data: &[u8]) -> Result<Analysis, LinkError> {
        let display = || path.display().to_string();

        let obj = Elf32Object::parse(data).map_err(|source| LinkError::NotElf {
            path: display(),
            source,
        })?;

        if obj.machine != MachineType::Mips {
            return Err(LinkError::WrongMachine { path: display() });
        }
        if obj.object_type != ObjectType::Rel {
            return Err(LinkError::WrongType { path: display() });
        }

        if obj.index_of_section(".text").is_none() {
            return Err(LinkError::MissingText { path: display() });
        }
        let symtab_index = obj
            .index_of_section(".symtab")
            .ok_or_else(|| LinkError::MissingSymtab { path: display() })?;

        let main = obj.sections[symtab_index]
            .symbols
            .iter()
            .find(|symbol| symbol.name == "main")
            .ok_or_else(|| LinkError::MissingMain { path: display() })?;
        let main_is_function = main.symbol_type() == SymbolType::Func;
        if main.value != 0 && !main_is_function {
            return Err(LinkError::BadMainSymbol { path: display() });
        }

        let text_index = main.shndx as usize;
        if text_index >= obj.sections.len()
            || obj.sections[text_index].section_type != SectionType::ProgBits
        {
            return Err(LinkError::BadMainSection { path: display() });
        }
        let mut text = obj
            .section_data(data, text_index)
            .map_err(|source| LinkError::NotElf {
                path: display(),
                source,
            })?
            .to_vec();

        // One word at the top of the data region is reserved for the
        // GOT slot
        let data_index = match obj.index_of_section(".data") {
            Some(index) if obj.sections[index].size > 0 => {
                let section = &obj.sections[index];
                if section.size as u64 + 4 > self.sdata as u64 {
                    return Err(LinkError::DataTooLarge { path: display() });
                }
                let contents =
                    obj.section_data(data, index)
                        .map_err(|source| LinkError::NotElf {
                            path: display(),
                            source,
                        })?;
                if contents.iter().any(|byte| *byte != 0) {
                    return Err(LinkError::DataNotZero { path: display() });
                }
                Some(index)
            }
            _ => None,
        };

        let rel_index = obj
            .sections
            .iter()
            .position(|section| {
                section.section_type == SectionType::Rel && section.info as usize == text_index
            });
        if let Some(rel_index) = rel_index {
            if obj.sections[rel_index].link as usize != symtab_index {
                return Err(LinkError::RelSymtabMismatch { path: display() });
            }
            self.apply_relocations(path, &obj, rel_index, symtab_index, data_index, &mut text)?;
        }

        Ok(Analysis {
            text,
            has_data: data_index.is_some(),
            main_is_function,
        })
    }

    /// Resolve the supported relocations: `MIPS_GOT16` immediately
    /// followed by `MIPS_LO16` on the same `.data` section symbol. The
    /// GOT holds exactly one entry at offset 0 from `gp`, so the GOT16
    /// immediate becomes 0; the LO16 half already holds the offset
    /// within `.data` and stays untouched.
    fn apply_relocations(
        &self,
        path: &Path,
        obj: &Elf32Object,
        rel_index: usize,
        symtab_index: usize,
        data_index: Option<usize>,
        text: &mut [u8],
    ) -> Result<(), LinkError> {
        let display = || path.display().to_string();
        let symbols = &obj.sections[symtab_index].symbols;
        let entries = &obj.sections[rel_index].relocations;

        let mut i = 0;
        while i < entries.len() {
            let got = &entries[i];
            if got.rel_type() != RelType::MipsGot16 {
                return Err(LinkError::UnsupportedRelocation { path: display() });
            }
            let lo = match entries.get(i + 1) {
                Some(lo) if lo.rel_type() == RelType::MipsLo16 && lo.sym() == got.sym() => lo,
                _ => return Err(LinkError::UnsupportedRelocation { path: display() }),
            };

            let symbol = symbols
                .get(got.sym() as usize)
                .ok_or_else(|| LinkError::UnsupportedRelocationTarget { path: display() })?;
            if symbol.symbol_type() != SymbolType::Section
                || data_index != Some(symbol.shndx as usize)
            {
                return Err(LinkError::UnsupportedRelocationTarget { path: display() });
            }

            for &offset in &[got.offset, lo.offset] {
                if offset as u64 + 4 > text.len() as u64 {
                    return Err(LinkError::RelocationOutOfBounds { path: display() });
                }
            }

            let imm = got.offset as usize + 2;
            text[imm] = 0;
            text[imm + 1] = 0;

            // The LO16 partner is consumed as part of the pair
            i += 2;
        }

        Ok(())
    }

    /// The prologue preceding the text: when `.data` is present, six
    /// instructions installing the GOT slot (`gp` points at it, the
    /// `.data` base is its only entry); when `main` is a function, six
    /// more setting up `sp`, calling the text via the `bgezal` link
    /// side effect and halting on return by jumping to address 0.
    fn prologue(&self, has_data: bool, main_is_function: bool) -> Vec<Op> {
        let mut ops = Vec::new();

        if has_data {
            let got = self.tdata.wrapping_add(self.sdata).wrapping_sub(4);
            ops.push(Op::immediate(Opcode::Lui, 0, REG_GP, (got >> 16) as u16));
            ops.push(Op::immediate(Opcode::Ori, REG_GP, REG_GP, got as u16));
            ops.push(Op::immediate(Opcode::Lui, 0, REG_AT, (self.tdata >> 16) as u16));
            ops.push(Op::immediate(Opcode::Ori, REG_AT, REG_AT, self.tdata as u16));
            ops.push(Op::immediate(Opcode::Sw, REG_GP, REG_AT, 0));
            ops.push(Op::special(Funct::Or, 0, 0, REG_AT, 0));
        }

        if main_is_function {
            let sp = self.tdata.wrapping_add(self.sdata).wrapping_sub(8);
            ops.push(Op::immediate(Opcode::Lui, 0, REG_SP, (sp >> 16) as u16));
            ops.push(Op::immediate(Opcode::Ori, REG_SP, REG_SP, sp as u16));
            // Call the first text instruction; the branch lands right
            // past the trailing nop
            ops.push(Op::regimm(REGIMM_BGEZAL, 0, 3));
            ops.push(Op::nop());
            ops.push(Op::special(Funct::Jr, 0, 0, 0, 0));
            ops.push(Op::nop());
        }

        ops
    }
}
