use rmips_emulator::{ArrayMapper, Cpu, CpuException, InputMapper, MapperFlags, OutputMapper};
use rmips_types::constants::{
    DEFAULT_DATA_ADDR, DEFAULT_DATA_SIZE, DEFAULT_ENTRY, DEFAULT_INPUT_ADDR, DEFAULT_OUTPUT_ADDR,
};
use rmips_types::io::{read_binary_file, DEFAULT_MAX_FILE_SIZE};
use rmips_types::op::Op;
use std::io;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

#[derive(StructOpt)]
struct CliArgs {
    /// Print a disassembly of the image instead of executing it
    #[structopt(short = "d", long = "disassemble")]
    disassemble: bool,

    /// Flat big-endian code image, loaded at the ROM base
    #[structopt(parse(from_os_str))]
    file_path: PathBuf,
}

fn main() {
    env_logger::init();
    let args = CliArgs::from_args();

    let image = match read_binary_file(&args.file_path, DEFAULT_MAX_FILE_SIZE) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(-21);
        }
    };

    if args.disassemble {
        let stdout = io::stdout();
        if let Err(e) = Op::disassemble(&image, DEFAULT_ENTRY, &mut stdout.lock()) {
            eprintln!("error: {}", e);
            process::exit(-12);
        }
        return;
    }

    log::info!("Loaded {} bytes of code at 0x{:08x}", image.len(), DEFAULT_ENTRY);

    let mut cpu = Cpu::new(DEFAULT_ENTRY);
    cpu.ram.add_mapper(Box::new(ArrayMapper::new(
        DEFAULT_ENTRY,
        image,
        MapperFlags::READABLE | MapperFlags::EXECUTABLE,
    )));
    cpu.ram.add_mapper(Box::new(InputMapper::new(
        DEFAULT_INPUT_ADDR,
        Box::new(io::stdin()),
    )));
    cpu.ram.add_mapper(Box::new(OutputMapper::new(
        DEFAULT_OUTPUT_ADDR,
        Box::new(io::stdout()),
    )));
    cpu.ram.add_mapper(Box::new(ArrayMapper::zeroed(
        DEFAULT_DATA_ADDR,
        DEFAULT_DATA_SIZE,
        MapperFlags::READABLE | MapperFlags::WRITABLE,
    )));

    match cpu.run() {
        Ok(()) => process::exit((cpu.r[2] & 0xff) as i32),
        Err(e) => {
            eprintln!("error: {}", e);
            let code = match e {
                CpuException::Arithmetic { .. } => -10,
                CpuException::Memory { .. } => -11,
                CpuException::InvalidOp { .. } => -12,
                CpuException::Halt { .. } | CpuException::MisalignedPc { .. } => -20,
            };
            process::exit(code);
        }
    }
}
