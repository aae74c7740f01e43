use crate::linker::Linker;
use env_logger::Env;
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use structopt::clap::ErrorKind;
use structopt::StructOpt;

mod linker;

#[derive(StructOpt)]
#[structopt(name = "rmips-linker")]
struct CliArgs {
    /// Output file name
    #[structopt(
        short = "o",
        long = "output",
        parse(from_os_str),
        default_value = "a.out"
    )]
    output_file: PathBuf,

    /// Start address
    #[structopt(
        short = "e",
        long = "entry",
        parse(try_from_str = parse_address),
        default_value = "0x10000000"
    )]
    entry: u32,

    /// Address of the .data region
    #[structopt(
        long = "Tdata",
        parse(try_from_str = parse_address),
        default_value = "0x20000000"
    )]
    tdata: u32,

    /// Size of the .data region
    #[structopt(
        long = "Sdata",
        parse(try_from_str = parse_address),
        default_value = "0x4000000"
    )]
    sdata: u32,

    /// Print a disassembly of the input instead of linking (ignores -o)
    #[structopt(short = "d", long = "disassemble")]
    disassemble: bool,

    /// Input object file
    #[structopt(parse(from_os_str), required = true)]
    object_files: Vec<PathBuf>,
}

/// strtoul-style number parsing: 0x-prefixed hex, 0-prefixed octal,
/// decimal otherwise
fn parse_address(input: &str) -> Result<u32, std::num::ParseIntError> {
    let input = input.trim();
    if let Some(hex) = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if input.len() > 1 && input.starts_with('0') {
        u32::from_str_radix(&input[1..], 8)
    } else {
        input.parse()
    }
}

fn main() {
    // Setup logging and parse CLI args
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    let args = match CliArgs::from_iter_safe(std::env::args()) {
        Ok(args) => args,
        Err(e) => match e.kind {
            ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => {
                println!("{}", e.message);
                return;
            }
            _ => {
                eprintln!("{}", e.message);
                process::exit(2);
            }
        },
    };

    if args.entry == 0 {
        eprintln!("error: start address cannot be 0");
        process::exit(2);
    }
    if args.tdata == 0 {
        eprintln!("error: address of .data section cannot be 0");
        process::exit(2);
    }
    if args.sdata == 0 {
        eprintln!("error: size of .data section cannot be 0");
        process::exit(2);
    }

    let linker = Linker::new(args.object_files, args.entry, args.tdata, args.sdata);

    if args.disassemble {
        let stdout = io::stdout();
        if let Err(e) = linker.disassemble(&mut stdout.lock()) {
            eprintln!("error: {}", e);
            process::exit(3);
        }
        return;
    }

    let mut output_file = match File::create(&args.output_file) {
        Ok(file) => file,
        Err(_) => {
            eprintln!("error: could not open output file for writing");
            process::exit(3);
        }
    };

    if let Err(e) = linker.run(&mut output_file) {
        eprintln!("error: {}", e);
        process::exit(3);
    }

    log::info!("Wrote load image to {}", args.output_file.display());
}
