use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use act_core::{Processor, RomImage};

#[derive(Parser, Debug)]
#[command(
    name = "act-run",
    about = "Run a calculator ROM image on the ACT processor core."
)]
struct Args {
    /// ROM image: octal text or raw little-endian 16-bit words.
    rom: PathBuf,

    /// Number of ROM banks in the image.
    #[arg(long, default_value_t = 1)]
    banks: usize,

    /// Number of data registers (the model's memory size).
    #[arg(long, default_value_t = 16)]
    memory: usize,

    /// Number of instructions to execute.
    #[arg(long, default_value_t = 20_000)]
    steps: u64,

    /// Trace execution.
    #[arg(short, long)]
    trace: bool,

    /// Print the processor state after every instruction.
    #[arg(short, long)]
    step: bool,

    /// Stop when the program counter reaches this octal address.
    #[arg(short = 'b', long, value_name = "ADDR", value_parser = parse_octal)]
    breakpoint: Option<u16>,

    /// Print the final state as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_octal(raw: &str) -> Result<u16, String> {
    u16::from_str_radix(raw, 8).map_err(|_| format!("not an octal address -- '{raw}'"))
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let rom = Arc::new(RomImage::from_file(&args.rom, args.banks)?);
    let mut processor = Processor::new(rom, args.memory);
    processor.set_trace(args.trace);

    let mut executed = 0u64;
    while executed < args.steps {
        if let Some(addr) = args.breakpoint {
            if processor.pc == addr {
                eprintln!("breakpoint at {:01o}-{:04o}", processor.rom_bank, addr);
                break;
            }
        }
        processor.tick()?;
        executed += 1;
        if args.step {
            println!("{}", processor.summary());
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&processor.summary())?);
    } else if !args.step {
        println!("{}", processor.summary());
    }
    Ok(())
}
