//! The compiler driver: C source in, statically linked RV32 executable
//! out.
//!
//! Run with `--help` for more info.

use clap::Parser;

use rvcc::back::{elf::Elf, emit, lower};
use rvcc::front::{libc, parse_into};
use rvcc::middle::{dump, liveness, Store};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: Option<String>,
    /// where to write the executable
    #[arg(short, long, default_value = "a.out")]
    output: String,
    /// print the Phase-1 and Phase-2 IR listings to stdout
    #[arg(long)]
    dump_ir: bool,
    /// compile without the built-in C library prelude
    #[arg(long)]
    no_libc: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let Some(file) = args.file.clone() else {
        eprintln!("Missing source file!");
        eprintln!("Usage: rvcc [-o output] [--dump-ir] [--no-libc] <input.c>");
        std::process::exit(-1);
    };

    if let Err(err) = run(&file, &args) {
        eprintln!("rvcc: {err}");
        std::process::abort();
    }
}

fn run(file: &str, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(file)?;

    let mut store = Store::new();
    if !args.no_libc {
        parse_into(&mut store, libc::PRELUDE)?;
    }
    parse_into(&mut store, &source)?;

    if args.dump_ir {
        print!("{}", dump::dump_ph1(&store));
    }

    liveness::analyze(&mut store)?;
    lower(&mut store)?;

    if args.dump_ir {
        print!("{}", dump::dump_ph2(&store));
    }

    let mut elf = Elf::new();
    emit(&store, &mut elf)?;
    std::fs::write(&args.output, elf.render())?;
    Ok(())
}
