//! memsim - Main Entry Point
//!
//! Usage: memsim [OPTIONS] <trace_file>
//!
//! The trace file configures one simulated machine and drives it with
//! alloc/free/read/write commands; see `io` for the format.
//!
//! Options:
//!   -v, --verbose  Print page-table and memory dumps after each command
//!   -h, --help     Print help information

use std::env;
use std::process;

use memsim::io::{Command, Trace};
use memsim::vm_manager::VmManager;

/// Command-line configuration
struct Config {
    trace_file: String,
    verbose: bool,
}

fn main() {
    env_logger::init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn print_help(program: &str) {
    eprintln!("memsim - demand-paged virtual memory simulator");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS] <trace_file>", program);
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  trace_file - Commands to run, one per line:");
    eprintln!("               config <ram> <swap> <page> <break>");
    eprintln!("               proc P | alloc P RG SZ | free P RG");
    eprintln!("               write P RG OFF VAL | read P RG OFF");
    eprintln!("               pagetable P | memdump | kill P");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -v, --verbose  Print dumps after every command");
    eprintln!("  -h, --help     Print this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} trace.txt", program);
    eprintln!("  RUST_LOG=debug {} -v trace.txt", program);
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = env::args().collect();
    let program = &args[0];

    let mut verbose = false;
    let mut positional: Vec<&String> = Vec::new();

    for arg in &args[1..] {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help(program);
                process::exit(0);
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}\nUse --help for usage information.", arg));
            }
            _ => {
                positional.push(arg);
            }
        }
    }

    if positional.len() != 1 {
        print_help(program);
        return Err(format!("\nError: Expected 1 argument, got {}", positional.len()));
    }

    Ok(Config {
        trace_file: positional[0].clone(),
        verbose,
    })
}

fn run(config: &Config) -> Result<(), String> {
    let trace = Trace::from_file(&config.trace_file)?;
    let vm = VmManager::new(trace.config.clone());

    for (step, cmd) in trace.commands.iter().enumerate() {
        // A failed command is reported and the trace carries on; the manager
        // never terminates a process on its own.
        if let Err(e) = execute(&vm, cmd) {
            println!("step {}: {:?} failed: {}", step + 1, cmd, e);
            continue;
        }
        if config.verbose {
            print_dumps(&vm, cmd);
        }
    }

    Ok(())
}

fn execute(vm: &VmManager, cmd: &Command) -> memsim::Result<()> {
    match *cmd {
        Command::Register { pid } => vm.register_process(pid),
        Command::Alloc { pid, region, size } => {
            let addr = vm.allocate(pid, 0, region, size)?;
            println!("alloc pid={} region={} size={} -> {:#06x}", pid, region, size, addr);
            Ok(())
        }
        Command::Free { pid, region } => vm.deallocate(pid, region),
        Command::Write { pid, region, offset, value } => {
            vm.write_byte(pid, region, offset, value)
        }
        Command::Read { pid, region, offset } => {
            let value = vm.read_byte(pid, region, offset)?;
            println!("read pid={} region={} offset={} -> {}", pid, region, offset, value);
            Ok(())
        }
        Command::PageTable { pid } => {
            print!("{}", vm.dump_page_table(pid)?);
            Ok(())
        }
        Command::MemDump => {
            print!("{}", vm.dump_physical());
            Ok(())
        }
        Command::Kill { pid } => vm.release_all(pid),
    }
}

fn print_dumps(vm: &VmManager, cmd: &Command) {
    let pid = match *cmd {
        Command::Register { pid }
        | Command::Alloc { pid, .. }
        | Command::Free { pid, .. }
        | Command::Write { pid, .. }
        | Command::Read { pid, .. } => pid,
        _ => return,
    };
    println!("----- page table (pid {}) -----", pid);
    match vm.dump_page_table(pid) {
        Ok(table) => print!("{}", table),
        Err(_) => println!("(released)"),
    }
    println!("----- physical memory -----");
    print!("{}", vm.dump_physical());
}
