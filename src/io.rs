use std::fs;
use std::path::Path;

use crate::vm_manager::VmConfig;

/// One trace-file instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Register { pid: u32 },
    Alloc { pid: u32, region: usize, size: usize },
    Free { pid: u32, region: usize },
    Write { pid: u32, region: usize, offset: usize, value: u8 },
    Read { pid: u32, region: usize, offset: usize },
    PageTable { pid: u32 },
    MemDump,
    Kill { pid: u32 },
}

/// A parsed trace: machine dimensions plus the instruction stream.
#[derive(Debug)]
pub struct Trace {
    pub config: VmConfig,
    pub commands: Vec<Command>,
}

impl Trace {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read trace file: {}", e))?;
        Self::parse(&content)
    }

    /// Parse a trace. An optional `config <ram> <swap> <page> <break>` line
    /// may appear before the first command; `#` starts a comment.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut config = VmConfig::default();
        let mut commands = Vec::new();
        let mut saw_command = false;

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens[0] {
                "config" => {
                    if saw_command {
                        return Err(format!(
                            "line {}: config must precede all commands",
                            lineno + 1
                        ));
                    }
                    let args = parse_numbers(&tokens[1..], 4, lineno)?;
                    config.ram_bytes = args[0];
                    config.swap_bytes = args[1];
                    config.page_size = args[2];
                    config.initial_break = args[3];
                }
                "proc" => {
                    let args = parse_numbers(&tokens[1..], 1, lineno)?;
                    commands.push(Command::Register { pid: args[0] as u32 });
                    saw_command = true;
                }
                "alloc" => {
                    let args = parse_numbers(&tokens[1..], 3, lineno)?;
                    commands.push(Command::Alloc {
                        pid: args[0] as u32,
                        region: args[1],
                        size: args[2],
                    });
                    saw_command = true;
                }
                "free" => {
                    let args = parse_numbers(&tokens[1..], 2, lineno)?;
                    commands.push(Command::Free { pid: args[0] as u32, region: args[1] });
                    saw_command = true;
                }
                "write" => {
                    let args = parse_numbers(&tokens[1..], 4, lineno)?;
                    if args[3] > u8::MAX as usize {
                        return Err(format!("line {}: byte value {} out of range", lineno + 1, args[3]));
                    }
                    commands.push(Command::Write {
                        pid: args[0] as u32,
                        region: args[1],
                        offset: args[2],
                        value: args[3] as u8,
                    });
                    saw_command = true;
                }
                "read" => {
                    let args = parse_numbers(&tokens[1..], 3, lineno)?;
                    commands.push(Command::Read {
                        pid: args[0] as u32,
                        region: args[1],
                        offset: args[2],
                    });
                    saw_command = true;
                }
                "pagetable" => {
                    let args = parse_numbers(&tokens[1..], 1, lineno)?;
                    commands.push(Command::PageTable { pid: args[0] as u32 });
                    saw_command = true;
                }
                "memdump" => {
                    commands.push(Command::MemDump);
                    saw_command = true;
                }
                "kill" => {
                    let args = parse_numbers(&tokens[1..], 1, lineno)?;
                    commands.push(Command::Kill { pid: args[0] as u32 });
                    saw_command = true;
                }
                other => {
                    return Err(format!("line {}: unknown command '{}'", lineno + 1, other));
                }
            }
        }

        Ok(Trace { config, commands })
    }
}

fn parse_numbers(tokens: &[&str], expected: usize, lineno: usize) -> Result<Vec<usize>, String> {
    if tokens.len() != expected {
        return Err(format!(
            "line {}: expected {} arguments, got {}",
            lineno + 1,
            expected,
            tokens.len()
        ));
    }
    tokens
        .iter()
        .map(|t| {
            t.parse::<usize>()
                .map_err(|_| format!("line {}: invalid number '{}'", lineno + 1, t))
        })
        .collect()
}
