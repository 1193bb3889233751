use std::fs;
use std::io::{stdin, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Term;
use log::LevelFilter;
use miette::{bail, IntoDiagnostic, Result};
use simple_logger::SimpleLogger;

use femto::{assemble, Assembly, Cpu, Devices, Heater, Keyboard, Lights, Ram, Reg};

/// Femto is an assembler & emulator toolchain for an 8-bit educational
/// microprocessor.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble and run a `.asm` file until it halts
    Run {
        /// `.asm` file to run
        name: PathBuf,
    },
    /// Check a `.asm` file without running it
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Assemble a `.asm` file and print the emitted bytes
    Dump {
        /// `.asm` file to dump
        name: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .env()
        .init()
        .unwrap();

    if let Some(command) = args.command {
        match command {
            Command::Run { name } => run(&name),
            Command::Check { name } => {
                file_message(Green, "Checking", &name);
                let _ = assemble_file(&name)?;
                message(Green, "Success", "no errors found!");
                Ok(())
            }
            Command::Dump { name } => {
                let assembly = assemble_file(&name)?;
                for (addr, byte) in assembly.code().iter().enumerate() {
                    match assembly.line_for(addr as u8) {
                        Some(line) => println!("{addr:02x}: {byte:02x}  ; line {line}"),
                        None => println!("{addr:02x}: {byte:02x}"),
                    }
                }
                Ok(())
            }
        }
    } else if let Some(path) = args.path {
        run(&path)
    } else {
        println!("\n~ femto v{VERSION} ~");
        println!("{}", LOGO.truecolor(153, 204, 255).bold());
        println!("{SHORT_INFO}");
        Ok(())
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &PathBuf) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message<S>(color: MsgColor, left: S, right: S)
where
    S: Colorize + std::fmt::Display,
{
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn assemble_file(name: &PathBuf) -> Result<Assembly> {
    file_message(MsgColor::Green, "Assembling", name);
    let source = fs::read_to_string(name).into_diagnostic()?;
    Ok(assemble(&source)?)
}

fn run(name: &PathBuf) -> Result<()> {
    let assembly = assemble_file(name)?;

    let devices = Devices {
        keyboard: Box::new(TermKeyboard),
        lights: Box::new(TermLights),
        heater: Box::new(TermHeater::default()),
    };
    let mut cpu = Cpu::new(Ram::default(), devices);
    cpu.mem_mut()
        .load_program(assembly.code())
        .into_diagnostic()?;

    message(MsgColor::Green, "Running", "emitted binary");
    while !cpu.is_halted() {
        if let Err(fault) = cpu.step() {
            match fault_line(&assembly, cpu.ip()) {
                Some(line) => bail!("{fault} (line {line})"),
                None => bail!("{fault}"),
            }
        }
    }
    message(MsgColor::Cyan, "Halted", "machine state below");
    print_report(&cpu);

    file_message(MsgColor::Green, "Completed", name);
    Ok(())
}

/// Source line nearest to the faulting instruction. IP may rest on an
/// operand byte, so walk back over the widest possible encoding.
fn fault_line(assembly: &Assembly, ip: i32) -> Option<u32> {
    let start = ip.clamp(0, 255) as u8;
    (start.saturating_sub(2)..=start)
        .rev()
        .find_map(|addr| assembly.line_for(addr))
}

fn print_report(cpu: &Cpu) {
    println!();
    for reg in Reg::ALL {
        println!("{:>12} {:#04x}", reg.to_string().bold(), cpu.reg(reg));
    }
    println!("{:>12} {:#04x}", "SP".bold(), cpu.sp());
    println!("{:>12} {:#04x}", "IP".bold(), cpu.ip());
    println!("{:>12} {:#07b}", "SR".bold(), cpu.status_byte());

    println!();
    let cells = cpu.mem().display_cells();
    for row in cells.chunks(16) {
        let text: String = row
            .iter()
            .map(|byte| {
                let ch = *byte as char;
                if ch.is_ascii_graphic() || ch == ' ' {
                    ch
                } else {
                    '·'
                }
            })
            .collect();
        println!("{:>12} {}", "", text);
    }
    println!();
}

/// Read one byte from stdin or an unbuffered terminal. End of input is an
/// abandoned read, not an error.
struct TermKeyboard;

impl Keyboard for TermKeyboard {
    fn read_key(&mut self) -> u8 {
        if stdin().is_terminal() {
            let cons = Term::stdout();
            cons.read_char().map(|ch| ch as u8).unwrap_or(0)
        } else {
            let mut buf = [0; 1];
            match stdin().read_exact(&mut buf) {
                Ok(()) => buf[0],
                Err(_) => 0,
            }
        }
    }
}

struct TermLights;

impl Lights for TermLights {
    fn set_lights(&mut self, bits: u8) {
        // Two lamp triplets live in bits 7..=2
        let dots: String = (2..8)
            .rev()
            .map(|bit| if bits & (1 << bit) != 0 { '●' } else { '○' })
            .collect();
        println!("{:>12} {dots}", "Lights".cyan());
    }
}

#[derive(Default)]
struct TermHeater {
    burner: u8,
}

impl Heater for TermHeater {
    fn status(&self) -> u8 {
        u8::from(self.burner != 0)
    }

    fn set_burner(&mut self, level: u8) {
        self.burner = level;
        let state = if level != 0 {
            "on".red()
        } else {
            "off".normal()
        };
        println!("{:>12} burner {state}", "Heater".cyan());
    }
}

const LOGO: &str = r#"
   ___               __
  / _/__ __ _  ___  / /____
 / _/ -_)  ' \/ _ \/ __/ _ \
/_/ \__/_/_/_/\___/\__/\___/"#;

const SHORT_INFO: &str = r"
Welcome to femto, an all-in-one toolchain for a tiny 8-bit microprocessor:
a two-pass assembler, a byte-level emulator and a handful of port-mapped
devices. Please use `-h` or `--help` for usage instructions.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
