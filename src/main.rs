// Command-line harness around the PP5021C core.
//
// The ARM7TDMI decoder is an external collaborator, so this binary cannot
// execute real firmware on its own. It wires the core up with a placeholder
// Cpu that burns a fixed cycle count per step() without decoding anything,
// which is enough to exercise the bus, peripheral ticks, and COP rendezvous
// end to end.

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use log::info;

use pp5021c::cpu::{Bus, Cpu};
use pp5021c::{DiskBackend, Emulator, EmulatorConfig, FileDisk};

/// PP5021C functional emulator core.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Boot firmware image, loaded at IRAM offset 0.
    #[arg(long)]
    rom: Option<String>,

    /// Flat sector-addressable disk image.
    #[arg(long)]
    disk: Option<String>,

    /// SDRAM size in MiB (PP5021C hardware caps out at 32).
    #[arg(long, default_value_t = 32)]
    sdram_mb: usize,

    /// Stop after this many CPU cycles; runs a fixed one-second budget at
    /// the assumed 80 MHz core clock if omitted.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Enable trace-level logging of every peripheral register access.
    #[arg(long)]
    trace: bool,
}

// Executes exactly one instruction's worth of placeholder work per step,
// never touching the bus. Stands in for the external ARM7TDMI decoder.
struct NullCpu {
    cycles_per_step: u32,
}

impl Cpu for NullCpu {
    fn reset(&mut self) {}

    fn step(&mut self, _bus: &mut dyn Bus) -> u32 {
        self.cycles_per_step
    }

    fn get_reg(&self, _index: u8) -> u32 {
        0
    }

    fn set_reg(&mut self, _index: u8, _value: u32) {}

    fn cpsr(&self) -> u32 {
        0
    }

    fn set_cpsr(&mut self, _value: u32) {}

    fn is_thumb(&self) -> bool {
        false
    }

    fn set_irq_line(&mut self, _asserted: bool) {}

    fn set_fiq_line(&mut self, _asserted: bool) {}
}

const ASSUMED_CPU_FREQ_MHZ: u64 = 80;
const ONE_SECOND_OF_CYCLES: u64 = ASSUMED_CPU_FREQ_MHZ * 1_000_000;

fn run(args: Args) -> pp5021c::Result<()> {
    let firmware = args.rom.as_ref().map(fs::read).transpose().map_err(|source| pp5021c::EmulatorError::FirmwareRead {
        path: args.rom.clone().unwrap_or_default(),
        source,
    })?;

    let disk = args.disk.as_deref().map(FileDisk::open).transpose()?;

    let config = EmulatorConfig {
        sdram_size: args.sdram_mb * 1024 * 1024,
        firmware,
        disk: disk.map(|d| Box::new(d) as Box<dyn DiskBackend>),
    };

    let mut emulator = Emulator::new(config, Box::new(NullCpu { cycles_per_step: 4 }), None)?;

    let max_cycles = args.max_cycles.unwrap_or(ONE_SECOND_OF_CYCLES);
    info!("running for up to {} cycles", max_cycles);
    emulator.run(max_cycles);
    info!("stopped after {} cycles", emulator.total_cycles());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let default_level = if args.trace { "trace" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
