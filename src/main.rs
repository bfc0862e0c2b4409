//! # PiOS Sample Runner
//!
//! On Cortex-M4 (`target_os = "none"`) this is the firmware image: it runs
//! the priority-inversion sample with SysTick driving the kernel tick.
//!
//! On a host it is a command-line runner that simulates ticks and logs the
//! sample output:
//!
//! | Command | Sample | Arguments |
//! |---------|--------|-----------|
//! | `thread` | two counters, pool and caller stacks | none |
//! | `timeslice` | round robin with slices 30/15 | `[slice1] [slice2]` |
//! | `mutex` | shared counters behind a mutex | `[protect]` (0 disables the mutex) |
//! | `pri-inversion` | priority inheritance | `[take]` (0 skips the mutex) |
//! | `semaphore` | timed takes and deletion | `[initial]` |
//!
//! Numeric arguments follow the kernel shell convention: any non-digit
//! character makes the value 0.

#![cfg_attr(target_os = "none", no_std, no_main)]

// ---------------------------------------------------------------------------
// Firmware
// ---------------------------------------------------------------------------

#[cfg(target_os = "none")]
mod firmware {
    use cortex_m::singleton;
    use cortex_m_rt::{entry, exception};
    use panic_halt as _;

    use pios::arch::cortex_m4;
    use pios::{kernel, samples, KernelConfig, Scheduler, StackPool};

    /// Kernel tick.
    #[exception]
    fn SysTick() {
        kernel::tick();
    }

    /// Firmware entry point. Builds the scheduler, installs the sample and
    /// dispatches forever.
    #[entry]
    fn main() -> ! {
        let cp = cortex_m::Peripherals::take().unwrap();

        let arena = singleton!(: [u8; 4096] = [0; 4096]).unwrap();
        let pool = StackPool::new(arena, 1024).expect("Failed to carve stack pool");
        let mut scheduler = Scheduler::new(KernelConfig::default()).with_stack_pool(pool);

        samples::priority_inversion::setup(&mut scheduler, true)
            .expect("Failed to set up pri_inversion");
        kernel::init(scheduler).expect("Kernel already initialized");

        match cortex_m4::run(cp.SYST, cp.SCB) {
            Ok(never) => match never {},
            Err(_) => loop {
                cortex_m::asm::wfi();
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Host runner
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "none"))]
mod host {
    use std::convert::Infallible;
    use std::process::ExitCode;

    use clap::{Parser, Subcommand};
    use log::{error, info};

    use pios::samples::{self, str_to_dec};
    use pios::{KernelConfig, KernelResult, Scheduler, Stack, StackPool};

    const POOL_BLOCK_SIZE: usize = 1024;
    const POOL_BLOCKS: usize = 8;

    #[derive(Parser)]
    #[command(name = "pios", version, about = "Run PiOS sample programs in simulated time")]
    struct Cli {
        /// Upper bound on simulated ticks
        #[arg(long, global = true, default_value_t = 40_000)]
        ticks: u64,

        /// Log kernel decisions (switches, priority changes, wakeups)
        #[arg(short, long, global = true)]
        verbose: bool,

        /// Dump the scheduler trace ring when the run ends
        #[arg(long, global = true)]
        trace: bool,

        #[command(subcommand)]
        sample: Sample,
    }

    #[derive(Subcommand)]
    enum Sample {
        /// Two counting threads at adjacent priorities
        Thread,
        /// Round robin between two equal-priority threads
        Timeslice {
            #[arg(value_parser = decimal, default_value = "30")]
            slice1: u32,
            #[arg(value_parser = decimal, default_value = "15")]
            slice2: u32,
        },
        /// Two threads updating shared counters
        Mutex {
            #[arg(value_parser = decimal, default_value = "1")]
            protect: u32,
        },
        /// Priority inversion bounded by inheritance
        #[command(name = "pri-inversion")]
        PriInversion {
            #[arg(value_parser = decimal, default_value = "1")]
            take: u32,
        },
        /// Producer/consumer over a counting semaphore
        Semaphore {
            #[arg(value_parser = decimal, default_value = "0")]
            initial: u32,
        },
    }

    fn decimal(text: &str) -> Result<u32, Infallible> {
        Ok(str_to_dec(text))
    }

    fn leaked(len: usize) -> &'static mut [u8] {
        vec![0u8; len].leak()
    }

    fn caller_stacks() -> KernelResult<[Stack; 2]> {
        Ok([
            Stack::from_static(leaked(POOL_BLOCK_SIZE))?,
            Stack::from_static(leaked(POOL_BLOCK_SIZE))?,
        ])
    }

    fn run(cli: &Cli) -> KernelResult<()> {
        let pool = StackPool::new(leaked(POOL_BLOCKS * POOL_BLOCK_SIZE + 8), POOL_BLOCK_SIZE)?;
        let mut scheduler = Scheduler::new(KernelConfig::default()).with_stack_pool(pool);

        match cli.sample {
            Sample::Thread => samples::thread::setup(&mut scheduler, caller_stacks()?[0])?,
            Sample::Timeslice { slice1, slice2 } => {
                samples::timeslice::setup(&mut scheduler, slice1, slice2)?
            }
            Sample::Mutex { protect } => {
                samples::mutex::setup(&mut scheduler, protect != 0, caller_stacks()?)?
            }
            Sample::PriInversion { take } => {
                samples::priority_inversion::setup(&mut scheduler, take != 0)?
            }
            Sample::Semaphore { initial } => {
                samples::semaphore::setup(&mut scheduler, initial, caller_stacks()?)?
            }
        }

        scheduler.start();
        let finished = scheduler.run_until(cli.ticks, |s| s.threads().next().is_none());

        let stats = scheduler.stats();
        info!(
            "{} after {} ticks: {} switches, {} preemptions, {} idle ticks, {} timeouts",
            if finished { "finished" } else { "stopped" },
            scheduler.now(),
            stats.context_switches,
            stats.preemptions,
            stats.idle_ticks,
            stats.timeouts
        );
        if cli.trace {
            for event in scheduler.trace().iter() {
                println!("{:?}", event);
            }
            if scheduler.trace().dropped() > 0 {
                println!("({} older events dropped)", scheduler.trace().dropped());
            }
        }
        Ok(())
    }

    pub fn main() -> ExitCode {
        let cli = Cli::parse();

        let level = if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("pios", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_target(false)
            .init();

        match run(&cli) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{}", err);
                ExitCode::FAILURE
            }
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() -> std::process::ExitCode {
    host::main()
}
