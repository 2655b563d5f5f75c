//! Measures how much of an arena the allocator can hand out.
//!
//! ```console
//! $ cargo run -p tagheap --example probe -- --size 262144 --dump
//! ```

use std::process;

use argh::FromArgs;
use snafu::{Location, OptionExt as _, Report, ResultExt as _, Snafu, ensure};
use tagheap::SetupError;

use self::{
    log::LogLevel,
    measure::{Memory, Replay},
};

#[macro_use]
mod log;
mod measure;

/// Bootstrap an arena and check its capacity guarantees.
#[derive(Debug, FromArgs)]
struct Args {
    /// arena size in bytes
    #[argh(option, short = 's', default = "1 << 20")]
    size: usize,

    /// shift the arena start by this many bytes to exercise clipping
    #[argh(option, default = "0")]
    misalign: usize,

    /// request size used to measure the effective size
    #[argh(option, short = 'c', default = "100")]
    chunk: usize,

    /// number of allocations in the replay check
    #[argh(option, default = "512")]
    replay: usize,

    /// seed for the replay sizes and release order
    #[argh(option, default = "0x5eed")]
    seed: u64,

    /// print the block layout of a fresh arena
    #[argh(switch, short = 'd')]
    dump: bool,

    /// log debug messages
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// log trace messages
    #[argh(switch)]
    trace: bool,
}

#[derive(Debug, Snafu)]
enum ProbeError {
    #[snafu(display("failed to set up a {size}-byte arena"))]
    Setup {
        size: usize,
        source: SetupError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no request fits into a {usable}-byte arena"))]
    NoCapacity {
        usable: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "max size {max_size} is below {threshold} (8/9 of a {usable}-byte arena)"
    ))]
    MaxSizeTooSmall {
        max_size: usize,
        threshold: usize,
        usable: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "effective size {effective_size} is below {threshold} (1/9 of a {usable}-byte arena)"
    ))]
    EffectiveSizeTooSmall {
        effective_size: usize,
        threshold: usize,
        usable: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "replay allocation #{index} of {size} bytes failed after releasing every block"
    ))]
    ReplayFailed {
        index: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to write the arena dump"))]
    Dump {
        source: std::fmt::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

fn main() {
    let args: Args = argh::from_env();

    log::init(if args.trace {
        LogLevel::Trace
    } else if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    if let Err(err) = run(&args) {
        eprintln!("{}", Report::from_error(err));
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), ProbeError> {
    let mut memory = Memory::new(args.size, args.misalign);
    let heap = memory
        .try_heap()
        .context(SetupSnafu { size: args.size })?;
    let usable = heap.arena().map_or(0, |arena| arena.len());
    info!(
        "arena: requested={} bytes, usable={usable} bytes, {:?}",
        args.size,
        heap.arena()
    );

    if args.dump {
        let mut layout = String::new();
        heap.dump(&mut layout).context(DumpSnafu)?;
        print!("{layout}");
    }

    let max_size = measure::max_size(&mut memory).context(NoCapacitySnafu { usable })?;
    let threshold = (8 * usable).div_ceil(9);
    info!("max size: {max_size} bytes (threshold {threshold})");
    ensure!(
        max_size >= threshold,
        MaxSizeTooSmallSnafu {
            max_size,
            threshold,
            usable
        }
    );

    let effective_size = measure::effective_size(&mut memory, args.chunk);
    let threshold = usable.div_ceil(9);
    info!(
        "effective size: {effective_size} bytes in {}-byte chunks (threshold {threshold})",
        args.chunk
    );
    if args.chunk < size_of::<usize>() {
        warn!("chunks smaller than a word waste most of each block");
    }
    ensure!(
        effective_size >= threshold,
        EffectiveSizeTooSmallSnafu {
            effective_size,
            threshold,
            usable
        }
    );

    let max_chunk = (usable / 64).max(1);
    match measure::replay(&mut memory, args.replay, max_chunk, args.seed) {
        Replay::Passed { allocations } => {
            info!("replay: {allocations} allocations succeeded twice");
        }
        Replay::Failed { index, size } => {
            return ReplayFailedSnafu { index, size }.fail();
        }
    }

    Ok(())
}
