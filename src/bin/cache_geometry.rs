//! Cache Geometry Measurement via Pointer Chasing
//!
//! Infers cache line size, capacity, set count and associativity from access latency alone.
//! Sweep rows go to stdout as CSV (`stride,arr_size,result,increase`), progress and results to
//! stderr through the logger. Any failure to get a trustworthy reading exits with status 1.

use cache_geometry_rs::arena::Arena;
use cache_geometry_rs::config::Config;
use cache_geometry_rs::instrument::{Instrument, Measurement};
use cache_geometry_rs::probe::HardwareProbe;
use cache_geometry_rs::report::CsvReporter;
use cache_geometry_rs::Error;
use log::{error, info, warn};
use std::io;
use std::process::ExitCode;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Pin to one core and raise priority so the scheduler disturbs the caches as little as possible.
fn isolate_thread(config: &Config) {
    if let Some(cpu_num) = config.cpu_core {
        let core_num = core_affinity::CoreId { id: cpu_num };
        if !core_affinity::set_for_current(core_num) {
            warn!(
                "Couldn't pin measurement thread to CPU core {} (NOTE: this is expected on macOS)",
                cpu_num
            );
        }
    }

    if thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_err() {
        warn!("Couldn't set measurement thread to maximum thread priority");
    }
}

fn run(config: &Config) -> Result<Measurement, Error> {
    config.validate()?;
    isolate_thread(config);

    let mut arena = Arena::new(config.arena_len)?;
    let mut dummy = if config.flush_len > 0 {
        Some(Arena::new(config.flush_len)?)
    } else {
        None
    };
    let mut probe = HardwareProbe::new(&mut arena, dummy.as_mut(), config);

    let mut reporter = CsvReporter::new(io::stdout().lock());
    reporter.header()?;
    Instrument::new(config, &mut probe, &mut reporter).run()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::default();
    match run(&config) {
        Ok(measurement) => {
            info!(
                "Measured {} sets x {} ways x {} B lines",
                measurement.geometry.set_count,
                measurement.geometry.associativity,
                measurement.geometry.line_size
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
