use std::error::Error;
use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use heap_arena::workload::{self, Recorder};
use heap_arena::{HeapArena, DEFAULT_NORMAL_ALLOCATION_SIZE};

/// Drive a `HeapArena` from a recorded workload (or a freshly generated
/// synthetic one) and print its final dump.
#[derive(Parser)]
#[command(name = "dump-tool", about = "Replay a heap-arena workload and print its final state")]
struct Cli {
    /// CSV workload produced by `heap_arena::workload::write_csv`. When
    /// omitted, a synthetic workload is generated and recorded instead.
    #[arg(long)]
    workload: Option<PathBuf>,

    /// Minimum page size requested from the page supplier.
    #[arg(long, default_value_t = DEFAULT_NORMAL_ALLOCATION_SIZE)]
    normal_allocation_size: usize,

    /// Number of synthetic operations to generate when `--workload` is not given.
    #[arg(long, default_value_t = 1000)]
    ops: usize,

    /// Seed for the synthetic workload generator.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Where to write the generated synthetic workload, if any.
    #[arg(long)]
    save_workload: Option<PathBuf>,
}

fn synthetic_records(ops: usize, seed: u64) -> Vec<workload::Record> {
    let mut recorder = Recorder::new();
    let mut live = Vec::new();
    let mut rng = seed ^ 0x9e3779b97f4a7c15;

    for _ in 0..ops {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
        let r = rng >> 32;

        if live.is_empty() || r % 3 != 0 {
            let size = 8 + (r % 256) as usize;
            let id = recorder.record_allocate(size);
            live.push(id);
        } else {
            let idx = (r as usize) % live.len();
            let id = live.swap_remove(idx);
            recorder.record_free(id);
        }
    }
    recorder.into_records()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let records = match &cli.workload {
        Some(path) => {
            let file = File::open(path)?;
            workload::read_csv(file)?
        }
        None => {
            let records = synthetic_records(cli.ops, cli.seed);
            if let Some(save_path) = &cli.save_workload {
                let file = File::create(save_path)?;
                workload::write_csv(&records, file)?;
            }
            records
        }
    };

    let mut arena = HeapArena::new(cli.normal_allocation_size);
    workload::replay(&mut arena, &records)?;

    println!("{}", arena.dump());
    if let Err(e) = arena.check_invariants() {
        eprintln!("invariant violation: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
