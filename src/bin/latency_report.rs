use heap_arena::HeapArena;
use hdrhistogram::Histogram;
use std::time::Instant;

fn main() {
    println!("Preparing Latency Benchmark...");

    let mut arena = HeapArena::default();
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 100_000, 3).unwrap();

    const ITERATIONS: u64 = 1_000_000;

    println!("Running {} iterations...", ITERATIONS);

    let sizes = [16usize, 32, 64, 128, 256];
    let mut live = Vec::with_capacity(256);
    let mut total_duration = std::time::Duration::new(0, 0);

    for i in 0..ITERATIONS {
        let size = sizes[(i as usize) % sizes.len()];

        let start = Instant::now();
        let ptr = std::hint::black_box(arena.allocate(size).expect("page supplier exhausted"));
        let elapsed = start.elapsed();

        histogram.record(elapsed.as_nanos() as u64).unwrap_or(());
        total_duration += elapsed;

        live.push(ptr);
        if live.len() >= 256 {
            for p in live.drain(..) {
                arena.free(p);
            }
        }
    }
    for p in live.drain(..) {
        arena.free(p);
    }

    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {}", ITERATIONS);
    println!(
        "Throughput: {:.2} ops/sec",
        ITERATIONS as f64 / total_duration.as_secs_f64()
    );
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");

    println!("\nDistribution:");
    for v in histogram.iter_log(100_000, 2.0) {
        let count = v.count_at_value();
        if count > 0 {
            println!(
                "{:6} ns - {:6} ns: {:10} count",
                v.value_iterated_to(),
                v.value_iterated_to(),
                count
            );
        }
    }

    println!("\n{}", arena.dump());
}
