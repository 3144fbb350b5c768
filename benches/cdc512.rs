use std::time::{Duration, Instant};

use spacenet::cdc512::Cdc512;
use spacenet::indexer::BLOCK_SIZE;

fn mbps(bytes: usize, elapsed: Duration) -> f64 {
    bytes as f64 / 1_000_000.0 / elapsed.as_secs_f64()
}

// ---------------------------------------------------------------------------
// Benchmark: one-shot hashing of large buffers
// ---------------------------------------------------------------------------

fn bench_one_shot(len: usize, iterations: usize) {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    println!("\n--- one-shot {} MB ---", len / 1_000_000);

    let mut best = 0.0f64;
    for run in 1..=iterations {
        let start = Instant::now();
        let digest = Cdc512::digest_of(&data);
        let elapsed = start.elapsed();
        std::hint::black_box(digest);

        let rate = mbps(len, elapsed);
        best = best.max(rate);
        println!("  Run {run}: {:.3}s ({rate:.0} MB/s)", elapsed.as_secs_f64());
    }
    println!("  Best: {best:.0} MB/s");
}

// ---------------------------------------------------------------------------
// Benchmark: block-at-a-time streaming, as the reindexer drives it
// ---------------------------------------------------------------------------

fn bench_block_stream(total: usize, iterations: usize) {
    let block = vec![0xA5u8; BLOCK_SIZE];
    let blocks = total / BLOCK_SIZE;
    println!("\n--- {blocks} x {BLOCK_SIZE}-byte blocks (per-block + whole-file) ---");

    let mut best = 0.0f64;
    for run in 1..=iterations {
        let start = Instant::now();
        let mut file_ctx = Cdc512::new();
        for _ in 0..blocks {
            // Same work per block as a reindex cycle: a fresh per-block
            // digest plus the running whole-file update.
            std::hint::black_box(Cdc512::digest_of(&block));
            file_ctx.update(&block);
        }
        std::hint::black_box(file_ctx.finish());
        let elapsed = start.elapsed();

        let rate = mbps(total, elapsed);
        best = best.max(rate);
        println!("  Run {run}: {:.3}s ({rate:.0} MB/s)", elapsed.as_secs_f64());
    }
    println!("  Best: {best:.0} MB/s");
}

fn main() {
    println!("\n=== CDC-512 Benchmark ===");

    bench_one_shot(16_000_000, 3);
    bench_one_shot(64_000_000, 3);
    bench_block_stream(64_000_000, 3);

    println!("\n=== Benchmark Complete ===");
}
