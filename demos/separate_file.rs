//! Example: Separate a stereo audio file
//!
//! Usage: `cargo run --example separate_file -- <input.wav> <output_dir> [sources] [iterations]`

use std::path::PathBuf;
use std::process;

use stratum_separation::{separate_file, SeparationConfig};

fn main() {
    // Initialize logger
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!(
            "Usage: {} <input.wav> <output_dir> [sources] [iterations]",
            args[0]
        );
        process::exit(2);
    }
    let input = PathBuf::from(&args[1]);
    let output_dir = PathBuf::from(&args[2]);

    let mut config = SeparationConfig {
        persist_intermediates: std::env::var_os("KEEP_INTERMEDIATES").is_some(),
        ..Default::default()
    };
    if let Some(sources) = args.get(3).and_then(|s| s.parse().ok()) {
        config.sources = sources;
    }
    if let Some(iterations) = args.get(4).and_then(|s| s.parse().ok()) {
        config.iterations = iterations;
    }

    let result = match separate_file(&input, &output_dir, config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(e.exit_code());
        }
    };

    // Print results
    println!("Separation Results:");
    for image in &result.images {
        println!(
            "  {}: {} channels, {:.2} s",
            output_dir.join(image.file_name()).display(),
            image.channels(),
            image.duration_seconds()
        );
    }
    let metadata = &result.metadata;
    println!("  EM iterations: {}", metadata.iterations);
    if let Some(ll) = metadata.final_log_likelihood {
        println!("  Final log-likelihood: {:.4}", ll);
    }
    println!("  Clamped NMF entries: {}", metadata.clamped_entries);
    println!("  Processing time: {:.2} ms", metadata.processing_time_ms);
    for timing in &metadata.stage_timings {
        println!("    {:<16} {:>10.2} ms", timing.stage, timing.elapsed_ms);
    }
}
