//! Tessera sort bench
//!
//! Sorts seeded random keys on the host emulation runtime, checks the result
//! and reports the launch configuration and timings.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tessera_gpu::{Device, DeviceBuffer, HostRuntime, Stream};
use tessera_sort::{KernelSource, KeyValueSoA, LaunchParams, RadixSort, ScanAlgorithm};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scan {
    Host,
    SingleWorkgroup,
    Parallel,
}

impl From<Scan> for ScanAlgorithm {
    fn from(scan: Scan) -> Self {
        match scan {
            Scan::Host => Self::Host,
            Scan::SingleWorkgroup => Self::SingleWorkgroup,
            Scan::Parallel => Self::Parallel,
        }
    }
}

#[derive(Parser)]
#[command(name = "tessera-sortbench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sort random 32-bit keys with the Tessera radix sort", long_about = None)]
struct Cli {
    /// Number of keys
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    count: usize,

    /// Seed of the key generator
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// First key bit to sort on
    #[arg(long, default_value_t = 0)]
    start_bit: u32,

    /// One past the last key bit to sort on
    #[arg(long, default_value_t = 32)]
    end_bit: u32,

    /// Histogram scan
    #[arg(long, value_enum, default_value = "parallel")]
    scan: Scan,

    /// Sort key/value pairs instead of keys only
    #[arg(long)]
    pairs: bool,

    /// Directory holding precompiled kernel images
    #[arg(long, value_name = "DIR", default_value = ".")]
    artifact_dir: PathBuf,

    /// Log per-kernel resource usage
    #[arg(long)]
    log_kernels: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    device: String,
    kernel_source: String,
    scan: ScanAlgorithm,
    count: usize,
    start_bit: u32,
    end_bit: u32,
    pairs: bool,
    launch: LaunchParams,
    setup_ms: f64,
    sort_ms: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = Arc::new(HostRuntime::new());

    let setup = Instant::now();
    let mut sorter = RadixSort::builder(runtime.clone(), Device(0))
        .kernel_source(KernelSource::from_build_features(&cli.artifact_dir))
        .scan_algorithm(cli.scan.into())
        .log_kernels(cli.log_kernels)
        .build()
        .context("failed to configure radix sort")?;
    let setup_ms = setup.elapsed().as_secs_f64() * 1e3;

    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let keys: Vec<u32> = (0..cli.count).map(|_| rng.gen()).collect();
    let values: Vec<u32> = (0..cli.count as u32).collect();
    info!(
        "Sorting {} keys on bits [{}, {})",
        cli.count, cli.start_bit, cli.end_bit
    );

    let buffer = |data: &[u32]| DeviceBuffer::from_slice(runtime.clone(), data, Stream::DEFAULT);
    let (src_keys, dst_keys) = (buffer(&keys)?, buffer(&keys)?);
    let (src_values, dst_values) = (buffer(&values)?, buffer(&values)?);

    let sort = Instant::now();
    if cli.pairs {
        sorter.sort_pairs(
            KeyValueSoA {
                key: src_keys.as_ptr(),
                value: src_values.as_ptr(),
            },
            KeyValueSoA {
                key: dst_keys.as_ptr(),
                value: dst_values.as_ptr(),
            },
            cli.count,
            cli.start_bit,
            cli.end_bit,
            Stream::DEFAULT,
        )?;
    } else {
        sorter.sort_keys(
            src_keys.as_ptr(),
            dst_keys.as_ptr(),
            cli.count,
            cli.start_bit,
            cli.end_bit,
            Stream::DEFAULT,
        )?;
    }
    let sort_ms = sort.elapsed().as_secs_f64() * 1e3;

    verify(&cli, &keys, &dst_keys.to_vec()?, &dst_values.to_vec()?)?;

    let report = Report {
        device: sorter.device_properties().summary(),
        kernel_source: format!("{:?}", sorter.kernel_source_kind()),
        scan: sorter.scan_algorithm(),
        count: cli.count,
        start_bit: cli.start_bit,
        end_bit: cli.end_bit,
        pairs: cli.pairs,
        launch: *sorter.launch_params(),
        setup_ms,
        sort_ms,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!("Device: {}", report.device);
        info!(
            "Kernels: {}, scan: {:?}, {} count blocks, {} scan blocks",
            report.kernel_source,
            report.scan,
            report.launch.count_blocks,
            report.launch.scan_blocks
        );
        info!(
            "Setup: {:.2} ms, sort: {:.2} ms",
            report.setup_ms, report.sort_ms
        );
    }
    Ok(())
}

/// Check the output against a stable host sort of the same keys.
fn verify(cli: &Cli, keys: &[u32], sorted_keys: &[u32], sorted_values: &[u32]) -> Result<()> {
    let width = cli.end_bit.saturating_sub(cli.start_bit);
    let mask = if width >= 32 { u32::MAX } else { (1 << width) - 1 };
    let field = |key: u32| (key >> cli.start_bit) & mask;

    let mut order: Vec<u32> = (0..keys.len() as u32).collect();
    order.sort_by_key(|&i| field(keys[i as usize]));

    for (pos, &i) in order.iter().enumerate() {
        if sorted_keys[pos] != keys[i as usize] {
            bail!("key mismatch at {pos}");
        }
        if cli.pairs && sorted_values[pos] != i {
            bail!("value mismatch at {pos}");
        }
    }
    info!("Output verified");
    Ok(())
}
