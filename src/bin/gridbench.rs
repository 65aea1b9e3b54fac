//! Benchmark runner for the distributed solvers on a simulated process grid.
//!
//! For each requested grid width this binary builds a reproducible random
//! symmetric positive-definite system, runs conjugate gradient and Lanczos
//! on a [`LocalCluster`] of that many simulated ranks, checks the results
//! against their defining properties, and appends one timing record per
//! (solver, ranks) pair to a CSV file.

use anyhow::{anyhow, ensure, Context, Result};
use clap::Parser;
use serde::Serialize;
use splitdense::{cg, lanczos, matmul, transpose, DType, DndArray, LocalCluster};
use std::path::PathBuf;
use std::time::Instant;

/// Command-line arguments for the benchmark runner.
#[derive(Parser, Debug)]
#[clap(
    name = "gridbench",
    about = "Times the distributed CG and Lanczos solvers over simulated process grids."
)]
struct GridBenchArgs {
    /// Dimension of the generated SPD system.
    #[clap(long, default_value_t = 64)]
    n: usize,
    /// Lanczos subspace dimension.
    #[clap(long, default_value_t = 16)]
    m: usize,
    /// Simulated grid widths to benchmark, e.g. --ranks 1 --ranks 2 --ranks 4.
    #[clap(long, default_values_t = vec![1, 2, 4])]
    ranks: Vec<usize>,
    /// Seed for the generated system.
    #[clap(long, default_value_t = 42)]
    seed: u64,
    /// Path of the CSV file receiving one record per (solver, ranks) pair.
    #[clap(long, default_value = "gridbench.csv")]
    output: PathBuf,
}

/// One timing record, serialized as a CSV row.
#[derive(Debug, Serialize)]
struct BenchRecord {
    solver: String,
    ranks: usize,
    n: usize,
    m: usize,
    elapsed_ms: f64,
    residual: f64,
}

/// Builds the shared SPD test system `M^T M + n I` on one rank's view.
fn spd_system(n: usize, seed: u64, comm: std::sync::Arc<dyn splitdense::Communicator>) -> Result<DndArray> {
    let m = DndArray::random_uniform(&[n, n], None, comm.clone(), Some(seed))?;
    let gram = matmul(&transpose(&m)?, &m)?;
    let shift = DndArray::eye(n, None, comm)?.scale(n as f64);
    Ok(gram.add(&shift)?.resplit(Some(0))?)
}

fn run_cg(n: usize, seed: u64, ranks: usize) -> Result<(f64, f64)> {
    let start = Instant::now();
    let residuals = LocalCluster::run(ranks, move |comm| -> Result<f64> {
        let a = spd_system(n, seed, comm.clone())?;
        let b = DndArray::random_uniform(&[n], Some(0), comm.clone(), Some(seed + 1))?;
        let x0 = DndArray::zeros(&[n], Some(0), DType::Float64, comm)?;
        let x = cg(&a, &b, &x0)?;
        Ok(b.sub(&matmul(&a, &x)?)?.norm())
    });
    let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;
    let residual = residuals
        .into_iter()
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .fold(0.0f64, f64::max);
    Ok((elapsed_ms, residual))
}

fn run_lanczos(n: usize, m: usize, seed: u64, ranks: usize) -> Result<(f64, f64)> {
    let start = Instant::now();
    let deviations = LocalCluster::run(ranks, move |comm| -> Result<f64> {
        let a = spd_system(n, seed, comm)?;
        let (v, _) = lanczos(&a, m, None)?;
        // Worst deviation of V^T V from the identity.
        let vg = v.to_global();
        let mut worst = 0.0f64;
        for p in 0..m {
            for q in 0..m {
                let mut dot = 0.0;
                for i in 0..n {
                    dot += vg[(i, p)] * vg[(i, q)];
                }
                let expected = if p == q { 1.0 } else { 0.0 };
                worst = worst.max((dot - expected).abs());
            }
        }
        Ok(worst)
    });
    let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;
    let deviation = deviations
        .into_iter()
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .fold(0.0f64, f64::max);
    Ok((elapsed_ms, deviation))
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = GridBenchArgs::parse();
    ensure!(args.m >= 1 && args.m <= args.n, "require 1 <= m <= n");
    log::info!("Benchmarking with parameters: {:?}", &args);

    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to open output file: {:?}", &args.output))?;

    for &ranks in &args.ranks {
        ensure!(ranks >= 1, "grid width must be at least 1");

        let (elapsed_ms, residual) = run_cg(args.n, args.seed, ranks)?;
        log::info!("cg on {ranks} ranks: {elapsed_ms:.2} ms, residual {residual:.3e}");
        writer.serialize(BenchRecord {
            solver: "cg".to_string(),
            ranks,
            n: args.n,
            m: args.m,
            elapsed_ms,
            residual,
        })?;
        writer.flush()?;

        let (elapsed_ms, deviation) = run_lanczos(args.n, args.m, args.seed, ranks)?;
        log::info!("lanczos on {ranks} ranks: {elapsed_ms:.2} ms, orthogonality {deviation:.3e}");
        writer.serialize(BenchRecord {
            solver: "lanczos".to_string(),
            ranks,
            n: args.n,
            m: args.m,
            elapsed_ms,
            residual: deviation,
        })?;
        writer.flush()?;
    }

    log::info!("Results written to {:?}", args.output);
    Ok(())
}
