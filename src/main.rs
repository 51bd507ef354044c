//             ,---.
// ,--.--.    /  .-' ,---.  ,---.
// |  .--'    |  `-,| .-. :| .-. :
// |  |       |  .-'\   --.\   --.
// `--'       `--'   `----' `----'

// Link emulation engine: bandwidth, jitter, duplication, delay and bit error loss
// between virtual links, driven from scenario files.

// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use rfee::emulation::ber::{self, BER_E_MAX, BER_M_MAX, BER_PLEN_MAX};
use rfee::prelude::*;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{Level, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run {
        scenario: PathBuf,
        /// Override the scenario's duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
        #[arg(short, long, default_value = "results")]
        output: PathBuf,
    },

    /// Survival probability of one frame for a bit error rate of M * 10^-(E+1)
    Ber {
        #[arg(short, long)]
        mantissa: u8,
        #[arg(short, long)]
        exponent: u8,
        #[arg(short, long, default_value_t = 1500)]
        length: usize,
    },

    /// Sample the jitter distribution for a given average
    Jitter {
        #[arg(short, long)]
        average_us: u32,
        #[arg(short = 'n', long, default_value_t = 100_000)]
        samples: usize,
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Print an example scenario
    Template,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { scenario, duration, output } => {
            run_scenario(scenario, duration, output).await?;
            info!("Total runtime: {}", format_time(program_start.elapsed()));
        }
        Commands::Ber { mantissa, exponent, length } => ber_probability(mantissa, exponent, length)?,
        Commands::Jitter { average_us, samples, seed } => jitter_stats(average_us, samples, seed)?,
        Commands::Template => {
            println!("{}", serde_json::to_string_pretty(&SimConfig::example())?);
        }
    }

    Ok(())
}

async fn run_scenario(path: PathBuf, duration: Option<u64>, output: PathBuf) -> Result<()> {
    let mut config = SimConfig::load(&path)?;
    if let Some(secs) = duration {
        config.duration_secs = secs;
    }

    info!("rfee: {}", config.name);
    let mut sim = Simulation::new(config).with_output_dir(output);
    let report = sim.run().await?;

    link_table(&report);
    Ok(())
}

fn ber_probability(mantissa: u8, exponent: u8, length: usize) -> Result<()> {
    if mantissa as usize > BER_M_MAX {
        bail!("mantissa must be 0..={}", BER_M_MAX);
    }
    if exponent as usize >= BER_E_MAX {
        bail!("exponent must be 0..{}", BER_E_MAX);
    }
    if length > BER_PLEN_MAX {
        info!("{} bytes is past the table, using {}", length, BER_PLEN_MAX);
    }

    let table = ProbabilityTable::build();
    let p = table.survival_probability(exponent, mantissa, length);
    let rate = Ber::new(mantissa, exponent).as_f64();
    let bits = length.min(BER_PLEN_MAX) as i32 * 8;

    println!("BER:           {:e}", rate);
    println!("Frame:         {} bytes", length.min(BER_PLEN_MAX));
    println!("Fixed point:   {:#014x} / {:#014x}", p, ber::ONE);
    println!("Survival:      {:.9}", ber::to_f64(p));
    println!("Closed form:   {:.9}", (1.0 - rate).powi(bits));
    Ok(())
}

fn jitter_stats(average_us: u32, samples: usize, seed: Option<u64>) -> Result<()> {
    if samples == 0 {
        bail!("need at least one sample");
    }
    let sampler = JitterSampler::default();
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut values: Vec<u64> = (0..samples).map(|_| sampler.sample(&mut rng, average_us)).collect();
    values.sort_unstable();

    let mean = values.iter().sum::<u64>() as f64 / samples as f64;
    let pct = |q: f64| values[((samples - 1) as f64 * q) as usize];

    println!("Requested:  {} us (table mean {})", average_us, sampler.mean());
    println!("Samples:    {}", samples);
    println!("Mean:       {:.1} us", mean);
    println!("Min / Max:  {} / {} us", values[0], values[samples - 1]);
    println!("p50 / p99:  {} / {} us", pct(0.50), pct(0.99));
    Ok(())
}

fn link_table(report: &SimReport) {
    println!("\n╔══════════╦════════════╦══════════════╗");
    println!("║ Link     ║ Delivered  ║ Bytes        ║");
    println!("╠══════════╬════════════╬══════════════╣");
    for totals in &report.links {
        println!(
            "║ {:<8} ║ {:>10} ║ {:>12} ║",
            totals.link.to_string(),
            totals.delivered,
            totals.bytes
        );
    }
    println!("╚══════════╩════════════╩══════════════╝\n");

    let stats = &report.engine;
    println!(
        "Delivered {} | bypassed {} | duplicated {} | BER drops {} | backpressure {} | unroutable {} | discarded {}",
        stats.delivered,
        stats.bypassed,
        stats.duplicated,
        stats.ber_drops,
        stats.backpressure_drops,
        stats.unroutable,
        stats.discarded
    );
    println!();
}

fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
