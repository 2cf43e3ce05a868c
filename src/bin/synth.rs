//! Synthetic anomaly window generator.
//!
//! Writes labelled training rows for the classifier, one window per line:
//!
//! ```text
//! 123,120,126,…,2
//! ```
//!
//! Every value is `sign × (120 + r)` with `r` drawn uniformly from `0..7`,
//! and every row is unique.
//!
//! Usage:
//!   cargo run --bin synth                                # 1000 seizure-like rows
//!   cargo run --bin synth -- --sign negative --class 1   # faint-like rows

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use rand::Rng;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sign {
    Positive,
    Negative,
}

impl Sign {
    fn factor(self) -> i32 {
        match self {
            Sign::Positive => 1,
            Sign::Negative => -1,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "synth", about = "Generate synthetic anomaly windows as CSV")]
struct Args {
    /// Number of unique rows.
    #[arg(long, default_value_t = 1000)]
    rows: usize,

    /// Values per row.
    #[arg(long, default_value_t = 60)]
    values: usize,

    #[arg(long, value_enum, default_value_t = Sign::Positive)]
    sign: Sign,

    /// Class label appended to each row.
    #[arg(long, default_value = "2")]
    class: String,

    #[arg(long, short, default_value = "data.csv")]
    output: PathBuf,
}

/// Spread of the random offset added to the base magnitude.
const SPREAD: i32 = 7;
const BASE: i32 = 120;

fn random_row<R: Rng>(rng: &mut R, values: usize, sign: Sign) -> Vec<i32> {
    (0..values)
        .map(|_| sign.factor() * (BASE + rng.gen_range(0..SPREAD)))
        .collect()
}

/// `rows` distinct windows, in generation order.
fn unique_rows<R: Rng>(rng: &mut R, rows: usize, values: usize, sign: Sign) -> Result<Vec<Vec<i32>>> {
    let possible = (SPREAD as f64).powi(values.min(i32::MAX as usize) as i32);
    if (rows as f64) > possible {
        bail!("cannot draw {rows} unique rows of {values} values (only {possible} exist)");
    }

    let mut seen = HashSet::with_capacity(rows);
    let mut out = Vec::with_capacity(rows);
    while out.len() < rows {
        let row = random_row(rng, values, sign);
        if seen.insert(row.clone()) {
            out.push(row);
        }
    }
    Ok(out)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let rows = unique_rows(&mut rand::thread_rng(), args.rows, args.values, args.sign)?;

    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut w = BufWriter::new(file);
    for row in &rows {
        let line: Vec<String> = row.iter().map(i32::to_string).collect();
        writeln!(w, "{},{}", line.join(","), args.class)?;
    }
    w.flush()?;

    info!("wrote {} rows to {}", rows.len(), args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_values_stay_in_band() {
        let mut rng = StdRng::seed_from_u64(7);
        let rows = unique_rows(&mut rng, 50, 60, Sign::Negative).unwrap();
        assert_eq!(rows.len(), 50);
        assert!(rows.iter().flatten().all(|&v| (-126..=-120).contains(&v)));
    }

    #[test]
    fn test_rows_are_unique() {
        let mut rng = StdRng::seed_from_u64(1);
        // Only 49 rows of two values exist; asking for all of them forces retries.
        let rows = unique_rows(&mut rng, 49, 2, Sign::Positive).unwrap();
        let distinct: HashSet<_> = rows.iter().collect();
        assert_eq!(distinct.len(), 49);
    }

    #[test]
    fn test_impossible_request_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(unique_rows(&mut rng, 50, 2, Sign::Positive).is_err());
    }
}
