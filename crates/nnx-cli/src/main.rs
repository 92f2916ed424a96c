//! `nnx`: golden test vectors for the NNX convolution accelerators.
//!
//! ```text
//! USAGE:
//!   nnx test  -a <accel> -c <conf> -t <dir>       Generate a test from a configuration
//!   nnx regen -a <accel> [tensors] -t <dir>...    Regenerate tensors of existing tests
//!   nnx encode -a <accel> -t <dir> [-o <file>]    Write the packed weight .bin
//!   nnx check [-a <accel>] -c <conf>              Validate a configuration
//!   nnx info [accel]                              Print per-accelerator constants
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nnx_chip::layout::{cin_subtile, weight_bandwidth};
use nnx_chip::{Accelerator, WeightMemory};
use nnx_golden::{
    pack_weights, DataGenerationMethod, LayerSummary, RawTestConfiguration, TensorName, TestCase,
    TestConfiguration, TestGenerator, TestTensors, DEFAULT_SEED,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nnx", about = "NNX accelerator golden-vector toolkit", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Generate a test from a configuration file.
    Test {
        /// Target accelerator (ne16, neureka, neureka_v2).
        #[arg(short, long)]
        accelerator: Accelerator,
        /// Configuration file (.json or .toml).
        #[arg(short, long)]
        conf: PathBuf,
        /// Directory the test is written to.
        #[arg(short, long)]
        test_dir: PathBuf,
        /// Generator seed.
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        /// Data generation method (random, ones, incremented).
        #[arg(long, default_value = "random")]
        method: DataGenerationMethod,
        /// Do not write the test to disk.
        #[arg(long)]
        skip_save: bool,
        /// Print the layer summary.
        #[arg(long)]
        summary: bool,
    },
    /// Regenerate tensors of existing tests. The output is always regenerated.
    Regen {
        /// Target accelerator.
        #[arg(short, long)]
        accelerator: Accelerator,
        /// Tensors to regenerate (input, weight, scale, bias).
        tensors: Vec<TensorName>,
        /// Test directory; repeat for several.
        #[arg(short, long = "test-dir", required = true)]
        test_dirs: Vec<PathBuf>,
        /// Search the given directories for tests.
        #[arg(short, long)]
        recursive: bool,
        /// Generator seed.
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        /// Data generation method.
        #[arg(long, default_value = "random")]
        method: DataGenerationMethod,
    },
    /// Pack a test's weight for the accelerator's weight memory.
    Encode {
        /// Target accelerator.
        #[arg(short, long)]
        accelerator: Accelerator,
        /// Test directory.
        #[arg(short, long)]
        test_dir: PathBuf,
        /// Output file (default: <test-dir>/weight.bin).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration and list every violated rule.
    Check {
        /// Accelerator to check against (default: all).
        #[arg(short, long)]
        accelerator: Option<Accelerator>,
        /// Configuration file (.json or .toml).
        #[arg(short, long)]
        conf: PathBuf,
    },
    /// Print per-accelerator layout constants and limits.
    Info {
        /// Accelerator (default: all).
        accelerator: Option<Accelerator>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Test {
            accelerator,
            conf,
            test_dir,
            seed,
            method,
            skip_save,
            summary,
        } => cmd_test(accelerator, &conf, &test_dir, TestGenerator::new(seed, method), skip_save, summary)?,
        Cmd::Regen {
            accelerator,
            tensors,
            test_dirs,
            recursive,
            seed,
            method,
        } => {
            let generator = TestGenerator::new(seed, method);
            for dir in &test_dirs {
                if recursive {
                    regen_recursive(accelerator, dir, &tensors, generator)?;
                } else {
                    regen(accelerator, dir, &tensors, generator)?;
                }
            }
        }
        Cmd::Encode {
            accelerator,
            test_dir,
            output,
        } => cmd_encode(accelerator, &test_dir, output)?,
        Cmd::Check { accelerator, conf } => cmd_check(accelerator, &conf)?,
        Cmd::Info { accelerator } => cmd_info(accelerator),
    }

    Ok(())
}

fn cmd_test(
    accelerator: Accelerator,
    conf: &Path,
    test_dir: &Path,
    generator: TestGenerator,
    skip_save: bool,
    summary: bool,
) -> Result<()> {
    let conf = TestConfiguration::from_path(accelerator, conf)
        .with_context(|| format!("loading {}", conf.display()))?;
    let case = generator.from_config(conf, TestTensors::default())?;

    if !skip_save {
        case.save(test_dir)
            .with_context(|| format!("saving test to {}", test_dir.display()))?;
        println!("Generated {accelerator} test in {}", test_dir.display());
    }
    if summary {
        println!("{}", LayerSummary::from_case(&case)?);
    }
    Ok(())
}

fn regen(
    accelerator: Accelerator,
    dir: &Path,
    tensors: &[TensorName],
    generator: TestGenerator,
) -> Result<()> {
    let case = TestCase::load(accelerator, dir)
        .with_context(|| format!("loading test {}", dir.display()))?;
    let case = generator.regenerate(case, tensors)?;
    case.save(dir)?;
    println!("Regenerated {}", dir.display());
    Ok(())
}

fn regen_recursive(
    accelerator: Accelerator,
    dir: &Path,
    tensors: &[TensorName],
    generator: TestGenerator,
) -> Result<()> {
    if TestCase::is_test_dir(dir) {
        return regen(accelerator, dir, tensors, generator);
    }

    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    if subdirs.is_empty() {
        tracing::warn!("Skipping {}: no tests found", dir.display());
    }
    subdirs.sort();
    for sub in subdirs {
        regen_recursive(accelerator, &sub, tensors, generator)?;
    }
    Ok(())
}

fn cmd_encode(accelerator: Accelerator, test_dir: &Path, output: Option<PathBuf>) -> Result<()> {
    let case = TestCase::load(accelerator, test_dir)
        .with_context(|| format!("loading test {}", test_dir.display()))?;
    let packed = pack_weights(&case)?;
    let output = output.unwrap_or_else(|| test_dir.join("weight.bin"));
    packed.write_bin(&output)?;

    println!(
        "{} bytes of {}-bit weights {} -> {} ({}, section {})",
        packed.data.len(),
        packed.bits,
        packed.dims,
        output.display(),
        packed.wmem,
        packed.section()
    );
    Ok(())
}

fn cmd_check(accelerator: Option<Accelerator>, conf: &Path) -> Result<()> {
    let raw = RawTestConfiguration::from_path(conf)
        .with_context(|| format!("loading {}", conf.display()))?;
    let targets = accelerator.map_or_else(|| Accelerator::ALL.to_vec(), |a| vec![a]);

    let mut failed = 0;
    for accel in targets {
        let violations = nnx_golden::config::violations(accel, &raw);
        if violations.is_empty() {
            println!("{accel}: ok");
        } else {
            failed += 1;
            println!("{accel}: {} violation(s)", violations.len());
            for v in &violations {
                println!("  - {v}");
            }
        }
    }

    if failed > 0 {
        bail!("{} is invalid for {failed} accelerator(s)", conf.display());
    }
    Ok(())
}

fn cmd_info(accelerator: Option<Accelerator>) {
    let targets = accelerator.map_or_else(|| Accelerator::ALL.to_vec(), |a| vec![a]);

    for accel in targets {
        let limits = accel.limits();
        println!("{accel}");
        println!(
            "  cin subtile  : {} (1x1), {} (3x3)",
            cin_subtile(accel, 1),
            cin_subtile(accel, 3)
        );
        match weight_bandwidth(accel) {
            Some(bw) => println!("  weight port  : {bw} bits"),
            None => println!("  weight port  : dense"),
        }
        println!("  kernels      : {}", squares(limits.kernels));
        println!("  strides      : {}", squares(limits.strides));
        println!("  in types     : {}", limits.in_types.join(", "));
        println!("  out types    : {}", limits.out_types.join(", "));
        println!("  weight types : {}", limits.weight_types.join(", "));
        println!("  scale types  : {}", limits.scale_types.join(", "));
        println!("  bias types   : {}", limits.bias_types.join(", "));
        let wmem: Vec<String> = limits
            .weight_memories
            .iter()
            .map(|w: &WeightMemory| format!("{w} ({})", w.section()))
            .collect();
        println!("  weight mem   : {}", wmem.join(", "));
        println!();
    }
}

fn squares(sides: &[usize]) -> String {
    sides
        .iter()
        .map(|s| format!("{s}x{s}"))
        .collect::<Vec<_>>()
        .join(", ")
}
