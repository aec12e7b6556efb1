//! Command-line driver
//!
//! `run` decomposes a particle dataset over an in-process cluster and reports
//! what each rank ended up with; `generate` writes a uniform synthetic
//! dataset to feed it.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kernel::format::{self, FileFormat};
use kernel::{ByteOrder, ParticleRecord};
use orchestrator::{run_local, ReadMode, ReaderConfig, RankOutput};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Distribute particles over ranks and duplicate ghosts
    Run(RunArgs),
    /// Write a uniform random particle dataset
    Generate(GenerateArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON reader configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of in-process ranks
    #[arg(short, long, default_value_t = 1)]
    ranks: usize,

    /// Base path of the particle files (overrides the config)
    #[arg(long)]
    base_file: Option<String>,

    /// Side length of the periodic box (overrides the config)
    #[arg(long)]
    box_size: Option<f32>,

    /// Ghost margin (overrides the config)
    #[arg(long)]
    dead_size: Option<f32>,

    /// File layout (overrides the config)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Read rank r's own file `{base}.{r}` instead of rotating files
    #[arg(long)]
    one_to_one: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Base path of the files to write; file i is `{output}.{i}`
    #[arg(short, long)]
    output: PathBuf,

    /// Number of files
    #[arg(short, long, default_value_t = 1)]
    files: usize,

    /// Total number of particles
    #[arg(short, long, default_value_t = 10_000)]
    particles: usize,

    /// Side length of the periodic box
    #[arg(short, long, default_value_t = 100.0)]
    box_size: f32,

    /// File layout
    #[arg(long, value_enum, default_value_t = FormatArg::Record)]
    format: FormatArg,

    /// Write big-endian files
    #[arg(long)]
    big_endian: bool,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Record,
    Block,
}

impl From<FormatArg> for FileFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Record => FileFormat::Record,
            FormatArg::Block => FileFormat::Block,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cosmo_prep=info,orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::Generate(args) => generate(args),
    }
}

fn reader_config(args: &RunArgs) -> Result<ReaderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let path = path.to_str().context("config path is not valid UTF-8")?;
            ReaderConfig::load(path).map_err(anyhow::Error::msg)?
        }
        None => {
            let (Some(base), Some(box_size)) = (&args.base_file, args.box_size) else {
                bail!("either --config or both --base-file and --box-size are required");
            };
            ReaderConfig::new(base.clone(), box_size, args.dead_size.unwrap_or(0.0))
        }
    };

    if let Some(base) = &args.base_file {
        config.base_file = base.clone();
    }
    if let Some(box_size) = args.box_size {
        config.box_size = box_size;
    }
    if let Some(dead_size) = args.dead_size {
        config.dead_size = dead_size;
    }
    if let Some(format) = args.format {
        config.format = format.into();
    }
    if args.one_to_one {
        config.mode = ReadMode::OneToOne;
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    let config = reader_config(&args)?;
    tracing::info!(
        "Running {} ranks over {} (box {}, dead {})",
        args.ranks,
        config.base_file,
        config.box_size,
        config.dead_size
    );

    let outputs = run_local(args.ranks, &config).context("decomposition failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&outputs))?);
    } else {
        print_table(&outputs);
    }
    Ok(())
}

fn summary_json(outputs: &[RankOutput]) -> serde_json::Value {
    let ranks: Vec<_> = outputs
        .iter()
        .map(|o| {
            serde_json::json!({
                "rank": o.rank,
                "layout_pos": o.layout_pos,
                "min_alive": o.subdomain.min_alive,
                "max_alive": o.subdomain.max_alive,
                "alive": o.particles.alive_count(),
                "ghosts": o.particles.ghost_count(),
                "relocated_in": o.initial.as_ref().map(|s| s.relocated_in),
                "dropped": o.initial.as_ref().map(|s| s.dropped),
            })
        })
        .collect();

    let first = outputs.first();
    serde_json::json!({
        "ranks": ranks,
        "files": first.map(|o| o.distribute.files),
        "total_particles": first.map(|o| o.distribute.total_particles),
        "total_alive": first.map(|o| o.exchange.total_alive),
        "total_ghosts": first.map(|o| o.exchange.total_ghosts),
    })
}

fn print_table(outputs: &[RankOutput]) {
    println!(
        "{:>5}  {:>11}  {:>28}  {:>28}  {:>10}  {:>10}",
        "rank", "position", "min_alive", "max_alive", "alive", "ghosts"
    );
    for o in outputs {
        println!(
            "{:>5}  {:>11}  {:>28}  {:>28}  {:>10}  {:>10}",
            o.rank,
            format!("{:?}", o.layout_pos),
            format!("{:?}", o.subdomain.min_alive),
            format!("{:?}", o.subdomain.max_alive),
            o.particles.alive_count(),
            o.particles.ghost_count()
        );
    }
    if let Some(first) = outputs.first() {
        println!(
            "files: {}  particles: {}  alive: {}  ghosts: {}",
            first.distribute.files,
            first.distribute.total_particles,
            first.exchange.total_alive,
            first.exchange.total_ghosts
        );
    }
}

fn generate(args: GenerateArgs) -> Result<()> {
    if args.files == 0 {
        bail!("--files must be at least 1");
    }
    if !(args.box_size > 0.0) {
        bail!("--box-size must be positive");
    }
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut rng = match args.seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    let order = if args.big_endian { ByteOrder::Big } else { ByteOrder::Little };
    let file_format = FileFormat::from(args.format);

    let per_file = args.particles / args.files;
    let remainder = args.particles % args.files;
    let mut tag = 0i64;

    for i in 0..args.files {
        let count = per_file + usize::from(i < remainder);
        let records: Vec<ParticleRecord> = (0..count)
            .map(|_| {
                let position = [
                    rng.f32() * args.box_size,
                    rng.f32() * args.box_size,
                    rng.f32() * args.box_size,
                ];
                let velocity = [rng.f32() - 0.5, rng.f32() - 0.5, rng.f32() - 0.5];
                tag += 1;
                ParticleRecord::new(position, velocity, 1.0, tag - 1)
            })
            .collect();

        let path = numbered(&args.output, i);
        format::write_file(&path, file_format, order, &records, f64::from(args.box_size))
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!("Wrote {} particles to {}", count, path.display());
    }

    println!(
        "Generated {} particles in {} files at {}",
        args.particles,
        args.files,
        args.output.display()
    );
    Ok(())
}

fn numbered(base: &Path, index: usize) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "cosmo-prep", "run", "--ranks", "8", "--base-file", "snap", "--box-size", "64", "--dead-size", "2",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else { panic!("expected run") };
        let config = reader_config(&args).unwrap();
        assert_eq!(args.ranks, 8);
        assert_eq!(config.base_file, "snap");
        assert_eq!(config.box_size, 64.0);
        assert_eq!(config.dead_size, 2.0);
        assert_eq!(config.mode, ReadMode::RoundRobin);
    }

    #[test]
    fn run_without_config_needs_box() {
        let cli = Cli::try_parse_from(["cosmo-prep", "run", "--base-file", "snap"]).unwrap();
        let Command::Run(args) = cli.command else { panic!("expected run") };
        assert!(reader_config(&args).is_err());
    }

    #[test]
    fn generate_then_run_keeps_every_particle() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("snap");
        generate(GenerateArgs {
            output: base.clone(),
            files: 3,
            particles: 200,
            box_size: 10.0,
            format: FormatArg::Block,
            big_endian: false,
            seed: Some(7),
        })
        .unwrap();
        assert!(numbered(&base, 2).is_file());

        let mut config = ReaderConfig::new(base.to_str().unwrap(), 10.0, 1.0);
        config.format = FileFormat::Block;
        let outputs = run_local(4, &config).unwrap();
        let alive: usize = outputs.iter().map(|o| o.particles.alive_count()).sum();
        assert_eq!(alive, 200);
        assert_eq!(summary_json(&outputs)["total_particles"], 200);
    }
}
