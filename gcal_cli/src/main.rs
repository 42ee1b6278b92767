//! gcal - cortical map simulation driver
//!
//! Usage: `gcal <config.json> <seed> <mode> <intype> [weights]`
//!
//! - mode: 0 headless, 1 observed (per-cycle log), 2 single snapshot
//! - intype: 0 synthetic blobs, 1 pre-loaded patterns, 2 live capture,
//!   anything else random frames
//!
//! Each block maps orientation preference, runs `steps` cycles and saves
//! `weights_<time>.gcal` under the configured log path.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use gcal::config::{ModelConfig, Params};
use gcal::error::{ConfigError, PersistenceError, StimulusError};
use gcal::hexgrid::HexGrid;
use gcal::network::Network;
use gcal::observer::{NetworkAdapter, NetworkSnapshot, ProjectionSnapshot};
use gcal::prng::Prng;
use gcal::stimulus::{CartesianSampler, InputKind, InputSource};
use gcal::store::MemoryStore;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Headless,
    Observed,
    Snapshot,
}

#[derive(Debug)]
struct Args {
    config: PathBuf,
    seed: u64,
    mode: Mode,
    input: InputKind,
    weights: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum RunError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stimulus(#[from] StimulusError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl RunError {
    fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => 1,
            RunError::Usage(_) => 2,
            RunError::Stimulus(_) => 3,
            RunError::Persistence(_) => 4,
        }
    }
}

#[derive(Serialize)]
struct SnapshotFile {
    seed: u64,
    network: NetworkSnapshot,
    projections: Vec<ProjectionSnapshot>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let argv: Vec<String> = std::env::args().collect();
    if argv.len() >= 2 && (argv[1] == "--help" || argv[1] == "-h" || argv[1] == "help") {
        print_help();
        return ExitCode::SUCCESS;
    }

    let result = parse_args(&argv).and_then(|args| run(&args));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            if matches!(e, RunError::Usage(_)) {
                print_help();
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn print_help() {
    eprintln!("usage: gcal <config.json> <seed> <mode> <intype> [weights]");
    eprintln!("  mode:   0 headless, 1 observed, 2 single snapshot");
    eprintln!("  intype: 0 synthetic, 1 pre-loaded, 2 live, other: random");
}

fn parse_args(argv: &[String]) -> Result<Args, RunError> {
    if !(5..=6).contains(&argv.len()) {
        return Err(RunError::Usage(format!(
            "expected 4 or 5 arguments, got {}",
            argv.len().saturating_sub(1)
        )));
    }
    let seed = argv[2]
        .parse::<u64>()
        .map_err(|_| RunError::Usage(format!("seed must be an unsigned integer: {}", argv[2])))?;
    let mode = match argv[3].as_str() {
        "0" => Mode::Headless,
        "1" => Mode::Observed,
        "2" => Mode::Snapshot,
        other => return Err(RunError::Usage(format!("unknown mode: {other}"))),
    };
    let input = argv[4]
        .parse::<u32>()
        .map(InputKind::from_selector)
        .map_err(|_| RunError::Usage(format!("input type must be an integer: {}", argv[4])))?;
    Ok(Args {
        config: PathBuf::from(&argv[1]),
        seed,
        mode,
        input,
        weights: argv.get(5).map(PathBuf::from),
    })
}

fn run(args: &Args) -> Result<(), RunError> {
    let cfg = ModelConfig::from_path(&args.config)?;
    let params = Params::from_config(&cfg)?;
    info!(config = %args.config.display(), seed = args.seed, mode = ?args.mode, input = ?args.input, "starting");

    let grid = HexGrid::disc(params.grid.spacing, params.grid.radius);
    let mut rng = Prng::new(args.seed);
    let mut net = Network::gcal(&params, grid.clone(), grid.clone(), &mut rng)?;
    let mut source = build_source(args.input, &params, &cfg, &grid, rng.fork())?;

    if let Some(path) = &args.weights {
        let store = MemoryStore::load_from_path(path)?;
        net.load(&store)?;
    }

    let logpath = PathBuf::from(&cfg.logpath);
    fs::create_dir_all(&logpath).map_err(PersistenceError::from)?;

    if args.mode == Mode::Snapshot {
        net.map();
        net.step_afferent(&mut source)?;
        net.step_cortex();
        write_snapshot(&net, args.seed, &logpath.join("snapshot.json"))?;
        return Ok(());
    }

    for block in 0..params.blocks {
        net.map();
        for _ in 0..params.steps {
            net.step_afferent(&mut source)?;
            net.step_cortex();
            if args.mode == Mode::Observed {
                log_cycle(&net);
            }
        }
        save_weights(&net, &logpath)?;
        info!(block, time = net.time(), "block complete");
    }
    Ok(())
}

fn build_source(
    kind: InputKind,
    params: &Params,
    cfg: &ModelConfig,
    grid: &HexGrid,
    rng: Prng,
) -> Result<InputSource, StimulusError> {
    let source = match kind {
        InputKind::SyntheticBlob => InputSource::synthetic(params.blob, rng),
        InputKind::Preloaded => {
            let store = MemoryStore::load_from_path(Path::new(&cfg.patterns))?;
            InputSource::preloaded(CartesianSampler::new(grid, &params.sampler), &store)?
        }
        InputKind::Live => {
            return Err(StimulusError::LiveUnavailable(
                "no capture backend compiled into this build".into(),
            ))
        }
        InputKind::RandomFallback => {
            InputSource::random(CartesianSampler::new(grid, &params.sampler), rng)
        }
    };
    info!(kind = ?source.kind(), "input source ready");
    Ok(source)
}

fn log_cycle(net: &Network) {
    let snap = NetworkAdapter::new(net).snapshot();
    let n = snap.cortex.len().max(1) as f64;
    let mean = snap.cortex.iter().sum::<f64>() / n;
    let peak = snap.cortex.iter().cloned().fold(0.0, f64::max);
    let theta = snap.theta.iter().sum::<f64>() / n;
    info!(
        time = snap.time,
        mean_activity = mean,
        peak_activity = peak,
        mean_theta = theta,
        degenerate = snap.degenerate_last_cycle,
        "cycle"
    );
}

fn save_weights(net: &Network, dir: &Path) -> Result<(), PersistenceError> {
    let mut store = MemoryStore::new();
    net.save(&mut store)?;
    let path = dir.join(format!("weights_{}.gcal", net.time()));
    store.save_to_path(&path)?;
    info!(path = %path.display(), "weights saved");
    Ok(())
}

fn write_snapshot(net: &Network, seed: u64, path: &Path) -> Result<(), PersistenceError> {
    let adapter = NetworkAdapter::new(net);
    let file = SnapshotFile {
        seed,
        network: adapter.snapshot(),
        projections: adapter.projection_snapshots(),
    };
    let out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(out, &file).map_err(std::io::Error::from)?;
    info!(path = %path.display(), "snapshot written");
    Ok(())
}
