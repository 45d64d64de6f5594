//! MegaHAL CLI: interactive conversational chatbot.
//!
//! Thin wrapper over the `megahal` library crate.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use megahal::{
    BrainConfig, BrainError, DumpFlags, GenerationLimit, KeywordConfig, LockPolicy, MegaHal,
    SwapTable, load_swap_file, load_word_list,
};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// MegaHAL: a conversational chatbot using bidirectional Markov chains.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Model order (tree depth). Ignored when an existing brain is loaded.
    #[arg(
        long,
        default_value_t = 5,
        value_parser = clap::value_parser!(u8).range(1..)
    )]
    order: u8,

    /// Node budget across both trees; older memories are pruned beyond it.
    #[arg(long, default_value_t = 100_000)]
    node_budget: usize,

    /// Rows in the keyword correlation matrix.
    #[arg(long, default_value_t = 512)]
    crosstab_capacity: usize,

    /// PRNG seed for reproducible output.
    #[arg(long)]
    seed: Option<u64>,

    /// Training file path.
    #[arg(long)]
    train: Option<PathBuf>,

    /// Directory containing support files (megahal.ban, .aux, .grt, .swp).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Brain file: loaded at startup if present, saved on exit.
    #[arg(long)]
    brain: Option<PathBuf>,

    /// Give up waiting for another process's lock on the brain after this
    /// many milliseconds. Waits forever when absent.
    #[arg(long)]
    lock_wait_ms: Option<u64>,

    /// Write a human-readable dump of the model here on exit.
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Generation timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Maximum generation iterations (0 = no limit).
    #[arg(long, default_value_t = 0)]
    max_iterations: usize,

    /// Log debug output to stderr.
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("brain: {0}")]
    Brain(#[from] BrainError),
}

impl Args {
    fn limit(&self) -> GenerationLimit {
        match (self.timeout_ms, self.max_iterations) {
            (ms, 0) => GenerationLimit::Timeout(Duration::from_millis(ms)),
            (0, n) => GenerationLimit::Iterations(n),
            (ms, n) => GenerationLimit::Both {
                timeout: Duration::from_millis(ms),
                max_iterations: n,
            },
        }
    }

    fn config(&self) -> BrainConfig {
        BrainConfig {
            order: self.order,
            node_budget: self.node_budget,
            crosstab_capacity: self.crosstab_capacity,
            limit: self.limit(),
            lock: LockPolicy {
                max_wait: self.lock_wait_ms.map(Duration::from_millis),
                ..LockPolicy::default()
            },
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_support_files(hal: &mut MegaHal<SmallRng>, dir: &std::path::Path) {
    let mut config = KeywordConfig::default();

    match load_word_list(&dir.join("megahal.ban")) {
        Ok(words) => config.banned = words.into_iter().collect(),
        Err(e) => warn!(error = %e, "no banned word list"),
    }
    match load_word_list(&dir.join("megahal.aux")) {
        Ok(words) => config.auxiliary = words.into_iter().collect(),
        Err(e) => warn!(error = %e, "no auxiliary word list"),
    }
    match load_swap_file(&dir.join("megahal.swp")) {
        Ok(pairs) => config.swap = SwapTable { pairs },
        Err(e) => warn!(error = %e, "no swap table"),
    }
    match load_word_list(&dir.join("megahal.grt")) {
        Ok(words) => hal.set_greetings(words),
        Err(e) => warn!(error = %e, "no greeting list"),
    }

    hal.set_keyword_config(config);
}

fn run(args: Args) -> Result<(), CliError> {
    let seed = args.seed.unwrap_or_else(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    });
    info!(seed, "starting");

    let rng = SmallRng::seed_from_u64(seed);
    let mut hal = MegaHal::with_config(args.config(), rng);

    // Load support files if data directory specified.
    if let Some(ref dir) = args.data_dir {
        load_support_files(&mut hal, dir);
    }

    if let Some(ref path) = args.brain
        && path.exists()
    {
        eprintln!("Loading brain from {}...", path.display());
        hal.load_brain(path)?;
        eprintln!("Brain loaded.");
    }

    // Train from file if specified.
    if let Some(ref path) = args.train {
        eprintln!("Training from {}...", path.display());
        hal.train_from_file(path)?;
        eprintln!("Training complete.");
    }

    // Initial greeting.
    let greeting = hal.greet();
    println!("MegaHAL: {greeting}");

    // Conversation loop.
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            break;
        }

        let reply = hal.respond(trimmed);
        writeln!(stdout, "MegaHAL: {reply}")?;
        stdout.flush()?;
    }

    if let Some(ref path) = args.dump {
        hal.dump(path, DumpFlags::default())?;
        eprintln!("Model dumped to {}.", path.display());
    }

    if let Some(ref path) = args.brain {
        eprintln!("Saving brain to {}...", path.display());
        hal.save_brain(path)?;
        eprintln!("Brain saved.");
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "megahal failed");
            eprintln!("megahal: {e}");
            ExitCode::FAILURE
        }
    }
}
