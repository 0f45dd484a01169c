use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use remix_core::{CacheStore, LoopRegion, RemixConfig, Session, SessionEvent, StemKind};
use std::{
    path::{Path, PathBuf},
    process, thread,
    time::Duration,
};

const DEFAULT_OUTPUT_RATE: u32 = 44_100;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "remix")]
#[command(about = "Separate songs into stems, cache them and mix them down", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigOverrides {
    /// Stem cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Program used to launch the separation engine
    #[arg(long, global = true)]
    engine_program: Option<String>,

    /// Separation engine script (first engine argument)
    #[arg(long, global = true)]
    engine_script: Option<String>,
}

#[derive(Args)]
struct MixArgs {
    /// Stem gain, e.g. `drums=0.5`
    #[arg(long = "gain", value_name = "STEM=GAIN")]
    gains: Vec<String>,

    /// Stem pan, e.g. `bass=-0.3`
    #[arg(long = "pan", value_name = "STEM=PAN")]
    pans: Vec<String>,

    #[arg(long, value_name = "STEM")]
    solo: Vec<String>,

    #[arg(long, value_name = "STEM")]
    mute: Vec<String>,

    /// Loop region in seconds, e.g. `10:15`
    #[arg(long, value_name = "START:END")]
    region: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Separate a file into stems (served from cache when possible)
    Analyze {
        input: PathBuf,

        /// Run the engine even if a cache entry exists
        #[arg(short, long)]
        force: bool,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Render a mixdown of the file's stems
    Mixdown {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        mix: MixArgs,
    },

    /// Play the stems on the default output device
    Play {
        input: PathBuf,

        #[command(flatten)]
        mix: MixArgs,

        /// Loop the whole file when no region is set
        #[arg(long = "loop")]
        looping: bool,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Inspect or clear the stem cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the learned processing rate
    Rate,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached files
    List,
    /// Remove the cache entry of one file
    Clear { input: PathBuf },
    /// Remove every cache entry
    ClearAll,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let result = load_config(&cli.overrides).and_then(|config| match cli.command {
        Commands::Analyze {
            input,
            force,
            quiet,
        } => handle_analyze(config, input, force, quiet),
        Commands::Mixdown { input, output, mix } => handle_mixdown(config, input, output, mix),
        Commands::Play {
            input,
            mix,
            looping,
            seconds,
        } => handle_play(config, input, mix, looping, seconds),
        Commands::Cache { action } => handle_cache(config, action),
        Commands::Rate => handle_rate(config),
    });

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn load_config(overrides: &ConfigOverrides) -> CliResult<RemixConfig> {
    let mut config = RemixConfig::from_env()?;
    if let Some(dir) = &overrides.cache_dir {
        config.cache_root = dir.clone();
    }
    if let Some(program) = &overrides.engine_program {
        config.engine.program = program.clone();
    }
    if let Some(script) = &overrides.engine_script {
        if let Some(first) = config.engine.args.first_mut() {
            *first = script.clone();
        }
    }
    Ok(config)
}

fn handle_analyze(config: RemixConfig, input: PathBuf, force: bool, quiet: bool) -> CliResult<()> {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }
    let cache_root = config.cache_root.clone();
    let mut session = Session::with_defaults(config, DEFAULT_OUTPUT_RATE);

    if !quiet {
        eprintln!("🎵 Remix");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("Input: {}", input.display());
        eprintln!("Cache: {}", cache_root.display());
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!();
    }

    let cached = session.open(&input)?;
    if cached && !force {
        if !quiet {
            eprintln!("⚡ Loaded from cache");
        }
    } else {
        analyze_blocking(&mut session, quiet)?;
    }

    let key = session
        .cache_key()
        .cloned()
        .ok_or("no cache key for input")?;
    let store = CacheStore::new(cache_root);
    let files = store.load_stem_paths(&key).unwrap_or_default();
    if !quiet {
        eprintln!();
        eprintln!("✅ Stems ready ({})", key);
        eprintln!();
        for f in &files {
            eprintln!("  {} {:<7} {}", stem_icon(f.kind), f.kind.display_name(), f.path.display());
        }
    } else {
        for f in &files {
            println!("{}", f.path.display());
        }
    }
    Ok(())
}

/// Run an analysis and pump events until it ends.
fn analyze_blocking(session: &mut Session, quiet: bool) -> CliResult<()> {
    session.analyze()?;
    loop {
        for event in session.poll_events() {
            match event {
                SessionEvent::Progress {
                    fraction,
                    remaining_secs,
                    ..
                } => {
                    if !quiet {
                        eprint!(
                            "\r🔄 Separating: {:>3.0}% (~{:.0}s left)   ",
                            fraction * 100.0,
                            remaining_secs
                        );
                    }
                }
                SessionEvent::AnalysisFinished { stems, .. } => {
                    if !quiet {
                        eprintln!();
                        eprintln!("🎚️  {} stems separated", stems);
                    }
                    return Ok(());
                }
                SessionEvent::AnalysisFailed { message, detail } => {
                    if !quiet {
                        eprintln!();
                    }
                    if let Some(detail) = detail {
                        eprintln!("{}", detail);
                    }
                    return Err(message.into());
                }
                SessionEvent::AnalysisCancelled => return Err("analysis cancelled".into()),
                _ => {}
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Open `input`, separating it first when nothing is cached.
fn open_ready(session: &mut Session, input: &Path) -> CliResult<()> {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }
    if !session.open(input)? {
        eprintln!("⏳ No cached stems, separating first");
        analyze_blocking(session, false)?;
    }
    Ok(())
}

fn apply_mix(session: &mut Session, mix: &MixArgs) -> CliResult<()> {
    for spec in &mix.gains {
        let (i, v) = stem_value(session, spec)?;
        session.set_gain(i, v);
    }
    for spec in &mix.pans {
        let (i, v) = stem_value(session, spec)?;
        session.set_pan(i, v);
    }
    for name in &mix.solo {
        let i = stem_index(session, name)?;
        session.set_solo(i, true);
    }
    for name in &mix.mute {
        let i = stem_index(session, name)?;
        session.set_mute(i, true);
    }
    if let Some(region) = &mix.region {
        session.set_region(Some(parse_region(region)?));
    }
    Ok(())
}

fn handle_mixdown(
    config: RemixConfig,
    input: PathBuf,
    output: PathBuf,
    mix: MixArgs,
) -> CliResult<()> {
    let mut session = Session::with_defaults(config, DEFAULT_OUTPUT_RATE);
    open_ready(&mut session, &input)?;
    apply_mix(&mut session, &mix)?;

    eprintln!("💾 Rendering mixdown to {}", output.display());
    session.export_mixdown(&output)?;
    loop {
        for event in session.poll_events() {
            match event {
                SessionEvent::MixdownFinished { path, peak } => {
                    eprintln!("✅ Mixdown written: {} (peak {:.3})", path.display(), peak);
                    return Ok(());
                }
                SessionEvent::MixdownFailed { message } => return Err(message.into()),
                _ => {}
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(feature = "playback")]
fn handle_play(
    config: RemixConfig,
    input: PathBuf,
    mix: MixArgs,
    looping: bool,
    seconds: Option<f64>,
) -> CliResult<()> {
    use remix_core::{AudioOutput, PlaybackState};

    let format = AudioOutput::probe_default()?;
    let mut session = Session::with_defaults(config, format.sample_rate);
    open_ready(&mut session, &input)?;
    apply_mix(&mut session, &mix)?;
    session.set_loop_enabled(looping);

    let renderer = session
        .take_renderer()
        .ok_or("playback renderer already taken")?;
    let output = AudioOutput::start(renderer)?;
    eprintln!(
        "▶️  Playing on {} ({} Hz)",
        output.device_name(),
        output.format().sample_rate
    );

    session.play();
    let started = std::time::Instant::now();
    loop {
        let snapshot = session.tick();
        let levels = session.meter_levels();
        let meters: String = levels
            .iter()
            .map(|l| match (l * 8.0) as usize {
                0 => ' ',
                1..=2 => '▁',
                3..=4 => '▃',
                5..=6 => '▅',
                _ => '█',
            })
            .collect();
        eprint!(
            "\r⏱️  {:>7.2}s / {:.2}s [{}]",
            snapshot.position, snapshot.duration, meters
        );
        if snapshot.state == PlaybackState::Stopped {
            break;
        }
        if seconds.is_some_and(|s| started.elapsed().as_secs_f64() >= s) {
            session.stop();
            break;
        }
        thread::sleep(Duration::from_millis(30));
    }
    eprintln!();
    eprintln!("⏹️  Stopped");
    Ok(())
}

#[cfg(not(feature = "playback"))]
fn handle_play(
    _config: RemixConfig,
    _input: PathBuf,
    _mix: MixArgs,
    _looping: bool,
    _seconds: Option<f64>,
) -> CliResult<()> {
    Err("playback support not compiled in (enable the `playback` feature)".into())
}

fn handle_cache(config: RemixConfig, action: CacheAction) -> CliResult<()> {
    let store = CacheStore::new(config.cache_root);
    match action {
        CacheAction::List => {
            let entries = store.entries();
            eprintln!("📋 Cached files ({})", entries.len());
            eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            for (key, meta) in entries {
                eprintln!(
                    "  • {}  {}  {:.1}s  [{}]",
                    key,
                    meta.original_path,
                    meta.duration,
                    meta.stem_names.join(", ")
                );
            }
        }
        CacheAction::Clear { input } => {
            let key = store.key_for_path(&input)?;
            store.clear(&key);
            if store.has_valid_cache(&key) {
                return Err(format!("cache entry {} could not be removed", key).into());
            }
            eprintln!("🗑️  Cleared cache entry {}", key);
        }
        CacheAction::ClearAll => {
            store.clear_all();
            eprintln!("🗑️  Cleared {}", store.root().display());
        }
    }
    Ok(())
}

fn handle_rate(config: RemixConfig) -> CliResult<()> {
    let session = Session::with_defaults(config, DEFAULT_OUTPUT_RATE);
    let rate = session.estimator().rate();
    eprintln!("⏱️  Processing rate: {:.2} min per audio minute", rate);
    eprintln!(
        "   A 3-minute song takes about {:.0}s",
        session.estimator().estimate_total(180.0)
    );
    Ok(())
}

fn stem_icon(kind: StemKind) -> &'static str {
    match kind {
        StemKind::Drums => "🥁",
        StemKind::Bass => "🎸",
        StemKind::Guitar => "🎸",
        StemKind::Piano => "🎹",
        StemKind::Vocals => "🎤",
        StemKind::Other => "🎶",
    }
}

fn stem_index(session: &Session, name: &str) -> CliResult<usize> {
    let kind = StemKind::resolve(name).ok_or_else(|| format!("unknown stem: {}", name))?;
    session
        .stem_kinds()
        .iter()
        .position(|k| *k == kind)
        .ok_or_else(|| format!("stem {} not present", kind.display_name()).into())
}

fn stem_value(session: &Session, spec: &str) -> CliResult<(usize, f32)> {
    let (name, value) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected STEM=VALUE, got {}", spec))?;
    let value: f32 = value.trim().parse()?;
    Ok((stem_index(session, name)?, value))
}

fn parse_region(s: &str) -> CliResult<LoopRegion> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got {}", s))?;
    Ok(LoopRegion::new(start.trim().parse()?, end.trim().parse()?))
}
