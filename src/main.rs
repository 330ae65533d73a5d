use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use echosync::audio::{compute_spectral_frames, load_wav};
use echosync::config::EngineConfig;
use echosync::db::Database;
use echosync::diagnostics::analyze_with;
use echosync::fingerprint::{FptEntry, fingerprint_frames};
use echosync::peaks::{SpectralFrame, detect_frames};
use echosync::visualize::save_peak_image;
use echosync::{CoarseToFineMatcher, OffsetVotingMatcher, ReverseIndex};

#[derive(Parser)]
#[command(
    name = "echosync",
    version,
    about = "Fingerprint audio and find where a capture sits in a reference"
)]
struct Cli {
    /// Path to the SQLite fingerprint store
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML engine config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint a reference recording and store it
    Index {
        /// WAV file to fingerprint
        wav: PathBuf,

        /// Name to store the reference under (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },

    /// Find where a live capture sits in a stored reference
    Match {
        /// WAV capture to match
        wav: PathBuf,

        /// Reference track name
        #[arg(long)]
        track: String,

        /// Use coarse-to-fine region search instead of a single global vote
        #[arg(long)]
        coarse: bool,

        /// Override the minimum confidence for a match
        #[arg(long)]
        min_confidence: Option<f64>,
    },

    /// Print a match-quality report for a capture against a reference
    Diagnose {
        /// WAV capture to analyze
        wav: PathBuf,

        /// Reference track name
        #[arg(long)]
        track: String,

        /// Ignore hashes occurring more often than this in the reference
        #[arg(long)]
        max_hash_occurrence: Option<usize>,
    },

    /// Detect peaks and dump them over the spectrogram
    Peaks {
        /// WAV file to analyze
        wav: PathBuf,

        /// Output image (PNG)
        #[arg(long, default_value = "peaks.png")]
        image: PathBuf,
    },

    /// List stored reference tracks
    Tracks,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.verbose > 0 {
        let level = match cli.verbose {
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        logger.filter_level(level);
    }
    logger.init();

    let config = EngineConfig::load_or_default(cli.config.as_deref());
    let db_path = cli
        .db
        .unwrap_or_else(|| PathBuf::from(format!("{}.db", echosync::APP_NAME)));

    match cli.command {
        Commands::Index { wav, name } => {
            let name = match name {
                Some(name) => name,
                None => wav
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("Cannot derive a track name from the file name; pass --name")?
                    .to_string(),
            };
            let entries = fingerprint_file(&wav, &config)?;
            let mut db = open_db(&db_path)?;
            db.store_track(&name, &entries)
                .with_context(|| format!("Failed to store '{name}'"))?;
            println!(
                "Indexed '{}': {} entries, {} hashes",
                name,
                entries.len(),
                entries.iter().map(|e| e.hashes.len()).sum::<usize>()
            );
        }

        Commands::Match {
            wav,
            track,
            coarse,
            min_confidence,
        } => {
            let reference = load_reference(&db_path, &track)?;
            let live = fingerprint_file(&wav, &config)?;
            let mut matching = config.matching.clone();
            if let Some(min_confidence) = min_confidence {
                matching.min_confidence = min_confidence.clamp(0.0, 1.0);
            }
            let result = if coarse {
                CoarseToFineMatcher::from_config(&matching).find_match(&live, &reference)
            } else {
                OffsetVotingMatcher::from_config(&matching).find_match(&live, &reference)
            };
            println!("{result}");
        }

        Commands::Diagnose {
            wav,
            track,
            max_hash_occurrence,
        } => {
            let reference = load_reference(&db_path, &track)?;
            let live = fingerprint_file(&wav, &config)?;
            let cap = max_hash_occurrence.unwrap_or(config.diagnostics.max_hash_occurrence);
            print!("{}", analyze_with(&live, &reference, cap));
        }

        Commands::Peaks { wav, image } => {
            let frames = spectral_frames(&wav, &config)?;
            let peaks = detect_frames(&frames, &config.peaks);
            println!("Found {} peaks over {} frames", peaks.len(), frames.len());
            save_peak_image(&frames, &peaks, &image)
                .with_context(|| format!("Failed to write {}", image.display()))?;
        }

        Commands::Tracks => {
            let db = open_db(&db_path)?;
            let tracks = db.list_tracks()?;
            if tracks.is_empty() {
                println!("No tracks indexed in {}", db_path.display());
            }
            for track in tracks {
                println!("{:>4}  {:<40} {} entries", track.track_id, track.name, track.entry_count);
            }
        }
    }

    Ok(())
}

fn open_db(path: &Path) -> Result<Database> {
    log::info!("Database: {}", path.display());
    Database::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn spectral_frames(wav: &Path, config: &EngineConfig) -> Result<Vec<SpectralFrame>> {
    let audio = load_wav(wav, config.audio.sample_rate)
        .with_context(|| format!("Failed to load {}", wav.display()))?;
    log::info!(
        "Loaded {} ({:.1}s at {} Hz)",
        wav.display(),
        audio.duration_secs(),
        audio.sample_rate
    );
    Ok(compute_spectral_frames(
        &audio.samples,
        audio.sample_rate,
        config.audio.window_size,
        config.audio.hop_size,
    ))
}

fn fingerprint_file(wav: &Path, config: &EngineConfig) -> Result<Vec<FptEntry>> {
    let frames = spectral_frames(wav, config)?;
    let entries = fingerprint_frames(&frames, &config.peaks, &config.pairing);
    log::info!("{}: {} fingerprint entries", wav.display(), entries.len());
    Ok(entries)
}

fn load_reference(db_path: &Path, track: &str) -> Result<ReverseIndex> {
    let db = open_db(db_path)?;
    let track_id = db.require_track(track)?;
    let entries = db.load_entries(track_id)?;
    Ok(ReverseIndex::build(&entries))
}
