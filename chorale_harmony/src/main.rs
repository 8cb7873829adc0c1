// Chorale harmonizer CLI entry point.
//
// Voices a progression given on the command line (or as a JSON request),
// prints the voicing with note names and its cost vector, and optionally
// writes MIDI.
//
// Usage:
//   cargo run -p chorale_harmony --bin generate -- --tonic C --mode major \
//     --chords 0:0 3:0 4:1:dom7 0:0 [--config cfg.json] [--timeout-ms N] \
//     [--all N] [--output out.mid]
//   cargo run -p chorale_harmony --bin generate -- --progression prog.json
//
// Chord tokens are degree:state[:quality], degrees 0-6, states 0-3 or
// fundamental/first/second/third. Set RUST_LOG=debug for search details.

use std::path::PathBuf;
use std::process::ExitCode;

use chorale_harmony::midi::write_midi;
use chorale_harmony::tonality::parse_pitch_class;
use chorale_harmony::{
    HarmonizationRequest, Harmonizer, HarmonyConfig, HarmonyError, Mode, Progression, Tonality,
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

/// Four-voice chorale harmonizer
#[derive(Parser, Debug)]
#[command(name = "generate", version, about)]
struct Args {
    /// Tonic, as a note name (C, F#, Bb) or pitch class 0-11
    #[arg(long, default_value = "C")]
    tonic: String,

    /// major or minor
    #[arg(long, default_value = "major")]
    mode: Mode,

    /// Chords as degree:state[:quality]
    #[arg(long, num_args = 1.., value_name = "CHORD")]
    chords: Vec<String>,

    /// JSON request with tonic, mode and chords (overrides the above)
    #[arg(long)]
    progression: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Search budget in milliseconds (0 for no limit)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// List up to N valid voicings instead of optimizing
    #[arg(long, value_name = "N")]
    all: Option<usize>,

    /// Write the best voicing to this MIDI file
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), HarmonyError> {
    let mut config = match &args.config {
        Some(path) => HarmonyConfig::load(path)?,
        None => HarmonyConfig::default(),
    };
    if let Some(ms) = args.timeout_ms {
        config.search.timeout_ms = (ms > 0).then_some(ms);
    }

    let (key, progression) = match &args.progression {
        Some(path) => {
            let request = HarmonizationRequest::load(path)?;
            (request.tonality()?, request.progression())
        }
        None => (
            Tonality::new(parse_tonic(&args.tonic)?, args.mode)?,
            Progression::parse(&args.chords)?,
        ),
    };

    println!("=== Chorale Harmonizer ===");
    println!("Key: {key}");
    println!("Chords: {}", progression.len());
    println!();

    let harmonizer = Harmonizer::new(&key, &progression, config)?;

    if let Some(max) = args.all {
        // A budget that runs out before the first voicing is already a
        // Timeout error here; empty means the tree was exhausted.
        let voicings = harmonizer.all(max)?;
        if voicings.is_empty() {
            return Err(HarmonyError::InfeasibleProgression);
        }
        for (i, scored) in voicings.iter().enumerate() {
            println!("--- Voicing {} ({})", i + 1, scored.cost);
            print!("{}", scored.voicing.summary());
        }
        return Ok(());
    }

    let result = harmonizer.best()?;
    print!("{}", result.voicing.summary());
    println!();
    println!("Cost: {}", result.cost);
    if !result.proven_optimal {
        println!("(time budget ran out; not proven optimal)");
    }
    println!(
        "Search: {} nodes, {} failures, {} solutions, {} ms",
        result.stats.nodes, result.stats.failures, result.stats.solutions, result.stats.elapsed_ms
    );
    for (i, alt) in result.alternatives.iter().enumerate() {
        println!("Alternative {}: {}", i + 1, alt.cost);
    }

    if let Some(path) = &args.output {
        write_midi(&result.voicing, harmonizer.config(), path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn parse_tonic(text: &str) -> Result<u8, HarmonyError> {
    match text.parse::<u8>() {
        Ok(pc) => Ok(pc),
        Err(_) => parse_pitch_class(text),
    }
}
