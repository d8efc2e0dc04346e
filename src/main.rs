//! `peg`: the psychology experiment generator.
//!
//! - `validate`: check an authored trial table
//! - `compile`: write the self-contained browser experiment
//! - `run`: present the experiment natively (window or terminal)
//! - `sequence`: print one compiled trial sequence as JSON
//! - `convert`: rewrite an older table file in the current format

mod app;
mod console;
mod session;
mod telemetry;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use peg_core::{TrialInstance, TrialTable};
use peg_experiment::{RunConfig, compile, expected_len};
use peg_render::{ArtifactSettings, BrowserPayload, find_system_font, load_font, write_artifact};
use peg_table::{
    FormatVersion, ValidationError, ValidationOptions, load_table, save_table, validate_repetitions,
    validate_rows,
};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::{Level, info, warn};

use crate::app::App;
use crate::session::Session;

#[derive(Parser)]
#[command(name = "peg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Psychology experiment generator", long_about = None)]
struct Cli {
    /// Log debug detail
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a trial table and report every problem
    Validate {
        #[command(flatten)]
        table: TableArgs,
    },

    /// Compile a trial table into experiment.html
    Compile {
        #[command(flatten)]
        table: TableArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Page title
        #[arg(long, default_value = "Experiment")]
        title: String,

        /// Open the page in the default browser
        #[arg(long)]
        open: bool,
    },

    /// Present the experiment on this machine
    Run {
        #[command(flatten)]
        table: TableArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Use the terminal instead of a fullscreen window
        #[arg(long)]
        console: bool,

        /// TrueType font for the window (defaults to a system font)
        #[arg(long)]
        font: Option<PathBuf>,
    },

    /// Print one compiled sequence as JSON
    Sequence {
        #[command(flatten)]
        table: TableArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Rewrite a table file in the current column format
    Convert {
        input: PathBuf,
        output: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct TableArgs {
    /// Authored trial table (CSV)
    table: PathBuf,

    /// Times the whole sequence is repeated
    #[arg(short, long = "repeat", default_value = "1")]
    repeat: String,

    /// Directory stimulus images are loaded from
    #[arg(long, env = "PEG_IMAGE_DIR", default_value = "images")]
    images: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Keep sections in authored order
    #[arg(long)]
    no_randomize: bool,

    /// Seed for reproducible section shuffles
    #[arg(long)]
    seed: Option<u64>,

    /// POST results here first; saved locally if that fails
    #[arg(long, env = "PEG_SAVE_ENDPOINT")]
    save_endpoint: Option<String>,

    /// Where experiment.html and result files are written
    #[arg(short, long, env = "PEG_OUTPUT_DIR", default_value = ".")]
    out: PathBuf,

    /// Feedback duration for rows that leave it empty, in milliseconds
    #[arg(long, default_value_t = 1000)]
    feedback_ms: u64,

    /// Accept keys until the timeout on trials that also time out, instead of
    /// only during the first 50 ms after onset
    #[arg(long)]
    keep_keys_open: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { table } => {
            let (table_data, config) = prepare(&table, None)?;
            println!(
                "{}: {} blocks, {} trials, {} trials per run",
                table.table.display(),
                table_data.blocks().len(),
                table_data.trial_count(),
                expected_len(&table_data, config.repetitions)
            );
        }
        Commands::Compile {
            table,
            run,
            title,
            open,
        } => {
            let (table_data, config) = prepare(&table, Some(&run))?;
            let sequence = compile_sequence(&table_data, &config)?;
            let settings = ArtifactSettings {
                title,
                randomized: config.randomize_sections,
                repetitions: config.repetitions,
                save_endpoint: run.save_endpoint.clone(),
                default_feedback_ms: config.default_feedback_ms,
                key_grace_ms: config.key_grace_ms,
                image_base: image_base(&config.image_dir, &run.out),
            };
            let payload = BrowserPayload::new(&sequence, settings).context("failed to build the experiment page")?;
            let path = write_artifact(&run.out, &payload)?;
            println!("{}", path.display());
            if open {
                open_in_browser(&path)?;
            }
        }
        Commands::Run {
            table,
            run,
            console,
            font,
        } => {
            let (table_data, config) = prepare(&table, Some(&run))?;
            let sequence = compile_sequence(&table_data, &config)?;
            let session = Session {
                sequence,
                config,
                save_endpoint: run.save_endpoint.clone(),
                out_dir: run.out.clone(),
            };
            if console {
                console::run(session)?;
            } else {
                let font_path = font
                    .or_else(find_system_font)
                    .context("no usable system font found; pass one with --font")?;
                let font = load_font(&font_path)?;
                App::new(session, font)?.run()?;
            }
        }
        Commands::Sequence { table, run } => {
            let (table_data, config) = prepare(&table, Some(&run))?;
            let sequence = compile_sequence(&table_data, &config)?;
            println!("{}", serde_json::to_string_pretty(&sequence)?);
        }
        Commands::Convert { input, output } => {
            let loaded = load_table(&input).with_context(|| format!("failed to read {}", input.display()))?;
            save_table(&output, &loaded.rows).with_context(|| format!("failed to write {}", output.display()))?;
            info!(from = ?loaded.version, to = ?FormatVersion::CURRENT, rows = loaded.rows.len(), "table converted");
        }
    }

    Ok(())
}

/// Loads and validates a table. Every validation error is printed before the
/// command fails.
fn prepare(args: &TableArgs, run: Option<&RunArgs>) -> Result<(TrialTable, RunConfig)> {
    let loaded = load_table(&args.table).with_context(|| format!("failed to read {}", args.table.display()))?;
    if loaded.version != FormatVersion::CURRENT {
        warn!(version = ?loaded.version, "table uses an older column format; `peg convert` upgrades it");
    }

    let options = ValidationOptions {
        image_dir: args.images.clone(),
        check_images: true,
    };
    let mut errors: Vec<ValidationError> = Vec::new();
    let repetitions = validate_repetitions(&args.repeat).map_err(|e| errors.push(e)).ok();
    let table = validate_rows(&loaded.rows, &options)
        .map_err(|e| errors.extend(e.0))
        .ok();

    let (Some(repetitions), Some(table)) = (repetitions, table) else {
        for error in &errors {
            eprintln!("{error}");
        }
        bail!("{} validation error(s) in {}", errors.len(), args.table.display());
    };

    let mut config = RunConfig {
        repetitions,
        image_dir: args.images.clone(),
        ..RunConfig::default()
    };
    if let Some(run) = run {
        config.randomize_sections = !run.no_randomize;
        config.seed = run.seed;
        config.default_feedback_ms = run.feedback_ms;
        if run.keep_keys_open {
            config.key_grace_ms = None;
        }
    }
    Ok((table, config))
}

fn compile_sequence(table: &TrialTable, config: &RunConfig) -> Result<Vec<TrialInstance>> {
    let sequence = compile(table, config.compile_options(), &mut config.rng())?;
    Ok(sequence)
}

/// Image directory as the written page should reference it: relative to the
/// output directory when both resolve, otherwise as given.
fn image_base(image_dir: &Path, out_dir: &Path) -> String {
    let relative = match (image_dir.canonicalize(), out_dir.canonicalize()) {
        (Ok(images), Ok(out)) => relative_path(&images, &out),
        _ => image_dir.to_path_buf(),
    };
    relative.to_string_lossy().replace('\\', "/")
}

fn relative_path(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component> = target.components().collect();
    let base: Vec<Component> = base.components().collect();
    let shared = target.iter().zip(&base).take_while(|(a, b)| a == b).count();

    let mut relative = PathBuf::new();
    for _ in shared..base.len() {
        relative.push("..");
    }
    for part in &target[shared..] {
        relative.push(part.as_os_str());
    }
    relative
}

fn open_in_browser(path: &Path) -> Result<()> {
    let mut command = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]).arg(path);
        c
    } else if cfg!(target_os = "macos") {
        let mut c = Command::new("open");
        c.arg(path);
        c
    } else {
        let mut c = Command::new("xdg-open");
        c.arg(path);
        c
    };
    command
        .spawn()
        .with_context(|| format!("failed to open {} in a browser", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_fill_the_config() {
        let cli = Cli::try_parse_from([
            "peg",
            "run",
            "table.csv",
            "--repeat",
            "3",
            "--no-randomize",
            "--seed",
            "7",
            "--keep-keys-open",
            "--console",
        ])
        .unwrap();
        let Commands::Run { table, run, console, .. } = cli.command else {
            panic!("expected run");
        };
        assert!(console);
        assert_eq!(table.repeat, "3");
        assert!(run.no_randomize);
        assert_eq!(run.seed, Some(7));
        assert!(run.keep_keys_open);
    }

    #[test]
    fn key_window_closes_unless_kept_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        std::fs::write(
            &path,
            "Block,Block Repeats,Stimulus,Response,Latency,Correct Response,Feedback Text,Feedback Duration,Stimulus Color,Background Color\n\
             1,,A,f,1000,,,,,\n",
        )
        .unwrap();
        let table = TableArgs {
            table: path.clone(),
            repeat: "1".into(),
            images: dir.path().to_path_buf(),
        };

        let parse = |extra: &[&str]| {
            let mut args = vec!["peg", "run", "table.csv"];
            args.extend_from_slice(extra);
            let Commands::Run { run, .. } = Cli::try_parse_from(args).unwrap().command else {
                panic!("expected run");
            };
            run
        };

        let (_, config) = prepare(&table, Some(&parse(&[]))).unwrap();
        assert_eq!(config.key_grace_ms, Some(peg_core::KEY_GRACE_MS));
        let (_, config) = prepare(&table, Some(&parse(&["--keep-keys-open"]))).unwrap();
        assert_eq!(config.key_grace_ms, None);
    }

    #[test]
    fn relative_paths_climb_out_of_the_output_dir() {
        assert_eq!(
            relative_path(Path::new("/lab/study/images"), Path::new("/lab/study/out")),
            PathBuf::from("../images")
        );
        assert_eq!(
            relative_path(Path::new("/lab/study/images"), Path::new("/lab/study")),
            PathBuf::from("images")
        );
    }

    #[test]
    fn invalid_tables_report_every_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        std::fs::write(
            &path,
            "Block,Block Repeats,Stimulus,Response,Latency,Correct Response,Feedback Text,Feedback Duration,Stimulus Color,Background Color\n\
             x,,A,f,NA,,,,,\n\
             1,,B,NA,NA,,,,,\n",
        )
        .unwrap();
        let args = TableArgs {
            table: path,
            repeat: "0".into(),
            images: dir.path().to_path_buf(),
        };
        let err = prepare(&args, None).unwrap_err();
        assert!(err.to_string().starts_with("3 validation error(s)"), "{err}");
    }
}
