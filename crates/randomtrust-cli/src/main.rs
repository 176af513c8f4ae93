//! CLI for randomtrust: mix noise with chaos, generate keystream, test it.

mod commands;

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};
use randomtrust_core::OutputFormat;
use uuid::Uuid;

use commands::{CommandError, OverrideArgs};

#[derive(Parser)]
#[command(name = "randomtrust")]
#[command(about = "randomtrust: hybrid noise and chaos entropy with a ChaCha20 stream generator")]
#[command(version = randomtrust_core::VERSION)]
struct Cli {
    /// Settings file (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize noise, drive the Lorenz system and store a mixed entropy seed
    Mix {
        /// Seed for the noise synthesizer (OS entropy when omitted)
        #[arg(long)]
        noise_seed: Option<u64>,

        #[command(flatten)]
        overrides: OverrideArgs,

        /// Also print the derived 32-byte seed as hex
        #[arg(long)]
        show_seed: bool,
    },

    /// Generate a new run of ChaCha20 output from fresh entropy
    Generate {
        /// Number of bytes to produce [1, 1000000]
        #[arg(long, value_parser = commands::parse_length)]
        length: usize,

        /// Output encoding
        #[arg(long, default_value = "hex", value_parser = ["hex", "ints"])]
        format: String,

        /// Seed for the noise synthesizer (OS entropy when omitted)
        #[arg(long)]
        noise_seed: Option<u64>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Export a stored run as '0'/'1' text
    ExportBits {
        /// Run id returned by `generate`
        #[arg(long)]
        run: Uuid,

        /// Refuse runs shorter than this many bits (settings default when omitted)
        #[arg(long)]
        min_bits: Option<usize>,

        /// Directory receiving {run_id}_bits.txt
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Store an externally produced hex sequence for later analysis
    #[command(group(ArgGroup::new("input").required(true).args(["hex", "file"])))]
    Audit {
        /// Label for the upload
        #[arg(long)]
        name: String,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,

        /// Sequence as hex
        #[arg(long)]
        hex: Option<String>,

        /// File containing the sequence as hex
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run the statistical battery over a run, an audit upload or raw hex
    #[command(group(ArgGroup::new("target").required(true).args(["run", "audit", "hex", "file"])))]
    Analyze {
        /// Stored run id
        #[arg(long)]
        run: Option<Uuid>,

        /// Stored audit upload id
        #[arg(long)]
        audit: Option<Uuid>,

        /// Inline hex sequence (not stored)
        #[arg(long)]
        hex: Option<String>,

        /// File containing a hex sequence (not stored)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Comma-separated test names (all when omitted)
        #[arg(long)]
        tests: Option<String>,
    },

    /// List the tests in the battery
    Tests,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<(), CommandError> {
    if let Commands::Tests = cli.command {
        commands::list_tests::run();
        return Ok(());
    }

    let (_settings, services) = commands::open_services(cli.config.as_deref())?;

    match cli.command {
        Commands::Mix {
            noise_seed,
            overrides,
            show_seed,
        } => {
            let overrides = overrides.resolve()?;
            commands::mix::run(&services, noise_seed, overrides.as_ref(), show_seed)
        }
        Commands::Generate {
            length,
            format,
            noise_seed,
            overrides,
        } => {
            let format: OutputFormat = format.parse()?;
            let overrides = overrides.resolve()?;
            commands::generate::run(
                &services,
                commands::generate::GenerateCommandConfig {
                    length,
                    format,
                    noise_seed,
                    overrides: overrides.as_ref(),
                },
            )
        }
        Commands::ExportBits {
            run,
            min_bits,
            output_dir,
        } => commands::export::run(&services, run, min_bits, &output_dir),
        Commands::Audit {
            name,
            description,
            hex,
            file,
        } => commands::audit::run(
            &services,
            &name,
            description.as_deref(),
            hex.as_deref(),
            file.as_deref(),
        ),
        Commands::Analyze {
            run,
            audit,
            hex,
            file,
            tests,
        } => {
            let tests = commands::parse_test_list(tests.as_deref());
            commands::analyze::run(
                &services,
                commands::analyze::AnalyzeTarget {
                    run,
                    audit,
                    hex: hex.as_deref(),
                    file: file.as_deref(),
                },
                tests.as_deref(),
            )
        }
        Commands::Tests => Ok(()),
    }
}
