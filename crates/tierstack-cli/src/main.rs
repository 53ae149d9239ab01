use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tierstack",
    about = "tierstack — three-tier web stacks as declarative templates",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter stack.toml for the reference deployment
    Init {
        /// Stack name; prefixes every physical resource name
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "stack.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Compose the stack and report what it declares.
    ///
    /// Account and region come from stack.toml or from TIERSTACK_ACCOUNT /
    /// TIERSTACK_REGION; composition fails when either is missing.
    Validate {
        #[arg(short, long, default_value = "stack.toml")]
        config: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Synthesize the deployment template
    Synth {
        #[arg(short, long, default_value = "stack.toml")]
        config: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Replay a CPU trace against the configured scaling policy
    Simulate {
        #[arg(short, long, default_value = "stack.toml")]
        config: PathBuf,
        /// CPU percentages, one per metric period (e.g. "40,75,90,20")
        #[arg(short, long)]
        trace: Option<String>,
        /// File with CPU percentages separated by commas or whitespace
        #[arg(long, conflicts_with = "trace")]
        trace_file: Option<PathBuf>,
        /// Starting task count (default: compute.desired_count)
        #[arg(short, long)]
        initial: Option<u32>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { name, path, force } => commands::init::init(&path, &name, force),
        Commands::Validate { config, format } => commands::synth::validate(&config, &format),
        Commands::Synth { config, out } => commands::synth::synth(&config, out.as_deref()),
        Commands::Simulate {
            config,
            trace,
            trace_file,
            initial,
            format,
        } => commands::simulate::simulate(
            &config,
            trace.as_deref(),
            trace_file.as_deref(),
            initial,
            &format,
        ),
    }
}
