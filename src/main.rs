use anyhow::Result;
use clap::{Parser, Subcommand};

mod cli;

use cli::benchmark::BenchmarkCommand;
use cli::completions::CompletionsCommand;
use cli::config::ConfigCommand;
use cli::copy::CopyCommand;
use cli::migrate::MigrateCommand;
use cli::probe::ProbeCommand;
use cli::setup::SetupCommand;
use cli::storage::StorageCommand;
use cli::GlobalArgs;

#[derive(Parser)]
#[command(name = "captain")]
#[command(about = "Live migration of checkpointed containers between two hosts", long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Setup(SetupCommand),
    Probe(ProbeCommand),
    Copy(CopyCommand),
    Migrate(MigrateCommand),
    Benchmark(BenchmarkCommand),
    Storage(StorageCommand),
    Config(ConfigCommand),
    /// Generate shell completion scripts
    Completions(CompletionsCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.globals.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let globals = &cli.globals;
    match cli.command {
        Commands::Setup(cmd) => cmd.execute(globals),
        Commands::Probe(cmd) => cmd.execute(globals),
        Commands::Copy(cmd) => cmd.execute(globals),
        Commands::Migrate(cmd) => cmd.execute(globals),
        Commands::Benchmark(cmd) => cmd.execute(globals),
        Commands::Storage(cmd) => cmd.execute(globals),
        Commands::Config(cmd) => cmd.execute(globals),
        Commands::Completions(cmd) => cmd.execute(),
    }
}
