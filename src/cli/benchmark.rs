//! Round-trip migration benchmark.

use anyhow::{anyhow, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

use captain::benchmark::stats::Aggregate;
use captain::benchmark::summary_file_for;
use captain::migration::MigrationSpec;

use super::{with_session, GlobalArgs};

#[derive(Args)]
#[command(about = "Migrate a container back and forth and collect timings")]
pub struct BenchmarkCommand {
    /// Migration type: command or image
    #[arg(short = 't', long = "type", default_value = "command")]
    kind: String,

    /// Container name
    #[arg(short, long)]
    name: String,

    /// Shell command to run in the base image (type command)
    #[arg(long)]
    command: Option<String>,

    /// Image to run (type image)
    #[arg(long)]
    image: Option<String>,

    /// Extra docker options for the image, e.g. "-e FOO=bar -p 8080:80"
    #[arg(long, allow_hyphen_values = true)]
    docker_options: Option<String>,

    /// Measured iterations (defaults to benchmark.iterations)
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Detail log path (defaults to benchmark.log)
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn print_row(label: &str, agg: &Aggregate) {
    println!(
        "  {:<8} min {:>8.3}s  avg {:>8.3}s  max {:>8.3}s",
        label, agg.min, agg.avg, agg.max
    );
}

impl BenchmarkCommand {
    pub fn execute(self, globals: &GlobalArgs) -> Result<()> {
        let spec = MigrationSpec {
            kind: self.kind.clone(),
            name: self.name.clone(),
            command: self.command.clone(),
            image: self.image.clone(),
            options: self.docker_options.clone(),
        };
        // Reject a bad workload before any host is touched.
        spec.workload().map_err(|e| {
            anyhow!(
                "{}\n\n\
                 Suggestions:\n\
                 • captain benchmark --type command --name counter --command 'i=0; while true; do i=$((i+1)); sleep 1; done'\n\
                 • captain benchmark --type image --name web --image nginx --docker-options '-p 8080:80'",
                e
            )
        })?;

        with_session(globals, |session| {
            let iterations = self
                .iterations
                .unwrap_or(session.config().benchmark.iterations);
            let log = self
                .log
                .clone()
                .unwrap_or_else(|| session.config().benchmark.log.clone());

            let stats = session.benchmark(&spec, iterations, &log, !self.no_progress)?;

            println!();
            println!(
                "{} {} of {} iterations succeeded ({} skipped, {} warm-up)",
                style("Benchmark").bold().cyan(),
                stats.succeeded,
                stats.iterations,
                stats.skipped,
                stats.warmup
            );
            print_row("to", &stats.to);
            print_row("back", &stats.back);
            print_row("summary", &stats.summary);
            println!();
            println!("Detail log: {}", log.display());
            println!("Summary:    {}", summary_file_for(&log).display());
            Ok(())
        })
    }
}
