use anyhow::Result;
use clap::Args;
use console::style;
use std::path::PathBuf;

use captain::capability::Side;

use super::{direction, with_session, GlobalArgs};

#[derive(Args)]
#[command(about = "Copy a path between the hosts, or fetch it to this machine")]
pub struct CopyCommand {
    /// Path on the sending host (a trailing `/` copies a directory's contents)
    from: String,

    /// Path on the receiving host, or on this machine with --retrieve
    to: String,

    /// Copy from the destination back to the source
    #[arg(short, long)]
    back: bool,

    /// Fetch the path to this machine instead of the other host
    #[arg(short, long)]
    retrieve: bool,
}

impl CopyCommand {
    pub fn execute(self, globals: &GlobalArgs) -> Result<()> {
        with_session(globals, |session| {
            if self.retrieve {
                let side = if self.back { Side::Destination } else { Side::Source };
                let local = PathBuf::from(&self.to);
                let result = session.retrieve(side, &self.from, &local)?;
                println!(
                    "{} Retrieved {} ({} bytes)",
                    style("✓").green().bold(),
                    local.display(),
                    result.bytes_transferred
                );
                return Ok(());
            }

            let direction = direction(self.back);
            let report = session.copy(direction, &self.from, &self.to)?;
            println!(
                "{} Copied {} ({}): {} via {}{} in {:.2}s",
                style("✓").green().bold(),
                self.from,
                direction,
                report.bytes,
                report.strategy,
                report
                    .archive
                    .map(|a| format!(" as {}", a.extension()))
                    .unwrap_or_default(),
                report.duration.as_secs_f64()
            );
            Ok(())
        })
    }
}
