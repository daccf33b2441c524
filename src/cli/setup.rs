//! Host lifecycle: bring both hosts up, or tear them down.

use anyhow::Result;
use clap::Args;
use console::style;

use captain::config::{HostConfig, HostKind};

use super::GlobalArgs;

#[derive(Args)]
#[command(about = "Create, start, prepare and test both hosts")]
pub struct SetupCommand {
    /// Run the configured destroy steps instead
    #[arg(long)]
    teardown: bool,
}

fn planned_steps(host: &HostConfig, teardown: bool) -> Vec<&'static str> {
    if teardown {
        return if host.setup.destroy { vec!["destroy"] } else { Vec::new() };
    }
    let mut steps = Vec::new();
    if host.setup.create {
        steps.push("create");
    }
    steps.push("start");
    if host.setup.environment {
        steps.push("prepare");
    }
    if host.setup.test {
        steps.push("test");
    }
    steps
}

impl SetupCommand {
    pub fn execute(self, globals: &GlobalArgs) -> Result<()> {
        let config = globals.load_config()?;

        println!("{}", style("Planned actions").bold().underlined());
        for (role, host) in [("source", &config.source), ("destination", &config.destination)] {
            let steps = planned_steps(host, self.teardown);
            let address = match (&host.kind, &host.generic) {
                (HostKind::Generic, Some(generic)) => format!(" {}", generic.ip),
                _ => String::new(),
            };
            println!(
                "  {:<12} {}{}: {}",
                role,
                host.kind,
                address,
                if steps.is_empty() {
                    "nothing".to_string()
                } else {
                    steps.join(", ")
                }
            );
        }
        println!();

        let mut session = captain::Session::new(config, globals.verbose())?;
        if self.teardown {
            session.finish()?;
            println!("{} Hosts torn down", style("✓").green().bold());
            return Ok(());
        }

        session.setup()?;
        println!("{} Both hosts are up", style("✓").green().bold());
        Ok(())
    }
}
