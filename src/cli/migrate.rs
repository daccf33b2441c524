use anyhow::{anyhow, Result};
use clap::Args;
use console::style;

use super::{direction, with_session, GlobalArgs};

#[derive(Args)]
#[command(about = "Migrate one running container between the hosts")]
pub struct MigrateCommand {
    /// Container name; it must be stopped under the same name on the receiving host
    container: String,

    /// Migrate from the destination back to the source
    #[arg(short, long)]
    back: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl MigrateCommand {
    pub fn execute(self, globals: &GlobalArgs) -> Result<()> {
        with_session(globals, |session| {
            let result = session.migrate(direction(self.back), &self.container)?;

            if self.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let t = &result.timings;
                println!(
                    "{} chk{} ({}): checkpoint {:.3}s, copy {:.3}s, restore {:.3}s, total {:.3}s",
                    if result.success {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    result.checkpoint_id,
                    result.direction,
                    t.checkpoint,
                    t.copy,
                    t.restore,
                    t.total
                );
            }

            if !result.success {
                return Err(anyhow!(
                    "Migration of {} failed\n\n{}",
                    self.container,
                    result.failure.unwrap_or_default()
                ));
            }
            Ok(())
        })
    }
}
