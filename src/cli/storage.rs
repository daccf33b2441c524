//! Shared storage check: mount, prove both hosts see the same files, tear
//! down.

use anyhow::{anyhow, Result};
use clap::Args;
use console::style;
use uuid::Uuid;

use captain::capability::Side;

use super::{print_pair, GlobalArgs};

#[derive(Args)]
#[command(about = "Mount shared storage between the hosts and check it")]
pub struct StorageCommand {
    /// Back the export with tmpfs
    #[arg(long)]
    tmpfs: bool,

    /// Switch the backing (disk <-> tmpfs) once mounted and check again
    #[arg(long)]
    toggle: bool,
}

fn check_visibility(session: &captain::Session) -> Result<()> {
    let mount = session
        .shared_mount()
        .ok_or_else(|| anyhow!("Shared storage is not mounted"))?;
    let (writer, reader) = match mount.server {
        Side::Source => (Side::Source, Side::Destination),
        Side::Destination => (Side::Destination, Side::Source),
    };
    let marker = format!("{}/.captain-{}", mount.mount_point, Uuid::new_v4());
    let quoted = shell_words::quote(&marker).to_string();

    session
        .node(writer)
        .execute(&format!("echo captain > {}", quoted))?;
    let seen = session.node(reader).execute(&format!("cat {}", quoted));
    if let Err(e) = session.node(writer).execute(&format!("rm -f {}", quoted)) {
        eprintln!("{} could not remove {}: {}", style("warning:").yellow().bold(), marker, e);
    }

    if seen?.trim() != "captain" {
        return Err(anyhow!(
            "{} does not see files written on {} under {}",
            session.node(reader).name(),
            session.node(writer).name(),
            mount.mount_point
        ));
    }
    println!(
        "{} {} shared from {} ({})",
        style("✓").green().bold(),
        mount.mount_point,
        session.node(writer).name(),
        if mount.tmpfs { "tmpfs" } else { "disk" }
    );
    Ok(())
}

impl StorageCommand {
    pub fn execute(self, globals: &GlobalArgs) -> Result<()> {
        let mut config = globals.load_config()?;
        config.shared_storage.enabled = false;

        let mut session = captain::Session::new(config, globals.verbose())?;
        session.setup()?;
        session.probe()?;

        let outcome = self.run(&mut session);
        if let Err(e) = session.finish() {
            eprintln!("{} {}", style("warning:").yellow().bold(), e);
        }
        outcome
    }

    fn run(&self, session: &mut captain::Session) -> Result<()> {
        session.mount_shared_storage(self.tmpfs)?;
        check_visibility(session)?;

        if self.toggle {
            session.toggle_tmpfs(!self.tmpfs)?;
            check_visibility(session)?;
        }

        println!();
        print_pair(session.pair()?);
        Ok(())
    }
}
