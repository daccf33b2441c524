pub mod benchmark;
pub mod completions;
pub mod config;
pub mod copy;
pub mod migrate;
pub mod probe;
pub mod setup;
pub mod storage;

use anyhow::{anyhow, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;

use captain::capability::{Capabilities, Direction, PairCapabilities};
use captain::config::Config;
use captain::Session;

/// Options shared by every subcommand.
#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl GlobalArgs {
    pub fn verbose(&self) -> bool {
        self.verbose > 0
    }

    pub fn load_config(&self) -> Result<Config> {
        Config::load(self.config.as_deref()).map_err(|e| {
            anyhow!(
                "{}\n\n\
                 Suggestions:\n\
                 • Create a configuration: captain config init\n\
                 • Point to another file: captain --config <path> ...",
                e
            )
        })
    }

    /// Loads the configuration and builds the session's backends.
    pub fn session(&self) -> Result<Session> {
        Ok(Session::new(self.load_config()?, self.verbose())?)
    }

    /// Builds a session, brings both hosts up and negotiates the pair.
    pub fn open_session(&self) -> Result<Session> {
        let mut session = self.session()?;
        session.open()?;
        Ok(session)
    }
}

/// Runs `body` on an open session and always finishes the session.
pub fn with_session<T>(
    globals: &GlobalArgs,
    body: impl FnOnce(&mut Session) -> Result<T>,
) -> Result<T> {
    let mut session = globals.open_session()?;
    let outcome = body(&mut session);
    if let Err(e) = session.finish() {
        eprintln!("{} {}", style("warning:").yellow().bold(), e);
    }
    outcome
}

pub fn direction(back: bool) -> Direction {
    if back {
        Direction::DestinationToSource
    } else {
        Direction::SourceToDestination
    }
}

fn yes_no(value: bool) -> console::StyledObject<&'static str> {
    if value {
        style("yes").green()
    } else {
        style("no").red()
    }
}

pub fn print_capabilities(caps: &Capabilities) {
    println!("{}", style(format!("{} ({})", caps.host, caps.kind)).bold().cyan());
    println!("  OS:              {} {}", caps.os, caps.kernel);
    println!("  CPU:             {}", caps.cpu);
    println!(
        "  Memory:          {} MB free of {} MB",
        caps.ram.free_mb, caps.ram.total_mb
    );
    println!("  Root login:      {}", yes_no(caps.root));
    println!("  Sudo:            {}", yes_no(caps.sudo));
    println!("  tar / zip:       {} / {}", yes_no(caps.archiving.tar), yes_no(caps.archiving.zip));
    println!(
        "  NFS server/client: {} / {}",
        yes_no(caps.shared_fs.server),
        yes_no(caps.shared_fs.client)
    );
    println!("  tmpfs:           {}", yes_no(caps.tmpfs));
}

pub fn print_pair(pair: &PairCapabilities) {
    println!("{}", style("Pair").bold().cyan());
    println!(
        "  Direct reach:    to {} / back {}",
        yes_no(pair.direct_reach.source_to_dest),
        yes_no(pair.direct_reach.dest_to_source)
    );
    let server = match pair.shared_storage.server_side {
        Some(side) => format!(" (server: {:?})", side).to_lowercase(),
        None => String::new(),
    };
    println!("  Shared storage:  {}{}", yes_no(pair.shared_storage.usable), server);
    println!(
        "  Archive:         {}",
        pair.archive.map(|a| a.extension()).unwrap_or("none")
    );
    println!("  Same CPU:        {}", yes_no(pair.cpu_compatible));
    for warning in &pair.warnings {
        println!("  {} {}", style("!").yellow().bold(), warning);
    }
}
