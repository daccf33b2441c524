use anyhow::Result;
use clap::Args;
use serde::Serialize;

use captain::capability::{Capabilities, PairCapabilities, Side};

use super::{print_capabilities, print_pair, with_session, GlobalArgs};

#[derive(Args)]
#[command(about = "Probe both hosts and show what they can do together")]
pub struct ProbeCommand {
    /// Print the capabilities as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ProbeReport<'a> {
    source: &'a Capabilities,
    destination: &'a Capabilities,
    pair: &'a PairCapabilities,
}

impl ProbeCommand {
    pub fn execute(self, globals: &GlobalArgs) -> Result<()> {
        with_session(globals, |session| {
            let source = session.capabilities(Side::Source)?;
            let destination = session.capabilities(Side::Destination)?;
            let pair = session.pair()?;

            if self.json {
                let report = ProbeReport {
                    source,
                    destination,
                    pair,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            print_capabilities(source);
            println!();
            print_capabilities(destination);
            println!();
            print_pair(pair);
            Ok(())
        })
    }
}
