//! A migration session: two hosts, what they can do together, and the
//! operations run between them.
//!
//! The session owns both host backends, runs their configured lifecycle
//! steps, probes and negotiates them once, and keeps the negotiated
//! [`PairCapabilities`] current whenever the topology changes (shared
//! storage mounted, torn down or switched to tmpfs).

use std::path::Path;

use console::style;
use log::{debug, info, warn};

use crate::benchmark::{BenchmarkHarness, Pacing, RoundTrip};
use crate::benchmark::stats::Statistics;
use crate::capability::negotiate::prefer_private;
use crate::capability::{
    negotiate, probe_pair, probe_reach, Capabilities, Direction, Endpoint, NegotiationOptions,
    PairCapabilities, Side,
};
use crate::config::{Config, SetupSteps};
use crate::error::{Error, Result};
use crate::migration::{MigrationOrchestrator, MigrationResult, MigrationSpec, Workload};
use crate::node::{build_backend, HostBackend, RemoteNode};
use crate::remote::TransferResult;
use crate::storage::{mount_shared, unmount_shared, SharedMount};
use crate::transfer::{TransferPolicy, TransferReport, TransferResolver};

struct Probed {
    source: Capabilities,
    destination: Capabilities,
    pair: PairCapabilities,
}

pub struct Session {
    config: Config,
    source: Box<dyn HostBackend>,
    destination: Box<dyn HostBackend>,
    probed: Option<Probed>,
    shared: Option<SharedMount>,
    verbose: bool,
}

impl Session {
    /// Builds the backends selected by the configuration.
    pub fn new(config: Config, verbose: bool) -> Result<Self> {
        config.validate()?;
        let source = build_backend("source", &config.source)?;
        let destination = build_backend("destination", &config.destination)?;
        Ok(Self::with_backends(config, source, destination, verbose))
    }

    pub fn with_backends(
        config: Config,
        source: Box<dyn HostBackend>,
        destination: Box<dyn HostBackend>,
        verbose: bool,
    ) -> Self {
        Self {
            config,
            source,
            destination,
            probed: None,
            shared: None,
            verbose,
        }
    }

    /// Brings both hosts up, probes them and negotiates the pair.
    pub fn open(&mut self) -> Result<&PairCapabilities> {
        self.setup()?;
        let usable = self.probe()?.shared_storage.usable;
        if self.config.shared_storage.enabled {
            if usable {
                let tmpfs = self.config.shared_storage.tmpfs;
                self.mount_shared_storage(tmpfs)?;
            } else {
                warn!("Shared storage requested but not usable; checkpoints will be copied");
            }
        }
        self.pair()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn node(&self, side: Side) -> &dyn RemoteNode {
        match side {
            Side::Source => self.source.as_node(),
            Side::Destination => self.destination.as_node(),
        }
    }

    pub fn capabilities(&self, side: Side) -> Result<&Capabilities> {
        let probed = self.probed()?;
        Ok(match side {
            Side::Source => &probed.source,
            Side::Destination => &probed.destination,
        })
    }

    pub fn pair(&self) -> Result<&PairCapabilities> {
        Ok(&self.probed()?.pair)
    }

    pub fn shared_mount(&self) -> Option<&SharedMount> {
        self.shared.as_ref()
    }

    fn probed(&self) -> Result<&Probed> {
        self.probed
            .as_ref()
            .ok_or_else(|| Error::Config("The hosts have not been probed yet".to_string()))
    }

    fn say(&self, message: &str) {
        if self.verbose {
            println!("{} {}", style("==>").cyan().bold(), message);
        }
    }

    /// Runs the configured lifecycle steps on both hosts. Starting is not
    /// optional.
    pub fn setup(&mut self) -> Result<()> {
        let (source_steps, destination_steps) =
            (self.config.source.setup, self.config.destination.setup);
        let verbose = self.verbose;
        run_steps(self.source.as_mut(), source_steps, verbose)?;
        run_steps(self.destination.as_mut(), destination_steps, verbose)?;
        self.check_distinct_hosts()
    }

    fn check_distinct_hosts(&self) -> Result<()> {
        let source = self.source.public_address();
        let destination = self.destination.public_address();
        if !source.is_empty() && source == destination {
            return Err(Error::SameHost(source));
        }
        Ok(())
    }

    /// Probes both hosts in parallel and negotiates what they share.
    pub fn probe(&mut self) -> Result<&PairCapabilities> {
        self.say("Probing hosts");
        let (source, destination) = probe_pair(self.source.as_node(), self.destination.as_node());
        let (source, destination) = (source?, destination?);
        let pair = self.negotiate_pair(&source, &destination);
        self.probed = Some(Probed {
            source,
            destination,
            pair,
        });
        self.pair()
    }

    /// Re-tests reachability and renegotiates with the current
    /// capabilities.
    pub fn renegotiate(&mut self) -> Result<&PairCapabilities> {
        let probed = self
            .probed
            .take()
            .ok_or_else(|| Error::Config("The hosts have not been probed yet".to_string()))?;
        let pair = self.negotiate_pair(&probed.source, &probed.destination);
        self.probed = Some(Probed { pair, ..probed });
        self.pair()
    }

    fn negotiate_pair(&self, source: &Capabilities, destination: &Capabilities) -> PairCapabilities {
        let options = NegotiationOptions {
            force_shared: self.config.shared_storage.force,
            archive: self.config.transfer.archive,
            archive_fallback: self.config.transfer.archive_fallback,
        };
        let inject = self.config.transfer.inject_keys;
        let use_private = prefer_private(source.kind, destination.kind);
        let (src, dst) = (self.source.as_node(), self.destination.as_node());

        let pair = negotiate(
            source,
            destination,
            |direction| match direction {
                Direction::SourceToDestination => probe_reach(src, dst, use_private, inject),
                Direction::DestinationToSource => probe_reach(dst, src, use_private, inject),
            },
            &options,
        );

        for warning in &pair.warnings {
            println!("{} {}", style("warning:").yellow().bold(), warning);
        }
        debug!("Negotiated {:?}", pair);
        pair
    }

    /// Mounts shared storage between the hosts and renegotiates.
    pub fn mount_shared_storage(&mut self, tmpfs: bool) -> Result<&SharedMount> {
        let pair = self.pair()?;
        let Some(server_side) = pair.shared_storage.server_side.filter(|_| pair.shared_storage.usable)
        else {
            return Err(Error::Unsupported(
                "shared storage is not usable between these hosts".to_string(),
            ));
        };
        if self.shared.is_some() {
            self.unmount_shared_storage()?;
        }

        self.say(&format!(
            "Mounting shared storage at {}{}",
            self.config.shared_storage.mount_point,
            if tmpfs { " (tmpfs)" } else { "" }
        ));
        let (server, client) = self.endpoints_for(server_side)?;
        let use_private = prefer_private(server.caps.kind, client.caps.kind);
        let mount = mount_shared(
            server,
            client,
            server_side,
            &self.config.shared_storage,
            tmpfs,
            use_private,
        )?;
        self.shared = Some(mount);
        self.renegotiate()?;

        self.shared
            .as_ref()
            .ok_or_else(|| Error::Backend("shared storage vanished".to_string()))
    }

    pub fn unmount_shared_storage(&mut self) -> Result<()> {
        let Some(mount) = self.shared.take() else {
            return Ok(());
        };
        self.say(&format!("Tearing down shared storage at {}", mount.mount_point));
        let (server, client) = self.endpoints_for(mount.server)?;
        unmount_shared(server, client, &mount)
    }

    /// Switches the shared mount between disk and tmpfs backing, then
    /// re-probes both hosts, whose free memory changes with it.
    pub fn toggle_tmpfs(&mut self, tmpfs: bool) -> Result<&PairCapabilities> {
        let current = self
            .shared
            .as_ref()
            .ok_or_else(|| Error::Config("Shared storage is not mounted".to_string()))?;
        if current.tmpfs == tmpfs {
            return self.pair();
        }

        self.unmount_shared_storage()?;
        self.probe()?;
        self.mount_shared_storage(tmpfs)?;
        self.pair()
    }

    /// `(server, client)` endpoints for shared storage served by `server`.
    fn endpoints_for(&self, server: Side) -> Result<(Endpoint<'_>, Endpoint<'_>)> {
        let probed = self.probed()?;
        let source = Endpoint::new(self.source.as_node(), &probed.source);
        let destination = Endpoint::new(self.destination.as_node(), &probed.destination);
        Ok(match server {
            Side::Source => (source, destination),
            Side::Destination => (destination, source),
        })
    }

    /// `(sender, receiver)` endpoints for `direction`.
    fn endpoints(&self, direction: Direction) -> Result<(Endpoint<'_>, Endpoint<'_>)> {
        match direction {
            Direction::SourceToDestination => self.endpoints_for(Side::Source),
            Direction::DestinationToSource => self.endpoints_for(Side::Destination),
        }
    }

    /// Copies a path between the hosts in `direction`.
    pub fn copy(&self, direction: Direction, from_path: &str, to_path: &str) -> Result<TransferReport> {
        let (from, to) = self.endpoints(direction)?;
        let on_shared = self
            .shared
            .as_ref()
            .is_some_and(|m| m.contains(from_path) && m.contains(to_path) && from_path == to_path);
        let resolver = TransferResolver::new(TransferPolicy::from_config(&self.config.transfer, on_shared));
        resolver.copy(from.node, to.node, from_path, to_path, self.pair()?, direction)
    }

    /// Fetches a path from one host to the machine running Captain.
    pub fn retrieve(&self, side: Side, remote_path: &str, local_path: &Path) -> Result<TransferResult> {
        let node = self.node(side);
        info!("Retrieving {}:{} to {}", node.name(), remote_path, local_path.display());
        node.retrieve_file(remote_path, local_path)
    }

    fn resolver(&self) -> TransferResolver {
        TransferResolver::new(TransferPolicy::from_config(
            &self.config.transfer,
            self.shared.is_some(),
        ))
    }

    /// Migrates a running container in `direction`. The container must
    /// already exist, stopped, under the same name on the receiving host.
    pub fn migrate(&self, direction: Direction, container: &str) -> Result<MigrationResult> {
        let resolver = self.resolver();
        let orchestrator =
            MigrationOrchestrator::new(&resolver, &self.config.checkpoint.dir, self.shared.as_ref());
        let (from, to) = self.endpoints(direction)?;
        orchestrator.migrate(from, to, container, container, self.pair()?, direction)
    }

    /// Starts the workload on the source and creates it on the destination.
    pub fn deploy(&self, workload: &Workload) -> Result<()> {
        let (source, destination) = self.endpoints(Direction::SourceToDestination)?;
        workload.deploy(source, destination, &self.config.checkpoint.base_image)
    }

    /// Runs the benchmark loop for the given workload.
    pub fn benchmark(
        &self,
        spec: &MigrationSpec,
        iterations: usize,
        log_path: &Path,
        show_progress: bool,
    ) -> Result<Statistics> {
        let pair = self.pair()?;
        if !pair.cpu_compatible {
            warn!("Benchmarking between hosts with different CPUs");
        }
        self.say(&format!(
            "Benchmarking {} over {} iterations",
            spec.name, iterations
        ));
        let harness = BenchmarkHarness::new(Pacing::from(&self.config.benchmark), show_progress);
        let mut target = SessionRoundTrip { session: self };
        harness.run(&mut target, iterations, log_path, spec)
    }

    /// Tears down shared storage and runs configured destroy steps.
    ///
    /// Every step is attempted; the first error is returned.
    pub fn finish(&mut self) -> Result<()> {
        let mut first_error = None;
        if let Err(e) = self.unmount_shared_storage() {
            warn!("Shared storage teardown failed: {}", e);
            first_error = Some(e);
        }

        let verbose = self.verbose;
        for (backend, steps) in [
            (self.source.as_mut(), self.config.source.setup),
            (self.destination.as_mut(), self.config.destination.setup),
        ] {
            if !steps.destroy {
                continue;
            }
            if verbose {
                println!("{} Destroying {}", style("==>").cyan().bold(), backend.name());
            }
            if let Err(e) = backend.destroy() {
                warn!("Destroying {} failed: {}", backend.name(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn run_steps(backend: &mut dyn HostBackend, steps: SetupSteps, verbose: bool) -> Result<()> {
    let name = backend.name().to_string();
    let announce = |step: &str| {
        if verbose {
            println!("{} {} {}", style("==>").cyan().bold(), step, style(&name).bold());
        }
        info!("{} {}", step, name);
    };

    if steps.create {
        announce("Creating");
        backend.create()?;
    }
    announce("Starting");
    backend.start()?;
    if steps.environment {
        announce("Preparing");
        backend.prepare()?;
    }
    if steps.test {
        announce("Testing");
        backend.test()?;
    }
    Ok(())
}

struct SessionRoundTrip<'a> {
    session: &'a Session,
}

impl RoundTrip for SessionRoundTrip<'_> {
    fn deploy(&mut self, workload: &Workload) -> Result<()> {
        self.session.deploy(workload)
    }

    fn migrate(&mut self, workload: &Workload, direction: Direction) -> Result<MigrationResult> {
        self.session.migrate(direction, workload.name())
    }

    fn remove(&mut self, workload: &Workload) {
        match self.session.endpoints(Direction::SourceToDestination) {
            Ok((source, destination)) => workload.remove(&[source, destination]),
            Err(e) => warn!("Could not remove {}: {}", workload.name(), e),
        }
    }
}
