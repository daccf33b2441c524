use captain::capability::probe::PROBE_BEGIN;
use captain::capability::{Direction, Side};
use captain::config::Config;
use captain::error::Error;
use captain::migration::MigrationSpec;
use captain::node::testing::ScriptedNode;
use captain::transfer::Strategy;
use captain::Session;
use tempfile::TempDir;

struct Fixture {
    source: ScriptedNode,
    destination: ScriptedNode,
    relay: TempDir,
}

impl Fixture {
    fn new(source: ScriptedNode, destination: ScriptedNode) -> Self {
        Self {
            source,
            destination,
            relay: TempDir::new().unwrap(),
        }
    }

    fn healthy() -> Self {
        Self::new(
            ScriptedNode::healthy("source", "10.0.0.1"),
            ScriptedNode::healthy("destination", "10.0.0.2"),
        )
    }

    fn config(&self) -> Config {
        let mut config = Config::example();
        config.transfer.relay_dir = Some(self.relay.path().to_path_buf());
        config.benchmark.backoff_ms = 0;
        config.benchmark.jitter_ms_min = 0;
        config.benchmark.jitter_ms_max = 0;
        config
    }

    fn session(&self, config: Config) -> Session {
        Session::with_backends(
            config,
            Box::new(self.source.clone()),
            Box::new(self.destination.clone()),
            false,
        )
    }
}

#[test]
fn test_open_runs_configured_steps_and_negotiates() {
    let fx = Fixture::healthy();
    let mut config = fx.config();
    config.destination.setup.environment = true;
    let mut session = fx.session(config);

    let pair = session.open().unwrap().clone();

    assert_eq!(fx.source.lifecycle(), vec!["start", "test"]);
    assert_eq!(fx.destination.lifecycle(), vec!["start", "prepare", "test"]);
    assert!(pair.direct_reach.source_to_dest);
    assert!(pair.direct_reach.dest_to_source);
    assert!(pair.cpu_compatible);
    assert!(pair.warnings.is_empty());
    assert!(session.shared_mount().is_none());
    assert_eq!(session.capabilities(Side::Source).unwrap().host, "source");
}

#[test]
fn test_same_address_is_rejected_before_probing() {
    let fx = Fixture::new(
        ScriptedNode::healthy("source", "10.0.0.1"),
        ScriptedNode::healthy("destination", "10.0.0.1"),
    );
    let mut session = fx.session(fx.config());

    assert!(matches!(session.open(), Err(Error::SameHost(_))));
    assert_eq!(fx.source.count(PROBE_BEGIN), 0);
}

#[test]
fn test_failing_step_stops_setup() {
    let fx = Fixture::new(
        ScriptedNode::healthy("source", "10.0.0.1").failing_step("test"),
        ScriptedNode::healthy("destination", "10.0.0.2"),
    );
    let mut session = fx.session(fx.config());

    assert!(matches!(session.open(), Err(Error::Backend(_))));
    assert!(fx.destination.lifecycle().is_empty());
}

#[test]
fn test_operations_need_a_probed_pair() {
    let fx = Fixture::healthy();
    let session = fx.session(fx.config());

    assert!(matches!(session.pair(), Err(Error::Config(_))));
    assert!(session
        .migrate(Direction::SourceToDestination, "web")
        .is_err());
    assert!(fx.source.commands().is_empty());
}

#[test]
fn test_renegotiate_picks_up_new_reachability() {
    let fx = Fixture::new(
        ScriptedNode::healthy("source", "10.0.0.1"),
        ScriptedNode::healthy("destination", "10.0.0.2").without_peer_access(),
    );
    let mut session = fx.session(fx.config());

    let pair = session.open().unwrap();
    assert!(pair.direct_reach.source_to_dest);
    assert!(!pair.direct_reach.dest_to_source);

    fx.destination.set_peer_reachable(true);
    let pair = session.renegotiate().unwrap();
    assert!(pair.direct_reach.dest_to_source);
}

#[test]
fn test_cpu_mismatch_is_reported() {
    let fx = Fixture::new(
        ScriptedNode::healthy("source", "10.0.0.1"),
        ScriptedNode::healthy("destination", "10.0.0.2").with_fact("CPU_MODEL", "63"),
    );
    let mut session = fx.session(fx.config());

    let pair = session.open().unwrap();
    assert!(!pair.cpu_compatible);
    assert!(pair.warnings.iter().any(|w| w.contains("CPU")));
}

#[test]
fn test_shared_storage_lifecycle() {
    let fx = Fixture::healthy();
    let mut config = fx.config();
    config.shared_storage.enabled = true;
    let mut session = fx.session(config);

    session.open().unwrap();
    let mount = session.shared_mount().unwrap().clone();
    assert_eq!(mount.server, Side::Source);
    assert_eq!(mount.mount_point, "/mnt/captain");
    assert!(!mount.tmpfs);
    assert!(fx.source.ran("exportfs -ra"));
    assert!(fx.destination.ran("mount -t nfs"));

    let report = session
        .copy(
            Direction::SourceToDestination,
            "/mnt/captain/data",
            "/mnt/captain/data",
        )
        .unwrap();
    assert_eq!(report.strategy, Strategy::SharedStorage);
    assert_eq!(fx.source.transfer_count(), 0);

    // Paths outside the mount are still copied.
    let report = session
        .copy(Direction::SourceToDestination, "/srv/data", "/srv/data")
        .unwrap();
    assert_eq!(report.strategy, Strategy::Direct);

    session.finish().unwrap();
    assert!(session.shared_mount().is_none());
    assert!(fx.destination.ran("umount -f /mnt/captain"));
    assert!(fx.source.ran("rm -f /etc/exports.d/captain.exports"));
}

#[test]
fn test_toggle_tmpfs_reprobes_and_remounts() {
    let fx = Fixture::healthy();
    let mut config = fx.config();
    config.shared_storage.enabled = true;
    let mut session = fx.session(config);
    session.open().unwrap();
    assert_eq!(fx.source.count(PROBE_BEGIN), 1);
    assert!(!fx.source.ran("mount -t tmpfs"));

    session.toggle_tmpfs(true).unwrap();

    assert!(session.shared_mount().unwrap().tmpfs);
    assert!(fx.source.ran("mount -t tmpfs"));
    assert!(fx.destination.ran("umount -f"));
    assert_eq!(fx.source.count(PROBE_BEGIN), 2);
    assert_eq!(fx.destination.count(PROBE_BEGIN), 2);

    // Asking for the current backing changes nothing.
    session.toggle_tmpfs(true).unwrap();
    assert_eq!(fx.source.count(PROBE_BEGIN), 2);
}

#[test]
fn test_unusable_shared_storage_is_not_mounted() {
    let fx = Fixture::new(
        ScriptedNode::healthy("source", "10.0.0.1")
            .with_fact("NFS_SERVER", "")
            .with_fact("NFS_CLIENT", ""),
        ScriptedNode::healthy("destination", "10.0.0.2")
            .with_fact("NFS_SERVER", "")
            .with_fact("NFS_CLIENT", ""),
    );
    let mut config = fx.config();
    config.shared_storage.enabled = true;
    let mut session = fx.session(config);

    let pair = session.open().unwrap();
    assert!(!pair.shared_storage.usable);
    assert!(session.shared_mount().is_none());
    assert!(matches!(
        session.mount_shared_storage(false),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_migrate_and_retrieve() {
    let fx = Fixture::healthy();
    let mut session = fx.session(fx.config());
    session.open().unwrap();

    let result = session
        .migrate(Direction::DestinationToSource, "web")
        .unwrap();
    assert!(result.success);
    assert!(fx.destination.ran("docker checkpoint create"));
    assert!(fx.source.ran("docker start --checkpoint-dir="));

    let local = fx.relay.path().join("fetched.log");
    session
        .retrieve(Side::Destination, "/var/log/app.log", &local)
        .unwrap();
    assert_eq!(std::fs::read_to_string(local).unwrap(), "checkpoint-data");
}

#[test]
fn test_benchmark_deploys_and_removes_the_workload() {
    let fx = Fixture::healthy();
    let mut session = fx.session(fx.config());
    session.open().unwrap();
    let log = fx.relay.path().join("bench").join("stats.csv");

    let spec = MigrationSpec::command("counter", "while true; do sleep 1; done");
    let stats = session.benchmark(&spec, 2, &log, false).unwrap();

    assert_eq!(stats.succeeded, 2);
    assert!(fx.source.ran("docker run -d --name counter busybox sh -c"));
    assert!(fx.destination.ran("docker create --name counter busybox sh -c"));
    // Warm-up plus two round trips, each checkpointing once on each host.
    assert_eq!(fx.source.count("docker checkpoint create"), 3);
    assert_eq!(fx.destination.count("docker checkpoint create"), 3);
    assert!(fx.source.ran("docker rm -f counter"));
    assert!(log.exists());
}

#[test]
fn test_single_iteration_benchmark_end_to_end() {
    let fx = Fixture::healthy();
    let mut session = fx.session(fx.config());
    session.open().unwrap();
    let log = fx.relay.path().join("single.csv");

    let spec = MigrationSpec::command("counter", "while true; do sleep 1; done");
    let stats = session.benchmark(&spec, 1, &log, false).unwrap();

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.to.min, stats.to.avg);
    assert_eq!(stats.to.avg, stats.to.max);
    assert_eq!(stats.back.min, stats.back.max);

    let contents = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("iteration;timestamp;to_checkpoint"));
    assert!(lines[1].starts_with("1;"));
}

#[test]
fn test_finish_destroys_where_configured() {
    let fx = Fixture::healthy();
    let mut config = fx.config();
    config.destination.setup.destroy = true;
    let mut session = fx.session(config);
    session.open().unwrap();

    session.finish().unwrap();

    assert_eq!(fx.destination.lifecycle().last(), Some(&"destroy"));
    assert!(!fx.source.lifecycle().contains(&"destroy"));
}
