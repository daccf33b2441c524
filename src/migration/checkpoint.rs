//! Checkpoint identities and locations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Returns a checkpoint id derived from the current time in microseconds.
///
/// Ids are strictly increasing within the process, even when the clock
/// stalls or steps backwards.
pub fn next_checkpoint_id() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_ID.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// One checkpoint attempt. Never reused across migrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: u64,
    pub owner_container: String,
    /// Directory the checkpoint is written to on the exporting host
    pub export_dir: String,
    /// Directory the checkpoint is restored from on the importing host
    pub import_dir: String,
    /// Both hosts see the same directory; nothing is copied
    pub shared: bool,
}

impl Checkpoint {
    pub fn new(owner_container: &str, export_dir: &str, import_dir: &str) -> Self {
        Self {
            id: next_checkpoint_id(),
            owner_container: owner_container.to_string(),
            export_dir: export_dir.trim_end_matches('/').to_string(),
            import_dir: import_dir.trim_end_matches('/').to_string(),
            shared: false,
        }
    }

    /// A checkpoint written to a directory both hosts mount.
    pub fn on_shared_storage(owner_container: &str, dir: &str) -> Self {
        Self {
            shared: true,
            ..Self::new(owner_container, dir, dir)
        }
    }

    /// Name given to the checkpoint by the container engine.
    pub fn name(&self) -> String {
        format!("chk{}", self.id)
    }

    pub fn export_path(&self) -> String {
        format!("{}/{}", self.export_dir, self.name())
    }

    pub fn import_path(&self) -> String {
        format!("{}/{}", self.import_dir, self.name())
    }
}
