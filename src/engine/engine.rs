// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{fmt::Debug, path::Path, sync::Arc};

use crate::{
    branch::BranchResult,
    engine::{
        cmd::CliRunner,
        lvm::{self, LvmManager},
        types::{Disk, PoolMode, PoolRef, SessionState, Snapshot, SnapshotCleanup},
        zfs::{self, ZfsManager},
    },
};

/// Provisions writable thin clones of one pool.
///
/// Implementations differ in capability. Copy-on-write backends keep real
/// snapshot and divergence state; others degrade the snapshot surface to
/// no-ops while still materializing clones. Callers observe the weaker
/// contract only through documented placeholder values, never through errors.
pub trait ThinCloneManager: Debug + Send + Sync {
    /// Creates a point-in-time snapshot named `name` of the base volume, or
    /// of the named clone when `source` is given.
    /// Returns the backend identifier of the new snapshot.
    /// Returns an error if the backend refuses or fails the operation.
    fn create_snapshot(&self, source: Option<&str>, name: &str) -> BranchResult<String>;

    /// Destroys the snapshot with the given identifier.
    /// When `force` is set, dependent clones are destroyed along with it.
    /// Returns an error if the snapshot does not exist or is still in use.
    fn destroy_snapshot(&self, id: &str, force: bool) -> BranchResult<()>;

    /// Lists snapshots of the pool, newest first.
    fn get_snapshots(&self) -> BranchResult<Vec<Snapshot>>;

    /// Destroys every snapshot beyond the `keep` newest, without force.
    /// Returns the identifiers destroyed together with those that could not
    /// be destroyed; a failure on one snapshot does not stop the sweep.
    fn cleanup_snapshots(&self, keep: usize) -> BranchResult<SnapshotCleanup>;

    /// Materializes a writable clone named `name` from the given snapshot
    /// and mounts it.
    /// Returns an error if the snapshot does not exist.
    fn create_clone(&self, name: &str, snapshot_id: &str) -> BranchResult<()>;

    /// Unmounts and destroys the named clone.
    /// Returns an error if the clone does not exist or is still in use.
    fn destroy_clone(&self, name: &str) -> BranchResult<()>;

    /// Lists the names of the pool's clones.
    fn list_clones(&self) -> BranchResult<Vec<String>>;

    /// Reports how far the named clone has diverged from its origin.
    fn get_session_state(&self, name: &str) -> BranchResult<SessionState>;

    /// Reports usage of the underlying pool.
    fn get_disk_state(&self) -> BranchResult<Disk>;

    /// The pool this manager operates on.
    fn pool(&self) -> &PoolRef;
}

/// Binds a pool to the backend selected by `mode`. The pool name is parsed
/// before any tool lookup so configuration errors surface first.
pub fn new_manager(
    mode: PoolMode,
    pool: &str,
    clones_mount_dir: &Path,
) -> BranchResult<Box<dyn ThinCloneManager>> {
    let pool = PoolRef::parse(pool)?;
    info!("Using the {} backend for pool {}", mode, pool);
    match mode {
        PoolMode::Zfs => {
            let runner = Arc::new(CliRunner::new(&zfs::REQUIRED_BINARIES)?);
            Ok(Box::new(ZfsManager::new(
                pool,
                clones_mount_dir.to_owned(),
                runner,
            )))
        }
        PoolMode::Lvm => {
            let runner = Arc::new(CliRunner::new(&lvm::REQUIRED_BINARIES)?);
            Ok(Box::new(LvmManager::new(
                pool,
                clones_mount_dir.to_owned(),
                runner,
            )))
        }
    }
}
