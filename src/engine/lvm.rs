// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Volume-manager backend. LVM keeps no snapshot catalog, so the snapshot
// surface degrades to logged no-ops and placeholder values; clones are
// materialized as snapshot logical volumes of the base volume. The weaker
// contract is visible to callers only through documented placeholders,
// never through errors.

use std::{
    fmt,
    fs::{create_dir_all, remove_dir},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use nix::mount::umount;
use retry::{delay::Fixed, retry_with_index};

use crate::{
    branch::{BranchError, BranchResult, ErrorKind},
    engine::{
        cmd::{backend_error, Runner},
        engine::ThinCloneManager,
        types::{validate_component, Disk, PoolRef, SessionState, Snapshot, SnapshotCleanup},
    },
};

const LVCREATE: &str = "lvcreate";
const LVREMOVE: &str = "lvremove";
const LVS: &str = "lvs";
const MOUNT: &str = "mount";

pub(super) const REQUIRED_BINARIES: [&str; 4] = [LVCREATE, LVREMOVE, LVS, MOUNT];

/// Identifier of the synthetic snapshot this backend reports.
pub const DEFAULT_SNAPSHOT_ID: &str = "default";

// Substrings of LVM tool stderr used to classify failures.
const NOT_FOUND_MARKERS: [&str; 2] = ["Failed to find logical volume", "not found"];
const IN_USE_MARKER: &str = "in use";

fn classify_volume_error(err: BranchError, what: &str) -> BranchError {
    if let BranchError::Command(ref msg) = err {
        if NOT_FOUND_MARKERS.iter().any(|marker| msg.contains(marker)) {
            return BranchError::Engine(ErrorKind::NotFound, format!("{} does not exist", what));
        }
        if msg.contains(IN_USE_MARKER) {
            return BranchError::Engine(ErrorKind::InUse, format!("{} is in use", what));
        }
    }
    backend_error(err)
}

/// Detaches a clone mount. Trait-backed like `Runner` so that busy and
/// absent mount points can be exercised without a real mount table.
trait Unmounter: fmt::Debug + Send + Sync {
    fn unmount(&self, mount_point: &Path) -> nix::Result<()>;
}

#[derive(Debug)]
struct SysUnmounter;

impl Unmounter for SysUnmounter {
    fn unmount(&self, mount_point: &Path) -> nix::Result<()> {
        umount(mount_point)
    }
}

#[derive(Debug)]
pub struct LvmManager {
    pool: PoolRef,
    clones_mount_dir: PathBuf,
    runner: Arc<dyn Runner>,
    unmounter: Arc<dyn Unmounter>,
}

impl LvmManager {
    pub fn new(pool: PoolRef, clones_mount_dir: PathBuf, runner: Arc<dyn Runner>) -> LvmManager {
        LvmManager {
            pool,
            clones_mount_dir,
            runner,
            unmounter: Arc::new(SysUnmounter),
        }
    }

    #[cfg(test)]
    fn with_unmounter(mut self, unmounter: Arc<dyn Unmounter>) -> LvmManager {
        self.unmounter = unmounter;
        self
    }

    /// `<group>/<volume>`, the volume clones are branched from.
    fn base_volume(&self) -> String {
        self.pool.to_string()
    }

    fn volume_path(&self, name: &str) -> String {
        format!("{}/{}", self.pool.group(), name)
    }

    fn device_path(&self, name: &str) -> String {
        format!("/dev/{}/{}", self.pool.group(), name)
    }

    fn mount_point(&self, name: &str) -> PathBuf {
        self.clones_mount_dir.join(name)
    }

    /// Unmount the clone if it is mounted. A mount point that is absent or
    /// already unmounted is not an error; a mount that stays busy after
    /// retries is.
    fn unmount(&self, mount_point: &Path) -> BranchResult<()> {
        match retry_with_index(Fixed::from_millis(100).take(2), |i| {
            trace!("Unmount attempt {} for {}", i, mount_point.display());
            self.unmounter.unmount(mount_point)
        }) {
            Ok(()) => Ok(()),
            Err(retry::Error { error, .. }) => match error {
                nix::Error::EINVAL | nix::Error::ENOENT => {
                    debug!("{} is not mounted", mount_point.display());
                    Ok(())
                }
                nix::Error::EBUSY => Err(BranchError::Engine(
                    ErrorKind::InUse,
                    format!("clone mounted at {} is in use", mount_point.display()),
                )),
                other => Err(BranchError::Nix(other)),
            },
        }
    }
}

impl ThinCloneManager for LvmManager {
    fn create_snapshot(&self, _source: Option<&str>, _name: &str) -> BranchResult<String> {
        info!("Snapshots are not supported in LVM mode; skipping snapshot creation");
        Ok(String::new())
    }

    fn destroy_snapshot(&self, _id: &str, _force: bool) -> BranchResult<()> {
        info!("Snapshots are not supported in LVM mode; skipping snapshot removal");
        Ok(())
    }

    fn get_snapshots(&self) -> BranchResult<Vec<Snapshot>> {
        // No snapshot catalog exists in this mode; report one synthetic
        // entry.
        Ok(vec![Snapshot {
            id: DEFAULT_SNAPSHOT_ID.to_owned(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            pool: self.pool.group().to_owned(),
        }])
    }

    fn cleanup_snapshots(&self, _keep: usize) -> BranchResult<SnapshotCleanup> {
        debug!("Snapshots are not supported in LVM mode; nothing to clean up");
        Ok(SnapshotCleanup::default())
    }

    /// The snapshot argument is accepted for interface parity and ignored;
    /// every clone branches from the live base volume.
    fn create_clone(&self, name: &str, _snapshot_id: &str) -> BranchResult<()> {
        validate_component(name, "clone name")?;
        let mount_point = self.mount_point(name);
        create_dir_all(&mount_point)?;
        self.runner
            .run(
                LVCREATE,
                &[
                    "--snapshot",
                    "--extents",
                    "10%FREE",
                    "--yes",
                    "--name",
                    name,
                    &self.base_volume(),
                ],
            )
            .map_err(backend_error)?;
        let device = self.device_path(name);
        let target = mount_point.display().to_string();
        if let Err(err) = self.runner.run(MOUNT, &[&device, &target]) {
            // Roll the volume back so a failed mount leaves nothing behind.
            if let Err(remove_err) = self.runner.run(LVREMOVE, &["--yes", &self.volume_path(name)])
            {
                warn!(
                    "Failed to remove volume {} after a failed mount: {}",
                    name, remove_err
                );
            }
            return Err(backend_error(err));
        }
        info!("Created clone {} at {}", name, mount_point.display());
        Ok(())
    }

    fn destroy_clone(&self, name: &str) -> BranchResult<()> {
        validate_component(name, "clone name")?;
        let mount_point = self.mount_point(name);
        self.unmount(&mount_point)?;
        if let Err(err) = remove_dir(&mount_point) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Could not remove mount point {}: {}",
                    mount_point.display(),
                    err
                );
            }
        }
        self.runner
            .run(LVREMOVE, &["--yes", &self.volume_path(name)])
            .map_err(|err| classify_volume_error(err, &format!("clone {}", name)))?;
        info!("Destroyed clone {}", name);
        Ok(())
    }

    /// Lists every logical volume in the group, including the base volume.
    fn list_clones(&self) -> BranchResult<Vec<String>> {
        let out = self
            .runner
            .run(LVS, &["--noheadings", "-o", "lv_name", self.pool.group()])
            .map_err(backend_error)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }

    fn get_session_state(&self, name: &str) -> BranchResult<SessionState> {
        validate_component(name, "clone name")?;
        debug!("Divergence is not tracked in LVM mode; reporting zero for {}", name);
        Ok(SessionState { clone_diff_size: 0 })
    }

    fn get_disk_state(&self) -> BranchResult<Disk> {
        debug!("Pool usage is not tracked in LVM mode; reporting zeros");
        Ok(Disk {
            size: 0,
            used: 0,
            free: 0,
        })
    }

    fn pool(&self) -> &PoolRef {
        &self.pool
    }
}
