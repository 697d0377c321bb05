// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Copy-on-write backend. Snapshots and clones are real ZFS objects; clones
// are created as siblings of the base dataset under the pool group, so a
// clone never nests under the dataset it was branched from.

use std::{path::PathBuf, sync::Arc};

use chrono::DateTime;
use itertools::Itertools;

use crate::{
    branch::{BranchError, BranchResult, ErrorKind},
    engine::{
        cmd::{backend_error, Runner},
        engine::ThinCloneManager,
        types::{validate_component, Disk, PoolRef, SessionState, Snapshot, SnapshotCleanup},
    },
};

const ZFS: &str = "zfs";

pub(super) const REQUIRED_BINARIES: [&str; 1] = [ZFS];

// Substrings of zfs stderr used to classify failures.
const NOT_FOUND_MARKER: &str = "does not exist";
const IN_USE_MARKERS: [&str; 2] = ["dataset is busy", "has dependent clones"];

/// Map a zfs command failure onto the error taxonomy by inspecting its
/// stderr. `what` names the object the caller was operating on.
fn classify_dataset_error(err: BranchError, what: &str) -> BranchError {
    if let BranchError::Command(ref msg) = err {
        if msg.contains(NOT_FOUND_MARKER) {
            return BranchError::Engine(ErrorKind::NotFound, format!("{} does not exist", what));
        }
        if IN_USE_MARKERS.iter().any(|marker| msg.contains(marker)) {
            return BranchError::Engine(ErrorKind::InUse, format!("{} is in use", what));
        }
    }
    backend_error(err)
}

fn parse_bytes(value: &str, what: &str) -> BranchResult<u64> {
    value.parse::<u64>().map_err(|_| {
        BranchError::Engine(
            ErrorKind::Parse,
            format!("unexpected byte count {:?} reported for {}", value, what),
        )
    })
}

/// One snapshot listing line: `<dataset>@<name>\t<creation epoch seconds>`.
fn parse_snapshot_line(line: &str, pool: &str) -> BranchResult<Snapshot> {
    let (name, creation) = line.split_whitespace().collect_tuple().ok_or_else(|| {
        BranchError::Engine(
            ErrorKind::Parse,
            format!("unparsable snapshot listing line {:?}", line),
        )
    })?;
    let secs = creation.parse::<i64>().map_err(|_| {
        BranchError::Engine(
            ErrorKind::Parse,
            format!("invalid creation time {:?} for snapshot {}", creation, name),
        )
    })?;
    let created_at = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        BranchError::Engine(
            ErrorKind::Parse,
            format!("creation time {} of snapshot {} is out of range", secs, name),
        )
    })?;
    Ok(Snapshot {
        id: name.to_owned(),
        created_at,
        pool: pool.to_owned(),
    })
}

#[derive(Debug)]
pub struct ZfsManager {
    pool: PoolRef,
    clones_mount_dir: PathBuf,
    runner: Arc<dyn Runner>,
}

impl ZfsManager {
    pub fn new(pool: PoolRef, clones_mount_dir: PathBuf, runner: Arc<dyn Runner>) -> ZfsManager {
        ZfsManager {
            pool,
            clones_mount_dir,
            runner,
        }
    }

    /// The dataset snapshots are taken from by default.
    fn base_dataset(&self) -> String {
        self.pool.to_string()
    }

    /// Clones live directly under the group, next to the base dataset.
    fn clone_dataset(&self, name: &str) -> String {
        format!("{}/{}", self.pool.group(), name)
    }

    fn mount_point(&self, name: &str) -> PathBuf {
        self.clones_mount_dir.join(name)
    }
}

impl ThinCloneManager for ZfsManager {
    fn create_snapshot(&self, source: Option<&str>, name: &str) -> BranchResult<String> {
        validate_component(name, "snapshot name")?;
        let dataset = match source {
            Some(clone) => {
                validate_component(clone, "clone name")?;
                self.clone_dataset(clone)
            }
            None => self.base_dataset(),
        };
        let snapshot_id = format!("{}@{}", dataset, name);
        self.runner
            .run(ZFS, &["snapshot", &snapshot_id])
            .map_err(backend_error)?;
        info!("Created snapshot {}", snapshot_id);
        Ok(snapshot_id)
    }

    fn destroy_snapshot(&self, id: &str, force: bool) -> BranchResult<()> {
        // Guard against destroying a whole dataset through this entry point.
        if !id.contains('@') {
            return Err(BranchError::Engine(
                ErrorKind::Config,
                format!(
                    "snapshot identifier {:?} must have the form <dataset>@<name>",
                    id
                ),
            ));
        }
        let result = if force {
            self.runner.run(ZFS, &["destroy", "-R", id])
        } else {
            self.runner.run(ZFS, &["destroy", id])
        };
        result.map_err(|err| classify_dataset_error(err, &format!("snapshot {}", id)))?;
        info!("Destroyed snapshot {}", id);
        Ok(())
    }

    fn get_snapshots(&self) -> BranchResult<Vec<Snapshot>> {
        let out = self
            .runner
            .run(
                ZFS,
                &[
                    "list",
                    "-t",
                    "snapshot",
                    "-H",
                    "-p",
                    "-o",
                    "name,creation",
                    "-S",
                    "creation",
                    "-r",
                    self.pool.group(),
                ],
            )
            .map_err(backend_error)?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| parse_snapshot_line(line, self.pool.group()))
            .collect()
    }

    fn cleanup_snapshots(&self, keep: usize) -> BranchResult<SnapshotCleanup> {
        let snapshots = self.get_snapshots()?;
        let mut cleanup = SnapshotCleanup::default();
        for snapshot in snapshots.iter().skip(keep) {
            match self.destroy_snapshot(&snapshot.id, false) {
                Ok(()) => cleanup.destroyed.push(snapshot.id.clone()),
                Err(err) => {
                    warn!(
                        "Failed to destroy snapshot {} during the retention sweep: {}",
                        snapshot.id, err
                    );
                    cleanup.failed.push((snapshot.id.clone(), err));
                }
            }
        }
        debug!(
            "Retention sweep kept {} snapshots, destroyed {}, failed to destroy {}",
            snapshots.len().min(keep),
            cleanup.destroyed.len(),
            cleanup.failed.len()
        );
        Ok(cleanup)
    }

    fn create_clone(&self, name: &str, snapshot_id: &str) -> BranchResult<()> {
        validate_component(name, "clone name")?;
        let dataset = self.clone_dataset(name);
        let mount_point = self.mount_point(name);
        let mount_opt = format!("mountpoint={}", mount_point.display());
        self.runner
            .run(ZFS, &["clone", "-o", &mount_opt, snapshot_id, &dataset])
            .map_err(|err| classify_dataset_error(err, &format!("snapshot {}", snapshot_id)))?;
        info!(
            "Created clone {} from {} at {}",
            dataset,
            snapshot_id,
            mount_point.display()
        );
        Ok(())
    }

    fn destroy_clone(&self, name: &str) -> BranchResult<()> {
        validate_component(name, "clone name")?;
        let dataset = self.clone_dataset(name);
        self.runner
            .run(ZFS, &["destroy", "-R", &dataset])
            .map_err(|err| classify_dataset_error(err, &format!("clone {}", name)))?;
        info!("Destroyed clone {}", dataset);
        Ok(())
    }

    fn list_clones(&self) -> BranchResult<Vec<String>> {
        let out = self
            .runner
            .run(ZFS, &["list", "-H", "-o", "name", "-r", self.pool.group()])
            .map_err(backend_error)?;
        let prefix = format!("{}/", self.pool.group());
        let volume = self.pool.volume();
        Ok(out
            .lines()
            .filter_map(|line| {
                let rest = line.trim().strip_prefix(&prefix)?;
                // A dataset the base volume nests under is not a clone either.
                if rest.is_empty()
                    || rest.contains('/')
                    || rest == volume
                    || volume
                        .strip_prefix(rest)
                        .is_some_and(|tail| tail.starts_with('/'))
                {
                    None
                } else {
                    Some(rest.to_owned())
                }
            })
            .collect())
    }

    fn get_session_state(&self, name: &str) -> BranchResult<SessionState> {
        validate_component(name, "clone name")?;
        let dataset = self.clone_dataset(name);
        let out = self
            .runner
            .run(ZFS, &["get", "-H", "-p", "-o", "value", "used", &dataset])
            .map_err(|err| classify_dataset_error(err, &format!("clone {}", name)))?;
        Ok(SessionState {
            clone_diff_size: parse_bytes(out.trim(), &dataset)?,
        })
    }

    fn get_disk_state(&self) -> BranchResult<Disk> {
        let out = self
            .runner
            .run(
                ZFS,
                &[
                    "get",
                    "-H",
                    "-p",
                    "-o",
                    "property,value",
                    "used,available",
                    self.pool.group(),
                ],
            )
            .map_err(backend_error)?;
        let mut used = None;
        let mut available = None;
        for line in out.lines().filter(|line| !line.trim().is_empty()) {
            let (property, value) = line.split_whitespace().collect_tuple().ok_or_else(|| {
                BranchError::Engine(
                    ErrorKind::Parse,
                    format!("unparsable pool property line {:?}", line),
                )
            })?;
            match property {
                "used" => used = Some(parse_bytes(value, self.pool.group())?),
                "available" => available = Some(parse_bytes(value, self.pool.group())?),
                _ => (),
            }
        }
        match (used, available) {
            (Some(used), Some(free)) => Ok(Disk {
                size: used + free,
                used,
                free,
            }),
            _ => Err(BranchError::Engine(
                ErrorKind::Parse,
                format!(
                    "pool {} did not report both used and available space",
                    self.pool.group()
                ),
            )),
        }
    }

    fn pool(&self) -> &PoolRef {
        &self.pool
    }
}
