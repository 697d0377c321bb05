// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub use self::{
    cmd::{CliRunner, Runner},
    engine::{new_manager, ThinCloneManager},
    lvm::LvmManager,
    types::{Disk, PoolMode, PoolRef, SessionState, Snapshot, SnapshotCleanup},
    zfs::ZfsManager,
};

mod cmd;
#[allow(clippy::module_inception)]
mod engine;
mod lvm;
mod types;
mod zfs;
