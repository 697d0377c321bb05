// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_derive::Deserialize;
use strum_macros::{Display, EnumString};

use crate::branch::{BranchError, BranchResult, ErrorKind};

/// The storage backend a pool is managed by.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PoolMode {
    Lvm,
    Zfs,
}

/// A validated pool name of the form `<group>/<volume>`.
///
/// For the ZFS backend the group is the parent dataset and the volume is the
/// base dataset that snapshots are taken from. For the LVM backend the group
/// is the volume group and the volume is the base logical volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolRef {
    group: String,
    volume: String,
}

impl PoolRef {
    /// Parse a pool name. The name must contain the `/` separator and both
    /// the part before the first separator and the remainder must be
    /// non-empty; anything else is a configuration error.
    pub fn parse(name: &str) -> BranchResult<PoolRef> {
        match name.split_once('/') {
            Some((group, volume)) if !group.is_empty() && !volume.is_empty() => Ok(PoolRef {
                group: group.to_owned(),
                volume: volume.to_owned(),
            }),
            _ => Err(BranchError::Engine(
                ErrorKind::Config,
                format!(
                    "invalid pool name {:?}: expected the form <group>/<volume>",
                    name
                ),
            )),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn volume(&self) -> &str {
        &self.volume
    }
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.volume)
    }
}

/// Reject names that could escape the pool namespace or change meaning when
/// interpolated into backend command lines.
pub(crate) fn validate_component(value: &str, what: &str) -> BranchResult<()> {
    if value.is_empty()
        || value.contains('/')
        || value.contains('@')
        || value.contains(char::is_whitespace)
    {
        return Err(BranchError::Engine(
            ErrorKind::Config,
            format!(
                "invalid {} {:?}: must be non-empty and free of '/', '@' and whitespace",
                what, value
            ),
        ));
    }
    Ok(())
}

/// A point-in-time snapshot of the base volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Backend identifier, e.g. `tank/data@branch0` for ZFS.
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Group the snapshot belongs to.
    pub pool: String,
}

/// Point-in-time facts about one clone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionState {
    /// Bytes the clone has diverged from its origin. Always zero on backends
    /// that do not track divergence.
    pub clone_diff_size: u64,
}

/// Usage of the underlying pool, in bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Disk {
    pub size: u64,
    pub used: u64,
    pub free: u64,
}

/// Outcome of a retention sweep. Destroyed and failed snapshots are reported
/// side by side so one stuck snapshot does not hide the rest of the sweep.
#[derive(Debug, Default)]
pub struct SnapshotCleanup {
    pub destroyed: Vec<String>,
    pub failed: Vec<(String, BranchError)>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;

    #[test]
    /// A well-formed pool name splits into its group and volume and the
    /// display form round-trips.
    fn test_pool_ref_parse() {
        let pool = PoolRef::parse("vg0/lv0").unwrap();
        assert_eq!(pool.group(), "vg0");
        assert_eq!(pool.volume(), "lv0");
        assert_eq!(pool.to_string(), "vg0/lv0");
    }

    #[test]
    /// Only the first separator splits; the volume part may itself be a
    /// nested dataset path.
    fn test_pool_ref_parse_nested() {
        let pool = PoolRef::parse("tank/data/base").unwrap();
        assert_eq!(pool.group(), "tank");
        assert_eq!(pool.volume(), "data/base");
    }

    #[test]
    /// Names without a separator or with an empty part are rejected as
    /// configuration errors.
    fn test_pool_ref_parse_invalid() {
        for name in ["", "vg0", "vg0/", "/lv0", "/"] {
            assert_matches!(
                PoolRef::parse(name),
                Err(BranchError::Engine(ErrorKind::Config, _))
            );
        }
    }

    #[test]
    fn test_pool_mode_from_str() {
        assert_eq!(PoolMode::from_str("zfs").unwrap(), PoolMode::Zfs);
        assert_eq!(PoolMode::from_str("lvm").unwrap(), PoolMode::Lvm);
        assert_matches!(PoolMode::from_str("btrfs"), Err(_));
    }

    #[test]
    /// Clone and snapshot names may not carry path or snapshot separators.
    fn test_validate_component() {
        assert_matches!(validate_component("alpha_01", "clone name"), Ok(()));
        for name in ["", "a/b", "a@b", "a b", "a\tb"] {
            assert_matches!(
                validate_component(name, "clone name"),
                Err(BranchError::Engine(ErrorKind::Config, _))
            );
        }
    }

    proptest! {
        #[test]
        /// Parsing accepts any name made of two non-empty separator-free
        /// parts and preserves both parts exactly.
        fn parse_preserves_parts(group in "[a-z0-9_]{1,16}", volume in "[a-z0-9_]{1,16}") {
            let pool = PoolRef::parse(&format!("{}/{}", group, volume)).unwrap();
            prop_assert_eq!(pool.group(), group);
            prop_assert_eq!(pool.volume(), volume);
        }
    }
}
