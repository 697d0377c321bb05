// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Daemon configuration, read from a JSON file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_derive::Deserialize;

use crate::{branch::BranchResult, engine::PoolMode, retrieval::RestoreOptions};

/// Where the daemon looks for its configuration unless told otherwise.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/branchd/config.json";

fn default_snapshot_retention() -> usize {
    30
}

fn default_tracer() -> String {
    "biosnoop".to_owned()
}

fn default_proc_dir() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_report_interval() -> u64 {
    10
}

/// Settings for the thin-clone provisioning engine.
#[derive(Clone, Debug, Deserialize)]
pub struct ProvisionConfig {
    /// Storage backend to manage the pool with.
    pub mode: PoolMode,
    /// Pool name of the form `<group>/<volume>`.
    pub pool: String,
    /// Directory under which clone mountpoints are created.
    #[serde(rename = "clonesMountDir")]
    pub clones_mount_dir: PathBuf,
    /// Number of snapshots the retention sweep keeps when no explicit
    /// count is given.
    #[serde(default = "default_snapshot_retention", rename = "snapshotRetention")]
    pub snapshot_retention: usize,
}

/// Settings for the disk transfer monitor.
#[derive(Clone, Debug, Deserialize)]
pub struct MonitorConfig {
    /// Tracer command line, whitespace separated.
    #[serde(default = "default_tracer")]
    pub tracer: String,
    /// Root of the proc filesystem to read process records from.
    #[serde(default = "default_proc_dir", rename = "procDir")]
    pub proc_dir: PathBuf,
    /// Seconds between progress reports. Zero disables them.
    #[serde(default = "default_report_interval", rename = "reportIntervalSecs")]
    pub report_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> MonitorConfig {
        MonitorConfig {
            tracer: default_tracer(),
            proc_dir: default_proc_dir(),
            report_interval_secs: default_report_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Options of the logical restore job, when one is configured.
    #[serde(default)]
    pub restore: Option<RestoreOptions>,
}

impl Config {
    /// Reads and parses the configuration file at `path`.
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> BranchResult<Config> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, path::Path};

    use assert_matches::assert_matches;
    use tempfile::NamedTempFile;

    use crate::{branch::BranchError, engine::PoolMode};

    use super::{Config, DEFAULT_CONFIG_PATH};

    #[test]
    /// A configuration with every section present parses completely.
    fn test_config_full() {
        let data = r#"{
            "provision": {
                "mode": "zfs",
                "pool": "tank/data",
                "clonesMountDir": "/var/lib/branchd/clones",
                "snapshotRetention": 7
            },
            "monitor": {
                "tracer": "biosnoop -Q",
                "procDir": "/host/proc",
                "reportIntervalSecs": 30
            },
            "restore": {
                "dumpLocation": "/var/lib/dblab/dump",
                "parallelJobs": 4
            }
        }"#;
        let config: Config = serde_json::from_str(data).unwrap();
        assert_eq!(config.provision.mode, PoolMode::Zfs);
        assert_eq!(config.provision.pool, "tank/data");
        assert_eq!(
            config.provision.clones_mount_dir,
            Path::new("/var/lib/branchd/clones")
        );
        assert_eq!(config.provision.snapshot_retention, 7);
        assert_eq!(config.monitor.tracer, "biosnoop -Q");
        assert_eq!(config.monitor.proc_dir, Path::new("/host/proc"));
        assert_eq!(config.monitor.report_interval_secs, 30);
        let restore = config.restore.unwrap();
        assert_eq!(restore.dump_file, "/var/lib/dblab/dump");
        assert_eq!(restore.parallel_jobs, 4);
    }

    #[test]
    /// Omitted sections and fields take their documented defaults.
    fn test_config_defaults() {
        let data = r#"{
            "provision": {
                "mode": "lvm",
                "pool": "vg0/data",
                "clonesMountDir": "/mnt/clones"
            }
        }"#;
        let config: Config = serde_json::from_str(data).unwrap();
        assert_eq!(config.provision.mode, PoolMode::Lvm);
        assert_eq!(config.provision.snapshot_retention, 30);
        assert_eq!(config.monitor.tracer, "biosnoop");
        assert_eq!(config.monitor.proc_dir, Path::new("/proc"));
        assert_eq!(config.monitor.report_interval_secs, 10);
        assert!(config.restore.is_none());
    }

    #[test]
    /// An unknown backend mode is rejected at parse time.
    fn test_config_bad_mode() {
        let data = r#"{
            "provision": {
                "mode": "btrfs",
                "pool": "tank/data",
                "clonesMountDir": "/mnt/clones"
            }
        }"#;
        assert!(serde_json::from_str::<Config>(data).is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"{
                "provision": {
                    "mode": "zfs",
                    "pool": "tank/data",
                    "clonesMountDir": "/mnt/clones"
                }
            }"#,
        )
        .unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.provision.pool, "tank/data");
    }

    #[test]
    fn test_config_missing_file() {
        assert_matches!(
            Config::from_file(Path::new("/nonexistent/branchd/config.json")),
            Err(BranchError::Io(_))
        );
    }

    #[test]
    fn test_default_path_shape() {
        assert!(Path::new(DEFAULT_CONFIG_PATH).is_absolute());
    }
}
