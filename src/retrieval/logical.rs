// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Builds the restore command used to populate a pool from a logical dump.

use serde_derive::Deserialize;

/// Restore runs under the maintenance role and connects to the maintenance
/// database; the target database is created from the dump itself.
const DEFAULT_USERNAME: &str = "postgres";
const DEFAULT_DBNAME: &str = "postgres";
const DEFAULT_PARALLEL_JOBS: u32 = 1;

fn default_parallel_jobs() -> u32 {
    DEFAULT_PARALLEL_JOBS
}

/// Options of a logical restore.
#[derive(Clone, Debug, Deserialize)]
pub struct RestoreOptions {
    /// Location of the dump to restore from.
    #[serde(rename = "dumpLocation")]
    pub dump_file: String,
    /// Drop existing objects before recreating them.
    #[serde(default, rename = "forceInit")]
    pub force_init: bool,
    #[serde(default = "default_parallel_jobs", rename = "parallelJobs")]
    pub parallel_jobs: u32,
    #[serde(default)]
    pub partial: Partial,
}

/// Restricts a restore to the named tables.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Partial {
    #[serde(default)]
    pub tables: Vec<String>,
}

impl RestoreOptions {
    /// The full restore command line. A configured job count of zero is
    /// read as the default of one.
    pub fn restore_command(&self) -> Vec<String> {
        let jobs = if self.parallel_jobs == 0 {
            DEFAULT_PARALLEL_JOBS
        } else {
            self.parallel_jobs
        };
        let mut cmd = vec![
            "pg_restore".to_owned(),
            "--username".to_owned(),
            DEFAULT_USERNAME.to_owned(),
            "--dbname".to_owned(),
            DEFAULT_DBNAME.to_owned(),
            "--create".to_owned(),
            "--no-privileges".to_owned(),
        ];
        if self.force_init {
            cmd.push("--clean".to_owned());
            cmd.push("--if-exists".to_owned());
        }
        cmd.push("--jobs".to_owned());
        cmd.push(jobs.to_string());
        for table in &self.partial.tables {
            cmd.push("--table".to_owned());
            cmd.push(table.clone());
        }
        cmd.push(self.dump_file.clone());
        cmd
    }
}
