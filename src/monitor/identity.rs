// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Resolves who a monitored process is: whether it runs in a container and,
// if so, what PID it has inside its namespace. Both facts come from fixed
// process-information records that are read once per monitoring session.

use std::{collections::HashMap, fs, path::Path, sync::OnceLock};

use regex::Regex;

use crate::branch::{BranchError, BranchResult, ErrorKind};

const NSPID_FIELD: &str = "NSpid:";

fn container_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new("/docker/([0-9a-f]{64})").expect("the pattern is a valid constant")
    })
}

/// Extract the 64 character container identifier from a control-group
/// record. Absence is not an error; host processes simply have none.
pub fn container_id_from_cgroup(record: &str) -> Option<String> {
    container_id_regex()
        .captures(record)
        .map(|caps| caps[1].to_owned())
}

/// The PID a process has inside its own PID namespace, the second value of
/// the NSpid status field.
/// Precondition: the process is known to run in a container. A status
/// record without a second NSpid value is an error here.
pub fn namespace_pid(status: &str) -> BranchResult<i32> {
    let values = status
        .lines()
        .find_map(|line| line.strip_prefix(NSPID_FIELD))
        .ok_or_else(|| {
            BranchError::Engine(
                ErrorKind::Parse,
                "no NSpid field in the process status record".to_owned(),
            )
        })?;
    let pids = values
        .split_whitespace()
        .map(|value| {
            value.parse::<i32>().map_err(|_| {
                BranchError::Engine(
                    ErrorKind::Parse,
                    format!("non-numeric NSpid value {:?}", value),
                )
            })
        })
        .collect::<BranchResult<Vec<i32>>>()?;
    match pids.get(1) {
        Some(&pid) => Ok(pid),
        None => Err(BranchError::Engine(
            ErrorKind::Parse,
            "the NSpid field lists no namespace PID for a containerized process".to_owned(),
        )),
    }
}

/// Who the monitored process is, resolved once when monitoring starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessIdentity {
    /// The PID monitoring was requested for.
    pub pid: i32,
    /// The PID the process has inside its namespace, when containerized.
    pub mapped_pid: Option<i32>,
    /// The container the process runs in, when containerized.
    pub container_id: Option<String>,
}

impl ProcessIdentity {
    /// Read the process records under `proc_dir` and resolve the identity.
    /// The namespace record is consulted only when the control-group record
    /// shows a container.
    pub fn resolve(pid: i32, proc_dir: &Path) -> BranchResult<ProcessIdentity> {
        let proc_pid = proc_dir.join(pid.to_string());
        let cgroup = fs::read_to_string(proc_pid.join("cgroup"))?;
        let container_id = container_id_from_cgroup(&cgroup);
        let mapped_pid = match container_id {
            Some(ref id) => {
                debug!("Process {} runs in container {}", pid, id);
                let status = fs::read_to_string(proc_pid.join("status"))?;
                Some(namespace_pid(&status)?)
            }
            None => {
                debug!("Process {} is not containerized", pid);
                None
            }
        };
        Ok(ProcessIdentity {
            pid,
            mapped_pid,
            container_id,
        })
    }

    /// The PIDs under which the process may appear in trace output, each
    /// mapped back to the requested PID.
    pub fn pid_mapping(&self) -> HashMap<i32, i32> {
        let mut mapping = HashMap::from([(self.pid, self.pid)]);
        if let Some(mapped) = self.mapped_pid {
            mapping.insert(mapped, self.pid);
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use std::fs::create_dir;

    use assert_matches::assert_matches;
    use tempfile::tempdir;

    use super::*;

    const PROC_STATUS: &str = "
Name:   postgres
Umask:  0077                                                                                                                                                                                               State:  S (sleeping)
Tgid:   2752157
Ngid:   0
Pid:    2752157
PPid:   2747061
TracerPid:      0
Uid:    999     999     999     999
Gid:    999     999     999     999
FDSize: 64
Groups: 101
NStgid: 2752157 674
NSpid:  2752157\t674
NSpgid: 2752157 674
NSsid:  2752157 674
VmPeak:  2316996 kB
VmSize:  2315104 kB
";

    const PROC_CGROUP: &str = "
12:rdma:/
11:pids:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
10:cpuset:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
9:perf_event:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
8:blkio:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
7:freezer:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
6:cpu,cpuacct:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
5:memory:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
4:net_cls,net_prio:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
3:devices:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
2:hugetlb:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
1:name=systemd:/docker/ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b
";

    #[test]
    /// The namespace PID is the second NSpid value; the neighbouring NStgid
    /// and NSpgid fields do not confuse the lookup.
    fn test_namespace_pid() {
        assert_eq!(namespace_pid(PROC_STATUS).unwrap(), 674);
    }

    #[test]
    fn test_namespace_pid_missing_field() {
        assert_matches!(
            namespace_pid("Name:   postgres\nPid:    42\n"),
            Err(BranchError::Engine(ErrorKind::Parse, _))
        );
    }

    #[test]
    /// A single-valued field means the process is not namespaced yet was
    /// expected to be.
    fn test_namespace_pid_single_value() {
        assert_matches!(
            namespace_pid("NSpid:  2752157\n"),
            Err(BranchError::Engine(ErrorKind::Parse, _))
        );
    }

    #[test]
    fn test_namespace_pid_non_numeric() {
        assert_matches!(
            namespace_pid("NSpid:  one two\n"),
            Err(BranchError::Engine(ErrorKind::Parse, _))
        );
    }

    #[test]
    fn test_container_id_extraction() {
        assert_eq!(
            container_id_from_cgroup(PROC_CGROUP).as_deref(),
            Some("ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b")
        );
    }

    #[test]
    /// Host control-group records carry no container identifier and that is
    /// not an error.
    fn test_container_id_absent_on_host() {
        let record = "12:rdma:/\n11:pids:/\n1:name=systemd:/init.scope\n";
        assert_eq!(container_id_from_cgroup(record), None);
        assert_eq!(container_id_from_cgroup(""), None);
    }

    #[test]
    /// An identifier shorter than 64 hex characters is not a container id.
    fn test_container_id_truncated() {
        let record = format!("11:pids:/docker/{}\n", "ad63ab82fdb32dd".repeat(4));
        assert_eq!(container_id_from_cgroup(&record), None);
    }

    #[test]
    /// A containerized process resolves both facts from one read of each
    /// record.
    fn test_resolve_containerized() {
        let dir = tempdir().unwrap();
        let proc_pid = dir.path().join("2752157");
        create_dir(&proc_pid).unwrap();
        fs::write(proc_pid.join("cgroup"), PROC_CGROUP).unwrap();
        fs::write(proc_pid.join("status"), PROC_STATUS).unwrap();

        let identity = ProcessIdentity::resolve(2_752_157, dir.path()).unwrap();
        assert_eq!(identity.pid, 2_752_157);
        assert_eq!(identity.mapped_pid, Some(674));
        assert_eq!(
            identity.container_id.as_deref(),
            Some("ad63ab82fdb32dd384ac76ab5a9d20fb7cb48f53be4d4cac52924e920c4a967b")
        );
        assert_eq!(
            identity.pid_mapping(),
            HashMap::from([(2_752_157, 2_752_157), (674, 2_752_157)])
        );
    }

    #[test]
    /// A host process needs no status record at all; the namespace lookup
    /// is skipped.
    fn test_resolve_host_process() {
        let dir = tempdir().unwrap();
        let proc_pid = dir.path().join("4242");
        create_dir(&proc_pid).unwrap();
        fs::write(proc_pid.join("cgroup"), "12:rdma:/\n").unwrap();

        let identity = ProcessIdentity::resolve(4242, dir.path()).unwrap();
        assert_eq!(identity.mapped_pid, None);
        assert_eq!(identity.container_id, None);
        assert_eq!(identity.pid_mapping(), HashMap::from([(4242, 4242)]));
    }

    #[test]
    /// A PID with no records at all is an IO error, not a parse error.
    fn test_resolve_missing_process() {
        let dir = tempdir().unwrap();
        assert_matches!(
            ProcessIdentity::resolve(1, dir.path()),
            Err(BranchError::Io(_))
        );
    }
}
