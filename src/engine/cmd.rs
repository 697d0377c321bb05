// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Handles invoking external binaries.
// A backend resolves the absolute path of every binary it relies on once, at
// construction, and refuses to start if any are missing. Managers invoke the
// tools through the Runner trait rather than through std::process directly,
// so the command surface can be exercised in tests without the tools
// installed.

use std::{collections::HashMap, fmt, path::PathBuf, process::Command};

use crate::branch::{BranchError, BranchResult, ErrorKind};

const BINARIES_PATHS: [&str; 4] = ["/usr/sbin", "/sbin", "/usr/bin", "/bin"];

/// Find the binary with the given name by looking in likely locations.
/// Return None if no binary was found.
/// Search an explicit list of directories rather than the user's PATH
/// environment variable. The daemon may be running when there is no PATH
/// variable set.
fn find_binary(name: &str) -> Option<PathBuf> {
    BINARIES_PATHS
        .iter()
        .map(|pre| [pre, name].iter().collect::<PathBuf>())
        .find(|path| path.exists())
}

/// Demote a command failure to a plain backend error, leaving other error
/// classes untouched.
pub fn backend_error(err: BranchError) -> BranchError {
    match err {
        BranchError::Command(msg) => BranchError::Engine(ErrorKind::Backend, msg),
        other => other,
    }
}

/// Executes backend tools on behalf of a manager.
pub trait Runner: fmt::Debug + Send + Sync {
    /// Run the named tool with the given arguments and return its standard
    /// output on success.
    fn run(&self, name: &str, args: &[&str]) -> BranchResult<String>;
}

/// Runs tools resolved on the local filesystem.
#[derive(Debug)]
pub struct CliRunner {
    binaries: HashMap<String, PathBuf>,
}

impl CliRunner {
    /// Resolve each named tool to an absolute path. Return an error listing
    /// every missing tool if any could not be found.
    pub fn new(names: &[&str]) -> BranchResult<CliRunner> {
        let mut binaries = HashMap::new();
        let mut missing = Vec::new();
        for name in names {
            match find_binary(name) {
                Some(path) => {
                    binaries.insert((*name).to_owned(), path);
                }
                None => missing.push(*name),
            }
        }
        if missing.is_empty() {
            Ok(CliRunner { binaries })
        } else {
            Err(BranchError::Engine(
                ErrorKind::Backend,
                format!(
                    "executables not found: [{}]; looked in: [{}]",
                    missing.join(", "),
                    BINARIES_PATHS.join(", ")
                ),
            ))
        }
    }
}

impl Runner for CliRunner {
    fn run(&self, name: &str, args: &[&str]) -> BranchResult<String> {
        let executable = self.binaries.get(name).ok_or_else(|| {
            BranchError::Engine(
                ErrorKind::Backend,
                format!("executable {} was not resolved at startup", name),
            )
        })?;
        debug!("Running {} {}", name, args.join(" "));
        let output = Command::new(executable.as_os_str())
            .args(args)
            .output()
            .map_err(|err| {
                BranchError::Command(format!(
                    "failed to invoke {} {}: {}",
                    name,
                    args.join(" "),
                    err
                ))
            })?;
        if output.status.success() {
            Ok(String::from_utf8(output.stdout)?)
        } else {
            let exit_reason = output
                .status
                .code()
                .map_or_else(|| "process terminated by signal".to_owned(), |c| c.to_string());
            Err(BranchError::Command(format!(
                "command failed: cmd: {} {}, exit reason: {}, stderr: {}",
                name,
                args.join(" "),
                exit_reason,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Scripted stand-in for the local tools. Each expected command line maps
    /// to either canned standard output or an error carrying stderr text.
    #[derive(Debug, Default)]
    pub struct FakeRunner {
        script: HashMap<String, Result<String, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn new() -> FakeRunner {
            FakeRunner::default()
        }

        /// Script successful output for one exact command line.
        pub fn ok(mut self, cmdline: &str, stdout: &str) -> FakeRunner {
            self.script.insert(cmdline.to_owned(), Ok(stdout.to_owned()));
            self
        }

        /// Script a failure whose message carries the given stderr text.
        pub fn fail(mut self, cmdline: &str, stderr: &str) -> FakeRunner {
            self.script.insert(cmdline.to_owned(), Err(stderr.to_owned()));
            self
        }

        /// Every command line run so far, in order.
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Runner for FakeRunner {
        fn run(&self, name: &str, args: &[&str]) -> BranchResult<String> {
            let cmdline = format!("{} {}", name, args.join(" "));
            self.calls.lock().unwrap().push(cmdline.clone());
            match self.script.get(&cmdline) {
                Some(Ok(stdout)) => Ok(stdout.clone()),
                Some(Err(stderr)) => Err(BranchError::Command(format!(
                    "command failed: cmd: {}, exit reason: 1, stderr: {}",
                    cmdline, stderr
                ))),
                None => panic!("unscripted command: {}", cmdline),
            }
        }
    }
}
