// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Drives an external block tracer and accounts its output against one
// process. The tracer is a child process; cancellation asks it to
// terminate so its stream reaches end of file and the scan winds down at
// a line boundary.

use std::{
    io::BufReader,
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
};

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};

use crate::{
    branch::{BranchError, BranchResult, ErrorKind},
    monitor::{
        identity::ProcessIdentity,
        trace::{TraceAccountant, TransferCounter},
    },
};

/// Cancels a running monitor from another thread or task.
#[derive(Clone, Debug)]
pub struct MonitorStop {
    should_exit: Arc<AtomicBool>,
    tracer_pid: Arc<AtomicI32>,
}

impl MonitorStop {
    /// Request the scan to stop and ask the tracer to terminate.
    pub fn stop(&self) {
        self.should_exit.store(true, Ordering::Relaxed);
        let pid = self.tracer_pid.load(Ordering::Relaxed);
        if pid != 0 {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!("Failed to signal the tracer (pid {}): {}", pid, err);
            }
        }
    }
}

/// Monitors the disk transfer of one process through an external tracer.
#[derive(Debug)]
pub struct IoMonitor {
    identity: ProcessIdentity,
    tracer: String,
    counter: Arc<TransferCounter>,
    should_exit: Arc<AtomicBool>,
    tracer_pid: Arc<AtomicI32>,
}

impl IoMonitor {
    /// `tracer` is the tracer command line, whitespace separated; the
    /// first word is the program.
    pub fn new(identity: ProcessIdentity, tracer: &str) -> IoMonitor {
        IoMonitor {
            identity,
            tracer: tracer.to_owned(),
            counter: Arc::new(TransferCounter::new()),
            should_exit: Arc::new(AtomicBool::new(false)),
            tracer_pid: Arc::new(AtomicI32::new(0)),
        }
    }

    /// The counter the scan feeds; safe to read while the monitor runs.
    pub fn counter(&self) -> Arc<TransferCounter> {
        Arc::clone(&self.counter)
    }

    pub fn stop_handle(&self) -> MonitorStop {
        MonitorStop {
            should_exit: Arc::clone(&self.should_exit),
            tracer_pid: Arc::clone(&self.tracer_pid),
        }
    }

    /// Spawn the tracer and consume its output until end of file or
    /// cancellation. Blocks the calling thread.
    pub fn run(&self) -> BranchResult<()> {
        let mut parts = self.tracer.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            BranchError::Engine(ErrorKind::Config, "the tracer command is empty".to_owned())
        })?;
        let mut child = Command::new(program)
            .args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        self.tracer_pid
            .store(child.id().try_into().unwrap_or(0), Ordering::Relaxed);
        info!(
            "Started tracer {} (pid {}) for process {}",
            program,
            child.id(),
            self.identity.pid
        );

        let stdout = child.stdout.take().expect("stdout was configured as a pipe");
        let accountant = TraceAccountant::new(
            self.identity.pid,
            self.identity.pid_mapping(),
            Arc::clone(&self.counter),
        );
        let result = accountant.scan(BufReader::new(stdout), &self.should_exit);
        self.tracer_pid.store(0, Ordering::Relaxed);
        self.reap(child);
        match result? {
            0 => (),
            skipped => debug!("Skipped {} unparseable trace lines", skipped),
        }
        Ok(())
    }

    fn reap(&self, mut child: Child) {
        // The tracer may still be running if the scan ended on its own.
        if let Ok(pid) = i32::try_from(child.id()) {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                trace!("Tracer signal delivery: {}", err);
            }
        }
        match child.wait() {
            Ok(status) => {
                if !status.success() && !self.should_exit.load(Ordering::Relaxed) {
                    warn!("The tracer exited with {}", status);
                }
            }
            Err(err) => warn!("Failed to reap the tracer: {}", err),
        }
    }
}
