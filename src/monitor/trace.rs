// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Accounts bytes from a block-trace text stream. The stream is columnar
// biosnoop-style output, one line per completed request. Parsing is
// positional, keyed on the PID and BYTES columns, so the accountant does
// not depend on the exact tracer build.

use std::{
    collections::HashMap,
    io::BufRead,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use crate::branch::BranchResult;

pub(super) const TRACE_COLUMNS: usize = 8;
const PID_COLUMN: usize = 2;
const BYTES_COLUMN: usize = 6;

/// Total bytes transferred by the traced process. Reads and writes are
/// summed into the one figure.
///
/// One scanning thread writes; readers only need eventual visibility, so
/// all accesses are relaxed.
#[derive(Debug, Default)]
pub struct TransferCounter(AtomicU64);

impl TransferCounter {
    pub fn new() -> TransferCounter {
        TransferCounter(AtomicU64::new(0))
    }

    fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

enum LineOutcome {
    /// The line belongs to the target process and was summed.
    Accounted,
    /// A well-formed line for some other process.
    Foreign,
    /// The line could not be interpreted; headers land here.
    Skipped,
}

/// Sums the bytes of trace lines that belong to the target process.
#[derive(Debug)]
pub struct TraceAccountant {
    target_pid: i32,
    pid_mapping: HashMap<i32, i32>,
    counter: Arc<TransferCounter>,
}

impl TraceAccountant {
    pub fn new(
        target_pid: i32,
        pid_mapping: HashMap<i32, i32>,
        counter: Arc<TransferCounter>,
    ) -> TraceAccountant {
        TraceAccountant {
            target_pid,
            pid_mapping,
            counter,
        }
    }

    /// Consume the stream until end of file or until `should_exit` is set.
    /// The flag is checked between lines, so a cancelled scan never splits
    /// a line. Returns the number of lines skipped as unparseable; header
    /// and blank lines count among them.
    pub fn scan<R: BufRead>(&self, reader: R, should_exit: &AtomicBool) -> BranchResult<u64> {
        let mut skipped = 0;
        for line in reader.lines() {
            if should_exit.load(Ordering::Relaxed) {
                debug!("Trace scan cancelled");
                break;
            }
            if let LineOutcome::Skipped = self.account(&line?) {
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    fn account(&self, line: &str) -> LineOutcome {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != TRACE_COLUMNS {
            return LineOutcome::Skipped;
        }
        // A non-numeric PID column marks a header line.
        let pid = match fields[PID_COLUMN].parse::<i32>() {
            Ok(pid) => pid,
            Err(_) => return LineOutcome::Skipped,
        };
        match self.pid_mapping.get(&pid) {
            Some(&target) if target == self.target_pid => (),
            _ => return LineOutcome::Foreign,
        }
        match fields[BYTES_COLUMN].parse::<u64>() {
            Ok(bytes) => {
                self.counter.add(bytes);
                LineOutcome::Accounted
            }
            Err(_) => LineOutcome::Skipped,
        }
    }
}
