// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Main loop of a monitoring session

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{runtime::Builder, select, signal, task, time::sleep};

use crate::{
    branch::{config::MonitorConfig, errors::BranchResult, VERSION},
    monitor::{IoMonitor, MonitorStop, ProcessIdentity, TransferCounter},
};

// Waits for SIGINT. If received, stops the monitor.
async fn signal_thread(stop: MonitorStop) {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failure while listening for signals: {}", e);
    }
    stop.stop();
}

// Logs the running total at a fixed interval.
async fn report_thread(counter: Arc<TransferCounter>, interval: Duration) {
    loop {
        sleep(interval).await;
        info!("{} bytes transferred so far", counter.get());
    }
}

/// Resolve the identity of the process `pid` under the configured proc
/// directory, then account its disk transfer until the tracer stream ends
/// or SIGINT arrives. Returns the total number of bytes transferred.
pub fn run_monitor(config: &MonitorConfig, pid: i32) -> BranchResult<u64> {
    let identity = ProcessIdentity::resolve(pid, &config.proc_dir)?;
    let tracer = config.tracer.clone();
    let report_interval = Duration::from_secs(config.report_interval_secs);

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name_fn(|| {
            static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_ID.fetch_add(1, Ordering::SeqCst);
            format!("branchd-wt-{}", id)
        })
        .build()?;
    runtime.block_on(async move {
        info!(
            "branchd version {} monitoring process {}",
            VERSION, identity.pid
        );
        match identity.container_id {
            Some(ref id) => info!("The process runs in container {}", id),
            None => info!("The process runs on the host"),
        }

        let monitor = IoMonitor::new(identity, &tracer);
        let counter = monitor.counter();
        let stop = monitor.stop_handle();

        let mut join_scan = task::spawn_blocking(move || monitor.run());
        let join_signal = task::spawn(signal_thread(stop));
        if !report_interval.is_zero() {
            task::spawn(report_thread(Arc::clone(&counter), report_interval));
        }

        select! {
            res = &mut join_scan => {
                res??;
                info!("The tracer stream ended");
            }
            _ = join_signal => {
                info!("Caught SIGINT; stopping the monitor...");
                join_scan.await??;
            }
        }
        let total = counter.get();
        info!("{} bytes transferred in total", total);
        Ok(total)
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    /// A session against a short-lived fake tracer runs to the end of the
    /// stream and reports the accounted total.
    fn test_run_monitor_to_stream_end() {
        let dir = tempdir().unwrap();
        let proc_pid = dir.path().join("proc/394");
        fs::create_dir_all(&proc_pid).unwrap();
        fs::write(proc_pid.join("cgroup"), "0::/user.slice\n").unwrap();

        let script = dir.path().join("tracer.sh");
        fs::write(
            &script,
            "#!/bin/sh\n\
             printf 'TIME COMM PID DISK T SECTOR BYTES LAT\\n'\n\
             printf '0.1 postgres 394 nvme0n1 W 1 4096 0.1\\n'\n\
             printf '0.2 other 395 nvme0n1 W 2 512 0.1\\n'\n",
        )
        .unwrap();

        let config = MonitorConfig {
            tracer: format!("sh {}", script.display()),
            proc_dir: dir.path().join("proc"),
            report_interval_secs: 0,
        };
        assert_eq!(run_monitor(&config, 394).unwrap(), 4096);
    }

    #[test]
    /// Identity resolution failures surface before any tracer is spawned.
    fn test_run_monitor_unknown_pid() {
        let dir = tempdir().unwrap();
        let config = MonitorConfig {
            tracer: "branchd-test-no-such-tracer".to_owned(),
            proc_dir: dir.path().to_path_buf(),
            report_interval_secs: 0,
        };
        assert!(run_monitor(&config, 1).is_err());
    }
}
