// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Extracts instance settings from the control data of a synced physical
// copy. A copy refuses to start when these limits are below the values the
// source ran with, so they are lifted into canonical configuration names
// and applied before promotion.

use std::collections::HashMap;

/// Control data parameter names and the canonical setting names they map
/// to. Control data abbreviates some transaction-related names.
const CONTROL_DATA_PARAMS: [(&str, &str); 6] = [
    ("max_connections", "max_connections"),
    ("max_locks_per_xact", "max_locks_per_transaction"),
    ("max_prepared_xacts", "max_prepared_transactions"),
    ("max_wal_senders", "max_wal_senders"),
    ("max_worker_processes", "max_worker_processes"),
    ("track_commit_timestamp", "track_commit_timestamp"),
];

const SETTING_MARKER: &str = " setting:";

/// Parse control data output into canonical settings. Lines that do not
/// carry a tracked parameter are ignored, as are blank lines.
pub fn extract_control_data_params(output: &str) -> HashMap<String, String> {
    let mut settings = HashMap::new();
    for line in output.lines() {
        let Some((name, value)) = line.split_once(SETTING_MARKER) else {
            continue;
        };
        if let Some(&(_, canonical)) = CONTROL_DATA_PARAMS
            .iter()
            .find(|(source, _)| *source == name)
        {
            settings.insert(canonical.to_owned(), value.trim().to_owned());
        }
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTROL_DATA: &str = "
wal_level setting:                    logical
wal_log_hints setting:                on
max_connections setting:              500
max_worker_processes setting:         8
max_prepared_xacts setting:           3
max_locks_per_xact setting:           128
track_commit_timestamp setting:       off
max_wal_senders setting:              15
";

    #[test]
    /// Tracked parameters are extracted under their canonical names; the
    /// abbreviated transaction parameters are renamed and untracked
    /// parameters such as wal_level are dropped.
    fn test_extract_control_data_params() {
        let settings = extract_control_data_params(CONTROL_DATA);
        let expected: HashMap<String, String> = [
            ("max_connections", "500"),
            ("max_locks_per_transaction", "128"),
            ("max_prepared_transactions", "3"),
            ("max_worker_processes", "8"),
            ("track_commit_timestamp", "off"),
            ("max_wal_senders", "15"),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect();
        assert_eq!(settings, expected);
    }

    #[test]
    fn test_extract_ignores_unrelated_lines() {
        let output = "pg_control version number:            1300\n\
                      Latest checkpoint location:           2/E90217A0\n";
        assert!(extract_control_data_params(output).is_empty());
        assert!(extract_control_data_params("").is_empty());
    }
}
