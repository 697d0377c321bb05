// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub use self::{
    branch::VERSION,
    config::{Config, MonitorConfig, ProvisionConfig, DEFAULT_CONFIG_PATH},
    errors::{BranchError, BranchResult, ErrorKind},
    run::run_monitor,
};

#[allow(clippy::module_inception)]
mod branch;
mod config;
mod errors;
mod run;
