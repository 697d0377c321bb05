// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/// The official version of the daemon.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
