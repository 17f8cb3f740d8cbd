// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Engine configuration. */

use serde::Deserialize;

/// Settings shared by the transport, the concurrent sections and the controller.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Configuration {
    /// Proxy used for `http://` URLs.
    pub http_proxy: Option<String>,

    /// Proxy used for `https://` URLs.
    pub https_proxy: Option<String>,

    /// How many times a failed request is retried.
    pub retries_num: u32,

    /// Base interval between retries, in seconds.
    ///
    /// The n-th retry waits `n * retry_interval`, capped at
    /// `retries_num * retry_interval`.
    pub retry_interval: u64,

    /// Maximum number of concurrent transfers.
    pub threads_num: usize,

    /// How many failed tasks a concurrent section tolerates.
    pub ignore_errors_num: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            http_proxy: None,
            https_proxy: None,
            retries_num: 5,
            retry_interval: 2,
            threads_num: 3,
            ignore_errors_num: 2,
        }
    }
}
