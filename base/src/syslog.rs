// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process-wide logger setup.
//!
//! Messages go through the `log` facade and are written to stderr by `env_logger`. The filter is
//! taken from `RUST_LOG` when it is set, otherwise from the level passed to
//! [`init_with_filter`]. Initialization happens at most once per process; later calls are no-ops.
//!
//! # Examples
//!
//! ```
//! use base::syslog;
//! use base::warn;
//!
//! syslog::init();
//! warn!("this is your {} warning", "final");
//! ```

use std::env;
use std::io::Write;
use std::sync::Once;

use log::LevelFilter;

static INIT: Once = Once::new();

/// Initializes the logger with the default `info` filter.
pub fn init() {
    init_with_filter(LevelFilter::Info)
}

/// Initializes the logger with `level` as the filter unless `RUST_LOG` overrides it.
pub fn init_with_filter(level: LevelFilter) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level);
        if let Ok(spec) = env::var("RUST_LOG") {
            builder.parse_filters(&spec);
        }
        builder.format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            )
        });
        // Another logger may already be installed by an embedding process.
        let _ = builder.try_init();
    });
}

/// Parses a level name as accepted by configuration files (`off`, `error`, `warn`, `info`,
/// `debug`, `trace`).
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init_with_filter(LevelFilter::Trace);
        log::info!("logger initialized twice");
    }

    #[test]
    fn parse_levels() {
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("WARN"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("loud"), None);
    }
}
