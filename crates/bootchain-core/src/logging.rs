//! Logger bootstrap for the initramfs console.
//!
//! Everything goes to stderr, which the kernel wires to the console. The
//! logger is installed with a permissive filter and the effective level is
//! controlled through `log::set_max_level`, so a `bootchain.log=<level>` token
//! read after `/proc` is mounted can still raise verbosity.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

/// Kernel command-line token selecting the log level.
pub const CMDLINE_LEVEL_KEY: &str = "bootchain.log";

static INIT: Once = Once::new();

/// Install the global logger. `RUST_LOG` wins over `default_level` when set.
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").ok();
        let mut builder = Builder::new();
        match env_filter.as_deref() {
            Some(spec) => {
                builder.parse_filters(spec);
            }
            None => {
                builder.filter_level(LevelFilter::Trace);
            }
        }
        builder.target(Target::Stderr).format(|buf, record| {
            writeln!(buf, ">>> [{:<5}] {}", record.level(), record.args())
        });

        if builder.try_init().is_ok() && env_filter.is_none() {
            log::set_max_level(parse_level(default_level).unwrap_or(LevelFilter::Info));
        }
    });
}

/// Apply `bootchain.log=<level>` from a raw kernel command line, if present.
pub fn apply_cmdline_level(cmdline: &str) -> Option<LevelFilter> {
    let level = level_from_cmdline(cmdline)?;
    log::set_max_level(level);
    Some(level)
}

fn level_from_cmdline(cmdline: &str) -> Option<LevelFilter> {
    cmdline
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .filter(|(key, _)| *key == CMDLINE_LEVEL_KEY)
        .filter_map(|(_, value)| parse_level(value))
        .last()
}

fn parse_level(value: &str) -> Option<LevelFilter> {
    value.trim().parse::<LevelFilter>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_token_is_read_from_cmdline() {
        let cmdline = "root=/dev/sda3 quiet bootchain.log=debug";
        assert_eq!(level_from_cmdline(cmdline), Some(LevelFilter::Debug));
    }

    #[test]
    fn invalid_or_missing_level_is_ignored() {
        assert_eq!(level_from_cmdline("root=/dev/sda3"), None);
        assert_eq!(level_from_cmdline("bootchain.log=loud"), None);
    }
}
