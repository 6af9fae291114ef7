//! Tracing setup for hosts that do not install a subscriber themselves.
//!
//! `DiagnosticOptions::TRACING` on any connection calls [`init_tracing`].
//! Lifecycle and negotiation milestones of connections created with
//! `DiagnosticOptions::EVENT_LOG` are logged at `info` on the
//! [`EVENT_LOG_TARGET`] target, so they can be filtered separately:
//!
//! ```text
//! ISAR_LOG=isar=warn,isar::event_log=info
//! ```

use tracing_subscriber::EnvFilter;

/// Environment variable read for the filter directives.
pub const LOG_ENV: &str = "ISAR_LOG";

/// Directives used when [`LOG_ENV`] is unset or invalid.
pub const DEFAULT_DIRECTIVES: &str = "isar=debug";

/// Target of the connection event log.
pub const EVENT_LOG_TARGET: &str = "isar::event_log";

/// Installs a fmt subscriber unless the process already has one.
///
/// Returns true if this call installed it.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_no_op() {
        init_tracing();
        assert!(!init_tracing());
    }

    #[test]
    fn default_directives_parse() {
        assert!(DEFAULT_DIRECTIVES.parse::<EnvFilter>().is_ok());
        assert!(format!("{DEFAULT_DIRECTIVES},{EVENT_LOG_TARGET}=info").parse::<EnvFilter>().is_ok());
    }
}
