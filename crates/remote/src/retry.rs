//! Bounded retry and polling for hosts with eventual consistency.
//!
//! Reboots and VM boots are physical events with no push notification, so
//! the only way to observe completion is to keep asking until either the
//! answer is yes or the time budget runs out. Running out is always an
//! error, never a default value.

use crate::connection::SshConnection;
use crate::effector::Effector;
use crate::error::{Error, Result};
use crate::shell::sudo_prefix;
use std::thread;
use std::time::{Duration, Instant};

/// Settings for [`wait_until_reachable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityConfig {
    /// Sleep between connection attempts.
    pub backoff: Duration,
    /// Give up once this much time has passed.
    pub timeout: Duration,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

impl ReachabilityConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Settings for [`reboot_and_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootConfig {
    /// Unconditional sleep after issuing the reboot.
    ///
    /// Must be long enough for the old instance to stop accepting
    /// connections, otherwise we would reconnect to the dying system.
    pub grace: Duration,
    /// How to wait for the host to come back.
    pub reconnect: ReachabilityConfig,
    /// Prefix the reboot command with `sudo`.
    pub use_sudo: bool,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            reconnect: ReachabilityConfig::with_timeout(Duration::from_secs(120)),
            use_sudo: false,
        }
    }
}

/// Reboot command that detaches so the session can close before the host goes down.
pub fn reboot_command(use_sudo: bool) -> String {
    format!("{}/sbin/reboot -f > /dev/null 2>&1 &", sudo_prefix(use_sudo))
}

/// Retry `connect` until it succeeds or `config.timeout` elapses.
///
/// Refused, timed-out, unreachable and handshake failures are retried;
/// any other error (including rejected credentials) is returned at once.
/// Returns the elapsed time.
pub fn wait_until_reachable(
    effector: &dyn Effector,
    connection: &SshConnection,
    config: &ReachabilityConfig,
) -> Result<Duration> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match effector.connect(connection) {
            Ok(_) => {
                let elapsed = start.elapsed();
                log::info!(
                    "{} reachable after {:.1}s ({attempt} attempts)",
                    connection.host,
                    elapsed.as_secs_f64()
                );
                return Ok(elapsed);
            }
            Err(e) if e.is_retryable() => {
                log::debug!("attempt {attempt} to reach {} failed: {e}", connection.host);
            }
            Err(e) => return Err(e),
        }

        if start.elapsed() + config.backoff > config.timeout {
            return Err(Error::UnreachableHost {
                host: connection.host.clone(),
                elapsed: start.elapsed(),
            });
        }
        thread::sleep(config.backoff);
    }
}

/// Reboot a host and block until it accepts connections again.
///
/// Issues a backgrounded `reboot -f`, sleeps the grace period, then
/// delegates to [`wait_until_reachable`]. The returned duration covers the
/// whole operation.
pub fn reboot_and_wait(
    effector: &dyn Effector,
    connection: &SshConnection,
    config: &RebootConfig,
) -> Result<Duration> {
    let start = Instant::now();
    let command = reboot_command(config.use_sudo);

    log::info!("rebooting {}", connection.host);
    let mut session = effector.connect(connection)?;
    match session.exec(&command) {
        Ok(out) => {
            out.into_result(&command)?;
        }
        // The host may drop the session before the command returns.
        Err(Error::Session { message, .. }) => {
            log::debug!("session closed while rebooting {}: {message}", connection.host);
        }
        Err(e) => return Err(e),
    }
    drop(session);

    thread::sleep(config.grace);
    wait_until_reachable(effector, connection, &config.reconnect)?;

    let elapsed = start.elapsed();
    log::info!("{} back after {:.1}s", connection.host, elapsed.as_secs_f64());
    Ok(elapsed)
}

/// A condition polled at a fixed interval until true or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCondition {
    /// Human-readable description, used in errors and logs.
    pub description: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollCondition {
    pub fn new(description: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            description: description.into(),
            interval,
            timeout,
        }
    }
}

/// Evaluate `predicate` every `condition.interval` until it returns `Ok(true)`.
///
/// Retryable errors from the predicate count as "not yet"; any other error
/// is returned at once. Fails with [`Error::Timeout`] when the condition is
/// still false after `condition.timeout`.
pub fn wait_for_condition<F>(condition: &PollCondition, mut predicate: F) -> Result<Duration>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    loop {
        match predicate() {
            Ok(true) => return Ok(start.elapsed()),
            Ok(false) => {}
            Err(e) if e.is_retryable() => {
                log::debug!("{}: {e}", condition.description);
            }
            Err(e) => return Err(e),
        }

        if start.elapsed() + condition.interval > condition.timeout {
            return Err(Error::Timeout {
                condition: condition.description.clone(),
                elapsed: start.elapsed(),
            });
        }
        thread::sleep(condition.interval);
    }
}

/// Like [`wait_for_condition`], but the predicate yields the awaited value.
pub fn poll_until<T, F>(condition: &PollCondition, mut probe: F) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let mut found = None;
    wait_for_condition(condition, || {
        found = probe()?;
        Ok(found.is_some())
    })?;
    found.ok_or_else(|| Error::Timeout {
        condition: condition.description.clone(),
        elapsed: Duration::ZERO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionFailure;
    use crate::mock::MockEffector;
    use std::cell::Cell;
    use std::rc::Rc;

    fn conn() -> SshConnection {
        SshConnection::with_password("10.0.0.5", "root", "x")
    }

    fn fast(backoff_ms: u64, timeout_ms: u64) -> ReachabilityConfig {
        ReachabilityConfig {
            backoff: Duration::from_millis(backoff_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn test_reachable_after_two_failures() {
        let mock = MockEffector::new();
        mock.fail_connects(2, ConnectionFailure::Refused);

        let config = fast(20, 2_000);
        let elapsed = wait_until_reachable(&mock, &conn(), &config).unwrap();

        assert_eq!(mock.connect_attempts(), 3);
        assert!(elapsed >= config.backoff * 2);
    }

    #[test]
    fn test_handshake_and_timeout_failures_are_retried() {
        let mock = MockEffector::new();
        mock.fail_connects(1, ConnectionFailure::Handshake);
        mock.fail_connects(1, ConnectionFailure::TimedOut);

        wait_until_reachable(&mock, &conn(), &fast(1, 1_000)).unwrap();
        assert_eq!(mock.connect_attempts(), 3);
    }

    #[test]
    fn test_auth_failure_is_fatal_immediately() {
        let mock = MockEffector::new();
        mock.reject_auth();

        let err = wait_until_reachable(&mock, &conn(), &fast(1, 1_000)).unwrap_err();
        assert!(matches!(err, Error::Authentication { .. }));
        assert_eq!(mock.connect_attempts(), 1);
    }

    #[test]
    fn test_never_reachable_names_host() {
        let mock = MockEffector::new();
        mock.set_unreachable(true);

        let err = wait_until_reachable(&mock, &conn(), &fast(5, 30)).unwrap_err();
        match err {
            Error::UnreachableHost { host, .. } => assert_eq!(host, "10.0.0.5"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reboot_waits_for_host_to_return() {
        let mock = MockEffector::new();
        mock.outage_after("/sbin/reboot", 3);

        let config = RebootConfig {
            grace: Duration::from_millis(10),
            reconnect: fast(5, 1_000),
            use_sudo: true,
        };
        let elapsed = reboot_and_wait(&mock, &conn(), &config).unwrap();

        assert_eq!(
            mock.commands(),
            vec!["sudo /sbin/reboot -f > /dev/null 2>&1 &".to_string()]
        );
        // 1 connect to issue the reboot, 3 refused, 1 success.
        assert_eq!(mock.connect_attempts(), 5);
        assert!(elapsed >= config.grace);
    }

    #[test]
    fn test_reboot_timeout_raises_unreachable_host() {
        let mock = MockEffector::new();
        mock.outage_after("/sbin/reboot", 1_000);

        let config = RebootConfig {
            grace: Duration::from_millis(5),
            reconnect: fast(5, 40),
            use_sudo: false,
        };
        let err = reboot_and_wait(&mock, &conn(), &config).unwrap_err();
        assert!(matches!(err, Error::UnreachableHost { .. }), "got {err}");
        assert!(err.to_string().contains("10.0.0.5"));
    }

    #[test]
    fn test_condition_eventually_true() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let condition = PollCondition::new("ready", Duration::from_millis(1), Duration::from_secs(1));

        wait_for_condition(&condition, || {
            calls_clone.set(calls_clone.get() + 1);
            Ok(calls_clone.get() >= 3)
        })
        .unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_condition_timeout_is_distinct_error() {
        let condition =
            PollCondition::new("VM 101 has an IP", Duration::from_millis(2), Duration::from_millis(20));
        let err = wait_for_condition(&condition, || Ok(false)).unwrap_err();
        match err {
            Error::Timeout { condition, .. } => assert_eq!(condition, "VM 101 has an IP"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_condition_fatal_error_stops_polling() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let condition = PollCondition::new("x", Duration::from_millis(1), Duration::from_secs(1));

        let err = wait_for_condition(&condition, || {
            calls_clone.set(calls_clone.get() + 1);
            Err(Error::malformed("agent", "garbage"))
        })
        .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_poll_until_returns_value() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let condition = PollCondition::new("ip", Duration::from_millis(1), Duration::from_secs(1));

        let ip = poll_until(&condition, || {
            calls_clone.set(calls_clone.get() + 1);
            Ok((calls_clone.get() == 2).then(|| "10.0.0.7".to_string()))
        })
        .unwrap();
        assert_eq!(ip, "10.0.0.7");
    }
}
