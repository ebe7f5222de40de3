//! Process health protocol
//!
//! Readiness and watchdog heartbeats for an external process supervisor
//! (systemd `sd_notify`). Active only when `NOTIFY_SOCKET` is set.
//!
//! Heartbeat rule, evaluated once per supervisor pass:
//! - more than half the watchdog interval elapsed since the last heartbeat
//! - every interfacer alive, or strict mode off
//!
//! While strict mode suppresses heartbeats the external watchdog is expected
//! to act; past the deadline a warning is logged once per episode.

use std::io;
use std::time::{Duration, Instant};

use contracts::HubSettings;
use tracing::{debug, info, warn};

/// Watchdog interval when neither environment nor configuration set one
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(30);

/// Environment variable naming the notification socket
pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// Environment variable carrying the watchdog interval in microseconds
pub const WATCHDOG_USEC_ENV: &str = "WATCHDOG_USEC";

/// Destination of health notifications
pub trait Notifier: Send {
    /// Send one state string (`READY=1`, `WATCHDOG=1`, ...)
    fn notify(&self, state: &str) -> io::Result<()>;
}

/// `sd_notify` over the datagram socket named by `NOTIFY_SOCKET`
#[derive(Debug, Clone)]
pub struct SystemdNotifier {
    socket: String,
}

impl SystemdNotifier {
    /// Notifier for `socket` (a path, or `@name` for the abstract namespace)
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Notifier for `$NOTIFY_SOCKET`, if set and non-empty
    pub fn from_env() -> Option<Self> {
        std::env::var(NOTIFY_SOCKET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .map(Self::new)
    }
}

#[cfg(unix)]
impl Notifier for SystemdNotifier {
    fn notify(&self, state: &str) -> io::Result<()> {
        use std::os::unix::net::UnixDatagram;

        let socket = UnixDatagram::unbound()?;
        match self.socket.strip_prefix('@') {
            #[cfg(target_os = "linux")]
            Some(name) => {
                use std::os::linux::net::SocketAddrExt;
                let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
                socket.send_to_addr(state.as_bytes(), &addr)?;
            }
            #[cfg(not(target_os = "linux"))]
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "abstract notify sockets require linux",
                ))
            }
            None => {
                socket.send_to(state.as_bytes(), &self.socket)?;
            }
        }
        Ok(())
    }
}

#[cfg(not(unix))]
impl Notifier for SystemdNotifier {
    fn notify(&self, _state: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sd_notify requires a unix socket",
        ))
    }
}

/// Parse a `WATCHDOG_USEC` value; an unparsable value is logged and ignored
pub fn parse_watchdog_usec(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(usec) => Some(Duration::from_micros(usec)),
        Err(e) => {
            warn!(value = raw, error = %e, "ignoring invalid WATCHDOG_USEC");
            None
        }
    }
}

/// Resolve the watchdog interval
///
/// The service manager's interval wins over the configured value. A
/// configured value of zero or less disables heartbeats.
pub fn resolve_watchdog_interval(from_env: Option<Duration>, configured_secs: Option<f64>) -> Duration {
    if let Some(interval) = from_env {
        return interval;
    }
    match configured_secs {
        None => DEFAULT_WATCHDOG,
        Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX),
        Some(_) => Duration::ZERO,
    }
}

/// Outcome of one health pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// No external supervisor (or watchdog disabled after readiness)
    Inactive,
    /// Readiness announced (first pass)
    Ready,
    /// Heartbeat sent
    Heartbeat,
    /// Not due yet
    Idle,
    /// Due but withheld because an interfacer is dead
    Suppressed,
    /// Withheld past the watchdog deadline
    Overdue,
}

/// Readiness + watchdog state machine
pub struct HealthMonitor {
    notifier: Option<Box<dyn Notifier>>,
    env_interval: Option<Duration>,
    // Configured interval last reported as overridden by the environment
    overridden_secs: Option<f64>,
    interval: Duration,
    require_all_alive: bool,
    ready: bool,
    last_heartbeat: Option<Instant>,
    overdue_warned: bool,
}

impl HealthMonitor {
    /// Monitor that never notifies
    pub fn disabled() -> Self {
        Self::new(None, None, &HubSettings::default())
    }

    /// Monitor sending through `notifier`
    ///
    /// `env_usec` is the service manager's `WATCHDOG_USEC`; it is read here
    /// once and only matters when a notifier is present.
    pub fn new(
        notifier: Option<Box<dyn Notifier>>,
        env_usec: Option<String>,
        hub: &HubSettings,
    ) -> Self {
        let env_interval = if notifier.is_some() {
            env_usec.as_deref().and_then(parse_watchdog_usec)
        } else {
            None
        };
        if let Some(interval) = env_interval {
            info!(?interval, "using watchdog interval from WATCHDOG_USEC");
        }

        let mut monitor = Self {
            notifier,
            env_interval,
            overridden_secs: None,
            interval: DEFAULT_WATCHDOG,
            require_all_alive: true,
            ready: false,
            last_heartbeat: None,
            overdue_warned: false,
        };
        monitor.configure(hub);
        monitor
    }

    /// Monitor driven by `NOTIFY_SOCKET` / `WATCHDOG_USEC`
    pub fn from_env(hub: &HubSettings) -> Self {
        let notifier = SystemdNotifier::from_env().map(|n| Box::new(n) as Box<dyn Notifier>);
        let env_usec = std::env::var(WATCHDOG_USEC_ENV).ok();
        if notifier.is_some() {
            debug!("service manager notification socket present");
        }
        Self::new(notifier, env_usec, hub)
    }

    /// Whether an external supervisor is listening
    pub fn is_active(&self) -> bool {
        self.notifier.is_some()
    }

    /// Effective watchdog interval, `None` when heartbeats are disabled
    pub fn interval(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }

    /// Strict mode: heartbeat only while every interfacer is alive
    pub fn requires_all_alive(&self) -> bool {
        self.require_all_alive
    }

    fn configure(&mut self, hub: &HubSettings) -> bool {
        let configured = hub.systemd_watchdog_timeout_secs;
        if self.env_interval.is_some() && configured.is_some() && configured != self.overridden_secs {
            warn!(
                configured_secs = ?configured,
                "WATCHDOG_USEC set by the service manager, ignoring systemd_watchdog_timeout_secs"
            );
        }
        self.overridden_secs = configured.filter(|_| self.env_interval.is_some());

        let interval = resolve_watchdog_interval(self.env_interval, configured);
        self.require_all_alive = hub.systemd_heartbeat_require_all_threads;
        let changed = interval != self.interval;
        self.interval = interval;
        changed
    }

    /// Re-read hub settings after a configuration change
    ///
    /// A changed interval is announced to the service manager once ready.
    pub fn update_settings(&mut self, hub: &HubSettings) {
        if !self.configure(hub) || !self.ready {
            return;
        }
        info!(interval = ?self.interval(), "watchdog interval changed");
        if let Some(usec) = self.interval().map(|i| i.as_micros()) {
            self.send(&format!("WATCHDOG_USEC={usec}"));
        }
    }

    /// Run one pass at the current time
    pub fn pass(&mut self, all_alive: bool) -> HealthEvent {
        self.pass_at(Instant::now(), all_alive)
    }

    /// Run one pass at `now`
    pub fn pass_at(&mut self, now: Instant, all_alive: bool) -> HealthEvent {
        if self.notifier.is_none() {
            return HealthEvent::Inactive;
        }

        if !self.ready {
            self.ready = true;
            debug!("sd_notify: service startup OK (READY=1)");
            self.send("READY=1");

            match self.interval() {
                Some(interval) => {
                    let setup = format!("WATCHDOG_USEC={}", interval.as_micros());
                    debug!(setup = %setup, "sd_notify: starting watchdog");
                    self.send(&setup);
                    self.heartbeat(now);
                }
                None => debug!("sd_notify: watchdog disabled"),
            }
            return HealthEvent::Ready;
        }

        let Some(interval) = self.interval() else {
            return HealthEvent::Inactive;
        };
        let last = *self.last_heartbeat.get_or_insert(now);
        let elapsed = now.saturating_duration_since(last);

        if elapsed <= interval / 2 {
            return HealthEvent::Idle;
        }

        if all_alive || !self.require_all_alive {
            debug!("sd_notify: watchdog heartbeat");
            self.heartbeat(now);
            return HealthEvent::Heartbeat;
        }

        debug!("won't heartbeat, interfacers not alive");
        if elapsed > interval.saturating_add(Duration::from_secs(1)) {
            if !self.overdue_warned {
                self.overdue_warned = true;
                warn!(
                    ?elapsed,
                    ?interval,
                    "over watchdog limit but not killed by the service manager; \
                     check WatchdogSec= in the unit file"
                );
            }
            return HealthEvent::Overdue;
        }
        HealthEvent::Suppressed
    }

    fn heartbeat(&mut self, now: Instant) {
        self.send("WATCHDOG=1");
        self.last_heartbeat = Some(now);
        self.overdue_warned = false;
        observability::record_heartbeat();
    }

    fn send(&self, state: &str) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(state) {
                warn!(state, error = %e, "sd_notify failed");
            }
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("active", &self.is_active())
            .field("interval", &self.interval())
            .field("require_all_alive", &self.require_all_alive)
            .field("ready", &self.ready)
            .finish()
    }
}
