use std::time::Duration;

/// Where promise continuations are deferred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheduling {
    /// FIFO job queue drained before any timer fires.
    #[default]
    Microtask,
    /// Zero-delay timers, the way a `setTimeout`-driven host defers work.
    Macrotask,
}

impl std::str::FromStr for Scheduling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "microtask" | "micro" => Ok(Scheduling::Microtask),
            "macrotask" | "macro" | "timeout" => Ok(Scheduling::Macrotask),
            other => Err(format!("unknown scheduling mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    pub scheduling: Scheduling,
    pub report_unhandled_rejections: bool,
    /// Idle ticks a rejection may stay without a handler before it is reported.
    pub unhandled_grace_ticks: usize,
    /// Slack past the nearest timer deadline when blocking on the timer channel.
    pub max_idle_wait: Duration,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            scheduling: Scheduling::Microtask,
            report_unhandled_rejections: true,
            unhandled_grace_ticks: 1,
            max_idle_wait: Duration::from_millis(50),
        }
    }
}

pub const ENV_SCHEDULING: &str = "THENABLE_SCHEDULING";
pub const ENV_REPORT_UNHANDLED: &str = "THENABLE_REPORT_UNHANDLED";
pub const ENV_UNHANDLED_GRACE: &str = "THENABLE_UNHANDLED_GRACE";

impl EventLoopConfig {
    /// Defaults overridden by `THENABLE_*` environment variables.
    /// Values that fail to parse are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().with_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_SCHEDULING) {
            match raw.parse::<Scheduling>() {
                Ok(mode) => self.scheduling = mode,
                Err(e) => log::warn!("{ENV_SCHEDULING}: {e}, keeping {:?}", self.scheduling),
            }
        }
        if let Some(raw) = lookup(ENV_REPORT_UNHANDLED) {
            match parse_flag(&raw) {
                Some(flag) => self.report_unhandled_rejections = flag,
                None => log::warn!("{ENV_REPORT_UNHANDLED}: expected a boolean, got '{raw}'"),
            }
        }
        if let Some(raw) = lookup(ENV_UNHANDLED_GRACE) {
            match raw.trim().parse::<usize>() {
                Ok(ticks) => self.unhandled_grace_ticks = ticks,
                Err(e) => log::warn!("{ENV_UNHANDLED_GRACE}: {e}"),
            }
        }
        log::debug!("event loop config: {self:?}");
        self
    }

    pub fn scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }

    pub fn report_unhandled_rejections(mut self, enabled: bool) -> Self {
        self.report_unhandled_rejections = enabled;
        self
    }

    pub fn unhandled_grace_ticks(mut self, ticks: usize) -> Self {
        self.unhandled_grace_ticks = ticks;
        self
    }

    pub fn max_idle_wait(mut self, wait: Duration) -> Self {
        self.max_idle_wait = wait;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
