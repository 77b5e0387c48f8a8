//! Idle detection and deep-sleep policy.
//!
//! The [`PowerManager`] owns one hidden task in the registry. Every user input
//! re-arms it through [`PowerManager::feed`]; when it finally runs it asks the
//! registry how long the badge will stay idle and, past the configured
//! threshold, hands control to the platform's [`DeepSleep`] facility.

use core::{fmt, time::Duration};

use crate::scheduler::{IdleTime, SchedulerError, TaskHandle, TaskOutcome, TaskRegistry, Visibility};

/// Delay after the last user input before idle detection runs.
pub const DEFAULT_USER_RESPONSE_TIME: Duration = Duration::from_millis(5_000);

/// Idle periods longer than this put the badge to sleep.
pub const DEFAULT_SLEEP_THRESHOLD: Duration = Duration::from_millis(30_000);

/// Persistent-settings namespace holding the user response time.
pub const SETTINGS_NAMESPACE: &str = "splash";

/// Persistent-settings key of the user response time, in milliseconds.
pub const USER_RESPONSE_TIME_KEY: &str = "urt";

/// Opaque access to the badge's persistent key/value settings.
pub trait SettingsStore {
    fn read_u16(&self, namespace: &str, key: &str) -> Option<u16>;
}

/// Timing knobs for the [`PowerManager`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowerConfig {
    pub user_response_time: Duration,
    pub sleep_threshold: Duration,
}

impl PowerConfig {
    #[must_use]
    pub const fn new(user_response_time: Duration, sleep_threshold: Duration) -> Self {
        Self {
            user_response_time,
            sleep_threshold,
        }
    }

    /// Builds the configuration from persisted settings, keeping defaults for
    /// anything missing. A stored response time of zero is ignored.
    #[must_use]
    pub fn load<S: SettingsStore + ?Sized>(settings: &S) -> Self {
        let mut config = Self::default();
        match settings.read_u16(SETTINGS_NAMESPACE, USER_RESPONSE_TIME_KEY) {
            Some(0) => log::warn!("ignoring zero user response time setting"),
            Some(millis) => {
                config.user_response_time = Duration::from_millis(u64::from(millis));
            }
            None => {}
        }
        config
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_USER_RESPONSE_TIME, DEFAULT_SLEEP_THRESHOLD)
    }
}

/// Platform facility that powers the badge down.
pub trait DeepSleep {
    /// Enters deep sleep. `None` sleeps until an external wake source fires.
    ///
    /// On hardware this does not return; host implementations may.
    fn start_sleeping(&mut self, duration: Option<Duration>);

    /// Restarts the badge through a minimal deep sleep.
    fn reboot(&mut self) {
        self.start_sleeping(Some(Duration::from_millis(1)));
    }
}

/// Failure reported by a pre-sleep hook. Sleep proceeds regardless.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepHookError {
    pub reason: &'static str,
}

impl SleepHookError {
    #[must_use]
    pub const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl fmt::Display for SleepHookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sleep hook failed: {}", self.reason)
    }
}

/// Hook invoked with the idle time right before the badge goes to sleep.
pub type SleepCallback<P> = fn(&mut P, IdleTime) -> Result<(), SleepHookError>;

/// Two-tier sleep policy result.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerDecision {
    StayAwake,
    Sleep,
}

/// Drives idle detection for one registry.
///
/// `K` is the registry key the manager's own task is registered with and `P`
/// is the platform handed to [`PowerManager::run`].
pub struct PowerManager<K, P> {
    key: K,
    config: PowerConfig,
    handle: Option<TaskHandle>,
    on_sleep: Option<SleepCallback<P>>,
    sleep_requests: u32,
}

impl<K: Copy, P: DeepSleep> PowerManager<K, P> {
    #[must_use]
    pub const fn new(key: K, config: PowerConfig) -> Self {
        Self {
            key,
            config,
            handle: None,
            on_sleep: None,
            sleep_requests: 0,
        }
    }

    /// Handle of the idle-detection task while it is registered.
    #[must_use]
    pub const fn handle(&self) -> Option<TaskHandle> {
        self.handle
    }

    /// Number of times the manager has asked the platform to sleep.
    #[must_use]
    pub const fn sleep_requests(&self) -> u32 {
        self.sleep_requests
    }

    /// (Re)arms idle detection to run one user response time from now.
    ///
    /// # Errors
    ///
    /// Propagates [`SchedulerError`] when the task has to be registered and
    /// the registry has no room for it, and returns
    /// [`SchedulerError::ChangesetFull`] when the registered task is live but
    /// could not be re-armed mid-tick.
    pub fn feed<R: TaskRegistry<K> + ?Sized>(
        &mut self,
        registry: &mut R,
    ) -> Result<TaskHandle, SchedulerError> {
        let target = self.config.user_response_time;
        if let Some(handle) = self.handle {
            if registry.update(handle, target) {
                return Ok(handle);
            }
            if registry.contains(handle) {
                return Err(SchedulerError::ChangesetFull);
            }
        }

        let handle = registry.add(self.key, target, Visibility::Hidden)?;
        self.handle = Some(handle);
        log::debug!("idle detection armed as {handle}");
        Ok(handle)
    }

    /// Removes the idle-detection task. Returns whether one was removed.
    ///
    /// The handle is kept when the task is still live afterwards, so a later
    /// `kill` or `feed` addresses the same task.
    pub fn kill<R: TaskRegistry<K> + ?Sized>(&mut self, registry: &mut R) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        let deleted = registry.delete(handle);
        if deleted || !registry.contains(handle) {
            self.handle = None;
        }
        deleted
    }

    /// Installs the pre-sleep hook, replacing any previous one.
    pub fn set_sleep_callback(&mut self, callback: SleepCallback<P>) {
        self.on_sleep = Some(callback);
    }

    /// Removes the pre-sleep hook; sleep then proceeds without one.
    pub fn clear_sleep_callback(&mut self) {
        self.on_sleep = None;
    }

    /// Applies the sleep threshold to an idle time.
    #[must_use]
    pub fn decide(&self, idle: IdleTime) -> PowerDecision {
        if idle.exceeds(self.config.sleep_threshold) {
            PowerDecision::Sleep
        } else {
            PowerDecision::StayAwake
        }
    }

    /// Body of the idle-detection task.
    ///
    /// Always asks to run again after the user response time; that only
    /// matters when the platform's sleep call returns.
    pub fn run<R: TaskRegistry<K> + ?Sized>(
        &mut self,
        cx: &mut R,
        platform: &mut P,
    ) -> TaskOutcome {
        let idle = cx.idle_time();
        log::debug!("idle time {idle}");

        if self.decide(idle) == PowerDecision::Sleep {
            self.enter_sleep(idle, platform);
        }

        TaskOutcome::RescheduleAfter(self.config.user_response_time)
    }

    fn enter_sleep(&mut self, idle: IdleTime, platform: &mut P) {
        if let Some(Err(err)) = self.on_sleep.map(|hook| hook(platform, idle)) {
            log::error!("{err}");
        }

        self.sleep_requests = self.sleep_requests.wrapping_add(1);
        log::info!("sleeping for {idle}");
        platform.start_sleeping(idle.as_duration());
    }
}
