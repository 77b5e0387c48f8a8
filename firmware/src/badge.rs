#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Board-level wiring of the scheduler, the power manager and the services
//! built into the image.
//!
//! Everything here is target independent so the boot and sleep paths can be
//! exercised on the host; `runtime` supplies the timer, the button and the
//! standby entry.

use core::time::Duration;

use badge_core::power::{DeepSleep, PowerConfig, PowerManager};
use badge_core::scheduler::{
    Scheduler, SchedulerError, TaskFault, TaskHandle, TaskOutcome, TaskRunner, TickContext,
    TickReport, TickSource,
};
use badge_core::services::{
    AppName, Connectivity, Service, ServiceError, ServiceRunner, ServiceStore, ServiceTask,
    StoreError,
};

use crate::status;

/// Period of the scheduler tick on this board.
pub const TICK_PERIOD: Duration = Duration::from_millis(10);

/// Number of service slots reserved in RAM.
pub const SERVICE_SLOTS: usize = 4;

const HEARTBEAT_MANIFEST: &str =
    r#"{"apiVersion": 2, "wifi": {"setup": false}, "rtc": false, "loop": true, "draw": false}"#;

/// Apps shipped in flash, with their manifests.
const APPS: &[(&str, &str)] = &[("heartbeat", HEARTBEAT_MANIFEST)];

/// Scheduler keys used on the board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FirmwareTask {
    Power,
    Service(ServiceTask),
}

impl From<ServiceTask> for FirmwareTask {
    fn from(task: ServiceTask) -> Self {
        Self::Service(task)
    }
}

/// Tick source that publishes its period through [`status`]; the timer task
/// picks it up on its next wait.
#[derive(Copy, Clone, Debug, Default)]
pub struct SharedTicks;

impl TickSource for SharedTicks {
    fn start(&mut self, period: Duration) {
        status::set_tick_period(Some(period));
    }

    fn stop(&mut self) {
        status::set_tick_period(None);
    }
}

/// Services compiled into the image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BuiltinService {
    /// Counts once a second for the first `limit` seconds after boot.
    Heartbeat { beats: u32, limit: u32 },
}

impl Service for BuiltinService {
    type Surface = ();

    fn run_loop(&mut self) -> Result<TaskOutcome, ServiceError> {
        match self {
            Self::Heartbeat { beats, limit } => {
                *beats += 1;
                let total = status::record_heartbeat();
                log::trace!("heartbeat {beats} ({total} since boot)");
                if *beats >= *limit {
                    Ok(TaskOutcome::Remove)
                } else {
                    Ok(TaskOutcome::after_millis(1_000))
                }
            }
        }
    }
}

/// App store over [`APPS`].
#[derive(Copy, Clone, Debug, Default)]
pub struct BuiltinStore;

impl ServiceStore for BuiltinStore {
    type Service = BuiltinService;

    fn app_count(&self) -> Result<usize, StoreError> {
        Ok(APPS.len())
    }

    fn app_name(&self, index: usize) -> Option<AppName> {
        let (name, _) = APPS.get(index)?;
        AppName::try_from(*name).ok()
    }

    fn read_manifest<'b>(&mut self, app: &str, buf: &'b mut [u8]) -> Result<&'b str, StoreError> {
        let (_, manifest) = APPS
            .iter()
            .find(|(name, _)| *name == app)
            .ok_or(StoreError::NotFound)?;
        let target = buf.get_mut(..manifest.len()).ok_or(StoreError::TooLarge)?;
        target.copy_from_slice(manifest.as_bytes());
        core::str::from_utf8(target).map_err(|_| StoreError::Invalid)
    }

    fn load(&mut self, app: &str) -> Result<BuiltinService, StoreError> {
        match app {
            "heartbeat" => Ok(BuiltinService::Heartbeat { beats: 0, limit: 30 }),
            _ => Err(StoreError::NotFound),
        }
    }
}

/// This board has neither a radio nor a battery-backed clock.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoRadio;

impl Connectivity for NoRadio {
    fn wifi_connected(&self) -> bool {
        false
    }

    fn enable_wifi(&mut self) -> bool {
        false
    }

    fn unix_time(&self) -> u64 {
        0
    }

    fn sync_clock(&mut self) -> bool {
        false
    }
}

/// Records the standby request; the runtime performs it once the tick has
/// unwound.
#[derive(Copy, Clone, Debug, Default)]
pub struct Standby {
    requested: Option<Option<Duration>>,
}

impl DeepSleep for Standby {
    fn start_sleeping(&mut self, duration: Option<Duration>) {
        self.requested = Some(duration);
    }
}

struct Board {
    power: PowerManager<FirmwareTask, Standby>,
    standby: Standby,
    services: ServiceRunner<BuiltinService, SERVICE_SLOTS>,
    radio: NoRadio,
}

impl TaskRunner<FirmwareTask> for Board {
    fn run(
        &mut self,
        key: FirmwareTask,
        cx: &mut TickContext<'_, FirmwareTask>,
    ) -> Result<TaskOutcome, TaskFault> {
        match key {
            FirmwareTask::Power => Ok(self.power.run(cx, &mut self.standby)),
            FirmwareTask::Service(ServiceTask::Loop(slot)) => {
                self.services.run_loop(slot, &mut self.radio)
            }
            FirmwareTask::Service(ServiceTask::Draw) => Err(TaskFault::new("no display attached")),
        }
    }
}

/// The application driver running on the board.
pub struct FirmwareBadge<T> {
    scheduler: Scheduler<FirmwareTask, T>,
    board: Board,
}

impl<T: TickSource> FirmwareBadge<T> {
    /// Starts ticking, starts the built-in services and arms idle detection.
    pub fn boot(ticks: T, config: PowerConfig) -> Self {
        let mut scheduler = Scheduler::new(ticks);
        scheduler.activate(TICK_PERIOD);

        let mut board = Board {
            power: PowerManager::new(FirmwareTask::Power, config),
            standby: Standby::default(),
            services: ServiceRunner::default(),
            radio: NoRadio,
        };
        board
            .services
            .setup(&mut BuiltinStore, &mut board.radio, &mut scheduler, false);
        if let Err(err) = board.power.feed(&mut scheduler) {
            log::error!("idle detection not armed: {err}");
        }

        Self { scheduler, board }
    }

    pub fn tick(&mut self) -> TickReport {
        self.scheduler.tick(&mut self.board)
    }

    /// Button press: postpones idle detection.
    ///
    /// # Errors
    ///
    /// Fails when idle detection has to be re-registered and the registry is full.
    pub fn press(&mut self) -> Result<TaskHandle, SchedulerError> {
        self.board.power.feed(&mut self.scheduler)
    }

    /// Takes a pending standby request and stops the tick source. The outer
    /// `Option` is whether one is pending; the inner one is the wake timer.
    pub fn take_sleep_request(&mut self) -> Option<Option<Duration>> {
        let requested = self.board.standby.requested.take()?;
        self.scheduler.stop();
        Some(requested)
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<FirmwareTask, T> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use badge_core::scheduler::{NoopTickSource, TaskRegistry};

    fn boot() -> FirmwareBadge<NoopTickSource> {
        FirmwareBadge::boot(
            NoopTickSource,
            PowerConfig::new(Duration::from_millis(500), Duration::from_millis(2_000)),
        )
    }

    #[test]
    fn boot_registers_heartbeat_and_idle_detection() {
        let badge = boot();
        let keys: heapless::Vec<FirmwareTask, 4> =
            badge.scheduler().tasks().iter().map(|entry| entry.key()).collect();
        assert_eq!(
            keys.as_slice(),
            &[FirmwareTask::Service(ServiceTask::Loop(0)), FirmwareTask::Power]
        );
        assert_eq!(badge.scheduler().period(), TICK_PERIOD);
    }

    #[test]
    fn sleeps_until_button_once_heartbeat_finishes() {
        let mut badge = boot();

        // 30 beats a second apart, the first 1ms after boot.
        for _ in 0..2_900 {
            badge.tick();
            assert_eq!(badge.take_sleep_request(), None);
        }

        let mut request = None;
        for _ in 0..200 {
            badge.tick();
            request = request.or_else(|| badge.take_sleep_request());
        }
        assert_eq!(request, Some(None));
        assert!(!badge.scheduler().is_active());
    }

    #[test]
    fn press_keeps_idle_detection_registered() {
        let mut badge = boot();
        let first = badge.press().expect("feed");
        let second = badge.press().expect("feed");
        assert_eq!(first, second);
        assert_eq!(
            badge.scheduler().idle_time(),
            badge_core::scheduler::IdleTime::For(Duration::from_millis(1))
        );
    }

    #[test]
    fn store_serves_builtin_manifest() {
        let mut store = BuiltinStore;
        let mut buf = [0u8; 128];
        let text = store.read_manifest("heartbeat", &mut buf).expect("manifest");
        assert!(text.contains("\"loop\": true"));
        assert_eq!(store.read_manifest("clock", &mut buf), Err(StoreError::NotFound));
        assert_eq!(store.read_manifest("heartbeat", &mut [0u8; 8]), Err(StoreError::TooLarge));
    }
}
