//! Host rendition of the badge: text display, simulated radio, and the task
//! router tying the power manager and the service runner to one scheduler.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use badge_core::power::{DeepSleep, PowerConfig, PowerManager, SettingsStore, SleepHookError};
use badge_core::scheduler::{
    IdleTime, Scheduler, SchedulerError, TaskFault, TaskHandle, TaskOutcome, TaskRunner,
    TickContext, TickReport, TickSource,
};
use badge_core::services::{Connectivity, DrawHost, ServiceRunner, ServiceTask};

use crate::demo::{DemoService, DirStore};

pub const DISPLAY_WIDTH: u16 = 296;
pub const DISPLAY_HEIGHT: u16 = 128;

/// Pixel height of one text row.
pub const ROW_HEIGHT: u16 = 16;

/// Pixel width of one glyph.
const GLYPH_WIDTH: u16 = 8;

/// Tick period used when the requested one is rejected.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);

/// Scheduler keys of the host badge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BadgeTask {
    Power,
    Service(ServiceTask),
}

impl From<ServiceTask> for BadgeTask {
    fn from(task: ServiceTask) -> Self {
        Self::Service(task)
    }
}

/// Text rows keyed by their top pixel row.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TextSurface {
    rows: BTreeMap<u16, String>,
}

impl TextSurface {
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Writes `text` at pixel row `y`, replacing whatever was there. Text
    /// running past the right edge is clipped.
    pub fn text(&mut self, y: u16, text: impl Into<String>) {
        let mut text = text.into();
        if let Some((cut, _)) = text.char_indices().nth(usize::from(DISPLAY_WIDTH / GLYPH_WIDTH)) {
            text.truncate(cut);
        }
        self.rows.insert(y, text);
    }

    pub fn rows(&self) -> impl Iterator<Item = (u16, &str)> {
        self.rows.iter().map(|(y, text)| (*y, text.as_str()))
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Screen {
    #[default]
    Home,
    Sleeping,
}

/// E-ink panel stand-in. Drawing goes to a back buffer that becomes visible
/// on flush.
#[derive(Clone, Debug, Default)]
pub struct Display {
    screen: Screen,
    back: TextSurface,
    front: TextSurface,
}

impl Display {
    pub fn set_screen(&mut self, screen: Screen) {
        self.screen = screen;
    }

    /// What the panel currently shows.
    #[must_use]
    pub fn visible(&self) -> &TextSurface {
        &self.front
    }

    /// Redraws the base screen without any service areas.
    pub fn refresh(&mut self) {
        self.prepare();
        self.complete();
    }
}

impl DrawHost for Display {
    type Surface = TextSurface;

    fn prepare(&mut self) {
        self.back.clear();
        match self.screen {
            Screen::Home => self.back.text(0, "Press start to open the launcher"),
            Screen::Sleeping => {
                self.back.text(0, "Sleeping...");
                self.back.text(ROW_HEIGHT, "Press any key to wake up");
            }
        }
    }

    fn complete(&mut self) {
        self.front.clone_from(&self.back);
    }

    fn height(&self) -> u16 {
        DISPLAY_HEIGHT
    }

    fn surface(&mut self) -> &mut TextSurface {
        &mut self.back
    }
}

/// Simulated radio and real-time clock.
///
/// `available` models whether an access point is in range; the radio only
/// connects when asked to. The clock survives deep sleep, the connection
/// does not.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SimNet {
    available: bool,
    connected: bool,
    clock_set: bool,
}

impl SimNet {
    #[must_use]
    pub fn new(available: bool) -> Self {
        Self {
            available,
            ..Self::default()
        }
    }

    /// Taking the access point away also drops an existing connection.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
        self.connected &= available;
    }

    /// State after a deep-sleep reset.
    #[must_use]
    pub fn after_reset(&self) -> Self {
        Self {
            connected: false,
            ..self.clone()
        }
    }
}

impl Connectivity for SimNet {
    fn wifi_connected(&self) -> bool {
        self.connected
    }

    fn enable_wifi(&mut self) -> bool {
        self.connected = self.available;
        if !self.connected {
            log::warn!("no access point in range");
        }
        self.connected
    }

    fn unix_time(&self) -> u64 {
        if !self.clock_set {
            return 0;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }

    fn sync_clock(&mut self) -> bool {
        if self.connected {
            self.clock_set = true;
        }
        self.clock_set
    }
}

/// Persisted settings supplied on the command line.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HostSettings {
    pub user_response_time_ms: Option<u16>,
}

impl SettingsStore for HostSettings {
    fn read_u16(&self, namespace: &str, key: &str) -> Option<u16> {
        match (namespace, key) {
            (badge_core::power::SETTINGS_NAMESPACE, badge_core::power::USER_RESPONSE_TIME_KEY) => {
                self.user_response_time_ms
            }
            _ => None,
        }
    }
}

/// Tick source that only records its configuration; the session delivers ticks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HostTicks {
    period: Option<Duration>,
}

impl HostTicks {
    #[must_use]
    pub fn running(&self) -> Option<Duration> {
        self.period
    }
}

impl TickSource for HostTicks {
    fn start(&mut self, period: Duration) {
        self.period = Some(period);
    }

    fn stop(&mut self) {
        self.period = None;
    }
}

/// A pending deep-sleep request. `None` sleeps until a button press.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepRequest {
    pub duration: Option<Duration>,
}

/// Everything tasks touch besides the registry.
#[derive(Default)]
pub struct Platform {
    display: Display,
    services: ServiceRunner<DemoService>,
    net: SimNet,
    sleep: Option<SleepRequest>,
}

impl DeepSleep for Platform {
    fn start_sleeping(&mut self, duration: Option<Duration>) {
        self.sleep = Some(SleepRequest { duration });
    }
}

/// Pre-sleep hook: puts the sleeping screen and fresh service areas on the
/// panel, which keeps showing them while the badge is powered down.
fn show_sleep_screen(platform: &mut Platform, idle: IdleTime) -> Result<(), SleepHookError> {
    platform.display.set_screen(Screen::Sleeping);
    platform.display.prepare();
    platform.services.force_draw(&mut platform.display);
    platform.display.complete();
    if platform.display.visible().rows().next().is_none() {
        return Err(SleepHookError::new("sleep screen left blank"));
    }
    log::debug!("sleep screen drawn, idle {idle}");
    Ok(())
}

struct Apps {
    power: PowerManager<BadgeTask, Platform>,
    platform: Platform,
}

impl TaskRunner<BadgeTask> for Apps {
    fn run(
        &mut self,
        key: BadgeTask,
        cx: &mut TickContext<'_, BadgeTask>,
    ) -> Result<TaskOutcome, TaskFault> {
        match key {
            BadgeTask::Power => Ok(self.power.run(cx, &mut self.platform)),
            BadgeTask::Service(ServiceTask::Loop(slot)) => {
                self.platform.services.run_loop(slot, &mut self.platform.net)
            }
            BadgeTask::Service(ServiceTask::Draw) => {
                Ok(self.platform.services.draw_task(&mut self.platform.display))
            }
        }
    }
}

/// One boot of the badge, from splash screen to deep sleep.
pub struct Badge {
    scheduler: Scheduler<BadgeTask, HostTicks>,
    apps: Apps,
    services_draw: bool,
}

impl Badge {
    /// Runs the boot sequence: start ticks, start services, draw the home
    /// screen unless services took over redraws, then arm idle detection.
    pub fn boot(store: &mut DirStore, net: SimNet, power: PowerConfig, period: Duration) -> Self {
        let mut scheduler = Scheduler::new(HostTicks::default());
        if !scheduler.activate(period) {
            log::warn!("using {}ms ticks instead", DEFAULT_TICK_PERIOD.as_millis());
            scheduler.activate(DEFAULT_TICK_PERIOD);
        }

        let mut platform = Platform {
            net,
            ..Platform::default()
        };
        let services_draw = platform
            .services
            .setup(store, &mut platform.net, &mut scheduler, true);
        if !services_draw {
            platform.display.refresh();
        }

        let mut power = PowerManager::new(BadgeTask::Power, power);
        power.set_sleep_callback(show_sleep_screen);
        if let Err(err) = power.feed(&mut scheduler) {
            log::error!("idle detection not armed: {err}");
        }

        Self {
            scheduler,
            apps: Apps { power, platform },
            services_draw,
        }
    }

    /// Delivers one timer interrupt.
    pub fn tick(&mut self) -> TickReport {
        self.scheduler.tick(&mut self.apps)
    }

    /// User input: postpones idle detection.
    ///
    /// # Errors
    ///
    /// Fails when idle detection has to be re-registered and the registry is full.
    pub fn press(&mut self) -> Result<TaskHandle, SchedulerError> {
        self.apps.power.feed(&mut self.scheduler)
    }

    /// Takes a sleep request issued during the last tick and stops the tick
    /// source, as the hardware would on entering deep sleep.
    pub fn take_sleep_request(&mut self) -> Option<SleepRequest> {
        let request = self.apps.platform.sleep.take()?;
        self.scheduler.stop();
        Some(request)
    }

    /// Redraws the home screen with every service area, outside the scheduler.
    pub fn force_draw(&mut self) {
        let platform = &mut self.apps.platform;
        platform.display.set_screen(Screen::Home);
        platform.display.prepare();
        platform.services.force_draw(&mut platform.display);
        platform.display.complete();
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<BadgeTask, HostTicks> {
        &self.scheduler
    }

    #[must_use]
    pub fn services(&self) -> &ServiceRunner<DemoService> {
        &self.apps.platform.services
    }

    #[must_use]
    pub fn power(&self) -> &PowerManager<BadgeTask, Platform> {
        &self.apps.power
    }

    #[must_use]
    pub fn display(&self) -> &Display {
        &self.apps.platform.display
    }

    #[must_use]
    pub fn net(&self) -> &SimNet {
        &self.apps.platform.net
    }

    pub fn net_mut(&mut self) -> &mut SimNet {
        &mut self.apps.platform.net
    }

    /// Whether services own screen redraws this boot.
    #[must_use]
    pub fn services_draw(&self) -> bool {
        self.services_draw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PowerConfig {
        PowerConfig::new(Duration::from_millis(1_000), Duration::from_millis(3_000))
    }

    #[test]
    fn empty_store_boots_to_home_screen_and_sleeps_forever() {
        let mut store = DirStore::open("/nonexistent/badge-root");
        let mut badge = Badge::boot(
            &mut store,
            SimNet::new(false),
            config(),
            Duration::from_millis(100),
        );

        assert!(!badge.services_draw());
        let rows: Vec<_> = badge.display().visible().rows().collect();
        assert_eq!(rows, vec![(0, "Press start to open the launcher")]);

        let mut request = None;
        for _ in 0..11 {
            badge.tick();
            request = request.or_else(|| badge.take_sleep_request());
        }

        assert_eq!(request, Some(SleepRequest { duration: None }));
        assert_eq!(badge.scheduler().tick_source().running(), None);
        let rows: Vec<_> = badge.display().visible().rows().map(|(_, text)| text).collect();
        assert_eq!(rows, vec!["Sleeping...", "Press any key to wake up"]);
    }

    #[test]
    fn press_postpones_idle_detection() {
        let mut store = DirStore::open("/nonexistent/badge-root");
        let mut badge = Badge::boot(
            &mut store,
            SimNet::new(false),
            config(),
            Duration::from_millis(100),
        );

        for _ in 0..8 {
            badge.tick();
        }
        let handle = badge.press().expect("feed");
        for _ in 0..8 {
            badge.tick();
        }

        assert_eq!(badge.power().handle(), Some(handle));
        assert_eq!(badge.take_sleep_request(), None);
    }

    #[test]
    fn clock_survives_reset_but_connection_does_not() {
        let mut net = SimNet::new(true);
        assert!(net.enable_wifi());
        assert!(net.sync_clock());

        let reset = net.after_reset();
        assert!(!reset.wifi_connected());
        assert!(reset.unix_time() > 0);
    }

    #[test]
    fn settings_expose_only_the_response_time() {
        let settings = HostSettings {
            user_response_time_ms: Some(750),
        };
        assert_eq!(PowerConfig::load(&settings).user_response_time, Duration::from_millis(750));
        assert_eq!(settings.read_u16("splash", "other"), None);
    }
}
