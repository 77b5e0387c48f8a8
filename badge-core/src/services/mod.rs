//! Background service discovery and scheduling.
//!
//! Installed apps may ship a background service: a manifest describing what it
//! needs (wifi, a set clock) and what it offers (a periodic loop, a status
//! area drawn on the idle screen). [`ServiceRunner::setup`] walks the installed
//! apps once at boot, negotiates each manifest, and registers the resulting
//! loop tasks plus one shared, hidden draw task with the scheduler.
//!
//! The runner never owns the scheduler. Tasks are registered under
//! [`ServiceTask`] keys converted into the application's key type, and the
//! application's [`TaskRunner`](crate::scheduler::TaskRunner) routes those keys
//! back to [`ServiceRunner::run_loop`] and [`ServiceRunner::draw_task`].

use core::{fmt, time::Duration};

use heapless::{String, Vec};

use crate::scheduler::{TaskFault, TaskHandle, TaskOutcome, TaskRegistry, Visibility};

pub mod manifest;

pub use manifest::{ManifestError, SUPPORTED_API_VERSION, ServiceManifest};

/// Default number of services a [`ServiceRunner`] can hold.
pub const MAX_SERVICES: usize = 8;

/// Longest app directory name kept by the runner.
pub const MAX_APP_NAME: usize = 32;

/// Largest manifest the loader reads.
pub const MAX_MANIFEST_LEN: usize = 512;

/// Initial delay of service loop and draw tasks.
const FIRST_RUN: Duration = Duration::from_millis(1);

/// Name of an installed app.
pub type AppName = String<MAX_APP_NAME>;

/// Errors reported by a service implementation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServiceError {
    /// The manifest asked for an entry point the service does not implement.
    NotProvided,
    Failed(&'static str),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::NotProvided => f.write_str("entry point not provided"),
            ServiceError::Failed(reason) => f.write_str(reason),
        }
    }
}

/// Errors reported by a [`ServiceStore`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreError {
    /// The app list itself cannot be read.
    Unavailable,
    NotFound,
    /// The manifest does not fit the loader's buffer.
    TooLarge,
    /// The file exists but is not valid UTF-8 or otherwise unreadable.
    Invalid,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable => f.write_str("app storage unavailable"),
            StoreError::NotFound => f.write_str("not found"),
            StoreError::TooLarge => f.write_str("too large"),
            StoreError::Invalid => f.write_str("unreadable"),
        }
    }
}

/// Result of one draw callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DrawReport {
    /// When the service wants to draw again; `None` (or zero) stops drawing.
    pub next_interval: Option<Duration>,
    /// Vertical space consumed, in pixels.
    pub space_used: u16,
}

impl DrawReport {
    #[must_use]
    pub const fn again_in(interval: Duration, space_used: u16) -> Self {
        Self {
            next_interval: Some(interval),
            space_used,
        }
    }

    #[must_use]
    pub const fn done(space_used: u16) -> Self {
        Self {
            next_interval: None,
            space_used,
        }
    }
}

/// A background service shipped by an installed app.
///
/// Every entry point is optional; the manifest decides which ones are used.
pub trait Service {
    /// Drawing target handed to [`Service::draw`].
    type Surface: ?Sized;

    /// One-time initialisation, run after the service's requirements are met.
    ///
    /// # Errors
    ///
    /// A failed setup drops the service for the session.
    fn setup(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Periodic work. The outcome re-arms or removes the loop task.
    ///
    /// # Errors
    ///
    /// Any error removes the loop task.
    fn run_loop(&mut self) -> Result<TaskOutcome, ServiceError> {
        Err(ServiceError::NotProvided)
    }

    /// Draws the service's status area at the bottom of the remaining space.
    /// `y_budget` is the number of pixel rows still free above the previous
    /// services' areas.
    ///
    /// # Errors
    ///
    /// Any error removes the service from the draw list.
    fn draw(
        &mut self,
        surface: &mut Self::Surface,
        y_budget: u16,
    ) -> Result<DrawReport, ServiceError> {
        let _ = (surface, y_budget);
        Err(ServiceError::NotProvided)
    }
}

/// Where installed apps and their services come from.
pub trait ServiceStore {
    type Service: Service;

    /// Number of installed apps.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] aborts service setup entirely.
    fn app_count(&self) -> Result<usize, StoreError>;

    /// Name of the app at `index`, or `None` when it cannot be represented.
    fn app_name(&self, index: usize) -> Option<AppName>;

    /// Reads the app's manifest into `buf`.
    ///
    /// # Errors
    ///
    /// Any error skips the app.
    fn read_manifest<'b>(&mut self, app: &str, buf: &'b mut [u8]) -> Result<&'b str, StoreError>;

    /// Instantiates the app's service.
    ///
    /// # Errors
    ///
    /// Any error skips the app.
    fn load(&mut self, app: &str) -> Result<Self::Service, StoreError>;
}

/// Network and clock facilities a service may depend on.
pub trait Connectivity {
    fn wifi_connected(&self) -> bool;

    /// Tries to bring wifi up; returns whether it is connected afterwards.
    fn enable_wifi(&mut self) -> bool;

    /// Current wall-clock time in seconds since the Unix epoch.
    fn unix_time(&self) -> u64;

    /// Sets the clock from the network; returns whether it succeeded.
    fn sync_clock(&mut self) -> bool;
}

/// Display owner that brackets service drawing.
pub trait DrawHost {
    type Surface: ?Sized;

    /// Called before the draw callbacks run.
    fn prepare(&mut self);

    /// Called after the draw callbacks ran, e.g. to flush the panel.
    fn complete(&mut self);

    /// Total drawable height in pixels.
    fn height(&self) -> u16;

    fn surface(&mut self) -> &mut Self::Surface;
}

/// Scheduler keys used for service tasks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ServiceTask {
    /// Loop of the service in the given runner slot.
    Loop(u8),
    /// The shared draw driver.
    Draw,
}

/// Loader policy knobs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ServiceConfig {
    pub api_version: u32,
    /// Draw driver never re-runs sooner than this.
    pub min_draw_interval: Duration,
    /// Clock readings (Unix seconds) below this count as unset.
    pub clock_valid_after: u64,
    /// Delay before retrying a loop whose wifi could not be enabled.
    pub wifi_retry_interval: Duration,
}

impl ServiceConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            api_version: SUPPORTED_API_VERSION,
            min_draw_interval: Duration::from_millis(1_000),
            clock_valid_after: 1_482_192_000,
            wifi_retry_interval: Duration::from_secs(10),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an app's service was not started.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    NameUnreadable,
    NoManifest(StoreError),
    Manifest(ManifestError),
    NoService(StoreError),
    WifiUnavailable,
    /// Wifi failed for an earlier app during this setup pass.
    WifiFailedEarlier,
    ClockUnavailable,
    SetupFailed(ServiceError),
    NoSlot,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NameUnreadable => f.write_str("app name unreadable"),
            SkipReason::NoManifest(err) => write!(f, "manifest {err}"),
            SkipReason::Manifest(err) => write!(f, "{err}"),
            SkipReason::NoService(err) => write!(f, "service script {err}"),
            SkipReason::WifiUnavailable => f.write_str("could not connect to wifi"),
            SkipReason::WifiFailedEarlier => f.write_str("requires wifi and wifi already failed"),
            SkipReason::ClockUnavailable => f.write_str("requires a set clock and wifi failed"),
            SkipReason::SetupFailed(err) => write!(f, "setup failed: {err}"),
            SkipReason::NoSlot => f.write_str("no free service slot"),
        }
    }
}

/// A started service.
pub struct ServiceSlot<S> {
    name: AppName,
    manifest: ServiceManifest,
    service: S,
    loop_handle: Option<TaskHandle>,
    draws: bool,
}

impl<S> ServiceSlot<S> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn manifest(&self) -> &ServiceManifest {
        &self.manifest
    }

    #[must_use]
    pub const fn loop_handle(&self) -> Option<TaskHandle> {
        self.loop_handle
    }

    /// Whether the service is still on the draw list.
    #[must_use]
    pub const fn draws(&self) -> bool {
        self.draws
    }

    #[must_use]
    pub const fn service(&self) -> &S {
        &self.service
    }
}

/// Starts services and runs their scheduled entry points.
pub struct ServiceRunner<S, const N: usize = MAX_SERVICES> {
    config: ServiceConfig,
    slots: Vec<ServiceSlot<S>, N>,
    draw_order: Vec<u8, N>,
    draw_handle: Option<TaskHandle>,
}

impl<S: Service, const N: usize> ServiceRunner<S, N> {
    #[must_use]
    pub const fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            draw_order: Vec::new(),
            draw_handle: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn services(&self) -> &[ServiceSlot<S>] {
        &self.slots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Handle of the shared draw task while it is registered.
    #[must_use]
    pub const fn draw_handle(&self) -> Option<TaskHandle> {
        self.draw_handle
    }

    /// Discovers and starts services.
    ///
    /// `host_draws` tells whether the caller supplies a [`DrawHost`]; without
    /// one, draw requests are ignored. Returns `true` when the hidden draw
    /// task was registered, meaning the runner now owns screen redraws.
    pub fn setup<St, C, R, K>(
        &mut self,
        store: &mut St,
        net: &mut C,
        registry: &mut R,
        host_draws: bool,
    ) -> bool
    where
        St: ServiceStore<Service = S> + ?Sized,
        C: Connectivity + ?Sized,
        R: TaskRegistry<K> + ?Sized,
        K: From<ServiceTask>,
    {
        let count = match store.app_count() {
            Ok(count) => count,
            Err(err) => {
                log::warn!("services disabled: {err}");
                return false;
            }
        };

        let mut wifi_failed = false;
        for index in 0..count {
            let Some(name) = store.app_name(index) else {
                log::info!("app #{index} skipped: {}", SkipReason::NameUnreadable);
                continue;
            };

            match self.start(&name, store, net, registry, host_draws, &mut wifi_failed) {
                Ok(slot) => log::info!("service for {name} started in slot {slot}"),
                Err(reason) => log::info!("service for {name} skipped: {reason}"),
            }
        }

        if self.draw_order.is_empty() || !host_draws {
            return false;
        }

        match registry.add(K::from(ServiceTask::Draw), FIRST_RUN, Visibility::Hidden) {
            Ok(handle) => {
                self.draw_handle = Some(handle);
                log::info!("services now handle screen redraws");
                true
            }
            Err(err) => {
                log::warn!("service draw task not registered: {err}");
                false
            }
        }
    }

    fn start<St, C, R, K>(
        &mut self,
        name: &AppName,
        store: &mut St,
        net: &mut C,
        registry: &mut R,
        host_draws: bool,
        wifi_failed: &mut bool,
    ) -> Result<u8, SkipReason>
    where
        St: ServiceStore<Service = S> + ?Sized,
        C: Connectivity + ?Sized,
        R: TaskRegistry<K> + ?Sized,
        K: From<ServiceTask>,
    {
        let mut buf = [0u8; MAX_MANIFEST_LEN];
        let text = store
            .read_manifest(name, &mut buf)
            .map_err(SkipReason::NoManifest)?;
        let manifest = ServiceManifest::parse(text).map_err(SkipReason::Manifest)?;
        manifest
            .check_api(self.config.api_version)
            .map_err(SkipReason::Manifest)?;

        let mut service = store.load(name).map_err(SkipReason::NoService)?;

        if manifest.requires_wifi() {
            if *wifi_failed {
                return Err(SkipReason::WifiFailedEarlier);
            }
            if !net.wifi_connected() && !net.enable_wifi() {
                *wifi_failed = true;
                return Err(SkipReason::WifiUnavailable);
            }
        }

        if manifest.requires_rtc && net.unix_time() < self.config.clock_valid_after {
            if *wifi_failed {
                return Err(SkipReason::ClockUnavailable);
            }
            log::info!("{name} requires the clock, configuring");
            if !net.sync_clock() {
                log::warn!("clock sync failed for {name}");
            }
        }

        service.setup().map_err(SkipReason::SetupFailed)?;

        let slot = u8::try_from(self.slots.len()).map_err(|_| SkipReason::NoSlot)?;
        let draws = manifest.wants_draw && host_draws;
        self.slots
            .push(ServiceSlot {
                name: name.clone(),
                manifest,
                service,
                loop_handle: None,
                draws,
            })
            .map_err(|_| SkipReason::NoSlot)?;

        if manifest.wants_loop {
            match registry.add(K::from(ServiceTask::Loop(slot)), FIRST_RUN, Visibility::Visible) {
                Ok(handle) => {
                    if let Some(entry) = self.slots.last_mut() {
                        entry.loop_handle = Some(handle);
                    }
                }
                Err(err) => log::warn!("loop of {name} not registered: {err}"),
            }
        }

        if draws && self.draw_order.push(slot).is_err() {
            log::warn!("draw list full, {name} will not draw");
        }

        Ok(slot)
    }

    /// Body of a service loop task.
    ///
    /// When the manifest needs wifi in the loop and it cannot be brought up,
    /// the run is skipped and retried after
    /// [`ServiceConfig::wifi_retry_interval`].
    ///
    /// # Errors
    ///
    /// Returns a [`TaskFault`] for unknown slots, services without a loop,
    /// and failing loops; the scheduler then drops the task.
    pub fn run_loop<C: Connectivity + ?Sized>(
        &mut self,
        slot: u8,
        net: &mut C,
    ) -> Result<TaskOutcome, TaskFault> {
        let Some(entry) = self.slots.get_mut(usize::from(slot)) else {
            return Err(TaskFault::new("unknown service slot"));
        };

        if entry.manifest.requires_wifi_at_loop && !net.wifi_connected() && !net.enable_wifi() {
            log::warn!("{}: wifi unavailable, retrying later", entry.name);
            return Ok(TaskOutcome::RescheduleAfter(self.config.wifi_retry_interval));
        }

        match entry.service.run_loop() {
            Ok(outcome) => {
                if outcome.next_target().is_none() {
                    entry.loop_handle = None;
                }
                Ok(outcome)
            }
            Err(err) => {
                entry.loop_handle = None;
                log::warn!("{} loop: {err}", entry.name);
                Err(match err {
                    ServiceError::NotProvided => TaskFault::new("loop requested but not provided"),
                    ServiceError::Failed(reason) => TaskFault::new(reason),
                })
            }
        }
    }

    /// Body of the shared draw task.
    ///
    /// Runs every draw callback between [`DrawHost::prepare`] and
    /// [`DrawHost::complete`]. Each callback gets the rows left over by the
    /// callbacks before it. Callbacks that fail or stop asking for redraws
    /// leave the draw list; the task re-arms for the soonest requested redraw,
    /// but never sooner than [`ServiceConfig::min_draw_interval`], and removes
    /// itself once the list is empty.
    pub fn draw_task<H>(&mut self, host: &mut H) -> TaskOutcome
    where
        H: DrawHost<Surface = S::Surface> + ?Sized,
    {
        host.prepare();

        let mut budget = host.height();
        let mut soonest: Option<Duration> = None;
        let slots = &mut self.slots;
        self.draw_order.retain(|&slot| {
            let Some(entry) = slots.get_mut(usize::from(slot)) else {
                return false;
            };
            let keep = match entry.service.draw(host.surface(), budget) {
                Ok(report) => {
                    budget = budget.saturating_sub(report.space_used);
                    match report.next_interval.filter(|interval| !interval.is_zero()) {
                        Some(interval) => {
                            soonest =
                                Some(soonest.map_or(interval, |current| current.min(interval)));
                            true
                        }
                        None => {
                            log::debug!("{} stopped drawing", entry.name);
                            false
                        }
                    }
                }
                Err(err) => {
                    log::warn!("{} draw: {err}", entry.name);
                    false
                }
            };
            entry.draws = keep;
            keep
        });

        let outcome = match soonest {
            Some(interval) => {
                if interval < self.config.min_draw_interval {
                    log::debug!("draw interval {}ms raised to the minimum", interval.as_millis());
                }
                TaskOutcome::RescheduleAfter(interval.max(self.config.min_draw_interval))
            }
            None => {
                log::info!("no service draws remain");
                self.draw_handle = None;
                TaskOutcome::Remove
            }
        };

        host.complete();
        outcome
    }

    /// Runs every draw callback once, outside the scheduler, e.g. right before
    /// the badge goes to sleep. Intervals are ignored and failures only logged.
    pub fn force_draw<H>(&mut self, host: &mut H)
    where
        H: DrawHost<Surface = S::Surface> + ?Sized,
    {
        let mut budget = host.height();
        for &slot in &self.draw_order {
            let Some(entry) = self.slots.get_mut(usize::from(slot)) else {
                continue;
            };
            match entry.service.draw(host.surface(), budget) {
                Ok(report) => budget = budget.saturating_sub(report.space_used),
                Err(err) => log::warn!("{} draw: {err}", entry.name),
            }
        }
    }
}

impl<S: Service, const N: usize> Default for ServiceRunner<S, N> {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}
