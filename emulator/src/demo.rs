//! Demo services and the directory-backed app store.
//!
//! Manifests are read from `<root>/lib/<app>/service.json`; the services
//! themselves are compiled in and looked up by app name.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use badge_core::scheduler::TaskOutcome;
use badge_core::services::{AppName, DrawReport, Service, ServiceError, ServiceStore, StoreError};

use crate::badge::{ROW_HEIGHT, TextSurface};

/// Compiled-in background services.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DemoService {
    /// Draws the wall-clock time in the bottom row.
    Clock,
    /// Counts up in its loop and stops after `limit` runs.
    Counter { count: u32, limit: u32 },
    /// Pretends to fetch a forecast over wifi.
    Weather { fetches: u32 },
    /// Loop that fails on its third run.
    Flaky { runs: u32 },
}

impl DemoService {
    /// Looks up the implementation shipped for `app`.
    #[must_use]
    pub fn named(app: &str) -> Option<Self> {
        match app {
            "clock" => Some(Self::Clock),
            "counter" => Some(Self::Counter { count: 0, limit: 5 }),
            "weather" => Some(Self::Weather { fetches: 0 }),
            "flaky" => Some(Self::Flaky { runs: 0 }),
            _ => None,
        }
    }
}

impl Service for DemoService {
    type Surface = TextSurface;

    fn run_loop(&mut self) -> Result<TaskOutcome, ServiceError> {
        match self {
            Self::Clock => Err(ServiceError::NotProvided),
            Self::Counter { count, limit } => {
                *count += 1;
                log::info!("counter at {count}");
                if *count >= *limit {
                    Ok(TaskOutcome::Remove)
                } else {
                    Ok(TaskOutcome::after_millis(2_000))
                }
            }
            Self::Weather { fetches } => {
                *fetches += 1;
                log::debug!("forecast fetch #{fetches}");
                Ok(TaskOutcome::after_millis(30_000))
            }
            Self::Flaky { runs } => {
                *runs += 1;
                if *runs >= 3 {
                    Err(ServiceError::Failed("sensor went away"))
                } else {
                    Ok(TaskOutcome::after_millis(1_000))
                }
            }
        }
    }

    fn draw(
        &mut self,
        surface: &mut TextSurface,
        y_budget: u16,
    ) -> Result<DrawReport, ServiceError> {
        let Some(y) = y_budget.checked_sub(ROW_HEIGHT) else {
            return Ok(DrawReport::again_in(Duration::from_secs(60), 0));
        };
        match self {
            Self::Clock => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |elapsed| elapsed.as_secs());
                let minutes = secs / 60 % 60;
                let hours = secs / 3_600 % 24;
                surface.text(y, format!("{hours:02}:{minutes:02} UTC"));
                Ok(DrawReport::again_in(Duration::from_secs(60), ROW_HEIGHT))
            }
            Self::Weather { fetches } => {
                if *fetches == 0 {
                    surface.text(y, "forecast pending");
                } else {
                    surface.text(y, "12C, light rain");
                }
                Ok(DrawReport::again_in(Duration::from_secs(300), ROW_HEIGHT))
            }
            Self::Counter { .. } | Self::Flaky { .. } => Err(ServiceError::NotProvided),
        }
    }
}

/// App store backed by a directory tree.
#[derive(Clone, Debug)]
pub struct DirStore {
    root: PathBuf,
    apps: Option<Vec<String>>,
}

impl DirStore {
    pub const MANIFEST_FILE: &'static str = "service.json";

    /// Scans `<root>/lib` for installed apps. A missing directory leaves the
    /// store unavailable rather than empty.
    pub fn open(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let apps = fs::read_dir(root.join("lib")).ok().map(|entries| {
            let mut names: Vec<String> = entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect();
            names.sort();
            names
        });
        Self { root, apps }
    }

    fn manifest_path(&self, app: &str) -> PathBuf {
        self.root.join("lib").join(app).join(Self::MANIFEST_FILE)
    }
}

impl ServiceStore for DirStore {
    type Service = DemoService;

    fn app_count(&self) -> Result<usize, StoreError> {
        self.apps.as_ref().map(Vec::len).ok_or(StoreError::Unavailable)
    }

    fn app_name(&self, index: usize) -> Option<AppName> {
        let name = self.apps.as_ref()?.get(index)?;
        AppName::try_from(name.as_str()).ok()
    }

    fn read_manifest<'b>(&mut self, app: &str, buf: &'b mut [u8]) -> Result<&'b str, StoreError> {
        let bytes = fs::read(self.manifest_path(app)).map_err(|_| StoreError::NotFound)?;
        let target = buf.get_mut(..bytes.len()).ok_or(StoreError::TooLarge)?;
        target.copy_from_slice(&bytes);
        std::str::from_utf8(target).map_err(|_| StoreError::Invalid)
    }

    fn load(&mut self, app: &str) -> Result<DemoService, StoreError> {
        DemoService::named(app).ok_or(StoreError::NotFound)
    }
}
