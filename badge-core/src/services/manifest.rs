//! `service.json` capability manifests.
//!
//! A manifest is a small JSON object:
//!
//! ```json
//! { "apiVersion": 2, "wifi": { "setup": true }, "rtc": false, "loop": true, "draw": true }
//! ```
//!
//! Unknown keys are ignored. Every field is read as optional so a missing one
//! can be reported by name.

use core::fmt;

use serde::Deserialize;

/// Manifest API version understood by this firmware.
pub const SUPPORTED_API_VERSION: u32 = 2;

/// Capabilities and requirements declared by a service.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ServiceManifest {
    pub api_version: u32,
    pub requires_wifi_at_setup: bool,
    pub requires_wifi_at_loop: bool,
    pub requires_rtc: bool,
    pub wants_loop: bool,
    pub wants_draw: bool,
}

/// Reasons a manifest is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ManifestError {
    /// Not a JSON object, or a field holds the wrong JSON type.
    Malformed,
    MissingField(&'static str),
    Incompatible { found: u32, expected: u32 },
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Malformed => f.write_str("malformed manifest"),
            ManifestError::MissingField(name) => write!(f, "manifest lacks `{name}`"),
            ManifestError::Incompatible { found, expected } => {
                write!(f, "api version {found} is not compatible with {expected}")
            }
        }
    }
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(rename = "apiVersion")]
    api_version: Option<u32>,
    wifi: Option<RawWifi>,
    rtc: Option<bool>,
    #[serde(rename = "loop")]
    loop_enabled: Option<bool>,
    draw: Option<bool>,
}

#[derive(Deserialize)]
struct RawWifi {
    setup: Option<bool>,
    #[serde(rename = "loop", default)]
    loop_enabled: Option<bool>,
}

fn required<T>(value: Option<T>, name: &'static str) -> Result<T, ManifestError> {
    value.ok_or(ManifestError::MissingField(name))
}

impl ServiceManifest {
    /// Parses a manifest document.
    ///
    /// `wifi.loop` is optional and falls back to `wifi.setup`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the text is not a JSON object or a
    /// required field is missing or mistyped.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let (raw, _) = serde_json_core::from_str::<RawManifest>(text).map_err(|err| {
            log::debug!("manifest rejected: {err}");
            ManifestError::Malformed
        })?;

        let wifi = required(raw.wifi, "wifi")?;
        let requires_wifi_at_setup = required(wifi.setup, "wifi.setup")?;
        Ok(Self {
            api_version: required(raw.api_version, "apiVersion")?,
            requires_wifi_at_setup,
            requires_wifi_at_loop: wifi.loop_enabled.unwrap_or(requires_wifi_at_setup),
            requires_rtc: required(raw.rtc, "rtc")?,
            wants_loop: required(raw.loop_enabled, "loop")?,
            wants_draw: required(raw.draw, "draw")?,
        })
    }

    /// Checks the manifest against the API version the loader implements.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Incompatible`] on any mismatch.
    pub fn check_api(&self, expected: u32) -> Result<(), ManifestError> {
        if self.api_version == expected {
            Ok(())
        } else {
            Err(ManifestError::Incompatible {
                found: self.api_version,
                expected,
            })
        }
    }

    /// Whether the service needs wifi at any point.
    #[must_use]
    pub const fn requires_wifi(&self) -> bool {
        self.requires_wifi_at_setup || self.requires_wifi_at_loop
    }
}
