// SPDX-License-Identifier: MIT
//! Device fingerprint assembly.
//!
//! The ad-attribution API requires a 16-element ordered descriptor array with
//! every send. Field order is fixed by the API contract; fields the device
//! cannot supply are sent as empty strings, never omitted.

use serde::{Deserialize, Serialize};

/// Platform code expected in slot 0 of the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MobilePlatform {
    #[default]
    Android,
    Ios,
}

impl MobilePlatform {
    /// Wire code used by the attribution API.
    pub fn code(self) -> &'static str {
        match self {
            Self::Android => "a2",
            Self::Ios => "i2",
        }
    }
}

/// Raw device fields supplied by the device-info collaborator.
///
/// Optional numeric fields cover hardware the platform may refuse to report
/// (e.g. carrier-less tablets, emulators without telephony).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSnapshot {
    pub platform: MobilePlatform,
    pub bundle_id: String,
    /// Marketing version, e.g. "2.14.0".
    pub app_version_short: String,
    /// Build number, e.g. "2140".
    pub app_version_long: String,
    pub os_version: String,
    pub device_model: String,
    /// BCP-47 locale, e.g. "en_US".
    pub locale: String,
    /// Abbreviated timezone, e.g. "CET".
    pub timezone_abbr: String,
    pub carrier: String,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub screen_density: Option<f32>,
    pub cpu_cores: Option<u32>,
    pub storage_total_gb: Option<f64>,
    pub storage_free_gb: Option<f64>,
    /// IANA timezone name, e.g. "Europe/Berlin".
    pub timezone_iana: String,
}

impl DeviceSnapshot {
    /// Assemble the fixed 16-field descriptor array.
    ///
    /// Order: platform code, bundle id, short version, long version,
    /// OS version, device model, locale, timezone abbreviation, carrier,
    /// screen width, screen height, screen density, CPU cores, total storage,
    /// free storage, IANA timezone.
    pub fn descriptor(&self) -> [String; 16] {
        [
            self.platform.code().to_string(),
            self.bundle_id.clone(),
            self.app_version_short.clone(),
            self.app_version_long.clone(),
            self.os_version.clone(),
            self.device_model.clone(),
            self.locale.clone(),
            self.timezone_abbr.clone(),
            self.carrier.clone(),
            opt_str(self.screen_width),
            opt_str(self.screen_height),
            opt_str(self.screen_density),
            opt_str(self.cpu_cores),
            opt_str(self.storage_total_gb),
            opt_str(self.storage_free_gb),
            self.timezone_iana.clone(),
        ]
    }
}

fn opt_str<T: ToString>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}
