//! Per-campaign sending settings.

use crate::error::{SlotError, SlotResult};
use crate::plan::SendingPlan;
use crate::window::{DailyWindow, WindowSpec};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound shared by the throttle, concurrency and per-domain limits.
pub const MAX_LIMIT: u32 = 10_000;

/// Validated sending settings of one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSettings {
    pub windows: Vec<DailyWindow>,
    pub throttle_per_minute: u32,
    pub max_concurrent: u32,
    /// Sends allowed per recipient domain in a single dispatch poll
    #[serde(default)]
    pub per_domain: BTreeMap<String, u32>,
    #[serde(default)]
    pub quiet_hours: Vec<DailyWindow>,
    #[serde(default = "default_tz")]
    pub time_zone: Tz,
}

fn default_tz() -> Tz {
    Tz::UTC
}

impl Default for CampaignSettings {
    /// Two weekday-style windows at 60 sends per minute.
    fn default() -> Self {
        Self {
            windows: vec![
                DailyWindow::fixed(9 * 60 + 30, 11 * 60 + 45),
                DailyWindow::fixed(13 * 60 + 15, 16 * 60 + 30),
            ],
            throttle_per_minute: 60,
            max_concurrent: 50,
            per_domain: BTreeMap::new(),
            quiet_hours: Vec::new(),
            time_zone: Tz::UTC,
        }
    }
}

impl CampaignSettings {
    /// Check ranges and that the windows leave at least one admissible minute.
    pub fn validate(&self) -> SlotResult<()> {
        if !(1..=MAX_LIMIT).contains(&self.throttle_per_minute) {
            return Err(SlotError::InvalidThrottle(self.throttle_per_minute));
        }
        if !(1..=MAX_LIMIT).contains(&self.max_concurrent) {
            return Err(SlotError::InvalidConcurrency(self.max_concurrent));
        }
        for (domain, limit) in &self.per_domain {
            if !(1..=MAX_LIMIT).contains(limit) {
                return Err(SlotError::InvalidDomainLimit {
                    domain: domain.clone(),
                    limit: *limit,
                });
            }
        }
        self.plan().map(|_| ())
    }

    /// The admissible-minute map for these settings.
    pub fn plan(&self) -> SlotResult<SendingPlan> {
        SendingPlan::new(&self.windows, &self.quiet_hours, self.time_zone)
    }

    /// Per-poll cap for a recipient address, if its domain has one.
    pub fn domain_limit(&self, email: &str) -> Option<u32> {
        let domain = email.rsplit_once('@')?.1.to_lowercase();
        self.per_domain.get(&domain).copied()
    }
}

/// Payload of the reconfiguration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigureRequest {
    pub windows: Vec<WindowSpec>,
    pub throttle_per_minute: u32,
    pub max_concurrent: u32,
    #[serde(default)]
    pub per_domain: Option<BTreeMap<String, u32>>,
    #[serde(default)]
    pub quiet_hours: Option<Vec<WindowSpec>>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

impl TryFrom<ReconfigureRequest> for CampaignSettings {
    type Error = SlotError;

    fn try_from(request: ReconfigureRequest) -> SlotResult<Self> {
        let windows = request
            .windows
            .into_iter()
            .map(DailyWindow::try_from)
            .collect::<SlotResult<Vec<_>>>()?;

        let quiet_hours = request
            .quiet_hours
            .unwrap_or_default()
            .into_iter()
            .map(DailyWindow::try_from)
            .collect::<SlotResult<Vec<_>>>()?;

        let time_zone = match request.time_zone.as_deref() {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| SlotError::UnknownTimeZone(name.to_string()))?,
            None => Tz::UTC,
        };

        let per_domain = request
            .per_domain
            .unwrap_or_default()
            .into_iter()
            .map(|(domain, limit)| (domain.to_lowercase(), limit))
            .collect();

        let settings = CampaignSettings {
            windows,
            throttle_per_minute: request.throttle_per_minute,
            max_concurrent: request.max_concurrent,
            per_domain,
            quiet_hours,
            time_zone,
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ReconfigureRequest {
        serde_json::from_str(
            r#"{
                "windows": [{"start": "09:30", "end": "11:45"}, {"start": "13:15", "end": "16:30"}],
                "throttlePerMinute": 2,
                "maxConcurrent": 10
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = CampaignSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.windows.len(), 2);
        assert_eq!(settings.throttle_per_minute, 60);
        assert_eq!(settings.max_concurrent, 50);
    }

    #[test]
    fn test_request_converts() {
        let settings = CampaignSettings::try_from(request()).unwrap();
        assert_eq!(settings.throttle_per_minute, 2);
        assert_eq!(settings.time_zone, Tz::UTC);
        assert!(settings.quiet_hours.is_empty());
    }

    #[test]
    fn test_request_rejects_inverted_window() {
        let mut req = request();
        req.windows.push(WindowSpec::new("18:00", "17:00"));
        assert!(matches!(
            CampaignSettings::try_from(req),
            Err(SlotError::EmptyWindow { .. })
        ));
    }

    #[test]
    fn test_request_rejects_empty_windows_and_limits() {
        let mut req = request();
        req.windows.clear();
        assert_eq!(CampaignSettings::try_from(req).unwrap_err(), SlotError::NoWindows);

        let mut req = request();
        req.throttle_per_minute = 0;
        assert_eq!(
            CampaignSettings::try_from(req).unwrap_err(),
            SlotError::InvalidThrottle(0)
        );

        let mut req = request();
        req.max_concurrent = 10_001;
        assert!(CampaignSettings::try_from(req).is_err());
    }

    #[test]
    fn test_request_time_zone_and_domains() {
        let mut req = request();
        req.time_zone = Some("Europe/Berlin".to_string());
        req.per_domain = Some(BTreeMap::from([("Example.COM".to_string(), 5)]));
        let settings = CampaignSettings::try_from(req).unwrap();
        assert_eq!(settings.time_zone, Tz::Europe__Berlin);
        assert_eq!(settings.domain_limit("ops@example.com"), Some(5));
        assert_eq!(settings.domain_limit("ops@other.org"), None);

        let mut req = request();
        req.time_zone = Some("Mars/Olympus".to_string());
        assert!(matches!(
            CampaignSettings::try_from(req),
            Err(SlotError::UnknownTimeZone(_))
        ));
    }

    #[test]
    fn test_settings_round_trip_through_json() {
        let settings = CampaignSettings::default();
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["windows"][0]["start"], "09:30");
        assert_eq!(json["throttlePerMinute"], 60);
    }
}
