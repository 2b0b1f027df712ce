//! Shared value types used by the VerticalWorkloadAutoscaler CRD.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Quality of service class applied to the managed workload.
///
/// Controls whether the projector pins limits to requests (`Guaranteed`) or
/// spreads requests/limits across the recommendation range (`Burstable`).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum QualityOfService {
    /// CPU and memory requests equal limits for all containers
    #[default]
    Guaranteed,
    /// Requests track the lower bound, limits the upper bound
    Burstable,
}

/// Reference to the VerticalPodAutoscaler this VWA coordinates with.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct VpaReference {
    /// Name of the VPA in the same namespace
    pub name: String,
}

/// Day of the week for an update window.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    /// The matching chrono weekday.
    pub fn weekday(self) -> chrono::Weekday {
        match self {
            Self::Monday => chrono::Weekday::Mon,
            Self::Tuesday => chrono::Weekday::Tue,
            Self::Wednesday => chrono::Weekday::Wed,
            Self::Thursday => chrono::Weekday::Thu,
            Self::Friday => chrono::Weekday::Fri,
            Self::Saturday => chrono::Weekday::Sat,
            Self::Sunday => chrono::Weekday::Sun,
        }
    }
}

/// A weekly time window during which target mutations are allowed.
///
/// The window is half-open `[startTime, endTime)` on the given weekday,
/// interpreted in `timeZone`. Windows crossing midnight are not supported;
/// declare one window per day instead.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWindow {
    /// Day of the week the window applies to
    pub day_of_week: DayOfWeek,

    /// Start of the window, inclusive, formatted `HH:MM` (24h)
    #[schemars(regex(pattern = r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$"))]
    pub start_time: String,

    /// End of the window, exclusive, formatted `HH:MM` (24h)
    #[schemars(regex(pattern = r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$"))]
    pub end_time: String,

    /// IANA time zone name, like `UTC` or `America/New_York`
    #[schemars(regex(pattern = r"^([A-Za-z]+/[A-Za-z_]+|UTC)$"))]
    pub time_zone: String,
}

impl UpdateWindow {
    /// Validate the window for admission.
    ///
    /// The evaluation path skips malformed windows silently; this check
    /// exists so `kubectl apply` feedback and tests can reject them up
    /// front, including windows that would cross midnight.
    pub fn validate(&self) -> Result<(), Error> {
        let start = parse_hh_mm(&self.start_time).ok_or_else(|| {
            Error::validation_for_field("startTime", format!("invalid time '{}'", self.start_time))
        })?;
        let end = parse_hh_mm(&self.end_time).ok_or_else(|| {
            Error::validation_for_field("endTime", format!("invalid time '{}'", self.end_time))
        })?;
        if start >= end {
            return Err(Error::validation(format!(
                "window {}-{} must start before it ends; windows crossing midnight are not supported",
                self.start_time, self.end_time
            )));
        }
        if self.time_zone.parse::<chrono_tz::Tz>().is_err() {
            return Err(Error::validation_for_field(
                "timeZone",
                format!("unknown time zone '{}'", self.time_zone),
            ));
        }
        Ok(())
    }
}

/// Parse an `HH:MM` string into a chrono time.
pub fn parse_hh_mm(value: &str) -> Option<chrono::NaiveTime> {
    let (h, m) = value.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    chrono::NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Percentage thresholds below which a recommendation is treated as noise.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct UpdateTolerance {
    /// CPU tolerance in percent (0..100, default 10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 100))]
    pub cpu: Option<u8>,

    /// Memory tolerance in percent (0..100, default 10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 100))]
    pub memory: Option<u8>,
}

/// A resource whose scaling this VWA defers on.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// The contested resource (`cpu` or `memory`)
    pub resource: String,

    /// Kind of the conflicting scaler (e.g. `HorizontalPodAutoscaler`)
    pub conflict_with: String,

    /// Why the resource is contested
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl Conflict {
    /// A conflict with an HPA scaling the given resource.
    pub fn with_hpa(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            conflict_with: "HorizontalPodAutoscaler".to_string(),
            reason: format!("HPA scales {resource}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: &str, end: &str, tz: &str) -> UpdateWindow {
        UpdateWindow {
            day_of_week: DayOfWeek::Monday,
            start_time: start.to_string(),
            end_time: end.to_string(),
            time_zone: tz.to_string(),
        }
    }

    #[test]
    fn valid_window_passes() {
        window("10:00", "12:00", "UTC").validate().unwrap();
        window("9:30", "17:45", "America/New_York").validate().unwrap();
    }

    #[test]
    fn midnight_crossing_window_is_rejected() {
        let err = window("22:00", "02:00", "UTC").validate().unwrap_err();
        assert!(err.to_string().contains("crossing midnight"));
    }

    #[test]
    fn degenerate_window_is_rejected() {
        assert!(window("10:00", "10:00", "UTC").validate().is_err());
    }

    #[test]
    fn malformed_times_are_rejected() {
        assert!(window("25:00", "26:00", "UTC").validate().is_err());
        assert!(window("10:61", "11:00", "UTC").validate().is_err());
        assert!(window("noon", "13:00", "UTC").validate().is_err());
    }

    #[test]
    fn unknown_zone_is_rejected() {
        let err = window("10:00", "12:00", "Mars/Olympus_Mons")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("unknown time zone"));
    }

    #[test]
    fn day_of_week_maps_to_chrono() {
        assert_eq!(DayOfWeek::Monday.weekday(), chrono::Weekday::Mon);
        assert_eq!(DayOfWeek::Sunday.weekday(), chrono::Weekday::Sun);
    }

    #[test]
    fn hpa_conflict_names_the_resource() {
        let c = Conflict::with_hpa("cpu");
        assert_eq!(c.resource, "cpu");
        assert_eq!(c.conflict_with, "HorizontalPodAutoscaler");
        assert_eq!(c.reason, "HPA scales cpu");
    }

    #[test]
    fn qos_defaults_to_guaranteed() {
        assert_eq!(QualityOfService::default(), QualityOfService::Guaranteed);
    }
}
