//! Page-view events and their classified attributes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{SiteId, VisitorId};

/// Maximum accepted length of a tracked path.
pub const MAX_PATH_LEN: usize = 2048;

/// Request headers used to classify a visit.
///
/// Carries no network address; the address is consumed by identity derivation
/// and geo lookup before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentHints {
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// Host the tracking request was addressed to, used to spot internal referrers.
    pub host: Option<String>,
}

/// Coarse device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Bot => "bot",
            DeviceType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "desktop" => DeviceType::Desktop,
            "mobile" => DeviceType::Mobile,
            "tablet" => DeviceType::Tablet,
            "bot" => DeviceType::Bot,
            _ => DeviceType::Unknown,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a visit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferrerKind {
    Direct,
    Internal,
    Search,
    Social,
    External,
}

impl ReferrerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferrerKind::Direct => "direct",
            ReferrerKind::Internal => "internal",
            ReferrerKind::Search => "search",
            ReferrerKind::Social => "social",
            ReferrerKind::External => "external",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "internal" => ReferrerKind::Internal,
            "search" => ReferrerKind::Search,
            "social" => ReferrerKind::Social,
            "external" => ReferrerKind::External,
            _ => ReferrerKind::Direct,
        }
    }
}

impl fmt::Display for ReferrerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the device/referrer classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitClassification {
    pub device: DeviceType,
    pub os: String,
    pub browser: String,
    pub referrer: ReferrerKind,
    /// Suspicion score in `[0, 1]`; 1.0 means the user agent looks automated.
    pub ua_score: f64,
}

impl Default for VisitClassification {
    fn default() -> Self {
        Self {
            device: DeviceType::Unknown,
            os: "Unknown".to_string(),
            browser: "Unknown".to_string(),
            referrer: ReferrerKind::Direct,
            ua_score: 0.0,
        }
    }
}

/// A recorded page view. Append-only: never updated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub site_id: SiteId,
    pub visitor_id: VisitorId,
    pub path: String,
    pub occurred_at: DateTime<Utc>,
    /// ISO country code or `"Unknown"`.
    pub country: String,
    pub device: DeviceType,
    pub os: String,
    pub browser: String,
    pub referrer: ReferrerKind,
    /// First visit by this visitor on `day()`.
    pub is_unique: bool,
}

impl Event {
    /// UTC calendar day the event belongs to.
    pub fn day(&self) -> NaiveDate {
        self.occurred_at.date_naive()
    }
}

/// Normalize a tracked path: empty becomes `/`, surrounding whitespace is dropped.
pub fn normalize_path(raw: Option<&str>) -> Result<String, String> {
    let path = raw.map(str::trim).unwrap_or("");
    if path.is_empty() {
        return Ok("/".to_string());
    }
    if path.len() > MAX_PATH_LEN {
        return Err(format!("path exceeds {MAX_PATH_LEN} bytes"));
    }
    if path.chars().any(char::is_control) {
        return Err("path contains control characters".to_string());
    }
    Ok(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(None).unwrap(), "/");
        assert_eq!(normalize_path(Some("  ")).unwrap(), "/");
        assert_eq!(normalize_path(Some(" /blog ")).unwrap(), "/blog");
        assert!(normalize_path(Some(&"/a".repeat(MAX_PATH_LEN))).is_err());
        assert!(normalize_path(Some("/a\nb")).is_err());
    }

    #[test]
    fn test_category_strings_roundtrip() {
        for d in [
            DeviceType::Desktop,
            DeviceType::Mobile,
            DeviceType::Tablet,
            DeviceType::Bot,
            DeviceType::Unknown,
        ] {
            assert_eq!(DeviceType::parse(d.as_str()), d);
        }
        for r in [
            ReferrerKind::Direct,
            ReferrerKind::Internal,
            ReferrerKind::Search,
            ReferrerKind::Social,
            ReferrerKind::External,
        ] {
            assert_eq!(ReferrerKind::parse(r.as_str()), r);
        }
    }
}
