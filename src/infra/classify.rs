//! Heuristic device, browser and referrer classification.

use crate::domain::{DeviceType, ReferrerKind, UserAgentHints, VisitClassification};

use super::VisitClassifier;

const BOT_MARKERS: &[&str] = &[
    "bot", "crawler", "spider", "slurp", "headless", "lighthouse", "facebookexternalhit",
];

const SCRIPT_MARKERS: &[&str] = &[
    "curl", "wget", "python", "go-http-client", "java/", "libwww", "httpclient", "okhttp",
    "node-fetch", "axios", "postman",
];

const SEARCH_HOSTS: &[&str] = &[
    "google.", "bing.", "duckduckgo.", "yahoo.", "baidu.", "yandex.", "ecosia.",
];

const SOCIAL_HOSTS: &[&str] = &[
    "facebook.", "twitter.com", "t.co", "x.com", "linkedin.", "lnkd.in", "reddit.",
    "instagram.", "youtube.", "pinterest.", "tiktok.", "news.ycombinator.com", "mastodon.",
];

/// Suspicion score for an empty or self-declared automated agent.
pub const UA_SCORE_BOT: f64 = 1.0;
/// Suspicion score for scripted HTTP clients.
pub const UA_SCORE_SCRIPTED: f64 = 0.5;

/// Keyword-based classifier; no external data.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl VisitClassifier for HeuristicClassifier {
    fn classify(&self, hints: &UserAgentHints) -> VisitClassification {
        let referrer = classify_referrer(hints.referrer.as_deref(), hints.host.as_deref());

        let ua = hints
            .user_agent
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .to_ascii_lowercase();
        if ua.is_empty() {
            return VisitClassification {
                device: DeviceType::Unknown,
                referrer,
                ua_score: UA_SCORE_BOT,
                ..Default::default()
            };
        }

        let (device, ua_score) = if BOT_MARKERS.iter().any(|m| ua.contains(m)) {
            (DeviceType::Bot, UA_SCORE_BOT)
        } else if SCRIPT_MARKERS.iter().any(|m| ua.contains(m)) {
            (DeviceType::Bot, UA_SCORE_SCRIPTED)
        } else {
            (device_of(&ua), 0.0)
        };

        VisitClassification {
            device,
            os: os_of(&ua).to_string(),
            browser: browser_of(&ua).to_string(),
            referrer,
            ua_score,
        }
    }
}

fn device_of(ua: &str) -> DeviceType {
    if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
        DeviceType::Tablet
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

fn os_of(ua: &str) -> &'static str {
    // iOS agents also claim "like Mac OS X"; Android agents also claim Linux.
    if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        "iOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("windows") {
        "Windows"
    } else if ua.contains("cros") {
        "ChromeOS"
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        "macOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

fn browser_of(ua: &str) -> &'static str {
    // Order matters: Edge and Opera also claim Chrome, Chrome also claims Safari.
    if ua.contains("edg/") || ua.contains("edge/") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("samsungbrowser") {
        "Samsung Internet"
    } else if ua.contains("firefox") || ua.contains("fxios") {
        "Firefox"
    } else if ua.contains("chrome") || ua.contains("crios") || ua.contains("chromium") {
        "Chrome"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        "Unknown"
    }
}

/// Host portion of a URL or bare host, lower-cased, without port or `www.`.
fn host_of(value: &str) -> Option<String> {
    let value = value.trim();
    let rest = match value.split_once("://") {
        Some((_, rest)) => rest,
        None => value,
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let authority = authority.rsplit('@').next().unwrap_or("");
    let host = if authority.starts_with('[') {
        authority.split(']').next().map(|h| h.trim_start_matches('['))
    } else {
        authority.split(':').next()
    }?;
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn host_matches(host: &str, pattern: &str) -> bool {
    if pattern.ends_with('.') {
        host.starts_with(pattern) || host.contains(&format!(".{pattern}"))
    } else {
        host == pattern || host.ends_with(&format!(".{pattern}"))
    }
}

fn classify_referrer(referrer: Option<&str>, own_host: Option<&str>) -> ReferrerKind {
    let Some(ref_host) = referrer.and_then(host_of) else {
        return ReferrerKind::Direct;
    };
    if own_host.and_then(host_of).is_some_and(|own| own == ref_host) {
        return ReferrerKind::Internal;
    }
    if SEARCH_HOSTS.iter().any(|p| host_matches(&ref_host, p)) {
        ReferrerKind::Search
    } else if SOCIAL_HOSTS.iter().any(|p| host_matches(&ref_host, p)) {
        ReferrerKind::Social
    } else {
        ReferrerKind::External
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ua(agent: &str) -> VisitClassification {
        HeuristicClassifier.classify(&UserAgentHints {
            user_agent: Some(agent.to_string()),
            ..Default::default()
        })
    }

    fn referred(referrer: &str, host: &str) -> ReferrerKind {
        HeuristicClassifier
            .classify(&UserAgentHints {
                user_agent: None,
                referrer: Some(referrer.to_string()),
                host: Some(host.to_string()),
            })
            .referrer
    }

    #[test]
    fn test_desktop_browsers() {
        let c = ua("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 Edg/120.0");
        assert_eq!(c.device, DeviceType::Desktop);
        assert_eq!(c.os, "Windows");
        assert_eq!(c.browser, "Edge");
        assert_eq!(c.ua_score, 0.0);

        let c = ua("Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15");
        assert_eq!(c.os, "macOS");
        assert_eq!(c.browser, "Safari");
    }

    #[test]
    fn test_mobile_and_tablet() {
        let c = ua("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148 Safari/604.1");
        assert_eq!(c.device, DeviceType::Mobile);
        assert_eq!(c.os, "iOS");

        let c = ua("Mozilla/5.0 (Linux; Android 14; SM-X700) AppleWebKit/537.36 Chrome/120.0 Safari/537.36");
        assert_eq!(c.device, DeviceType::Tablet);
        assert_eq!(c.os, "Android");
        assert_eq!(c.browser, "Chrome");

        let c = ua("Mozilla/5.0 (Android 14; Mobile; rv:121.0) Gecko/121.0 Firefox/121.0");
        assert_eq!(c.device, DeviceType::Mobile);
        assert_eq!(c.browser, "Firefox");
    }

    #[test]
    fn test_automation_scores() {
        assert_eq!(ua("Googlebot/2.1 (+http://www.google.com/bot.html)").ua_score, UA_SCORE_BOT);
        assert_eq!(ua("Googlebot/2.1").device, DeviceType::Bot);
        assert_eq!(ua("curl/8.4.0").ua_score, UA_SCORE_SCRIPTED);
        assert_eq!(ua("python-requests/2.31").ua_score, UA_SCORE_SCRIPTED);

        let empty = HeuristicClassifier.classify(&UserAgentHints::default());
        assert_eq!(empty.ua_score, UA_SCORE_BOT);
        assert_eq!(empty.device, DeviceType::Unknown);
        assert_eq!(empty.referrer, ReferrerKind::Direct);
    }

    #[test]
    fn test_referrer_categories() {
        assert_eq!(referred("https://www.google.com/search?q=x", "example.org"), ReferrerKind::Search);
        assert_eq!(referred("https://duckduckgo.com/", "example.org"), ReferrerKind::Search);
        assert_eq!(referred("https://t.co/abc", "example.org"), ReferrerKind::Social);
        assert_eq!(referred("https://old.reddit.com/r/rust", "example.org"), ReferrerKind::Social);
        assert_eq!(referred("https://www.example.org/about", "example.org:8000"), ReferrerKind::Internal);
        assert_eq!(referred("https://blog.rust-lang.org/", "example.org"), ReferrerKind::External);
        assert_eq!(referred("", "example.org"), ReferrerKind::Direct);
    }

    #[test]
    fn test_host_matching_is_not_substring() {
        // "spot.com" must not match the social host "t.co"
        assert_eq!(referred("https://spot.com/", "example.org"), ReferrerKind::External);
        assert_eq!(host_of("HTTPS://User@WWW.Example.COM:443/x"), Some("example.com".into()));
    }
}
