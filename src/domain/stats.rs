//! Aggregate statistics read from a single site partition.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{SiteId, VisitorId};

/// Inclusive UTC date range for aggregate reads. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct StatsQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl StatsQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(format!("from ({from}) is after to ({to})"));
            }
        }
        Ok(())
    }
}

/// Aggregate counts for one site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SiteStats {
    pub site_id: SiteId,
    pub total_visits: u64,
    /// Distinct visitor identities in the queried range.
    pub unique_visitors: u64,
    pub countries: BTreeMap<String, u64>,
    pub pages: BTreeMap<String, u64>,
}

/// Per-day counters maintained on ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_visits: u64,
    pub unique_visitors: u64,
}

/// Per-visitor request history kept for bot-detection consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitorActivity {
    pub visitor_id: VisitorId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub request_count: u64,
    /// Highest user-agent suspicion score observed.
    pub ua_score: f64,
}

/// Week-over-week comparison of the last 14 recorded days.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyGrowth {
    pub current_week_visits: u64,
    pub previous_week_visits: u64,
    pub growth_rate_percent: f64,
}

/// Descriptive summary over a site's daily history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub average_daily_visits: f64,
    pub average_daily_unique: f64,
    pub busiest_day_of_week: String,
    pub weekly_growth: WeeklyGrowth,
}

impl StatsSummary {
    /// Summarize daily rows sorted by ascending date. `None` when there is no history.
    pub fn from_daily(days: &[DailyStats]) -> Option<Self> {
        if days.is_empty() {
            return None;
        }

        let n = days.len() as f64;
        let total: u64 = days.iter().map(|d| d.total_visits).sum();
        let unique: u64 = days.iter().map(|d| d.unique_visitors).sum();

        // Mean visits per weekday; ties resolve to the alphabetically first name.
        let mut by_weekday: BTreeMap<&'static str, (u64, u64)> = BTreeMap::new();
        for day in days {
            let entry = by_weekday.entry(weekday_name(day.date.weekday())).or_default();
            entry.0 += day.total_visits;
            entry.1 += 1;
        }
        let mut busiest = "";
        let mut best_mean = f64::MIN;
        for (name, (visits, count)) in &by_weekday {
            let mean = *visits as f64 / *count as f64;
            if mean > best_mean {
                best_mean = mean;
                busiest = *name;
            }
        }

        let mut weekly_growth = WeeklyGrowth {
            current_week_visits: 0,
            previous_week_visits: 0,
            growth_rate_percent: 0.0,
        };
        if days.len() >= 14 {
            let len = days.len();
            let current: u64 = days[len - 7..].iter().map(|d| d.total_visits).sum();
            let previous: u64 = days[len - 14..len - 7].iter().map(|d| d.total_visits).sum();
            weekly_growth.current_week_visits = current;
            weekly_growth.previous_week_visits = previous;
            if previous > 0 {
                let rate = (current as f64 - previous as f64) / previous as f64 * 100.0;
                weekly_growth.growth_rate_percent = round1(rate);
            }
        }

        Some(Self {
            average_daily_visits: round1(total as f64 / n),
            average_daily_unique: round1(unique as f64 / n),
            busiest_day_of_week: busiest.to_string(),
            weekly_growth,
        })
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64, visits: u64, unique: u64) -> DailyStats {
        // 2024-01-01 is a Monday
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        DailyStats {
            date: base + chrono::Duration::days(offset),
            total_visits: visits,
            unique_visitors: unique,
        }
    }

    #[test]
    fn test_empty_history_has_no_summary() {
        assert!(StatsSummary::from_daily(&[]).is_none());
    }

    #[test]
    fn test_averages_and_busiest_day() {
        let days = vec![day(0, 10, 5), day(1, 30, 10), day(2, 20, 6)];
        let summary = StatsSummary::from_daily(&days).unwrap();

        assert_eq!(summary.average_daily_visits, 20.0);
        assert_eq!(summary.average_daily_unique, 7.0);
        assert_eq!(summary.busiest_day_of_week, "Tuesday");
        // Fewer than 14 days: no growth figures
        assert_eq!(summary.weekly_growth.current_week_visits, 0);
        assert_eq!(summary.weekly_growth.growth_rate_percent, 0.0);
    }

    #[test]
    fn test_weekly_growth() {
        let mut days = Vec::new();
        for i in 0..7 {
            days.push(day(i, 10, 1));
        }
        for i in 7..14 {
            days.push(day(i, 15, 1));
        }
        let summary = StatsSummary::from_daily(&days).unwrap();

        assert_eq!(summary.weekly_growth.previous_week_visits, 70);
        assert_eq!(summary.weekly_growth.current_week_visits, 105);
        assert_eq!(summary.weekly_growth.growth_rate_percent, 50.0);
    }

    #[test]
    fn test_weekly_growth_with_empty_previous_week() {
        let mut days = Vec::new();
        for i in 0..7 {
            days.push(day(i, 0, 0));
        }
        for i in 7..14 {
            days.push(day(i, 3, 1));
        }
        let summary = StatsSummary::from_daily(&days).unwrap();
        assert_eq!(summary.weekly_growth.current_week_visits, 21);
        assert_eq!(summary.weekly_growth.growth_rate_percent, 0.0);
    }

    #[test]
    fn test_query_validation() {
        let q = StatsQuery {
            from: NaiveDate::from_ymd_opt(2024, 2, 1),
            to: NaiveDate::from_ymd_opt(2024, 1, 1),
        };
        assert!(q.validate().is_err());
        assert!(StatsQuery::all().validate().is_ok());
    }
}
