//! Completion throughput over a trailing window of UTC calendar days.
//!
//! The window ending `today` covers `today - (window_days - 1) ..= today`.
//! Completions are bucketed by the UTC date of `completed_at`; six extra days
//! before the window feed the first rolling averages.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Priority;

/// Span of the trailing mean.
pub const ROLLING_DAYS: u64 = 7;

/// Priorities at or above this level (numerically at or below) count as high.
pub const HIGH_PRIORITY_MAX: Priority = 2;

/// A completed task, as seen by the analyzer.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub completed_at: DateTime<Utc>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Stable => "stable",
            Trend::Declining => "declining",
        }
    }

    fn score_bonus(&self) -> f64 {
        match self {
            Trend::Improving => 50.0,
            Trend::Stable => 30.0,
            Trend::Declining => 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub completed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayCount {
    pub weekday: String,
    pub completed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityReport {
    pub window_days: u32,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub total_completed: u32,
    pub tasks_per_day: f64,
    /// Trailing 7-day mean for each day of the window, oldest first.
    pub rolling_7day_average: Vec<f64>,
    pub daily: Vec<DailyCount>,
    pub trend: Trend,
    pub best_weekday: Option<WeekdayCount>,
    pub worst_weekday: Option<WeekdayCount>,
    pub high_priority_ratio: f64,
    pub productivity_score: f64,
}

/// First and last calendar day of a window ending `today`.
pub fn window_dates(window_days: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let span = u64::from(window_days.max(1)) - 1;
    let start = today.checked_sub_days(Days::new(span)).unwrap_or(NaiveDate::MIN);
    (start, today)
}

/// Half-open epoch-millisecond range of completions the analyzer needs,
/// including the rolling-average lookback.
pub fn query_range(window_days: u32, today: NaiveDate) -> (i64, i64) {
    let (start, end) = window_dates(window_days, today);
    let from = start
        .checked_sub_days(Days::new(ROLLING_DAYS - 1))
        .unwrap_or(NaiveDate::MIN);
    day_range_ms(from, end)
}

/// Half-open epoch-millisecond range covering the UTC days `start..=end`.
pub fn day_range_ms(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    let to = end.succ_opt().unwrap_or(NaiveDate::MAX);
    (day_start_ms(start), day_start_ms(to))
}

fn day_start_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// Classify the change between the first and second half of `counts`.
///
/// With an odd length the middle day belongs to neither half.
pub fn classify_trend(counts: &[u32], threshold: f64) -> Trend {
    let half = counts.len() / 2;
    if half == 0 {
        return Trend::Stable;
    }
    let first = mean(&counts[..half]);
    let second = mean(&counts[counts.len() - half..]);

    if first == 0.0 && second == 0.0 {
        Trend::Stable
    } else if second > first * (1.0 + threshold) {
        Trend::Improving
    } else if second < first * (1.0 - threshold) {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

fn mean(counts: &[u32]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    counts.iter().map(|&c| f64::from(c)).sum::<f64>() / counts.len() as f64
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Analyze completions over the window ending `today` (UTC).
pub fn analyze(
    completions: &[Completion],
    window_days: u32,
    today: NaiveDate,
    trend_threshold: f64,
) -> VelocityReport {
    let window_days = window_days.max(1);
    let (start, end) = window_dates(window_days, today);

    let mut per_day: HashMap<NaiveDate, u32> = HashMap::new();
    let mut high_priority = 0u32;
    for completion in completions {
        let date = completion.completed_at.date_naive();
        *per_day.entry(date).or_default() += 1;
        if date >= start && date <= end && completion.priority <= HIGH_PRIORITY_MAX {
            high_priority += 1;
        }
    }
    let count_on = |date: NaiveDate| per_day.get(&date).copied().unwrap_or(0);

    let mut daily = Vec::with_capacity(window_days as usize);
    let mut rolling = Vec::with_capacity(window_days as usize);
    for date in start.iter_days().take(window_days as usize) {
        let trailing: u32 = (0..ROLLING_DAYS)
            .filter_map(|back| date.checked_sub_days(Days::new(back)))
            .map(count_on)
            .sum();
        rolling.push(f64::from(trailing) / ROLLING_DAYS as f64);
        daily.push(DailyCount {
            date,
            completed: count_on(date),
        });
    }

    let counts: Vec<u32> = daily.iter().map(|d| d.completed).collect();
    let total: u32 = counts.iter().sum();
    let tasks_per_day = f64::from(total) / f64::from(window_days);
    let trend = classify_trend(&counts, trend_threshold);

    let (best_weekday, worst_weekday) = weekday_extremes(&daily, total);

    let high_priority_ratio = if total == 0 {
        0.0
    } else {
        f64::from(high_priority) / f64::from(total)
    };
    let productivity_score = round1(
        (tasks_per_day * 10.0 * 0.5 + high_priority_ratio * 100.0 * 0.3 + trend.score_bonus() * 0.2)
            .min(100.0),
    );

    VelocityReport {
        window_days,
        window_start: start,
        window_end: end,
        total_completed: total,
        tasks_per_day,
        rolling_7day_average: rolling,
        daily,
        trend,
        best_weekday,
        worst_weekday,
        high_priority_ratio,
        productivity_score,
    }
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

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

/// Busiest and quietest weekday among those present in the window; ties go
/// to the earlier weekday.
fn weekday_extremes(
    daily: &[DailyCount],
    total: u32,
) -> (Option<WeekdayCount>, Option<WeekdayCount>) {
    if total == 0 {
        return (None, None);
    }

    let mut by_weekday: HashMap<Weekday, u32> = HashMap::new();
    for day in daily {
        *by_weekday.entry(day.date.weekday()).or_default() += day.completed;
    }

    let present: Vec<(Weekday, u32)> = WEEKDAYS
        .iter()
        .filter_map(|wd| by_weekday.get(wd).map(|&c| (*wd, c)))
        .collect();

    let mut best = present[0];
    let mut worst = present[0];
    for &(day, count) in &present[1..] {
        if count > best.1 {
            best = (day, count);
        }
        if count < worst.1 {
            worst = (day, count);
        }
    }

    let to_count = |(day, completed): (Weekday, u32)| WeekdayCount {
        weekday: weekday_name(day).to_string(),
        completed,
    };
    (Some(to_count(best)), Some(to_count(worst)))
}
