use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};

use report_core::domain::window::{ReportWindow, WindowBounds, WindowViolation};

fn june_21() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 21, 9, 0, 0).unwrap()
}

#[test]
fn collects_every_violation_in_one_pass() {
    let err = ReportWindow::parse("2025-01-10", "2024-12-01", &WindowBounds::default(), june_21())
        .expect_err("future start after end");
    assert!(err.contains(&WindowViolation::FutureStartDate(
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    )));
    assert!(err.contains(&WindowViolation::NegativeInterval));
    assert_eq!(err.violations.len(), 2);

    let bounds = WindowBounds {
        earliest_start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        max_interval: None,
    };
    let err = ReportWindow::parse("2023-06-01", "2022-01-01", &bounds, june_21())
        .expect_err("start too old and after end");
    assert!(err.contains(&WindowViolation::StartTooOld {
        start: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
        earliest: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    }));
    assert!(err.contains(&WindowViolation::NegativeInterval));
}

#[test]
fn unparseable_dates_report_the_raw_input() {
    let err = ReportWindow::parse("June 1st", "2024-06-31", &WindowBounds::default(), june_21())
        .expect_err("neither side parses");
    assert!(err.contains(&WindowViolation::InvalidDate("June 1st".into())));
    assert!(err.contains(&WindowViolation::InvalidDate("2024-06-31".into())));
}

#[test]
fn bare_end_dates_cover_their_whole_day() {
    let window =
        ReportWindow::parse("2024-06-01", "2024-06-10", &WindowBounds::default(), june_21())
            .expect("valid window");
    assert_eq!(window.start_ts(), 1_717_200_000);
    assert_eq!(window.end_ts(), 1_718_063_999);
    assert!(window.contains_ts(1_718_063_999));
    assert!(!window.contains_ts(1_718_064_000));

    let timed =
        ReportWindow::parse("2024-06-01", "2024-06-10 12:00:00", &WindowBounds::default(), june_21())
            .expect("valid window");
    assert_eq!(timed.end_ts(), 1_718_020_800, "an explicit time is kept as given");
}

#[test]
fn runaway_future_ends_clamp_to_year_end() {
    let window =
        ReportWindow::parse("2024-06-01", "2031-05-05", &WindowBounds::default(), june_21())
            .expect("valid window");
    assert_eq!(
        window.end(),
        Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap()
    );
}

#[test]
fn near_and_same_year_future_ends_stay_put() {
    let near = ReportWindow::parse("2024-06-01", "2024-07-05", &WindowBounds::default(), june_21())
        .expect("valid window");
    assert_eq!(
        near.end(),
        Utc.with_ymd_and_hms(2024, 7, 5, 23, 59, 59).unwrap()
    );

    let december =
        ReportWindow::parse("2024-06-01", "2024-12-25", &WindowBounds::default(), june_21())
            .expect("valid window");
    assert_eq!(
        december.end(),
        Utc.with_ymd_and_hms(2024, 12, 25, 23, 59, 59).unwrap(),
        "a far-out end inside the current year is taken literally"
    );
}

#[test]
fn interval_caps_are_checked_against_the_input_as_given() {
    let bounds = WindowBounds {
        earliest_start: None,
        max_interval: Some(chrono::Duration::days(90)),
    };
    let err = ReportWindow::parse("2024-01-01", "2031-01-01", &bounds, june_21())
        .expect_err("seven years is over the cap");
    assert!(err.contains(&WindowViolation::IntervalTooLarge {
        actual_days: 2557,
        allowed_days: 90,
    }));
}

#[test]
fn cache_ttl_tracks_window_recency() {
    let base = Duration::from_secs(6 * 60 * 60);
    let now = june_21();

    let current =
        ReportWindow::parse("2024-06-01", "2024-06-30", &WindowBounds::default(), now)
            .expect("valid window");
    assert_eq!(current.cache_duration(base, now), Duration::from_secs(60 * 60));

    let stale = ReportWindow::parse("2022-01-01", "2022-03-31", &WindowBounds::default(), now)
        .expect("valid window");
    assert_eq!(
        stale.cache_duration(base, now),
        Duration::from_secs(60 * 60 * 24 * 30)
    );

    let recent_past =
        ReportWindow::parse("2024-01-01", "2024-02-01", &WindowBounds::default(), now)
            .expect("valid window");
    assert_eq!(recent_past.cache_duration(base, now), base);
}
