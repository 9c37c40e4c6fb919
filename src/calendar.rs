//! Conversions between `dd/mm/yyyy` strings and zero-based day ordinals,
//! plus the clock the server reads "today" from.

use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{Datelike, Local, NaiveDate};

use crate::model::Day;

fn split_date(text: &str) -> Option<(u32, u32, i32)> {
    let mut parts = text.trim().splitn(3, '/');
    let mday = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let year = parts.next()?.parse().ok()?;
    Some((mday, month, year))
}

/// Parse `dd/mm/yyyy` into a day ordinal. With `year` set, dates from any
/// other year are rejected.
pub fn parse_date(text: &str, year: Option<i32>) -> Option<Day> {
    let (mday, month, y) = split_date(text)?;
    if year.is_some_and(|expected| expected != y) {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(y, month, mday)?;
    Day::try_from(date.ordinal0()).ok()
}

/// Year component of a `dd/mm/yyyy` string, if the whole date is valid.
pub fn parse_year(text: &str) -> Option<i32> {
    let (mday, month, year) = split_date(text)?;
    NaiveDate::from_ymd_opt(year, month, mday).map(|d| d.year())
}

/// Render a day ordinal of `year` as `dd/mm/yyyy`.
pub fn format_day(year: i32, day: Day) -> Option<String> {
    let date = NaiveDate::from_yo_opt(year, u32::from(day) + 1)?;
    Some(date.format("%d/%m/%Y").to_string())
}

pub trait Clock: Send + Sync {
    fn today(&self) -> Day;
}

/// Local wall-clock date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Day {
        // ordinal0 is at most 365
        Local::now().ordinal0() as Day
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    day: AtomicU16,
}

impl ManualClock {
    pub fn new(day: Day) -> Self {
        Self { day: AtomicU16::new(day) }
    }

    pub fn advance(&self, days: Day) {
        self.day.fetch_add(days, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn today(&self) -> Day {
        self.day.load(Ordering::Relaxed)
    }
}
