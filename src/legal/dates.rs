//! Jurisdiction-exact due-date arithmetic.
//!
//! Counting excludes the trigger day and includes every calendar day after
//! it; only the landing day is tested against weekends and holidays. The
//! computation is pure: identical inputs and holiday tables always produce
//! identical results.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::DateError;
use crate::legal::holidays::HolidayCalendar;

/// Longest run of consecutive non-business days the extension loop tolerates.
const MAX_EXTENSION_STEPS: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    After,
    Before,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::After => "after",
            Self::Before => "before",
        }
    }
}

/// How the triggering paper was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Electronic,
    Mail,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Electronic => "electronic",
            Self::Mail => "mail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueDate {
    pub date: NaiveDate,
    pub was_extended: bool,
    /// The counted landing day, when it was not a business day.
    pub extended_from: Option<NaiveDate>,
    pub reason: Option<String>,
}

fn weekend_name(date: NaiveDate) -> Option<&'static str> {
    match date.weekday() {
        Weekday::Sat => Some("Saturday"),
        Weekday::Sun => Some("Sunday"),
        _ => None,
    }
}

/// Why `date` is not a business day, or `None` if it is one.
pub fn closure_reason(date: NaiveDate, holidays: &dyn HolidayCalendar) -> Option<String> {
    if let Some(day) = weekend_name(date) {
        return Some(format!("{date} is a weekend day ({day})"));
    }
    holidays
        .holiday_name(date)
        .map(|name| format!("{date} is a court holiday ({name})"))
}

pub fn is_business_day(date: NaiveDate, holidays: &dyn HolidayCalendar) -> bool {
    weekend_name(date).is_none() && !holidays.is_holiday(date)
}

fn step(date: NaiveDate, days: u64, direction: Direction) -> Result<NaiveDate, DateError> {
    let shifted = match direction {
        Direction::After => date.checked_add_days(Days::new(days)),
        Direction::Before => date.checked_sub_days(Days::new(days)),
    };
    shifted.ok_or(DateError::Overflow { from: date, days })
}

/// Compute the due date `days` calendar days from `trigger`.
///
/// Mail service lengthens the count by `mail_offset_days` before counting. A
/// landing day that is a weekend or holiday moves one day at a time in the
/// same direction until a business day is reached.
pub fn compute_due_date(
    trigger: NaiveDate,
    days: u32,
    direction: Direction,
    service: ServiceType,
    mail_offset_days: u32,
    holidays: &dyn HolidayCalendar,
) -> Result<DueDate, DateError> {
    let count = match service {
        ServiceType::Mail => u64::from(days) + u64::from(mail_offset_days),
        ServiceType::Electronic => u64::from(days),
    };
    let landed = step(trigger, count, direction)?;

    let mut candidate = landed;
    let mut causes = Vec::new();
    let mut steps = 0;
    while let Some(cause) = closure_reason(candidate, holidays) {
        if steps == MAX_EXTENSION_STEPS {
            return Err(DateError::NoBusinessDay {
                from: landed,
                steps,
            });
        }
        causes.push(cause);
        candidate = step(candidate, 1, direction)?;
        steps += 1;
    }

    if causes.is_empty() {
        return Ok(DueDate {
            date: landed,
            was_extended: false,
            extended_from: None,
            reason: None,
        });
    }

    let verb = match direction {
        Direction::After => "extended",
        Direction::Before => "moved back",
    };
    Ok(DueDate {
        date: candidate,
        was_extended: true,
        extended_from: Some(landed),
        reason: Some(format!("{}; {verb} to {candidate}", causes.join("; "))),
    })
}
