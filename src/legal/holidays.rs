//! Court holiday tables.
//!
//! Dates are computed per year from the statutory definitions (fixed dates
//! with weekend observance, or the nth weekday of a month), so the table needs
//! no yearly maintenance. Extra closures (weather, administrative orders)
//! come from configuration.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::error::ConfigError;

/// Source of non-business days for the date engine.
pub trait HolidayCalendar: Send + Sync {
    /// Name of the holiday or closure on `date`, if any.
    fn holiday_name(&self, date: NaiveDate) -> Option<String>;

    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holiday_name(date).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jurisdiction {
    UsFederal,
    UsUtah,
}

impl Jurisdiction {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "us-federal" | "federal" => Ok(Self::UsFederal),
            "us-ut" | "utah" => Ok(Self::UsUtah),
            other => Err(ConfigError::InvalidValue {
                key: "CLERK_JURISDICTION".to_string(),
                message: format!("unsupported jurisdiction '{other}' (expected us-ut or us-federal)"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Fixed month/day, shifted to Friday/Monday when it falls on a weekend.
    Fixed { month: u32, day: u32 },
    /// nth weekday of the month; `n = 0` means the last one.
    Nth { month: u32, weekday: Weekday, n: u8 },
}

struct HolidayDef {
    name: &'static str,
    rule: Rule,
    since: i32,
}

const FEDERAL: &[HolidayDef] = &[
    HolidayDef { name: "New Year's Day", rule: Rule::Fixed { month: 1, day: 1 }, since: 1870 },
    HolidayDef {
        name: "Martin Luther King Jr. Day",
        rule: Rule::Nth { month: 1, weekday: Weekday::Mon, n: 3 },
        since: 1986,
    },
    HolidayDef {
        name: "Washington's Birthday",
        rule: Rule::Nth { month: 2, weekday: Weekday::Mon, n: 3 },
        since: 1971,
    },
    HolidayDef {
        name: "Memorial Day",
        rule: Rule::Nth { month: 5, weekday: Weekday::Mon, n: 0 },
        since: 1971,
    },
    HolidayDef { name: "Juneteenth", rule: Rule::Fixed { month: 6, day: 19 }, since: 2021 },
    HolidayDef { name: "Independence Day", rule: Rule::Fixed { month: 7, day: 4 }, since: 1870 },
    HolidayDef {
        name: "Labor Day",
        rule: Rule::Nth { month: 9, weekday: Weekday::Mon, n: 1 },
        since: 1894,
    },
    HolidayDef {
        name: "Columbus Day",
        rule: Rule::Nth { month: 10, weekday: Weekday::Mon, n: 2 },
        since: 1971,
    },
    HolidayDef { name: "Veterans Day", rule: Rule::Fixed { month: 11, day: 11 }, since: 1938 },
    HolidayDef {
        name: "Thanksgiving Day",
        rule: Rule::Nth { month: 11, weekday: Weekday::Thu, n: 4 },
        since: 1942,
    },
    HolidayDef { name: "Christmas Day", rule: Rule::Fixed { month: 12, day: 25 }, since: 1870 },
];

const UTAH: &[HolidayDef] = &[HolidayDef {
    name: "Pioneer Day",
    rule: Rule::Fixed { month: 7, day: 24 },
    since: 1897,
}];

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    if n == 0 {
        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        let mut cursor = next_month - Duration::days(1);
        while cursor.weekday() != weekday {
            cursor -= Duration::days(1);
        }
        return Some(cursor);
    }
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn occurrence(def: &HolidayDef, year: i32) -> Option<NaiveDate> {
    if year < def.since {
        return None;
    }
    match def.rule {
        Rule::Fixed { month, day } => NaiveDate::from_ymd_opt(year, month, day).map(observed),
        Rule::Nth { month, weekday, n } => nth_weekday(year, month, weekday, n),
    }
}

/// Holiday table for one jurisdiction plus configured closures.
#[derive(Debug, Clone)]
pub struct HolidayTable {
    jurisdiction: Jurisdiction,
    extra_closures: BTreeSet<NaiveDate>,
}

impl HolidayTable {
    pub fn new(jurisdiction: Jurisdiction, extra_closures: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            jurisdiction,
            extra_closures: extra_closures.into_iter().collect(),
        }
    }

    pub fn from_config(config: &crate::config::RuleConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Jurisdiction::parse(&config.jurisdiction)?,
            config.extra_closures.iter().copied(),
        ))
    }

    fn definitions(&self) -> impl Iterator<Item = &'static HolidayDef> {
        let state: &'static [HolidayDef] = match self.jurisdiction {
            Jurisdiction::UsFederal => &[],
            Jurisdiction::UsUtah => UTAH,
        };
        FEDERAL.iter().chain(state.iter())
    }

    /// All holidays observed in `year`, sorted.
    pub fn holidays_in(&self, year: i32) -> Vec<(NaiveDate, &'static str)> {
        // A Saturday New Year's Day is observed on Dec 31 of the prior year.
        let mut out: Vec<(NaiveDate, &'static str)> = [year, year + 1]
            .into_iter()
            .flat_map(|y| self.definitions().filter_map(move |def| occurrence(def, y).map(|d| (d, def.name))))
            .filter(|(date, _)| date.year() == year)
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

impl HolidayCalendar for HolidayTable {
    fn holiday_name(&self, date: NaiveDate) -> Option<String> {
        if self.extra_closures.contains(&date) {
            return Some("court closure".to_string());
        }
        self.holidays_in(date.year())
            .into_iter()
            .find(|(day, _)| *day == date)
            .map(|(_, name)| name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{HolidayCalendar, HolidayTable, Jurisdiction};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn utah_observes_pioneer_day() {
        let utah = HolidayTable::new(Jurisdiction::UsUtah, []);
        let federal = HolidayTable::new(Jurisdiction::UsFederal, []);
        assert_eq!(utah.holiday_name(date(2025, 7, 24)).as_deref(), Some("Pioneer Day"));
        assert!(!federal.is_holiday(date(2025, 7, 24)));
    }

    #[test]
    fn floating_holidays_land_on_the_right_weekday() {
        let table = HolidayTable::new(Jurisdiction::UsFederal, []);
        assert!(table.is_holiday(date(2025, 1, 20))); // MLK
        assert!(table.is_holiday(date(2025, 5, 26))); // Memorial Day
        assert!(table.is_holiday(date(2025, 11, 27))); // Thanksgiving
        assert!(!table.is_holiday(date(2025, 11, 20)));
    }

    #[test]
    fn weekend_holidays_shift_to_observed_day() {
        let table = HolidayTable::new(Jurisdiction::UsFederal, []);
        // July 4, 2026 is a Saturday.
        assert!(table.is_holiday(date(2026, 7, 3)));
        // Jan 1, 2022 was a Saturday, observed Friday Dec 31, 2021.
        assert_eq!(
            table.holiday_name(date(2021, 12, 31)).as_deref(),
            Some("New Year's Day")
        );
    }

    #[test]
    fn configured_closures_count() {
        let table = HolidayTable::new(Jurisdiction::UsUtah, [date(2025, 3, 12)]);
        assert_eq!(
            table.holiday_name(date(2025, 3, 12)).as_deref(),
            Some("court closure")
        );
    }

    #[test]
    fn unknown_jurisdiction_is_rejected() {
        assert!(Jurisdiction::parse("us-ut").is_ok());
        assert!(Jurisdiction::parse("mars").is_err());
    }
}
