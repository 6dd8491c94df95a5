//! Date interval algebra.
//!
//! Intervals are inclusive on both ends and compare at calendar-day granularity.
//! `DateInterval::empty()` is the identity element of [`union`] and never intersects
//! anything.

use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An inclusive `[start_date, end_date]` range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawDateInterval")]
pub struct DateInterval {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

/// Wire form; accepts plain dates as well as full ISO timestamps.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDateInterval {
    start_date: String,
    end_date: String,
}

impl TryFrom<RawDateInterval> for DateInterval {
    type Error = Error;

    fn try_from(raw: RawDateInterval) -> Result<Self> {
        DateInterval::new(parse_day(&raw.start_date)?, parse_day(&raw.end_date)?)
    }
}

fn epoch() -> NaiveDate {
    // 1970-01-01
    NaiveDate::default()
}

fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(2100, 1, 1).unwrap_or(NaiveDate::MAX)
}

/// Parses the calendar day of `"2019-06-07"` or `"2019-06-07T23:24:04Z"`.
pub fn parse_day(value: &str) -> Result<NaiveDate> {
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| Error::InvalidInterval(format!("'{value}' is not an ISO date")))
}

/// The UTC calendar day of a timestamp.
pub fn day_of(timestamp: &DateTime<Utc>) -> NaiveDate {
    timestamp.date_naive()
}

impl DateInterval {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self> {
        if start_date > end_date {
            return Err(Error::InvalidInterval(format!(
                "start date {start_date} is after end date {end_date}"
            )));
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    /// The zero-length interval at the epoch.
    pub fn empty() -> Self {
        Self {
            start_date: epoch(),
            end_date: epoch(),
        }
    }

    /// Epoch up to a far-future sentinel.
    pub fn all_time() -> Self {
        Self {
            start_date: epoch(),
            end_date: far_future(),
        }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start_date: day,
            end_date: day,
        }
    }

    /// Smallest interval covering every given day; `None` when there are none.
    pub fn from_days<I>(days: I) -> Option<Self>
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        days.into_iter().fold(None, |acc: Option<Self>, day| match acc {
            None => Some(Self::single(day)),
            Some(interval) => Some(Self {
                start_date: interval.start_date.min(day),
                end_date: interval.end_date.max(day),
            }),
        })
    }

    /// Interval between two timestamps in either order.
    pub fn between(left: &DateTime<Utc>, right: &DateTime<Utc>) -> Self {
        let (a, b) = (day_of(left), day_of(right));
        Self {
            start_date: a.min(b),
            end_date: a.max(b),
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        !self.is_empty() && self.start_date <= day && day <= self.end_date
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }

    /// Overlapping part of both intervals, `None` if they are disjoint or either is empty.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.is_empty() || other.is_empty() {
            return None;
        }
        let start_date = self.start_date.max(other.start_date);
        let end_date = self.end_date.min(other.end_date);
        (start_date <= end_date).then_some(Self {
            start_date,
            end_date,
        })
    }

    /// Number of calendar days covered; zero for the empty interval.
    pub fn day_count(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (self.end_date - self.start_date).num_days() as u64 + 1
    }

    /// Every day of the interval in ascending order.
    pub fn days(&self) -> DayIter {
        DayIter {
            next: (!self.is_empty()).then_some(self.start_date),
            end: self.end_date,
        }
    }
}

impl Default for DateInterval {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for DateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_date, self.end_date)
    }
}

/// Covering interval of both sides. Absent and empty intervals are both the identity.
pub fn union(left: Option<&DateInterval>, right: Option<&DateInterval>) -> Option<DateInterval> {
    let left = left.filter(|interval| !interval.is_empty());
    let right = right.filter(|interval| !interval.is_empty());
    match (left, right) {
        (None, None) => None,
        (Some(only), None) | (None, Some(only)) => Some(*only),
        (Some(l), Some(r)) => Some(DateInterval {
            start_date: l.start_date.min(r.start_date),
            end_date: l.end_date.max(r.end_date),
        }),
    }
}

pub fn union_all<'a, I>(intervals: I) -> Option<DateInterval>
where
    I: IntoIterator<Item = &'a DateInterval>,
{
    intervals
        .into_iter()
        .fold(None, |acc, interval| union(acc.as_ref(), Some(interval)))
}

/// Iterator over the days of an interval.
#[derive(Debug, Clone)]
pub struct DayIter {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for DayIter {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next.filter(|day| *day <= self.end)?;
        self.next = current.checked_add_days(Days::new(1));
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn day(value: &str) -> NaiveDate {
        parse_day(value).unwrap()
    }

    fn interval(start: &str, end: &str) -> DateInterval {
        DateInterval::new(day(start), day(end)).unwrap()
    }

    #[test]
    fn test_union_with_empty_is_identity() {
        let x = interval("2021-03-01", "2021-03-10");
        assert_eq!(union(Some(&DateInterval::empty()), Some(&x)), Some(x));
        assert_eq!(union(Some(&x), Some(&DateInterval::empty())), Some(x));
        assert_eq!(union(None, Some(&x)), Some(x));
        assert_eq!(union(Some(&x), None), Some(x));
        assert_eq!(union(None, Some(&DateInterval::empty())), None);
    }

    #[test]
    fn test_union_covers_both() {
        let left = interval("2021-03-01", "2021-03-10");
        let right = interval("2021-02-20", "2021-03-05");
        assert_eq!(
            union(Some(&left), Some(&right)),
            Some(interval("2021-02-20", "2021-03-10"))
        );
    }

    #[test]
    fn test_intersect() {
        let x = interval("2021-03-01", "2021-03-10");
        assert_eq!(x.intersect(&x), Some(x));

        let later = interval("2021-03-05", "2021-04-01");
        assert_eq!(x.intersect(&later), Some(interval("2021-03-05", "2021-03-10")));
        assert_eq!(later.intersect(&x), x.intersect(&later));

        let disjoint = interval("2021-05-01", "2021-05-02");
        assert_eq!(x.intersect(&disjoint), None);
        assert!(!x.intersects(&disjoint));
        assert!(!x.intersects(&DateInterval::empty()));
    }

    #[test]
    fn test_touching_intervals_intersect() {
        let x = interval("2021-03-01", "2021-03-10");
        let y = interval("2021-03-10", "2021-03-12");
        assert!(x.intersects(&y));
        assert_eq!(x.intersect(&y), Some(DateInterval::single(day("2021-03-10"))));
    }

    #[test]
    fn test_days_are_inclusive() {
        let x = interval("2020-02-27", "2020-03-01");
        let days: Vec<_> = x.days().map(|d| d.to_string()).collect();
        assert_eq!(
            days,
            vec!["2020-02-27", "2020-02-28", "2020-02-29", "2020-03-01"]
        );
        assert_eq!(x.day_count(), 4);
        assert_eq!(DateInterval::empty().days().count(), 0);
    }

    #[test]
    fn test_rejects_inverted_interval() {
        assert!(DateInterval::new(day("2021-03-02"), day("2021-03-01")).is_err());
    }

    #[test]
    fn test_deserialize_accepts_timestamps() {
        let parsed: DateInterval = serde_json::from_str(
            r#"{"startDate":"2019-06-07T23:24:04Z","endDate":"2019-06-09"}"#,
        )
        .unwrap();
        assert_eq!(parsed, interval("2019-06-07", "2019-06-09"));
        assert_eq!(
            serde_json::to_string(&parsed).unwrap(),
            r#"{"startDate":"2019-06-07","endDate":"2019-06-09"}"#
        );

        let inverted: std::result::Result<DateInterval, _> =
            serde_json::from_str(r#"{"startDate":"2019-06-09","endDate":"2019-06-07"}"#);
        assert!(inverted.is_err());
    }

    #[test]
    fn test_from_days() {
        let days = vec![day("2021-01-05"), day("2021-01-01"), day("2021-01-03")];
        assert_eq!(
            DateInterval::from_days(days),
            Some(interval("2021-01-01", "2021-01-05"))
        );
        assert_eq!(DateInterval::from_days(Vec::new()), None);
    }

    fn arb_interval() -> impl Strategy<Value = DateInterval> {
        (0u64..20_000, 0u64..400).prop_map(|(offset, len)| {
            let start = epoch() + Days::new(1 + offset);
            DateInterval::new(start, start + Days::new(len)).unwrap()
        })
    }

    proptest! {
        #[test]
        fn test_intersect_is_commutative(a in arb_interval(), b in arb_interval()) {
            prop_assert_eq!(a.intersect(&b), b.intersect(&a));
        }

        #[test]
        fn test_union_is_commutative_and_associative(
            a in arb_interval(),
            b in arb_interval(),
            c in arb_interval(),
        ) {
            prop_assert_eq!(union(Some(&a), Some(&b)), union(Some(&b), Some(&a)));
            let left = union(union(Some(&a), Some(&b)).as_ref(), Some(&c));
            let right = union(Some(&a), union(Some(&b), Some(&c)).as_ref());
            prop_assert_eq!(left, right);
        }

        #[test]
        fn test_day_count_matches_iteration(a in arb_interval()) {
            let expected = (a.end_date() - a.start_date()).num_days() as usize + 1;
            prop_assert_eq!(a.days().count(), expected);
        }
    }
}
