use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::ConsolidationError;

/// Interval endpoint: a calendar date, or one of the two open-ended sentinels.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Endpoint {
    UnboundedPast,
    Date(Date),
    UnboundedFuture,
}

impl Endpoint {
    #[must_use]
    pub fn as_date(self) -> Option<Date> {
        match self {
            Self::Date(date) => Some(date),
            Self::UnboundedPast | Self::UnboundedFuture => None,
        }
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Date(lhs), Self::Date(rhs)) => lhs.cmp(rhs),
            (Self::UnboundedPast, Self::UnboundedPast)
            | (Self::UnboundedFuture, Self::UnboundedFuture) => Ordering::Equal,
            (Self::UnboundedPast, _) | (_, Self::UnboundedFuture) => Ordering::Less,
            (_, Self::UnboundedPast) | (Self::UnboundedFuture, _) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnboundedPast => f.write_str("-inf"),
            Self::Date(date) => f.write_str(&format_iso_date(*date)),
            Self::UnboundedFuture => f.write_str("+inf"),
        }
    }
}

/// `true` iff `lhs` lies strictly before `rhs`.
///
/// Two sentinels of the same kind are not ordered, so an open-ended record never
/// "ends before" an open-ended window.
#[must_use]
pub fn strictly_before(lhs: Endpoint, rhs: Endpoint) -> bool {
    lhs < rhs
}

/// Validity window `[start, end)`. The end is [`Endpoint::UnboundedFuture`] when the
/// record is still in force.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(from = "crate::IntervalRepr", into = "crate::IntervalRepr")]
pub struct Interval {
    start: Date,
    end: Endpoint,
}

impl Interval {
    #[must_use]
    pub fn new(start: Date, end: Option<Date>) -> Self {
        Self { start, end: end.map_or(Endpoint::UnboundedFuture, Endpoint::Date) }
    }

    #[must_use]
    pub fn open(start: Date) -> Self {
        Self::new(start, None)
    }

    pub(crate) fn from_parts(start: Date, end: Endpoint) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn start(&self) -> Date {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> Endpoint {
        self.end
    }

    /// `true` when this interval covers the whole of `window`: it started no later and
    /// ends no earlier.
    #[must_use]
    pub fn covers(&self, window: &Interval) -> bool {
        !strictly_before(Endpoint::Date(window.start), Endpoint::Date(self.start))
            && !strictly_before(self.end, window.end)
    }

    #[must_use]
    pub fn contains_date(&self, date: Date) -> bool {
        self.start <= date && strictly_before(Endpoint::Date(date), self.end)
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", format_iso_date(self.start), self.end)
    }
}

/// Format a date as `YYYY-MM-DD`.
#[must_use]
pub fn format_iso_date(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// Parse a `YYYY-MM-DD` date.
///
/// # Errors
/// Returns [`ConsolidationError::Validation`] when the value is not a calendar date.
pub fn parse_iso_date(value: &str) -> Result<Date, ConsolidationError> {
    Date::parse(value.trim(), time::macros::format_description!("[year]-[month]-[day]"))
        .map_err(|err| ConsolidationError::Validation(format!("invalid date {value:?}: {err}")))
}
