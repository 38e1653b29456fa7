//! Lexical classification of date and time literals.
//!
//! FHIR dates allow partial precision (`2020`, `2020-05`), so a field
//! declared `date` or `dateTime` maps to the most specific XML Schema
//! datatype its literal actually matches.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::XSD_NS;

const YEAR: &str = r"([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)";
const MONTH: &str = r"(0[1-9]|1[0-2])";
const DAY: &str = r"(0[1-9]|[1-2][0-9]|3[0-1])";
const TIME: &str = r"([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?";
const ZONE: &str = r"(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))";

static G_YEAR_RE: Lazy<Regex> = Lazy::new(|| anchored(YEAR.to_string()));
static G_YEAR_MONTH_RE: Lazy<Regex> = Lazy::new(|| anchored(format!("{YEAR}-{MONTH}")));
static DATE_RE: Lazy<Regex> = Lazy::new(|| anchored(format!("{YEAR}(-{MONTH}(-{DAY})?)?")));
static DATE_TIME_RE: Lazy<Regex> =
    Lazy::new(|| anchored(format!("{YEAR}(-{MONTH}(-{DAY}(T{TIME}{ZONE})?)?)?")));
static TIME_RE: Lazy<Regex> = Lazy::new(|| anchored(TIME.to_string()));

fn anchored(pattern: String) -> Regex {
    Regex::new(&format!("^(?:{})$", pattern)).expect("static date pattern compiles")
}

/// XML Schema datatype assigned to a date-family literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateType {
    GYear,
    GYearMonth,
    Date,
    DateTime,
    Time,
}

impl DateType {
    pub fn local_name(&self) -> &'static str {
        match self {
            DateType::GYear => "gYear",
            DateType::GYearMonth => "gYearMonth",
            DateType::Date => "date",
            DateType::DateTime => "dateTime",
            DateType::Time => "time",
        }
    }

    /// Full XSD datatype IRI.
    pub fn xsd_iri(&self) -> String {
        format!("{}{}", XSD_NS, self.local_name())
    }
}

/// Classify a literal of a field declared as `declared` (`date`,
/// `dateTime` or `time`).
///
/// Date fields try year, year-month, date and date-time in that order and
/// take the first match. Returns `None` when nothing matches; the value is
/// then left untyped.
pub fn classify_date(declared: &str, literal: &str) -> Option<DateType> {
    match declared {
        "date" | "dateTime" => {
            if G_YEAR_RE.is_match(literal) {
                Some(DateType::GYear)
            } else if G_YEAR_MONTH_RE.is_match(literal) {
                Some(DateType::GYearMonth)
            } else if DATE_RE.is_match(literal) {
                Some(DateType::Date)
            } else if DATE_TIME_RE.is_match(literal) {
                Some(DateType::DateTime)
            } else {
                None
            }
        }
        "time" => TIME_RE.is_match(literal).then_some(DateType::Time),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_precision() {
        assert_eq!(classify_date("date", "2020"), Some(DateType::GYear));
        assert_eq!(classify_date("dateTime", "1999"), Some(DateType::GYear));
    }

    #[test]
    fn year_month_precision() {
        assert_eq!(classify_date("date", "2020-05"), Some(DateType::GYearMonth));
    }

    #[test]
    fn full_date() {
        assert_eq!(classify_date("date", "2020-05-01"), Some(DateType::Date));
    }

    #[test]
    fn full_date_time() {
        assert_eq!(
            classify_date("dateTime", "2020-05-01T10:00:00Z"),
            Some(DateType::DateTime)
        );
        assert_eq!(
            classify_date("dateTime", "2020-05-01T10:00:00.123+05:30"),
            Some(DateType::DateTime)
        );
    }

    #[test]
    fn invalid_literals_are_untyped() {
        assert_eq!(classify_date("date", "2020-13"), None);
        assert_eq!(classify_date("date", "0000"), None);
        assert_eq!(classify_date("date", "2020-05-32"), None);
        assert_eq!(classify_date("dateTime", "2020-05-01T10:00:00"), None);
        assert_eq!(classify_date("dateTime", "2020-05-01T25:00:00Z"), None);
        assert_eq!(classify_date("date", "yesterday"), None);
    }

    #[test]
    fn time_fields() {
        assert_eq!(classify_date("time", "10:30:00"), Some(DateType::Time));
        assert_eq!(classify_date("time", "23:59:60.5"), Some(DateType::Time));
        assert_eq!(classify_date("time", "24:00:00"), None);
        assert_eq!(classify_date("time", "2020"), None);
    }

    #[test]
    fn other_declared_types_are_untyped() {
        assert_eq!(classify_date("instant", "2020-05-01T10:00:00Z"), None);
    }

    #[test]
    fn xsd_iris() {
        assert_eq!(
            DateType::GYearMonth.xsd_iri(),
            "http://www.w3.org/2001/XMLSchema#gYearMonth"
        );
    }
}
