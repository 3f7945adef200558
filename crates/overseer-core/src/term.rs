//! Academic terms and half-year arithmetic.
//!
//! A term is `(begin_year, end_year, half)` and is written `"2023-2024-1"`.
//! Years are always four digits, so the textual form sorts chronologically;
//! storage backends rely on that for `term >= X` filters.

use std::{fmt, ops::Add, str::FromStr};

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of terms after the reference term that promotion and renewal
/// provision in advance.
pub const HORIZON: u32 = 4;

/// Last year a term may reach. Anything later would need a fifth digit.
pub const LAST_YEAR: u32 = 9999;

// ─── Half ────────────────────────────────────────────────────────────────────

/// Which half of the academic year a term covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Half {
  First,
  Second,
}

impl Half {
  pub fn number(self) -> u32 {
    match self {
      Self::First => 1,
      Self::Second => 2,
    }
  }
}

// ─── Term ────────────────────────────────────────────────────────────────────

/// A half-year academic period. Ordering is chronological.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Term {
  begin_year: u32,
  end_year:   u32,
  half:       Half,
}

impl Term {
  pub fn new(begin_year: u32, end_year: u32, half: Half) -> Self {
    Self { begin_year, end_year, half }
  }

  pub fn begin_year(&self) -> u32 { self.begin_year }

  pub fn end_year(&self) -> u32 { self.end_year }

  pub fn half(&self) -> Half { self.half }

  /// The term `steps` half-years after this one.
  ///
  /// The resulting half is `2` when `half + steps` is even and `1` otherwise;
  /// both years move by `⌊(half - 1 + steps) / 2⌋`.
  pub fn advance(self, steps: u32) -> Self {
    let h = self.half.number();
    let half = if (h + steps) % 2 == 0 { Half::Second } else { Half::First };
    let years = (h - 1 + steps) / 2;
    Self {
      begin_year: self.begin_year + years,
      end_year: self.end_year + years,
      half,
    }
  }

  /// Like [`Term::advance`], but `None` once the result would end after
  /// [`LAST_YEAR`].
  pub fn checked_advance(self, steps: u32) -> Option<Self> {
    let next = self.advance(steps);
    (next.end_year <= LAST_YEAR).then_some(next)
  }

  /// Position on a half-year timeline; consecutive terms differ by one.
  pub fn ordinal(&self) -> u32 { self.begin_year * 2 + self.half.number() - 1 }

  /// The reference term followed by the [`HORIZON`] terms after it.
  pub fn horizon(self) -> impl Iterator<Item = Term> {
    (0..=HORIZON).map(move |step| self.advance(step))
  }

  /// The term in session on `date`.
  ///
  /// The first half runs September through January, the second February
  /// through August.
  pub fn containing(date: NaiveDate) -> Self {
    let year = date.year().clamp(1001, 9990) as u32;
    match date.month() {
      9..=12 => Self::new(year, year + 1, Half::First),
      1 => Self::new(year - 1, year, Half::First),
      _ => Self::new(year - 1, year, Half::Second),
    }
  }
}

impl Add<u32> for Term {
  type Output = Term;

  fn add(self, steps: u32) -> Term { self.advance(steps) }
}

impl fmt::Display for Term {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}-{}", self.begin_year, self.end_year, self.half.number())
  }
}

fn parse_year(part: &str) -> Option<u32> {
  if part.len() != 4 || !part.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  part.parse().ok().filter(|y| *y >= 1000)
}

impl FromStr for Term {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let invalid = || Error::InvalidTerm(s.to_owned());

    let mut parts = s.split('-');
    let (Some(begin), Some(end), Some(half), None) =
      (parts.next(), parts.next(), parts.next(), parts.next())
    else {
      return Err(invalid());
    };

    let begin_year = parse_year(begin).ok_or_else(invalid)?;
    let end_year = parse_year(end).ok_or_else(invalid)?;
    let half = match half {
      "1" => Half::First,
      "2" => Half::Second,
      _ => return Err(invalid()),
    };
    if end_year != begin_year + 1 {
      return Err(invalid());
    }

    // Provisioning reaches HORIZON terms ahead and the expiry view one more,
    // so every accepted term keeps that far inside four-digit years.
    let term = Self { begin_year, end_year, half };
    term.checked_advance(HORIZON + 1).map(|_| term).ok_or_else(invalid)
  }
}

impl TryFrom<String> for Term {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<Term> for String {
  fn from(t: Term) -> Self { t.to_string() }
}

// ─── Default term ────────────────────────────────────────────────────────────

/// Supplies the term used when a caller does not name one.
pub trait TermProvider: Send + Sync {
  fn current_term(&self) -> Term;
}

/// Always the configured term.
#[derive(Debug, Clone, Copy)]
pub struct FixedTerm(pub Term);

impl TermProvider for FixedTerm {
  fn current_term(&self) -> Term { self.0 }
}

/// Derives the term from today's date (UTC).
#[derive(Debug, Clone, Copy, Default)]
pub struct CalendarTerm;

impl TermProvider for CalendarTerm {
  fn current_term(&self) -> Term { Term::containing(Utc::now().date_naive()) }
}
