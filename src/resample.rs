//! Calendar periods used to bucket time steps.

use crate::error::ExplorerError;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::str::FromStr;
use strum_macros::Display;

/// A resampling frequency, parsed from a pandas offset alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frequency {
    /// Calendar years (`AS`, `YS`)
    Annual,
    /// Calendar months (`MS`)
    Monthly,
    /// Quarters starting in the given month (`QS-DEC` starts quarters in December, March, June
    /// and September)
    QuarterStart(u32),
}

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

impl FromStr for Frequency {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ExplorerError::InvalidFrequency {
            frequency: s.to_string(),
        };
        let upper = s.to_ascii_uppercase();
        let (alias, anchor) = match upper.split_once('-') {
            Some((alias, anchor)) => (alias, Some(anchor)),
            None => (upper.as_str(), None),
        };
        let month = anchor
            .map(|anchor| {
                MONTHS
                    .iter()
                    .position(|m| *m == anchor)
                    .map(|i| i as u32 + 1)
                    .ok_or_else(invalid)
            })
            .transpose()?;
        match (alias, month) {
            ("AS" | "YS" | "A" | "Y", None | Some(1)) => Ok(Frequency::Annual),
            ("MS", None) => Ok(Frequency::Monthly),
            ("QS", None) => Ok(Frequency::QuarterStart(1)),
            ("QS", Some(month)) => Ok(Frequency::QuarterStart(month)),
            _ => Err(invalid()),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Annual => write!(f, "AS"),
            Frequency::Monthly => write!(f, "MS"),
            Frequency::QuarterStart(month) => {
                write!(f, "QS-{}", MONTHS[(*month as usize).clamp(1, 12) - 1])
            }
        }
    }
}

impl Frequency {
    /// Returns the start of the period containing `date`.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        let (year, month) = match self {
            Frequency::Annual => (date.year(), 1),
            Frequency::Monthly => (date.year(), date.month()),
            Frequency::QuarterStart(anchor) => {
                let offset = (date.month() + 12 - anchor % 12) % 3;
                if date.month() > offset {
                    (date.year(), date.month() - offset)
                } else {
                    // The quarter started in the previous year, e.g. in December.
                    (date.year() - 1, date.month() + 12 - offset)
                }
            }
        };
        // Every year has a first day in every month.
        NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
    }

    /// Groups time steps by period, returning each period's start and positions in order.
    ///
    /// Only periods containing at least one time step are produced.
    pub fn buckets(&self, times: &[NaiveDateTime]) -> Vec<(NaiveDate, Vec<usize>)> {
        let mut buckets: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (i, time) in times.iter().enumerate() {
            buckets
                .entry(self.period_start(time.date()))
                .or_default()
                .push(i);
        }
        buckets.into_iter().collect()
    }
}

/// Meteorological seasons.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum Season {
    DJF,
    MAM,
    JJA,
    SON,
}

/// Display order of seasons.
pub const SEASON_ORDER: [Season; 4] = [Season::DJF, Season::MAM, Season::JJA, Season::SON];

impl Season {
    pub fn of_month(month: u32) -> Self {
        match month {
            3..=5 => Season::MAM,
            6..=8 => Season::JJA,
            9..=11 => Season::SON,
            _ => Season::DJF,
        }
    }
}

/// Key used to group time steps.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum GroupKey {
    /// Meteorological season, labelled `DJF`, `MAM`, `JJA` or `SON`
    Season,
    /// Calendar month, labelled 1 to 12
    Month,
}

impl GroupKey {
    /// Returns the name of the dimension created by grouping.
    pub fn dimension(&self) -> String {
        self.to_string()
    }

    /// Groups time steps by key, returning labels and positions in sorted label order.
    pub fn groups(&self, times: &[NaiveDateTime]) -> Vec<(String, Vec<usize>)> {
        match self {
            GroupKey::Season => {
                // Sorting the labels alphabetically matches xarray's groupby order.
                let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
                for (i, time) in times.iter().enumerate() {
                    groups
                        .entry(Season::of_month(time.month()).to_string())
                        .or_default()
                        .push(i);
                }
                groups.into_iter().collect()
            }
            GroupKey::Month => {
                let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
                for (i, time) in times.iter().enumerate() {
                    groups.entry(time.month()).or_default().push(i);
                }
                groups
                    .into_iter()
                    .map(|(month, positions)| (month.to_string(), positions))
                    .collect()
            }
        }
    }
}
