use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecapError;

/// One rung of the summary hierarchy, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SummaryLevel {
    Chunk,
    Session,
    Day,
    Week,
    Month,
    Year,
    YearRollup,
}

impl SummaryLevel {
    pub const ALL: [Self; 7] = [
        Self::Chunk,
        Self::Session,
        Self::Day,
        Self::Week,
        Self::Month,
        Self::Year,
        Self::YearRollup,
    ];

    /// The level whose outputs are aggregated into this level's input.
    /// `Chunk` reads raw transcript text and has no child.
    #[must_use]
    pub const fn child(self) -> Option<Self> {
        match self {
            Self::Chunk => None,
            Self::Session => Some(Self::Chunk),
            Self::Day => Some(Self::Session),
            Self::Week => Some(Self::Day),
            Self::Month => Some(Self::Week),
            Self::Year => Some(Self::Month),
            Self::YearRollup => Some(Self::Year),
        }
    }

    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        match self {
            Self::Chunk => Some(Self::Session),
            Self::Session => Some(Self::Day),
            Self::Day => Some(Self::Week),
            Self::Week => Some(Self::Month),
            Self::Month => Some(Self::Year),
            Self::Year => Some(Self::YearRollup),
            Self::YearRollup => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::Session => "session",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
            Self::YearRollup => "yearRollup",
        }
    }

    /// Human wording used inside prompts.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Chunk => "a short excerpt of a spoken transcript",
            Self::Session => "one recording session made of consecutive transcript chunks",
            Self::Day => "one day of recording sessions",
            Self::Week => "one week of daily summaries",
            Self::Month => "one month of weekly summaries",
            Self::Year => "one year of monthly summaries",
            Self::YearRollup => "several years of yearly summaries",
        }
    }
}

impl fmt::Display for SummaryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryLevel {
    type Err = RecapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "chunk" => Ok(Self::Chunk),
            "session" => Ok(Self::Session),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            "yearrollup" | "rollup" => Ok(Self::YearRollup),
            other => Err(RecapError::Config(format!(
                "unknown summary level: {other} (available: chunk, session, day, week, month, year, yearRollup)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_is_strict() {
        for pair in SummaryLevel::ALL.windows(2) {
            assert_eq!(pair[1].child(), Some(pair[0]));
            assert_eq!(pair[0].parent(), Some(pair[1]));
        }
        assert_eq!(SummaryLevel::Chunk.child(), None);
        assert_eq!(SummaryLevel::YearRollup.parent(), None);
    }

    #[test]
    fn parses_names() {
        for level in SummaryLevel::ALL {
            let parsed: SummaryLevel = level
                .as_str()
                .parse()
                .unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(parsed, level);
        }
        assert_eq!(
            "year-rollup".parse::<SummaryLevel>().ok(),
            Some(SummaryLevel::YearRollup)
        );
        assert!("decade".parse::<SummaryLevel>().is_err());
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_string(&SummaryLevel::YearRollup).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(json, "\"yearRollup\"");
    }
}
