use crate::types::DataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison applied by a single filter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Case-insensitive substring match on the text form of the value.
    Like,
    /// The entity value is one of a list.
    In,
}

impl FilterOperator {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::Like => "like",
            Self::In => "in",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for FilterOperator {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" => Ok(Self::Equal),
            "!=" | "<>" | "ne" | "neq" => Ok(Self::NotEqual),
            "<" | "lt" => Ok(Self::LessThan),
            "<=" | "lte" => Ok(Self::LessThanOrEqual),
            ">" | "gt" => Ok(Self::GreaterThan),
            ">=" | "gte" => Ok(Self::GreaterThanOrEqual),
            "like" | "~" => Ok(Self::Like),
            "in" => Ok(Self::In),
            other => Err(DataError::Usage(format!("unknown filter operator: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

impl FromStr for SortDirection {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(DataError::Usage(format!("unknown sort direction: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_symbols_and_words() {
        assert_eq!("gte".parse::<FilterOperator>(), Ok(FilterOperator::GreaterThanOrEqual));
        assert_eq!("!=".parse::<FilterOperator>(), Ok(FilterOperator::NotEqual));
        assert_eq!("LIKE".parse::<FilterOperator>(), Ok(FilterOperator::Like));
        assert!("between".parse::<FilterOperator>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for op in [
            FilterOperator::Equal,
            FilterOperator::NotEqual,
            FilterOperator::LessThan,
            FilterOperator::LessThanOrEqual,
            FilterOperator::GreaterThan,
            FilterOperator::GreaterThanOrEqual,
            FilterOperator::Like,
            FilterOperator::In,
        ] {
            assert_eq!(op.to_string().parse::<FilterOperator>(), Ok(op));
        }
    }

    #[test]
    fn sort_direction_parse() {
        assert_eq!("DESC".parse::<SortDirection>(), Ok(SortDirection::Desc));
        assert_eq!(SortDirection::default(), SortDirection::Asc);
    }
}
