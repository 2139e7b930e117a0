//! Bounded literal ranges

use std::fmt;

/// A bounded range over the literal values of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralRange {
    field: String,
    lower: String,
    lower_inclusive: bool,
    upper: String,
    upper_inclusive: bool,
}

impl LiteralRange {
    pub fn new(
        field: impl Into<String>,
        lower: impl Into<String>,
        lower_inclusive: bool,
        upper: impl Into<String>,
        upper_inclusive: bool,
    ) -> Self {
        Self {
            field: field.into(),
            lower: lower.into(),
            lower_inclusive,
            upper: upper.into(),
            upper_inclusive,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn lower(&self) -> &str {
        &self.lower
    }

    pub fn upper(&self) -> &str {
        &self.upper
    }

    pub fn is_lower_inclusive(&self) -> bool {
        self.lower_inclusive
    }

    pub fn is_upper_inclusive(&self) -> bool {
        self.upper_inclusive
    }

    /// Whether `value` lies within the bounds
    pub fn contains(&self, value: &str) -> bool {
        let above = if self.lower_inclusive {
            value >= self.lower.as_str()
        } else {
            value > self.lower.as_str()
        };
        let below = if self.upper_inclusive {
            value <= self.upper.as_str()
        } else {
            value < self.upper.as_str()
        };
        above && below
    }
}

impl fmt::Display for LiteralRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}{}, {}{}",
            self.field,
            if self.lower_inclusive { '[' } else { '(' },
            self.lower,
            self.upper,
            if self.upper_inclusive { ']' } else { ')' },
        )
    }
}
