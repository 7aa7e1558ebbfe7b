//! Validated direct edits to a student's balances.

use crate::model::Money;
use crate::services::error::{LedgerError, Result};

/// New values for a student's XP, money and class name.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentAdjustment {
    pub xp: i64,
    pub money: Money,
    /// `None` leaves the class name unchanged; an empty name clears it.
    pub class_name: Option<String>,
}

impl StudentAdjustment {
    /// Validate raw numeric input.
    ///
    /// XP must be a non-negative whole number; money must be non-negative
    /// and is rounded to the cent.
    pub fn new(xp: f64, money: f64, class_name: Option<&str>) -> Result<Self> {
        if !xp.is_finite() {
            return Err(LedgerError::validation("XP must be a number"));
        }
        if xp < 0.0 {
            return Err(LedgerError::validation("XP cannot be negative"));
        }
        if xp.fract() != 0.0 {
            return Err(LedgerError::validation("XP must be a whole number"));
        }
        if xp > i64::MAX as f64 {
            return Err(LedgerError::validation("XP is too large"));
        }

        if !money.is_finite() {
            return Err(LedgerError::validation("Money must be a number"));
        }
        if money < 0.0 {
            return Err(LedgerError::validation("Money cannot be negative"));
        }
        let money =
            Money::from_f64(money).ok_or_else(|| LedgerError::validation("Money is too large"))?;

        Ok(Self {
            xp: xp as i64,
            money,
            class_name: class_name.map(|name| name.trim().to_string()),
        })
    }

    /// Validate the text a teacher typed into the edit form.
    pub fn parse(xp: &str, money: &str, class_name: Option<&str>) -> Result<Self> {
        let xp: f64 = xp
            .trim()
            .parse()
            .map_err(|_| LedgerError::validation(format!("XP '{}' is not a number", xp.trim())))?;
        let money: f64 = money
            .trim()
            .trim_start_matches('$')
            .parse()
            .map_err(|_| {
                LedgerError::validation(format!("Money '{}' is not a number", money.trim()))
            })?;
        Self::new(xp, money, class_name)
    }
}
