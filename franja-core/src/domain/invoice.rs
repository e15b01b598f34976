//! Invoice line record

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places used for ledger amounts
pub const AMOUNT_SCALE: u32 = 2;

/// Side of the ledger a move line sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountNature {
    Debit,
    Credit,
}

impl AccountNature {
    /// Single-letter code used in reports and by the source query
    pub fn code(&self) -> &'static str {
        match self {
            AccountNature::Debit => "D",
            AccountNature::Credit => "C",
        }
    }
}

impl FromStr for AccountNature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "D" | "d" => Ok(AccountNature::Debit),
            "C" | "c" => Ok(AccountNature::Credit),
            other => Err(format!("unexpected account nature '{}'", other)),
        }
    }
}

impl fmt::Display for AccountNature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One invoice move line, ready for the invoice report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub counterparty_identification: String,
    pub cost_center_code: String,
    pub account_code: String,
    /// Two-decimal amount as held by the ledger
    pub amount: Decimal,
    pub account_nature: AccountNature,
}

/// Bring an amount to the ledger's two-decimal precision
pub fn normalize_amount(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(AMOUNT_SCALE);
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nature_codes() {
        assert_eq!("D".parse::<AccountNature>().unwrap(), AccountNature::Debit);
        assert_eq!("C".parse::<AccountNature>().unwrap(), AccountNature::Credit);
        assert!("N".parse::<AccountNature>().is_err());
        assert_eq!(AccountNature::Credit.to_string(), "C");
    }

    #[test]
    fn test_normalize_amount() {
        assert_eq!(normalize_amount(Decimal::new(1500, 0)).to_string(), "1500.00");
        assert_eq!(normalize_amount(Decimal::new(12345, 3)).to_string(), "12.35");
        assert_eq!(normalize_amount(Decimal::new(-701, 1)).to_string(), "-70.10");
    }
}
