//! Query engine
//!
//! Owns the extraction SQL, the date-window validation every run passes
//! through, and the mapping from raw rows to report records.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use futures::stream::{BoxStream, StreamExt};
use sqlparser::ast::{SetExpr, Statement as SqlStatement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::config::Settings;
use crate::domain::date_range::DATE_FORMAT;
use crate::domain::result::{Error, Result};
use crate::domain::{
    normalize_amount, AccountNature, DateSelector, InvoiceRecord, PartnerRecord, PartnerType,
    ValidatedRange,
};
use crate::ports::{RawInvoiceRow, RawPartnerRow, SourceConnection, Statement};

/// Posted invoices and refunds dated inside `$1..=$2`, restricted to lines
/// with a non-zero side. Shared verbatim by both extraction statements so
/// the partner report covers exactly the invoices' counterparties.
macro_rules! invoice_scope {
    () => {
        "am.move_type IN ('out_invoice', 'in_invoice', 'out_refund', 'in_refund') \
         AND am.state = 'posted' \
         AND COALESCE(am.invoice_date, am.date) BETWEEN $1 AND $2 \
         AND (COALESCE(aml.debit, 0) <> 0 OR COALESCE(aml.credit, 0) <> 0)"
    };
}

pub const INVOICE_QUERY: Statement = Statement {
    name: "invoice extraction",
    sql: concat!(
        "SELECT am.name::text AS invoice_number, ",
        "COALESCE(am.invoice_date, am.date) AS invoice_date, ",
        "rp.vat::text AS identification, ",
        "aaa.code::text AS cost_center_code, ",
        "aa.code::text AS account_code, ",
        "COALESCE(NULLIF(aml.debit, 0), NULLIF(aml.credit, 0), 0)::numeric AS amount, ",
        "CASE WHEN COALESCE(aml.debit, 0) <> 0 THEN 'D' ",
        "WHEN COALESCE(aml.credit, 0) <> 0 THEN 'C' END AS account_nature ",
        "FROM account_move am ",
        "INNER JOIN res_partner rp ON am.partner_id = rp.id ",
        "INNER JOIN account_move_line aml ON aml.move_id = am.id ",
        "INNER JOIN account_account aa ON aml.account_id = aa.id ",
        "LEFT JOIN account_analytic_account aaa ON am.user_analytic_account_id = aaa.id ",
        "WHERE ",
        invoice_scope!(),
        " ORDER BY COALESCE(am.invoice_date, am.date), am.name, aml.id"
    ),
};

pub const PARTNER_QUERY: Statement = Statement {
    name: "partner extraction",
    sql: concat!(
        "SELECT rp.name::text AS name, ",
        "(lit.name->>'en_US')::text AS identification_type, ",
        "rp.vat::text AS identification_number, ",
        "rp.is_company AS is_company, ",
        "rp.email_normalized::text AS email, ",
        "rp.phone::text AS mobile, ",
        "CONCAT_WS(', ', NULLIF(TRIM(rp.street), ''), NULLIF(TRIM(rp.street2), ''), ",
        "NULLIF(TRIM(rp.city), '')) AS address ",
        "FROM res_partner rp ",
        "LEFT JOIN l10n_latam_identification_type lit ",
        "ON rp.l10n_latam_identification_type_id = lit.id ",
        "WHERE EXISTS (SELECT 1 FROM account_move am ",
        "INNER JOIN account_move_line aml ON aml.move_id = am.id ",
        "INNER JOIN account_account aa ON aml.account_id = aa.id ",
        "WHERE am.partner_id = rp.id AND ",
        invoice_scope!(),
        ") ORDER BY rp.name, rp.id"
    ),
};

pub const SCHEMA_CHECK_QUERY: Statement = Statement {
    name: "schema check",
    sql: "SELECT table_name::text AS table_name FROM information_schema.tables \
          WHERE table_schema = 'public' AND table_name IN ('account_move', 'account_move_line', \
          'account_account', 'account_analytic_account', 'res_partner', \
          'l10n_latam_identification_type') ORDER BY table_name",
};

/// Tables the extraction statements read
pub const REQUIRED_TABLES: [&str; 6] = [
    "account_account",
    "account_analytic_account",
    "account_move",
    "account_move_line",
    "l10n_latam_identification_type",
    "res_partner",
];

/// Every statement this crate sends to the source database
pub const STATEMENTS: [Statement; 3] = [INVOICE_QUERY, PARTNER_QUERY, SCHEMA_CHECK_QUERY];

/// Limits applied to date selections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePolicy {
    /// Longest accepted window in days, both ends included
    pub max_range_days: u32,
    pub allow_future: bool,
}

impl RangePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_range_days: settings.query.max_range_days,
            allow_future: settings.query.allow_future_dates,
        }
    }
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

fn parse_date(value: &str, label: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        Error::validation(format!("Invalid {} '{}'. Use YYYY-MM-DD", label, value.trim()))
    })
}

/// Parse and check a date selection
///
/// The only constructor of [`ValidatedRange`]: rejects malformed dates,
/// inverted ranges, windows longer than the policy allows and, unless the
/// policy permits it, dates after `today`.
pub fn validate_date_selector(
    selector: &DateSelector,
    policy: &RangePolicy,
    today: NaiveDate,
) -> Result<ValidatedRange> {
    let (start, end, single) = match selector {
        DateSelector::Single { date } => {
            let date = parse_date(date, "date")?;
            (date, date, true)
        }
        DateSelector::Range { start, end } => {
            (parse_date(start, "start date")?, parse_date(end, "end date")?, false)
        }
    };

    if start > end {
        return Err(Error::validation("Start date cannot be after end date"));
    }
    if !policy.allow_future && end > today {
        return Err(Error::validation("Dates cannot be in the future"));
    }
    let range = ValidatedRange::new(start, end, single);
    if range.days() > i64::from(policy.max_range_days) {
        return Err(Error::validation(format!(
            "Date range cannot exceed {} days",
            policy.max_range_days
        )));
    }
    Ok(range)
}

/// Check that each statement is exactly one read-only SELECT
pub fn validate_statement(statement: &Statement) -> Result<()> {
    let parsed = Parser::parse_sql(&PostgreSqlDialect {}, statement.sql).map_err(|e| {
        let msg = e.to_string();
        Error::query(statement.name, msg.trim_start_matches("sql parser error: ").to_string())
    })?;

    match parsed.as_slice() {
        [SqlStatement::Query(query)] if query.locks.is_empty() => match query.body.as_ref() {
            SetExpr::Select(select) if select.into.is_none() => Ok(()),
            _ => Err(Error::query(statement.name, "statement is not a plain SELECT")),
        },
        [_] => Err(Error::query(statement.name, "statement is not a read-only query")),
        _ => Err(Error::query(statement.name, "expected exactly one statement")),
    }
}

pub fn validate_statements() -> Result<()> {
    STATEMENTS.iter().try_for_each(validate_statement)
}

/// Verify the source database has every table the extraction reads
pub async fn check_required_tables<S: SourceConnection + ?Sized>(conn: &mut S) -> Result<()> {
    let found: BTreeSet<String> = conn
        .table_names(&SCHEMA_CHECK_QUERY)
        .await
        .map_err(|e| e.into_error(SCHEMA_CHECK_QUERY.name))?
        .into_iter()
        .collect();

    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|table| !found.contains(*table))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::query(
            SCHEMA_CHECK_QUERY.name,
            format!("missing required tables: {}", missing.join(", ")),
        ))
    }
}

/// Stream the invoice lines for a window, in report order
pub fn fetch_invoices<'c, S: SourceConnection + ?Sized>(
    conn: &'c mut S,
    range: &ValidatedRange,
) -> BoxStream<'c, Result<InvoiceRecord>> {
    conn.invoice_rows(&INVOICE_QUERY, range)
        .map(|row| {
            row.map_err(|e| e.into_error(INVOICE_QUERY.name))
                .and_then(invoice_from_row)
        })
        .boxed()
}

/// Stream the counterparties referenced by the window's invoices
pub fn fetch_partners<'c, S: SourceConnection + ?Sized>(
    conn: &'c mut S,
    range: &ValidatedRange,
) -> BoxStream<'c, Result<PartnerRecord>> {
    conn.partner_rows(&PARTNER_QUERY, range)
        .map(|row| {
            row.map_err(|e| e.into_error(PARTNER_QUERY.name))
                .map(partner_from_row)
        })
        .boxed()
}

/// Empty string for missing values and null-like tokens
pub fn clean_text(value: Option<String>) -> String {
    match value {
        Some(text) => {
            let trimmed = text.trim();
            if trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("null") {
                String::new()
            } else if trimmed.len() == text.len() {
                text
            } else {
                trimmed.to_string()
            }
        }
        None => String::new(),
    }
}

fn invoice_from_row(row: RawInvoiceRow) -> Result<InvoiceRecord> {
    let invoice_date = row
        .invoice_date
        .ok_or_else(|| Error::query(INVOICE_QUERY.name, "row without a document date"))?;
    let amount = row
        .amount
        .ok_or_else(|| Error::query(INVOICE_QUERY.name, "row without a value"))?;
    let account_nature = row
        .account_nature
        .as_deref()
        .unwrap_or_default()
        .parse::<AccountNature>()
        .map_err(|e| Error::query(INVOICE_QUERY.name, e))?;

    Ok(InvoiceRecord {
        invoice_number: clean_text(row.invoice_number),
        invoice_date,
        counterparty_identification: clean_text(row.identification),
        cost_center_code: clean_text(row.cost_center_code),
        account_code: clean_text(row.account_code),
        amount: normalize_amount(amount),
        account_nature,
    })
}

fn partner_from_row(row: RawPartnerRow) -> PartnerRecord {
    PartnerRecord {
        name: clean_text(row.name),
        identification_type: clean_text(row.identification_type),
        identification_number: clean_text(row.identification_number),
        partner_type: PartnerType::from_is_company(row.is_company),
        email: clean_text(row.email),
        mobile: clean_text(row.mobile),
        address: clean_text(row.address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 6, 30)
    }

    fn validate(selector: DateSelector) -> Result<ValidatedRange> {
        validate_date_selector(&selector, &RangePolicy::default(), today())
    }

    #[test]
    fn test_range_ok() {
        let range = validate(DateSelector::range("2024-01-01", "2024-01-31")).unwrap();
        assert_eq!(range.start(), date(2024, 1, 1));
        assert_eq!(range.end(), date(2024, 1, 31));
        assert!(!range.is_single_day());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = validate(DateSelector::range("2024-02-01", "2024-01-01")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_equal_bounds_is_single_day() {
        let range = validate(DateSelector::range("2024-03-05", "2024-03-05")).unwrap();
        assert!(range.is_single_day());
        assert_eq!(range.days(), 1);
        assert_eq!(range.label(), "2024-03-05");
    }

    #[test]
    fn test_malformed_dates_rejected() {
        for bad in ["2024-02-30", "2024/01/01", "", "01-01-2024", "2024-13-01"] {
            assert!(
                matches!(validate(DateSelector::single(bad)), Err(Error::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_max_span_inclusive() {
        let policy = RangePolicy {
            max_range_days: 31,
            allow_future: false,
        };
        let ok = DateSelector::range("2024-01-01", "2024-01-31");
        assert!(validate_date_selector(&ok, &policy, today()).is_ok());
        let too_long = DateSelector::range("2024-01-01", "2024-02-01");
        assert!(matches!(
            validate_date_selector(&too_long, &policy, today()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_future_dates() {
        let future = DateSelector::single("2024-07-01");
        assert!(validate(future.clone()).is_err());
        let policy = RangePolicy {
            max_range_days: 366,
            allow_future: true,
        };
        assert!(validate_date_selector(&future, &policy, today()).is_ok());
    }

    #[test]
    fn test_statements_are_single_selects() {
        validate_statements().unwrap();
    }

    #[test]
    fn test_non_select_rejected() {
        let delete = Statement {
            name: "bad",
            sql: "DELETE FROM res_partner",
        };
        assert!(matches!(validate_statement(&delete), Err(Error::Query { .. })));

        let two = Statement {
            name: "bad",
            sql: "SELECT 1; SELECT 2",
        };
        assert!(validate_statement(&two).is_err());

        let locking = Statement {
            name: "bad",
            sql: "SELECT id FROM res_partner FOR UPDATE",
        };
        assert!(validate_statement(&locking).is_err());
    }

    #[test]
    fn test_queries_share_scope_and_bind_parameters() {
        let scope = invoice_scope!();
        assert!(INVOICE_QUERY.sql.contains(scope));
        assert!(PARTNER_QUERY.sql.contains(scope));
        for statement in [INVOICE_QUERY, PARTNER_QUERY] {
            assert!(statement.sql.contains("$1") && statement.sql.contains("$2"));
            assert!(!statement.sql.contains("DISTINCT"));
        }
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(None), "");
        assert_eq!(clean_text(Some("None".into())), "");
        assert_eq!(clean_text(Some("null".into())), "");
        assert_eq!(clean_text(Some("  900123  ".into())), "900123");
        assert_eq!(clean_text(Some("Nonesuch Ltd".into())), "Nonesuch Ltd");
    }

    #[test]
    fn test_invoice_mapping() {
        let record = invoice_from_row(RawInvoiceRow {
            invoice_number: Some("INV/2024/0001".into()),
            invoice_date: Some(date(2024, 1, 5)),
            identification: Some("900123456".into()),
            cost_center_code: None,
            account_code: Some("413595".into()),
            amount: Some(Decimal::from_str("1500.5").unwrap()),
            account_nature: Some("C".into()),
        })
        .unwrap();
        assert_eq!(record.cost_center_code, "");
        assert_eq!(record.amount.to_string(), "1500.50");
        assert_eq!(record.account_nature, AccountNature::Credit);
    }

    #[test]
    fn test_invoice_mapping_errors_name_statement() {
        let err = invoice_from_row(RawInvoiceRow {
            invoice_date: Some(date(2024, 1, 5)),
            amount: Some(Decimal::ONE),
            account_nature: None,
            ..Default::default()
        })
        .unwrap_err();
        match err {
            Error::Query { statement, .. } => assert_eq!(statement, "invoice extraction"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partner_mapping() {
        let record = partner_from_row(RawPartnerRow {
            name: Some("ACME S.A.S.".into()),
            identification_type: Some("NIT".into()),
            identification_number: Some("900123456".into()),
            is_company: Some(true),
            email: Some("None".into()),
            mobile: None,
            address: Some("Calle 1, Bogota".into()),
        });
        assert_eq!(record.partner_type, PartnerType::Company);
        assert_eq!(record.email, "");
        assert_eq!(record.mobile, "");
    }
}
