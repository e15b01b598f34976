//! In-memory demo ledger
//!
//! Implements the source database port over a small accounting ledger held
//! in memory. It applies the same scope rules as the extraction SQL (posted
//! invoices and refunds, document date in range, non-zero lines) so the
//! whole pipeline runs without a PostgreSQL server. Failures and latency can
//! be injected for tests.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Duration as Days, NaiveDate, Weekday};
use futures::stream::{self, BoxStream, StreamExt};
use rust_decimal::Decimal;

use crate::domain::{ConnectionConfig, ValidatedRange};
use crate::ports::{
    Connector, RawInvoiceRow, RawPartnerRow, SourceConnection, SourceError, Statement,
};

const SERVER_VERSION: &str = "PostgreSQL 16.4 (franja demo ledger)";

const TABLES: [&str; 6] = [
    "account_account",
    "account_analytic_account",
    "account_move",
    "account_move_line",
    "l10n_latam_identification_type",
    "res_partner",
];

/// Document type of an accounting move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    OutInvoice,
    InInvoice,
    OutRefund,
    InRefund,
    Entry,
}

impl MoveType {
    fn is_invoice(&self) -> bool {
        !matches!(self, MoveType::Entry)
    }
}

/// A counterparty row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoPartner {
    pub id: u32,
    pub name: String,
    pub identification_type: Option<String>,
    pub vat: Option<String>,
    pub is_company: Option<bool>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
}

impl DemoPartner {
    pub fn company(id: u32, name: &str, nit: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            identification_type: Some("NIT".to_string()),
            vat: Some(nit.to_string()),
            is_company: Some(true),
            email: None,
            phone: None,
            street: None,
            city: None,
        }
    }

    pub fn person(id: u32, name: &str, cedula: &str) -> Self {
        Self {
            identification_type: Some("Cédula de ciudadanía".to_string()),
            is_company: Some(false),
            ..Self::company(id, name, cedula)
        }
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }

    pub fn address(mut self, street: &str, city: &str) -> Self {
        self.street = Some(street.to_string());
        self.city = Some(city.to_string());
        self
    }

    fn joined_address(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.street, &self.city]
            .into_iter()
            .flatten()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect();
        Some(parts.join(", "))
    }
}

/// One journal line of an accounting move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoLine {
    pub move_name: String,
    pub move_type: MoveType,
    pub posted: bool,
    pub invoice_date: Option<NaiveDate>,
    pub date: NaiveDate,
    pub partner_id: u32,
    pub cost_center: Option<String>,
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl DemoLine {
    fn new(move_name: &str, date: NaiveDate, partner_id: u32, account_code: &str) -> Self {
        Self {
            move_name: move_name.to_string(),
            move_type: MoveType::OutInvoice,
            posted: true,
            invoice_date: Some(date),
            date,
            partner_id,
            cost_center: None,
            account_code: account_code.to_string(),
            debit: Decimal::ZERO,
            credit: Decimal::ZERO,
        }
    }

    pub fn debit(
        move_name: &str,
        date: NaiveDate,
        partner_id: u32,
        account_code: &str,
        amount: Decimal,
    ) -> Self {
        Self {
            debit: amount,
            ..Self::new(move_name, date, partner_id, account_code)
        }
    }

    pub fn credit(
        move_name: &str,
        date: NaiveDate,
        partner_id: u32,
        account_code: &str,
        amount: Decimal,
    ) -> Self {
        Self {
            credit: amount,
            ..Self::new(move_name, date, partner_id, account_code)
        }
    }

    pub fn move_type(mut self, move_type: MoveType) -> Self {
        self.move_type = move_type;
        self
    }

    pub fn cost_center(mut self, code: &str) -> Self {
        self.cost_center = Some(code.to_string());
        self
    }

    pub fn draft(mut self) -> Self {
        self.posted = false;
        self
    }

    fn document_date(&self) -> NaiveDate {
        self.invoice_date.unwrap_or(self.date)
    }

    fn in_scope(&self, range: &ValidatedRange) -> bool {
        self.move_type.is_invoice()
            && self.posted
            && range.contains(self.document_date())
            && (!self.debit.is_zero() || !self.credit.is_zero())
    }
}

#[derive(Default)]
struct Ledger {
    partners: Vec<DemoPartner>,
    lines: Vec<DemoLine>,
    missing_tables: BTreeSet<String>,
}

#[derive(Default)]
struct Faults {
    connect: Option<SourceError>,
    query: Option<SourceError>,
    ping: Option<SourceError>,
    latency: Duration,
}

#[derive(Default)]
struct LedgerState {
    ledger: Mutex<Ledger>,
    faults: Mutex<Faults>,
    connects: AtomicUsize,
    queries: AtomicUsize,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory ledger usable as a [`Connector`]
///
/// Clones share the same ledger and fault settings.
#[derive(Clone, Default)]
pub struct DemoLedger {
    state: Arc<LedgerState>,
}

impl DemoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger filled with generated sales and purchases for `days` days
    /// starting at `from`
    ///
    /// The same arguments always produce the same ledger.
    pub fn generated(from: NaiveDate, days: u32) -> Self {
        let ledger = Self::new();
        for partner in demo_partners() {
            ledger.add_partner(partner);
        }
        for line in generate_lines(from, days) {
            ledger.add_line(line);
        }
        ledger
    }

    pub fn add_partner(&self, partner: DemoPartner) {
        guard(&self.state.ledger).partners.push(partner);
    }

    pub fn add_line(&self, line: DemoLine) {
        guard(&self.state.ledger).lines.push(line);
    }

    /// Hide a table from the schema check
    pub fn drop_table(&self, table: &str) {
        guard(&self.state.ledger)
            .missing_tables
            .insert(table.to_string());
    }

    pub fn fail_connect(&self, error: Option<SourceError>) {
        guard(&self.state.faults).connect = error;
    }

    pub fn fail_queries(&self, error: Option<SourceError>) {
        guard(&self.state.faults).query = error;
    }

    pub fn fail_pings(&self, error: Option<SourceError>) {
        guard(&self.state.faults).ping = error;
    }

    /// Delay applied to every connect and every query
    pub fn set_latency(&self, latency: Duration) {
        guard(&self.state.faults).latency = latency;
    }

    /// Number of successful connects so far
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of row queries issued so far
    pub fn query_count(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    pub fn line_count(&self) -> usize {
        guard(&self.state.ledger).lines.len()
    }
}

#[async_trait]
impl Connector for DemoLedger {
    type Connection = DemoConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<DemoConnection, SourceError> {
        let (latency, fault) = {
            let faults = guard(&self.state.faults);
            (faults.latency, faults.connect.clone())
        };
        tokio::time::sleep(latency).await;
        if let Some(error) = fault {
            return Err(error);
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(database = %config.database, "demo ledger connection opened");
        Ok(DemoConnection {
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection to a [`DemoLedger`]
pub struct DemoConnection {
    state: Arc<LedgerState>,
}

impl DemoConnection {
    fn query_setup(&self) -> (Duration, Option<SourceError>) {
        self.state.queries.fetch_add(1, Ordering::SeqCst);
        let faults = guard(&self.state.faults);
        (faults.latency, faults.query.clone())
    }

    fn delayed<'c, T: Send + 'c>(
        latency: Duration,
        rows: Vec<Result<T, SourceError>>,
    ) -> BoxStream<'c, Result<T, SourceError>> {
        stream::once(async move {
            tokio::time::sleep(latency).await;
            stream::iter(rows)
        })
        .flatten()
        .boxed()
    }
}

#[async_trait]
impl SourceConnection for DemoConnection {
    async fn ping(&mut self) -> Result<(), SourceError> {
        match guard(&self.state.faults).ping.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn server_version(&mut self) -> Result<String, SourceError> {
        Ok(SERVER_VERSION.to_string())
    }

    async fn table_names(&mut self, _statement: &Statement) -> Result<Vec<String>, SourceError> {
        let (latency, fault) = self.query_setup();
        tokio::time::sleep(latency).await;
        if let Some(error) = fault {
            return Err(error);
        }
        let ledger = guard(&self.state.ledger);
        Ok(TABLES
            .iter()
            .filter(|table| !ledger.missing_tables.contains(**table))
            .map(|table| table.to_string())
            .collect())
    }

    fn invoice_rows<'c>(
        &'c mut self,
        _statement: &Statement,
        range: &ValidatedRange,
    ) -> BoxStream<'c, Result<RawInvoiceRow, SourceError>> {
        let (latency, fault) = self.query_setup();
        if let Some(error) = fault {
            return Self::delayed(latency, vec![Err(error)]);
        }

        let ledger = guard(&self.state.ledger);
        let mut lines: Vec<(usize, &DemoLine, &DemoPartner)> = ledger
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.in_scope(range))
            .filter_map(|(id, line)| {
                ledger
                    .partners
                    .iter()
                    .find(|p| p.id == line.partner_id)
                    .map(|partner| (id, line, partner))
            })
            .collect();
        lines.sort_by(|a, b| {
            (a.1.document_date(), &a.1.move_name, a.0).cmp(&(b.1.document_date(), &b.1.move_name, b.0))
        });

        let rows = lines
            .into_iter()
            .map(|(_, line, partner)| {
                let debit = !line.debit.is_zero();
                Ok(RawInvoiceRow {
                    invoice_number: Some(line.move_name.clone()),
                    invoice_date: Some(line.document_date()),
                    identification: partner.vat.clone(),
                    cost_center_code: line.cost_center.clone(),
                    account_code: Some(line.account_code.clone()),
                    amount: Some(if debit { line.debit } else { line.credit }),
                    account_nature: Some(if debit { "D" } else { "C" }.to_string()),
                })
            })
            .collect();
        Self::delayed(latency, rows)
    }

    fn partner_rows<'c>(
        &'c mut self,
        _statement: &Statement,
        range: &ValidatedRange,
    ) -> BoxStream<'c, Result<RawPartnerRow, SourceError>> {
        let (latency, fault) = self.query_setup();
        if let Some(error) = fault {
            return Self::delayed(latency, vec![Err(error)]);
        }

        let ledger = guard(&self.state.ledger);
        let referenced: HashSet<u32> = ledger
            .lines
            .iter()
            .filter(|line| line.in_scope(range))
            .map(|line| line.partner_id)
            .collect();
        let mut partners: Vec<&DemoPartner> = ledger
            .partners
            .iter()
            .filter(|p| referenced.contains(&p.id))
            .collect();
        partners.sort_by(|a, b| (&a.name, a.id).cmp(&(&b.name, b.id)));

        let rows = partners
            .into_iter()
            .map(|p| {
                Ok(RawPartnerRow {
                    name: Some(p.name.clone()),
                    identification_type: p.identification_type.clone(),
                    identification_number: p.vat.clone(),
                    is_company: p.is_company,
                    email: p.email.as_ref().map(|e| e.trim().to_lowercase()),
                    mobile: p.phone.clone(),
                    address: p.joined_address(),
                })
            })
            .collect();
        Self::delayed(latency, rows)
    }
}

fn demo_partners() -> Vec<DemoPartner> {
    vec![
        DemoPartner::company(1, "Distribuidora Andina S.A.S.", "900123456")
            .email("compras@andina.example")
            .phone("+57 601 555 0101")
            .address("Calle 80 # 12-34", "Bogotá"),
        DemoPartner::company(2, "Café del Quindío Ltda.", "800987654")
            .email("Facturacion@CafeQuindio.example")
            .address("Carrera 14 # 20-15", "Armenia"),
        DemoPartner::person(3, "María Fernanda Gómez", "52123456")
            .phone("+57 310 555 0199"),
        DemoPartner::company(4, "Transportes del Valle S.A.", "890456123")
            .address("Avenida 3N # 45-10", "Cali"),
        DemoPartner::person(5, "Juan Carlos Restrepo", "71234567")
            .email("jc.restrepo@correo.example"),
        DemoPartner::company(6, "Papelería El Estudiante", "830111222")
            .phone("+57 604 555 0142")
            .address("Calle 50 # 45-20", "Medellín"),
    ]
}

fn generate_lines(from: NaiveDate, days: u32) -> Vec<DemoLine> {
    let mut lines = Vec::new();
    let mut sale_seq = 0u32;
    let mut purchase_seq = 0u32;

    for offset in 0..days {
        let date = from + Days::days(i64::from(offset));
        let day = date.day();
        let year = date.year();

        // Sales every third day, rotating through the first five partners
        if day % 3 == 0 {
            sale_seq += 1;
            let name = format!("FV/{}/{:04}", year, sale_seq);
            let partner = (sale_seq % 5) + 1;
            let amount = Decimal::from(150_000 + (day * 7_919 + offset * 131) % 900_000);
            let center = if sale_seq % 4 == 0 { None } else { Some("CC-VENTAS") };

            let receivable = DemoLine::debit(&name, date, partner, "130505", amount);
            let revenue = DemoLine::credit(&name, date, partner, "413595", amount);
            for line in [receivable, revenue] {
                lines.push(match center {
                    Some(code) => line.cost_center(code),
                    None => line,
                });
            }
        }

        // Supplier invoices on Mondays
        if date.weekday() == Weekday::Mon {
            purchase_seq += 1;
            let name = format!("FC/{}/{:04}", year, purchase_seq);
            let amount = Decimal::from(45_000 + (offset * 3_571) % 200_000);
            lines.push(
                DemoLine::debit(&name, date, 6, "519530", amount)
                    .move_type(MoveType::InInvoice)
                    .cost_center("CC-ADMIN"),
            );
            lines.push(
                DemoLine::credit(&name, date, 6, "220505", amount).move_type(MoveType::InInvoice),
            );
        }

        // A credit note at the end of each month
        if (date + Days::days(1)).month() != date.month() {
            let name = format!("RFV/{}/{:02}", year, date.month());
            let amount = Decimal::new(2_500_000, 2);
            lines.push(
                DemoLine::debit(&name, date, 4, "417505", amount).move_type(MoveType::OutRefund),
            );
            lines.push(
                DemoLine::credit(&name, date, 4, "130505", amount).move_type(MoveType::OutRefund),
            );
        }

        // Out of scope: drafts and plain journal entries
        if day == 15 {
            lines.push(DemoLine::debit("FV/BORRADOR", date, 1, "130505", Decimal::new(999, 0)).draft());
            lines.push(
                DemoLine::debit(&format!("MISC/{}/{:02}", year, date.month()), date, 2, "110505", Decimal::new(1, 0))
                    .move_type(MoveType::Entry),
            );
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DateSelector;
    use crate::services::query::{validate_date_selector, RangePolicy};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(start: &str, end: &str) -> ValidatedRange {
        validate_date_selector(
            &DateSelector::range(start, end),
            &RangePolicy::default(),
            date("2025-01-01"),
        )
        .unwrap()
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("localhost", 5432, "odoo", "odoo", "secret")
    }

    async fn collect_invoices(ledger: &DemoLedger, r: &ValidatedRange) -> Vec<RawInvoiceRow> {
        let mut conn = ledger.connect(&config()).await.unwrap();
        conn.invoice_rows(&crate::services::query::INVOICE_QUERY, r)
            .map(|row| row.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_scope_excludes_drafts_entries_and_zero_lines() {
        let ledger = DemoLedger::new();
        ledger.add_partner(DemoPartner::company(1, "Acme", "900"));
        let d = date("2024-01-10");
        ledger.add_line(DemoLine::debit("FV/1", d, 1, "130505", Decimal::ONE));
        ledger.add_line(DemoLine::debit("FV/2", d, 1, "130505", Decimal::ONE).draft());
        ledger.add_line(DemoLine::debit("MISC/1", d, 1, "130505", Decimal::ONE).move_type(MoveType::Entry));
        ledger.add_line(DemoLine::debit("FV/3", d, 1, "130505", Decimal::ZERO));
        ledger.add_line(DemoLine::debit("FV/4", date("2024-02-01"), 1, "130505", Decimal::ONE));

        let rows = collect_invoices(&ledger, &range("2024-01-01", "2024-01-31")).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice_number.as_deref(), Some("FV/1"));
        assert_eq!(rows[0].account_nature.as_deref(), Some("D"));
    }

    #[tokio::test]
    async fn test_partners_limited_to_referenced() {
        let ledger = DemoLedger::generated(date("2024-01-01"), 31);
        let r = range("2024-01-01", "2024-01-31");
        let invoices = collect_invoices(&ledger, &r).await;

        let mut conn = ledger.connect(&config()).await.unwrap();
        let partners: Vec<RawPartnerRow> = conn
            .partner_rows(&crate::services::query::PARTNER_QUERY, &r)
            .map(|row| row.unwrap())
            .collect()
            .await;

        let from_invoices: BTreeSet<_> = invoices.iter().map(|i| i.identification.clone()).collect();
        let from_partners: BTreeSet<_> = partners
            .iter()
            .map(|p| p.identification_number.clone())
            .collect();
        assert_eq!(from_invoices, from_partners);
    }

    #[tokio::test]
    async fn test_generated_is_deterministic() {
        let r = range("2024-03-01", "2024-03-31");
        let a = collect_invoices(&DemoLedger::generated(date("2024-03-01"), 31), &r).await;
        let b = collect_invoices(&DemoLedger::generated(date("2024-03-01"), 31), &r).await;
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_injected_connect_failure() {
        let ledger = DemoLedger::new();
        ledger.fail_connect(Some(SourceError::Authentication("bad password".into())));
        assert!(matches!(
            ledger.connect(&config()).await,
            Err(SourceError::Authentication(_))
        ));
        assert_eq!(ledger.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_table_hidden() {
        let ledger = DemoLedger::new();
        ledger.drop_table("res_partner");
        let mut conn = ledger.connect(&config()).await.unwrap();
        let tables = conn
            .table_names(&crate::services::query::SCHEMA_CHECK_QUERY)
            .await
            .unwrap();
        assert_eq!(tables.len(), 5);
        assert!(!tables.iter().any(|t| t == "res_partner"));
    }
}
