//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use quick_xml::events::Event;
use quick_xml::Reader;
use rust_decimal::Decimal;
use tempfile::TempDir;

use franja_core::adapters::demo::{DemoLedger, DemoLine, DemoPartner};
use franja_core::config::Settings;
use franja_core::domain::Argon2Params;
use franja_core::services::VaultOptions;
use franja_core::{ConnectionConfig, Extractor};

/// Cheap key derivation so tests don't spend seconds in Argon2
pub fn fast_vault() -> VaultOptions {
    VaultOptions::default()
        .with_passphrase("integration-test")
        .with_argon2(Argon2Params {
            time_cost: 1,
            memory_cost: 1024,
            parallelism: 1,
            hash_len: 32,
        })
}

pub fn demo_config() -> ConnectionConfig {
    ConnectionConfig::new("odoo.example", 5432, "odoo17", "reader", "s3cr3t-pass")
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn generated_at() -> NaiveDateTime {
    date("2024-02-01").and_hms_opt(9, 30, 0).unwrap()
}

/// Extractor over `ledger`, configured and ready to run
pub fn extractor(app_dir: &TempDir, ledger: &DemoLedger) -> Extractor<DemoLedger> {
    let extractor = Extractor::with_options(
        app_dir.path(),
        Settings::default(),
        ledger.clone(),
        fast_vault(),
    )
    .unwrap();
    extractor.configure(&demo_config()).unwrap();
    extractor
}

/// January 2024: three invoice lines for two counterparties, plus noise
/// outside the window and outside the invoice scope
pub fn january_ledger() -> DemoLedger {
    let ledger = DemoLedger::new();
    ledger.add_partner(
        DemoPartner::company(1, "Distribuidora Andina S.A.S.", "900123456")
            .email("Compras@Andina.example")
            .address("Calle 80 # 12-34", "Bogotá"),
    );
    ledger.add_partner(DemoPartner::person(2, "María Gómez", "52123456").phone("3105550199"));
    ledger.add_partner(DemoPartner::company(3, "Sin Facturas Ltda.", "800000001"));

    ledger.add_line(
        DemoLine::debit("FV/2024/0001", date("2024-01-05"), 1, "130505", Decimal::new(1_500_050, 2))
            .cost_center("CC-VENTAS"),
    );
    ledger.add_line(DemoLine::credit(
        "FV/2024/0002",
        date("2024-01-17"),
        2,
        "413595",
        Decimal::new(80_000, 0),
    ));
    ledger.add_line(DemoLine::debit(
        "FV/2024/0003",
        date("2024-01-31"),
        1,
        "130505",
        Decimal::new(42_000, 0),
    ));
    ledger.add_line(DemoLine::debit(
        "FV/2024/0004",
        date("2024-02-01"),
        3,
        "130505",
        Decimal::new(1, 0),
    ));
    ledger.add_line(
        DemoLine::debit("FV/2024/0005", date("2024-01-20"), 3, "130505", Decimal::new(1, 0)).draft(),
    );
    ledger
}

fn read_part(path: &Path, part: &str) -> String {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut xml = String::new();
    archive
        .by_name(part)
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    xml
}

/// Cell values of the first worksheet, one map (column letter -> text) per row
pub fn sheet_rows(path: &Path) -> Vec<BTreeMap<String, String>> {
    let xml = read_part(path, "xl/worksheets/sheet1.xml");
    let mut reader = Reader::from_str(&xml);
    let mut rows: Vec<BTreeMap<String, String>> = Vec::new();
    let mut column: Option<String> = None;

    loop {
        match reader.read_event().unwrap() {
            Event::Start(e) if e.name().as_ref() == b"row" => rows.push(BTreeMap::new()),
            Event::Start(e) if e.name().as_ref() == b"c" => {
                column = e.try_get_attribute("r").unwrap().map(|attr| {
                    String::from_utf8_lossy(&attr.value)
                        .trim_end_matches(|c: char| c.is_ascii_digit())
                        .to_string()
                });
            }
            Event::End(e) if e.name().as_ref() == b"c" => column = None,
            Event::Text(text) => {
                if let (Some(col), Some(row)) = (&column, rows.last_mut()) {
                    row.insert(col.clone(), text.unescape().unwrap().into_owned());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    rows
}

/// Values of one column, header row excluded
pub fn column(path: &Path, letter: &str) -> Vec<String> {
    sheet_rows(path)
        .into_iter()
        .skip(1)
        .map(|row| row.get(letter).cloned().unwrap_or_default())
        .collect()
}

pub fn workbook_xml(path: &Path) -> String {
    read_part(path, "xl/workbook.xml")
}
