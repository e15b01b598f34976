//! Report generator
//!
//! Turns invoice and partner records into the two XLSX reports. Files are
//! written to a temporary sibling and renamed over the target only on
//! commit, so a failed or cancelled run leaves nothing behind.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::adapters::xlsx::{write_workbook, CellValue, ColumnStyle, SheetWriter};
use crate::domain::date_range::DATE_FORMAT;
use crate::domain::result::{Error, Result};
use crate::domain::{InvoiceRecord, PartnerRecord, ValidatedRange};

pub const INVOICE_SHEET: &str = "Facturas";
pub const PARTNER_SHEET: &str = "Terceros";
pub const METADATA_SHEET: &str = "Información del Reporte";

pub const INVOICE_COLUMNS: [(&str, ColumnStyle); 7] = [
    ("numero_factura", ColumnStyle::Text),
    ("fecha_factura", ColumnStyle::Text),
    ("numero_identificacion", ColumnStyle::Text),
    ("codigo_centro_costo", ColumnStyle::Text),
    ("codigo_cuenta", ColumnStyle::Text),
    ("valor", ColumnStyle::Number),
    ("naturaleza_cuenta", ColumnStyle::Centered),
];

pub const PARTNER_COLUMNS: [(&str, ColumnStyle); 7] = [
    ("nombre", ColumnStyle::Text),
    ("tipo_identificacion", ColumnStyle::Text),
    ("identidad", ColumnStyle::Text),
    ("tipo_empresa", ColumnStyle::Centered),
    ("mail", ColumnStyle::Text),
    ("movil", ColumnStyle::Text),
    ("direccion", ColumnStyle::Text),
];

const SYSTEM_NAME: &str = "Franja - Extractor de Datos Odoo";
const REPORT_DATE_FORMAT: &str = "%d/%m/%Y";

pub fn invoice_file_name(range: &ValidatedRange) -> String {
    format!("facturas_{}.xlsx", range.label())
}

pub fn partner_file_name(range: &ValidatedRange) -> String {
    format!("terceros_{}.xlsx", range.label())
}

/// Facts written to each workbook's metadata sheet
#[derive(Debug, Clone, Copy)]
pub struct ReportMeta {
    pub range: ValidatedRange,
    pub generated_at: NaiveDateTime,
}

impl ReportMeta {
    pub fn new(range: ValidatedRange) -> Self {
        Self {
            range,
            generated_at: Local::now().naive_local(),
        }
    }

    pub fn generated_at(mut self, generated_at: NaiveDateTime) -> Self {
        self.generated_at = generated_at;
        self
    }
}

/// Invoice sheet filled one record at a time
pub struct InvoiceSheet {
    sheet: SheetWriter,
    rows: usize,
}

impl InvoiceSheet {
    pub fn new() -> Self {
        Self {
            sheet: SheetWriter::with_header(INVOICE_SHEET, &INVOICE_COLUMNS),
            rows: 0,
        }
    }

    pub fn push(&mut self, record: &InvoiceRecord) {
        let date = record.invoice_date.format(REPORT_DATE_FORMAT).to_string();
        self.sheet.push_row(&[
            CellValue::text(record.invoice_number.as_str()),
            CellValue::text(date),
            CellValue::text(record.counterparty_identification.as_str()),
            CellValue::text(record.cost_center_code.as_str()),
            CellValue::text(record.account_code.as_str()),
            CellValue::Number(record.amount),
            CellValue::text(record.account_nature.code()),
        ]);
        self.rows += 1;
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

impl Default for InvoiceSheet {
    fn default() -> Self {
        Self::new()
    }
}

/// Partner sheet filled one record at a time
pub struct PartnerSheet {
    sheet: SheetWriter,
    rows: usize,
}

impl PartnerSheet {
    pub fn new() -> Self {
        Self {
            sheet: SheetWriter::with_header(PARTNER_SHEET, &PARTNER_COLUMNS),
            rows: 0,
        }
    }

    pub fn push(&mut self, record: &PartnerRecord) {
        self.sheet.push_row(&[
            CellValue::text(record.name.as_str()),
            CellValue::text(record.identification_type.as_str()),
            CellValue::text(record.identification_number.as_str()),
            CellValue::text(record.partner_type.label()),
            CellValue::text(record.email.as_str()),
            CellValue::text(record.mobile.as_str()),
            CellValue::text(record.address.as_str()),
        ]);
        self.rows += 1;
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

impl Default for PartnerSheet {
    fn default() -> Self {
        Self::new()
    }
}

/// A report written to a temporary file, not yet visible at its target path
///
/// Dropping it without calling [`PreparedReport::commit`] removes the
/// temporary file.
pub struct PreparedReport {
    temp: NamedTempFile,
    target: PathBuf,
    // Held so nobody else can take the target between prepare and commit
    lock: Option<File>,
    rows: usize,
}

impl std::fmt::Debug for PreparedReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedReport")
            .field("target", &self.target)
            .field("rows", &self.rows)
            .finish()
    }
}

impl PreparedReport {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Data rows, header excluded
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Atomically move the report to its target path
    pub fn commit(self) -> Result<PathBuf> {
        let PreparedReport {
            temp, target, lock, ..
        } = self;

        temp.as_file()
            .sync_all()
            .map_err(|e| Error::file_write(&target, e.to_string()))?;
        if let Some(lock) = lock {
            let _ = lock.unlock();
        }
        temp.persist(&target)
            .map_err(|e| Error::file_write(&target, e.error.to_string()))?;
        tracing::info!(path = %target.display(), "report written");
        Ok(target)
    }
}

/// Fail with [`Error::FileWrite`] if an existing target is locked or unwritable
///
/// Returns the locked handle, which must be kept until the target is replaced.
fn lock_existing(target: &Path) -> Result<Option<File>> {
    if !target.exists() {
        return Ok(None);
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(target)
        .map_err(|e| Error::file_write(target, format!("file is in use or read-only: {}", e)))?;
    file.try_lock_exclusive()
        .map_err(|_| Error::file_write(target, "file is locked by another process"))?;
    Ok(Some(file))
}

fn prepare(
    data: SheetWriter,
    rows: usize,
    report_type: &str,
    file_name: String,
    folder: &Path,
    meta: &ReportMeta,
) -> Result<PreparedReport> {
    fs::create_dir_all(folder).map_err(|e| Error::file_write(folder, e.to_string()))?;
    let target = folder.join(file_name);
    let lock = lock_existing(&target)?;

    let mut info = SheetWriter::key_value(METADATA_SHEET);
    info.push_pair("Tipo de Reporte", CellValue::text(report_type));
    info.push_pair(
        "Fecha de Generación",
        CellValue::text(meta.generated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
    );
    info.push_pair(
        "Fecha Inicio",
        CellValue::text(meta.range.start().format(DATE_FORMAT).to_string()),
    );
    info.push_pair(
        "Fecha Fin",
        CellValue::text(meta.range.end().format(DATE_FORMAT).to_string()),
    );
    info.push_pair("Total de Registros", CellValue::Integer(rows as u64));
    info.push_pair("Sistema", CellValue::text(SYSTEM_NAME));
    info.push_pair("Versión", CellValue::text(env!("CARGO_PKG_VERSION")));

    let mut temp = tempfile::Builder::new()
        .prefix(".franja-")
        .suffix(".xlsx.part")
        .tempfile_in(folder)
        .map_err(|e| Error::file_write(&target, e.to_string()))?;

    write_workbook(temp.as_file_mut(), &[data, info])
        .map_err(|e| Error::file_write(&target, e.to_string()))?;

    Ok(PreparedReport {
        temp,
        target,
        lock,
        rows,
    })
}

pub fn prepare_invoice_report(
    sheet: InvoiceSheet,
    folder: &Path,
    meta: &ReportMeta,
) -> Result<PreparedReport> {
    let rows = sheet.len();
    prepare(sheet.sheet, rows, INVOICE_SHEET, invoice_file_name(&meta.range), folder, meta)
}

pub fn prepare_partner_report(
    sheet: PartnerSheet,
    folder: &Path,
    meta: &ReportMeta,
) -> Result<PreparedReport> {
    let rows = sheet.len();
    prepare(sheet.sheet, rows, PARTNER_SHEET, partner_file_name(&meta.range), folder, meta)
}

/// Write `facturas_<label>.xlsx` into `folder`
pub fn write_invoice_report<'a>(
    records: impl IntoIterator<Item = &'a InvoiceRecord>,
    folder: &Path,
    meta: &ReportMeta,
) -> Result<PathBuf> {
    let mut sheet = InvoiceSheet::new();
    for record in records {
        sheet.push(record);
    }
    prepare_invoice_report(sheet, folder, meta)?.commit()
}

/// Write `terceros_<label>.xlsx` into `folder`
pub fn write_partner_report<'a>(
    records: impl IntoIterator<Item = &'a PartnerRecord>,
    folder: &Path,
    meta: &ReportMeta,
) -> Result<PathBuf> {
    let mut sheet = PartnerSheet::new();
    for record in records {
        sheet.push(record);
    }
    prepare_partner_report(sheet, folder, meta)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountNature, DateSelector, PartnerType};
    use crate::services::query::{validate_date_selector, RangePolicy};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::io::Read;
    use tempfile::tempdir;

    fn range(start: &str, end: &str) -> ValidatedRange {
        validate_date_selector(
            &DateSelector::range(start, end),
            &RangePolicy::default(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .unwrap()
    }

    fn meta() -> ReportMeta {
        ReportMeta::new(range("2024-01-01", "2024-01-31")).generated_at(
            NaiveDate::from_ymd_opt(2024, 2, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        )
    }

    fn invoice() -> InvoiceRecord {
        InvoiceRecord {
            invoice_number: "FV/2024/0001".into(),
            invoice_date: NaiveDate::from_ymd_opt(2024, 1, 9).unwrap(),
            counterparty_identification: "900123456".into(),
            cost_center_code: "CC-01".into(),
            account_code: "413595".into(),
            amount: Decimal::new(150050, 2),
            account_nature: AccountNature::Credit,
        }
    }

    fn sheet_xml(path: &Path, part: &str) -> String {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name(part)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        content
    }

    #[test]
    fn test_file_names() {
        let m = meta();
        assert_eq!(invoice_file_name(&m.range), "facturas_2024-01-01_2024-01-31.xlsx");
        assert_eq!(partner_file_name(&m.range), "terceros_2024-01-01_2024-01-31.xlsx");
    }

    #[test]
    fn test_invoice_report_contents() {
        let dir = tempdir().unwrap();
        let path = write_invoice_report(&[invoice()], dir.path(), &meta()).unwrap();
        assert_eq!(path, dir.path().join("facturas_2024-01-01_2024-01-31.xlsx"));

        let data = sheet_xml(&path, "xl/worksheets/sheet1.xml");
        assert!(data.contains(">numero_factura<"));
        assert!(data.contains(">09/01/2024<"));
        assert!(data.contains("<v>1500.50</v>"));
        assert!(data.contains(">C<"));

        let workbook = sheet_xml(&path, "xl/workbook.xml");
        let facturas = workbook.find("Facturas").unwrap();
        let info = workbook.find("Información del Reporte").unwrap();
        assert!(facturas < info);
    }

    #[test]
    fn test_empty_report_has_header_only() {
        let dir = tempdir().unwrap();
        let path = write_partner_report(&[], dir.path(), &meta()).unwrap();
        let data = sheet_xml(&path, "xl/worksheets/sheet1.xml");
        assert!(data.contains(">identidad<"));
        assert!(data.contains("<row r=\"1\">"));
        assert!(!data.contains("<row r=\"2\">"));
    }

    #[test]
    fn test_partner_type_label() {
        let dir = tempdir().unwrap();
        let partner = PartnerRecord {
            name: "Ana Pérez".into(),
            identification_type: "Cédula".into(),
            identification_number: "52123456".into(),
            partner_type: PartnerType::Individual,
            email: String::new(),
            mobile: String::new(),
            address: String::new(),
        };
        let path = write_partner_report(&[partner], dir.path(), &meta()).unwrap();
        assert!(sheet_xml(&path, "xl/worksheets/sheet1.xml").contains(">Persona<"));
    }

    #[test]
    fn test_dropped_prepared_report_leaves_nothing() {
        let dir = tempdir().unwrap();
        let prepared = prepare_invoice_report(InvoiceSheet::new(), dir.path(), &meta()).unwrap();
        assert!(!prepared.target().exists());
        drop(prepared);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_existing_unlocked_file_is_replaced() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("facturas_2024-01-01_2024-01-31.xlsx");
        fs::write(&target, b"old").unwrap();
        write_invoice_report(&[invoice()], dir.path(), &meta()).unwrap();
        assert_ne!(fs::read(&target).unwrap(), b"old");
    }

    #[test]
    fn test_same_input_same_bytes() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let a = write_invoice_report(&[invoice()], dir_a.path(), &meta()).unwrap();
        let b = write_invoice_report(&[invoice()], dir_b.path(), &meta()).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }
}
