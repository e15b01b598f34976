//! Minimal XLSX (SpreadsheetML) writer
//!
//! A workbook is a zip archive of XML parts. Rows are serialized as they are
//! pushed, so a sheet holds its cell XML rather than the records it came
//! from. Column widths are tracked while rows arrive and emitted on finish.
//! Entries carry a fixed timestamp, so equal content gives equal bytes.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::io::{self, Seek, Write};

use quick_xml::escape::escape;
use rust_decimal::Decimal;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const MIN_WIDTH: usize = 12;
const MAX_WIDTH: usize = 50;

// Indices into cellXfs in STYLES_XML
const STYLE_HEADER: u8 = 1;
const STYLE_TEXT: u8 = 2;
const STYLE_NUMBER: u8 = 3;
const STYLE_CENTERED: u8 = 4;
const STYLE_KEY: u8 = 5;

/// How a column's data cells are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnStyle {
    /// Stored and displayed as text (`@`)
    Text,
    /// Text, horizontally centered
    Centered,
    /// Numeric with thousands separator and two decimals (`#,##0.00`)
    Number,
}

impl ColumnStyle {
    fn index(self) -> u8 {
        match self {
            ColumnStyle::Text => STYLE_TEXT,
            ColumnStyle::Centered => STYLE_CENTERED,
            ColumnStyle::Number => STYLE_NUMBER,
        }
    }
}

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue<'a> {
    Text(Cow<'a, str>),
    Number(Decimal),
    Integer(u64),
}

impl<'a> CellValue<'a> {
    pub fn text(value: impl Into<Cow<'a, str>>) -> Self {
        CellValue::Text(value.into())
    }

    fn display_len(&self) -> usize {
        match self {
            CellValue::Text(text) => text.chars().count(),
            CellValue::Number(n) => n.to_string().len(),
            CellValue::Integer(n) => n.to_string().len(),
        }
    }
}

/// One worksheet being built
pub struct SheetWriter {
    name: String,
    styles: Vec<ColumnStyle>,
    widths: Vec<usize>,
    fixed_widths: Option<Vec<f64>>,
    freeze_header: bool,
    rows: u32,
    data: String,
}

impl SheetWriter {
    /// Tabular sheet with a styled, frozen header row
    pub fn with_header(name: impl Into<String>, columns: &[(&str, ColumnStyle)]) -> Self {
        let mut sheet = Self {
            name: name.into(),
            styles: columns.iter().map(|(_, style)| *style).collect(),
            widths: vec![0; columns.len()],
            fixed_widths: None,
            freeze_header: true,
            rows: 0,
            data: String::new(),
        };
        let header: Vec<CellValue> = columns
            .iter()
            .map(|(title, _)| CellValue::text(*title))
            .collect();
        sheet.write_row(&header, |_| STYLE_HEADER);
        sheet
    }

    /// Two-column key/value sheet with shaded keys
    pub fn key_value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            styles: vec![ColumnStyle::Text, ColumnStyle::Text],
            widths: vec![0; 2],
            fixed_widths: Some(vec![25.0, 30.0]),
            freeze_header: false,
            rows: 0,
            data: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rows written, header included
    pub fn row_count(&self) -> u32 {
        self.rows
    }

    /// Append a data row; missing trailing cells are left empty
    pub fn push_row(&mut self, cells: &[CellValue]) {
        let styles = self.styles.clone();
        self.write_row(cells, |col| {
            styles.get(col).copied().unwrap_or(ColumnStyle::Text).index()
        });
    }

    /// Append a key/value pair
    pub fn push_pair(&mut self, key: &str, value: CellValue) {
        let cells = [CellValue::text(key), value];
        self.write_row(&cells, |col| if col == 0 { STYLE_KEY } else { 0 });
    }

    fn write_row(&mut self, cells: &[CellValue], style_of: impl Fn(usize) -> u8) {
        self.rows += 1;
        let r = self.rows;
        let _ = write!(self.data, "<row r=\"{}\">", r);
        for (col, cell) in cells.iter().enumerate() {
            if col >= self.widths.len() {
                self.widths.resize(col + 1, 0);
            }
            self.widths[col] = self.widths[col].max(cell.display_len());

            let reference = format!("{}{}", column_name(col), r);
            let style = style_of(col);
            match cell {
                CellValue::Text(text) => {
                    let _ = write!(
                        self.data,
                        "<c r=\"{}\" s=\"{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                        reference,
                        style,
                        escape(sanitize(text).as_ref())
                    );
                }
                CellValue::Number(n) => {
                    let _ = write!(self.data, "<c r=\"{}\" s=\"{}\"><v>{}</v></c>", reference, style, n);
                }
                CellValue::Integer(n) => {
                    let _ = write!(self.data, "<c r=\"{}\" s=\"{}\"><v>{}</v></c>", reference, style, n);
                }
            }
        }
        self.data.push_str("</row>");
    }

    fn to_xml(&self, selected: bool) -> String {
        let mut xml = String::with_capacity(self.data.len() + 1024);
        xml.push_str(XML_DECLARATION);
        xml.push_str(
            "<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">",
        );

        xml.push_str("<sheetViews><sheetView workbookViewId=\"0\"");
        if selected {
            xml.push_str(" tabSelected=\"1\"");
        }
        if self.freeze_header {
            xml.push_str(
                "><pane ySplit=\"1\" topLeftCell=\"A2\" activePane=\"bottomLeft\" state=\"frozen\"/>\
                 <selection pane=\"bottomLeft\"/></sheetView>",
            );
        } else {
            xml.push_str("/>");
        }
        xml.push_str("</sheetViews><sheetFormatPr defaultRowHeight=\"15\"/>");

        if !self.widths.is_empty() {
            xml.push_str("<cols>");
            for (i, len) in self.widths.iter().enumerate() {
                let width = match &self.fixed_widths {
                    Some(fixed) => fixed.get(i).copied().unwrap_or(MIN_WIDTH as f64),
                    None => column_width(*len) as f64,
                };
                let _ = write!(
                    xml,
                    "<col min=\"{0}\" max=\"{0}\" width=\"{1}\" customWidth=\"1\"/>",
                    i + 1,
                    width
                );
            }
            xml.push_str("</cols>");
        }

        if self.data.is_empty() {
            xml.push_str("<sheetData/>");
        } else {
            xml.push_str("<sheetData>");
            xml.push_str(&self.data);
            xml.push_str("</sheetData>");
        }
        xml.push_str("</worksheet>");
        xml
    }
}

/// Column width for the longest value in it, clamped to 12..=50
pub fn column_width(max_len: usize) -> usize {
    (max_len + 2).clamp(MIN_WIDTH, MAX_WIDTH)
}

/// Spreadsheet column letters: 0 -> A, 25 -> Z, 26 -> AA
pub fn column_name(index: usize) -> String {
    let mut n = index + 1;
    let mut name = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Drop characters XML 1.0 cannot carry
fn sanitize(text: &str) -> Cow<'_, str> {
    if text
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
    {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(
            text.chars()
                .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
                .collect(),
        )
    }
}

/// Write a workbook; the first sheet is the active one
pub fn write_workbook<W: Write + Seek>(writer: W, sheets: &[SheetWriter]) -> io::Result<W> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let add = |zip: &mut ZipWriter<W>, name: &str, content: &str| -> io::Result<()> {
        zip.start_file(name, options).map_err(io::Error::other)?;
        zip.write_all(content.as_bytes())
    };

    add(&mut zip, "[Content_Types].xml", &content_types_xml(sheets.len()))?;
    add(&mut zip, "_rels/.rels", ROOT_RELS_XML)?;
    add(&mut zip, "xl/workbook.xml", &workbook_xml(sheets))?;
    add(&mut zip, "xl/_rels/workbook.xml.rels", &workbook_rels_xml(sheets.len()))?;
    add(&mut zip, "xl/styles.xml", STYLES_XML)?;
    for (i, sheet) in sheets.iter().enumerate() {
        let name = format!("xl/worksheets/sheet{}.xml", i + 1);
        add(&mut zip, &name, &sheet.to_xml(i == 0))?;
    }

    zip.finish().map_err(io::Error::other)
}

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";

const ROOT_RELS_XML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>\
</Relationships>";

const STYLES_XML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\
<fonts count=\"3\">\
<font><sz val=\"11\"/><name val=\"Calibri\"/><family val=\"2\"/></font>\
<font><b/><sz val=\"11\"/><color rgb=\"FFFFFFFF\"/><name val=\"Calibri\"/><family val=\"2\"/></font>\
<font><b/><sz val=\"11\"/><name val=\"Calibri\"/><family val=\"2\"/></font>\
</fonts>\
<fills count=\"4\">\
<fill><patternFill patternType=\"none\"/></fill>\
<fill><patternFill patternType=\"gray125\"/></fill>\
<fill><patternFill patternType=\"solid\"><fgColor rgb=\"FF366092\"/><bgColor indexed=\"64\"/></patternFill></fill>\
<fill><patternFill patternType=\"solid\"><fgColor rgb=\"FFE2E2E2\"/><bgColor indexed=\"64\"/></patternFill></fill>\
</fills>\
<borders count=\"2\">\
<border><left/><right/><top/><bottom/><diagonal/></border>\
<border><left style=\"thin\"/><right style=\"thin\"/><top style=\"thin\"/><bottom style=\"thin\"/><diagonal/></border>\
</borders>\
<cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>\
<cellXfs count=\"6\">\
<xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/>\
<xf numFmtId=\"49\" fontId=\"1\" fillId=\"2\" borderId=\"1\" xfId=\"0\" applyNumberFormat=\"1\" applyFont=\"1\" applyFill=\"1\" applyBorder=\"1\" applyAlignment=\"1\"><alignment horizontal=\"center\" vertical=\"center\"/></xf>\
<xf numFmtId=\"49\" fontId=\"0\" fillId=\"0\" borderId=\"1\" xfId=\"0\" applyNumberFormat=\"1\" applyBorder=\"1\"/>\
<xf numFmtId=\"4\" fontId=\"0\" fillId=\"0\" borderId=\"1\" xfId=\"0\" applyNumberFormat=\"1\" applyBorder=\"1\"/>\
<xf numFmtId=\"49\" fontId=\"0\" fillId=\"0\" borderId=\"1\" xfId=\"0\" applyNumberFormat=\"1\" applyBorder=\"1\" applyAlignment=\"1\"><alignment horizontal=\"center\"/></xf>\
<xf numFmtId=\"0\" fontId=\"2\" fillId=\"3\" borderId=\"0\" xfId=\"0\" applyFont=\"1\" applyFill=\"1\"/>\
</cellXfs>\
<cellStyles count=\"1\"><cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/></cellStyles>\
</styleSheet>";

fn content_types_xml(sheet_count: usize) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(
        "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
         <Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>",
    );
    for i in 1..=sheet_count {
        let _ = write!(
            xml,
            "<Override PartName=\"/xl/worksheets/sheet{}.xml\" \
             ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>",
            i
        );
    }
    xml.push_str("</Types>");
    xml
}

fn workbook_xml(sheets: &[SheetWriter]) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(
        "<workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
         xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
         <bookViews><workbookView activeTab=\"0\"/></bookViews><sheets>",
    );
    for (i, sheet) in sheets.iter().enumerate() {
        let _ = write!(
            xml,
            "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
            escape(sheet.name()),
            i + 1,
            i + 1
        );
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str("<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">");
    for i in 1..=sheet_count {
        let _ = write!(
            xml,
            "<Relationship Id=\"rId{0}\" \
             Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" \
             Target=\"worksheets/sheet{0}.xml\"/>",
            i
        );
    }
    let _ = write!(
        xml,
        "<Relationship Id=\"rId{}\" \
         Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" \
         Target=\"styles.xml\"/></Relationships>",
        sheet_count + 1
    );
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::str::FromStr;

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut content = String::new();
        part.read_to_string(&mut content).unwrap();
        content
    }

    fn sample_sheet() -> SheetWriter {
        let mut sheet = SheetWriter::with_header(
            "Datos",
            &[("nombre", ColumnStyle::Text), ("valor", ColumnStyle::Number)],
        );
        sheet.push_row(&[
            CellValue::text("Smith & <Sons>"),
            CellValue::Number(Decimal::from_str("1234.50").unwrap()),
        ]);
        sheet
    }

    #[test]
    fn test_column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(6), "G");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(701), "ZZ");
    }

    #[test]
    fn test_column_width_bounds() {
        assert_eq!(column_width(0), 12);
        assert_eq!(column_width(20), 22);
        assert_eq!(column_width(200), 50);
    }

    #[test]
    fn test_workbook_parts_and_escaping() {
        let bytes = write_workbook(Cursor::new(Vec::new()), &[sample_sheet()])
            .unwrap()
            .into_inner();

        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("Smith &amp; &lt;Sons&gt;"));
        assert!(sheet.contains("<v>1234.50</v>"));
        assert!(sheet.contains("state=\"frozen\""));
        assert!(sheet.contains("<c r=\"A1\" s=\"1\""));

        let workbook = read_part(&bytes, "xl/workbook.xml");
        assert!(workbook.contains("name=\"Datos\""));
        assert!(read_part(&bytes, "xl/styles.xml").contains("FF366092"));
        assert!(read_part(&bytes, "[Content_Types].xml").contains("sheet1.xml"));
    }

    #[test]
    fn test_identical_content_identical_bytes() {
        let a = write_workbook(Cursor::new(Vec::new()), &[sample_sheet()])
            .unwrap()
            .into_inner();
        let b = write_workbook(Cursor::new(Vec::new()), &[sample_sheet()])
            .unwrap()
            .into_inner();
        assert_eq!(a, b);
    }

    #[test]
    fn test_control_characters_dropped() {
        let mut sheet = SheetWriter::key_value("Info");
        sheet.push_pair("clave", CellValue::text("a\u{0}b\u{b}c"));
        let xml = sheet.to_xml(true);
        assert!(xml.contains(">abc<"));
        assert!(xml.contains("s=\"5\""));
        assert!(!xml.contains("frozen"));
    }
}
