// ==========================================
// 加油机交易归集系统 - 网格读取器实现
// ==========================================
// 支持: 分隔文本 (.csv/.txt/.tsv) / 二进制表格 (.xls/.xlsx/.ods)
//       / SpreadsheetML 2003 (.xml)
// 输出: RawGrid（单元格为字符串或空，不做任何类型推断）
// ==========================================

use crate::domain::transaction::{RawGrid, RawRow};
use crate::domain::types::FormatFamily;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::ingest_trait::GridReader;
use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// 分隔符嗅探的候选（并列时按此顺序优先）
const DELIMITER_CANDIDATES: [u8; 3] = [b';', b'\t', b','];
const DELIMITER_SNIFF_LINES: usize = 5;

fn ensure_exists(path: &Path) -> ImportResult<()> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

// ==========================================
// 分隔文本读取器
// ==========================================
pub struct CsvGridReader;

impl CsvGridReader {
    /// 取前几行非空内容，按（出现行数, 出现总数）选分隔符
    pub fn sniff_delimiter(content: &[u8]) -> u8 {
        let lines: Vec<&[u8]> = content
            .split(|b| *b == b'\n')
            .filter(|l| l.iter().any(|b| !b.is_ascii_whitespace()))
            .take(DELIMITER_SNIFF_LINES)
            .collect();

        let mut best = (b',', 0usize, 0usize);
        for candidate in DELIMITER_CANDIDATES {
            let lines_with = lines.iter().filter(|l| l.contains(&candidate)).count();
            let total: usize = lines
                .iter()
                .map(|l| l.iter().filter(|b| **b == candidate).count())
                .sum();
            if (lines_with, total) > (best.1, best.2) {
                best = (candidate, lines_with, total);
            }
        }
        best.0
    }
}

impl GridReader for CsvGridReader {
    fn family(&self) -> FormatFamily {
        FormatFamily::DelimitedText
    }

    fn read_grid(&self, path: &Path) -> ImportResult<RawGrid> {
        ensure_exists(path)?;

        let raw = std::fs::read(path)?;
        let content: &[u8] = raw
            .strip_prefix(&[0xEF, 0xBB, 0xBF][..])
            .unwrap_or(&raw[..]);
        let delimiter = Self::sniff_delimiter(content);

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .delimiter(delimiter)
            .from_reader(content);

        let mut rows = Vec::new();
        for result in reader.byte_records() {
            let record = result?;
            // 非 UTF-8 字节按替换字符解码
            rows.push(RawRow::new(
                record
                    .iter()
                    .map(|field| Some(String::from_utf8_lossy(field).into_owned())),
            ));
        }

        debug!(
            file = %path.display(),
            delimiter = %(delimiter as char).escape_default(),
            rows = rows.len(),
            "分隔文本读取完成"
        );
        Ok(RawGrid::new(rows))
    }
}

// ==========================================
// 二进制表格读取器（calamine，首个工作表）
// ==========================================
pub struct ExcelGridReader;

impl ExcelGridReader {
    /// 单元格渲染: 整数浮点不带小数；日期 dd/mm/YYYY HH:MM:SS；纯时间 HH:MM:SS
    pub fn render_cell(cell: &Data) -> Option<String> {
        match cell {
            Data::Empty | Data::Error(_) => None,
            Data::String(s) => Some(s.clone()),
            Data::Int(i) => Some(i.to_string()),
            Data::Float(f) => Some(render_float(*f)),
            Data::Bool(b) => Some(b.to_string()),
            Data::DateTime(dt) => {
                let serial = dt.as_f64();
                match dt.as_datetime() {
                    Some(value) if serial < 1.0 => Some(value.format("%H:%M:%S").to_string()),
                    Some(value) => Some(value.format("%d/%m/%Y %H:%M:%S").to_string()),
                    None => Some(render_float(serial)),
                }
            }
            Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        }
    }
}

fn render_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl GridReader for ExcelGridReader {
    fn family(&self) -> FormatFamily {
        FormatFamily::BinarySpreadsheet
    }

    fn read_grid(&self, path: &Path) -> ImportResult<RawGrid> {
        ensure_exists(path)?;

        let mut workbook = open_workbook_auto(path)?;
        let sheet_names = workbook.sheet_names();
        let sheet_name = sheet_names
            .first()
            .cloned()
            .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;

        let range = workbook.worksheet_range(&sheet_name)?;

        // Range 从首个非空单元格开始，补齐左上方的空行/空列
        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        let mut rows: Vec<RawRow> = vec![RawRow::default(); row_offset];
        for data_row in range.rows() {
            let cells = std::iter::repeat(None)
                .take(col_offset)
                .chain(data_row.iter().map(Self::render_cell));
            rows.push(RawRow::new(cells));
        }

        debug!(
            file = %path.display(),
            sheet = %sheet_name,
            rows = rows.len(),
            "Excel 读取完成"
        );
        Ok(RawGrid::new(rows))
    }
}

// ==========================================
// SpreadsheetML 2003 读取器（quick-xml）
// ==========================================
// Row/Cell/Data 按本地名匹配（忽略 ss: 命名空间前缀）
// ss:Index 为 1 基；ss:MergeAcross 推进列位置
pub struct XmlSpreadsheetReader;

fn attr_usize(element: &BytesStart<'_>, name: &[u8]) -> ImportResult<Option<usize>> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value()?;
            return Ok(value.trim().parse::<usize>().ok());
        }
    }
    Ok(None)
}

#[derive(Default)]
struct XmlCursor {
    rows: Vec<RawRow>,
    cells: BTreeMap<usize, String>,
    column: usize,
    merge_across: usize,
    text: String,
    in_cell: bool,
    in_data: bool,
    worksheets: usize,
}

impl XmlCursor {
    fn start_row(&mut self, element: &BytesStart<'_>) -> ImportResult<()> {
        if let Some(index) = attr_usize(element, b"Index")? {
            // 稀疏行: 用空行补齐
            while self.rows.len() + 1 < index {
                self.rows.push(RawRow::default());
            }
        }
        self.cells.clear();
        self.column = 0;
        Ok(())
    }

    fn end_row(&mut self) {
        let cells = std::mem::take(&mut self.cells);
        self.rows.push(RawRow::from_sparse(cells));
    }

    fn start_cell(&mut self, element: &BytesStart<'_>) -> ImportResult<()> {
        if let Some(index) = attr_usize(element, b"Index")? {
            self.column = index.saturating_sub(1);
        }
        self.merge_across = attr_usize(element, b"MergeAcross")?.unwrap_or(0);
        self.text.clear();
        self.in_cell = true;
        Ok(())
    }

    fn end_cell(&mut self) {
        let value = self.text.trim();
        if !value.is_empty() {
            self.cells.insert(self.column, value.to_string());
        }
        self.column += 1 + self.merge_across;
        self.merge_across = 0;
        self.in_cell = false;
        self.in_data = false;
    }
}

impl GridReader for XmlSpreadsheetReader {
    fn family(&self) -> FormatFamily {
        FormatFamily::XmlSpreadsheet
    }

    fn read_grid(&self, path: &Path) -> ImportResult<RawGrid> {
        ensure_exists(path)?;

        let mut reader = quick_xml::Reader::from_file(path)?;
        reader.config_mut().trim_text(true);

        let mut cursor = XmlCursor::default();
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"Worksheet" => cursor.worksheets += 1,
                    b"Row" if cursor.worksheets <= 1 => cursor.start_row(&e)?,
                    b"Cell" if cursor.worksheets <= 1 => cursor.start_cell(&e)?,
                    b"Data" if cursor.in_cell => cursor.in_data = true,
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"Row" if cursor.worksheets <= 1 => {
                        cursor.start_row(&e)?;
                        cursor.end_row();
                    }
                    b"Cell" if cursor.worksheets <= 1 => {
                        cursor.start_cell(&e)?;
                        cursor.end_cell();
                    }
                    _ => {}
                },
                Event::Text(t) if cursor.in_data => cursor.text.push_str(&t.unescape()?),
                Event::CData(c) if cursor.in_data => {
                    cursor.text.push_str(&String::from_utf8_lossy(&c.into_inner()))
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"Data" => cursor.in_data = false,
                    b"Cell" if cursor.in_cell => cursor.end_cell(),
                    b"Row" if cursor.worksheets <= 1 => cursor.end_row(),
                    // 只读取首个工作表
                    b"Worksheet" => break,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        debug!(file = %path.display(), rows = cursor.rows.len(), "SpreadsheetML 读取完成");
        Ok(RawGrid::new(cursor.rows))
    }
}

// ==========================================
// 通用网格读取器（按格式族分派）
// ==========================================
pub struct UniversalGridReader;

impl UniversalGridReader {
    pub fn reader_for(family: FormatFamily) -> Box<dyn GridReader> {
        match family {
            FormatFamily::DelimitedText => Box::new(CsvGridReader),
            FormatFamily::BinarySpreadsheet => Box::new(ExcelGridReader),
            FormatFamily::XmlSpreadsheet => Box::new(XmlSpreadsheetReader),
        }
    }

    pub fn read<P: AsRef<Path>>(&self, path: P, family: FormatFamily) -> ImportResult<RawGrid> {
        Self::reader_for(family).read_grid(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(
            CsvGridReader::sniff_delimiter(b"Fecha;Pico;Importe\n05/01/2024;3/a;1.234,56\n"),
            b';'
        );
        assert_eq!(
            CsvGridReader::sniff_delimiter(b"Fecha\tPico\tImporte\n05/01/2024\t3\t10\n"),
            b'\t'
        );
        assert_eq!(CsvGridReader::sniff_delimiter(b"a,b,c\n1,2,3\n"), b',');
    }

    #[test]
    fn test_csv_reader_semicolon_with_banner() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "Fecha final;Hora final;Manguera;Combust.;Volumen;Monto").unwrap();
        writeln!(temp_file, "expand_less").unwrap();
        writeln!(temp_file, "05/01/2024;10:15;3/a;SUPER;35,20;$ 28.160,00").unwrap();

        let grid = CsvGridReader.read_grid(temp_file.path()).unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.row(0).unwrap().cell(3), Some("Combust."));
        assert_eq!(grid.row(1).unwrap().width(), 1);
        assert_eq!(grid.row(2).unwrap().cell(5), Some("$ 28.160,00"));
    }

    #[test]
    fn test_csv_reader_lossy_decoding() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"Estaci\xf3n;Volumen\nCepia;10\n").unwrap();

        let grid = CsvGridReader.read_grid(temp_file.path()).unwrap();
        assert_eq!(grid.len(), 2);
        assert!(grid.row(0).unwrap().cell(0).unwrap().starts_with("Estaci"));
        assert_eq!(grid.row(1).unwrap().cell(1), Some("10"));
    }

    #[test]
    fn test_csv_reader_file_not_found() {
        let result = CsvGridReader.read_grid(Path::new("/nonexistent/file.csv"));
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }

    #[test]
    fn test_xml_reader_sparse_rows() {
        let mut file = Builder::new().suffix(".xml").tempfile().unwrap();
        write!(
            file,
            r#"<?xml version="1.0"?>
<Workbook xmlns="urn:schemas-microsoft-com:office:spreadsheet"
          xmlns:ss="urn:schemas-microsoft-com:office:spreadsheet">
 <Worksheet ss:Name="Despachos">
  <Table>
   <Row>
    <Cell><Data ss:Type="String">Fecha</Data></Cell>
    <Cell><Data ss:Type="String">Pico</Data></Cell>
   </Row>
   <Row ss:Index="3">
    <Cell ss:Index="2"><Data ss:Type="String">3/b</Data></Cell>
    <Cell ss:MergeAcross="1"><Data ss:Type="String">SUPER</Data></Cell>
    <Cell><Data ss:Type="Number">1500</Data></Cell>
   </Row>
  </Table>
 </Worksheet>
 <Worksheet ss:Name="Otra">
  <Table><Row><Cell><Data ss:Type="String">ignorada</Data></Cell></Row></Table>
 </Worksheet>
</Workbook>"#
        )
        .unwrap();

        let grid = XmlSpreadsheetReader.read_grid(file.path()).unwrap();
        assert_eq!(grid.len(), 3);
        assert!(grid.row(1).unwrap().is_blank());

        let data = grid.row(2).unwrap();
        assert_eq!(data.cell(0), None);
        assert_eq!(data.cell(1), Some("3/b"));
        assert_eq!(data.cell(2), Some("SUPER"));
        assert_eq!(data.cell(3), None);
        assert_eq!(data.cell(4), Some("1500"));
    }

    #[test]
    fn test_xml_reader_unescapes_entities() {
        let mut file = Builder::new().suffix(".xml").tempfile().unwrap();
        write!(
            file,
            r#"<Workbook><Worksheet><Table><Row><Cell><Data>A &amp; B</Data></Cell></Row></Table></Worksheet></Workbook>"#
        )
        .unwrap();

        let grid = XmlSpreadsheetReader.read_grid(file.path()).unwrap();
        assert_eq!(grid.row(0).unwrap().cell(0), Some("A & B"));
    }

    #[test]
    fn test_render_cell() {
        assert_eq!(ExcelGridReader::render_cell(&Data::Float(1500.0)), Some("1500".to_string()));
        assert_eq!(ExcelGridReader::render_cell(&Data::Float(12.5)), Some("12.5".to_string()));
        assert_eq!(ExcelGridReader::render_cell(&Data::Empty), None);
        assert_eq!(
            ExcelGridReader::render_cell(&Data::String("NS XXI".to_string())),
            Some("NS XXI".to_string())
        );
    }
}
