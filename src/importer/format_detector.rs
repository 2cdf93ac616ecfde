// ==========================================
// 加油机交易归集系统 - 格式识别
// ==========================================
// 扩展名映射 + 内容嗅探（前 512 字节）
// 许多 POS 系统以 .xls 扩展名保存 SpreadsheetML
// ==========================================

use crate::domain::types::FormatFamily;
use crate::importer::error::{ImportError, ImportResult};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const SNIFF_BYTES: usize = 512;
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub struct FormatDetector;

impl FormatDetector {
    /// 仅按扩展名分类
    pub fn family_from_extension(path: &Path) -> ImportResult<FormatFamily> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "xml" => Ok(FormatFamily::XmlSpreadsheet),
            "xls" | "xlsx" | "xlsm" | "xlsb" | "ods" => Ok(FormatFamily::BinarySpreadsheet),
            "csv" | "txt" | "tsv" => Ok(FormatFamily::DelimitedText),
            _ => Err(ImportError::UnsupportedFormat(if ext.is_empty() {
                path.display().to_string()
            } else {
                ext
            })),
        }
    }

    /// 扩展名 + 内容嗅探
    pub fn detect(path: &Path) -> ImportResult<FormatFamily> {
        let family = Self::family_from_extension(path)?;
        if family == FormatFamily::XmlSpreadsheet {
            return Ok(family);
        }

        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let mut head = Vec::with_capacity(SNIFF_BYTES);
        File::open(path)?
            .take(SNIFF_BYTES as u64)
            .read_to_end(&mut head)?;

        if looks_like_xml(&head) {
            debug!(file = %path.display(), declared = %family, "内容为 XML 标记，按 SpreadsheetML 处理");
            return Ok(FormatFamily::XmlSpreadsheet);
        }
        Ok(family)
    }
}

/// 去掉 BOM 与前导空白后以 `<?xml` 或 `<Workbook` 开头
fn looks_like_xml(head: &[u8]) -> bool {
    let body = head.strip_prefix(UTF8_BOM).unwrap_or(head);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let body = &body[start..];
    body.starts_with(b"<?xml") || body.starts_with(b"<Workbook")
}
