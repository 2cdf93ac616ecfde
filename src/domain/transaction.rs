// ==========================================
// 加油机交易归集系统 - 交易领域模型
// ==========================================
// 职责: 原始文件 / 原始网格 / 标准交易记录 / 运行报告
// ==========================================

use crate::domain::types::{FileStage, FormatFamily, PersistPolicy, RunState};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// 缺省枪号哨兵值
pub const DEFAULT_PUMP_ID: &str = "1";

/// 缺省油嘴号
pub const DEFAULT_NOZZLE_ID: &str = "a";

// ==========================================
// RawFile - 待处理源文件
// ==========================================
// 每次运行只读取一次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFile {
    pub path: PathBuf,
    pub format: FormatFamily,
    pub source_tag: String, // 来源标签
    pub branch: String,     // 站点名称（缺省等于 source_tag）
    #[serde(default)]
    pub profile: Option<String>, // 显式指定的 ColumnMappingProfile（缺省按 source_tag 查找）
}

impl RawFile {
    /// 查找 ColumnMappingProfile 所用的键
    pub fn profile_key(&self) -> &str {
        self.profile.as_deref().unwrap_or(&self.source_tag)
    }

    /// 溯源字符串（发现时的路径，保证多次运行一致）
    pub fn source_label(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source_label())
    }
}

// ==========================================
// RawRow / RawGrid - 原始网格
// ==========================================
// 单元格为字符串或空；XML 稀疏行按索引落位，空位为 None
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    cells: Vec<Option<String>>,
}

impl RawRow {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let cells = cells
            .into_iter()
            .map(|c| {
                c.map(Into::into)
                    .map(|v: String| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .collect();
        Self { cells }
    }

    /// 全部为文本单元格的便捷构造
    pub fn from_texts<S: AsRef<str>>(texts: &[S]) -> Self {
        Self::new(texts.iter().map(|t| Some(t.as_ref().to_string())))
    }

    /// 由稀疏索引（0 基）构造
    pub fn from_sparse(cells: BTreeMap<usize, String>) -> Self {
        let width = cells.keys().next_back().map(|k| k + 1).unwrap_or(0);
        let mut dense: Vec<Option<String>> = vec![None; width];
        for (idx, value) in cells {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                dense[idx] = Some(trimmed.to_string());
            }
        }
        Self { cells: dense }
    }

    pub fn cell(&self, idx: usize) -> Option<&str> {
        self.cells.get(idx).and_then(|c| c.as_deref())
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_none())
    }

    /// 非空单元格（索引, 值）
    pub fn non_empty(&self) -> impl Iterator<Item = (usize, &str)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| c.as_deref().map(|v| (idx, v)))
    }

    pub fn first_non_empty(&self) -> Option<&str> {
        self.non_empty().next().map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGrid {
    rows: Vec<RawRow>,
}

impl RawGrid {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&RawRow> {
        self.rows.get(idx)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 最大列宽
    pub fn width(&self) -> usize {
        self.rows.iter().map(RawRow::width).max().unwrap_or(0)
    }
}

// ==========================================
// TransactionRecord - 标准交易记录（一次加油 despacho）
// ==========================================
// 不变式:
// - volume 与 amount 不能同时缺失
// - unit_price 缺失时由 amount/volume 派生，volume == 0 时为 0
// - date 必须为有效日历日期
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    #[serde(with = "hhmmss")]
    pub time: NaiveTime,
    pub branch: String,
    pub pump_id: String,
    pub nozzle_id: String,
    pub product: String,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
    pub unit_price: Option<f64>,
    pub source: String,

    // 元信息（仅运行期有效，不落库）
    #[serde(skip)]
    pub row_number: usize,
}

impl TransactionRecord {
    /// 标准日期文本（YYYY-MM-DD）
    pub fn date_text(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// 标准时间文本（HH:MM:SS）
    pub fn time_text(&self) -> String {
        self.time.format(hhmmss::FORMAT).to_string()
    }
}

/// 时间以 HH:MM:SS 序列化；读取时兼容 HH:MM
pub mod hhmmss {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M:%S";
    pub const SHORT_FORMAT: &str = "%H:%M";

    /// 解析存储/导出的时间文本
    pub fn parse(raw: &str) -> chrono::ParseResult<NaiveTime> {
        NaiveTime::parse_from_str(raw, FORMAT).or_else(|_| NaiveTime::parse_from_str(raw, SHORT_FORMAT))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ==========================================
// DropReason - 行丢弃原因
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    EmptyRow,               // 整行为空
    MissingVolumeAndAmount, // 体积与金额同时缺失（IncompleteRow）
    UnresolvableDate,       // 日期无法解析（DateParseFailure）
    MissingDate,            // 无日期且无来源级回退日期
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowDrop {
    pub row_number: usize,
    pub reason: DropReason,
    pub detail: Option<String>,
}

// ==========================================
// FileReport - 单文件处理结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub source: String,
    pub source_tag: String,
    pub format: Option<FormatFamily>,
    pub header_row: Option<usize>,
    pub header_score: Option<i32>,
    pub data_rows: usize,
    pub records: usize,
    pub dropped: BTreeMap<DropReason, usize>,
    pub numeric_failures: usize,
    pub date_failures: usize,
    pub skipped: Option<FileSkip>,
}

impl FileReport {
    pub fn empty(source: String, source_tag: String) -> Self {
        Self {
            source,
            source_tag,
            format: None,
            header_row: None,
            header_score: None,
            data_rows: 0,
            records: 0,
            dropped: BTreeMap::new(),
            numeric_failures: 0,
            date_failures: 0,
            skipped: None,
        }
    }

    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }
}

/// 文件被跳过（阶段 + 原因）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSkip {
    pub stage: FileStage,
    pub reason: String,
}

// ==========================================
// ProductSummary - 按产品汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub count: usize,
    pub amount_sum: f64,
    pub volume_sum: f64,
}

/// 按产品汇总（缺失值不计入求和）
pub fn summarize_by_product(records: &[TransactionRecord]) -> BTreeMap<String, ProductSummary> {
    let mut summary: BTreeMap<String, ProductSummary> = BTreeMap::new();
    for record in records {
        let entry = summary.entry(record.product.clone()).or_default();
        entry.count += 1;
        entry.amount_sum += record.amount.unwrap_or(0.0);
        entry.volume_sum += record.volume.unwrap_or(0.0);
    }
    summary
}

// ==========================================
// RunReport - 运行结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub policy: PersistPolicy,
    pub files: Vec<FileReport>,
    pub total_records: usize,
    pub persisted: usize,
    pub duplicates_skipped: usize,
    pub cancelled: bool,
    pub by_product: BTreeMap<String, ProductSummary>,
    pub elapsed_ms: u128,
    /// 写入已提交但 CSV 导出失败时的原因
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_error: Option<String>,
}

impl RunReport {
    pub fn skipped_files(&self) -> usize {
        self.files.iter().filter(|f| f.skipped.is_some()).count()
    }

    /// 跨文件的丢弃原因汇总
    pub fn dropped_by_reason(&self) -> HashMap<DropReason, usize> {
        let mut totals = HashMap::new();
        for file in &self.files {
            for (reason, count) in &file.dropped {
                *totals.entry(*reason).or_insert(0) += count;
            }
        }
        totals
    }
}
