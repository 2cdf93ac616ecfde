// ==========================================
// 加油机交易归集系统 - 领域类型定义
// ==========================================
// 职责: 格式族 / 标准列 / 落库策略 / 运行状态
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 文件结构格式族 (Format Family)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    XmlSpreadsheet,    // SpreadsheetML 2003（带命名空间的 Row/Cell）
    BinarySpreadsheet, // xls / xlsx / ods
    DelimitedText,     // csv / txt / tsv
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatFamily::XmlSpreadsheet => write!(f, "xml_spreadsheet"),
            FormatFamily::BinarySpreadsheet => write!(f, "binary_spreadsheet"),
            FormatFamily::DelimitedText => write!(f, "delimited_text"),
        }
    }
}

// ==========================================
// 标准列 (Canonical Column)
// ==========================================
// 顺序即输出表的列顺序（source 为溯源列，不参与分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalColumn {
    Date,
    Time,
    Branch,
    PumpId,
    NozzleId,
    Product,
    Volume,
    Amount,
    UnitPrice,
}

impl CanonicalColumn {
    pub const ALL: [CanonicalColumn; 9] = [
        CanonicalColumn::Date,
        CanonicalColumn::Time,
        CanonicalColumn::Branch,
        CanonicalColumn::PumpId,
        CanonicalColumn::NozzleId,
        CanonicalColumn::Product,
        CanonicalColumn::Volume,
        CanonicalColumn::Amount,
        CanonicalColumn::UnitPrice,
    ];

    /// 是否为数值列
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CanonicalColumn::Volume | CanonicalColumn::Amount | CanonicalColumn::UnitPrice
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalColumn::Date => "date",
            CanonicalColumn::Time => "time",
            CanonicalColumn::Branch => "branch",
            CanonicalColumn::PumpId => "pump_id",
            CanonicalColumn::NozzleId => "nozzle_id",
            CanonicalColumn::Product => "product",
            CanonicalColumn::Volume => "volume",
            CanonicalColumn::Amount => "amount",
            CanonicalColumn::UnitPrice => "unit_price",
        }
    }
}

impl fmt::Display for CanonicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        CanonicalColumn::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("未知标准列: {}", s))
    }
}

// ==========================================
// 落库策略 (Persist Policy)
// ==========================================
// 每次运行只决定一次，不按记录决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    #[default]
    Replace, // 整体替换语料
    Append,  // 追加（按唯一键去重）
}

impl fmt::Display for PersistPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistPolicy::Replace => write!(f, "replace"),
            PersistPolicy::Append => write!(f, "append"),
        }
    }
}

impl FromStr for PersistPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(PersistPolicy::Replace),
            "append" => Ok(PersistPolicy::Append),
            other => Err(format!("未知落库策略: {}（仅支持 replace/append）", other)),
        }
    }
}

// ==========================================
// 运行状态 (Run State)
// ==========================================
// Discovering → Parsing → Assembling → Consolidating → Persisted
// 终态: Persisted / Aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Discovering,
    Parsing,
    Assembling,
    Consolidating,
    Persisted,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Persisted | RunState::Aborted)
    }

    /// 合法的下一状态
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Discovering, Parsing)
                | (Parsing, Assembling)
                | (Assembling, Consolidating)
                | (Consolidating, Persisted)
                | (Discovering, Aborted)
                | (Parsing, Aborted)
                | (Assembling, Aborted)
                | (Consolidating, Aborted)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Discovering => write!(f, "DISCOVERING"),
            RunState::Parsing => write!(f, "PARSING"),
            RunState::Assembling => write!(f, "ASSEMBLING"),
            RunState::Consolidating => write!(f, "CONSOLIDATING"),
            RunState::Persisted => write!(f, "PERSISTED"),
            RunState::Aborted => write!(f, "ABORTED"),
        }
    }
}

// ==========================================
// 单文件处理阶段 (File Stage)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStage {
    Detect,
    Read,
    LocateHeader,
    Classify,
    Assemble,
}

impl fmt::Display for FileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStage::Detect => write!(f, "DETECT"),
            FileStage::Read => write!(f, "READ"),
            FileStage::LocateHeader => write!(f, "LOCATE_HEADER"),
            FileStage::Classify => write!(f, "CLASSIFY"),
            FileStage::Assemble => write!(f, "ASSEMBLE"),
        }
    }
}
