// ==========================================
// 加油机交易归集系统 - 列分类器实现
// ==========================================
// 顺序: 版式别名（精确）→ 关键词（子串，按优先级）→ 内容嗅探
// 重复: 同一标准列命中多列时取最右侧（别名优先于关键词）
// ==========================================

use crate::config::profile::LayoutStrategy;
use crate::domain::transaction::RawRow;
use crate::domain::types::CanonicalColumn;
use crate::importer::ingest_trait::ColumnClassifier as ColumnClassifierTrait;
use crate::importer::value_normalizer::{
    fold_text, has_currency_mark, looks_like_date, parse_locale_number,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// 内容嗅探样本数
pub const CONTENT_SAMPLE_SIZE: usize = 5;

/// 逐行比值校验的相对容差
const RATIO_TOLERANCE: f64 = 0.01;

/// 关键词规则（按优先级）
const KEYWORD_RULES: [(CanonicalColumn, &[&str]); 9] = [
    (CanonicalColumn::Date, &["FECHA", "DATE"]),
    (CanonicalColumn::Time, &["HORA", "TIME"]),
    (CanonicalColumn::PumpId, &["PICO", "SURTIDOR", "SURT", "BOMBA"]),
    (CanonicalColumn::NozzleId, &["MANGUERA", "MANG"]),
    (CanonicalColumn::Product, &["PRODUCTO", "COMBUST", "PRODUCT"]),
    (CanonicalColumn::UnitPrice, &["PPU", "PRECIO", "UNITARIO"]),
    (
        CanonicalColumn::Amount,
        &["IMPORTE", "MONTO", "TOTAL", "VALOR", "AMOUNT"],
    ),
    (
        CanonicalColumn::Volume,
        &["VOLUMEN", "LITROS", "LTS", "CANTIDAD", "M3", "VOLUME"],
    ),
    (CanonicalColumn::Branch, &["SUCURSAL", "ESTACION", "BRANCH"]),
];

/// 按关键词识别列名
pub fn keyword_column(label: &str) -> Option<CanonicalColumn> {
    let folded = fold_text(label);
    if folded.is_empty() {
        return None;
    }
    KEYWORD_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| folded.contains(k)))
        .map(|(column, _)| *column)
}

// ==========================================
// 分类结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyMethod {
    Alias,
    Keyword,
    Content,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnAssignment {
    pub column: CanonicalColumn,
    pub index: usize,
    pub label: Option<String>,
    pub method: ClassifyMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnMapping {
    assignments: BTreeMap<CanonicalColumn, ColumnAssignment>,
    pub unclassified: Vec<usize>,
}

impl ColumnMapping {
    pub fn get(&self, column: CanonicalColumn) -> Option<&ColumnAssignment> {
        self.assignments.get(&column)
    }

    pub fn index_of(&self, column: CanonicalColumn) -> Option<usize> {
        self.get(column).map(|a| a.index)
    }

    pub fn contains(&self, column: CanonicalColumn) -> bool {
        self.assignments.contains_key(&column)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &ColumnAssignment> {
        self.assignments.values()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// 登记；同列已存在时: 方法优先级更高者保留，同级取右侧
    fn assign(
        &mut self,
        column: CanonicalColumn,
        index: usize,
        label: Option<String>,
        method: ClassifyMethod,
    ) {
        if let Some(existing) = self.assignments.get(&column) {
            if existing.method < method {
                return;
            }
        }
        self.assignments.insert(
            column,
            ColumnAssignment {
                column,
                index,
                label,
                method,
            },
        );
    }

    fn numeric_indices(&self) -> Vec<usize> {
        self.assignments
            .values()
            .filter(|a| a.column.is_numeric())
            .map(|a| a.index)
            .collect()
    }
}

// ==========================================
// 数值候选列（内容嗅探）
// ==========================================
#[derive(Debug, Clone)]
struct NumericCandidate {
    index: usize,
    label: Option<String>,
    marked: bool,
    median: f64,
}

fn median_magnitude(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn within_tolerance(value: f64, expected: f64) -> bool {
    if expected == 0.0 {
        value == 0.0
    } else {
        ((value - expected) / expected).abs() <= RATIO_TOLERANCE
    }
}

// ==========================================
// ColumnClassifier
// ==========================================
pub struct ColumnClassifier;

impl ColumnClassifier {
    /// 取某列前几个非空值
    fn sample_values<'r>(rows: &[(usize, &'r RawRow)], index: usize) -> Vec<&'r str> {
        rows.iter()
            .filter_map(|(_, row)| row.cell(index))
            .take(CONTENT_SAMPLE_SIZE)
            .collect()
    }

    fn numeric_at(row: &RawRow, index: usize) -> Option<f64> {
        row.cell(index).and_then(parse_locale_number)
    }

    /// 候选列与 expected(row) 逐行吻合（至少一行可比较）
    fn matches_row_wise<F>(rows: &[(usize, &RawRow)], index: usize, expected: F) -> bool
    where
        F: Fn(&RawRow) -> Option<f64>,
    {
        let mut compared = 0;
        for (_, row) in rows.iter().take(CONTENT_SAMPLE_SIZE * 4) {
            if let (Some(value), Some(expect)) = (Self::numeric_at(row, index), expected(row)) {
                if !within_tolerance(value, expect) {
                    return false;
                }
                compared += 1;
                if compared >= CONTENT_SAMPLE_SIZE {
                    break;
                }
            }
        }
        compared > 0
    }

    fn classify_by_content(
        mapping: &mut ColumnMapping,
        labels: &[Option<String>],
        rows: &[(usize, &RawRow)],
        pending: &[usize],
    ) {
        let mut numeric: Vec<NumericCandidate> = Vec::new();

        // === 步骤 1: 日期 / 数值候选 ===
        for &index in pending {
            let samples = Self::sample_values(rows, index);
            if samples.is_empty() {
                mapping.unclassified.push(index);
                continue;
            }
            let label = labels.get(index).cloned().flatten();

            if !mapping.contains(CanonicalColumn::Date) && samples.iter().all(|s| looks_like_date(s)) {
                mapping.assign(CanonicalColumn::Date, index, label, ClassifyMethod::Content);
                continue;
            }

            let parsed: Option<Vec<f64>> = samples.iter().map(|s| parse_locale_number(s)).collect();
            match parsed {
                Some(values) => {
                    let mut magnitudes: Vec<f64> = values.iter().map(|v| v.abs()).collect();
                    numeric.push(NumericCandidate {
                        index,
                        label,
                        marked: samples.iter().any(|s| has_currency_mark(s)),
                        median: median_magnitude(&mut magnitudes),
                    });
                }
                None => mapping.unclassified.push(index),
            }
        }

        let mut leftovers: Vec<NumericCandidate> = Vec::new();

        // === 步骤 2: 带货币标记 → 金额 / 单价（中位数大者为金额） ===
        let (mut marked, unmarked): (Vec<_>, Vec<_>) = numeric.into_iter().partition(|c| c.marked);
        marked.sort_by(|a, b| b.median.total_cmp(&a.median));
        for candidate in marked {
            let target = if !mapping.contains(CanonicalColumn::Amount) {
                Some(CanonicalColumn::Amount)
            } else if !mapping.contains(CanonicalColumn::UnitPrice) {
                Some(CanonicalColumn::UnitPrice)
            } else {
                None
            };
            match target {
                Some(column) => mapping.assign(column, candidate.index, candidate.label, ClassifyMethod::Content),
                None => leftovers.push(candidate),
            }
        }

        // === 步骤 3: 无标记 → 体积（距已分类数值列最近者） ===
        let mut unmarked = unmarked;
        if !mapping.contains(CanonicalColumn::Volume) && !unmarked.is_empty() {
            let anchors = mapping.numeric_indices();
            let pick = if anchors.is_empty() {
                0
            } else {
                unmarked
                    .iter()
                    .enumerate()
                    .min_by_key(|(pos, c)| {
                        let distance = anchors
                            .iter()
                            .map(|a| a.abs_diff(c.index))
                            .min()
                            .unwrap_or(usize::MAX);
                        (distance, *pos)
                    })
                    .map(|(pos, _)| pos)
                    .unwrap_or(0)
            };
            let candidate = unmarked.remove(pick);
            mapping.assign(CanonicalColumn::Volume, candidate.index, candidate.label, ClassifyMethod::Content);
        }
        leftovers.extend(unmarked);

        // === 步骤 4: 剩余候选按逐行比值校验 ===
        leftovers.sort_by_key(|c| c.index);
        for candidate in leftovers {
            let volume = mapping.index_of(CanonicalColumn::Volume);
            let amount = mapping.index_of(CanonicalColumn::Amount);
            let unit_price = mapping.index_of(CanonicalColumn::UnitPrice);

            if let (None, Some(a), Some(v)) = (unit_price, amount, volume) {
                let ratio = |row: &RawRow| {
                    let vol = Self::numeric_at(row, v).filter(|x| *x != 0.0)?;
                    Some(Self::numeric_at(row, a)? / vol)
                };
                if Self::matches_row_wise(rows, candidate.index, ratio) {
                    mapping.assign(CanonicalColumn::UnitPrice, candidate.index, candidate.label, ClassifyMethod::Content);
                    continue;
                }
            }

            if let (None, Some(v), Some(p)) = (amount, volume, unit_price) {
                let product = |row: &RawRow| Some(Self::numeric_at(row, v)? * Self::numeric_at(row, p)?);
                if Self::matches_row_wise(rows, candidate.index, product) {
                    mapping.assign(CanonicalColumn::Amount, candidate.index, candidate.label, ClassifyMethod::Content);
                    continue;
                }
            }

            mapping.unclassified.push(candidate.index);
        }

        mapping.unclassified.sort_unstable();
    }
}

impl ColumnClassifierTrait for ColumnClassifier {
    fn classify(
        &self,
        labels: &[Option<String>],
        rows: &[(usize, &RawRow)],
        strategy: &LayoutStrategy<'_>,
    ) -> ColumnMapping {
        let profile = strategy.profile();
        let mut mapping = ColumnMapping::default();
        let mut claimed: BTreeSet<usize> = BTreeSet::new();

        // === 步骤 1: 别名 / 关键词 ===
        for (index, label) in labels.iter().enumerate() {
            let Some(text) = label.as_deref() else {
                continue;
            };
            if let Some(column) = profile.and_then(|p| p.alias_for(text)) {
                mapping.assign(column, index, label.clone(), ClassifyMethod::Alias);
                claimed.insert(index);
            } else if let Some(column) = keyword_column(text) {
                mapping.assign(column, index, label.clone(), ClassifyMethod::Keyword);
                claimed.insert(index);
            }
        }

        // 油嘴列承载组合枪号: 无枪号列时提升
        if !mapping.contains(CanonicalColumn::PumpId) {
            if let Some(mut nozzle) = mapping.assignments.remove(&CanonicalColumn::NozzleId) {
                nozzle.column = CanonicalColumn::PumpId;
                mapping.assignments.insert(CanonicalColumn::PumpId, nozzle);
            }
        }

        // === 步骤 2: 内容嗅探（未命中的列） ===
        let width = labels
            .len()
            .max(rows.iter().map(|(_, r)| r.width()).max().unwrap_or(0));
        let pending: Vec<usize> = (0..width).filter(|i| !claimed.contains(i)).collect();
        Self::classify_by_content(&mut mapping, labels, rows, &pending);

        debug!(
            mapped = mapping.len(),
            unclassified = mapping.unclassified.len(),
            "列分类完成"
        );
        mapping
    }
}
