// ==========================================
// 加油机交易归集系统 - 表头定位器实现
// ==========================================
// 评分候选: 每个关键词族 +2；非空表头 ≥4 列 +2；其后 5 行无空行 +1
// 扫描在首个命中 ≥2 个关键词族的行处停止
// 未命中时回退到第 0 行（HeaderNotFound，非致命）
// ==========================================

use crate::config::profile::{ColumnMappingProfile, LayoutStrategy};
use crate::domain::transaction::{RawGrid, RawRow};
use crate::importer::error::ImportError;
use crate::importer::ingest_trait::HeaderLocator as HeaderLocatorTrait;
use crate::importer::value_normalizer::fold_text;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// 表头扫描窗口（行）
pub const HEADER_SCAN_WINDOW: usize = 30;

/// 通用页脚/汇总标记
pub const BASE_FOOTER_MARKERS: [&str; 5] = ["CANTIDAD", "TOTAL", "TOTALES", "SUBTOTAL", "RESUMEN"];

const DATA_WINDOW_ROWS: usize = 5;
const WIDE_HEADER_CELLS: usize = 4;

// ==========================================
// 表头关键词族
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderFamily {
    Date,
    Volume,
    Amount,
    Product,
    Pump,
}

const HEADER_FAMILIES: [(HeaderFamily, &[&str]); 5] = [
    (HeaderFamily::Date, &["FECHA", "DATE"]),
    (HeaderFamily::Volume, &["VOLUMEN", "LITROS", "LTS", "CANTIDAD", "M3"]),
    (HeaderFamily::Amount, &["IMPORTE", "MONTO", "TOTAL", "VALOR"]),
    (HeaderFamily::Product, &["PRODUCTO", "COMBUST", "PRODUCT"]),
    (
        HeaderFamily::Pump,
        &["PICO", "SURTIDOR", "SURT", "MANGUERA", "MANG", "BOMBA"],
    ),
];

/// 行中出现的关键词族
pub fn families_in_row(row: &RawRow) -> BTreeSet<HeaderFamily> {
    let mut hits = BTreeSet::new();
    for (_, value) in row.non_empty() {
        let folded = fold_text(value);
        for (family, keywords) in HEADER_FAMILIES.iter() {
            if keywords.iter().any(|k| folded.contains(k)) {
                hits.insert(*family);
            }
        }
    }
    hits
}

// ==========================================
// 定位结果（诊断信息）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateStrategy {
    Scored,            // 评分扫描
    Fallback,          // 未命中，回退第 0 行
    ProfileSkip,       // 版式固定跳过行数
    ProfilePositional, // 版式位置列名（不消耗表头行）
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderCandidate {
    pub row: usize,
    pub score: i32,
    pub families: Vec<HeaderFamily>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderLocation {
    /// 表头行（位置列名时为 None）
    pub header_row: Option<usize>,
    /// 首个数据行（已含 skip_after_header）
    pub data_start: usize,
    pub score: i32,
    pub candidates: Vec<HeaderCandidate>,
    pub strategy: LocateStrategy,
    pub diagnostic: Option<String>,
}

impl HeaderLocation {
    /// 每列的原始列名
    pub fn labels(&self, grid: &RawGrid, profile: Option<&ColumnMappingProfile>) -> Vec<Option<String>> {
        if let (LocateStrategy::ProfilePositional, Some(profile)) = (self.strategy, profile) {
            let width = grid.width().max(profile.column_names.len());
            return (0..width)
                .map(|idx| {
                    profile
                        .column_names
                        .get(idx)
                        .map(|n| n.trim().to_string())
                        .filter(|n| !n.is_empty())
                })
                .collect();
        }

        let header = self.header_row.and_then(|idx| grid.row(idx));
        (0..grid.width())
            .map(|idx| header.and_then(|row| row.cell(idx)).map(str::to_string))
            .collect()
    }
}

// ==========================================
// HeaderLocator
// ==========================================
pub struct HeaderLocator;

impl HeaderLocator {
    fn score_candidate(grid: &RawGrid, row_idx: usize, families: &BTreeSet<HeaderFamily>) -> i32 {
        let mut score = 2 * families.len() as i32;

        let non_empty = grid.row(row_idx).map(|r| r.non_empty().count()).unwrap_or(0);
        if non_empty >= WIDE_HEADER_CELLS {
            score += 2;
        }

        let window_has_blank = grid
            .rows()
            .iter()
            .skip(row_idx + 1)
            .take(DATA_WINDOW_ROWS)
            .any(RawRow::is_blank);
        if !window_has_blank {
            score += 1;
        }
        score
    }

    /// 评分扫描（不考虑版式）
    pub fn scan(grid: &RawGrid) -> (Option<HeaderCandidate>, Vec<HeaderCandidate>) {
        let mut candidates: Vec<HeaderCandidate> = Vec::new();

        for (row_idx, row) in grid.rows().iter().enumerate().take(HEADER_SCAN_WINDOW) {
            let families = families_in_row(row);
            if families.is_empty() {
                continue;
            }

            let score = Self::score_candidate(grid, row_idx, &families);
            let strong = families.len() >= 2;
            candidates.push(HeaderCandidate {
                row: row_idx,
                score,
                families: families.into_iter().collect(),
            });
            if strong {
                break;
            }
        }

        // 最高分胜出，并列取最先出现者
        let best = candidates
            .iter()
            .fold(None::<&HeaderCandidate>, |best, c| match best {
                Some(b) if b.score >= c.score => Some(b),
                _ => Some(c),
            })
            .cloned();
        (best, candidates)
    }

    /// 版式标记（分节行等），在数据区任意位置生效
    fn profile_markers(profile: Option<&ColumnMappingProfile>) -> Vec<String> {
        profile
            .map(|p| {
                p.footer_markers
                    .iter()
                    .map(|m| fold_text(m))
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_footer(row: &RawRow, markers: &[String]) -> bool {
        row.first_non_empty()
            .map(|first| {
                let folded = fold_text(first);
                markers.iter().any(|m| folded.starts_with(m.as_str()))
            })
            .unwrap_or(false)
    }
}

impl HeaderLocatorTrait for HeaderLocator {
    fn locate(&self, grid: &RawGrid, strategy: &LayoutStrategy<'_>) -> HeaderLocation {
        let profile = strategy.profile();
        let skip_after = profile.map(|p| p.skip_after_header).unwrap_or(0);

        // === 版式: 位置列名 ===
        if let Some(p) = profile.filter(|p| p.has_positional_names()) {
            let start = p.skip_rows.unwrap_or(0);
            return HeaderLocation {
                header_row: None,
                data_start: start + skip_after,
                score: 0,
                candidates: Vec::new(),
                strategy: LocateStrategy::ProfilePositional,
                diagnostic: None,
            };
        }

        // === 版式: 固定跳过行数 ===
        if let Some(skip) = profile.and_then(|p| p.skip_rows) {
            return HeaderLocation {
                header_row: Some(skip),
                data_start: skip + 1 + skip_after,
                score: 0,
                candidates: Vec::new(),
                strategy: LocateStrategy::ProfileSkip,
                diagnostic: None,
            };
        }

        // === 评分扫描 ===
        let (best, candidates) = Self::scan(grid);
        match best {
            Some(best) => {
                debug!(
                    header_row = best.row,
                    score = best.score,
                    candidates = candidates.len(),
                    "表头定位完成"
                );
                HeaderLocation {
                    header_row: Some(best.row),
                    data_start: best.row + 1 + skip_after,
                    score: best.score,
                    candidates,
                    strategy: LocateStrategy::Scored,
                    diagnostic: None,
                }
            }
            None => {
                let err = ImportError::HeaderNotFound {
                    scanned: grid.len().min(HEADER_SCAN_WINDOW),
                    fallback: 0,
                };
                warn!(error = %err, "表头未命中");
                HeaderLocation {
                    header_row: Some(0),
                    data_start: 1 + skip_after,
                    score: 0,
                    candidates,
                    strategy: LocateStrategy::Fallback,
                    diagnostic: Some(err.to_string()),
                }
            }
        }
    }

    fn data_rows<'g>(
        &self,
        grid: &'g RawGrid,
        location: &HeaderLocation,
        strategy: &LayoutStrategy<'_>,
    ) -> Vec<(usize, &'g RawRow)> {
        let markers = Self::profile_markers(strategy.profile());
        let base: Vec<String> = BASE_FOOTER_MARKERS.iter().map(|m| m.to_string()).collect();

        let mut rows: Vec<(usize, &RawRow)> = grid
            .rows()
            .iter()
            .enumerate()
            .skip(location.data_start)
            .filter(|(_, row)| !Self::is_footer(row, &markers))
            .collect();

        // 尾部: 空行与汇总行
        while rows
            .last()
            .map(|(_, r)| r.is_blank() || Self::is_footer(r, &base))
            .unwrap_or(false)
        {
            rows.pop();
        }
        rows
    }
}
