// ==========================================
// 加油机交易归集系统 - 记录组装器实现
// ==========================================
// 丢弃: 空行 / 体积与金额同时缺失 / 日期不可解析 / 无日期
// 派生: 单价缺失时 = 金额 / 体积（体积为 0 时为 0）
// 缺省: 站点 = 文件站点；时间 00:00；枪号 "1"；油嘴 "a"
// ==========================================

use crate::domain::transaction::{
    DropReason, RawFile, RawRow, RowDrop, TransactionRecord, DEFAULT_NOZZLE_ID, DEFAULT_PUMP_ID,
};
use crate::domain::types::CanonicalColumn;
use crate::importer::column_classifier::ColumnMapping;
use crate::importer::error::ImportError;
use crate::importer::ingest_trait::{RecordAssembler as RecordAssemblerTrait, ValueNormalizer};
use crate::importer::product_mapper::ProductMapper;
use chrono::{NaiveDate, NaiveTime};
use std::collections::BTreeMap;
use tracing::{debug, trace};

// ==========================================
// 组装结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct AssemblyOutcome {
    pub records: Vec<TransactionRecord>,
    pub drops: Vec<RowDrop>,
    pub numeric_failures: usize,
    pub date_failures: usize,
}

impl AssemblyOutcome {
    pub fn drop_counts(&self) -> BTreeMap<DropReason, usize> {
        let mut counts = BTreeMap::new();
        for drop in &self.drops {
            *counts.entry(drop.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// 单价派生: 体积为 0 时为 0，任一缺失时为空
pub fn derive_unit_price(amount: Option<f64>, volume: Option<f64>) -> Option<f64> {
    match (amount, volume) {
        (Some(_), Some(v)) if v == 0.0 => Some(0.0),
        (Some(a), Some(v)) => Some(a / v),
        _ => None,
    }
}

pub struct RecordAssembler;

/// 单行上下文
struct RowCursor<'a> {
    row: &'a RawRow,
    row_number: usize,
    mapping: &'a ColumnMapping,
}

impl<'a> RowCursor<'a> {
    fn cell(&self, column: CanonicalColumn) -> Option<&'a str> {
        self.mapping
            .index_of(column)
            .and_then(|idx| self.row.cell(idx))
    }
}

impl RecordAssembler {
    fn numeric(
        cursor: &RowCursor<'_>,
        column: CanonicalColumn,
        normalizer: &dyn ValueNormalizer,
        failures: &mut usize,
    ) -> Option<f64> {
        let raw = cursor.cell(column)?;
        let value = normalizer.parse_numeric(raw);
        if value.is_none() {
            *failures += 1;
            let err = ImportError::NumericParseFailure {
                row: cursor.row_number,
                field: column.to_string(),
                value: raw.to_string(),
            };
            trace!(error = %err, "数值置空");
        }
        value
    }

    fn reject(drops: &mut Vec<RowDrop>, row_number: usize, reason: DropReason, detail: Option<String>) {
        drops.push(RowDrop {
            row_number,
            reason,
            detail,
        });
    }
}

impl RecordAssemblerTrait for RecordAssembler {
    fn assemble(
        &self,
        file: &RawFile,
        rows: &[(usize, &RawRow)],
        mapping: &ColumnMapping,
        normalizer: &dyn ValueNormalizer,
        products: &ProductMapper,
        fallback_date: Option<NaiveDate>,
    ) -> AssemblyOutcome {
        let mut outcome = AssemblyOutcome::default();
        let source = file.source_label();
        let has_date_column = mapping.contains(CanonicalColumn::Date);
        let midnight = NaiveTime::default();

        for &(grid_idx, row) in rows {
            let row_number = grid_idx + 1;
            let cursor = RowCursor {
                row,
                row_number,
                mapping,
            };

            if row.is_blank() {
                Self::reject(&mut outcome.drops, row_number, DropReason::EmptyRow, None);
                continue;
            }

            // === 数值字段 ===
            let volume = Self::numeric(&cursor, CanonicalColumn::Volume, normalizer, &mut outcome.numeric_failures);
            let amount = Self::numeric(&cursor, CanonicalColumn::Amount, normalizer, &mut outcome.numeric_failures);
            let supplied_price =
                Self::numeric(&cursor, CanonicalColumn::UnitPrice, normalizer, &mut outcome.numeric_failures);

            if volume.is_none() && amount.is_none() {
                let err = ImportError::IncompleteRow {
                    row: row_number,
                    message: "体积与金额同时缺失".to_string(),
                };
                trace!(error = %err, "丢弃行");
                Self::reject(&mut outcome.drops, row_number, DropReason::MissingVolumeAndAmount, None);
                continue;
            }

            // === 日期 / 时间 ===
            let (date, combined_time) = if has_date_column {
                match cursor.cell(CanonicalColumn::Date) {
                    Some(raw) => match normalizer.parse_date_time(raw) {
                        Some(parsed) => parsed,
                        None => {
                            outcome.date_failures += 1;
                            let err = ImportError::DateParseFailure {
                                row: row_number,
                                value: raw.to_string(),
                            };
                            trace!(error = %err, "丢弃行");
                            Self::reject(
                                &mut outcome.drops,
                                row_number,
                                DropReason::UnresolvableDate,
                                Some(raw.to_string()),
                            );
                            continue;
                        }
                    },
                    None => {
                        Self::reject(&mut outcome.drops, row_number, DropReason::MissingDate, None);
                        continue;
                    }
                }
            } else {
                match fallback_date {
                    Some(date) => (date, None),
                    None => {
                        Self::reject(&mut outcome.drops, row_number, DropReason::MissingDate, None);
                        continue;
                    }
                }
            };

            let time = cursor
                .cell(CanonicalColumn::Time)
                .and_then(|raw| normalizer.parse_time(raw))
                .or(combined_time)
                .unwrap_or(midnight);

            // === 枪号 / 油嘴 ===
            let (mut pump_id, mut nozzle_id) = cursor
                .cell(CanonicalColumn::PumpId)
                .and_then(|raw| normalizer.parse_pump_nozzle(raw))
                .unwrap_or_else(|| (DEFAULT_PUMP_ID.to_string(), DEFAULT_NOZZLE_ID.to_string()));
            if let Some(nozzle) = cursor
                .cell(CanonicalColumn::NozzleId)
                .and_then(|raw| normalizer.parse_nozzle(raw))
            {
                nozzle_id = nozzle;
            }
            if pump_id.is_empty() {
                pump_id = DEFAULT_PUMP_ID.to_string();
            }

            // === 站点 / 产品 ===
            let branch = cursor
                .cell(CanonicalColumn::Branch)
                .map(str::to_string)
                .unwrap_or_else(|| file.branch.clone());
            let product = products.canonicalize(cursor.cell(CanonicalColumn::Product));

            // 显式单价原样保留
            let unit_price = supplied_price.or_else(|| derive_unit_price(amount, volume));

            outcome.records.push(TransactionRecord {
                date,
                time,
                branch,
                pump_id,
                nozzle_id,
                product,
                volume,
                amount,
                unit_price,
                source: source.clone(),
                row_number,
            });
        }

        debug!(
            file = %source,
            records = outcome.records.len(),
            dropped = outcome.drops.len(),
            numeric_failures = outcome.numeric_failures,
            date_failures = outcome.date_failures,
            "记录组装完成"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::profile::LayoutStrategy;
    use crate::domain::types::FormatFamily;
    use crate::importer::column_classifier::ColumnClassifier;
    use crate::importer::ingest_trait::ColumnClassifier as _;
    use crate::importer::value_normalizer::ValueNormalizer as Normalizer;
    use std::path::PathBuf;

    fn raw_file() -> RawFile {
        RawFile {
            path: PathBuf::from("data/petrol/ENERO.csv"),
            format: FormatFamily::DelimitedText,
            source_tag: "petrol".to_string(),
            branch: "Petrol".to_string(),
            profile: None,
        }
    }

    fn assemble(labels: &[&str], data: &[&[&str]], fallback: Option<NaiveDate>) -> AssemblyOutcome {
        let rows: Vec<RawRow> = data.iter().map(|r| RawRow::from_texts(r)).collect();
        let indexed: Vec<(usize, &RawRow)> = rows.iter().enumerate().map(|(i, r)| (i + 1, r)).collect();
        let labels: Vec<Option<String>> = labels
            .iter()
            .map(|l| Some(l.to_string()).filter(|l| !l.is_empty()))
            .collect();
        let mapping = ColumnClassifier.classify(&labels, &indexed, &LayoutStrategy::Infer);
        RecordAssembler.assemble(
            &raw_file(),
            &indexed,
            &mapping,
            &Normalizer::default(),
            &ProductMapper::default(),
            fallback,
        )
    }

    #[test]
    fn test_unit_price_derived() {
        let outcome = assemble(
            &["Fecha", "Pico", "Producto", "Volumen", "Importe"],
            &[&["05/01/2024 10:15", "3/b", "NS XXI", "12,5", "$1.250,00"]],
            None,
        );
        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(record.time_text(), "10:15:00");
        assert_eq!(record.pump_id, "3");
        assert_eq!(record.nozzle_id, "b");
        assert_eq!(record.product, "GNC");
        assert_eq!(record.branch, "Petrol");
        assert_eq!(record.unit_price, Some(100.0));
        assert_eq!(record.row_number, 2);
        assert_eq!(record.source, "data/petrol/ENERO.csv");
    }

    #[test]
    fn test_supplied_unit_price_retained() {
        let outcome = assemble(
            &["Fecha", "Volumen", "Importe", "PPU"],
            &[&["05/01/2024", "10", "1000", "99,5"]],
            None,
        );
        assert_eq!(outcome.records[0].unit_price, Some(99.5));
    }

    #[test]
    fn test_zero_volume_gives_zero_price() {
        let outcome = assemble(&["Fecha", "Volumen", "Importe"], &[&["05/01/2024", "0", "50"]], None);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].unit_price, Some(0.0));
        assert_eq!(outcome.records[0].amount, Some(50.0));
    }

    #[test]
    fn test_nan_volume_and_amount_dropped() {
        let outcome = assemble(
            &["Fecha", "Volumen", "Importe"],
            &[&["05/01/2024", "NaN", "NaN"], &["05/01/2024", "", "20"]],
            None,
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].volume, None);
        assert_eq!(outcome.records[0].unit_price, None);
        assert_eq!(outcome.numeric_failures, 2);
        assert_eq!(outcome.drop_counts()[&DropReason::MissingVolumeAndAmount], 1);
    }

    #[test]
    fn test_unparseable_date_dropped() {
        let outcome = assemble(
            &["Fecha", "Volumen"],
            &[&["sin fecha", "10"], &["", "10"], &[], &["06/01/2024", "5"]],
            None,
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.date_failures, 1);
        let counts = outcome.drop_counts();
        assert_eq!(counts[&DropReason::UnresolvableDate], 1);
        assert_eq!(counts[&DropReason::MissingDate], 1);
        assert_eq!(counts[&DropReason::EmptyRow], 1);
    }

    #[test]
    fn test_defaults_and_fallback_date() {
        let fallback = NaiveDate::from_ymd_opt(2024, 1, 1);
        let outcome = assemble(&["Litros", "Importe"], &[&["10", "100"]], fallback);
        let record = &outcome.records[0];
        assert_eq!(Some(record.date), fallback);
        assert_eq!(record.time_text(), "00:00:00");
        assert_eq!(record.pump_id, "1");
        assert_eq!(record.nozzle_id, "a");
        assert_eq!(record.product, "LIQUIDO");

        let without = assemble(&["Litros", "Importe"], &[&["10", "100"]], None);
        assert!(without.records.is_empty());
        assert_eq!(without.drop_counts()[&DropReason::MissingDate], 1);
    }

    #[test]
    fn test_separate_nozzle_and_branch_columns() {
        let outcome = assemble(
            &["Fecha", "Hora", "Surt", "Mang", "Sucursal", "Volumen"],
            &[&["05/01/2024", "08:05:42", "4", "2", "Posta Cepia", "10"]],
            None,
        );
        let record = &outcome.records[0];
        assert_eq!(record.pump_id, "4");
        assert_eq!(record.nozzle_id, "b");
        assert_eq!(record.branch, "Posta Cepia");
        assert_eq!(record.time_text(), "08:05:42");
    }
}
