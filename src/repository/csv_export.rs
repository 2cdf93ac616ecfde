// ==========================================
// 加油机交易归集系统 - 扁平 CSV 导出
// ==========================================
// 固定列序: date, time, branch, pump_id, nozzle_id, product,
//           volume, amount, unit_price, source
// 缺失数值导出为空串；浮点使用最短往返表示，保证重跑逐字节一致
// ==========================================

use crate::domain::transaction::TransactionRecord;
use crate::repository::error::RepositoryResult;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

pub const EXPORT_COLUMNS: [&str; 10] = [
    "date",
    "time",
    "branch",
    "pump_id",
    "nozzle_id",
    "product",
    "volume",
    "amount",
    "unit_price",
    "source",
];

fn number_field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// 写入任意 Writer
pub fn write_records<W: Write>(writer: W, records: &[TransactionRecord]) -> RepositoryResult<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(EXPORT_COLUMNS)?;

    for record in records {
        csv_writer.write_record([
            record.date_text(),
            record.time_text(),
            record.branch.clone(),
            record.pump_id.clone(),
            record.nozzle_id.clone(),
            record.product.clone(),
            number_field(record.volume),
            number_field(record.amount),
            number_field(record.unit_price),
            record.source.clone(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(records.len())
}

/// 导出到文件（覆盖写）
pub fn export_csv<P: AsRef<Path>>(path: P, records: &[TransactionRecord]) -> RepositoryResult<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let written = write_records(file, records)?;
    info!(file = %path.display(), rows = written, "CSV 导出完成");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn test_write_records_fixed_columns() {
        let record = TransactionRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            time: NaiveTime::from_hms_opt(10, 15, 5).unwrap(),
            branch: "Posta Cepia".to_string(),
            pump_id: "3".to_string(),
            nozzle_id: "b".to_string(),
            product: "SUPER".to_string(),
            volume: Some(12.5),
            amount: Some(1250.0),
            unit_price: None,
            source: "cepia/despachos.csv".to_string(),
            row_number: 3,
        };

        let mut buffer = Vec::new();
        let written = write_records(&mut buffer, &[record]).unwrap();
        assert_eq!(written, 1);

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "date,time,branch,pump_id,nozzle_id,product,volume,amount,unit_price,source"
        );
        assert_eq!(
            lines[1],
            "2024-01-05,10:15:05,Posta Cepia,3,b,SUPER,12.5,1250,,cepia/despachos.csv"
        );
    }
}
