// ==========================================
// 加油机交易归集系统 - 交易 Repository 实现
// ==========================================
// 职责: despachos / ingest_run 读写（使用 rusqlite）
// 写入: 单事务；replace = DELETE + INSERT（整体写入，不去重）
//       append = 对运行前已有行按去重键查找，命中则跳过
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::transaction::{hhmmss, TransactionRecord};
use crate::domain::types::PersistPolicy;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::transaction_repo::{
    BranchFilter, IngestRunRecord, PersistOutcome, TransactionQuery, TransactionRepository,
};
use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row, Transaction};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SELECT_COLUMNS: &str =
    "fecha, hora, sucursal, pico, manguera, producto, volumen, importe, ppu, origen";

// ==========================================
// TransactionRepositoryImpl
// ==========================================
pub struct TransactionRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl TransactionRepositoryImpl {
    /// 打开数据库并确保表结构存在
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(format!("{}: {}", db_path, e)))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            ensure_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(format!("锁获取失败: {}", e)))
    }

    /// 在事务中批量插入
    ///
    /// # 参数
    /// - existing_until: append 时为运行前的最大 rowid，只与这些行比较去重键；
    ///   replace 时为 None，全部写入
    fn insert_records_tx(
        tx: &Transaction,
        records: &[TransactionRecord],
        existing_until: Option<i64>,
    ) -> RepositoryResult<PersistOutcome> {
        let mut insert = tx.prepare(
            r#"
            INSERT INTO despachos (
                fecha, hora, sucursal, pico, manguera, producto,
                volumen, importe, ppu, origen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )?;
        // 去重键: 日期、时间、站点、枪号、油嘴、产品、金额、体积（NULL 视为相等）
        let mut exists = tx.prepare(
            r#"
            SELECT 1 FROM despachos
            WHERE fecha = ?1 AND hora = ?2 AND sucursal = ?3 AND pico = ?4
              AND manguera = ?5 AND producto = ?6
              AND importe IS ?7 AND volumen IS ?8
              AND rowid <= ?9
            LIMIT 1
            "#,
        )?;

        let mut outcome = PersistOutcome::default();
        for record in records {
            if let Some(max_rowid) = existing_until {
                let duplicate = exists.exists(params![
                    record.date_text(),
                    record.time_text(),
                    record.branch,
                    record.pump_id,
                    record.nozzle_id,
                    record.product,
                    record.amount,
                    record.volume,
                    max_rowid,
                ])?;
                if duplicate {
                    outcome.duplicates_skipped += 1;
                    continue;
                }
            }

            outcome.inserted += insert.execute(params![
                record.date_text(),
                record.time_text(),
                record.branch,
                record.pump_id,
                record.nozzle_id,
                record.product,
                record.volume,
                record.amount,
                record.unit_price,
                record.source,
            ])?;
        }
        Ok(outcome)
    }

    fn insert_run_tx(tx: &Transaction, run: &IngestRunRecord) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT OR REPLACE INTO ingest_run (
                run_id, policy, state, files, skipped_files, records,
                persisted, duplicates_skipped, report_json, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                run.run_id,
                run.policy.to_string(),
                run.state,
                run.files as i64,
                run.skipped_files as i64,
                run.records as i64,
                run.persisted as i64,
                run.duplicates_skipped as i64,
                run.report_json,
                run.finished_at,
            ],
        )?;
        Ok(())
    }

    /// 写入结果回填到运行记录
    fn finalize_run(run: &IngestRunRecord, outcome: &PersistOutcome) -> IngestRunRecord {
        let mut run = run.clone();
        run.persisted = outcome.inserted;
        run.duplicates_skipped = outcome.duplicates_skipped;
        run
    }

    fn map_record(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
        let hora: String = row.get(1)?;
        let time = hhmmss::parse(&hora)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

        Ok(TransactionRecord {
            date: row.get(0)?,
            time,
            branch: row.get(2)?,
            pump_id: row.get(3)?,
            nozzle_id: row.get(4)?,
            product: row.get(5)?,
            volume: row.get(6)?,
            amount: row.get(7)?,
            unit_price: row.get(8)?,
            source: row.get(9)?,
            row_number: 0,
        })
    }

    fn map_run(row: &Row<'_>) -> rusqlite::Result<IngestRunRecord> {
        let policy: String = row.get(1)?;
        let policy = policy.parse::<PersistPolicy>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into())
        })?;

        Ok(IngestRunRecord {
            run_id: row.get(0)?,
            policy,
            state: row.get(2)?,
            files: row.get::<_, i64>(3)? as usize,
            skipped_files: row.get::<_, i64>(4)? as usize,
            records: row.get::<_, i64>(5)? as usize,
            persisted: row.get::<_, i64>(6)? as usize,
            duplicates_skipped: row.get::<_, i64>(7)? as usize,
            report_json: row.get(8)?,
            finished_at: row.get(9)?,
        })
    }
}

/// LIKE 前缀转义
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// IN 子句占位符
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// 构建 WHERE 子句与参数
pub(crate) fn build_filter(query: &TransactionQuery) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    match &query.branch {
        Some(BranchFilter::Exact(branch)) => {
            clauses.push("sucursal = ?".to_string());
            values.push(Value::Text(branch.clone()));
        }
        Some(BranchFilter::Prefix(prefix)) => {
            clauses.push("sucursal LIKE ? ESCAPE '\\'".to_string());
            values.push(Value::Text(escape_like(prefix)));
        }
        None => {}
    }

    if !query.products.is_empty() {
        clauses.push(format!("producto IN ({})", placeholders(query.products.len())));
        values.extend(query.products.iter().cloned().map(Value::Text));
    }

    if let Some(from) = query.date_from {
        clauses.push("fecha >= ?".to_string());
        values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }

    if let Some(to) = query.date_to {
        clauses.push("fecha <= ?".to_string());
        values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
    }

    if !query.pumps.is_empty() {
        clauses.push(format!("pico IN ({})", placeholders(query.pumps.len())));
        values.extend(query.pumps.iter().cloned().map(Value::Text));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (where_clause, values)
}

#[async_trait]
impl TransactionRepository for TransactionRepositoryImpl {
    async fn replace_all(
        &self,
        records: Vec<TransactionRecord>,
        run: IngestRunRecord,
    ) -> RepositoryResult<PersistOutcome> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let removed = tx.execute("DELETE FROM despachos", [])?;
        let mut outcome = Self::insert_records_tx(&tx, &records, None)?;
        outcome.removed = removed;
        Self::insert_run_tx(&tx, &Self::finalize_run(&run, &outcome))?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(
            run_id = %run.run_id,
            removed = outcome.removed,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates_skipped,
            "语料整体替换完成"
        );
        Ok(outcome)
    }

    async fn append(
        &self,
        records: Vec<TransactionRecord>,
        run: IngestRunRecord,
    ) -> RepositoryResult<PersistOutcome> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let max_rowid: i64 =
            tx.query_row("SELECT IFNULL(MAX(rowid), 0) FROM despachos", [], |row| row.get(0))?;
        let outcome = Self::insert_records_tx(&tx, &records, Some(max_rowid))?;
        Self::insert_run_tx(&tx, &Self::finalize_run(&run, &outcome))?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(
            run_id = %run.run_id,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates_skipped,
            "语料追加完成"
        );
        Ok(outcome)
    }

    async fn query(&self, query: &TransactionQuery) -> RepositoryResult<Vec<TransactionRecord>> {
        let (where_clause, mut values) = build_filter(query);

        let mut sql = format!(
            "SELECT {} FROM despachos{} ORDER BY fecha, hora, rowid",
            SELECT_COLUMNS, where_clause
        );
        if query.limit.is_some() || query.offset.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            values.push(Value::Integer(query.limit.map(|l| l as i64).unwrap_or(-1)));
            values.push(Value::Integer(query.offset.unwrap_or(0) as i64));
        }
        debug!(sql = %sql, params = values.len(), "查询交易记录");

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), Self::map_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM despachos", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn list_runs(&self, limit: usize) -> RepositoryResult<Vec<IngestRunRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT run_id, policy, state, files, skipped_files, records,
                   persisted, duplicates_skipped, report_json, finished_at
            FROM ingest_run
            ORDER BY finished_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )?;
        let runs = stmt
            .query_map([limit as i64], Self::map_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn record(day: u32, hour: u32, branch: &str, pump: &str, product: &str, amount: f64) -> TransactionRecord {
        TransactionRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            branch: branch.to_string(),
            pump_id: pump.to_string(),
            nozzle_id: "a".to_string(),
            product: product.to_string(),
            volume: Some(10.0),
            amount: Some(amount),
            unit_price: Some(amount / 10.0),
            source: "test.csv".to_string(),
            row_number: 1,
        }
    }

    fn run(run_id: &str, policy: PersistPolicy) -> IngestRunRecord {
        IngestRunRecord {
            run_id: run_id.to_string(),
            policy,
            state: "PERSISTED".to_string(),
            files: 1,
            skipped_files: 0,
            records: 0,
            persisted: 0,
            duplicates_skipped: 0,
            report_json: "{}".to_string(),
            finished_at: format!("2024-01-01T00:00:0{}", run_id.len() % 10),
        }
    }

    fn repo() -> TransactionRepositoryImpl {
        let conn = Connection::open_in_memory().unwrap();
        TransactionRepositoryImpl::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_replace_then_query_order() {
        let repo = repo();
        let records = vec![
            record(6, 9, "Posta Cepia", "2", "SUPER", 500.0),
            record(5, 10, "Petrol", "1", "GNC", 100.0),
            record(5, 8, "Posta Hersu", "3", "DIESEL", 300.0),
        ];
        let outcome = repo
            .replace_all(records, run("r1", PersistPolicy::Replace))
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 3);

        let all = repo.query(&TransactionQuery::default()).await.unwrap();
        let order: Vec<(u32, String)> = all
            .iter()
            .map(|r| (chrono::Datelike::day(&r.date), r.time_text()))
            .collect();
        assert_eq!(
            order,
            vec![
                (5, "08:00:00".to_string()),
                (5, "10:00:00".to_string()),
                (6, "09:00:00".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_filters() {
        let repo = repo();
        repo.replace_all(
            vec![
                record(5, 10, "Petrol", "1", "GNC", 100.0),
                record(6, 9, "Posta Cepia", "2", "SUPER", 500.0),
                record(7, 8, "Posta Hersu", "3", "DIESEL", 300.0),
            ],
            run("r1", PersistPolicy::Replace),
        )
        .await
        .unwrap();

        let posta = repo
            .query(&TransactionQuery {
                branch: Some(BranchFilter::Prefix("Posta".to_string())),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(posta.len(), 2);

        let ranged = repo
            .query(&TransactionQuery {
                date_from: NaiveDate::from_ymd_opt(2024, 1, 6),
                date_to: NaiveDate::from_ymd_opt(2024, 1, 7),
                products: vec!["SUPER".to_string(), "GNC".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].branch, "Posta Cepia");

        let pumps = repo
            .query(&TransactionQuery {
                pumps: vec!["1".to_string(), "3".to_string()],
                branch: Some(BranchFilter::Exact("Petrol".to_string())),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pumps.len(), 1);
    }

    #[tokio::test]
    async fn test_append_twice_inserts_nothing_second_time() {
        let repo = repo();
        let records = vec![
            record(5, 10, "Petrol", "1", "GNC", 100.0),
            record(5, 11, "Petrol", "1", "GNC", 100.0),
        ];

        let first = repo
            .append(records.clone(), run("r1", PersistPolicy::Append))
            .await
            .unwrap();
        assert_eq!(first.inserted, 2);

        let second = repo
            .append(records, run("r22", PersistPolicy::Append))
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates_skipped, 2);
        assert_eq!(repo.count().await.unwrap(), 2);

        let runs = repo.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "r22");
        assert_eq!(runs[0].duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn test_replace_removes_previous_corpus() {
        let repo = repo();
        repo.append(
            vec![record(5, 10, "Petrol", "1", "GNC", 100.0)],
            run("r1", PersistPolicy::Append),
        )
        .await
        .unwrap();

        let outcome = repo
            .replace_all(
                vec![record(8, 10, "Petrol", "1", "GNC", 200.0)],
                run("r22", PersistPolicy::Replace),
            )
            .await
            .unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    fn dispatch(time: (u32, u32, u32), nozzle: &str) -> TransactionRecord {
        TransactionRecord {
            time: NaiveTime::from_hms_opt(time.0, time.1, time.2).unwrap(),
            nozzle_id: nozzle.to_string(),
            volume: Some(10.0),
            amount: Some(5000.0),
            unit_price: Some(500.0),
            ..record(5, 10, "Petrol", "3", "GNC", 5000.0)
        }
    }

    #[tokio::test]
    async fn test_replace_keeps_same_minute_dispatches() {
        let repo = repo();
        let records = vec![
            dispatch((10, 15, 5), "a"),
            dispatch((10, 15, 5), "b"),
            dispatch((10, 15, 40), "a"),
            dispatch((10, 15, 40), "a"),
        ];

        let outcome = repo
            .replace_all(records, run("r1", PersistPolicy::Replace))
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 4);
        assert_eq!(outcome.duplicates_skipped, 0);
        assert_eq!(repo.count().await.unwrap(), 4);

        let times: Vec<String> = repo
            .query(&TransactionQuery::default())
            .await
            .unwrap()
            .iter()
            .map(|r| format!("{} {}", r.time_text(), r.nozzle_id))
            .collect();
        assert_eq!(
            times,
            vec!["10:15:05 a", "10:15:05 b", "10:15:40 a", "10:15:40 a"]
        );
    }

    #[tokio::test]
    async fn test_append_dedups_only_against_existing_rows() {
        let repo = repo();
        repo.append(
            vec![dispatch((10, 15, 5), "a")],
            run("r1", PersistPolicy::Append),
        )
        .await
        .unwrap();

        let outcome = repo
            .append(
                vec![
                    dispatch((10, 15, 5), "a"),
                    dispatch((10, 15, 5), "b"),
                    dispatch((10, 15, 6), "a"),
                    dispatch((10, 15, 6), "a"),
                ],
                run("r22", PersistPolicy::Append),
            )
            .await
            .unwrap();
        assert_eq!(outcome.duplicates_skipped, 1);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(repo.count().await.unwrap(), 4);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("Posta"), "Posta%");
        assert_eq!(escape_like("50%_x"), "50\\%\\_x%");
    }
}
