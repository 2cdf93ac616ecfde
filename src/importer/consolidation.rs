// ==========================================
// 加油机交易归集系统 - 语料合并与落库
// ==========================================
// 职责: 合并各文件结果 → 稳定排序 → 单事务落库 → 可选 CSV 导出
// 排序键: (日期, 时间, 站点, 来源, 行号)，文件按发现顺序拼接
// 红线: 只有一个写入者，且在所有文件结果收齐之后
// ==========================================

use crate::domain::transaction::{FileReport, RunReport, TransactionRecord};
use crate::domain::types::PersistPolicy;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::csv_export::export_csv;
use crate::repository::transaction_repo::{
    IngestRunRecord, PersistOutcome, TransactionQuery, TransactionRepository,
};
use chrono::{SecondsFormat, Utc};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ==========================================
// FileOutcome - 单文件处理结果
// ==========================================
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub report: FileReport,
    pub records: Vec<TransactionRecord>,
}

impl FileOutcome {
    pub fn skipped(report: FileReport) -> Self {
        Self {
            report,
            records: Vec::new(),
        }
    }
}

// ==========================================
// CommitOutcome - 落库 + 导出结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub persist: PersistOutcome,
    /// 导出行数（未配置导出或导出失败时为 None）
    pub exported: Option<usize>,
    pub export_error: Option<String>,
}

/// 语料排序比较
pub fn corpus_order(a: &TransactionRecord, b: &TransactionRecord) -> Ordering {
    a.date
        .cmp(&b.date)
        .then_with(|| a.time.cmp(&b.time))
        .then_with(|| a.branch.cmp(&b.branch))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.row_number.cmp(&b.row_number))
}

/// 合并（outcomes 须按发现顺序排列）
pub fn merge_outcomes(outcomes: Vec<FileOutcome>) -> (Vec<FileReport>, Vec<TransactionRecord>) {
    let mut reports = Vec::with_capacity(outcomes.len());
    let mut records = Vec::new();
    for outcome in outcomes {
        reports.push(outcome.report);
        records.extend(outcome.records);
    }

    // sort_by 为稳定排序
    records.sort_by(corpus_order);
    (reports, records)
}

/// 由运行报告生成溯源记录（写入前快照）
pub fn build_run_record(report: &RunReport) -> ImportResult<IngestRunRecord> {
    Ok(IngestRunRecord {
        run_id: report.run_id.clone(),
        policy: report.policy,
        state: report.state.to_string(),
        files: report.files.len(),
        skipped_files: report.skipped_files(),
        records: report.total_records,
        persisted: report.persisted,
        duplicates_skipped: report.duplicates_skipped,
        report_json: serde_json::to_string(report)?,
        finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

// ==========================================
// ConsolidationStore
// ==========================================
pub struct ConsolidationStore {
    repo: Arc<dyn TransactionRepository>,
    export_path: Option<PathBuf>,
}

impl ConsolidationStore {
    pub fn new(repo: Arc<dyn TransactionRepository>, export_path: Option<PathBuf>) -> Self {
        Self { repo, export_path }
    }

    pub fn repository(&self) -> Arc<dyn TransactionRepository> {
        Arc::clone(&self.repo)
    }

    /// 单次最终写入 + 导出
    ///
    /// # 参数
    /// - records: 已合并排序的语料
    /// - run: 运行溯源（与语料同一事务写入）
    ///
    /// # 返回
    /// 写入失败返回 Err；写入已提交后导出失败只记录在 export_error 中
    pub async fn commit(
        &self,
        policy: PersistPolicy,
        records: Vec<TransactionRecord>,
        run: IngestRunRecord,
    ) -> ImportResult<CommitOutcome> {
        let count = records.len();
        debug!(policy = %policy, records = count, "开始落库");

        let outcome = self.repo.persist(policy, records, run).await?;
        info!(
            policy = %policy,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates_skipped,
            removed = outcome.removed,
            "语料写入完成"
        );

        let mut committed = CommitOutcome {
            persist: outcome,
            ..Default::default()
        };
        if let Some(path) = &self.export_path {
            match self.export(path.clone()).await {
                Ok(written) => committed.exported = Some(written),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "CSV 导出失败，已提交的写入保留");
                    committed.export_error = Some(e.to_string());
                }
            }
        }
        Ok(committed)
    }

    /// 导出整表（按查询顺序）
    async fn export(&self, path: PathBuf) -> ImportResult<usize> {
        let corpus = self.repo.query(&TransactionQuery::default()).await?;
        let written = tokio::task::spawn_blocking(move || export_csv(&path, &corpus))
            .await
            .map_err(|e| ImportError::InternalError(format!("导出任务异常: {}", e)))??;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::RunState;
    use crate::repository::transaction_repo_impl::TransactionRepositoryImpl;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(day: u32, hour: u32, branch: &str, source: &str, row: usize) -> TransactionRecord {
        TransactionRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            branch: branch.to_string(),
            pump_id: "1".to_string(),
            nozzle_id: "a".to_string(),
            product: "SUPER".to_string(),
            volume: Some(10.0 + row as f64),
            amount: Some(100.0),
            unit_price: None,
            source: source.to_string(),
            row_number: row,
        }
    }

    fn report(run_id: &str, records: usize) -> RunReport {
        RunReport {
            run_id: run_id.to_string(),
            state: RunState::Consolidating,
            policy: PersistPolicy::Replace,
            files: vec![FileReport::empty("a.csv".to_string(), "petrol".to_string())],
            total_records: records,
            persisted: 0,
            duplicates_skipped: 0,
            cancelled: false,
            by_product: BTreeMap::new(),
            elapsed_ms: 0,
            export_error: None,
        }
    }

    #[test]
    fn test_merge_sorts_by_corpus_key() {
        let first = FileOutcome {
            report: FileReport::empty("b.csv".to_string(), "petrol".to_string()),
            records: vec![record(2, 8, "Petrol", "b.csv", 3), record(1, 9, "Petrol", "b.csv", 2)],
        };
        let second = FileOutcome {
            report: FileReport::empty("a.csv".to_string(), "cepia".to_string()),
            records: vec![
                record(1, 9, "Petrol", "a.csv", 7),
                record(1, 9, "Cepia", "a.csv", 5),
            ],
        };

        let (reports, merged) = merge_outcomes(vec![first, second]);
        assert_eq!(reports[0].source, "b.csv");

        let keys: Vec<(u32, &str, &str)> = merged
            .iter()
            .map(|r| (chrono::Datelike::day(&r.date), r.branch.as_str(), r.source.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, "Cepia", "a.csv"),
                (1, "Petrol", "a.csv"),
                (1, "Petrol", "b.csv"),
                (2, "Petrol", "b.csv"),
            ]
        );
    }

    #[test]
    fn test_run_record_snapshot() {
        let run = build_run_record(&report("run-1", 4)).unwrap();
        assert_eq!(run.run_id, "run-1");
        assert_eq!(run.state, "CONSOLIDATING");
        assert_eq!(run.records, 4);
        assert!(run.report_json.contains("\"run_id\":\"run-1\""));
    }

    #[tokio::test]
    async fn test_commit_writes_export() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("fuel.db");
        let export_path = dir.path().join("out/corpus.csv");

        let repo = TransactionRepositoryImpl::new(db_path.to_str().unwrap()).unwrap();
        let store = ConsolidationStore::new(Arc::new(repo), Some(export_path.clone()));

        let records = vec![record(1, 8, "Petrol", "a.csv", 1), record(1, 9, "Petrol", "a.csv", 2)];
        let run = build_run_record(&report("run-1", 2)).unwrap();
        let outcome = store
            .commit(PersistPolicy::Replace, records, run)
            .await
            .unwrap();
        assert_eq!(outcome.persist.inserted, 2);
        assert_eq!(outcome.exported, Some(2));
        assert!(outcome.export_error.is_none());

        let text = std::fs::read_to_string(&export_path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().starts_with("2024-01-01,08:00:00,Petrol"));
    }

    #[tokio::test]
    async fn test_export_failure_keeps_committed_write() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("fuel.db");
        // 导出目录位置被普通文件占用
        let blocker = dir.path().join("out");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let export_path = blocker.join("corpus.csv");

        let repo = Arc::new(TransactionRepositoryImpl::new(db_path.to_str().unwrap()).unwrap());
        let store = ConsolidationStore::new(repo.clone(), Some(export_path.clone()));

        let records = vec![record(1, 8, "Petrol", "a.csv", 1)];
        let run = build_run_record(&report("run-1", 1)).unwrap();
        let outcome = store
            .commit(PersistPolicy::Replace, records, run)
            .await
            .unwrap();

        assert_eq!(outcome.persist.inserted, 1);
        assert_eq!(outcome.exported, None);
        assert!(outcome.export_error.is_some());
        assert!(!export_path.exists());
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.list_runs(5).await.unwrap().len(), 1);
    }
}
