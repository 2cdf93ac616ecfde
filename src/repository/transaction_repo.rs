// ==========================================
// 加油机交易归集系统 - 交易 Repository Trait
// ==========================================
// 职责: 定义标准交易表的数据访问接口（不包含业务逻辑）
// 红线: Repository 不含业务规则，只做数据读写
// ==========================================

use crate::domain::transaction::TransactionRecord;
use crate::domain::types::PersistPolicy;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// 查询参数（每次请求独立，不保存任何会话状态）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum BranchFilter {
    Exact(String),
    Prefix(String), // 如 "Posta" 匹配所有 Posta 站点
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionQuery {
    pub branch: Option<BranchFilter>,
    pub products: Vec<String>,
    pub date_from: Option<NaiveDate>, // 含
    pub date_to: Option<NaiveDate>,   // 含
    pub pumps: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// ==========================================
// 写入结果 / 运行溯源
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub duplicates_skipped: usize,
    pub removed: usize, // replace 策略删除的旧记录数
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRunRecord {
    pub run_id: String,
    pub policy: PersistPolicy,
    pub state: String,
    pub files: usize,
    pub skipped_files: usize,
    pub records: usize,
    pub persisted: usize,
    pub duplicates_skipped: usize,
    pub report_json: String,
    pub finished_at: String,
}

// ==========================================
// TransactionRepository Trait
// ==========================================
// 用途: 标准交易表（despachos）读写
// 实现者: TransactionRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    // ===== 整体写入（单事务）=====

    /// 整体替换语料（DELETE + INSERT，同一事务）
    ///
    /// # 参数
    /// - records: 已排序的合并语料
    /// - run: 本次运行溯源（同一事务内写入）
    ///
    /// # 返回
    /// - Ok(PersistOutcome): 写入/去重/删除计数
    /// - Err: 数据库错误（整个事务回滚）
    async fn replace_all(
        &self,
        records: Vec<TransactionRecord>,
        run: IngestRunRecord,
    ) -> RepositoryResult<PersistOutcome>;

    /// 追加（与运行前已有行按去重键比较，命中则跳过；本批内部不去重）
    async fn append(
        &self,
        records: Vec<TransactionRecord>,
        run: IngestRunRecord,
    ) -> RepositoryResult<PersistOutcome>;

    /// 按策略写入
    async fn persist(
        &self,
        policy: PersistPolicy,
        records: Vec<TransactionRecord>,
        run: IngestRunRecord,
    ) -> RepositoryResult<PersistOutcome> {
        match policy {
            PersistPolicy::Replace => self.replace_all(records, run).await,
            PersistPolicy::Append => self.append(records, run).await,
        }
    }

    // ===== 查询 =====

    /// 按条件查询，按 日期 → 时间 → 插入顺序 排序
    async fn query(&self, query: &TransactionQuery) -> RepositoryResult<Vec<TransactionRecord>>;

    /// 记录总数
    async fn count(&self) -> RepositoryResult<usize>;

    /// 最近的运行记录（新 → 旧）
    async fn list_runs(&self, limit: usize) -> RepositoryResult<Vec<IngestRunRecord>>;
}
