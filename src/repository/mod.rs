// ==========================================
// 加油机交易归集系统 - 数据仓储层
// ==========================================
// 职责: 标准交易表读写 + 运行溯源 + CSV 导出
// 红线: Repository 不含业务规则，只做数据读写
// ==========================================

pub mod csv_export;
pub mod error;
pub mod transaction_repo;
pub mod transaction_repo_impl;

// 重导出核心类型
pub use csv_export::{export_csv, write_records, EXPORT_COLUMNS};
pub use error::{RepositoryError, RepositoryResult};
pub use transaction_repo::{
    BranchFilter, IngestRunRecord, PersistOutcome, TransactionQuery, TransactionRepository,
};
pub use transaction_repo_impl::TransactionRepositoryImpl;
