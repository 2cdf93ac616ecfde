// ==========================================
// 加油机交易归集系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含导入逻辑
// ==========================================

pub mod transaction;
pub mod types;

// 重导出核心类型
pub use transaction::{
    summarize_by_product, DropReason, FileReport, FileSkip, ProductSummary, RawFile, RawGrid,
    RawRow, RowDrop, RunReport, TransactionRecord, DEFAULT_NOZZLE_ID, DEFAULT_PUMP_ID,
};
pub use types::{CanonicalColumn, FileStage, FormatFamily, PersistPolicy, RunState};
