// ==========================================
// 加油机交易归集系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 批处理归集（静态文件集，一次运行到终态）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 多格式归集管道
pub mod importer;

// 配置层 - 运行配置与厂商版式
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{CanonicalColumn, FileStage, FormatFamily, PersistPolicy, RunState};

// 领域实体
pub use domain::{RawFile, RawGrid, RawRow, RunReport, TransactionRecord};

// 配置
pub use config::{ColumnMappingProfile, IngestConfig, LayoutStrategy, ProfileRegistry};

// 管道
pub use importer::{DispatchIngestor, ImportError, ImportResult, IngestPipeline};

// 仓储
pub use repository::{TransactionQuery, TransactionRepository, TransactionRepositoryImpl};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "加油机交易归集系统";
