// ==========================================
// 加油机交易归集系统 - 配置层
// ==========================================
// 职责: 运行配置加载 + 厂商版式注册表
// 存储: JSON 配置文件（环境变量可覆盖）
// ==========================================

pub mod ingest_config;
pub mod profile;

// 重导出核心配置类型
pub use ingest_config::{get_default_db_path, IngestConfig, SourceSpec, ENV_DB_PATH, ENV_POLICY};
pub use profile::{ColumnMappingProfile, LayoutStrategy, ProfileRegistry};
