// ==========================================
// 加油机交易归集系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 致命范围: 仅限单个文件，不中断整次运行
// ==========================================

use crate::domain::types::FileStage;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xml/.xls/.xlsx/.xlsm/.xlsb/.ods/.csv/.txt/.tsv）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadFailure(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("XML 表格解析失败: {0}")]
    XmlParseError(String),

    // ===== 结构识别 =====
    #[error("未找到表头 (扫描 {scanned} 行)，回退到第 {fallback} 行")]
    HeaderNotFound { scanned: usize, fallback: usize },

    // ===== 值解析（非致命，字段置空） =====
    #[error("数值解析失败 (行 {row}, 字段 {field}): {value}")]
    NumericParseFailure {
        row: usize,
        field: String,
        value: String,
    },

    #[error("日期解析失败 (行 {row}): {value}")]
    DateParseFailure { row: usize, value: String },

    #[error("行数据不完整 (行 {row}): {message}")]
    IncompleteRow { row: usize, message: String },

    // ===== 配置错误 =====
    #[error("配置读取失败 (path: {path}): {message}")]
    ConfigReadError { path: String, message: String },

    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    ConfigValueError {
        key: String,
        value: String,
        message: String,
    },

    #[error("来源匹配模式无效 ({pattern}): {message}")]
    InvalidSourcePattern { pattern: String, message: String },

    // ===== 运行控制 =====
    #[error("文件处理被跳过 [{stage}]: {reason}")]
    FileSkipped { stage: FileStage, reason: String },

    #[error("运行已取消")]
    Cancelled,

    // ===== 落库 =====
    #[error("落库失败: {0}")]
    PersistFailure(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 是否为值级别的非致命错误（记录后继续）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ImportError::HeaderNotFound { .. }
                | ImportError::NumericParseFailure { .. }
                | ImportError::DateParseFailure { .. }
                | ImportError::IncompleteRow { .. }
        )
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadFailure(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

// 实现 From<quick_xml::Error>
impl From<quick_xml::Error> for ImportError {
    fn from(err: quick_xml::Error) -> Self {
        ImportError::XmlParseError(err.to_string())
    }
}

// 实现 From<serde_json::Error>
impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::ConfigValueError {
            key: "<json>".to_string(),
            value: format!("line {}, column {}", err.line(), err.column()),
            message: err.to_string(),
        }
    }
}

// 实现 From<RepositoryError>
impl From<crate::repository::error::RepositoryError> for ImportError {
    fn from(err: crate::repository::error::RepositoryError) -> Self {
        ImportError::PersistFailure(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
