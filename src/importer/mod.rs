// ==========================================
// 加油机交易归集系统 - 导入层
// ==========================================
// 职责: 多格式加油机导出文件 → 标准交易记录
// 支持: SpreadsheetML(XML), Excel(xls/xlsx/ods), 分隔文本(csv/txt/tsv)
// ==========================================

// 模块声明
pub mod column_classifier;
pub mod consolidation;
pub mod error;
pub mod file_parser;
pub mod format_detector;
pub mod header_locator;
pub mod ingest_trait;
pub mod pipeline;
pub mod product_mapper;
pub mod record_assembler;
pub mod source_catalog;
pub mod value_normalizer;

// 重导出核心类型
pub use column_classifier::{
    ClassifyMethod, ColumnAssignment, ColumnClassifier as ColumnClassifierImpl, ColumnMapping,
};
pub use consolidation::{CommitOutcome, ConsolidationStore, FileOutcome};
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvGridReader, ExcelGridReader, UniversalGridReader, XmlSpreadsheetReader};
pub use format_detector::FormatDetector;
pub use header_locator::{HeaderLocation, HeaderLocator as HeaderLocatorImpl, LocateStrategy};
pub use pipeline::{FileProcessor, IngestPipeline, InspectReport};
pub use product_mapper::ProductMapper;
pub use record_assembler::{AssemblyOutcome, RecordAssembler as RecordAssemblerImpl};
pub use source_catalog::{DiscoveredFile, SourceCatalog};
pub use value_normalizer::ValueNormalizer as ValueNormalizerImpl;

// 重导出 Trait 接口
pub use ingest_trait::{
    ColumnClassifier, DispatchIngestor, GridReader, HeaderLocator, RecordAssembler,
    ValueNormalizer,
};
