// ==========================================
// 加油机交易归集系统 - 导入管道 Trait
// ==========================================
// 职责: 定义各阶段接口（不包含实现）
// 阶段: 读取网格 → 定位表头 → 列分类 → 值标准化 → 记录组装
// ==========================================

use crate::config::profile::LayoutStrategy;
use crate::domain::transaction::{RawFile, RawGrid, RawRow, RunReport};
use crate::domain::types::FormatFamily;
use crate::importer::column_classifier::ColumnMapping;
use crate::importer::error::ImportResult;
use crate::importer::header_locator::HeaderLocation;
use crate::importer::product_mapper::ProductMapper;
use crate::importer::record_assembler::AssemblyOutcome;
use crate::importer::source_catalog::DiscoveredFile;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use std::path::Path;

// ==========================================
// DispatchIngestor Trait
// ==========================================
// 用途: 归集运行主接口
// 实现者: IngestPipeline
#[async_trait]
pub trait DispatchIngestor: Send + Sync {
    /// 按配置发现来源文件并执行一次完整运行
    ///
    /// # 返回
    /// - Ok(RunReport): 终态为 PERSISTED 或 ABORTED
    /// - Err: 来源发现失败、落库失败
    async fn run(&self) -> ImportResult<RunReport>;

    /// 对给定文件集执行一次完整运行（跳过发现阶段）
    ///
    /// # 参数
    /// - files: 按发现顺序排列的源文件
    async fn run_files(&self, files: Vec<DiscoveredFile>) -> ImportResult<RunReport>;
}

// ==========================================
// GridReader Trait
// ==========================================
// 用途: 将单个文件读取为原始网格
// 实现者: CsvGridReader / ExcelGridReader / XmlSpreadsheetReader
pub trait GridReader: Send + Sync {
    fn family(&self) -> FormatFamily;

    /// 读取网格
    ///
    /// # 错误
    /// - FileNotFound / FileReadFailure: 文件不可读或已损坏
    fn read_grid(&self, path: &Path) -> ImportResult<RawGrid>;
}

// ==========================================
// HeaderLocator Trait
// ==========================================
pub trait HeaderLocator: Send + Sync {
    /// 定位表头行（从不失败，未命中时回退到第 0 行）
    fn locate(&self, grid: &RawGrid, strategy: &LayoutStrategy<'_>) -> HeaderLocation;

    /// 数据区: 表头之后、去掉页脚/分节行与尾部空行
    ///
    /// # 返回
    /// - (网格行索引, 行)，索引从 0 开始
    fn data_rows<'g>(
        &self,
        grid: &'g RawGrid,
        location: &HeaderLocation,
        strategy: &LayoutStrategy<'_>,
    ) -> Vec<(usize, &'g RawRow)>;
}

// ==========================================
// ColumnClassifier Trait
// ==========================================
pub trait ColumnClassifier: Send + Sync {
    /// 将列映射到标准列
    ///
    /// # 参数
    /// - labels: 每列的原始列名（空列名为 None）
    /// - rows: 数据区样本（用于按内容识别）
    fn classify(
        &self,
        labels: &[Option<String>],
        rows: &[(usize, &RawRow)],
        strategy: &LayoutStrategy<'_>,
    ) -> ColumnMapping;
}

// ==========================================
// ValueNormalizer Trait
// ==========================================
pub trait ValueNormalizer: Send + Sync {
    /// 区域格式数值；失败返回 None
    fn parse_numeric(&self, raw: &str) -> Option<f64>;

    /// 日期（+可选时间）；已应用年份覆盖
    fn parse_date_time(&self, raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)>;

    fn parse_time(&self, raw: &str) -> Option<NaiveTime>;

    /// 组合枪号 → (枪号, 油嘴)
    fn parse_pump_nozzle(&self, raw: &str) -> Option<(String, String)>;

    fn parse_nozzle(&self, raw: &str) -> Option<String>;

    /// 文件名月份回退日期（当月 1 日）
    fn fallback_date(&self, file_name: &str, default_year: i32) -> Option<NaiveDate>;
}

// ==========================================
// RecordAssembler Trait
// ==========================================
pub trait RecordAssembler: Send + Sync {
    /// 组装标准记录并执行丢弃/缺省策略
    ///
    /// # 参数
    /// - file: 源文件（提供站点与溯源）
    /// - fallback_date: 无日期列时的来源级回退日期
    fn assemble(
        &self,
        file: &RawFile,
        rows: &[(usize, &RawRow)],
        mapping: &ColumnMapping,
        normalizer: &dyn ValueNormalizer,
        products: &ProductMapper,
        fallback_date: Option<NaiveDate>,
    ) -> AssemblyOutcome;
}
