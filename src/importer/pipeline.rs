// ==========================================
// 加油机交易归集系统 - 归集运行管道
// ==========================================
// 流程: 发现 → 逐文件(识别 → 读取 → 定位表头 → 列分类 → 组装) → 合并 → 落库
// 状态: DISCOVERING → PARSING → ASSEMBLING → CONSOLIDATING → PERSISTED / ABORTED
// 并发: 逐文件在阻塞线程池执行，max_workers 限流，结果按发现顺序收集
// ==========================================

use crate::config::ingest_config::IngestConfig;
use crate::config::profile::ProfileRegistry;
use crate::domain::transaction::{
    summarize_by_product, FileReport, FileSkip, RunReport, TransactionRecord,
};
use crate::domain::types::{CanonicalColumn, FileStage, FormatFamily, RunState};
use crate::importer::column_classifier::{ColumnClassifier, ColumnMapping};
use crate::importer::consolidation::{build_run_record, merge_outcomes, ConsolidationStore, FileOutcome};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::UniversalGridReader;
use crate::importer::format_detector::FormatDetector;
use crate::importer::header_locator::{HeaderLocation, HeaderLocator};
use crate::importer::ingest_trait::{
    ColumnClassifier as ColumnClassifierTrait, DispatchIngestor,
    HeaderLocator as HeaderLocatorTrait, RecordAssembler as RecordAssemblerTrait,
    ValueNormalizer as ValueNormalizerTrait,
};
use crate::importer::product_mapper::ProductMapper;
use crate::importer::record_assembler::RecordAssembler;
use crate::importer::source_catalog::{DiscoveredFile, SourceCatalog};
use crate::importer::value_normalizer::ValueNormalizer;
use crate::repository::transaction_repo::TransactionRepository;
use crate::repository::transaction_repo_impl::TransactionRepositoryImpl;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

// ==========================================
// InspectReport - 单文件诊断
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub source: String,
    pub source_tag: String,
    pub format: FormatFamily,
    pub profile: Option<String>,
    pub grid_rows: usize,
    pub header: HeaderLocation,
    pub labels: Vec<Option<String>>,
    pub mapping: ColumnMapping,
    pub data_rows: usize,
}

/// 阶段失败 → 文件跳过
fn at_stage(stage: FileStage) -> impl FnOnce(ImportError) -> ImportError {
    move |err| ImportError::FileSkipped {
        stage,
        reason: err.to_string(),
    }
}

fn skip(stage: FileStage, reason: &str) -> ImportError {
    ImportError::FileSkipped {
        stage,
        reason: reason.to_string(),
    }
}

// ==========================================
// FileProcessor - 单文件处理（无跨文件共享可变状态）
// ==========================================
pub struct FileProcessor {
    locator: Box<dyn HeaderLocatorTrait>,
    classifier: Box<dyn ColumnClassifierTrait>,
    assembler: Box<dyn RecordAssemblerTrait>,
    registry: ProfileRegistry,
    default_product: String,
    default_year: i32,
    product_aliases: BTreeMap<String, String>,
}

impl FileProcessor {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            locator: Box::new(HeaderLocator),
            classifier: Box::new(ColumnClassifier),
            assembler: Box::new(RecordAssembler),
            registry: config.profile_registry(),
            default_product: config.default_product.clone(),
            default_year: config.default_year,
            product_aliases: config.product_aliases.clone(),
        }
    }

    /// 处理单个文件；任何阶段失败只跳过该文件
    pub fn process(&self, file: &DiscoveredFile) -> FileOutcome {
        let mut report = FileReport::empty(file.source_label(), file.source_tag.clone());

        match self.try_process(file, &mut report) {
            Ok(records) => {
                info!(
                    file = %report.source,
                    records = records.len(),
                    dropped = report.dropped_total(),
                    numeric_failures = report.numeric_failures,
                    date_failures = report.date_failures,
                    "文件处理完成"
                );
                FileOutcome { report, records }
            }
            Err(err) => {
                let (stage, reason) = match err {
                    ImportError::FileSkipped { stage, reason } => (stage, reason),
                    other => (FileStage::Assemble, other.to_string()),
                };
                warn!(file = %report.source, stage = %stage, reason = %reason, "文件已跳过");
                report.skipped = Some(FileSkip { stage, reason });
                FileOutcome::skipped(report)
            }
        }
    }

    fn try_process(
        &self,
        file: &DiscoveredFile,
        report: &mut FileReport,
    ) -> ImportResult<Vec<TransactionRecord>> {
        // === 识别 ===
        let format = FormatDetector::detect(&file.path).map_err(at_stage(FileStage::Detect))?;
        report.format = Some(format);
        let raw = file.with_format(format);

        // === 读取 ===
        let grid = UniversalGridReader::reader_for(format)
            .read_grid(&raw.path)
            .map_err(at_stage(FileStage::Read))?;
        if grid.is_empty() {
            return Err(skip(FileStage::Read, "文件不含任何行"));
        }

        // === 定位表头 ===
        let strategy = self.registry.resolve(raw.profile_key());
        let location = self.locator.locate(&grid, &strategy);
        report.header_row = location.header_row;
        report.header_score = Some(location.score);

        let rows = self.locator.data_rows(&grid, &location, &strategy);
        report.data_rows = rows.len();
        if rows.is_empty() {
            return Err(skip(FileStage::LocateHeader, "表头之后没有数据行"));
        }

        // === 列分类 ===
        let labels = location.labels(&grid, strategy.profile());
        let mapping = self.classifier.classify(&labels, &rows, &strategy);
        if !mapping.contains(CanonicalColumn::Volume) && !mapping.contains(CanonicalColumn::Amount) {
            return Err(skip(FileStage::Classify, "未识别到体积或金额列"));
        }
        debug!(file = %report.source, columns = mapping.len(), "列分类完成");

        // === 组装 ===
        let profile = strategy.profile();
        let normalizer = ValueNormalizer::new(profile.and_then(|p| p.year_override));
        let products = ProductMapper::new(self.default_product.clone())
            .with_aliases(&self.product_aliases)
            .with_default_product(profile.and_then(|p| p.default_product.clone()))
            .with_force_product(profile.and_then(|p| p.force_product.clone()));
        let fallback_date = normalizer.fallback_date(&raw.file_name(), self.default_year);

        let outcome = self.assembler.assemble(
            &raw,
            &rows,
            &mapping,
            &normalizer,
            &products,
            fallback_date,
        );
        report.dropped = outcome.drop_counts();
        report.numeric_failures = outcome.numeric_failures;
        report.date_failures = outcome.date_failures;
        report.records = outcome.records.len();
        Ok(outcome.records)
    }

    /// 单文件诊断（不组装、不落库）
    pub fn inspect(&self, file: &DiscoveredFile) -> ImportResult<InspectReport> {
        let format = FormatDetector::detect(&file.path)?;
        let raw = file.with_format(format);
        let grid = UniversalGridReader::reader_for(format).read_grid(&raw.path)?;

        let strategy = self.registry.resolve(raw.profile_key());
        let header = self.locator.locate(&grid, &strategy);
        let rows = self.locator.data_rows(&grid, &header, &strategy);
        let labels = header.labels(&grid, strategy.profile());
        let mapping = self.classifier.classify(&labels, &rows, &strategy);

        Ok(InspectReport {
            source: raw.source_label(),
            source_tag: raw.source_tag.clone(),
            format,
            profile: strategy.profile().map(|_| raw.profile_key().to_string()),
            grid_rows: grid.len(),
            data_rows: rows.len(),
            header,
            labels,
            mapping,
        })
    }
}

/// 状态推进（非法迁移视为内部错误）
fn advance(state: &mut RunState, next: RunState) -> ImportResult<()> {
    if !state.can_advance_to(next) {
        return Err(ImportError::InternalError(format!(
            "非法状态迁移: {} → {}",
            state, next
        )));
    }
    debug!(from = %state, to = %next, "运行状态推进");
    *state = next;
    Ok(())
}

// ==========================================
// IngestPipeline
// ==========================================
pub struct IngestPipeline {
    config: Arc<IngestConfig>,
    processor: Arc<FileProcessor>,
    store: ConsolidationStore,
    cancel: Arc<AtomicBool>,
}

impl IngestPipeline {
    /// 使用给定仓储创建管道
    pub fn new(config: IngestConfig, repo: Arc<dyn TransactionRepository>) -> Self {
        let processor = FileProcessor::from_config(&config);
        let store = ConsolidationStore::new(repo, config.resolved_export_path());
        Self {
            config: Arc::new(config),
            processor: Arc::new(processor),
            store,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 按配置打开 SQLite 仓储（缺表时建表）
    pub fn open(config: IngestConfig) -> ImportResult<Self> {
        let db_path = config.resolved_db_path();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let repo = TransactionRepositoryImpl::new(&db_path.to_string_lossy())?;
        info!(db_path = %db_path.display(), "数据库已打开");
        Ok(Self::new(config, Arc::new(repo)))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn repository(&self) -> Arc<dyn TransactionRepository> {
        self.store.repository()
    }

    /// 取消标志（置位后不再提交新文件，本次运行不落库）
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn inspect(&self, file: &DiscoveredFile) -> ImportResult<InspectReport> {
        self.processor.inspect(file)
    }

    /// 并发处理所有文件，结果保持发现顺序
    async fn parse_files(&self, files: Vec<DiscoveredFile>) -> ImportResult<Vec<FileOutcome>> {
        let workers = self.config.worker_count();
        debug!(workers = workers, files = files.len(), "开始逐文件解析");

        let results: Vec<ImportResult<Option<FileOutcome>>> = stream::iter(files)
            .map(|file| {
                let processor = Arc::clone(&self.processor);
                let cancel = Arc::clone(&self.cancel);
                let span = Span::current();
                async move {
                    if cancel.load(Ordering::SeqCst) {
                        debug!(file = %file.source_label(), "运行已取消，未提交");
                        return Ok(None);
                    }
                    tokio::task::spawn_blocking(move || {
                        let _entered = span.enter();
                        processor.process(&file)
                    })
                    .await
                    .map(Some)
                    .map_err(|e| ImportError::InternalError(format!("文件任务异常: {}", e)))
                }
            })
            .buffered(workers)
            .collect()
            .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for result in results {
            if let Some(outcome) = result? {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    fn log_product_summary(report: &RunReport) {
        for (product, summary) in &report.by_product {
            info!(
                product = %product,
                count = summary.count,
                amount_sum = summary.amount_sum,
                volume_sum = summary.volume_sum,
                "产品汇总"
            );
        }
    }
}

#[async_trait::async_trait]
impl DispatchIngestor for IngestPipeline {
    #[instrument(skip(self))]
    async fn run(&self) -> ImportResult<RunReport> {
        let files = SourceCatalog::discover(&self.config)?;
        self.run_files(files).await
    }

    #[instrument(skip(self, files), fields(run_id))]
    async fn run_files(&self, files: Vec<DiscoveredFile>) -> ImportResult<RunReport> {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());

        let policy = self.config.policy;
        let mut state = RunState::Discovering;
        info!(run_id = %run_id, files = files.len(), policy = %policy, "开始归集运行");

        // === 逐文件解析 + 组装 ===
        advance(&mut state, RunState::Parsing)?;
        let outcomes = self.parse_files(files).await?;
        advance(&mut state, RunState::Assembling)?;

        let cancelled = self.cancel.load(Ordering::SeqCst);
        let (reports, records) = merge_outcomes(outcomes);
        let mut report = RunReport {
            run_id,
            state,
            policy,
            total_records: records.len(),
            by_product: summarize_by_product(&records),
            files: reports,
            persisted: 0,
            duplicates_skipped: 0,
            cancelled,
            elapsed_ms: 0,
            export_error: None,
        };

        // === 终止: 取消 / 无有效记录 ===
        if cancelled || records.is_empty() {
            advance(&mut state, RunState::Aborted)?;
            report.state = state;
            report.elapsed_ms = start_time.elapsed().as_millis();
            warn!(
                run_id = %report.run_id,
                cancelled = cancelled,
                files = report.files.len(),
                skipped = report.skipped_files(),
                "运行中止，未写入任何数据"
            );
            return Ok(report);
        }

        // === 合并落库 ===
        advance(&mut state, RunState::Consolidating)?;
        report.state = state;

        let mut snapshot = report.clone();
        snapshot.state = RunState::Persisted;
        snapshot.elapsed_ms = start_time.elapsed().as_millis();
        let run_record = build_run_record(&snapshot)?;

        let outcome = self.store.commit(policy, records, run_record).await?;
        advance(&mut state, RunState::Persisted)?;

        report.state = state;
        report.persisted = outcome.persist.inserted;
        report.duplicates_skipped = outcome.persist.duplicates_skipped;
        report.export_error = outcome.export_error;
        report.elapsed_ms = start_time.elapsed().as_millis();

        Self::log_product_summary(&report);
        info!(
            run_id = %report.run_id,
            files = report.files.len(),
            skipped = report.skipped_files(),
            records = report.total_records,
            persisted = report.persisted,
            duplicates = report.duplicates_skipped,
            elapsed_ms = report.elapsed_ms as u64,
            "归集运行完成"
        );
        Ok(report)
    }
}
