// ==========================================
// 加油机交易归集系统 - 命令行入口
// ==========================================
// 子命令: run / query / inspect
// ==========================================

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use fuel_dispatch_ingest::config::IngestConfig;
use fuel_dispatch_ingest::domain::PersistPolicy;
use fuel_dispatch_ingest::importer::{DiscoveredFile, DispatchIngestor, IngestPipeline};
use fuel_dispatch_ingest::repository::{
    write_records, BranchFilter, TransactionQuery, TransactionRepository, TransactionRepositoryImpl,
};
use fuel_dispatch_ingest::{logging, APP_NAME, VERSION};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "fuel-ingest")]
#[command(about = "加油机导出文件归集为标准交易表")]
#[command(version)]
struct Cli {
    /// 以 JSON 格式输出日志
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行一次完整归集运行
    Run {
        /// 配置文件（JSON）
        #[arg(short, long)]
        config: PathBuf,
        /// 落库策略（覆盖配置）
        #[arg(long)]
        policy: Option<PersistPolicy>,
        /// 数据库路径（覆盖配置）
        #[arg(long)]
        db: Option<PathBuf>,
        /// CSV 导出路径（覆盖配置）
        #[arg(long)]
        export: Option<PathBuf>,
        /// 以 JSON 输出运行报告
        #[arg(long)]
        json: bool,
    },
    /// 查询标准交易表
    Query {
        #[arg(long)]
        db: PathBuf,
        /// 站点精确匹配
        #[arg(long, conflicts_with = "branch_prefix")]
        branch: Option<String>,
        /// 站点前缀匹配
        #[arg(long)]
        branch_prefix: Option<String>,
        /// 产品（可多次指定）
        #[arg(long = "product")]
        products: Vec<String>,
        /// 起始日期 YYYY-MM-DD（含）
        #[arg(long)]
        from: Option<NaiveDate>,
        /// 截止日期 YYYY-MM-DD（含）
        #[arg(long)]
        to: Option<NaiveDate>,
        /// 枪号（可多次指定）
        #[arg(long = "pump")]
        pumps: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
        /// 以 JSON 输出（缺省为 CSV）
        #[arg(long)]
        json: bool,
    },
    /// 诊断单个文件: 格式、表头、列映射
    Inspect {
        file: PathBuf,
        /// 来源标签（用于查找厂商版式）
        #[arg(long, default_value = "inspect")]
        source: String,
        /// 配置文件（提供自定义版式与别名）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.log_json {
        logging::init_json();
    } else {
        logging::init();
    }
    info!(app = APP_NAME, version = VERSION, "启动");

    match cli.command {
        Commands::Run {
            config,
            policy,
            db,
            export,
            json,
        } => run(config, policy, db, export, json).await,
        Commands::Query {
            db,
            branch,
            branch_prefix,
            products,
            from,
            to,
            pumps,
            limit,
            offset,
            json,
        } => {
            let query = TransactionQuery {
                branch: match (branch, branch_prefix) {
                    (Some(exact), _) => Some(BranchFilter::Exact(exact)),
                    (None, Some(prefix)) => Some(BranchFilter::Prefix(prefix)),
                    (None, None) => None,
                },
                products,
                date_from: from,
                date_to: to,
                pumps,
                limit,
                offset,
            };
            query_store(db, query, json).await
        }
        Commands::Inspect {
            file,
            source,
            config,
        } => inspect(file, source, config),
    }
}

async fn run(
    config_path: PathBuf,
    policy: Option<PersistPolicy>,
    db: Option<PathBuf>,
    export: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = IngestConfig::load(&config_path)
        .with_context(|| format!("配置加载失败: {}", config_path.display()))?;
    if let Some(policy) = policy {
        config.policy = policy;
    }
    if db.is_some() {
        config.db_path = db;
    }
    if export.is_some() {
        config.export_csv = export;
    }

    let pipeline = IngestPipeline::open(config)?;
    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let report = pipeline.run().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "run {} {}: files={} skipped={} records={} persisted={} duplicates={}",
            report.run_id,
            report.state,
            report.files.len(),
            report.skipped_files(),
            report.total_records,
            report.persisted,
            report.duplicates_skipped
        );
        if let Some(err) = &report.export_error {
            println!("  export failed: {}", err);
        }
        for file in report.files.iter().filter(|f| f.skipped.is_some()) {
            if let Some(skip) = &file.skipped {
                println!("  skipped [{}] {}: {}", skip.stage, file.source, skip.reason);
            }
        }
        for (product, summary) in &report.by_product {
            println!(
                "  {:<16} count={:<6} amount={:.2} volume={:.2}",
                product, summary.count, summary.amount_sum, summary.volume_sum
            );
        }
    }
    Ok(())
}

async fn query_store(db: PathBuf, query: TransactionQuery, json: bool) -> anyhow::Result<()> {
    if !db.exists() {
        bail!("数据库不存在: {}", db.display());
    }
    let repo = TransactionRepositoryImpl::new(&db.to_string_lossy())?;
    let records = repo.query(&query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        write_records(std::io::stdout().lock(), &records)?;
    }
    Ok(())
}

fn inspect(file: PathBuf, source: String, config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => IngestConfig::load(&path)?,
        None => IngestConfig::default(),
    };
    let processor = fuel_dispatch_ingest::importer::FileProcessor::from_config(&config);
    let report = processor.inspect(&DiscoveredFile::standalone(file, source))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
