// ==========================================
// 加油机交易归集系统 - 来源文件发现
// ==========================================
// 运行开始时一次性枚举静态文件集
// 顺序: 按来源声明顺序，来源内按路径排序
// 同一路径被多个来源匹配时，先声明的来源生效
// ==========================================

use crate::config::ingest_config::{IngestConfig, SourceSpec};
use crate::domain::transaction::RawFile;
use crate::domain::types::FormatFamily;
use crate::importer::error::{ImportError, ImportResult};
use glob::MatchOptions;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 已发现、尚未识别格式的源文件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub source_tag: String,
    pub branch: String,
    pub profile: Option<String>,
}

impl DiscoveredFile {
    /// 单文件（inspect 等场景），站点缺省为来源标签
    pub fn standalone(path: impl Into<PathBuf>, source_tag: impl Into<String>) -> Self {
        let source_tag = source_tag.into();
        Self {
            path: path.into(),
            branch: source_tag.clone(),
            source_tag,
            profile: None,
        }
    }

    pub fn with_format(&self, format: FormatFamily) -> RawFile {
        RawFile {
            path: self.path.clone(),
            format,
            source_tag: self.source_tag.clone(),
            branch: self.branch.clone(),
            profile: self.profile.clone(),
        }
    }

    pub fn source_label(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }
}

pub struct SourceCatalog;

impl SourceCatalog {
    fn expand_pattern(config: &IngestConfig, pattern: &str) -> ImportResult<Vec<PathBuf>> {
        let full = config.resolve_path(Path::new(pattern));
        let full = full.to_string_lossy();
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };

        let entries = glob::glob_with(&full, options).map_err(|e| ImportError::InvalidSourcePattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(e) => warn!(pattern = %pattern, error = %e, "路径不可访问，已忽略"),
            }
        }
        Ok(paths)
    }

    fn discover_source(
        config: &IngestConfig,
        source: &SourceSpec,
        seen: &mut HashSet<PathBuf>,
    ) -> ImportResult<Vec<DiscoveredFile>> {
        let mut paths = Vec::new();
        for pattern in &source.patterns {
            paths.extend(Self::expand_pattern(config, pattern)?);
        }
        paths.sort();
        paths.dedup();

        let files: Vec<DiscoveredFile> = paths
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .map(|path| DiscoveredFile {
                path,
                source_tag: source.tag.clone(),
                branch: source.branch_name().to_string(),
                profile: source.profile.clone(),
            })
            .collect();

        debug!(source = %source.tag, files = files.len(), "来源发现完成");
        Ok(files)
    }

    /// 枚举所有来源文件
    pub fn discover(config: &IngestConfig) -> ImportResult<Vec<DiscoveredFile>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for source in &config.sources {
            files.extend(Self::discover_source(config, source, &mut seen)?);
        }

        info!(sources = config.sources.len(), files = files.len(), "文件发现完成");
        Ok(files)
    }
}
