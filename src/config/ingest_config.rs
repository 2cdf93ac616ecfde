// ==========================================
// 加油机交易归集系统 - 运行配置
// ==========================================
// 来源: JSON 配置文件 + 环境变量覆盖
// 覆盖: FUEL_INGEST_DB_PATH / FUEL_INGEST_POLICY
// ==========================================

use crate::config::profile::{ColumnMappingProfile, ProfileRegistry};
use crate::domain::types::PersistPolicy;
use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const ENV_DB_PATH: &str = "FUEL_INGEST_DB_PATH";
pub const ENV_POLICY: &str = "FUEL_INGEST_POLICY";

pub const DEFAULT_PRODUCT: &str = "LIQUIDO";
pub const DEFAULT_YEAR: i32 = 2024;

// ==========================================
// SourceSpec - 来源声明
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub tag: String,
    /// 站点名称（缺省等于 tag）
    #[serde(default)]
    pub branch: Option<String>,
    /// glob 模式（相对路径以配置文件所在目录为基准）
    pub patterns: Vec<String>,
    /// 使用的 ColumnMappingProfile（缺省按 tag 查找）
    #[serde(default)]
    pub profile: Option<String>,
}

impl SourceSpec {
    pub fn branch_name(&self) -> &str {
        self.branch.as_deref().unwrap_or(&self.tag)
    }
}

// ==========================================
// IngestConfig
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub db_path: Option<PathBuf>,
    pub policy: PersistPolicy,
    pub export_csv: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub default_product: String,
    /// 文件名月份回退所用年份
    pub default_year: i32,
    /// 扩展产品映射（厂商标签 → 标准名）
    pub product_aliases: BTreeMap<String, String>,
    pub sources: Vec<SourceSpec>,
    pub profiles: BTreeMap<String, ColumnMappingProfile>,

    /// 相对路径基准目录（配置文件所在目录）
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            policy: PersistPolicy::default(),
            export_csv: None,
            max_workers: None,
            default_product: DEFAULT_PRODUCT.to_string(),
            default_year: DEFAULT_YEAR,
            product_aliases: BTreeMap::new(),
            sources: Vec::new(),
            profiles: BTreeMap::new(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl IngestConfig {
    /// 从 JSON 文件加载并应用环境变量覆盖
    pub fn load<P: AsRef<Path>>(path: P) -> ImportResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let text = std::fs::read_to_string(path).map_err(|e| ImportError::ConfigReadError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut config: IngestConfig = serde_json::from_str(&text)?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        config.apply_env_overrides()?;
        config.validate()?;

        info!(
            config = %path.display(),
            sources = config.sources.len(),
            profiles = config.profiles.len(),
            policy = %config.policy,
            "配置加载完成"
        );
        Ok(config)
    }

    /// 环境变量覆盖（空值忽略）
    pub fn apply_env_overrides(&mut self) -> ImportResult<()> {
        if let Some(db_path) = non_empty_env(ENV_DB_PATH) {
            debug!(db_path = %db_path, "使用环境变量指定的数据库路径");
            self.db_path = Some(PathBuf::from(db_path));
        }

        if let Some(policy) = non_empty_env(ENV_POLICY) {
            self.policy = policy
                .parse::<PersistPolicy>()
                .map_err(|message| ImportError::ConfigValueError {
                    key: ENV_POLICY.to_string(),
                    value: policy.clone(),
                    message,
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ImportResult<()> {
        if let Some(0) = self.max_workers {
            return Err(ImportError::ConfigValueError {
                key: "max_workers".to_string(),
                value: "0".to_string(),
                message: "并发数必须大于 0".to_string(),
            });
        }

        if self.default_product.trim().is_empty() {
            return Err(ImportError::ConfigValueError {
                key: "default_product".to_string(),
                value: self.default_product.clone(),
                message: "缺省产品不能为空".to_string(),
            });
        }

        for source in &self.sources {
            if source.tag.trim().is_empty() {
                return Err(ImportError::ConfigValueError {
                    key: "sources.tag".to_string(),
                    value: source.tag.clone(),
                    message: "来源标签不能为空".to_string(),
                });
            }
            if source.patterns.is_empty() {
                return Err(ImportError::ConfigValueError {
                    key: format!("sources[{}].patterns", source.tag),
                    value: "[]".to_string(),
                    message: "至少需要一个匹配模式".to_string(),
                });
            }
            if let Some(profile) = &source.profile {
                if !self.profiles.contains_key(profile)
                    && ProfileRegistry::with_builtins().get(profile).is_none()
                {
                    warn!(source = %source.tag, profile = %profile, "引用的版式不存在，将使用通用启发式");
                }
            }
        }
        Ok(())
    }

    /// 数据库路径（配置 > 默认数据目录）
    pub fn resolved_db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => self.resolve_path(path),
            None => PathBuf::from(get_default_db_path()),
        }
    }

    pub fn resolved_export_path(&self) -> Option<PathBuf> {
        self.export_csv.as_ref().map(|p| self.resolve_path(p))
    }

    /// 相对路径以配置文件目录为基准
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// 并发数（缺省为可用并行度）
    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// 内置版式 + 配置版式（配置优先）
    pub fn profile_registry(&self) -> ProfileRegistry {
        let mut registry = ProfileRegistry::with_builtins();
        registry.merge(&self.profiles);
        registry
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 默认数据库路径
///
/// 优先级: FUEL_INGEST_DB_PATH > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    if let Some(path) = non_empty_env(ENV_DB_PATH) {
        return path;
    }

    let mut path = PathBuf::from("./fuel_dispatch.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("fuel-dispatch-ingest");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("fuel_dispatch.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.policy, PersistPolicy::Replace);
        assert_eq!(config.default_product, "LIQUIDO");
        assert_eq!(config.default_year, 2024);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_load_from_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "db_path": "out/despachos.db",
                "policy": "append",
                "max_workers": 2,
                "product_aliases": {{ "GO-INFINIA": "INFINIA DIESEL" }},
                "sources": [
                    {{ "tag": "posta_cepia", "branch": "Posta Cepia", "patterns": ["cepia/*.csv"] }},
                    {{ "tag": "petrol", "patterns": ["petrol/*.xls"] }}
                ],
                "profiles": {{ "petrol": {{ "year_override": 2024 }} }}
            }}"#
        )
        .unwrap();

        let config = IngestConfig::load(file.path()).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].branch_name(), "Posta Cepia");
        assert_eq!(config.sources[1].branch_name(), "petrol");
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.product_aliases["GO-INFINIA"], "INFINIA DIESEL");
        assert!(config.resolved_db_path().ends_with("out/despachos.db"));

        let registry = config.profile_registry();
        assert_eq!(registry.get("petrol").unwrap().year_override, Some(2024));
        assert!(registry.get("posta_hersu").is_some());
    }

    #[test]
    fn test_invalid_workers_rejected() {
        let config = IngestConfig {
            max_workers: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ImportError::ConfigValueError { .. })
        ));
    }

    #[test]
    fn test_source_without_patterns_rejected() {
        let config = IngestConfig {
            sources: vec![SourceSpec {
                tag: "petrol".to_string(),
                branch: None,
                patterns: vec![],
                profile: None,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = IngestConfig::load("/nonexistent/fuel-ingest.json");
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }
}
