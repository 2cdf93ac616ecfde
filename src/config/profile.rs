// ==========================================
// 加油机交易归集系统 - 列映射配置（ColumnMappingProfile）
// ==========================================
// 职责: 已知厂商版式的声明式描述，优先于通用启发式
// 查找: ProfileRegistry::resolve(tag) → Fixed / Infer
// ==========================================

use crate::domain::types::CanonicalColumn;
use crate::importer::value_normalizer::fold_text;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ==========================================
// ColumnMappingProfile
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMappingProfile {
    /// 固定跳过行数（表头所在行号）；为空时扫描定位
    pub skip_rows: Option<usize>,

    /// 位置列名；非空时不消耗表头行，数据从 skip_rows 开始
    pub column_names: Vec<String>,

    /// 原始列名 → 标准列（去空白、大小写不敏感的精确匹配）
    pub aliases: BTreeMap<String, CanonicalColumn>,

    /// 表头后需跳过的横幅行数（如 `expand_less`）
    pub skip_after_header: usize,

    /// 额外的页脚/分节标记
    pub footer_markers: Vec<String>,

    /// 单一产品来源: 强制所有记录的产品
    pub force_product: Option<String>,

    /// 年份覆盖（解析时替换年份）
    pub year_override: Option<i32>,

    /// 产品单元格为空时的缺省产品
    pub default_product: Option<String>,
}

impl ColumnMappingProfile {
    pub fn has_positional_names(&self) -> bool {
        !self.column_names.is_empty()
    }

    /// 别名表查找
    pub fn alias_for(&self, label: &str) -> Option<CanonicalColumn> {
        let folded = fold_text(label);
        if folded.is_empty() {
            return None;
        }
        self.aliases
            .iter()
            .find(|(alias, _)| fold_text(alias) == folded)
            .map(|(_, column)| *column)
    }
}

// ==========================================
// LayoutStrategy - 版式策略
// ==========================================
#[derive(Debug, Clone, Copy)]
pub enum LayoutStrategy<'a> {
    Fixed(&'a ColumnMappingProfile), // 已知版式
    Infer,                           // 通用启发式
}

impl<'a> LayoutStrategy<'a> {
    pub fn profile(&self) -> Option<&'a ColumnMappingProfile> {
        match self {
            LayoutStrategy::Fixed(profile) => Some(profile),
            LayoutStrategy::Infer => None,
        }
    }
}

// ==========================================
// ProfileRegistry
// ==========================================
// 键: 来源标签（大小写不敏感）
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, ColumnMappingProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置厂商版式
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (tag, profile) in builtin_profiles() {
            registry.register(tag, profile);
        }
        registry
    }

    /// 注册（同名覆盖）
    pub fn register(&mut self, tag: &str, profile: ColumnMappingProfile) {
        self.profiles.insert(registry_key(tag), profile);
    }

    /// 合并配置声明的版式，配置优先
    pub fn merge(&mut self, declared: &BTreeMap<String, ColumnMappingProfile>) {
        for (tag, profile) in declared {
            self.register(tag, profile.clone());
        }
    }

    pub fn get(&self, tag: &str) -> Option<&ColumnMappingProfile> {
        self.profiles.get(&registry_key(tag))
    }

    pub fn resolve(&self, tag: &str) -> LayoutStrategy<'_> {
        match self.get(tag) {
            Some(profile) => LayoutStrategy::Fixed(profile),
            None => LayoutStrategy::Infer,
        }
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.profiles.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn registry_key(tag: &str) -> String {
    tag.trim().to_lowercase()
}

// ==========================================
// 内置版式
// ==========================================
fn builtin_profiles() -> Vec<(&'static str, ColumnMappingProfile)> {
    // Hersu: 15 行横幅，无可用表头
    let hersu = ColumnMappingProfile {
        skip_rows: Some(15),
        column_names: [
            "Fecha y Hora",
            "Surtidor/Manguera",
            "Producto",
            "Tipo de Pago",
            "Importe",
            "Volumen",
            "PPU",
            "Densidad",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        ..Default::default()
    };

    // Cepia: 表头后紧跟 expand_less 横幅行，数据中夹杂 "Surtidor N" 分节行
    let cepia = ColumnMappingProfile {
        aliases: [
            ("Fecha final", CanonicalColumn::Date),
            ("Hora final", CanonicalColumn::Time),
            ("Manguera", CanonicalColumn::PumpId),
            ("Combust.", CanonicalColumn::Product),
            ("Volumen", CanonicalColumn::Volume),
            ("Monto", CanonicalColumn::Amount),
            ("Precio", CanonicalColumn::UnitPrice),
        ]
        .iter()
        .map(|(label, column)| (label.to_string(), *column))
        .collect(),
        skip_after_header: 1,
        footer_markers: vec!["SURTIDOR".to_string()],
        ..Default::default()
    };

    // Erezcano: SpreadsheetML，按 ss:Index 取 1..6 列
    let erezcano = ColumnMappingProfile {
        skip_rows: Some(0),
        column_names: ["Fecha y Hora", "Pico", "Producto", "", "Importe", "Volumen"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ..Default::default()
    };

    // GNC 单一产品导出
    let gnc = ColumnMappingProfile {
        force_product: Some("GNC".to_string()),
        ..Default::default()
    };

    vec![
        ("posta_hersu", hersu),
        ("posta_cepia", cepia),
        ("posta_erezcano", erezcano),
        ("gnc", gnc),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_registered() {
        let registry = ProfileRegistry::with_builtins();
        assert_eq!(registry.len(), 4);

        let hersu = registry.get("Posta_Hersu").unwrap();
        assert_eq!(hersu.skip_rows, Some(15));
        assert_eq!(hersu.column_names.len(), 8);
        assert!(hersu.has_positional_names());
    }

    #[test]
    fn test_resolve_fixed_or_infer() {
        let registry = ProfileRegistry::with_builtins();
        assert!(matches!(registry.resolve("gnc"), LayoutStrategy::Fixed(_)));
        assert!(matches!(registry.resolve("unknown_vendor"), LayoutStrategy::Infer));
        assert!(registry.resolve("unknown_vendor").profile().is_none());
    }

    #[test]
    fn test_config_profile_wins_over_builtin() {
        let mut registry = ProfileRegistry::with_builtins();
        let mut declared = BTreeMap::new();
        declared.insert(
            "gnc".to_string(),
            ColumnMappingProfile {
                force_product: Some("GNC COMPRIMIDO".to_string()),
                ..Default::default()
            },
        );
        registry.merge(&declared);

        let gnc = registry.get("gnc").unwrap();
        assert_eq!(gnc.force_product.as_deref(), Some("GNC COMPRIMIDO"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_alias_lookup_is_case_insensitive() {
        let registry = ProfileRegistry::with_builtins();
        let cepia = registry.get("posta_cepia").unwrap();
        assert_eq!(cepia.alias_for("  FECHA FINAL "), Some(CanonicalColumn::Date));
        assert_eq!(cepia.alias_for("combust."), Some(CanonicalColumn::Product));
        assert_eq!(cepia.alias_for("Fecha inicial"), None);
        assert_eq!(cepia.alias_for(""), None);
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let json = r#"{ "skip_rows": 3, "aliases": { "Litros": "volume" } }"#;
        let profile: ColumnMappingProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.skip_rows, Some(3));
        assert_eq!(profile.alias_for("litros"), Some(CanonicalColumn::Volume));
        assert_eq!(profile.skip_after_header, 0);
        assert!(profile.force_product.is_none());
    }
}
