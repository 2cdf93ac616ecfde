// ==========================================
// 加油机交易归集系统 - 产品编码映射
// ==========================================
// 精确匹配（去空白后）；未知标签原样透传
// ==========================================

use std::collections::{BTreeMap, HashMap};

/// 厂商标签 → 标准产品名
const BUILTIN_PRODUCTS: [(&str, &str); 6] = [
    ("NS XXI", "GNC"),
    ("GO-INFINIA DIESEL", "INFINIA DIESEL"),
    ("D.DIESEL500", "DIESEL 500"),
    ("INFINIA", "INFINIA"),
    ("SUPER", "SUPER"),
    ("DIESEL", "DIESEL"),
];

#[derive(Debug, Clone)]
pub struct ProductMapper {
    table: HashMap<String, String>,
    force_product: Option<String>,
    default_product: String,
}

impl ProductMapper {
    pub fn new(default_product: impl Into<String>) -> Self {
        let table = BUILTIN_PRODUCTS
            .iter()
            .map(|(label, canonical)| (label.to_string(), canonical.to_string()))
            .collect();
        Self {
            table,
            force_product: None,
            default_product: default_product.into(),
        }
    }

    /// 扩展映射（配置 product_aliases，覆盖内置项）
    pub fn with_aliases(mut self, aliases: &BTreeMap<String, String>) -> Self {
        for (label, canonical) in aliases {
            self.table
                .insert(label.trim().to_string(), canonical.trim().to_string());
        }
        self
    }

    /// 单一产品来源
    pub fn with_force_product(mut self, product: Option<String>) -> Self {
        self.force_product = product
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        self
    }

    pub fn with_default_product(mut self, product: Option<String>) -> Self {
        if let Some(product) = product.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()) {
            self.default_product = product;
        }
        self
    }

    pub fn default_product(&self) -> &str {
        &self.default_product
    }

    /// 标准化单个产品标签
    pub fn map_label(&self, label: &str) -> String {
        let trimmed = label.trim();
        self.table
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    /// 记录的产品: 强制 > 映射/透传 > 缺省
    pub fn canonicalize(&self, raw: Option<&str>) -> String {
        if let Some(forced) = &self.force_product {
            return forced.clone();
        }
        match raw.map(str::trim).filter(|r| !r.is_empty()) {
            Some(label) => self.map_label(label),
            None => self.default_product.clone(),
        }
    }
}

impl Default for ProductMapper {
    fn default() -> Self {
        Self::new(crate::config::ingest_config::DEFAULT_PRODUCT)
    }
}
