// ==========================================
// 加油机交易归集系统 - 值标准化器实现
// ==========================================
// 职责: 区域格式数值 / 日期时间 / 枪号油嘴 / 文件名月份
// 原则: 解析失败即置空，绝不臆造数值
// ==========================================

use crate::importer::ingest_trait::ValueNormalizer as ValueNormalizerTrait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

// 货币符号、单位后缀、斜杠、空白（含 NBSP）
static NUMERIC_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\$\s*/\s*ltr|ltrs?|lts|m3|[$€/\s\x{a0}]").expect("Invalid regex")
});

static PUMP_NOZZLE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*([A-Za-z])?$").expect("Invalid regex"));

// 日期尾部噪声: 首个不在 [0-9/: ] 中的字符起截断
static DATE_TRAILING_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9/: ].*$").expect("Invalid regex"));

/// 日期时间组合格式（均为 4 位年份）
const DATETIME_FORMATS: [&str; 4] = [
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// 纯日期格式（最后一项为 2 位年份）
const DATE_FORMATS: [&str; 5] = ["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%y"];

const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// 4 位年份格式的最小可接受年份
const MIN_FOUR_DIGIT_YEAR: i32 = 1900;

/// 西语月份名 → 月份
const SPANISH_MONTHS: [(&str, u32); 13] = [
    ("ENERO", 1),
    ("FEBRERO", 2),
    ("MARZO", 3),
    ("ABRIL", 4),
    ("MAYO", 5),
    ("JUNIO", 6),
    ("JULIO", 7),
    ("AGOSTO", 8),
    ("SEPTIEMBRE", 9),
    ("SETIEMBRE", 9),
    ("OCTUBRE", 10),
    ("NOVIEMBRE", 11),
    ("DICIEMBRE", 12),
];

// ==========================================
// 文本折叠（大写 + 去重音）
// ==========================================
pub fn fold_text(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'A',
            'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'E',
            'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
            'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
            'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
            'ñ' | 'Ñ' => 'N',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

// ==========================================
// 数值清洗
// ==========================================

/// 去除货币符号 / 单位后缀 / 斜杠 / 空白
pub fn strip_numeric_noise(raw: &str) -> String {
    NUMERIC_NOISE.replace_all(raw, "").into_owned()
}

/// 是否带货币标记
pub fn has_currency_mark(raw: &str) -> bool {
    raw.contains('$') || raw.contains('€')
}

/// 区域格式数值解析
///
/// 规则:
/// - 同时出现 `.` 与 `,`: `.` 为千分位，`,` 为小数点
/// - 仅出现多个 `.`: 全部为千分位
/// - 仅出现 `,`: 小数点
///
/// 非有限值（NaN/inf）视为失败
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let cleaned = strip_numeric_noise(raw);
    if cleaned.is_empty() {
        return None;
    }

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');
    let dot_count = cleaned.matches('.').count();

    let canonical = if has_dot && has_comma {
        cleaned.replace('.', "").replace(',', ".")
    } else if has_dot && dot_count > 1 {
        cleaned.replace('.', "")
    } else if has_comma {
        cleaned.replace(',', ".")
    } else {
        cleaned
    };

    canonical.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ==========================================
// 日期时间
// ==========================================

fn accept_year(date: NaiveDate, format: &str) -> bool {
    !format.contains("%Y") || date.year() >= MIN_FOUR_DIGIT_YEAR
}

fn parse_date_only(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(text, fmt)
            .ok()
            .filter(|d| accept_year(*d, fmt))
    })
}

/// 纯时间解析（HH:MM:SS / HH:MM）
pub fn parse_time_only(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
}

fn parse_date_time_candidate(text: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    if text.is_empty() {
        return None;
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            if dt.date().year() >= MIN_FOUR_DIGIT_YEAR {
                return Some((dt.date(), Some(dt.time())));
            }
        }
    }

    if let Some(date) = parse_date_only(text) {
        return Some((date, None));
    }

    // 组合字段: 按首个空格拆分
    let (date_part, time_part) = text.split_once(' ')?;
    let date = parse_date_only(date_part.trim())?;
    Some((date, parse_time_only(time_part)))
}

/// 日期（+可选时间）解析，先原值后截断尾部噪声
pub fn parse_date_time(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let trimmed = raw.trim();
    parse_date_time_candidate(trimmed).or_else(|| {
        let truncated = DATE_TRAILING_NOISE.replace(trimmed, "");
        let truncated = truncated.trim();
        if truncated == trimmed {
            None
        } else {
            parse_date_time_candidate(truncated)
        }
    })
}

/// 是否看起来像日期（含分隔符且可解析）
pub fn looks_like_date(raw: &str) -> bool {
    let trimmed = raw.trim();
    (trimmed.contains('/') || trimmed.contains('-')) && parse_date_time(trimmed).is_some()
}

// ==========================================
// 枪号 / 油嘴
// ==========================================

/// 油嘴标准化: 单字母小写，数字 1..=26 → a..=z，其余为空
pub fn normalize_nozzle(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            return Some(c.to_ascii_lowercase().to_string());
        }
    }

    let index = trimmed
        .parse::<u32>()
        .ok()
        .or_else(|| parse_locale_number(trimmed).filter(|v| v.fract() == 0.0).map(|v| v as u32))?;
    if (1..=26).contains(&index) {
        char::from_u32(u32::from(b'a') + index - 1).map(|c| c.to_string())
    } else {
        None
    }
}

/// 组合枪号解析: `12/a` → (12, a)，`12` → (12, a)，`3b` → (3, b)
///
/// 空值返回 None；无法识别的记号原样作为枪号
pub fn parse_pump_nozzle(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some((pump, nozzle)) = trimmed.split_once(['/', '-']) {
        let pump = pump.trim();
        if !pump.is_empty() {
            let nozzle = normalize_nozzle(nozzle).unwrap_or_else(|| "a".to_string());
            return Some((pump.to_string(), nozzle));
        }
    }

    if let Some(caps) = PUMP_NOZZLE_TOKEN.captures(trimmed) {
        let pump = caps.get(1).map(|m| m.as_str().to_string())?;
        let nozzle = caps
            .get(2)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| "a".to_string());
        return Some((pump, nozzle));
    }

    // Excel 数值枪号（如 "12.0"）
    if let Some(value) = parse_locale_number(trimmed).filter(|v| v.fract() == 0.0 && *v >= 0.0) {
        return Some((format!("{}", value as u64), "a".to_string()));
    }

    Some((trimmed.to_string(), "a".to_string()))
}

// ==========================================
// 文件名月份
// ==========================================

/// 从文件名中提取西语月份（ENERO..DICIEMBRE）
pub fn month_from_file_name(file_name: &str) -> Option<u32> {
    let folded = fold_text(file_name);
    SPANISH_MONTHS
        .iter()
        .find(|(name, _)| folded.contains(name))
        .map(|(_, month)| *month)
}

// ==========================================
// ValueNormalizer - 按来源配置的标准化器
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ValueNormalizer {
    year_override: Option<i32>,
}

impl ValueNormalizer {
    pub fn new(year_override: Option<i32>) -> Self {
        Self { year_override }
    }

    pub fn year_override(&self) -> Option<i32> {
        self.year_override
    }

    fn apply_year(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.year_override {
            // 2/29 → 非闰年时无法解析
            Some(year) => date.with_year(year),
            None => Some(date),
        }
    }
}

impl ValueNormalizerTrait for ValueNormalizer {
    fn parse_numeric(&self, raw: &str) -> Option<f64> {
        parse_locale_number(raw)
    }

    fn parse_date_time(&self, raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
        let (date, time) = parse_date_time(raw)?;
        Some((self.apply_year(date)?, time))
    }

    fn parse_time(&self, raw: &str) -> Option<NaiveTime> {
        parse_time_only(raw).or_else(|| parse_date_time(raw).and_then(|(_, t)| t))
    }

    fn parse_pump_nozzle(&self, raw: &str) -> Option<(String, String)> {
        parse_pump_nozzle(raw)
    }

    fn parse_nozzle(&self, raw: &str) -> Option<String> {
        normalize_nozzle(raw)
    }

    fn fallback_date(&self, file_name: &str, default_year: i32) -> Option<NaiveDate> {
        let month = month_from_file_name(file_name)?;
        let year = self.year_override.unwrap_or(default_year);
        NaiveDate::from_ymd_opt(year, month, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_locale_number_rules() {
        assert_eq!(parse_locale_number("$1.234,56"), Some(1234.56));
        assert_eq!(parse_locale_number("1,5"), Some(1.5));
        assert_eq!(parse_locale_number("12.345.678"), Some(12345678.0));
        assert_eq!(parse_locale_number("45.5"), Some(45.5));
        assert_eq!(parse_locale_number("1500"), Some(1500.0));
    }

    #[test]
    fn test_locale_number_strips_units() {
        assert_eq!(parse_locale_number("35,20 Ltr"), Some(35.2));
        assert_eq!(parse_locale_number("12,5 M3"), Some(12.5));
        assert_eq!(parse_locale_number("$ 850,00 $/Ltr"), Some(850.0));
        assert_eq!(parse_locale_number("1\u{a0}234,5"), Some(1234.5));
        assert_eq!(parse_locale_number("€ 10"), Some(10.0));
    }

    #[test]
    fn test_locale_number_failures() {
        assert_eq!(parse_locale_number(""), None);
        assert_eq!(parse_locale_number("$"), None);
        assert_eq!(parse_locale_number("abc"), None);
        assert_eq!(parse_locale_number("NaN"), None);
        assert_eq!(parse_locale_number("inf"), None);
    }

    #[test]
    fn test_parse_date_time_formats() {
        assert_eq!(
            parse_date_time("05/01/2024 14:30:15"),
            Some((ymd(2024, 1, 5), NaiveTime::from_hms_opt(14, 30, 15)))
        );
        assert_eq!(
            parse_date_time("2024-03-02T08:00:00"),
            Some((ymd(2024, 3, 2), NaiveTime::from_hms_opt(8, 0, 0)))
        );
        assert_eq!(parse_date_time("2024-03-02"), Some((ymd(2024, 3, 2), None)));
        assert_eq!(parse_date_time("07-02-2024"), Some((ymd(2024, 2, 7), None)));
    }

    #[test]
    fn test_two_digit_year_falls_through() {
        assert_eq!(parse_date_time("05/01/24"), Some((ymd(2024, 1, 5), None)));
    }

    #[test]
    fn test_trailing_free_text_truncated() {
        assert_eq!(
            parse_date_time("05/01/2024 Cantidad de cargas: 658"),
            Some((ymd(2024, 1, 5), None))
        );
        assert_eq!(parse_date_time("Surtidor 3"), None);
        assert_eq!(parse_date_time("32/13/2024"), None);
    }

    #[test]
    fn test_split_date_and_time_halves() {
        assert_eq!(
            parse_date_time("2024/01/05 7:45"),
            Some((ymd(2024, 1, 5), NaiveTime::from_hms_opt(7, 45, 0)))
        );
    }

    #[test]
    fn test_year_override() {
        let normalizer = ValueNormalizer::new(Some(2024));
        assert_eq!(
            normalizer.parse_date_time("10/06/2023"),
            Some((ymd(2024, 6, 10), None))
        );
        assert_eq!(normalizer.parse_date_time("29/02/2024").map(|p| p.0), Some(ymd(2024, 2, 29)));

        let to_2025 = ValueNormalizer::new(Some(2025));
        assert_eq!(to_2025.parse_date_time("29/02/2024"), None);
    }

    #[test]
    fn test_parse_time() {
        let normalizer = ValueNormalizer::default();
        assert_eq!(normalizer.parse_time("08:15"), NaiveTime::from_hms_opt(8, 15, 0));
        assert_eq!(normalizer.parse_time("23:59:59"), NaiveTime::from_hms_opt(23, 59, 59));
        assert_eq!(normalizer.parse_time("tarde"), None);
    }

    #[test]
    fn test_pump_nozzle_parsing() {
        assert_eq!(parse_pump_nozzle("12/a"), Some(("12".to_string(), "a".to_string())));
        assert_eq!(parse_pump_nozzle("12"), Some(("12".to_string(), "a".to_string())));
        assert_eq!(parse_pump_nozzle("3b"), Some(("3".to_string(), "b".to_string())));
        assert_eq!(parse_pump_nozzle("4 - 2"), Some(("4".to_string(), "b".to_string())));
        assert_eq!(parse_pump_nozzle("7/B"), Some(("7".to_string(), "b".to_string())));
        assert_eq!(parse_pump_nozzle("   "), None);
    }

    #[test]
    fn test_normalize_nozzle() {
        assert_eq!(normalize_nozzle("1"), Some("a".to_string()));
        assert_eq!(normalize_nozzle("26"), Some("z".to_string()));
        assert_eq!(normalize_nozzle("C"), Some("c".to_string()));
        assert_eq!(normalize_nozzle("27"), None);
        assert_eq!(normalize_nozzle("0"), None);
        assert_eq!(normalize_nozzle("ab"), None);
    }

    #[test]
    fn test_month_from_file_name() {
        assert_eq!(month_from_file_name("Despachos ENERO GNC.xls"), Some(1));
        assert_eq!(month_from_file_name("ventas_septiembre.csv"), Some(9));
        assert_eq!(month_from_file_name("report.xml"), None);

        let normalizer = ValueNormalizer::default();
        assert_eq!(normalizer.fallback_date("marzo.xls", 2024), Some(ymd(2024, 3, 1)));
    }

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text(" Estación "), "ESTACION");
        assert_eq!(fold_text("Combust."), "COMBUST.");
    }
}
