//! Slot value normalization
//!
//! First of the two validation passes: convert an extracted string to its
//! canonical typed form. Normalization is idempotent (re-normalizing a
//! canonical value yields the same value) and total per kind: failure
//! produces a user-facing error string, never a panic.
//!
//! Relative dates resolve against a caller-supplied reference date so the
//! pass stays deterministic under test.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use task_router_core::{NormalizedValue, SlotDef, SlotKind};

static CHINESE_DIGITS: Lazy<HashMap<char, i64>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (ch, n) in [
        ('零', 0),
        ('一', 1),
        ('二', 2),
        ('两', 2),
        ('三', 3),
        ('四', 4),
        ('五', 5),
        ('六', 6),
        ('七', 7),
        ('八', 8),
        ('九', 9),
        ('十', 10),
    ] {
        map.insert(ch, n);
    }
    map
});

/// Suffixes stripped before numeric parsing (counts of people/tickets).
const COUNT_SUFFIXES: [&str; 6] = ["个人", "人", "位", "名", "张", "个"];

static DAYS_AFTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)天后$").unwrap());
static DAYS_BEFORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)天前$").unwrap());
static CN_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(\d{4})年)?(\d{1,2})月(\d{1,2})[日号]?$").unwrap());
static TIME_HM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,2})[:：点](\d{2}|半)?分?$").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

/// Normalize one extracted string for a slot definition. Errors are
/// user-facing strings keyed off the slot's display name.
pub fn normalize_slot(
    def: &SlotDef,
    raw: &str,
    reference_date: NaiveDate,
) -> Result<NormalizedValue, String> {
    if def.is_list {
        let items: Vec<String> = split_list(raw)
            .into_iter()
            .map(|item| {
                normalize_scalar(def, &item, reference_date).map(|v| v.as_text())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut deduped = Vec::new();
        for item in items {
            if !deduped.contains(&item) {
                deduped.push(item);
            }
        }
        return Ok(NormalizedValue::List(deduped));
    }
    normalize_scalar(def, raw, reference_date)
}

fn normalize_scalar(
    def: &SlotDef,
    raw: &str,
    reference_date: NaiveDate,
) -> Result<NormalizedValue, String> {
    match def.kind {
        SlotKind::Text | SlotKind::Entity => Ok(NormalizedValue::Text(collapse_whitespace(raw))),
        SlotKind::Number => normalize_number(raw)
            .map(NormalizedValue::Number)
            .ok_or_else(|| format!("无法识别{}，请输入数字", def.display_name)),
        SlotKind::Date => normalize_date(raw, reference_date)
            .map(NormalizedValue::Date)
            .ok_or_else(|| {
                format!("无法识别{}，请使用如“明天”或“2026-08-15”的格式", def.display_name)
            }),
        SlotKind::Time => normalize_time(raw)
            .map(NormalizedValue::Time)
            .ok_or_else(|| format!("无法识别{}，请使用如“14:30”的格式", def.display_name)),
        SlotKind::Boolean => normalize_boolean(raw)
            .map(NormalizedValue::Boolean)
            .ok_or_else(|| format!("请回答“是”或“否”来确认{}", def.display_name)),
        SlotKind::Email => {
            let trimmed = raw.trim();
            if EMAIL.is_match(trimmed) {
                Ok(NormalizedValue::Text(trimmed.to_ascii_lowercase()))
            } else {
                Err("邮箱格式不正确，请重新输入".to_string())
            }
        },
        SlotKind::Phone => normalize_phone(raw)
            .map(NormalizedValue::Text)
            .ok_or_else(|| "手机号格式不正确，请输入11位手机号".to_string()),
        SlotKind::Enum => normalize_enum(raw, &def.validation.options, def.required)
            .map(NormalizedValue::Option)
            .ok_or_else(|| {
                format!(
                    "{}只能是：{}",
                    def.display_name,
                    def.validation.options.join("、")
                )
            }),
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(['、', ',', '，', ';', '；'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a number, accepting Chinese numerals up to 十九 and count
/// suffixes ("三个人" -> 3).
pub fn normalize_number(raw: &str) -> Option<f64> {
    let mut text = raw.trim().to_string();
    for suffix in COUNT_SUFFIXES {
        if let Some(stripped) = text.strip_suffix(suffix) {
            text = stripped.trim().to_string();
            break;
        }
    }
    if text.is_empty() {
        return None;
    }

    if let Some(n) = parse_chinese_numeral(&text) {
        return Some(n as f64);
    }

    // Strip everything that is not part of a decimal number.
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// 一..九, 十, 十一..十九, and 两 for 2.
fn parse_chinese_numeral(text: &str) -> Option<i64> {
    let chars: Vec<char> = text.chars().collect();
    match chars.as_slice() {
        [c] => CHINESE_DIGITS.get(c).copied(),
        ['十', c] => CHINESE_DIGITS.get(c).copied().map(|n| 10 + n),
        [c, '十'] => CHINESE_DIGITS.get(c).copied().map(|n| n * 10),
        [a, '十', b] => match (CHINESE_DIGITS.get(a), CHINESE_DIGITS.get(b)) {
            (Some(tens), Some(ones)) => Some(tens * 10 + ones),
            _ => None,
        },
        _ => None,
    }
}

/// Resolve a date expression to a calendar date.
///
/// Accepts ISO, slashed and Chinese forms, relative words, "N天后"/"N天前"
/// offsets, and weekday names (resolved to the next occurrence).
pub fn normalize_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = raw.trim();

    match text {
        "今天" | "今日" => return Some(today),
        "明天" | "明日" => return Some(today + Duration::days(1)),
        "后天" => return Some(today + Duration::days(2)),
        "大后天" => return Some(today + Duration::days(3)),
        "昨天" | "昨日" => return Some(today - Duration::days(1)),
        "前天" => return Some(today - Duration::days(2)),
        _ => {},
    }

    if let Some(caps) = DAYS_AFTER.captures(text) {
        let days: i64 = caps[1].parse().ok()?;
        return Some(today + Duration::days(days));
    }
    if let Some(caps) = DAYS_BEFORE.captures(text) {
        let days: i64 = caps[1].parse().ok()?;
        return Some(today - Duration::days(days));
    }

    if let Some(weekday) = parse_weekday(text) {
        return Some(next_occurrence(today, weekday));
    }

    if let Some(caps) = CN_DATE.captures(text) {
        let year = caps
            .get(1)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(today.year());
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%m-%d-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    // Month-day forms take the current year.
    for format in ["%m/%d", "%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{}/{text}", today.year()), &format!("%Y/{format}")) {
            return Some(date);
        }
    }
    None
}

fn parse_weekday(text: &str) -> Option<Weekday> {
    let day = text
        .strip_prefix("周")
        .or_else(|| text.strip_prefix("星期"))
        .or_else(|| text.strip_prefix("礼拜"))?;
    match day {
        "一" => Some(Weekday::Mon),
        "二" => Some(Weekday::Tue),
        "三" => Some(Weekday::Wed),
        "四" => Some(Weekday::Thu),
        "五" => Some(Weekday::Fri),
        "六" => Some(Weekday::Sat),
        "日" | "天" => Some(Weekday::Sun),
        _ => None,
    }
}

/// The next date falling on `weekday`, strictly after today.
fn next_occurrence(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (weekday.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    let ahead = if ahead == 0 { 7 } else { ahead };
    today + Duration::days(ahead)
}

pub fn normalize_time(raw: &str) -> Option<String> {
    let caps = TIME_HM.captures(raw.trim())?;
    let hour: u32 = caps[1].parse().ok()?;
    if hour >= 24 {
        return None;
    }
    let minute: u32 = match caps.get(2).map(|m| m.as_str()) {
        Some("半") => 30,
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    if minute >= 60 {
        return None;
    }
    Some(format!("{hour:02}:{minute:02}"))
}

pub fn normalize_boolean(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "是" | "好" | "好的" | "对" | "要" | "可以" => Some(true),
        "false" | "0" | "no" | "否" | "不要" | "不用" | "不是" | "不" => Some(false),
        _ => None,
    }
}

/// Canonicalize to the 11-digit mainland format; accepts +86/86 prefixes
/// and separator noise.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = digits
        .strip_prefix("0086")
        .or_else(|| digits.strip_prefix("86").filter(|rest| rest.len() == 11))
        .unwrap_or(&digits);
    if digits.len() == 11 && digits.starts_with('1') {
        Some(digits.to_string())
    } else {
        None
    }
}

/// Match against enum options: exact, then case-insensitive, then
/// substring containment. The first option is a last resort only for
/// optional slots.
pub fn normalize_enum(raw: &str, options: &[String], required: bool) -> Option<String> {
    let text = raw.trim();
    if let Some(hit) = options.iter().find(|o| o.as_str() == text) {
        return Some(hit.clone());
    }
    let lower = text.to_lowercase();
    if let Some(hit) = options.iter().find(|o| o.to_lowercase() == lower) {
        return Some(hit.clone());
    }
    if let Some(hit) = options
        .iter()
        .find(|o| lower.contains(&o.to_lowercase()) || o.to_lowercase().contains(&lower))
    {
        return Some(hit.clone());
    }
    if !required {
        return options.first().cloned();
    }
    None
}
