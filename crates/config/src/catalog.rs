//! Intent catalog loading
//!
//! The catalog file is YAML: a list of intents with slots, dependency
//! edges and inheritance rules. Loading performs structural validation
//! (unique slot names, edges and rules referencing known slots, thresholds
//! in range); graph-level checks (cycles) happen at registration in the
//! engine. A successful load yields an immutable [`Catalog`] snapshot.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use task_router_core::{
    Catalog, DependencyEdge, DependencyKind, EdgeCondition, InheritSource, InheritStrategy,
    InheritanceRule, IntentDef, SlotDef, SlotKind, SlotValidation,
};

use crate::ConfigError;

/// On-disk catalog shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub version: u64,
    pub intents: Vec<IntentDef>,
}

/// Load and validate a catalog from a YAML file.
pub fn load_catalog(path: &Path, version: u64) -> Result<Catalog, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
    load_catalog_str(&raw, version)
}

/// Load and validate a catalog from YAML text.
pub fn load_catalog_str(raw: &str, version: u64) -> Result<Catalog, ConfigError> {
    let file: CatalogFile =
        serde_yaml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_intents(&file.intents)?;
    Ok(Catalog::new(file.intents, version))
}

fn validate_intents(intents: &[IntentDef]) -> Result<(), ConfigError> {
    let mut intent_names = HashSet::new();
    for intent in intents {
        if !intent_names.insert(intent.name.as_str()) {
            return Err(ConfigError::InvalidCatalog(format!(
                "duplicate intent '{}'",
                intent.name
            )));
        }
        if !(0.0..=1.0).contains(&intent.confidence_threshold) {
            return Err(ConfigError::InvalidCatalog(format!(
                "intent '{}': confidence_threshold must be within [0, 1]",
                intent.name
            )));
        }
        if intent.function_name.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "intent '{}': function_name",
                intent.name
            )));
        }

        let mut slot_names = HashSet::new();
        for slot in &intent.slots {
            if !slot_names.insert(slot.name.as_str()) {
                return Err(ConfigError::InvalidCatalog(format!(
                    "intent '{}': duplicate slot '{}'",
                    intent.name, slot.name
                )));
            }
            if slot.kind == SlotKind::Enum && slot.validation.options.is_empty() {
                return Err(ConfigError::InvalidCatalog(format!(
                    "intent '{}': enum slot '{}' has no options",
                    intent.name, slot.name
                )));
            }
        }

        for edge in &intent.dependencies {
            for endpoint in [&edge.from, &edge.to] {
                if !slot_names.contains(endpoint.as_str()) {
                    return Err(ConfigError::InvalidCatalog(format!(
                        "intent '{}': dependency references unknown slot '{endpoint}'",
                        intent.name
                    )));
                }
            }
            if matches!(edge.kind, DependencyKind::GroupAny | DependencyKind::GroupAll)
                && edge.group.is_none()
            {
                return Err(ConfigError::InvalidCatalog(format!(
                    "intent '{}': group edge {} -> {} has no group name",
                    intent.name, edge.from, edge.to
                )));
            }
            if edge.kind == DependencyKind::Computed && edge.transform.is_none() {
                return Err(ConfigError::InvalidCatalog(format!(
                    "intent '{}': computed edge {} -> {} has no transform",
                    intent.name, edge.from, edge.to
                )));
            }
        }

        for rule in &intent.inheritance {
            if !slot_names.contains(rule.target_slot.as_str()) {
                return Err(ConfigError::InvalidCatalog(format!(
                    "intent '{}': inheritance rule targets unknown slot '{}'",
                    intent.name, rule.target_slot
                )));
            }
            if rule.source == InheritSource::Default && rule.default_value.is_none() {
                return Err(ConfigError::InvalidCatalog(format!(
                    "intent '{}': default rule for '{}' has no default_value",
                    intent.name, rule.target_slot
                )));
            }
        }
    }
    Ok(())
}

fn city_slot(name: &str, display: &str, sort_order: i32) -> SlotDef {
    SlotDef::new(name, display, SlotKind::Text)
        .required()
        .with_validation(SlotValidation {
            min_length: Some(2),
            max_length: Some(20),
            ..Default::default()
        })
        .with_sort_order(sort_order)
}

/// The shipped default catalog: flight/train/movie booking plus balance
/// check. Deployments replace it with their own file; tests and the dev
/// server run against this one.
pub fn default_catalog(version: u64) -> Catalog {
    let book_flight = IntentDef {
        name: "book_flight".to_string(),
        display_name: "订机票".to_string(),
        description: Some("预订国内航班机票".to_string()),
        confidence_threshold: 0.7,
        slots: vec![
            city_slot("departure_city", "出发城市", 0).with_examples(vec![
                "北京".to_string(),
                "上海".to_string(),
                "广州".to_string(),
            ]),
            city_slot("arrival_city", "到达城市", 1)
                .with_prompt("请问您要到哪个城市？".to_string()),
            SlotDef::new("departure_date", "出发日期", SlotKind::Date)
                .required()
                .with_validation(SlotValidation {
                    min_date: Some("today".to_string()),
                    ..Default::default()
                })
                .with_prompt("您计划什么时候出发？（如：明天、周五、2026-08-15）".to_string())
                .with_sort_order(2),
            SlotDef::new("return_date", "返程日期", SlotKind::Date)
                .with_validation(SlotValidation {
                    min_date: Some("today".to_string()),
                    ..Default::default()
                })
                .with_sort_order(3),
            SlotDef::new("passenger_count", "乘客人数", SlotKind::Number)
                .with_validation(SlotValidation {
                    min: Some(1.0),
                    max: Some(9.0),
                    ..Default::default()
                })
                .with_sort_order(4),
            SlotDef::new("seat_class", "舱位", SlotKind::Enum)
                .with_validation(SlotValidation {
                    options: vec!["经济舱".to_string(), "商务舱".to_string(), "头等舱".to_string()],
                    ..Default::default()
                })
                .with_sort_order(5),
        ],
        dependencies: vec![
            DependencyEdge::new("departure_city", "arrival_city", DependencyKind::Required)
                .with_priority(10),
            DependencyEdge::new("departure_date", "return_date", DependencyKind::Temporal),
        ],
        inheritance: vec![
            InheritanceRule {
                source_slot: "departure_city".to_string(),
                target_slot: "departure_city".to_string(),
                source: InheritSource::Conversation,
                strategy: InheritStrategy::Supplement,
                condition: None,
                transform: None,
                default_value: None,
                priority: 10,
            },
            InheritanceRule {
                source_slot: "home_city".to_string(),
                target_slot: "departure_city".to_string(),
                source: InheritSource::UserProfile,
                strategy: InheritStrategy::Supplement,
                condition: None,
                transform: None,
                default_value: None,
                priority: 5,
            },
            InheritanceRule {
                source_slot: "passenger_count".to_string(),
                target_slot: "passenger_count".to_string(),
                source: InheritSource::Default,
                strategy: InheritStrategy::Supplement,
                condition: None,
                transform: None,
                default_value: Some("1".to_string()),
                priority: 0,
            },
        ],
        examples: vec![
            "我想订机票".to_string(),
            "帮我订一张机票".to_string(),
            "我要订从北京到上海的机票".to_string(),
            "买张飞机票".to_string(),
        ],
        function_name: "flight_booking".to_string(),
        reply_template: Some(
            "已为您预订{departure_date}从{departure_city}到{arrival_city}的机票，订单号{order_id}。"
                .to_string(),
        ),
    };

    let book_train = IntentDef {
        name: "book_train".to_string(),
        display_name: "订火车票".to_string(),
        description: Some("预订火车票".to_string()),
        confidence_threshold: 0.7,
        slots: vec![
            city_slot("departure_city", "出发城市", 0),
            city_slot("arrival_city", "到达城市", 1),
            SlotDef::new("departure_date", "出发日期", SlotKind::Date)
                .required()
                .with_validation(SlotValidation {
                    min_date: Some("today".to_string()),
                    ..Default::default()
                })
                .with_sort_order(2),
            SlotDef::new("seat_type", "座位类型", SlotKind::Enum)
                .with_validation(SlotValidation {
                    options: vec![
                        "二等座".to_string(),
                        "一等座".to_string(),
                        "商务座".to_string(),
                        "硬卧".to_string(),
                    ],
                    ..Default::default()
                })
                .with_sort_order(3),
        ],
        dependencies: vec![DependencyEdge::new(
            "departure_city",
            "arrival_city",
            DependencyKind::Required,
        )],
        inheritance: Vec::new(),
        examples: vec![
            "我想订火车票".to_string(),
            "买张高铁票".to_string(),
            "帮我订一张去上海的火车票".to_string(),
        ],
        function_name: "train_booking".to_string(),
        reply_template: None,
    };

    let book_movie = IntentDef {
        name: "book_movie".to_string(),
        display_name: "订电影票".to_string(),
        description: Some("预订电影票".to_string()),
        confidence_threshold: 0.7,
        slots: vec![
            SlotDef::new("movie_name", "电影名称", SlotKind::Text).required(),
            SlotDef::new("show_date", "观影日期", SlotKind::Date).required(),
            SlotDef::new("ticket_count", "票数", SlotKind::Number).with_validation(
                SlotValidation {
                    min: Some(1.0),
                    max: Some(10.0),
                    ..Default::default()
                },
            ),
        ],
        dependencies: Vec::new(),
        inheritance: Vec::new(),
        examples: vec!["我想看电影".to_string(), "订两张电影票".to_string()],
        function_name: "movie_booking".to_string(),
        reply_template: None,
    };

    let check_balance = IntentDef {
        name: "check_balance".to_string(),
        display_name: "查询余额".to_string(),
        description: Some("查询银行卡余额".to_string()),
        confidence_threshold: 0.65,
        slots: vec![SlotDef::new("card_number", "银行卡号", SlotKind::Text)
            .required()
            .with_validation(SlotValidation {
                pattern: Some(r"^\d{16,19}$".to_string()),
                pattern_message: Some("银行卡号应为16到19位数字".to_string()),
                ..Default::default()
            })
            .with_prompt("请提供您的银行卡号进行余额查询：".to_string())],
        dependencies: Vec::new(),
        inheritance: vec![InheritanceRule {
            source_slot: "card_number".to_string(),
            target_slot: "card_number".to_string(),
            source: InheritSource::UserProfile,
            strategy: InheritStrategy::Supplement,
            condition: None,
            transform: None,
            default_value: None,
            priority: 5,
        }],
        examples: vec![
            "查询余额".to_string(),
            "我的卡里还有多少钱".to_string(),
            "查下银行卡余额".to_string(),
        ],
        function_name: "balance_inquiry".to_string(),
        reply_template: Some("您的账户余额为{balance}元。".to_string()),
    };

    Catalog::new(vec![book_flight, book_train, book_movie, check_balance], version)
}
