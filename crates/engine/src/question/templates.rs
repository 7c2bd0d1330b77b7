//! Question template library
//!
//! Per (slot kind, question kind) template sets in the three house
//! styles. `{display_name}`, `{examples}` and `{options}` expand against
//! the target slot definition.

use once_cell::sync::Lazy;

use task_router_core::{QuestionKind, SlotDef, SlotKind};

use super::QuestionStyle;

#[derive(Debug, Clone)]
pub struct QuestionTemplate {
    pub text: &'static str,
    pub kind: QuestionKind,
    pub style: QuestionStyle,
    /// Higher wins the confidence component of scoring.
    pub priority: i32,
}

const fn template(
    text: &'static str,
    kind: QuestionKind,
    style: QuestionStyle,
    priority: i32,
) -> QuestionTemplate {
    QuestionTemplate {
        text,
        kind,
        style,
        priority,
    }
}

static GENERIC: Lazy<Vec<QuestionTemplate>> = Lazy::new(|| {
    vec![
        template("请问{display_name}是什么？", QuestionKind::Direct, QuestionStyle::Friendly, 2),
        template("请提供{display_name}：", QuestionKind::Direct, QuestionStyle::Concise, 1),
        template(
            "请问{display_name}是什么？{examples}",
            QuestionKind::Suggestion,
            QuestionStyle::Detailed,
            1,
        ),
        template(
            "麻烦再说明一下{display_name}，刚才没有识别出来。{examples}",
            QuestionKind::Clarification,
            QuestionStyle::Detailed,
            1,
        ),
        template(
            "您是说{display_name}没有变化，对吗？",
            QuestionKind::Confirmation,
            QuestionStyle::Friendly,
            0,
        ),
    ]
});

static DATE: Lazy<Vec<QuestionTemplate>> = Lazy::new(|| {
    vec![
        template(
            "您计划的{display_name}是哪天？（如：明天、周五、2026-08-15）",
            QuestionKind::Direct,
            QuestionStyle::Detailed,
            3,
        ),
        template("{display_name}是哪天？", QuestionKind::Direct, QuestionStyle::Concise, 2),
        template(
            "请问{display_name}定在什么时候？",
            QuestionKind::Direct,
            QuestionStyle::Friendly,
            2,
        ),
        template(
            "{display_name}还没有确认，方便再说一次日期吗？",
            QuestionKind::Clarification,
            QuestionStyle::Friendly,
            1,
        ),
    ]
});

static NUMBER: Lazy<Vec<QuestionTemplate>> = Lazy::new(|| {
    vec![
        template("请问{display_name}是多少？", QuestionKind::Direct, QuestionStyle::Friendly, 2),
        template("{display_name}？", QuestionKind::Direct, QuestionStyle::Concise, 1),
        template(
            "请告诉我{display_name}，输入数字即可。",
            QuestionKind::Direct,
            QuestionStyle::Detailed,
            1,
        ),
    ]
});

static ENUM: Lazy<Vec<QuestionTemplate>> = Lazy::new(|| {
    vec![
        template(
            "请选择{display_name}：{options}",
            QuestionKind::Choice,
            QuestionStyle::Detailed,
            3,
        ),
        template("{display_name}选哪种？{options}", QuestionKind::Choice, QuestionStyle::Concise, 2),
        template(
            "您偏好哪种{display_name}？{options}",
            QuestionKind::Choice,
            QuestionStyle::Friendly,
            2,
        ),
    ]
});

static BOOLEAN: Lazy<Vec<QuestionTemplate>> = Lazy::new(|| {
    vec![
        template("需要{display_name}吗？", QuestionKind::Confirmation, QuestionStyle::Friendly, 2),
        template("{display_name}：是/否？", QuestionKind::Confirmation, QuestionStyle::Concise, 1),
    ]
});

static CONTACT: Lazy<Vec<QuestionTemplate>> = Lazy::new(|| {
    vec![
        template(
            "请提供您的{display_name}：",
            QuestionKind::Direct,
            QuestionStyle::Professional,
            2,
        ),
        template(
            "为了继续办理，需要您的{display_name}，请放心，信息仅用于本次服务。",
            QuestionKind::Direct,
            QuestionStyle::Friendly,
            1,
        ),
    ]
});

/// Templates applicable to a slot kind.
pub fn for_slot(def: &SlotDef) -> &'static [QuestionTemplate] {
    match def.kind {
        SlotKind::Date | SlotKind::Time => &DATE,
        SlotKind::Number => &NUMBER,
        SlotKind::Enum => &ENUM,
        SlotKind::Boolean => &BOOLEAN,
        SlotKind::Phone | SlotKind::Email => &CONTACT,
        SlotKind::Text | SlotKind::Entity => &GENERIC,
    }
}

/// Expand a template (or a slot's own `prompt_template`) against the
/// definition.
pub fn expand(text: &str, def: &SlotDef) -> String {
    let examples = if def.examples.is_empty() {
        String::new()
    } else {
        format!("（例如：{}）", def.examples.join("、"))
    };
    let options = def
        .validation
        .options
        .iter()
        .enumerate()
        .map(|(i, option)| format!("{}. {option}", i + 1))
        .collect::<Vec<_>>()
        .join("  ");
    text.replace("{display_name}", &def.display_name)
        .replace("{examples}", &examples)
        .replace("{options}", &options)
        .trim()
        .to_string()
}
