/// Where a field's value lives in the detail-page markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    /// First element matching a CSS selector; value is its text.
    Css(&'static str),
    /// First element matching a CSS selector; value is the first non-empty
    /// attribute from the priority list.
    CssAttr {
        selector: &'static str,
        attrs: &'static [&'static str],
    },
    /// Row of the profile table (`table.tmp_profile_tb`) whose `th` label
    /// equals the given text; value is the `td` cell.
    ProfileRow(&'static str),
    /// Content section `h3.stress#TABLE_OF_CONTENT{n} + p.txt`.
    ContentSection(u8),
}

/// How a located fragment becomes the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Plain text, block-level line structure preserved.
    Text,
    /// Medicine name with trailing parenthetical qualifiers stripped.
    CleanName,
    /// Leading color token ("하양" from "하양, 분할선 있음").
    ColorToken,
    /// Dimension token ("장축 : 11.0" style values must contain a number).
    SizeToken,
    /// Identification marks with whitespace runs collapsed.
    Identification,
    /// Inner HTML kept intact (tables, lists, line breaks), script/style
    /// elements removed.
    PreserveHtml,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub key: &'static str,
    pub label: &'static str,
    pub locator: Locator,
    pub transform: Transform,
}

/// The fixed, ordered field schema. Every record reports on exactly these
/// fields in exactly this order.
pub const SCHEMA: &[FieldRule] = &[
    FieldRule {
        key: "name_ko",
        label: "약품명(한글명)",
        locator: Locator::Css("div.headword_title > h2.headword"),
        transform: Transform::CleanName,
    },
    FieldRule {
        key: "name_en",
        label: "약품명(영문명)",
        locator: Locator::Css("div.headword_title > p.word > span.word_txt"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "image_url",
        label: "이미지",
        locator: Locator::CssAttr {
            selector: "span.img_box a img",
            attrs: &["origin_src", "src", "data-src"],
        },
        transform: Transform::Text,
    },
    FieldRule {
        key: "category",
        label: "분류",
        locator: Locator::ProfileRow("분류"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "type",
        label: "구분",
        locator: Locator::ProfileRow("구분"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "company",
        label: "업체명",
        locator: Locator::ProfileRow("업체명"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "insurance_code",
        label: "보험코드",
        locator: Locator::ProfileRow("보험코드"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "appearance",
        label: "성상",
        locator: Locator::ProfileRow("성상"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "formulation",
        label: "제형",
        locator: Locator::ProfileRow("제형"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "shape",
        label: "모양",
        locator: Locator::ProfileRow("모양"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "color",
        label: "색깔",
        locator: Locator::ProfileRow("색깔"),
        transform: Transform::ColorToken,
    },
    FieldRule {
        key: "size",
        label: "크기",
        locator: Locator::ProfileRow("크기"),
        transform: Transform::SizeToken,
    },
    FieldRule {
        key: "identification",
        label: "식별표기",
        locator: Locator::ProfileRow("식별표기"),
        transform: Transform::Identification,
    },
    FieldRule {
        key: "dividing_line",
        label: "분할선",
        locator: Locator::ProfileRow("분할선"),
        transform: Transform::Text,
    },
    FieldRule {
        key: "ingredient_info",
        label: "성분정보",
        locator: Locator::ContentSection(1),
        transform: Transform::Text,
    },
    FieldRule {
        key: "storage_method",
        label: "저장방법",
        locator: Locator::ContentSection(4),
        transform: Transform::Text,
    },
    FieldRule {
        key: "usage_period",
        label: "사용기간",
        locator: Locator::ContentSection(5),
        transform: Transform::Text,
    },
    FieldRule {
        key: "detailed_effectiveness",
        label: "효능효과",
        locator: Locator::ContentSection(2),
        transform: Transform::PreserveHtml,
    },
    FieldRule {
        key: "detailed_dosage",
        label: "용법용량",
        locator: Locator::ContentSection(3),
        transform: Transform::PreserveHtml,
    },
    FieldRule {
        key: "detailed_precautions",
        label: "사용상의주의사항",
        locator: Locator::ContentSection(6),
        transform: Transform::PreserveHtml,
    },
    FieldRule {
        key: "detailed_professional_precautions",
        label: "사용상의주의사항(전문가)",
        locator: Locator::ContentSection(7),
        transform: Transform::PreserveHtml,
    },
];

pub fn label_for(key: &str) -> &'static str {
    SCHEMA
        .iter()
        .find(|r| r.key == key)
        .map(|r| r.label)
        .unwrap_or("")
}

// ── Tests ──
