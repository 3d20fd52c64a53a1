use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::record::{FieldResult, FieldStatus};
use crate::schema::{FieldRule, Locator, Transform, SCHEMA};

static PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\([^)]*\)\s*").unwrap());
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static ANY_WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Run every schema rule against the markup independently. Always returns
/// one result per schema field, in schema order; a rule that blows up on a
/// malformed fragment degrades to `Error` without affecting its neighbors.
pub fn extract(markup: &str) -> Vec<FieldResult> {
    let doc = Html::parse_document(markup);
    SCHEMA.iter().map(|rule| extract_field(&doc, rule)).collect()
}

fn extract_field(doc: &Html, rule: &FieldRule) -> FieldResult {
    let (value, status) = match locate(doc, rule) {
        Ok(None) => (None, FieldStatus::Missing),
        Ok(Some(found)) => match transform(rule.transform, found) {
            Ok(v) if !v.is_empty() => (Some(v), FieldStatus::Success),
            Ok(_) => (None, FieldStatus::Missing),
            Err(fragment) => {
                debug!("field {} failed on fragment: {}", rule.key, fragment);
                (None, FieldStatus::Error)
            }
        },
        Err(reason) => {
            debug!("field {} locator error: {}", rule.key, reason);
            (None, FieldStatus::Error)
        }
    };
    FieldResult {
        name: rule.key.to_string(),
        value,
        status,
    }
}

/// What a locator produced: a markup element to transform, or a value
/// lifted straight out of an attribute.
enum Found<'a> {
    Element(ElementRef<'a>),
    Value(String),
}

fn locate<'a>(doc: &'a Html, rule: &FieldRule) -> Result<Option<Found<'a>>, String> {
    match rule.locator {
        Locator::Css(css) => {
            let sel = Selector::parse(css).map_err(|e| e.to_string())?;
            Ok(doc.select(&sel).next().map(Found::Element))
        }
        Locator::CssAttr { selector, attrs } => {
            let sel = Selector::parse(selector).map_err(|e| e.to_string())?;
            match doc.select(&sel).next() {
                None => Ok(None),
                Some(el) => {
                    let value = attrs
                        .iter()
                        .find_map(|a| el.value().attr(a))
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty());
                    match value {
                        Some(v) => Ok(Some(Found::Value(v))),
                        // Element present but none of the expected attributes:
                        // malformed fragment, not absent structure.
                        None => Err(format!("{selector}: no usable attribute")),
                    }
                }
            }
        }
        Locator::ProfileRow(label) => {
            let row_sel = Selector::parse("table.tmp_profile_tb tr").map_err(|e| e.to_string())?;
            let th_sel = Selector::parse("th").map_err(|e| e.to_string())?;
            let td_sel = Selector::parse("td").map_err(|e| e.to_string())?;
            for row in doc.select(&row_sel) {
                let matches = row
                    .select(&th_sel)
                    .next()
                    .map(|th| block_text(th).trim() == label)
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
                return match row.select(&td_sel).next() {
                    Some(td) => Ok(Some(Found::Element(td))),
                    None => Err(format!("profile row '{label}' has no value cell")),
                };
            }
            Ok(None)
        }
        Locator::ContentSection(n) => {
            let css = format!("h3.stress#TABLE_OF_CONTENT{n} + p.txt");
            let sel = Selector::parse(&css).map_err(|e| e.to_string())?;
            Ok(doc.select(&sel).next().map(Found::Element))
        }
    }
}

fn transform(kind: Transform, found: Found<'_>) -> Result<String, String> {
    let el = match found {
        Found::Value(v) => return Ok(v),
        Found::Element(el) => el,
    };
    match kind {
        Transform::Text => Ok(block_text(el)),
        Transform::CleanName => {
            let text = block_text(el);
            let cleaned = PAREN_RE
                .split(&text)
                .map(str::trim)
                .find(|s| !s.is_empty())
                .unwrap_or("")
                .to_string();
            if cleaned.is_empty() && !text.is_empty() {
                Err(text)
            } else {
                Ok(cleaned)
            }
        }
        Transform::ColorToken => {
            let text = block_text(el);
            match text.split(',').next().map(str::trim) {
                Some(tok) if !tok.is_empty() => Ok(tok.to_string()),
                _ => Err(text),
            }
        }
        Transform::SizeToken => {
            let text = ANY_WS_RE.replace_all(&block_text(el), " ").trim().to_string();
            if text.is_empty() {
                Ok(text)
            } else if text.chars().any(|c| c.is_ascii_digit()) {
                Ok(text)
            } else {
                Err(text)
            }
        }
        Transform::Identification => {
            Ok(ANY_WS_RE.replace_all(&block_text(el), " ").trim().to_string())
        }
        Transform::PreserveHtml => {
            let html = SCRIPT_RE.replace_all(&el.inner_html(), "").trim().to_string();
            Ok(html)
        }
    }
}

/// Element text with block structure kept: <br> and block-element
/// boundaries become newlines instead of being collapsed away.
fn block_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(el, &mut out);
    let collapsed = SPACES_RE.replace_all(&out, " ");
    let lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    BLANKS_RE.replace_all(&joined, "\n\n").trim().to_string()
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            scraper::Node::Text(t) => out.push_str(&t.text),
            scraper::Node::Element(e) => match e.name() {
                "br" => out.push('\n'),
                "script" | "style" => {}
                name => {
                    if let Some(inner) = ElementRef::wrap(child) {
                        collect_text(inner, out);
                    }
                    if matches!(name, "p" | "div" | "li" | "tr" | "ul" | "ol" | "table") {
                        out.push('\n');
                    }
                }
            },
            _ => {}
        }
    }
}

// ── Tests ──
