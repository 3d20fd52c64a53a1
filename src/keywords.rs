use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::info;

use crate::record::Record;

static CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.*?)\](.*)").unwrap());
static COMPANY_NOISE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(주\)|\(유\)|주식회사|약품|제약").unwrap());
static INGREDIENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([가-힣a-zA-Z\-]+)(?:\s*[\d\.,]+\s*(?:mg|g|ml|IU|mcg))?").unwrap()
});

pub const DEFAULT_KEYWORDS: &[&str] = &["소화제", "항생제", "진통제", "고혈압약", "당뇨병약"];

const MAX_DISCOVERED_PER_RECORD: usize = 10;

/// Ordered search-term queue backed by two files: `todo.txt` is the
/// append-only ordered queue (append-only so checkpoint indices stay stable
/// across runs), `done.txt` the completed set.
pub struct KeywordQueue {
    todo_path: PathBuf,
    done_path: PathBuf,
    todo: Vec<String>,
    done: HashSet<String>,
    known: HashSet<String>,
}

impl KeywordQueue {
    /// Open (and if absent, seed) the keyword files under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating keyword dir {}", dir.display()))?;
        let todo_path = dir.join("todo.txt");
        let done_path = dir.join("done.txt");

        if !todo_path.exists() {
            let seed: String = DEFAULT_KEYWORDS
                .iter()
                .map(|k| format!("{k}\n"))
                .collect();
            fs::write(&todo_path, seed)?;
            info!("seeded default keyword list: {}", todo_path.display());
        }

        let todo = read_lines(&todo_path)?;
        let done: HashSet<String> = if done_path.exists() {
            read_lines(&done_path)?.into_iter().collect()
        } else {
            HashSet::new()
        };
        let known: HashSet<String> = todo.iter().cloned().chain(done.iter().cloned()).collect();

        info!("keywords loaded: {} queued, {} done", todo.len(), done.len());
        Ok(Self {
            todo_path,
            done_path,
            todo,
            done,
            known,
        })
    }

    pub fn len(&self) -> usize {
        self.todo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.todo.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.todo.get(index).map(String::as_str)
    }

    pub fn is_done(&self, keyword: &str) -> bool {
        self.done.contains(keyword)
    }

    /// Append newly-discovered keywords to the queue. Duplicates of queued
    /// or completed keywords are dropped. Returns how many were added.
    pub fn add_discovered<I>(&mut self, keywords: I) -> Result<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.todo_path)?;
        for kw in keywords {
            let kw = kw.trim().to_string();
            if kw.is_empty() || self.known.contains(&kw) {
                continue;
            }
            writeln!(file, "{kw}")?;
            self.known.insert(kw.clone());
            self.todo.push(kw);
            added += 1;
        }
        Ok(added)
    }

    pub fn mark_done(&mut self, keyword: &str) -> Result<()> {
        if self.done.insert(keyword.to_string()) {
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.done_path)?;
            writeln!(f, "{keyword}")?;
        }
        Ok(())
    }
}

/// Pull follow-up search terms out of a committed record: the category name
/// (bracket code stripped), the company name (corporate suffixes stripped)
/// and ingredient tokens.
pub fn discover(record: &Record) -> Vec<String> {
    let field = |key: &str| -> Option<&str> {
        record
            .fields
            .iter()
            .find(|f| f.name == key)
            .and_then(|f| f.value.as_deref())
    };

    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    if let Some(category) = field("category") {
        if let Some(caps) = CATEGORY_RE.captures(category) {
            push_keyword(&mut out, &mut seen, caps[2].trim().to_string());
        }
    }
    if let Some(company) = field("company") {
        let cleaned = COMPANY_NOISE_RE.replace_all(company, "").trim().to_string();
        push_keyword(&mut out, &mut seen, cleaned);
    }
    if let Some(ingredients) = field("ingredient_info") {
        for caps in INGREDIENT_RE.captures_iter(ingredients) {
            if out.len() >= MAX_DISCOVERED_PER_RECORD {
                break;
            }
            push_keyword(&mut out, &mut seen, caps[1].trim().to_string());
        }
    }
    out.truncate(MAX_DISCOVERED_PER_RECORD);
    out
}

fn push_keyword(out: &mut Vec<String>, seen: &mut HashSet<String>, kw: String) {
    // Single-character tokens are too noisy to search on.
    if kw.chars().count() > 1 && seen.insert(kw.clone()) {
        out.push(kw);
    }
}

fn read_lines(path: &PathBuf) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

// ── Tests ──
