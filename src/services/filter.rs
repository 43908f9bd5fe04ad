//! Exclusion list and per-group limit applied to a fetched group.

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{Item, ItemId};

/// Collapse internal whitespace runs to a single space and trim.
pub fn normalize_name(name: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    re.replace_all(name.trim(), " ").into_owned()
}

/// Prefix marking an exclusion-file line as an item id instead of a name.
const ID_PREFIX: &str = "id:";

/// Items the operator asked to leave alone, matched by normalised name or id.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    names: HashSet<String>,
    ids: HashSet<ItemId>,
}

/// Result of filtering one group's items.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Filtered {
    /// Items to process, in fetch order.
    pub kept: Vec<Item>,
    /// Items matched by the exclusion list.
    pub excluded: Vec<Item>,
    /// Items dropped by the limit after exclusion.
    pub over_limit: usize,
}

impl Filtered {
    /// Items that will not be processed for any reason.
    pub fn skipped(&self) -> usize {
        self.excluded.len() + self.over_limit
    }
}

impl ExclusionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from product names. Names that normalise to nothing are ignored.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for name in names {
            filter.add_name(name.as_ref());
        }
        filter
    }

    /// Parse an exclusion list: one product name per line, `id:<id>` lines
    /// exclude by id, blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Self {
        let mut filter = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.strip_prefix(ID_PREFIX) {
                Some(id) => filter.add_id(id.trim()),
                None => filter.add_name(line),
            }
        }
        filter
    }

    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::parse(&tokio::fs::read_to_string(path).await?))
    }

    pub fn add_name(&mut self, name: &str) {
        let normalized = normalize_name(name);
        if !normalized.is_empty() {
            self.names.insert(normalized);
        }
    }

    pub fn add_id(&mut self, id: &str) {
        if !id.is_empty() {
            self.ids.insert(ItemId::from(id));
        }
    }

    pub fn len(&self) -> usize {
        self.names.len() + self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.ids.is_empty()
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.ids.contains(&item.id) || self.names.contains(&normalize_name(&item.name))
    }

    /// Split `items` into kept and excluded, then cap the kept side at `limit`.
    pub fn apply(&self, items: Vec<Item>, limit: Option<usize>) -> Filtered {
        let (excluded, mut kept): (Vec<Item>, Vec<Item>) =
            items.into_iter().partition(|item| self.matches(item));

        let mut over_limit = 0;
        if let Some(limit) = limit {
            if kept.len() > limit {
                over_limit = kept.len() - limit;
                kept.truncate(limit);
            }
        }

        Filtered {
            kept,
            excluded,
            over_limit,
        }
    }
}
