//! Groups and the immutable group directory.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Key/value filter parameters forwarded to the item source for one group.
pub type FetchParams = BTreeMap<String, String>;

/// One named partition of the item universe, processed as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTask {
    pub group_name: String,
    pub group_id: String,
    #[serde(default)]
    pub fetch_params: FetchParams,
}

impl GroupTask {
    pub fn new(group_name: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            group_id: group_id.into(),
            fetch_params: FetchParams::new(),
        }
    }

    pub fn with_fetch_params(mut self, params: FetchParams) -> Self {
        self.fetch_params = params;
        self
    }
}

/// Which groups a run should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSelection {
    All,
    Named(Vec<String>),
}

/// Immutable group-name to group-id lookup, built once per process and
/// shared by reference.
///
/// Names are ordered by their leading number ("3. Summer" before "12. Winter"),
/// with names lacking one sorted last; ties keep name order.
#[derive(Debug, Clone, Default)]
pub struct GroupDirectory {
    ids: HashMap<String, String>,
    ordered: Vec<String>,
}

/// Sort key for group names without a leading number.
const UNNUMBERED_SORT_KEY: u64 = 9999;

fn leading_number(name: &str) -> u64 {
    static LEADING: OnceLock<Regex> = OnceLock::new();
    let re = LEADING.get_or_init(|| Regex::new(r"^(\d+)").expect("static regex"));
    re.captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(UNNUMBERED_SORT_KEY)
}

impl GroupDirectory {
    /// Build a directory from `(name, id)` pairs. Entries with an empty name
    /// or id are dropped; a repeated name keeps its last id.
    pub fn new<I, N, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<String>,
    {
        let mut ids = HashMap::new();
        for (name, id) in entries {
            let (name, id) = (name.into(), id.into());
            if name.is_empty() || id.is_empty() {
                continue;
            }
            ids.insert(name, id);
        }

        let mut ordered: Vec<String> = ids.keys().cloned().collect();
        ordered.sort_by(|a, b| {
            leading_number(a)
                .cmp(&leading_number(b))
                .then_with(|| a.cmp(b))
        });

        Self { ids, ordered }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(|s| s.as_str())
    }

    /// Group names in directory order.
    pub fn names(&self) -> &[String] {
        &self.ordered
    }

    /// Resolve a selection into group tasks sharing `fetch_params`.
    ///
    /// Returns the unknown names as the error so callers can fail fast.
    pub fn resolve(
        &self,
        selection: &GroupSelection,
        fetch_params: &FetchParams,
    ) -> Result<Vec<GroupTask>, Vec<String>> {
        let names: Vec<&String> = match selection {
            GroupSelection::All => self.ordered.iter().collect(),
            GroupSelection::Named(names) => names.iter().collect(),
        };

        let unknown: Vec<String> = names
            .iter()
            .filter(|n| !self.ids.contains_key(n.as_str()))
            .map(|n| n.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(unknown);
        }

        Ok(names
            .into_iter()
            .map(|name| GroupTask {
                group_name: name.clone(),
                group_id: self.ids[name.as_str()].clone(),
                fetch_params: fetch_params.clone(),
            })
            .collect())
    }
}
