//! Two-way merge of the YAML and CSV representations.
//!
//! Both trees are walked level by level (policy, group, collection, rule) and
//! siblings are matched by name. Differences and deletions are conflicts and
//! are resolved all-or-nothing in favour of one side; entities that only one
//! side has and that the previous sync never saw are new and always kept.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{ConflictError, Error};
use crate::model::{Policy, PolicySet, Rule, RuleCollection, RuleCollectionGroup};

/// One side of the synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yaml,
    Csv,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Side::Yaml => Side::Csv,
            Side::Csv => Side::Yaml,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Yaml => "YAML",
            Side::Csv => "CSV",
        })
    }
}

/// How conflicts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The YAML policies win.
    Policies,
    /// The CSV files win.
    Csv,
    /// Abort with a [`ConflictError`].
    Cancel,
    /// The side modified last wins; undecidable ties abort like `Cancel`.
    Newest,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::Policies,
        Resolution::Csv,
        Resolution::Cancel,
        Resolution::Newest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Policies => "policies",
            Resolution::Csv => "csv",
            Resolution::Cancel => "cancel",
            Resolution::Newest => "newest",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown resolution '{s}' (expected policies, csv, cancel or newest)"))
    }
}

/// Policies read from one representation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub policies: Vec<Policy>,
    /// Latest modification time of the files the policies came from.
    pub modified: Option<SystemTime>,
}

impl Snapshot {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self {
            policies,
            modified: None,
        }
    }

    pub fn modified_at(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// Entity identities recorded at the previous successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Baseline {
    pub identities: BTreeSet<String>,
}

impl Baseline {
    pub fn from_policies(policies: &[Policy]) -> Self {
        Self {
            identities: identities(policies),
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }
}

/// Slash-separated identity of every policy, group, collection and rule.
pub fn identities(policies: &[Policy]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for policy in policies {
        out.insert(policy.name.clone());
        for group in &policy.rule_collection_groups {
            let group_id = format!("{}/{}", policy.name, group.name);
            for collection in &group.rule_collections {
                let collection_id = format!("{group_id}/{}", collection.name);
                for rule in &collection.rules {
                    out.insert(format!("{collection_id}/{}", rule.name()));
                }
                out.insert(collection_id);
            }
            out.insert(group_id);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides have the entity with different values in these fields.
    Modified(Vec<String>),
    /// The entity was known at the last sync and is now missing on `side`.
    Deleted { side: Side },
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Modified(fields) => write!(f, "modified: {}", fields.join(", ")),
            ConflictKind::Deleted { side } => write!(f, "deleted in {side}"),
        }
    }
}

/// A diverging entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub identity: String,
    pub kind: ConflictKind,
}

/// Result of a successful synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Merged and validated policies in the winning side's order.
    pub policies: Vec<Policy>,
    /// Every conflict found, including the resolved ones.
    pub conflicts: Vec<Conflict>,
    /// Side that won the conflicts, if there were any.
    pub winner: Option<Side>,
    /// New entities adopted from one side.
    pub added: Vec<(Side, String)>,
    /// Whether the merged policies differ from the YAML input.
    pub yaml_changed: bool,
    /// Whether the merged policies differ from the CSV input.
    pub csv_changed: bool,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        !self.yaml_changed && !self.csv_changed
    }
}

/// Merge the YAML and CSV snapshots.
///
/// Fails with [`Error::Conflict`] when conflicts exist and `mode` cannot pick
/// a winner, and with [`Error::Validation`] when the merged policies break a
/// model invariant.
pub fn synchronize(
    yaml: Snapshot,
    csv: Snapshot,
    baseline: Option<&Baseline>,
    mode: Resolution,
) -> Result<SyncOutcome, Error> {
    let winner = match mode {
        Resolution::Policies => Some(Side::Yaml),
        Resolution::Csv => Some(Side::Csv),
        Resolution::Cancel => None,
        Resolution::Newest => match (yaml.modified, csv.modified) {
            (Some(y), Some(c)) if y > c => Some(Side::Yaml),
            (Some(y), Some(c)) if c > y => Some(Side::Csv),
            _ => None,
        },
    };

    // Without a winner the merge runs YAML-first only to collect conflicts.
    let primary = winner.unwrap_or(Side::Yaml);
    let (winning, losing) = match primary {
        Side::Yaml => (&yaml.policies, &csv.policies),
        Side::Csv => (&csv.policies, &yaml.policies),
    };
    let mut merger = Merger {
        baseline,
        winner: primary,
        conflicts: Vec::new(),
        added: Vec::new(),
    };
    let merged = merger.list(winning, losing, "", |p: &Policy| p.name.as_str(), Merger::policy);

    if !merger.conflicts.is_empty() && winner.is_none() {
        return Err(ConflictError {
            conflicts: merger.conflicts,
        }
        .into());
    }

    let set = PolicySet::new(merged)?;
    let yaml_changed = !same_policies(set.policies(), &yaml.policies);
    let csv_changed = !same_policies(set.policies(), &csv.policies);
    Ok(SyncOutcome {
        winner: winner.filter(|_| !merger.conflicts.is_empty()),
        policies: set.into_policies(),
        conflicts: merger.conflicts,
        added: merger.added,
        yaml_changed,
        csv_changed,
    })
}

fn same_policies(a: &[Policy], b: &[Policy]) -> bool {
    let index = |policies: &[Policy]| -> BTreeMap<String, Policy> {
        policies.iter().map(|p| (p.name.clone(), p.clone())).collect()
    };
    a.len() == b.len() && index(a) == index(b)
}

struct Merger<'a> {
    baseline: Option<&'a Baseline>,
    winner: Side,
    conflicts: Vec<Conflict>,
    added: Vec<(Side, String)>,
}

impl Merger<'_> {
    fn known(&self, identity: &str) -> bool {
        self.baseline.is_some_and(|b| b.contains(identity))
    }

    /// Merge two sibling lists. The result follows the winner's order; new
    /// entities of the loser are placed after their nearest preceding sibling.
    fn list<T, K, M>(
        &mut self,
        winning: &[T],
        losing: &[T],
        parent: &str,
        key: K,
        merge: M,
    ) -> Vec<T>
    where
        T: Clone,
        K: Fn(&T) -> &str,
        M: Fn(&mut Self, &T, &T, &str) -> T,
    {
        let identity = |name: &str| {
            if parent.is_empty() {
                name.to_string()
            } else {
                format!("{parent}/{name}")
            }
        };

        let mut out: Vec<T> = Vec::with_capacity(winning.len().max(losing.len()));
        for item in winning {
            let id = identity(key(item));
            match losing.iter().find(|other| key(other) == key(item)) {
                Some(other) => out.push(merge(self, item, other, &id)),
                None if self.known(&id) => {
                    self.conflicts.push(Conflict {
                        identity: id,
                        kind: ConflictKind::Deleted {
                            side: self.winner.other(),
                        },
                    });
                    out.push(item.clone());
                }
                None => {
                    self.added.push((self.winner, id));
                    out.push(item.clone());
                }
            }
        }

        for (index, item) in losing.iter().enumerate() {
            if winning.iter().any(|other| key(other) == key(item)) {
                continue;
            }
            let id = identity(key(item));
            if self.known(&id) {
                self.conflicts.push(Conflict {
                    identity: id,
                    kind: ConflictKind::Deleted { side: self.winner },
                });
                continue;
            }
            let position = losing[..index]
                .iter()
                .rev()
                .find_map(|prev| out.iter().position(|o| key(o) == key(prev)))
                .map_or(0, |p| p + 1);
            out.insert(position, item.clone());
            self.added.push((self.winner.other(), id));
        }
        out
    }

    fn record_fields<T: Serialize>(
        &mut self,
        identity: &str,
        winning: &T,
        losing: &T,
        children: &str,
    ) {
        let fields = changed_fields(winning, losing, children);
        if !fields.is_empty() {
            self.conflicts.push(Conflict {
                identity: identity.to_string(),
                kind: ConflictKind::Modified(fields),
            });
        }
    }

    fn policy(&mut self, winning: &Policy, losing: &Policy, identity: &str) -> Policy {
        self.record_fields(identity, winning, losing, "ruleCollectionGroups");
        let groups = self.list(
            &winning.rule_collection_groups,
            &losing.rule_collection_groups,
            identity,
            |g: &RuleCollectionGroup| g.name.as_str(),
            Self::group,
        );
        Policy {
            rule_collection_groups: groups,
            ..winning.clone()
        }
    }

    fn group(
        &mut self,
        winning: &RuleCollectionGroup,
        losing: &RuleCollectionGroup,
        identity: &str,
    ) -> RuleCollectionGroup {
        self.record_fields(identity, winning, losing, "ruleCollections");
        let collections = self.list(
            &winning.rule_collections,
            &losing.rule_collections,
            identity,
            |c: &RuleCollection| c.name.as_str(),
            Self::collection,
        );
        RuleCollectionGroup {
            rule_collections: collections,
            ..winning.clone()
        }
    }

    fn collection(
        &mut self,
        winning: &RuleCollection,
        losing: &RuleCollection,
        identity: &str,
    ) -> RuleCollection {
        self.record_fields(identity, winning, losing, "rules");
        let rules = self.list(
            &winning.rules,
            &losing.rules,
            identity,
            Rule::name,
            Self::rule,
        );
        RuleCollection {
            rules,
            ..winning.clone()
        }
    }

    fn rule(&mut self, winning: &Rule, losing: &Rule, identity: &str) -> Rule {
        self.record_fields(identity, winning, losing, "");
        winning.clone()
    }
}

/// Serialized names of the top-level fields that differ, ignoring `children`.
fn changed_fields<T: Serialize>(a: &T, b: &T, children: &str) -> Vec<String> {
    let (Ok(a), Ok(b)) = (serde_json::to_value(a), serde_json::to_value(b)) else {
        return vec!["value".to_string()];
    };
    let empty = serde_json::Map::new();
    let a = a.as_object().unwrap_or(&empty);
    let b = b.as_object().unwrap_or(&empty);
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    keys.into_iter()
        .filter(|k| k.as_str() != children && a.get(*k) != b.get(*k))
        .cloned()
        .collect()
}
