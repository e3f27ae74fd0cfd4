// src/hierarchy.rs
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, warn};

use crate::domain::{Agent, Rank};

/// Bucket key used when an agent has neither group nor manager.
pub const UNKNOWN_BUCKET: &str = "UNKNOWN";

/// Leader codes that always resolve as a manager.
pub const DEFAULT_MANAGER_OVERRIDES: [&str; 1] = ["D2647"];

/// Ranks shown in the organization tree.
const ORG_TREE_RANKS: [Rank; 7] = [
    Rank::Am,
    Rank::Bm,
    Rank::Sdm,
    Rank::Dm,
    Rank::Sum,
    Rank::Um,
    Rank::Sm,
];

pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `group_code`, else `manager_code`, else the unknown bucket; normalized.
pub fn group_key(agent: &Agent) -> String {
    let raw = present(agent.group_code.as_deref())
        .or_else(|| present(agent.manager_code.as_deref()))
        .unwrap_or(UNKNOWN_BUCKET);
    normalize_code(raw)
}

// --- Overrides ---

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerOverrides {
    codes: Vec<String>,
}

impl ManagerOverrides {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for code in codes {
            let code = normalize_code(code.as_ref());
            if !code.is_empty() && !normalized.contains(&code) {
                normalized.push(code);
            }
        }
        Self { codes: normalized }
    }

    pub fn contains(&self, code: &str) -> bool {
        let code = normalize_code(code);
        self.codes.iter().any(|c| *c == code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }
}

impl Default for ManagerOverrides {
    fn default() -> Self {
        Self::new(DEFAULT_MANAGER_OVERRIDES)
    }
}

// --- Lookup ---

/// Agents by normalized code. Built once per request.
pub struct AgentIndex<'a> {
    by_code: HashMap<String, &'a Agent>,
}

impl<'a> AgentIndex<'a> {
    pub fn new(agents: &'a [Agent]) -> Self {
        let by_code = agents
            .iter()
            .filter(|a| !a.agent_code.trim().is_empty())
            .map(|a| (normalize_code(&a.agent_code), a))
            .collect();
        Self { by_code }
    }

    pub fn get(&self, code: &str) -> Option<&'a Agent> {
        self.by_code.get(&normalize_code(code)).copied()
    }
}

// --- Grouping ---

#[derive(Debug, Clone)]
pub struct Bucket<'a> {
    pub key: String,
    pub members: Vec<&'a Agent>,
}

/// Buckets in ascending key order; members keep input order.
pub fn group_agents(agents: &[Agent]) -> Vec<Bucket<'_>> {
    let mut buckets: BTreeMap<String, Vec<&Agent>> = BTreeMap::new();
    for agent in agents {
        if agent.agent_code.trim().is_empty() {
            debug!("Ignoring agent without a code: {:?}", agent.full_name);
            continue;
        }
        buckets.entry(group_key(agent)).or_default().push(agent);
    }
    buckets
        .into_iter()
        .map(|(key, members)| Bucket { key, members })
        .collect()
}

// --- Manager resolution ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManagerSource {
    InBucket,
    BucketKey,
    MemberManager,
    Override,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedManager<'a> {
    pub agent: &'a Agent,
    pub source: ManagerSource,
}

/// First match wins: a manager-rank member, the bucket key as a manager-rank
/// agent code, the first member's `manager_code` as a manager-rank agent,
/// then an override code regardless of rank.
pub fn resolve_manager<'a>(
    bucket: &Bucket<'a>,
    index: &AgentIndex<'a>,
    overrides: &ManagerOverrides,
) -> Option<ResolvedManager<'a>> {
    let resolved = |agent: &'a Agent, source| Some(ResolvedManager { agent, source });

    if let Some(agent) = bucket.members.iter().copied().find(|a| a.rank.is_manager()) {
        return resolved(agent, ManagerSource::InBucket);
    }

    // A key naming a non-manager agent falls through to the member's manager.
    if let Some(agent) = index.get(&bucket.key).filter(|a| a.rank.is_manager()) {
        return resolved(agent, ManagerSource::BucketKey);
    }

    let member_manager = bucket
        .members
        .iter()
        .find_map(|a| present(a.manager_code.as_deref()))
        .and_then(|code| index.get(code))
        .filter(|a| a.rank.is_manager());
    if let Some(agent) = member_manager {
        return resolved(agent, ManagerSource::MemberManager);
    }

    for code in overrides.codes() {
        let keyed = bucket.key == code;
        let referenced = bucket.members.iter().any(|a| {
            present(a.manager_code.as_deref()).is_some_and(|m| normalize_code(m) == code)
        });
        if keyed || referenced {
            if let Some(agent) = index.get(code) {
                return resolved(agent, ManagerSource::Override);
            }
        }
    }
    None
}

/// Terminated managers and managers outside the manager ranks lead no unit,
/// except override codes.
pub fn manager_is_eligible(manager: &Agent, overrides: &ManagerOverrides) -> bool {
    if overrides.contains(&manager.agent_code) {
        return true;
    }
    !manager.is_terminated() && manager.rank.is_manager()
}

pub fn reportable_members<'a>(bucket: &Bucket<'a>) -> Vec<&'a Agent> {
    bucket
        .members
        .iter()
        .copied()
        .filter(|a| a.rank.is_reportable())
        .collect()
}

/// A bucket with an eligible manager and its reportable members.
#[derive(Debug, Clone)]
pub struct ReportingUnit<'a> {
    pub key: String,
    pub manager: &'a Agent,
    pub is_override: bool,
    pub members: Vec<&'a Agent>,
}

pub fn reporting_units<'a>(agents: &'a [Agent], overrides: &ManagerOverrides) -> Vec<ReportingUnit<'a>> {
    let index = AgentIndex::new(agents);

    group_agents(agents)
        .into_iter()
        .filter_map(|bucket| {
            let Some(resolved) = resolve_manager(&bucket, &index, overrides) else {
                debug!("Bucket {} has no manager, dropped", bucket.key);
                return None;
            };
            if !manager_is_eligible(resolved.agent, overrides) {
                debug!(
                    "Bucket {} dropped: manager {} is not eligible",
                    bucket.key, resolved.agent.agent_code
                );
                return None;
            }
            Some(ReportingUnit {
                members: reportable_members(&bucket),
                is_override: overrides.contains(&resolved.agent.agent_code),
                manager: resolved.agent,
                key: bucket.key,
            })
        })
        .collect()
}

// --- Organization tree ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgNode {
    pub agent_code: String,
    pub full_name: String,
    pub rank: String,
    pub level: i32,
    pub direct_agents: u32,
    pub total_branch_agents: u32,
    pub children: Vec<OrgNode>,
}

/// Forest of management-rank agents linked by `manager_code`.
///
/// `direct_counts` is keyed by normalized code. Nodes whose manager is missing
/// become roots. Agents caught in a manager cycle are cut loose at the first
/// member met in input order, so the walk always terminates.
pub fn build_org_tree(
    agents: &[Agent],
    direct_counts: &HashMap<String, u32>,
    virtual_root: Option<&str>,
) -> Vec<OrgNode> {
    let nodes: Vec<&Agent> = agents
        .iter()
        .filter(|a| ORG_TREE_RANKS.contains(&a.rank) && !a.agent_code.trim().is_empty())
        .collect();

    let mut position: HashMap<String, usize> = HashMap::new();
    for (i, agent) in nodes.iter().enumerate() {
        position.entry(normalize_code(&agent.agent_code)).or_insert(i);
    }

    let parent: Vec<Option<usize>> = nodes
        .iter()
        .enumerate()
        .map(|(i, agent)| {
            present(agent.manager_code.as_deref())
                .and_then(|code| position.get(&normalize_code(code)).copied())
                .filter(|&p| p != i)
        })
        .collect();

    let mut reports: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, p) in parent.iter().enumerate() {
        if let Some(p) = p {
            reports[*p].push(i);
        }
    }

    // Breadth-first from the roots; anything unreached sits on a cycle.
    let mut order: Vec<usize> = Vec::with_capacity(nodes.len());
    let mut visited = vec![false; nodes.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots: Vec<usize> = Vec::new();

    loop {
        let fresh_roots: Vec<usize> = (0..nodes.len())
            .filter(|&i| !visited[i] && parent[i].is_none())
            .collect();
        let start = if fresh_roots.is_empty() {
            match (0..nodes.len()).find(|&i| !visited[i]) {
                Some(i) => {
                    warn!(
                        "Manager cycle detected at {}, treating it as a root",
                        nodes[i].agent_code
                    );
                    vec![i]
                }
                None => break,
            }
        } else {
            fresh_roots
        };

        let mut queue: VecDeque<usize> = VecDeque::new();
        for root in start {
            visited[root] = true;
            roots.push(root);
            queue.push_back(root);
        }
        while let Some(current) = queue.pop_front() {
            order.push(current);
            for &child in &reports[current] {
                if !visited[child] {
                    visited[child] = true;
                    children[current].push(child);
                    queue.push_back(child);
                }
            }
        }
    }

    let mut levels = vec![0i32; nodes.len()];
    for &i in &order {
        for &child in &children[i] {
            levels[child] = levels[i] + 1;
        }
    }

    let direct: Vec<u32> = nodes
        .iter()
        .map(|a| direct_counts.get(&normalize_code(&a.agent_code)).copied().unwrap_or(0))
        .collect();

    // Children are always later in `order`, so a reverse walk builds bottom-up.
    let mut built: Vec<Option<OrgNode>> = vec![None; nodes.len()];
    for &i in order.iter().rev() {
        let kids: Vec<OrgNode> = children[i].iter().filter_map(|&c| built[c].take()).collect();
        let branch: u32 = kids.iter().map(|k| k.total_branch_agents).sum();
        let agent = nodes[i];
        built[i] = Some(OrgNode {
            agent_code: agent.agent_code.clone(),
            full_name: agent.full_name.clone(),
            rank: agent.display_rank(),
            level: levels[i],
            direct_agents: direct[i],
            total_branch_agents: direct[i] + branch,
            children: kids,
        });
    }

    let forest: Vec<OrgNode> = roots.iter().filter_map(|&r| built[r].take()).collect();

    match virtual_root {
        Some(name) => vec![OrgNode {
            agent_code: "root".to_string(),
            full_name: name.to_string(),
            rank: "CEO".to_string(),
            level: -1,
            direct_agents: 0,
            total_branch_agents: forest.iter().map(|n| n.total_branch_agents).sum(),
            children: forest,
        }],
        None => forest,
    }
}
