use serde::Serialize;

use kapsel_model::{CACHE_LABEL_PREFIX, CacheSpec, NodeSelectorEntry};

/// Cap on preferred-scheduling weight; counts at or above `MAX - 1` all land
/// on the saturating term.
pub const MAX_AFFINITY_WEIGHT: u32 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Affinity {
    pub node_affinity: NodeAffinity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAffinity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_during_scheduling_ignored_during_execution: Option<NodeSelector>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preferred_during_scheduling_ignored_during_execution: Vec<PreferredSchedulingTerm>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    pub node_selector_terms: Vec<NodeSelectorTerm>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorTerm {
    pub match_expressions: Vec<MatchExpression>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchExpression {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferredSchedulingTerm {
    pub weight: u32,
    pub preference: NodeSelectorTerm,
}

/// Build the node-affinity stanza for a job pod.
///
/// Configured node selectors become required terms. Each cache key adds
/// preferred terms steering placement toward cache-warm nodes: weight `i`
/// for an observed count of exactly `i`, and one saturating term matching
/// any count above the cap. Returns `None` when there is nothing to
/// constrain.
pub fn node_affinity(
    node_selector: &[NodeSelectorEntry],
    cache_specs: &[CacheSpec],
) -> Option<Affinity> {
    let required = if node_selector.is_empty() {
        None
    } else {
        Some(NodeSelector {
            node_selector_terms: vec![NodeSelectorTerm {
                match_expressions: node_selector
                    .iter()
                    .map(|entry| MatchExpression {
                        key: entry.label_name.clone(),
                        operator: "In".into(),
                        values: vec![entry.label_value.clone()],
                    })
                    .collect(),
            }],
        })
    };

    let mut preferred = Vec::new();
    for spec in cache_specs {
        let label = format!("{CACHE_LABEL_PREFIX}{}", spec.key);
        for weight in 1..MAX_AFFINITY_WEIGHT {
            preferred.push(PreferredSchedulingTerm {
                weight,
                preference: NodeSelectorTerm {
                    match_expressions: vec![MatchExpression {
                        key: label.clone(),
                        operator: "In".into(),
                        values: vec![weight.to_string()],
                    }],
                },
            });
        }
        preferred.push(PreferredSchedulingTerm {
            weight: MAX_AFFINITY_WEIGHT,
            preference: NodeSelectorTerm {
                match_expressions: vec![MatchExpression {
                    key: label,
                    operator: "Gt".into(),
                    values: vec![(MAX_AFFINITY_WEIGHT - 1).to_string()],
                }],
            },
        });
    }

    if required.is_none() && preferred.is_empty() {
        return None;
    }
    Some(Affinity {
        node_affinity: NodeAffinity {
            required_during_scheduling_ignored_during_execution: required,
            preferred_during_scheduling_ignored_during_execution: preferred,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(key: &str) -> CacheSpec {
        CacheSpec {
            key: key.into(),
            path: None,
        }
    }

    /// Weight the scheduler would apply for a node carrying `count`.
    fn matched_weight(terms: &[PreferredSchedulingTerm], count: u32) -> u32 {
        terms
            .iter()
            .filter(|term| {
                let expr = &term.preference.match_expressions[0];
                match expr.operator.as_str() {
                    "In" => expr.values.contains(&count.to_string()),
                    "Gt" => expr.values[0].parse::<u32>().map(|v| count > v).unwrap_or(false),
                    _ => false,
                }
            })
            .map(|term| term.weight)
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn empty_input_yields_no_affinity() {
        assert!(node_affinity(&[], &[]).is_none());
    }

    #[test]
    fn selector_entries_become_required_terms() {
        let affinity = node_affinity(&[NodeSelectorEntry::new("zone", "eu-1")], &[]).unwrap();
        let required = affinity
            .node_affinity
            .required_during_scheduling_ignored_during_execution
            .unwrap();
        let expr = &required.node_selector_terms[0].match_expressions[0];
        assert_eq!(expr.key, "zone");
        assert_eq!(expr.operator, "In");
        assert_eq!(expr.values, vec!["eu-1".to_string()]);
    }

    #[test]
    fn cache_weights_are_monotone_and_saturate() {
        let affinity = node_affinity(&[], &[cache("m2")]).unwrap();
        let terms = &affinity
            .node_affinity
            .preferred_during_scheduling_ignored_during_execution;

        // One term per weight below the cap plus the saturating one.
        assert_eq!(terms.len(), MAX_AFFINITY_WEIGHT as usize);

        let mut previous = 0;
        for count in 1..=MAX_AFFINITY_WEIGHT + 5 {
            let weight = matched_weight(terms, count);
            assert!(weight >= previous, "weight regressed at count {count}");
            previous = weight;
        }
        assert_eq!(matched_weight(terms, MAX_AFFINITY_WEIGHT - 1), MAX_AFFINITY_WEIGHT - 1);
        assert_eq!(matched_weight(terms, MAX_AFFINITY_WEIGHT), MAX_AFFINITY_WEIGHT);
        assert_eq!(matched_weight(terms, MAX_AFFINITY_WEIGHT + 50), MAX_AFFINITY_WEIGHT);
    }

    #[test]
    fn cache_terms_use_the_reserved_label_prefix() {
        let affinity = node_affinity(&[], &[cache("gradle")]).unwrap();
        let terms = &affinity
            .node_affinity
            .preferred_during_scheduling_ignored_during_execution;
        assert!(terms
            .iter()
            .all(|t| t.preference.match_expressions[0].key == "kapsel-cache/gradle"));
    }
}
