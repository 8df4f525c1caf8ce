//! Bounded breadth-first traversal with direction propagation and
//! multiplicative confidence decay. The visited set is keyed by
//! `market_key`, not by reference, so the traversal data structure
//! itself cannot cycle.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{AffectedEdge, CausalStep, Direction, ImpactDirection, Relationship, RelationshipType};

struct QueueItem {
    market_key: String,
    direction: Direction,
    depth: u32,
    cumulative_confidence: f64,
    path: Vec<String>,
}

/// Explores neighbors of `origin` up to `max_depth`, pruning any path whose
/// cumulative confidence drops below `min_confidence`. Each `market_key` is
/// expanded at most once; ties among equal-depth candidates are broken by a
/// stable alphabetical neighbor order.
pub fn traverse(
    origin: &str,
    relationships: &[Relationship],
    shock_direction: Direction,
    max_depth: u32,
    min_confidence: f64,
) -> Vec<CausalStep> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(origin.to_string());

    let mut queue: VecDeque<QueueItem> = VecDeque::new();
    queue.push_back(QueueItem {
        market_key: origin.to_string(),
        direction: shock_direction,
        depth: 0,
        cumulative_confidence: 1.0,
        path: vec![origin.to_string()],
    });

    let mut impacts: Vec<CausalStep> = Vec::new();

    while let Some(item) = queue.pop_front() {
        if item.depth >= max_depth {
            continue;
        }

        let mut neighbors: Vec<&Relationship> = relationships
            .iter()
            .filter(|r| r.other(&item.market_key).is_some())
            .collect();
        neighbors.sort_by_key(|r| r.other(&item.market_key).unwrap().to_string());

        for rel in neighbors {
            let neighbor_key = rel.other(&item.market_key).unwrap().to_string();
            if visited.contains(&neighbor_key) {
                continue;
            }

            let edge_confidence = rel.confidence_score;
            let cumulative = item.cumulative_confidence * edge_confidence;
            if cumulative < min_confidence {
                continue;
            }

            let direction = propagate_direction(item.direction, rel);
            visited.insert(neighbor_key.clone());

            let mut path = item.path.clone();
            path.push(neighbor_key.clone());

            impacts.push(CausalStep {
                market_key: neighbor_key.clone(),
                propagation_order: item.depth + 1,
                relationship_type: rel.relationship_type,
                direction,
                cumulative_confidence: cumulative,
                edge_confidence,
                path: path.clone(),
                justification: rel.logic_justification.clone(),
                insight: rel.vantage_insight.clone(),
                correlation_strength: rel.correlation_strength,
                logical_layer: rel.logical_layer,
                probability_a: rel.probability_a,
                probability_b: rel.probability_b,
            });

            queue.push_back(QueueItem {
                market_key: neighbor_key,
                direction,
                depth: item.depth + 1,
                cumulative_confidence: cumulative,
                path,
            });
        }
    }

    impacts.sort_by(|a, b| {
        b.cumulative_confidence
            .partial_cmp(&a.cumulative_confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    impacts
}

/// Direction propagation algebra.
fn propagate_direction(incoming: Direction, rel: &Relationship) -> Direction {
    match rel.relationship_type {
        RelationshipType::Equivalent | RelationshipType::Implied => incoming,
        RelationshipType::MutuallyExclusive => incoming.flip(),
        RelationshipType::Correlated => {
            if rel.impact_direction == ImpactDirection::Negative {
                incoming.flip()
            } else {
                incoming
            }
        }
    }
}

/// Distinct `market_key` set across all impact paths.
pub fn affected_nodes(impacts: &[CausalStep]) -> Vec<String> {
    let mut nodes: Vec<String> = impacts.iter().map(|i| i.market_key.clone()).collect();
    nodes.sort();
    nodes.dedup();
    nodes
}

/// Consecutive pairs in every impact's path, deduplicated by ordered
/// `(source, target)` key, attributed from the impact whose `market_key`
/// is the pair's target.
pub fn affected_edges(impacts: &[CausalStep]) -> Vec<AffectedEdge> {
    let by_target: HashMap<&str, &CausalStep> =
        impacts.iter().map(|i| (i.market_key.as_str(), i)).collect();

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut edges = Vec::new();
    for impact in impacts {
        for pair in impact.path.windows(2) {
            let key = (pair[0].clone(), pair[1].clone());
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(step) = by_target.get(pair[1].as_str()) {
                edges.push(AffectedEdge {
                    source: key.0,
                    target: key.1,
                    relationship_type: step.relationship_type,
                    direction: step.direction,
                    edge_confidence: step.edge_confidence,
                });
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CorrelationStrength;
    use crate::models::LogicalLayer;

    fn edge(
        a: &str,
        b: &str,
        rtype: RelationshipType,
        confidence: f64,
        impact_direction: ImpactDirection,
    ) -> Relationship {
        Relationship::new(
            a.to_string(),
            b.to_string(),
            rtype,
            confidence,
            "justification".into(),
            impact_direction,
            CorrelationStrength::Medium,
            LogicalLayer::Financial,
            "insight".into(),
            None,
            None,
        )
    }

    #[test]
    fn scenario_five_direction_propagation_and_depth_cap() {
        let relationships = vec![
            edge("O", "X", RelationshipType::Equivalent, 0.9, ImpactDirection::Neutral),
            edge("X", "Y", RelationshipType::MutuallyExclusive, 0.8, ImpactDirection::Neutral),
            edge("Y", "Z", RelationshipType::Correlated, 0.5, ImpactDirection::Negative),
        ];

        let impacts = traverse("O", &relationships, Direction::Up, 2, 0.05);
        assert_eq!(impacts.len(), 2);

        let x = impacts.iter().find(|i| i.market_key == "X").unwrap();
        assert_eq!(x.direction, Direction::Up);
        assert!((x.cumulative_confidence - 0.9).abs() < 1e-9);
        assert_eq!(x.propagation_order, 1);

        let y = impacts.iter().find(|i| i.market_key == "Y").unwrap();
        assert_eq!(y.direction, Direction::Down);
        assert!((y.cumulative_confidence - 0.72).abs() < 1e-9);
        assert_eq!(y.propagation_order, 2);

        assert!(impacts.iter().all(|i| i.market_key != "Z"));

        let nodes = affected_nodes(&impacts);
        assert_eq!(nodes, vec!["X".to_string(), "Y".to_string()]);

        let edges = affected_edges(&impacts);
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().any(|e| e.source == "O" && e.target == "X"));
        assert!(edges.iter().any(|e| e.source == "X" && e.target == "Y"));
    }

    #[test]
    fn scenario_six_pruning_drops_low_confidence_neighbor() {
        let relationships = vec![edge(
            "O",
            "W",
            RelationshipType::Correlated,
            0.04,
            ImpactDirection::Neutral,
        )];
        let impacts = traverse("O", &relationships, Direction::Up, 2, 0.05);
        assert!(impacts.is_empty());
    }

    #[test]
    fn visited_guard_expands_each_node_at_most_once() {
        let relationships = vec![
            edge("O", "X", RelationshipType::Equivalent, 0.9, ImpactDirection::Neutral),
            edge("O", "Y", RelationshipType::Equivalent, 0.9, ImpactDirection::Neutral),
            edge("X", "Y", RelationshipType::Equivalent, 0.9, ImpactDirection::Neutral),
        ];
        let impacts = traverse("O", &relationships, Direction::Up, 2, 0.05);
        let y_count = impacts.iter().filter(|i| i.market_key == "Y").count();
        assert_eq!(y_count, 1);
    }
}
