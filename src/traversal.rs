//! Bounded breadth-first traversal over current relations
//!
//! Traversal walks the current graph only; closed rows never contribute
//! edges. Results carry the depth at which each entity was first reached
//! and the subgraph induced by the reached set.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::relation::{Relation, RelationType};

/// Which way edges are followed from a visited entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow edges from `from` to `to`
    Outbound,
    /// Follow edges from `to` to `from`
    Inbound,
    /// Follow edges both ways
    Both,
}

/// Traversal bounds and filters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalOptions {
    /// Maximum number of hops from the start; 0 yields the start alone
    pub max_depth: u32,

    /// Edge orientation to follow
    pub direction: Direction,

    /// When set, only these relation types are followed or reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_types: Option<Vec<RelationType>>,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            direction: Direction::Outbound,
            relation_types: None,
        }
    }
}

impl TraversalOptions {
    fn type_passes(&self, relation_type: RelationType) -> bool {
        match &self.relation_types {
            None => true,
            Some(types) => types.contains(&relation_type),
        }
    }
}

/// An entity reached by a traversal, with its hop distance from the start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalNode {
    pub entity: Entity,
    pub depth: u32,
}

/// Entities reached by a traversal plus the subgraph they induce
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraversalResult {
    /// Reached entities in breadth-first order; depths are shortest-path
    pub nodes: Vec<TraversalNode>,

    /// Every current relation whose endpoints were both reached and whose
    /// type passes the filter, regardless of traversal direction
    pub relations: Vec<Relation>,
}

impl TraversalResult {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Names of the reached entities in visit order
    pub fn entity_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.entity.name.as_str()).collect()
    }
}

/// Breadth-first walk over the given relations
///
/// Returns `(name, depth)` pairs in visit order and the indices of the
/// induced relations within `relations`. The start name is always included
/// at depth 0, whether or not any relation touches it.
pub(crate) fn bfs(
    start: &str,
    relations: &[Relation],
    opts: &TraversalOptions,
) -> (Vec<(String, u32)>, Vec<usize>) {
    // Adjacency restricted to the requested direction and type filter
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for relation in relations {
        if !opts.type_passes(relation.relation_type) {
            continue;
        }
        let forward = matches!(opts.direction, Direction::Outbound | Direction::Both);
        let backward = matches!(opts.direction, Direction::Inbound | Direction::Both);
        if forward {
            adjacency
                .entry(relation.from.as_str())
                .or_default()
                .push(relation.to.as_str());
        }
        if backward {
            adjacency
                .entry(relation.to.as_str())
                .or_default()
                .push(relation.from.as_str());
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut order: Vec<(String, u32)> = Vec::new();
    let mut queue: VecDeque<(&str, u32)> = VecDeque::new();

    visited.insert(start);
    queue.push_back((start, 0));

    while let Some((name, depth)) = queue.pop_front() {
        order.push((name.to_string(), depth));
        if depth >= opts.max_depth {
            continue;
        }
        if let Some(neighbors) = adjacency.get(name) {
            for &next in neighbors {
                if visited.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
    }

    // Depth 0 yields the start alone; a self-loop on it is not induced
    let induced: Vec<usize> = if opts.max_depth == 0 {
        Vec::new()
    } else {
        relations
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                opts.type_passes(r.relation_type)
                    && visited.contains(r.from.as_str())
                    && visited.contains(r.to.as_str())
            })
            .map(|(i, _)| i)
            .collect()
    };

    (order, induced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::{RowId, VersionInfo};

    fn relation(from: &str, to: &str, relation_type: RelationType) -> Relation {
        Relation {
            from: from.to_string(),
            to: to.to_string(),
            from_id: RowId::new(),
            to_id: RowId::new(),
            relation_type,
            strength: None,
            confidence: None,
            metadata: serde_json::Map::new(),
            version_info: VersionInfo::initial(1_000, None),
        }
    }

    fn opts(max_depth: u32, direction: Direction) -> TraversalOptions {
        TraversalOptions {
            max_depth,
            direction,
            relation_types: None,
        }
    }

    fn names(order: &[(String, u32)]) -> Vec<&str> {
        order.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn test_depth_zero_returns_start_only() {
        let relations = vec![relation("a", "b", RelationType::DependsOn)];
        let (order, induced) = bfs("a", &relations, &opts(0, Direction::Outbound));

        assert_eq!(names(&order), vec!["a"]);
        assert_eq!(order[0].1, 0);
        assert!(induced.is_empty());
    }

    #[test]
    fn test_depth_zero_excludes_self_loop() {
        let relations = vec![relation("a", "a", RelationType::RelatesTo)];
        let (order, induced) = bfs("a", &relations, &opts(0, Direction::Outbound));

        assert_eq!(names(&order), vec!["a"]);
        assert!(induced.is_empty());

        // At depth 1 the same loop is a real edge of the induced subgraph
        let (_, induced) = bfs("a", &relations, &opts(1, Direction::Outbound));
        assert_eq!(induced, vec![0]);
    }

    #[test]
    fn test_outbound_chain() {
        let relations = vec![
            relation("a", "b", RelationType::DependsOn),
            relation("b", "c", RelationType::PartOf),
        ];
        let (order, induced) = bfs("a", &relations, &opts(2, Direction::Outbound));

        assert_eq!(names(&order), vec!["a", "b", "c"]);
        assert_eq!(order[1].1, 1);
        assert_eq!(order[2].1, 2);
        assert_eq!(induced, vec![0, 1]);
    }

    #[test]
    fn test_depth_bound_stops_expansion() {
        let relations = vec![
            relation("a", "b", RelationType::DependsOn),
            relation("b", "c", RelationType::DependsOn),
        ];
        let (order, induced) = bfs("a", &relations, &opts(1, Direction::Outbound));

        assert_eq!(names(&order), vec!["a", "b"]);
        // b->c is not induced: c was not reached
        assert_eq!(induced, vec![0]);
    }

    #[test]
    fn test_inbound_reverses_edges() {
        let relations = vec![relation("a", "b", RelationType::DependsOn)];

        let (from_a, _) = bfs("a", &relations, &opts(2, Direction::Inbound));
        assert_eq!(names(&from_a), vec!["a"]);

        let (from_b, _) = bfs("b", &relations, &opts(2, Direction::Inbound));
        assert_eq!(names(&from_b), vec!["b", "a"]);
    }

    #[test]
    fn test_both_directions() {
        let relations = vec![
            relation("a", "b", RelationType::DependsOn),
            relation("c", "b", RelationType::DependsOn),
        ];
        let (order, induced) = bfs("b", &relations, &opts(1, Direction::Both));

        let reached = names(&order);
        assert_eq!(reached[0], "b");
        assert!(reached.contains(&"a"));
        assert!(reached.contains(&"c"));
        assert_eq!(induced.len(), 2);
    }

    #[test]
    fn test_cycle_terminates_with_shortest_depths() {
        let relations = vec![
            relation("a", "b", RelationType::RelatesTo),
            relation("b", "c", RelationType::RelatesTo),
            relation("c", "a", RelationType::RelatesTo),
        ];
        let (order, induced) = bfs("a", &relations, &opts(10, Direction::Outbound));

        assert_eq!(names(&order), vec!["a", "b", "c"]);
        let depths: Vec<u32> = order.iter().map(|(_, d)| *d).collect();
        assert_eq!(depths, vec![0, 1, 2]);
        // All three edges connect reached nodes
        assert_eq!(induced.len(), 3);
    }

    #[test]
    fn test_type_filter_excludes_edges_and_relations() {
        let relations = vec![
            relation("a", "b", RelationType::DependsOn),
            relation("a", "c", RelationType::RelatesTo),
        ];
        let filtered = TraversalOptions {
            max_depth: 2,
            direction: Direction::Outbound,
            relation_types: Some(vec![RelationType::DependsOn]),
        };
        let (order, induced) = bfs("a", &relations, &filtered);

        assert_eq!(names(&order), vec!["a", "b"]);
        assert_eq!(induced, vec![0]);
    }

    #[test]
    fn test_diamond_visits_once() {
        let relations = vec![
            relation("a", "b", RelationType::DependsOn),
            relation("a", "c", RelationType::DependsOn),
            relation("b", "d", RelationType::DependsOn),
            relation("c", "d", RelationType::DependsOn),
        ];
        let (order, induced) = bfs("a", &relations, &opts(3, Direction::Outbound));

        assert_eq!(order.len(), 4);
        let d = order.iter().find(|(n, _)| n == "d").unwrap();
        assert_eq!(d.1, 2);
        assert_eq!(induced.len(), 4);
    }

    #[test]
    fn test_induced_subgraph_includes_cross_edges() {
        // a -> b, a -> c, and a lateral c -> b that traversal never follows
        // first; the lateral edge still lands in the induced subgraph.
        let relations = vec![
            relation("a", "b", RelationType::DependsOn),
            relation("a", "c", RelationType::DependsOn),
            relation("c", "b", RelationType::RelatesTo),
        ];
        let (order, induced) = bfs("a", &relations, &opts(1, Direction::Outbound));

        assert_eq!(order.len(), 3);
        assert_eq!(induced.len(), 3);
    }

    #[test]
    fn test_isolated_start() {
        let relations = vec![relation("x", "y", RelationType::DependsOn)];
        let (order, induced) = bfs("lonely", &relations, &opts(5, Direction::Both));

        assert_eq!(names(&order), vec!["lonely"]);
        assert!(induced.is_empty());
    }
}
