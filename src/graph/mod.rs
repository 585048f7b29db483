//! Entity knowledge graph
//!
//! Undirected adjacency built from entities (nodes) and relationships
//! (edges), ignoring self-loops and unknown endpoints. Provides connected
//! components (BFS), betweenness centrality (Brandes), community detection
//! (synchronous label propagation), and summary statistics.

use std::collections::{HashMap, HashSet, VecDeque};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::types::{Entity, EntityRelationship};

/// A graph node (one entity)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub entity_type: String,
}

/// A graph edge (one relationship)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relationship: String,
    pub confidence: f32,
}

/// The entity graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Summary statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub component_count: usize,
    /// Average degree, rounded to 2 decimals
    pub avg_degree: f64,
}

/// Centrality scores per node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralityScore {
    pub entity_id: String,
    pub name: String,
    pub degree: usize,
    /// Brandes betweenness; None when the graph was too large to compute
    pub betweenness: Option<f64>,
}

/// A detected community
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: usize,
    pub member_ids: Vec<String>,
    pub internal_edges: usize,
}

impl EntityGraph {
    /// Build from entities and relationships, dropping self-loops and edges
    /// with unknown endpoints
    pub fn from_data(entities: &[Entity], relationships: &[EntityRelationship]) -> Self {
        let nodes: Vec<GraphNode> = entities
            .iter()
            .map(|e| GraphNode {
                id: e.id.clone(),
                name: e.name.clone(),
                entity_type: e.entity_type.as_str().to_string(),
            })
            .collect();

        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

        let edges: Vec<GraphEdge> = relationships
            .iter()
            .filter(|r| {
                r.source_entity_id != r.target_entity_id
                    && ids.contains(r.source_entity_id.as_str())
                    && ids.contains(r.target_entity_id.as_str())
            })
            .map(|r| GraphEdge {
                source: r.source_entity_id.clone(),
                target: r.target_entity_id.clone(),
                relationship: r.relationship.clone(),
                confidence: r.confidence,
            })
            .collect();

        Self { nodes, edges }
    }

    /// Undirected adjacency list
    fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            adj.insert(node.id.as_str(), Vec::new());
        }
        for edge in &self.edges {
            if let Some(list) = adj.get_mut(edge.source.as_str()) {
                list.push(edge.target.as_str());
            }
            if let Some(list) = adj.get_mut(edge.target.as_str()) {
                list.push(edge.source.as_str());
            }
        }
        adj
    }

    /// Connected components via BFS, largest first
    pub fn components(&self) -> Vec<Vec<String>> {
        let adj = self.adjacency();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut components = Vec::new();

        for node in &self.nodes {
            let start = node.id.as_str();
            if visited.contains(start) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back(start);
            visited.insert(start);

            while let Some(current) = queue.pop_front() {
                component.push(current.to_string());
                if let Some(neighbors) = adj.get(current) {
                    for &n in neighbors {
                        if visited.insert(n) {
                            queue.push_back(n);
                        }
                    }
                }
            }
            components.push(component);
        }

        components.sort_by(|a, b| b.len().cmp(&a.len()));
        components
    }

    /// Summary statistics
    pub fn stats(&self) -> GraphStats {
        let node_count = self.nodes.len();
        let edge_count = self.edges.len();
        let avg_degree = if node_count > 0 {
            let raw = (2 * edge_count) as f64 / node_count as f64;
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };

        GraphStats {
            node_count,
            edge_count,
            component_count: self.components().len(),
            avg_degree,
        }
    }

    /// Centrality: degree always; Brandes betweenness unless the graph has
    /// more than `max_betweenness_nodes` nodes (O(V*E) is too costly there)
    pub fn centrality(&self, max_betweenness_nodes: usize) -> Vec<CentralityScore> {
        let adj = self.adjacency();
        let betweenness = if self.nodes.len() <= max_betweenness_nodes {
            Some(self.betweenness(&adj))
        } else {
            None
        };

        let mut scores: Vec<CentralityScore> = self
            .nodes
            .iter()
            .map(|n| CentralityScore {
                entity_id: n.id.clone(),
                name: n.name.clone(),
                degree: adj.get(n.id.as_str()).map(|v| v.len()).unwrap_or(0),
                betweenness: betweenness
                    .as_ref()
                    .map(|b| *b.get(n.id.as_str()).unwrap_or(&0.0)),
            })
            .collect();

        scores.sort_by(|a, b| {
            let ba = a.betweenness.unwrap_or(a.degree as f64);
            let bb = b.betweenness.unwrap_or(b.degree as f64);
            bb.partial_cmp(&ba)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.degree.cmp(&a.degree))
        });
        scores
    }

    /// Brandes' betweenness centrality over the undirected, unweighted graph
    fn betweenness<'a>(&'a self, adj: &HashMap<&'a str, Vec<&'a str>>) -> HashMap<&'a str, f64> {
        let mut centrality: HashMap<&str, f64> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0.0)).collect();

        for source in self.nodes.iter().map(|n| n.id.as_str()) {
            let mut stack: Vec<&str> = Vec::new();
            let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
            let mut sigma: HashMap<&str, f64> = HashMap::new();
            let mut distance: HashMap<&str, i64> = HashMap::new();

            sigma.insert(source, 1.0);
            distance.insert(source, 0);

            let mut queue = VecDeque::new();
            queue.push_back(source);

            while let Some(v) = queue.pop_front() {
                stack.push(v);
                let d_v = distance[v];
                let sigma_v = sigma[v];
                if let Some(neighbors) = adj.get(v) {
                    for &w in neighbors {
                        match distance.get(w) {
                            None => {
                                distance.insert(w, d_v + 1);
                                queue.push_back(w);
                                sigma.insert(w, sigma_v);
                                predecessors.entry(w).or_default().push(v);
                            }
                            Some(&d_w) if d_w == d_v + 1 => {
                                *sigma.entry(w).or_insert(0.0) += sigma_v;
                                predecessors.entry(w).or_default().push(v);
                            }
                            _ => {}
                        }
                    }
                }
            }

            let mut delta: HashMap<&str, f64> = HashMap::new();
            while let Some(w) = stack.pop() {
                let coeff = (1.0 + delta.get(w).copied().unwrap_or(0.0)) / sigma[w];
                if let Some(preds) = predecessors.get(w) {
                    for &v in preds {
                        *delta.entry(v).or_insert(0.0) += sigma[v] * coeff;
                    }
                }
                if w != source {
                    *centrality.get_mut(w).unwrap() += delta.get(w).copied().unwrap_or(0.0);
                }
            }
        }

        // Each undirected shortest path was counted from both endpoints
        for value in centrality.values_mut() {
            *value /= 2.0;
        }
        centrality
    }

    /// Community detection via synchronous label propagation with shuffled
    /// node order per iteration. Singleton communities are dropped; the
    /// result is sorted by size descending.
    pub fn communities(&self, max_iterations: usize) -> Vec<Community> {
        if self.nodes.is_empty() {
            return Vec::new();
        }

        let adj = self.adjacency();
        let mut labels: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut order: Vec<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        let mut rng = rand::thread_rng();

        for _ in 0..max_iterations.max(1) {
            order.shuffle(&mut rng);
            let mut changed = false;

            for &node in &order {
                let Some(neighbors) = adj.get(node) else { continue };
                if neighbors.is_empty() {
                    continue;
                }

                let mut votes: HashMap<usize, usize> = HashMap::new();
                for &n in neighbors {
                    if let Some(&label) = labels.get(n) {
                        *votes.entry(label).or_insert(0) += 1;
                    }
                }

                // Most common neighbor label; ties break toward the smallest
                // label for determinism within a vote set
                if let Some((&best, _)) = votes
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                {
                    if labels[node] != best {
                        labels.insert(node, best);
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        let mut groups: HashMap<usize, Vec<String>> = HashMap::new();
        for (node, label) in &labels {
            groups.entry(*label).or_default().push(node.to_string());
        }

        let mut communities: Vec<Community> = groups
            .into_values()
            .filter(|members| members.len() > 1)
            .map(|mut members| {
                members.sort();
                let member_set: HashSet<&str> = members.iter().map(|s| s.as_str()).collect();
                let internal_edges = self
                    .edges
                    .iter()
                    .filter(|e| {
                        member_set.contains(e.source.as_str())
                            && member_set.contains(e.target.as_str())
                    })
                    .count();
                Community {
                    id: 0,
                    member_ids: members,
                    internal_edges,
                }
            })
            .collect();

        communities.sort_by(|a, b| b.member_ids.len().cmp(&a.member_ids.len()));
        for (i, c) in communities.iter_mut().enumerate() {
            c.id = i;
        }
        communities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_id, Entity, EntityType};
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn entity(name: &str) -> Entity {
        Entity {
            id: name.to_string(),
            name: name.to_string(),
            entity_type: EntityType::Concept,
            aliases: vec![],
            metadata: Map::new(),
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn rel(source: &str, target: &str) -> EntityRelationship {
        EntityRelationship {
            id: new_id(),
            source_entity_id: source.to_string(),
            target_entity_id: target.to_string(),
            relationship: "related".to_string(),
            confidence: 0.8,
            memory_id: None,
            context: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_graph() {
        let g = EntityGraph::from_data(&[], &[]);
        let stats = g.stats();
        assert_eq!(stats.node_count, 0);
        assert_eq!(stats.edge_count, 0);
        assert_eq!(stats.component_count, 0);
        assert!(g.communities(10).is_empty());
        assert!(g.centrality(1000).is_empty());
    }

    #[test]
    fn test_single_node() {
        let g = EntityGraph::from_data(&[entity("a")], &[]);
        let stats = g.stats();
        assert_eq!(stats.component_count, 1);
        assert_eq!(stats.avg_degree, 0.0);

        let centrality = g.centrality(1000);
        assert_eq!(centrality[0].degree, 0);
        assert_eq!(centrality[0].betweenness, Some(0.0));
    }

    #[test]
    fn test_self_loops_and_unknown_endpoints_dropped() {
        let g = EntityGraph::from_data(
            &[entity("a"), entity("b")],
            &[rel("a", "a"), rel("a", "ghost"), rel("a", "b")],
        );
        assert_eq!(g.edges.len(), 1);
    }

    #[test]
    fn test_components() {
        let g = EntityGraph::from_data(
            &[entity("a"), entity("b"), entity("c"), entity("d")],
            &[rel("a", "b"), rel("c", "d")],
        );
        let components = g.components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].len(), 2);
    }

    #[test]
    fn test_betweenness_path_graph() {
        // a - b - c: b sits on the single a..c shortest path
        let g = EntityGraph::from_data(
            &[entity("a"), entity("b"), entity("c")],
            &[rel("a", "b"), rel("b", "c")],
        );
        let centrality = g.centrality(1000);
        let b = centrality.iter().find(|c| c.entity_id == "b").unwrap();
        let a = centrality.iter().find(|c| c.entity_id == "a").unwrap();
        assert!((b.betweenness.unwrap() - 1.0).abs() < 1e-9);
        assert!((a.betweenness.unwrap() - 0.0).abs() < 1e-9);
        // and b must rank first
        assert_eq!(centrality[0].entity_id, "b");
    }

    #[test]
    fn test_betweenness_skipped_above_limit() {
        let g = EntityGraph::from_data(
            &[entity("a"), entity("b"), entity("c")],
            &[rel("a", "b"), rel("b", "c")],
        );
        let centrality = g.centrality(2);
        assert!(centrality.iter().all(|c| c.betweenness.is_none()));
        assert_eq!(centrality[0].entity_id, "b");
    }

    #[test]
    fn test_communities_two_cliques() {
        // Two triangles joined by one bridge edge
        let nodes: Vec<Entity> = ["a", "b", "c", "x", "y", "z"]
            .iter()
            .map(|n| entity(n))
            .collect();
        let edges = vec![
            rel("a", "b"),
            rel("b", "c"),
            rel("a", "c"),
            rel("x", "y"),
            rel("y", "z"),
            rel("x", "z"),
            rel("c", "x"),
        ];
        let g = EntityGraph::from_data(&nodes, &edges);
        let communities = g.communities(10);

        assert!(!communities.is_empty());
        assert!(communities[0].member_ids.len() >= 3);
        assert!(communities[0].internal_edges >= 3);
        // ids renumbered by size
        for (i, c) in communities.iter().enumerate() {
            assert_eq!(c.id, i);
        }
    }

    #[test]
    fn test_avg_degree_rounded() {
        let g = EntityGraph::from_data(
            &[entity("a"), entity("b"), entity("c")],
            &[rel("a", "b")],
        );
        // 2 edges-ends / 3 nodes = 0.666... -> 0.67
        assert!((g.stats().avg_degree - 0.67).abs() < 1e-9);
    }
}
