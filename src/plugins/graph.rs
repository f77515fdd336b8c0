//! Plugin execution graph.
//!
//! Orders plugins so each runs after everything it depends on. Unlike the
//! task registry there is no priority: input order breaks ties, and every
//! wiring mistake is fatal.
use std::collections::HashMap;

use crate::error::GraphError;
use crate::graph::depth_first_order;

/// Anything that can be placed in the execution graph.
pub trait GraphNode {
    /// Unique id of the node.
    fn node_id(&self) -> &str;
    /// Ids of the nodes this one must follow.
    fn node_dependencies(&self) -> &[String];
}

/// Order `nodes` so that every node follows its dependencies.
///
/// # Errors
///
/// - [`GraphError::DuplicateNode`] if two nodes share an id
/// - [`GraphError::UndeclaredDependency`] if a node depends on an id not in `nodes`
/// - [`GraphError::Cycle`] if the dependencies are cyclic
pub fn build_graph<N: GraphNode>(nodes: Vec<N>) -> Result<Vec<N>, GraphError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index.insert(node.node_id(), i).is_some() {
            return Err(GraphError::DuplicateNode(node.node_id().to_string()));
        }
    }

    let mut edges = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let deps = node
            .node_dependencies()
            .iter()
            .map(|dep| {
                index
                    .get(dep.as_str())
                    .copied()
                    .ok_or_else(|| GraphError::UndeclaredDependency {
                        plugin: node.node_id().to_string(),
                        dependency: dep.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        edges.push(deps);
    }

    let seeds: Vec<usize> = (0..nodes.len()).collect();
    let order = depth_first_order(&seeds, &edges).map_err(|cycle| {
        let name = |i: usize| nodes.get(i).map_or("?", GraphNode::node_id);
        GraphError::Cycle {
            id: name(cycle.at).to_string(),
            path: cycle.render(name),
        }
    })?;

    let mut slots: Vec<Option<N>> = nodes.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Node {
        id: String,
        deps: Vec<String>,
    }

    impl GraphNode for Node {
        fn node_id(&self) -> &str {
            &self.id
        }

        fn node_dependencies(&self) -> &[String] {
            &self.deps
        }
    }

    fn node(id: &str, deps: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            deps: deps.iter().map(ToString::to_string).collect(),
        }
    }

    fn ids(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn independent_nodes_keep_input_order() {
        let ordered = build_graph(vec![node("c", &[]), node("a", &[]), node("b", &[])]).unwrap();
        assert_eq!(ids(&ordered), vec!["c", "a", "b"]);
    }

    #[test]
    fn dependencies_come_first() {
        let ordered = build_graph(vec![
            node("python", &["base"]),
            node("node", &["base"]),
            node("base", &[]),
        ])
        .unwrap();
        assert_eq!(ids(&ordered), vec!["base", "python", "node"]);
    }

    #[test]
    fn transitive_chain() {
        let ordered =
            build_graph(vec![node("c", &["b"]), node("b", &["a"]), node("a", &[])]).unwrap();
        assert_eq!(ids(&ordered), vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_is_fatal_and_named() {
        let err = build_graph(vec![node("a", &["b"]), node("b", &["a"])]).unwrap_err();
        match err {
            GraphError::Cycle { id, path } => {
                assert!(id == "a" || id == "b");
                assert_eq!(path, "a → b → a");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = build_graph(vec![node("a", &["a"])]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { ref id, .. } if id == "a"));
    }

    #[test]
    fn undeclared_dependency_is_fatal() {
        let err = build_graph(vec![node("node", &["base"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UndeclaredDependency {
                plugin: "node".to_string(),
                dependency: "base".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_ids_are_fatal() {
        let err = build_graph(vec![node("a", &[]), node("a", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("a".to_string()));
    }

    #[test]
    fn empty_graph_is_empty() {
        assert!(build_graph(Vec::<Node>::new()).unwrap().is_empty());
    }
}
