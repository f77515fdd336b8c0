//! Dependency graph utilities shared by the task registry and the plugin
//! execution graph.
//!
//! Nodes live in an arena and are addressed by index. Callers resolve their
//! string ids to indices first, deciding for themselves what an unknown id
//! means, and then hand the adjacency lists to [`depth_first_order`].

/// Visit state of a node during the depth-first walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// A dependency cycle found while ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Node reached a second time while still in progress.
    pub at: usize,
    /// The cycle itself, starting and ending at `at`.
    pub path: Vec<usize>,
}

impl Cycle {
    /// Render the cycle as `a → b → a` using `name` to label nodes.
    pub fn render<'a>(&self, name: impl Fn(usize) -> &'a str) -> String {
        self.path
            .iter()
            .map(|&i| name(i))
            .collect::<Vec<_>>()
            .join(" → ")
    }
}

/// Depth-first, post-order topological sort.
///
/// Roots are visited in `seeds` order; each node visits its `edges` entries
/// (its dependencies) before it is emitted, so every node appears after all
/// of its dependencies. Edges pointing outside the arena are ignored.
///
/// # Errors
///
/// Returns the first [`Cycle`] encountered. No partial order is returned.
pub fn depth_first_order(seeds: &[usize], edges: &[Vec<usize>]) -> Result<Vec<usize>, Cycle> {
    let mut walk = Walk {
        edges,
        marks: vec![Mark::Unvisited; edges.len()],
        stack: Vec::new(),
        order: Vec::with_capacity(edges.len()),
    };
    for &seed in seeds {
        walk.visit(seed)?;
    }
    Ok(walk.order)
}

struct Walk<'a> {
    edges: &'a [Vec<usize>],
    marks: Vec<Mark>,
    stack: Vec<usize>,
    order: Vec<usize>,
}

impl Walk<'_> {
    fn visit(&mut self, node: usize) -> Result<(), Cycle> {
        match self.marks.get(node).copied() {
            None | Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = self.stack.iter().position(|&n| n == node).unwrap_or(0);
                let mut path = self.stack.get(start..).unwrap_or_default().to_vec();
                path.push(node);
                return Err(Cycle { at: node, path });
            }
            Some(Mark::Unvisited) => {}
        }

        self.set(node, Mark::InProgress);
        self.stack.push(node);
        let edges = self.edges;
        for &dep in edges.get(node).map_or(&[][..], Vec::as_slice) {
            self.visit(dep)?;
        }
        self.stack.pop();
        self.set(node, Mark::Done);
        self.order.push(node);
        Ok(())
    }

    fn set(&mut self, node: usize, mark: Mark) {
        if let Some(m) = self.marks.get_mut(node) {
            *m = mark;
        }
    }
}
