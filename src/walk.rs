//! Traversals over the prerequisite edges of the artefact graph: the cycle
//! check run when an edge is added, reachable-set collection, and DOT output
//! for visualizing the graph.

use crate::densemap::Index;
use crate::graph::ArtefactId;
use rustc_hash::FxHashSet;
use std::io::Write;

/// The view of a graph the traversals need.
pub trait Edges {
    fn prerequisites(&self, id: ArtefactId) -> Vec<ArtefactId>;
    fn label(&self, id: ArtefactId) -> String;
    fn is_file(&self, id: ArtefactId) -> bool;
}

/// Depth-first iterator over `(node, parent)` pairs, starting with
/// `(root, None)`.  Each node's prerequisites are expanded only once, so every
/// edge is yielded exactly once and a node with several dependents shows up
/// once per dependent.  Terminates even on cyclic graphs.
pub struct Walk<'a, G: Edges + ?Sized> {
    graph: &'a G,
    stack: Vec<(ArtefactId, Option<ArtefactId>)>,
    expanded: FxHashSet<ArtefactId>,
}

impl<'a, G: Edges + ?Sized> Iterator for Walk<'a, G> {
    type Item = (ArtefactId, Option<ArtefactId>);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, parent) = self.stack.pop()?;
        if self.expanded.insert(node) {
            // Reversed so prerequisites come out in declaration order.
            let prereqs = self.graph.prerequisites(node);
            self.stack
                .extend(prereqs.into_iter().rev().map(|p| (p, Some(node))));
        }
        Some((node, parent))
    }
}

pub fn walk<G: Edges + ?Sized>(graph: &G, root: ArtefactId) -> Walk<G> {
    Walk {
        graph,
        stack: vec![(root, None)],
        expanded: FxHashSet::default(),
    }
}

/// Whether `to` can be reached from `from` by following prerequisite edges.
/// A node reaches itself.
pub fn reaches<G: Edges + ?Sized>(graph: &G, from: ArtefactId, to: ArtefactId) -> bool {
    walk(graph, from).any(|(node, _)| node == to)
}

/// Whether `node` is part of a cycle, i.e. reachable from one of its own
/// prerequisites.
pub fn is_cyclic<G: Edges + ?Sized>(graph: &G, node: ArtefactId) -> bool {
    graph
        .prerequisites(node)
        .into_iter()
        .any(|p| reaches(graph, p, node))
}

/// Whether adding the edge `node -> prereq` would close a cycle.
pub fn closes_cycle<G: Edges + ?Sized>(graph: &G, node: ArtefactId, prereq: ArtefactId) -> bool {
    reaches(graph, prereq, node)
}

/// Everything `root` transitively depends on, `root` included.
pub fn collect<G: Edges + ?Sized>(graph: &G, root: ArtefactId) -> FxHashSet<ArtefactId> {
    walk(graph, root).map(|(node, _)| node).collect()
}

/// Write the graph below `roots` in Graphviz DOT syntax.  Edges point from
/// dependent to prerequisite.
pub fn write_dot<G: Edges + ?Sized>(
    graph: &G,
    roots: &[ArtefactId],
    w: &mut impl Write,
) -> std::io::Result<()> {
    let mut nodes = FxHashSet::default();
    let mut edges = FxHashSet::default();
    writeln!(w, "digraph dependencies {{")?;
    writeln!(w, "  rankdir=TB;")?;
    for &root in roots {
        for (node, parent) in walk(graph, root) {
            if nodes.insert(node) {
                let color = if graph.is_file(node) {
                    "darkolivegreen1:darkolivegreen3"
                } else {
                    "bisque1:bisque3"
                };
                writeln!(
                    w,
                    "  n{} [label={:?}, shape=rectangle, style=filled, fillcolor={:?}];",
                    node.index(),
                    graph.label(node),
                    color
                )?;
            }
            match parent {
                Some(parent) if parent != node && edges.insert((parent, node)) => {
                    writeln!(w, "  n{} -> n{};", parent.index(), node.index())?;
                }
                _ => {}
            }
        }
    }
    writeln!(w, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adjacency lists; node i is labelled by its index.
    struct Adj(Vec<Vec<usize>>);

    impl Edges for Adj {
        fn prerequisites(&self, id: ArtefactId) -> Vec<ArtefactId> {
            self.0[id.index()].iter().map(|&i| ArtefactId::from(i)).collect()
        }
        fn label(&self, id: ArtefactId) -> String {
            format!("a{}", id.index())
        }
        fn is_file(&self, id: ArtefactId) -> bool {
            id.index() != 0
        }
    }

    fn id(i: usize) -> ArtefactId {
        ArtefactId::from(i)
    }

    /// 0 -> {1, 2}, 1 -> 3, 2 -> 3
    fn diamond() -> Adj {
        Adj(vec![vec![1, 2], vec![3], vec![3], vec![]])
    }

    #[test]
    fn walk_yields_every_edge_once() {
        let g = diamond();
        let visited: Vec<_> = walk(&g, id(0)).collect();
        assert_eq!(
            visited,
            [
                (id(0), None),
                (id(1), Some(id(0))),
                (id(3), Some(id(1))),
                (id(2), Some(id(0))),
                (id(3), Some(id(2))),
            ]
        );
    }

    #[test]
    fn collect_dedups() {
        let g = diamond();
        let all = collect(&g, id(0));
        assert_eq!(all.len(), 4);
        let below = collect(&g, id(1));
        assert!(below.contains(&id(3)) && !below.contains(&id(2)));
    }

    #[test]
    fn cycles() {
        let g = diamond();
        assert!(!is_cyclic(&g, id(0)));
        assert!(closes_cycle(&g, id(3), id(0)));
        assert!(closes_cycle(&g, id(2), id(2)));
        assert!(!closes_cycle(&g, id(1), id(2)));

        let looped = Adj(vec![vec![1], vec![2], vec![0]]);
        assert!(is_cyclic(&looped, id(1)));
        // Still terminates.
        assert_eq!(walk(&looped, id(0)).count(), 4);
    }

    #[test]
    fn dot_output() -> std::io::Result<()> {
        let g = diamond();
        let mut out = Vec::new();
        write_dot(&g, &[id(0), id(1)], &mut out)?;
        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.matches("[label=").count(), 4);
        assert_eq!(text.matches(" -> ").count(), 4);
        assert!(text.contains("n0 [label=\"a0\", shape=rectangle, style=filled, fillcolor=\"bisque1:bisque3\"];"));
        assert!(text.contains("n2 -> n3;"));
        Ok(())
    }
}
