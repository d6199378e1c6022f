// ABOUTME: Orders tables so referenced tables are dumped before their referrers
// ABOUTME: Kahn's algorithm for the acyclic part, Tarjan SCCs to report unavoidable cycles

use crate::session::{Session, TableName};
use anyhow::Result;
use std::collections::{BTreeSet, VecDeque};

/// A table and the tables its foreign keys point at.
#[derive(Debug, Clone)]
pub struct TableNode {
    pub name: TableName,
    pub references: Vec<TableName>,
}

/// Result of ordering a set of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Every input table exactly once, dependencies first where possible
    pub ordered: Vec<TableName>,
    /// Member chains of cycles; each chain starts and ends with the same table
    pub cycles: Vec<Vec<TableName>>,
}

pub trait DependencyResolver {
    fn sort_tables(&self, nodes: &[TableNode]) -> Resolution;
}

/// Topological sort that degrades gracefully on cycles.
///
/// Ties are broken by input order, so a selection without foreign keys is
/// dumped exactly as requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopologicalResolver;

struct Graph {
    /// deps[i]: indexes of tables that table i references
    deps: Vec<BTreeSet<usize>>,
}

impl Graph {
    fn build(nodes: &[TableNode]) -> Self {
        let deps = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                node.references
                    .iter()
                    .filter_map(|target| nodes.iter().position(|n| n.name.same_table(target)))
                    .filter(|j| *j != i)
                    .collect()
            })
            .collect();
        Self { deps }
    }

    fn len(&self) -> usize {
        self.deps.len()
    }

    /// Kahn's algorithm; returns the ordered prefix and leaves cyclic tables out
    fn kahn(&self) -> Vec<usize> {
        let mut incoming: Vec<usize> = self.deps.iter().map(BTreeSet::len).collect();
        let mut dependents = vec![BTreeSet::new(); self.len()];
        for (i, deps) in self.deps.iter().enumerate() {
            for j in deps {
                dependents[*j].insert(i);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.len()).filter(|i| incoming[*i] == 0).collect();
        let mut order = Vec::with_capacity(self.len());
        while let Some(next) = queue.pop_front() {
            order.push(next);
            for child in &dependents[next] {
                incoming[*child] -= 1;
                if incoming[*child] == 0 {
                    queue.push_back(*child);
                }
            }
        }
        order
    }

    /// Strongly connected components among `remaining`, dependencies first
    fn components(&self, remaining: &BTreeSet<usize>) -> Vec<Vec<usize>> {
        let mut tarjan = Tarjan {
            graph: self,
            remaining,
            index: vec![None; self.len()],
            lowlink: vec![0; self.len()],
            on_stack: vec![false; self.len()],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        };
        for &v in remaining {
            if tarjan.index[v].is_none() {
                tarjan.connect(v);
            }
        }
        tarjan.components
    }

    /// A closed walk through `component` starting at its first member
    fn cycle_through(&self, component: &[usize]) -> Vec<usize> {
        let members: BTreeSet<usize> = component.iter().copied().collect();
        let start = component[0];

        // breadth-first search from start back to start inside the component
        let mut parent = vec![None; self.len()];
        let mut queue = VecDeque::from([start]);
        let mut last = None;
        'search: while let Some(v) = queue.pop_front() {
            for &w in &self.deps[v] {
                if !members.contains(&w) {
                    continue;
                }
                if w == start {
                    last = Some(v);
                    break 'search;
                }
                if parent[w].is_none() {
                    parent[w] = Some(v);
                    queue.push_back(w);
                }
            }
        }

        let mut path = vec![start];
        let mut cursor = last;
        let mut tail = Vec::new();
        while let Some(v) = cursor {
            if v == start {
                break;
            }
            tail.push(v);
            cursor = parent[v];
        }
        tail.reverse();
        path.extend(tail);
        path.push(start);
        path
    }
}

struct Tarjan<'a> {
    graph: &'a Graph,
    remaining: &'a BTreeSet<usize>,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Vec<usize>>,
}

impl Tarjan<'_> {
    fn connect(&mut self, v: usize) {
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        for &w in &self.graph.deps[v] {
            if !self.remaining.contains(&w) {
                continue;
            }
            match self.index[w] {
                None => {
                    self.connect(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[v]) == self.index[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}

impl DependencyResolver for TopologicalResolver {
    fn sort_tables(&self, nodes: &[TableNode]) -> Resolution {
        let graph = Graph::build(nodes);
        let mut order = graph.kahn();

        let placed: BTreeSet<usize> = order.iter().copied().collect();
        let remaining: BTreeSet<usize> = (0..graph.len()).filter(|i| !placed.contains(i)).collect();

        let mut cycles = Vec::new();
        if !remaining.is_empty() {
            for component in graph.components(&remaining) {
                if component.len() > 1 {
                    cycles.push(graph.cycle_through(&component));
                }
                order.extend(component);
            }
        }

        let name = |i: usize| nodes[i].name.clone();
        Resolution {
            ordered: order.into_iter().map(name).collect(),
            cycles: cycles
                .into_iter()
                .map(|cycle| cycle.into_iter().map(name).collect())
                .collect(),
        }
    }
}

/// Render a cycle chain as `A -> B -> A`
pub fn format_cycle(cycle: &[TableName]) -> String {
    cycle
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Load foreign keys for `tables` and order them with `resolver`
pub async fn order_tables<S: Session>(
    session: &mut S,
    tables: &[TableName],
    resolver: &impl DependencyResolver,
) -> Result<Resolution> {
    let mut nodes = Vec::with_capacity(tables.len());
    for table in tables {
        let references = session.foreign_keys(table).await?;
        nodes.push(TableNode {
            name: table.clone(),
            references,
        });
    }
    Ok(resolver.sort_tables(&nodes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, refs: &[&str]) -> TableNode {
        TableNode {
            name: TableName::new(name),
            references: refs.iter().map(|r| TableName::new(*r)).collect(),
        }
    }

    fn names(tables: &[TableName]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_referenced_tables_come_first() {
        let nodes = vec![
            node("orders", &["customers", "products"]),
            node("customers", &[]),
            node("order_items", &["orders", "products"]),
            node("products", &[]),
        ];
        let resolution = TopologicalResolver.sort_tables(&nodes);
        assert_eq!(
            names(&resolution.ordered),
            vec!["customers", "products", "orders", "order_items"]
        );
        assert!(resolution.cycles.is_empty());
    }

    #[test]
    fn test_independent_tables_keep_input_order() {
        let nodes = vec![node("b", &[]), node("a", &[]), node("c", &[])];
        let resolution = TopologicalResolver.sort_tables(&nodes);
        assert_eq!(names(&resolution.ordered), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_self_and_outside_references_are_ignored() {
        let nodes = vec![
            node("tree", &["tree", "elsewhere"]),
            node("leaf", &["tree"]),
        ];
        let resolution = TopologicalResolver.sort_tables(&nodes);
        assert_eq!(names(&resolution.ordered), vec!["tree", "leaf"]);
        assert!(resolution.cycles.is_empty());
    }

    #[test]
    fn test_cycle_is_reported_and_all_tables_kept() {
        let nodes = vec![
            node("a", &["b"]),
            node("b", &["c"]),
            node("c", &["a"]),
            node("d", &[]),
            node("e", &["a"]),
        ];
        let resolution = TopologicalResolver.sort_tables(&nodes);

        assert_eq!(resolution.ordered.len(), 5);
        assert_eq!(resolution.ordered[0], TableName::new("d"));
        assert_eq!(resolution.ordered[4], TableName::new("e"));
        assert_eq!(resolution.cycles.len(), 1);
        assert_eq!(format_cycle(&resolution.cycles[0]), "a -> b -> c -> a");
    }

    #[test]
    fn test_two_separate_cycles() {
        let nodes = vec![
            node("x", &["y"]),
            node("y", &["x"]),
            node("p", &["q"]),
            node("q", &["p", "x"]),
        ];
        let resolution = TopologicalResolver.sort_tables(&nodes);
        assert_eq!(resolution.cycles.len(), 2);
        // the x/y cycle is referenced by q, so it is dumped first
        assert_eq!(names(&resolution.ordered), vec!["x", "y", "p", "q"]);
        assert_eq!(format_cycle(&resolution.cycles[0]), "x -> y -> x");
        assert_eq!(format_cycle(&resolution.cycles[1]), "p -> q -> p");
    }

    #[test]
    fn test_table_name_matching_ignores_case() {
        let nodes = vec![node("Child", &["PARENT"]), node("parent", &[])];
        let resolution = TopologicalResolver.sort_tables(&nodes);
        assert_eq!(names(&resolution.ordered), vec!["parent", "Child"]);
    }
}
