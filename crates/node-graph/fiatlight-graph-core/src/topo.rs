use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Kahn's algorithm over `node_count` nodes and `(from, to)` edges. Among the
/// nodes that are ready at the same time, the one inserted first comes first,
/// so the order is stable for the same insertion sequence.
pub fn topo_order(node_count: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, String> {
    let mut indeg = vec![0_usize; node_count];
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); node_count];

    for &(from, to) in edges {
        if from >= node_count || to >= node_count {
            return Err(format!("edge {from} -> {to} names a missing node"));
        }
        adj[from].push(to);
        indeg[to] += 1;
    }

    let mut q: BinaryHeap<Reverse<usize>> = indeg
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(k, _)| Reverse(k))
        .collect();

    let mut order = Vec::with_capacity(node_count);
    while let Some(Reverse(u)) = q.pop() {
        order.push(u);
        for &v in &adj[u] {
            indeg[v] -= 1;
            if indeg[v] == 0 {
                q.push(Reverse(v));
            }
        }
    }

    if order.len() != node_count {
        return Err("cycle detected in graph".into());
    }
    Ok(order)
}

/// Whether `to` can be reached from `from`.
pub fn reaches(node_count: usize, edges: &[(usize, usize)], from: usize, to: usize) -> bool {
    let mut seen = vec![false; node_count];
    let mut stack = vec![from];
    while let Some(u) = stack.pop() {
        if u == to {
            return true;
        }
        if u >= node_count || std::mem::replace(&mut seen[u], true) {
            continue;
        }
        stack.extend(edges.iter().filter(|(a, _)| *a == u).map(|(_, b)| *b));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_topo() {
        let order = topo_order(2, &[(0, 1)]).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn ties_follow_insertion_order() {
        // 3 -> 0, while 1 and 2 are free.
        let order = topo_order(4, &[(3, 0)]).unwrap();
        assert_eq!(order, vec![1, 2, 3, 0]);
        assert_eq!(topo_order(4, &[(3, 0)]).unwrap(), order);
    }

    #[test]
    fn detects_cycles() {
        assert!(topo_order(3, &[(0, 1), (1, 2), (2, 0)]).is_err());
        assert!(reaches(3, &[(0, 1), (1, 2)], 0, 2));
        assert!(!reaches(3, &[(0, 1), (1, 2)], 2, 0));
    }
}
