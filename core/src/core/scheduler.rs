//! `choosePools` (§4.2.1), the placement policy the Registry exposes to the
//! Volume state machine for both initial allocation (§4.6.1) and degraded
//! healing (§4.6.3).

use common::ids::NodeId;
use common::transport::Pool;
use std::cmp::Reverse;
use std::collections::HashSet;

/// A pool plus the one extra fact the scheduler's ordering rule needs that
/// isn't on `Pool` itself: how many replicas it already hosts.
#[derive(Debug, Clone)]
pub struct PoolCandidate {
    pub pool: Pool,
    pub replica_count: usize,
}

/// Rank and filter `candidates`, returning at most one pool per node.
///
/// Filters (§4.2.1): accessible (ONLINE/DEGRADED), `free_space >=
/// required_bytes`, and - if `must_nodes` is non-empty - the pool's node is
/// in that set. `exclude_nodes` is the §12 extension used by healing and
/// scale-up so a new replica never lands next to an existing one of the
/// same volume.
///
/// Ordering, most significant first: (1) `should_nodes` precede others, (2)
/// ONLINE precedes DEGRADED, (3) fewer existing replicas first, (4) larger
/// free space first. The sort is stable, so candidates tying on all four
/// keep their input relative order.
pub fn choose_pools(
    candidates: &[PoolCandidate],
    required_bytes: u64,
    must_nodes: &[NodeId],
    should_nodes: &[NodeId],
    exclude_nodes: &HashSet<NodeId>,
) -> Vec<Pool> {
    let must: HashSet<&NodeId> = must_nodes.iter().collect();
    let should: HashSet<&NodeId> = should_nodes.iter().collect();

    let mut filtered: Vec<&PoolCandidate> = candidates
        .iter()
        .filter(|c| c.pool.is_accessible())
        .filter(|c| c.pool.free_space() >= required_bytes)
        .filter(|c| must.is_empty() || must.contains(&c.pool.node))
        .filter(|c| !exclude_nodes.contains(&c.pool.node))
        .collect();

    filtered.sort_by_key(|c| {
        (
            !should.contains(&c.pool.node),
            Reverse(c.pool.status),
            c.replica_count,
            Reverse(c.pool.free_space()),
        )
    });

    let mut seen_nodes = HashSet::new();
    let mut out = Vec::new();
    for c in filtered {
        if seen_nodes.insert(c.pool.node.clone()) {
            out.push(c.pool.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::transport::PoolStatus;

    fn pool(id: &str, node: &str, status: PoolStatus, capacity: u64, used: u64) -> Pool {
        Pool {
            id: id.into(),
            node: node.into(),
            disks: vec![],
            status,
            reason: String::new(),
            capacity,
            used,
        }
    }

    #[test]
    fn filters_inaccessible_and_undersized() {
        let candidates = vec![
            PoolCandidate {
                pool: pool("p1", "n1", PoolStatus::Offline, 100, 0),
                replica_count: 0,
            },
            PoolCandidate {
                pool: pool("p2", "n2", PoolStatus::Online, 100, 95),
                replica_count: 0,
            },
            PoolCandidate {
                pool: pool("p3", "n3", PoolStatus::Online, 100, 0),
                replica_count: 0,
            },
        ];
        let chosen = choose_pools(&candidates, 10, &[], &[], &HashSet::new());
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].id.as_str(), "p3");
    }

    #[test]
    fn honors_must_nodes() {
        let candidates = vec![
            PoolCandidate {
                pool: pool("p1", "n1", PoolStatus::Online, 100, 0),
                replica_count: 0,
            },
            PoolCandidate {
                pool: pool("p2", "n2", PoolStatus::Online, 100, 0),
                replica_count: 0,
            },
        ];
        let must = vec![NodeId::from("n2")];
        let chosen = choose_pools(&candidates, 10, &must, &[], &HashSet::new());
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].node.as_str(), "n2");
    }

    #[test]
    fn orders_by_should_then_status_then_load_then_space() {
        let candidates = vec![
            PoolCandidate {
                pool: pool("p1", "n1", PoolStatus::Degraded, 100, 0),
                replica_count: 0,
            },
            PoolCandidate {
                pool: pool("p2", "n2", PoolStatus::Online, 100, 50),
                replica_count: 1,
            },
            PoolCandidate {
                pool: pool("p3", "n3", PoolStatus::Online, 100, 0),
                replica_count: 0,
            },
        ];
        let should = vec![NodeId::from("n3")];
        let chosen = choose_pools(&candidates, 10, &[], &should, &HashSet::new());
        assert_eq!(
            chosen.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["p3", "p2", "p1"]
        );
    }

    #[test]
    fn at_most_one_pool_per_node() {
        let candidates = vec![
            PoolCandidate {
                pool: pool("p1", "n1", PoolStatus::Online, 100, 0),
                replica_count: 0,
            },
            PoolCandidate {
                pool: pool("p2", "n1", PoolStatus::Online, 100, 10),
                replica_count: 0,
            },
        ];
        let chosen = choose_pools(&candidates, 10, &[], &[], &HashSet::new());
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].id.as_str(), "p1");
    }

    #[test]
    fn exclude_nodes_removes_candidates() {
        let candidates = vec![PoolCandidate {
            pool: pool("p1", "n1", PoolStatus::Online, 100, 0),
            replica_count: 0,
        }];
        let mut exclude = HashSet::new();
        exclude.insert(NodeId::from("n1"));
        let chosen = choose_pools(&candidates, 10, &[], &[], &exclude);
        assert!(chosen.is_empty());
    }
}
