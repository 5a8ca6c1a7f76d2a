//! End-to-end Pool Operator reconciliation against the in-memory fake agent
//! (§4.5), exercising the Registry in the same way a real CRD watcher would.

use common::ids::{NodeId, PoolId};
use common::transport::{PoolResourceSpec, PoolResourceStatus, PoolStatus};
use control_plane_core::pool::operator::PoolOperator;
use control_plane_core::pool::resource::PoolStatusSink;
use control_plane_core::{Config, Registry};
use rpc::fake::{FakeAgent, FakeFactory};
use std::sync::Arc;

#[derive(Default)]
struct CapturingSink {
    written: parking_lot::Mutex<Vec<(PoolId, PoolResourceStatus)>>,
}

#[async_trait::async_trait]
impl PoolStatusSink for CapturingSink {
    async fn write_status(&self, name: &PoolId, status: PoolResourceStatus) {
        self.written.lock().push((name.clone(), status));
    }
}

impl CapturingSink {
    fn last(&self, name: &PoolId) -> Option<PoolResourceStatus> {
        self.written
            .lock()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    }
}

async fn registry_with_node(node: &str, endpoint: &str) -> (Arc<Registry>, FakeAgent) {
    let factory = FakeFactory::new();
    let agent = FakeAgent::new(NodeId::from(node));
    factory.register(endpoint, agent.clone());
    let registry = Arc::new(Registry::new(Arc::new(factory), Config::default()));
    registry.add_node(NodeId::from(node), endpoint.to_string()).await;
    registry.sync_node_now(&NodeId::from(node)).await.unwrap();
    (registry, agent)
}

#[tokio::test]
async fn create_reconciles_pool_to_online() {
    let (registry, _agent) = registry_with_node("n1", "n1:10124").await;
    let sink = Arc::new(CapturingSink::default());
    let operator = PoolOperator::new(registry.clone(), sink.clone());
    operator.start(Vec::new()).await;

    operator
        .create(PoolResourceSpec {
            name: PoolId::from("p1"),
            node: NodeId::from("n1"),
            disks: vec!["/dev/sda".to_string()],
        })
        .await;

    let status = sink.last(&PoolId::from("p1")).expect("status written");
    assert_eq!(status.state, PoolStatus::Online);
    let pools = registry.get_pools(None).await;
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].id, PoolId::from("p1"));
}

#[tokio::test]
async fn create_rejects_invalid_disk_path() {
    let (registry, _agent) = registry_with_node("n1", "n1:10124").await;
    let sink = Arc::new(CapturingSink::default());
    let operator = PoolOperator::new(registry.clone(), sink.clone());
    operator.start(Vec::new()).await;

    operator
        .create(PoolResourceSpec {
            name: PoolId::from("p1"),
            node: NodeId::from("n1"),
            disks: vec!["relative/sda".to_string()],
        })
        .await;

    let status = sink.last(&PoolId::from("p1")).expect("status written");
    assert_eq!(status.state, PoolStatus::Pending);
    assert!(registry.get_pools(None).await.is_empty());
}

#[tokio::test]
async fn node_sync_destroys_foreign_pool_not_in_desired_set() {
    let (registry, agent) = registry_with_node("n1", "n1:10124").await;
    agent.seed_pool(common::transport::Pool {
        id: PoolId::from("foreign"),
        node: NodeId::from("n1"),
        disks: vec!["/dev/sdb".into()],
        status: PoolStatus::Online,
        reason: String::new(),
        capacity: 100,
        used: 0,
    });

    let sink = Arc::new(CapturingSink::default());
    let operator = PoolOperator::new(registry.clone(), sink);
    // start() syncs every currently-known node (§4.5 step 3), which should
    // find the foreign pool and destroy it since no resource names it.
    operator.start(Vec::new()).await;

    registry.sync_node_now(&NodeId::from("n1")).await.unwrap();
    assert!(registry.get_pools(None).await.is_empty());
}
