//! Hardware requirement tables per monthly traffic tier.

use crate::config::MonthlyTraffic;

/// Minimal shape of one nodepool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodepoolRequirement {
    /// Nodepool name, also the node label that marks its members
    pub name: &'static str,
    /// Minimum node count
    pub nodes: u32,
    /// Minimum CPUs per node
    pub cpus: u32,
    /// Minimum memory per node, in GiB
    pub memory_gib: u64,
    /// Minimum ephemeral storage per node, in GiB
    pub disk_space_gib: u64,
    /// Minimum random read/write IOPS of pod storage
    pub iops: u32,
}

/// Minimal shape of one persistent volume claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PvcRequirement {
    /// Component owning the claim
    pub name: &'static str,
    /// Size in GiB
    pub size_gib: u64,
    /// Minimum random read/write IOPS
    pub iops: u32,
}

/// Requirements of one traffic tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareRequirements {
    /// Nodepools, in table order
    pub nodepools: Vec<NodepoolRequirement>,
    /// Persistent volume claims, in table order
    pub pvcs: Vec<PvcRequirement>,
}

const fn np(
    name: &'static str,
    nodes: u32,
    cpus: u32,
    memory_gib: u64,
    disk_space_gib: u64,
    iops: u32,
) -> NodepoolRequirement {
    NodepoolRequirement {
        name,
        nodes,
        cpus,
        memory_gib,
        disk_space_gib,
        iops,
    }
}

const fn pvc(name: &'static str, size_gib: u64, iops: u32) -> PvcRequirement {
    PvcRequirement {
        name,
        size_gib,
        iops,
    }
}

impl HardwareRequirements {
    /// Table for the given traffic tier
    pub fn for_traffic(traffic: MonthlyTraffic) -> Self {
        let (nodepools, pvcs): (&[NodepoolRequirement], &[PvcRequirement]) = match traffic {
            MonthlyTraffic::M10 => (
                &[
                    np("apps", 3, 4, 16, 64, 500),
                    np("tools", 1, 4, 32, 64, 240),
                    np("services", 1, 8, 32, 64, 240),
                    np("clickhouse", 1, 4, 16, 64, 500),
                ],
                &[
                    pvc("clickhouse", 256, 1000),
                    pvc("zookeeper", 32, 120),
                    pvc("rabbitmq", 32, 240),
                    pvc("consul", 16, 120),
                    pvc("redis", 16, 120),
                    pvc("redis_cache", 16, 120),
                    pvc("monitoring", 128, 500),
                ],
            ),
            MonthlyTraffic::M50 => (
                &[
                    np("apps", 3, 4, 16, 64, 500),
                    np("tools", 1, 4, 32, 64, 240),
                    np("services", 3, 4, 16, 64, 240),
                    np("clickhouse", 2, 4, 16, 64, 500),
                ],
                &[
                    pvc("clickhouse", 256, 1000),
                    pvc("zookeeper", 32, 120),
                    pvc("zookeeper_data_transaction_log", 128, 500),
                    pvc("rabbitmq", 64, 240),
                    pvc("consul", 32, 120),
                    pvc("redis", 32, 120),
                    pvc("redis_cache", 32, 120),
                    pvc("monitoring", 256, 500),
                ],
            ),
            MonthlyTraffic::M100 => (
                &[
                    np("apps", 3, 4, 16, 64, 500),
                    np("tools", 1, 4, 32, 64, 240),
                    np("services", 3, 4, 16, 64, 240),
                    np("clickhouse", 2, 4, 32, 64, 500),
                ],
                &[
                    pvc("clickhouse", 512, 2000),
                    pvc("zookeeper", 32, 120),
                    pvc("zookeeper_data_transaction_log", 128, 500),
                    pvc("rabbitmq", 64, 240),
                    pvc("consul", 32, 120),
                    pvc("redis", 32, 120),
                    pvc("redis_cache", 32, 120),
                    pvc("monitoring", 256, 500),
                ],
            ),
            MonthlyTraffic::M250 => (
                &[
                    np("apps", 3, 8, 16, 64, 500),
                    np("tools", 1, 4, 32, 64, 240),
                    np("services", 3, 8, 32, 64, 240),
                    np("clickhouse", 4, 8, 64, 64, 500),
                    np("clickhouse_trucker", 2, 4, 16, 64, 500),
                ],
                &[
                    pvc("clickhouse", 512, 2000),
                    pvc("clickhouse_trucker", 128, 1000),
                    pvc("zookeeper", 32, 120),
                    pvc("zookeeper_data_transaction_log", 128, 500),
                    pvc("rabbitmq", 128, 500),
                    pvc("consul", 32, 120),
                    pvc("redis", 32, 120),
                    pvc("redis_cache", 32, 120),
                    pvc("monitoring", 512, 2000),
                ],
            ),
            MonthlyTraffic::M500 => (
                &[
                    np("apps", 4, 8, 16, 64, 500),
                    np("tools", 1, 4, 32, 64, 240),
                    np("services", 3, 8, 32, 64, 240),
                    np("clickhouse", 4, 16, 128, 64, 500),
                    np("clickhouse_trucker", 2, 4, 16, 64, 500),
                ],
                &[
                    pvc("clickhouse", 1024, 5000),
                    pvc("clickhouse_trucker", 128, 1000),
                    pvc("zookeeper", 32, 120),
                    pvc("zookeeper_data_transaction_log", 128, 500),
                    pvc("rabbitmq", 128, 500),
                    pvc("consul", 32, 120),
                    pvc("redis", 32, 120),
                    pvc("redis_cache", 32, 120),
                    pvc("monitoring", 512, 2000),
                ],
            ),
        };
        Self {
            nodepools: nodepools.to_vec(),
            pvcs: pvcs.to_vec(),
        }
    }

    /// First nodepool with the given name
    pub fn nodepool(&self, name: &str) -> Option<&NodepoolRequirement> {
        self.nodepools.iter().find(|n| n.name == name)
    }

    /// First PVC with the given name
    pub fn pvc(&self, name: &str) -> Option<&PvcRequirement> {
        self.pvcs.iter().find(|p| p.name == name)
    }

    /// Sum of all PVC sizes, in GiB
    pub fn total_pvc_gib(&self) -> u64 {
        self.pvcs.iter().map(|p| p.size_gib).sum()
    }

    /// Highest IOPS any PVC needs
    pub fn max_pvc_iops(&self) -> u32 {
        self.pvcs.iter().map(|p| p.iops).max().unwrap_or(0)
    }
}
