//! 集群拓扑解析
//!
//! 将集群标识解析为其入口网关可达的地址与端口。未知集群解析为约定的占位值，
//! 转换过程因此不会因注册信息缺失而失败。

use std::collections::HashMap;
use tracing::debug;

/// 未知集群的占位地址
pub const UNKNOWN_CLUSTER_IP: &str = "255.255.255.255";

/// 未知集群的默认端口
pub const UNKNOWN_CLUSTER_PORT: u32 = 8080;

/// 集群拓扑解析能力
pub trait ClusterInfo {
    /// 集群入口网关地址
    fn ip(&self, cluster: &str) -> String;

    /// 集群入口网关端口
    fn port(&self, cluster: &str) -> u32;
}

/// 静态拓扑表
#[derive(Debug, Clone, Default)]
pub struct StaticClusterInfo {
    /// 集群标识到 (地址, 端口) 的映射
    gateways: HashMap<String, (String, u32)>,
}

impl StaticClusterInfo {
    /// 创建空的拓扑表
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记集群入口网关
    pub fn with_gateway(mut self, cluster: &str, ip: &str, port: u32) -> Self {
        self.gateways.insert(cluster.to_string(), (ip.to_string(), port));
        self
    }
}

impl ClusterInfo for StaticClusterInfo {
    fn ip(&self, cluster: &str) -> String {
        match self.gateways.get(cluster) {
            Some((ip, _)) => ip.clone(),
            None => {
                debug!("未知集群 {}，使用占位地址", cluster);
                UNKNOWN_CLUSTER_IP.to_string()
            }
        }
    }

    fn port(&self, cluster: &str) -> u32 {
        self.gateways
            .get(cluster)
            .map(|(_, port)| *port)
            .unwrap_or(UNKNOWN_CLUSTER_PORT)
    }
}
