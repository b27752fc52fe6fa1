//! 派生服务模型
//!
//! 直连入口模式为每个绑定的远程服务创建一个 Kubernetes 风格的 Service，
//! 使派生主机名能在本地解析。一个派生服务可能被多个策略共同持有。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::models::policy::{namespace_or_default, PolicyRef};

/// Service 类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    /// 集群内部地址
    #[default]
    ClusterIP,
    /// 节点端口
    NodePort,
    /// 负载均衡器
    LoadBalancer,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::ClusterIP => write!(f, "ClusterIP"),
            ServiceType::NodePort => write!(f, "NodePort"),
            ServiceType::LoadBalancer => write!(f, "LoadBalancer"),
        }
    }
}

/// Service 端口
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    /// 协议
    pub protocol: String,
    /// 端口号
    pub port: u32,
}

impl ServicePort {
    /// TCP 端口
    pub fn tcp(port: u32) -> Self {
        Self {
            protocol: "TCP".to_string(),
            port,
        }
    }
}

/// 派生服务
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedService {
    /// 名称
    pub name: String,
    /// 命名空间
    pub namespace: String,
    /// 持有该服务的策略集合，为空表示非本系统创建
    #[serde(default)]
    pub owners: BTreeSet<PolicyRef>,
    /// 端口列表
    pub ports: Vec<ServicePort>,
    /// Service 类型
    #[serde(default)]
    pub service_type: ServiceType,
    /// 存储分配的集群内部地址，分配后不可变更
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    /// 存储分配的唯一标识
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl DerivedService {
    /// 创建由单个策略持有的 ClusterIP 服务
    pub fn new(namespace: &str, name: &str, owner: PolicyRef, ports: Vec<ServicePort>) -> Self {
        let mut owners = BTreeSet::new();
        owners.insert(owner);
        Self {
            name: name.to_string(),
            namespace: namespace_or_default(namespace).to_string(),
            owners,
            ports,
            service_type: ServiceType::ClusterIP,
            cluster_ip: None,
            uid: None,
        }
    }

    /// 服务标识 (命名空间, 名称)
    pub fn key(&self) -> (String, String) {
        (namespace_or_default(&self.namespace).to_string(), self.name.clone())
    }

    /// 比较可变内容，忽略存储分配的不可变字段
    pub fn content_eq(&self, other: &DerivedService) -> bool {
        let mut a = self.ports.clone();
        let mut b = other.ports.clone();
        a.sort_by(|x, y| (x.port, &x.protocol).cmp(&(y.port, &y.protocol)));
        b.sort_by(|x, y| (x.port, &x.protocol).cmp(&(y.port, &y.protocol)));
        a == b && self.service_type == other.service_type && self.owners == other.owners
    }

    /// 从已存储对象继承集群内部地址与唯一标识
    pub fn inherit_immutable(&mut self, stored: &DerivedService) {
        self.cluster_ip = stored.cluster_ip.clone();
        self.uid = stored.uid.clone();
    }

    /// 是否由指定策略持有
    pub fn is_owned_by(&self, owner: &PolicyRef) -> bool {
        self.owners.contains(owner)
    }
}

impl fmt::Display for DerivedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service {}.{}", namespace_or_default(&self.namespace), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::PolicyKind;

    fn owner(name: &str) -> PolicyRef {
        PolicyRef::new(PolicyKind::Binding, "default", name)
    }

    #[test]
    fn test_content_eq_ignores_allocated_fields() {
        let a = DerivedService::new("default", "reviews", owner("b1"), vec![ServicePort::tcp(9080)]);
        let mut b = a.clone();
        b.cluster_ip = Some("10.96.0.12".to_string());
        b.uid = Some("abc".to_string());

        assert!(a.content_eq(&b));
    }

    #[test]
    fn test_content_eq_detects_owner_change() {
        let a = DerivedService::new("default", "reviews", owner("b1"), vec![ServicePort::tcp(9080)]);
        let mut b = a.clone();
        b.owners.insert(owner("b2"));

        assert!(!a.content_eq(&b));
        assert!(b.is_owned_by(&owner("b2")));
    }

    #[test]
    fn test_inherit_immutable() {
        let mut stored = DerivedService::new("", "reviews", owner("b1"), vec![ServicePort::tcp(80)]);
        stored.cluster_ip = Some("10.96.0.3".to_string());
        stored.uid = Some("uid-1".to_string());

        let mut fresh = DerivedService::new("", "reviews", owner("b1"), vec![ServicePort::tcp(9080)]);
        fresh.inherit_immutable(&stored);

        assert_eq!(fresh.cluster_ip.as_deref(), Some("10.96.0.3"));
        assert_eq!(fresh.uid.as_deref(), Some("uid-1"));
        assert_eq!(fresh.key(), ("default".to_string(), "reviews".to_string()));
    }
}
