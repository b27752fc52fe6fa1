//! 对端服务交换
//!
//! 服务端按请求方集群筛选被暴露的服务；客户端把对端返回的服务列表转换为
//! 远程服务绑定，并判断本地绑定是否需要更新。两端均不涉及网络 I/O。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use meshlink_common::{namespace_or_default, Binding, PolicyObject, RemoteCluster, RemoteService};

use crate::config::{ClusterConfig, ConnectionMode};
use crate::manager::PolicyEvent;

/// 记录连接模式的绑定标签键
pub const CONNECTION_MODE_LABEL: &str = "connection";

/// 对端可见的被暴露服务
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExposedServiceInfo {
    /// 对外名称（别名优先）
    pub name: String,
    /// 暴露策略所在命名空间
    pub namespace: String,
    /// 端口，0 表示未指定
    #[serde(default)]
    pub port: u32,
}

/// 对端查询的响应
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExposedServices {
    /// 被暴露的服务
    #[serde(default)]
    pub services: Vec<ExposedServiceInfo>,
}

impl ExposedServices {
    fn as_set(&self) -> BTreeSet<(&str, &str, u32)> {
        self.services
            .iter()
            .map(|s| (s.name.as_str(), s.namespace.as_str(), s.port))
            .collect()
    }
}

/// 列出暴露给指定集群的服务
///
/// 未限定集群的服务对所有集群可见。调用方需先确认请求方受信任。
pub fn exposed_services_for(policies: &[PolicyObject], cluster: &str) -> ExposedServices {
    let mut services = Vec::new();
    for policy in policies {
        let policy = match policy {
            PolicyObject::Exposure(policy) => policy,
            PolicyObject::Binding(_) => continue,
        };
        let namespace = namespace_or_default(&policy.namespace);
        for exposed in policy.exposed.iter().filter(|e| e.is_exposed_to(cluster)) {
            services.push(ExposedServiceInfo {
                name: exposed.exposed_name().to_string(),
                namespace: namespace.to_string(),
                port: exposed.port.unwrap_or_default(),
            });
        }
    }
    ExposedServices { services }
}

/// 以对端返回的服务列表构建远程服务绑定
///
/// 绑定名为 `<对端小写>-services`，并以标签记录连接模式；服务列表为空时不创建绑定。
pub fn binding_from_exposed(peer: &str, exposed: &ExposedServices, mode: ConnectionMode) -> Option<Binding> {
    let namespace = exposed.services.first()?.namespace.clone();

    let mut remote = RemoteCluster::new(peer);
    for service in &exposed.services {
        let mut rs = RemoteService::new(&service.name)
            .with_alias(&service.name)
            .with_namespace(&service.namespace);
        if service.port != 0 {
            rs = rs.with_port(service.port);
        }
        remote = remote.with_service(rs);
    }

    Some(
        Binding::new(&namespace, &format!("{}-services", peer.to_lowercase()))
            .with_label(CONNECTION_MODE_LABEL, &mode.to_string())
            .with_remote(remote),
    )
}

/// 绑定上记录的连接模式，未标记或无法识别时为 live
pub fn connection_mode(binding: &Binding) -> ConnectionMode {
    binding
        .labels
        .get(CONNECTION_MODE_LABEL)
        .and_then(|mode| mode.parse().ok())
        .unwrap_or_default()
}

/// 查找引用了指定对端的绑定
pub fn binding_for_peer<'a>(bindings: &'a [Binding], peer: &str) -> Option<&'a Binding> {
    bindings
        .iter()
        .find(|b| b.remote.iter().any(|r| r.cluster == peer))
}

/// 本地绑定是否与对端当前暴露的服务不一致
pub fn needs_update(bindings: &[Binding], peer: &str, exposed: &ExposedServices) -> bool {
    let remote = match bindings
        .iter()
        .flat_map(|b| b.remote.iter())
        .find(|r| r.cluster == peer)
    {
        Some(remote) => remote,
        None => return !exposed.services.is_empty(),
    };

    let current: BTreeSet<(&str, &str, u32)> = remote
        .services
        .iter()
        .map(|s| (s.name.as_str(), s.service_namespace(), s.port.unwrap_or_default()))
        .collect();
    current != exposed.as_set()
}

/// 根据对端的最新响应生成需要处理的策略事件
///
/// 旧绑定先删除再创建新绑定；对端不再暴露任何服务时只删除旧绑定。
pub fn plan_peer_update(bindings: &[Binding], peer: &ClusterConfig, exposed: &ExposedServices) -> Vec<PolicyEvent> {
    if !needs_update(bindings, &peer.id, exposed) {
        debug!("对端 {} 暴露的服务未变化", peer.id);
        return Vec::new();
    }

    let mut events = Vec::new();
    if let Some(old) = binding_for_peer(bindings, &peer.id) {
        events.push(PolicyEvent::Deleted(old.clone().into()));
    }
    if let Some(new) = binding_from_exposed(&peer.id, exposed, peer.connection_mode) {
        events.push(PolicyEvent::Added(new.into()));
    }
    debug!("对端 {} 的绑定需要更新: {} 个事件", peer.id, events.len());
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshlink_common::{ExposedService, ExposurePolicy};

    fn policies() -> Vec<PolicyObject> {
        vec![
            ExposurePolicy::new("istio-private", "reviews")
                .with_exposed(
                    ExposedService::new("reviews")
                        .with_alias("reviews-v2")
                        .with_port(9080)
                        .with_cluster("cluster2"),
                )
                .with_exposed(ExposedService::new("ratings"))
                .into(),
            Binding::new("default", "ignored").into(),
        ]
    }

    fn info(name: &str, namespace: &str, port: u32) -> ExposedServiceInfo {
        ExposedServiceInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            port,
        }
    }

    #[test]
    fn test_exposed_services_filtered_by_cluster() {
        let for_cluster2 = exposed_services_for(&policies(), "cluster2");
        assert_eq!(
            for_cluster2.services,
            vec![info("reviews-v2", "istio-private", 9080), info("ratings", "istio-private", 0)]
        );

        let for_cluster3 = exposed_services_for(&policies(), "cluster3");
        assert_eq!(for_cluster3.services, vec![info("ratings", "istio-private", 0)]);
    }

    #[test]
    fn test_wire_format() {
        let exposed = ExposedServices {
            services: vec![info("reviews", "default", 9080)],
        };
        let json = serde_json::to_string(&exposed).unwrap();
        assert_eq!(json, r#"{"Services":[{"Name":"reviews","Namespace":"default","Port":9080}]}"#);
        assert_eq!(serde_json::from_str::<ExposedServices>(&json).unwrap(), exposed);
    }

    #[test]
    fn test_binding_from_exposed() {
        let exposed = ExposedServices {
            services: vec![info("reviews", "default", 9080), info("ratings", "default", 0)],
        };
        let binding = binding_from_exposed("Cluster2", &exposed, ConnectionMode::Potential).unwrap();

        assert_eq!(binding.name, "cluster2-services");
        assert_eq!(binding.namespace, "default");
        assert_eq!(connection_mode(&binding), ConnectionMode::Potential);
        assert_eq!(binding.remote[0].cluster, "Cluster2");
        let services = &binding.remote[0].services;
        assert_eq!(services[0].alias.as_deref(), Some("reviews"));
        assert_eq!(services[0].port, Some(9080));
        assert_eq!(services[1].port, None);

        assert!(binding_from_exposed("Cluster2", &ExposedServices::default(), ConnectionMode::Live).is_none());
    }

    #[test]
    fn test_needs_update_compares_service_sets() {
        let exposed = ExposedServices {
            services: vec![info("reviews", "default", 9080)],
        };
        let current = vec![binding_from_exposed("cluster2", &exposed, ConnectionMode::Live).unwrap()];

        assert!(!needs_update(&current, "cluster2", &exposed));

        let moved = ExposedServices {
            services: vec![info("reviews", "default", 9081)],
        };
        assert!(needs_update(&current, "cluster2", &moved));
        assert!(needs_update(&[], "cluster2", &exposed));
        assert!(!needs_update(&[], "cluster2", &ExposedServices::default()));
    }

    #[test]
    fn test_plan_peer_update_replaces_binding() {
        let peer = ClusterConfig {
            id: "cluster2".to_string(),
            ..Default::default()
        };
        let old = ExposedServices {
            services: vec![info("reviews", "default", 9080)],
        };
        let current = vec![binding_from_exposed("cluster2", &old, ConnectionMode::Live).unwrap()];

        assert!(plan_peer_update(&current, &peer, &old).is_empty());

        let new = ExposedServices {
            services: vec![info("reviews", "default", 9080), info("ratings", "default", 9080)],
        };
        let events = plan_peer_update(&current, &peer, &new);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], PolicyEvent::Deleted(p) if p.name() == "cluster2-services"));
        assert!(matches!(&events[1], PolicyEvent::Added(PolicyObject::Binding(b)) if b.remote[0].services.len() == 2));

        let gone = plan_peer_update(&current, &peer, &ExposedServices::default());
        assert_eq!(gone.len(), 1);
        assert!(matches!(&gone[0], PolicyEvent::Deleted(_)));
    }
}
