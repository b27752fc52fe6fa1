//! 直连入口风格
//!
//! 本地工作负载经双向 TLS 直接访问对端集群的入口网关。每个远程服务派生一个
//! 按主机名合并端点的流量入口、一个双向 TLS 目标策略，以及一个供本地 DNS 解析的派生服务。

use meshlink_common::{
    Binding, DerivedService, DestinationPolicySpec, Endpoint, ExposurePolicy, Location, MeshKind,
    MeshObject, MeshSpec, PolicyRef, Port, RemoteService, Resolution, Result, ServicePort,
    TlsSettings, TrafficEntrySpec, TrafficPolicy,
};

use super::exposure::{convert_exposure, HostSuffix};
use super::{derived_meta, ConvertContext, StyleConverter};

/// 直连入口风格转换器
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectIngress;

impl StyleConverter for DirectIngress {
    fn convert_binding(&self, ctx: &mut ConvertContext<'_>, binding: &Binding, owner: &PolicyRef) -> Result<()> {
        ctx.seed(MeshKind::TrafficEntry, &owner.namespace);

        for remote in &binding.remote {
            let ip = ctx.cluster_info.ip(&remote.cluster);
            let port = ctx.cluster_info.port(&remote.cluster);
            for service in &remote.services {
                ctx.mesh.merge_by_host(traffic_entry(service, owner, &ip, port));
                ctx.mesh.merge_into(destination_policy(service, owner));
                let derived = derived_service(ctx, service, owner);
                ctx.services.insert(derived);
            }
        }
        Ok(())
    }

    fn convert_exposure(
        &self,
        ctx: &mut ConvertContext<'_>,
        policy: &ExposurePolicy,
        owner: &PolicyRef,
    ) -> Result<()> {
        convert_exposure(ctx, policy, owner, HostSuffix::Local)
    }
}

/// 指向对端入口网关的流量入口
fn traffic_entry(service: &RemoteService, owner: &PolicyRef, ip: &str, port: u32) -> MeshObject {
    MeshObject::new(
        derived_meta(owner, &format!("service-entry-{}", service.local_name())),
        MeshSpec::TrafficEntry(TrafficEntrySpec {
            hosts: vec![service.hostname()],
            addresses: Vec::new(),
            ports: vec![Port::new(service.client_port(), "HTTP", "http")],
            location: Location::MeshExternal,
            resolution: Resolution::Static,
            endpoints: vec![Endpoint::new(ip, "http", port)],
        }),
    )
}

/// 使用本地证书的双向 TLS 目标策略，SNI 为远程服务的真实主机名
fn destination_policy(service: &RemoteService, owner: &PolicyRef) -> MeshObject {
    MeshObject::new(
        derived_meta(owner, &format!("dest-rule-{}", service.local_name())),
        MeshSpec::DestinationPolicy(DestinationPolicySpec {
            host: service.hostname(),
            traffic_policy: Some(TrafficPolicy::with_tls(TlsSettings::mutual(&service.remote_hostname()))),
            subsets: Vec::new(),
        }),
    )
}

/// 派生服务，持有者为已有持有者与当前策略的并集
fn derived_service(ctx: &ConvertContext<'_>, service: &RemoteService, owner: &PolicyRef) -> DerivedService {
    let name = service.local_name();
    let mut derived = DerivedService::new(
        &owner.namespace,
        name,
        owner.clone(),
        vec![ServicePort::tcp(service.client_port())],
    );
    if let Some(existing) = ctx.existing_service(&owner.namespace, name) {
        derived.owners.extend(existing.owners.iter().cloned());
    }
    if let Some(pending) = ctx.services.get(&owner.namespace, name) {
        derived.owners.extend(pending.owners.iter().cloned());
    }
    derived
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use meshlink_common::{PolicyKind, RemoteCluster, StaticClusterInfo, TlsMode};

    fn owner(name: &str) -> PolicyRef {
        PolicyRef::new(PolicyKind::Binding, "default", name)
    }

    fn binding(name: &str) -> Binding {
        Binding::new("default", name).with_remote(
            RemoteCluster::new("cluster1")
                .with_service(RemoteService::new("reviews").with_alias("cluster1-reviews").with_port(9080)),
        )
    }

    #[test]
    fn test_binding_objects() {
        let store = MemoryStore::new();
        let info = StaticClusterInfo::new().with_gateway("cluster1", "169.62.129.93", 31380);
        let mut ctx = ConvertContext::new(&info, &store, &[]);

        DirectIngress
            .convert_binding(&mut ctx, &binding("b"), &owner("b"))
            .unwrap();
        let out = ctx.finish();

        let se = &out.mesh[0];
        assert_eq!(se.meta.name, "service-entry-cluster1-reviews");
        let spec = se.traffic_entry().unwrap();
        assert_eq!(spec.hosts, vec!["cluster1-reviews.default.svc.cluster.local"]);
        assert_eq!(spec.ports, vec![Port::new(9080, "HTTP", "http")]);
        assert_eq!(spec.resolution, Resolution::Static);
        assert_eq!(spec.endpoints, vec![Endpoint::new("169.62.129.93", "http", 31380)]);

        let dr = &out.mesh[1];
        assert_eq!(dr.meta.name, "dest-rule-cluster1-reviews");
        let tls = dr
            .destination_policy()
            .and_then(|d| d.traffic_policy.as_ref())
            .and_then(|p| p.tls.as_ref())
            .unwrap();
        assert_eq!(tls.mode, TlsMode::Mutual);
        assert_eq!(tls.sni.as_deref(), Some("reviews.default.svc.cluster.local"));

        assert_eq!(out.services.len(), 1);
        assert_eq!(out.services[0].name, "cluster1-reviews");
        assert_eq!(out.services[0].ports, vec![ServicePort::tcp(9080)]);
    }

    #[test]
    fn test_service_owners_accumulate() {
        let store = MemoryStore::new();
        let info = StaticClusterInfo::new();
        let mut existing = DerivedService::new("default", "cluster1-reviews", owner("old"), vec![]);
        existing.cluster_ip = Some("10.96.0.7".to_string());
        let existing = vec![existing];
        let mut ctx = ConvertContext::new(&info, &store, &existing);

        DirectIngress.convert_binding(&mut ctx, &binding("b1"), &owner("b1")).unwrap();
        DirectIngress.convert_binding(&mut ctx, &binding("b2"), &owner("b2")).unwrap();
        let out = ctx.finish();

        assert_eq!(out.services.len(), 1);
        let owners: Vec<&str> = out.services[0].owners.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(owners, vec!["b1", "b2", "old"]);
        // 集群地址由调和阶段从存储对象继承
        assert!(out.services[0].cluster_ip.is_none());
    }
}
