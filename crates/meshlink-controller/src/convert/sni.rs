//! SNI 风格
//!
//! 简化的拓扑：绑定的服务静态指向本地出口网关，暴露的服务以 `svc.cluster.global` 主机名对外。

use meshlink_common::{
    Binding, DestinationPolicySpec, Endpoint, ExposurePolicy, Location, MeshKind, MeshObject,
    MeshSpec, PolicyRef, Port, RemoteService, Resolution, Result, TlsSettings, TrafficEntrySpec,
    TrafficPolicy,
};

use super::exposure::{convert_exposure, HostSuffix};
use super::{derived_meta, ConvertContext, StyleConverter, EGRESS_GATEWAY_ADDRESS, GATEWAY_PORT};

/// SNI 风格转换器
#[derive(Debug, Clone, Copy, Default)]
pub struct Sni;

impl StyleConverter for Sni {
    fn convert_binding(&self, ctx: &mut ConvertContext<'_>, binding: &Binding, owner: &PolicyRef) -> Result<()> {
        ctx.seed(MeshKind::TrafficEntry, &owner.namespace);

        for remote in &binding.remote {
            for service in &remote.services {
                ctx.mesh.merge_by_host(traffic_entry(service, owner));
                ctx.mesh.merge_into(destination_policy(service, owner));
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
        convert_exposure(ctx, policy, owner, HostSuffix::Global)
    }
}

fn traffic_entry(service: &RemoteService, owner: &PolicyRef) -> MeshObject {
    MeshObject::new(
        derived_meta(owner, &format!("service-entry-{}", service.local_name())),
        MeshSpec::TrafficEntry(TrafficEntrySpec {
            hosts: vec![service.hostname()],
            addresses: Vec::new(),
            ports: vec![Port::new(service.client_port(), "HTTP", "http")],
            location: Location::MeshExternal,
            resolution: Resolution::Static,
            endpoints: vec![Endpoint::new(EGRESS_GATEWAY_ADDRESS, "tcp", GATEWAY_PORT)],
        }),
    )
}

fn destination_policy(service: &RemoteService, owner: &PolicyRef) -> MeshObject {
    let name = format!("dest-rule-{}-{}", service.local_name(), service.service_namespace());
    MeshObject::new(
        derived_meta(owner, &name),
        MeshSpec::DestinationPolicy(DestinationPolicySpec {
            host: service.hostname(),
            traffic_policy: Some(TrafficPolicy::with_tls(TlsSettings::mutual(&service.hostname()))),
            subsets: Vec::new(),
        }),
    )
}
