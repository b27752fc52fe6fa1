//! 出口-入口风格
//!
//! 本地工作负载先到达本地出口网关，出口网关按 SNI 把 TLS 流量透传到对端集群的入口网关。
//! 该风格不创建派生服务。

use std::collections::BTreeMap;

use meshlink_common::{
    Binding, Destination, DestinationPolicySpec, Endpoint, ExposurePolicy, GatewaySpec, Location,
    MeshObject, MeshSpec, PolicyRef, Port, PortSelector, RemoteCluster, RemoteService, Resolution,
    Result, RouteDestination, RouteSpec, Server, ServerTls, ServerTlsMode, TlsMatch, TlsRoute,
    TlsSettings, TrafficEntrySpec, TrafficPolicy,
};

use super::exposure::{convert_exposure, HostSuffix};
use super::{derived_meta, ConvertContext, StyleConverter, EGRESS_GATEWAY_ADDRESS, GATEWAY_PORT};

/// 集群入口网关流量入口使用的占位虚拟地址
const CLUSTER_GATEWAY_ADDRESS: &str = "127.8.8.8";

/// 出口-入口风格转换器
#[derive(Debug, Clone, Copy, Default)]
pub struct EgressIngress;

impl StyleConverter for EgressIngress {
    fn convert_binding(&self, ctx: &mut ConvertContext<'_>, binding: &Binding, owner: &PolicyRef) -> Result<()> {
        for remote in &binding.remote {
            for service in &remote.services {
                ctx.mesh.merge_into(traffic_entry(service, owner));
                ctx.mesh.merge_into(destination_policy(service, owner));
                ctx.mesh.merge_into(gateway(service, owner));
                ctx.mesh.merge_into(route(remote, service, owner));
            }
            let ip = ctx.cluster_info.ip(&remote.cluster);
            let port = ctx.cluster_info.port(&remote.cluster);
            ctx.mesh.merge_into(cluster_traffic_entry(remote, owner, &ip, port));
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

fn egress_gateway_name(service: &RemoteService) -> String {
    format!("istio-egressgateway-{}-{}", service.name, service.service_namespace())
}

/// 经出口网关解析的服务流量入口
fn traffic_entry(service: &RemoteService, owner: &PolicyRef) -> MeshObject {
    MeshObject::new(
        derived_meta(owner, &format!("service-entry-{}", service.local_name())),
        MeshSpec::TrafficEntry(TrafficEntrySpec {
            hosts: vec![service.hostname()],
            addresses: Vec::new(),
            ports: vec![Port::new(GATEWAY_PORT, "HTTP", "http")],
            location: Location::MeshExternal,
            resolution: Resolution::Dns,
            endpoints: vec![Endpoint::new(EGRESS_GATEWAY_ADDRESS, "http", GATEWAY_PORT)],
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

/// 出口网关上的 TLS 透传监听器
fn gateway(service: &RemoteService, owner: &PolicyRef) -> MeshObject {
    let mut selector = BTreeMap::new();
    selector.insert("istio".to_string(), "egressgateway".to_string());

    MeshObject::new(
        derived_meta(owner, &egress_gateway_name(service)),
        MeshSpec::Gateway(GatewaySpec {
            servers: vec![Server {
                port: Port::new(
                    GATEWAY_PORT,
                    "TLS",
                    &format!("{}-{}-{}", service.local_name(), service.service_namespace(), GATEWAY_PORT),
                ),
                hosts: vec![service.hostname()],
                tls: Some(ServerTls {
                    mode: ServerTlsMode::Passthrough,
                }),
            }],
            selector,
        }),
    )
}

/// 从出口网关转发到对端入口网关的路由
fn route(remote: &RemoteCluster, service: &RemoteService, owner: &PolicyRef) -> MeshObject {
    let name = format!(
        "egressgateway-to-ingressgateway-{}-{}",
        service.name,
        service.service_namespace()
    );
    MeshObject::new(
        derived_meta(owner, &name),
        MeshSpec::Route(RouteSpec {
            hosts: vec![service.hostname()],
            gateways: vec![egress_gateway_name(service)],
            tls: vec![TlsRoute {
                matches: vec![TlsMatch {
                    sni_hosts: vec![service.hostname()],
                    port: Some(GATEWAY_PORT),
                }],
                route: vec![RouteDestination {
                    destination: Destination {
                        host: remote.gateway_hostname(),
                        subset: None,
                        port: Some(PortSelector { number: GATEWAY_PORT }),
                    },
                }],
            }],
        }),
    )
}

/// 对端集群入口网关的流量入口
fn cluster_traffic_entry(remote: &RemoteCluster, owner: &PolicyRef, ip: &str, port: u32) -> MeshObject {
    let name = format!("service-entry-ingress-gateway-{}", remote.cluster.to_lowercase());
    MeshObject::new(
        derived_meta(owner, &name),
        MeshSpec::TrafficEntry(TrafficEntrySpec {
            hosts: vec![remote.gateway_hostname()],
            addresses: vec![CLUSTER_GATEWAY_ADDRESS.to_string()],
            ports: vec![Port::new(GATEWAY_PORT, "TCP", "tcp")],
            location: Location::MeshExternal,
            resolution: Resolution::Dns,
            endpoints: vec![Endpoint::new(ip, "tcp", port)],
        }),
    )
}
