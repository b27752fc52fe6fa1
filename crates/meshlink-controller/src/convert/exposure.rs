//! 服务暴露策略转换
//!
//! 三种风格共用：为每个被暴露的服务派生一个带无 TLS 子集的目标策略、
//! 一个 TLS 透传网关以及一个按 SNI 路由到本地服务的路由。

use std::collections::BTreeMap;

use meshlink_common::{
    Destination, DestinationPolicySpec, Error, ExposedService, ExposurePolicy, GatewaySpec,
    MeshKind, MeshObject, MeshSpec, PolicyRef, Port, PortSelector, Result, RouteDestination,
    RouteSpec, Server, ServerTls, ServerTlsMode, Subset, TlsMatch, TlsRoute, TlsSettings,
    TrafficPolicy,
};

use super::{derived_meta, ConvertContext, GATEWAY_PORT};

/// 暴露主机名所用的集群域后缀
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostSuffix {
    /// `svc.cluster.local`
    Local,
    /// `svc.cluster.global`
    Global,
}

impl HostSuffix {
    fn as_str(&self) -> &'static str {
        match self {
            HostSuffix::Local => "svc.cluster.local",
            HostSuffix::Global => "svc.cluster.global",
        }
    }
}

/// 转换服务暴露策略
pub(crate) fn convert_exposure(
    ctx: &mut ConvertContext<'_>,
    policy: &ExposurePolicy,
    owner: &PolicyRef,
    suffix: HostSuffix,
) -> Result<()> {
    ctx.seed(MeshKind::DestinationPolicy, &owner.namespace);

    for exposed in &policy.exposed {
        let rule = destination_policy(ctx, exposed, owner)?;
        ctx.mesh.merge_by_host(rule);
        ctx.mesh.merge_into(gateway(exposed, owner, suffix));
        ctx.mesh.merge_into(route(exposed, owner, suffix));
    }
    Ok(())
}

/// 对外暴露的主机名 `<暴露名>.<策略命名空间>.<后缀>`
pub(crate) fn exposed_hostname(exposed: &ExposedService, owner: &PolicyRef, suffix: HostSuffix) -> String {
    format!("{}.{}.{}", exposed.exposed_name(), owner.namespace, suffix.as_str())
}

/// 入口网关名称
pub(crate) fn gateway_name(exposed: &ExposedService, owner: &PolicyRef) -> String {
    format!("istio-ingressgateway-{}-{}", exposed.exposed_name(), owner.namespace)
}

/// 带无 TLS 子集的目标策略
///
/// 暴露已有子集时继承该子集的标签选择器；引用的子集不存在时返回转换错误。
fn destination_policy(
    ctx: &ConvertContext<'_>,
    exposed: &ExposedService,
    owner: &PolicyRef,
) -> Result<MeshObject> {
    let host = exposed.backend_hostname();

    let labels = match exposed.subset_name() {
        None => BTreeMap::new(),
        Some(subset) => ctx
            .mesh
            .find_by_host(MeshKind::DestinationPolicy, &owner.namespace, &host)
            .and_then(|rule| rule.destination_policy())
            .and_then(|rule| rule.subset(subset))
            .map(|s| s.labels.clone())
            .ok_or_else(|| {
                Error::Conversion(format!(
                    "命名空间 {2} 中 {1} 的目标规则未定义暴露子集 {0:?}",
                    subset, host, owner.namespace
                ))
            })?,
    };

    let name = format!("dest-rule-{}-{}-notls", exposed.name, exposed.service_namespace());
    Ok(MeshObject::new(
        derived_meta(owner, &name),
        MeshSpec::DestinationPolicy(DestinationPolicySpec {
            host,
            traffic_policy: None,
            subsets: vec![Subset {
                name: exposed.notls_subset_name(),
                labels,
                traffic_policy: Some(TrafficPolicy::with_tls(TlsSettings::disabled())),
            }],
        }),
    ))
}

/// TLS 透传入口网关
fn gateway(exposed: &ExposedService, owner: &PolicyRef, suffix: HostSuffix) -> MeshObject {
    let mut selector = BTreeMap::new();
    selector.insert("istio".to_string(), "ingressgateway".to_string());

    MeshObject::new(
        derived_meta(owner, &gateway_name(exposed, owner)),
        MeshSpec::Gateway(GatewaySpec {
            servers: vec![Server {
                port: Port::new(
                    GATEWAY_PORT,
                    "TLS",
                    &format!("{}-{}-{}", exposed.name, owner.namespace, GATEWAY_PORT),
                ),
                hosts: vec![exposed_hostname(exposed, owner, suffix)],
                tls: Some(ServerTls {
                    mode: ServerTlsMode::Passthrough,
                }),
            }],
            selector,
        }),
    )
}

/// 按 SNI 把入口流量路由到本地服务的无 TLS 子集
fn route(exposed: &ExposedService, owner: &PolicyRef, suffix: HostSuffix) -> MeshObject {
    let host = exposed_hostname(exposed, owner, suffix);
    let name = format!("ingressgateway-to-{}-{}", exposed.exposed_name(), owner.namespace);

    MeshObject::new(
        derived_meta(owner, &name),
        MeshSpec::Route(RouteSpec {
            hosts: vec![host.clone()],
            gateways: vec![gateway_name(exposed, owner)],
            tls: vec![TlsRoute {
                matches: vec![TlsMatch {
                    sni_hosts: vec![host],
                    port: Some(GATEWAY_PORT),
                }],
                route: vec![RouteDestination {
                    destination: Destination {
                        host: exposed.backend_hostname(),
                        subset: Some(exposed.notls_subset_name()),
                        port: Some(PortSelector {
                            number: exposed.target_port(),
                        }),
                    },
                }],
            }],
        }),
    )
}
