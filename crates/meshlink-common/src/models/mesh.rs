//! 网格配置对象模型
//!
//! 该模块定义了由多集群策略派生出的四类底层网格配置对象：流量入口（ServiceEntry）、
//! 目标策略（DestinationRule）、网关（Gateway）与路由（VirtualService），
//! 以及按类型区分字段的内容比较逻辑。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::policy::{namespace_or_default, PolicyRef};

/// 记录派生对象来源策略的注解键
pub const PROVENANCE_ANNOTATION: &str = "multicluster.istio.io/provenance";

/// 网格配置对象的 API 版本
pub const MESH_API_VERSION: &str = "networking.istio.io/v1alpha3";

/// 客户端证书链路径
pub const CLIENT_CERTIFICATE_PATH: &str = "/etc/certs/cert-chain.pem";

/// 客户端私钥路径
pub const PRIVATE_KEY_PATH: &str = "/etc/certs/key.pem";

/// 根证书路径
pub const CA_CERTIFICATES_PATH: &str = "/etc/certs/root-cert.pem";

/// 网格配置对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeshKind {
    /// 流量入口
    TrafficEntry,
    /// 目标策略
    DestinationPolicy,
    /// 网关
    Gateway,
    /// 路由
    Route,
}

impl MeshKind {
    /// 所有类型
    pub const ALL: [MeshKind; 4] = [
        MeshKind::TrafficEntry,
        MeshKind::DestinationPolicy,
        MeshKind::Gateway,
        MeshKind::Route,
    ];

    /// 清单中使用的资源类型名
    pub fn manifest_kind(&self) -> &'static str {
        match self {
            MeshKind::TrafficEntry => "ServiceEntry",
            MeshKind::DestinationPolicy => "DestinationRule",
            MeshKind::Gateway => "Gateway",
            MeshKind::Route => "VirtualService",
        }
    }
}

impl fmt::Display for MeshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshKind::TrafficEntry => write!(f, "service-entry"),
            MeshKind::DestinationPolicy => write!(f, "destination-rule"),
            MeshKind::Gateway => write!(f, "gateway"),
            MeshKind::Route => write!(f, "virtual-service"),
        }
    }
}

impl FromStr for MeshKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "service-entry" | "ServiceEntry" => Ok(MeshKind::TrafficEntry),
            "destination-rule" | "DestinationRule" => Ok(MeshKind::DestinationPolicy),
            "gateway" | "Gateway" => Ok(MeshKind::Gateway),
            "virtual-service" | "VirtualService" => Ok(MeshKind::Route),
            _ => Err(Error::Serialization(format!("无效的网格配置类型: {}", s))),
        }
    }
}

/// 网格配置对象标识：(类型, 命名空间, 名称)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshObjectId {
    /// 对象类型
    pub kind: MeshKind,
    /// 命名空间
    pub namespace: String,
    /// 名称
    pub name: String,
}

impl fmt::Display for MeshObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.kind, self.namespace, self.name)
    }
}

/// 网格配置对象元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshMeta {
    /// 名称
    pub name: String,
    /// 命名空间
    pub namespace: String,
    /// 来源标记，非本系统创建的对象为空
    pub provenance: Option<PolicyRef>,
    /// 存储分配的修订版本
    pub revision: Option<String>,
    /// 标签
    pub labels: BTreeMap<String, String>,
}

impl MeshMeta {
    /// 创建带来源标记的元数据
    pub fn new(namespace: &str, name: &str, provenance: PolicyRef) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace_or_default(namespace).to_string(),
            provenance: Some(provenance),
            ..Default::default()
        }
    }

    /// 创建不带来源标记的元数据
    pub fn unprovenanced(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace_or_default(namespace).to_string(),
            ..Default::default()
        }
    }
}

/// 端口定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// 端口号
    pub number: u32,
    /// 协议（HTTP、TCP、TLS 等）
    pub protocol: String,
    /// 端口名称
    pub name: String,
}

impl Port {
    /// 创建端口定义
    pub fn new(number: u32, protocol: &str, name: &str) -> Self {
        Self {
            number,
            protocol: protocol.to_string(),
            name: name.to_string(),
        }
    }
}

/// 流量入口所在位置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Location {
    /// 网格外部
    #[default]
    MeshExternal,
    /// 网格内部
    MeshInternal,
}

/// 端点解析方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// 不解析
    #[default]
    None,
    /// 使用静态地址
    Static,
    /// 通过 DNS 解析
    Dns,
}

/// 流量入口端点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// 端点地址
    pub address: String,
    /// 协议名到端口的映射
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, u32>,
}

impl Endpoint {
    /// 创建带单个协议端口的端点
    pub fn new(address: &str, protocol: &str, port: u32) -> Self {
        let mut ports = BTreeMap::new();
        ports.insert(protocol.to_string(), port);
        Self {
            address: address.to_string(),
            ports,
        }
    }
}

/// 流量入口规格
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficEntrySpec {
    /// 主机名列表
    pub hosts: Vec<String>,
    /// 虚拟地址列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    /// 端口列表
    #[serde(default)]
    pub ports: Vec<Port>,
    /// 所在位置
    #[serde(default)]
    pub location: Location,
    /// 解析方式
    #[serde(default)]
    pub resolution: Resolution,
    /// 端点列表，按地址升序
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl TrafficEntrySpec {
    /// 按地址查找端点
    pub fn endpoint(&self, address: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.address == address)
    }

    /// 按地址升序排列端点
    pub fn sort_endpoints(&mut self) {
        self.endpoints.sort_by(|a, b| a.address.cmp(&b.address));
    }

    fn normalize(&mut self) {
        self.hosts.sort();
        self.addresses.sort();
        self.ports.sort_by(|a, b| (a.number, &a.name).cmp(&(b.number, &b.name)));
        self.sort_endpoints();
    }
}

/// TLS 模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TlsMode {
    /// 不使用 TLS
    Disable,
    /// 单向 TLS
    Simple,
    /// 使用指定证书的双向 TLS
    Mutual,
    /// 使用网格证书的双向 TLS
    IstioMutual,
}

/// 客户端 TLS 设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    /// TLS 模式
    pub mode: TlsMode,
    /// 客户端证书
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    /// 私钥
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// CA 证书
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificates: Option<String>,
    /// SNI 主机名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
}

impl TlsSettings {
    /// 关闭 TLS
    pub fn disabled() -> Self {
        Self {
            mode: TlsMode::Disable,
            client_certificate: None,
            private_key: None,
            ca_certificates: None,
            sni: None,
        }
    }

    /// 使用本地证书与对端建立双向 TLS
    pub fn mutual(sni: &str) -> Self {
        Self {
            mode: TlsMode::Mutual,
            client_certificate: Some(CLIENT_CERTIFICATE_PATH.to_string()),
            private_key: Some(PRIVATE_KEY_PATH.to_string()),
            ca_certificates: Some(CA_CERTIFICATES_PATH.to_string()),
            sni: Some(sni.to_string()),
        }
    }
}

/// 流量策略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPolicy {
    /// TLS 设置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
}

impl TrafficPolicy {
    /// 仅包含 TLS 设置的流量策略
    pub fn with_tls(tls: TlsSettings) -> Self {
        Self { tls: Some(tls) }
    }
}

/// 目标策略子集
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subset {
    /// 子集名称
    pub name: String,
    /// 工作负载标签选择器
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// 子集流量策略
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_policy: Option<TrafficPolicy>,
}

/// 目标策略规格
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationPolicySpec {
    /// 目标主机
    pub host: String,
    /// 主机级流量策略
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_policy: Option<TrafficPolicy>,
    /// 子集列表，按名称升序
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsets: Vec<Subset>,
}

impl DestinationPolicySpec {
    /// 按名称查找子集
    pub fn subset(&self, name: &str) -> Option<&Subset> {
        self.subsets.iter().find(|s| s.name == name)
    }

    /// 按名称升序排列子集
    pub fn sort_subsets(&mut self) {
        self.subsets.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// 网关监听器 TLS 模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerTlsMode {
    /// 透传 TLS 流量，按 SNI 路由
    Passthrough,
    /// 终结单向 TLS
    Simple,
    /// 终结双向 TLS
    Mutual,
}

/// 网关监听器 TLS 选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTls {
    /// TLS 模式
    pub mode: ServerTlsMode,
}

/// 网关监听器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// 监听端口
    pub port: Port,
    /// 绑定的主机名
    pub hosts: Vec<String>,
    /// TLS 选项
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ServerTls>,
}

/// 网关规格
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySpec {
    /// 监听器列表
    pub servers: Vec<Server>,
    /// 网关工作负载选择器
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

/// TLS 路由匹配条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsMatch {
    /// 匹配的 SNI 主机名
    pub sni_hosts: Vec<String>,
    /// 匹配的端口
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
}

/// 端口选择器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSelector {
    /// 端口号
    pub number: u32,
}

/// 路由目的地
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// 目标主机
    pub host: String,
    /// 目标子集
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
    /// 目标端口
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

/// 带权重的路由目的地
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDestination {
    /// 目的地
    pub destination: Destination,
}

/// TLS 路由规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsRoute {
    /// 匹配条件
    #[serde(rename = "match")]
    pub matches: Vec<TlsMatch>,
    /// 目的地列表
    pub route: Vec<RouteDestination>,
}

/// 路由规格
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// 主机名列表
    pub hosts: Vec<String>,
    /// 绑定的网关
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    /// TLS 路由规则
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsRoute>,
}

/// 网格配置对象规格
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshSpec {
    /// 流量入口
    TrafficEntry(TrafficEntrySpec),
    /// 目标策略
    DestinationPolicy(DestinationPolicySpec),
    /// 网关
    Gateway(GatewaySpec),
    /// 路由
    Route(RouteSpec),
}

impl MeshSpec {
    /// 规格对应的对象类型
    pub fn kind(&self) -> MeshKind {
        match self {
            MeshSpec::TrafficEntry(_) => MeshKind::TrafficEntry,
            MeshSpec::DestinationPolicy(_) => MeshKind::DestinationPolicy,
            MeshSpec::Gateway(_) => MeshKind::Gateway,
            MeshSpec::Route(_) => MeshKind::Route,
        }
    }

    /// 排序后的副本，用于与顺序无关的比较
    pub fn normalized(&self) -> MeshSpec {
        let mut spec = self.clone();
        match &mut spec {
            MeshSpec::TrafficEntry(se) => se.normalize(),
            MeshSpec::DestinationPolicy(dr) => dr.sort_subsets(),
            MeshSpec::Gateway(gw) => {
                for server in &mut gw.servers {
                    server.hosts.sort();
                }
                gw.servers.sort_by(|a, b| a.port.name.cmp(&b.port.name));
            }
            MeshSpec::Route(vs) => {
                vs.hosts.sort();
                vs.gateways.sort();
            }
        }
        spec
    }
}

/// 网格配置对象
///
/// `spec` 为空表示仅携带标识的删除请求，调用方只能按类型与名称删除。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshObject {
    /// 对象类型
    pub kind: MeshKind,
    /// 元数据
    pub meta: MeshMeta,
    /// 对象规格
    pub spec: Option<MeshSpec>,
}

impl MeshObject {
    /// 创建网格配置对象，类型由规格决定
    pub fn new(meta: MeshMeta, spec: MeshSpec) -> Self {
        Self {
            kind: spec.kind(),
            meta,
            spec: Some(spec),
        }
    }

    /// 对象标识
    pub fn id(&self) -> MeshObjectId {
        MeshObjectId {
            kind: self.kind,
            namespace: namespace_or_default(&self.meta.namespace).to_string(),
            name: self.meta.name.clone(),
        }
    }

    /// 清除规格与其余元数据，仅保留类型、名称和命名空间
    pub fn into_tombstone(self) -> Self {
        Self {
            kind: self.kind,
            meta: MeshMeta {
                name: self.meta.name,
                namespace: self.meta.namespace,
                ..Default::default()
            },
            spec: None,
        }
    }

    /// 比较两个对象的内容，忽略修订版本等易变元数据以及列表顺序
    pub fn content_eq(&self, other: &MeshObject) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match (&self.spec, &other.spec) {
            (Some(a), Some(b)) => a.normalized() == b.normalized(),
            (None, None) => true,
            _ => false,
        }
    }

    /// 流量入口规格
    pub fn traffic_entry(&self) -> Option<&TrafficEntrySpec> {
        match &self.spec {
            Some(MeshSpec::TrafficEntry(se)) => Some(se),
            _ => None,
        }
    }

    /// 可变的流量入口规格
    pub fn traffic_entry_mut(&mut self) -> Option<&mut TrafficEntrySpec> {
        match &mut self.spec {
            Some(MeshSpec::TrafficEntry(se)) => Some(se),
            _ => None,
        }
    }

    /// 目标策略规格
    pub fn destination_policy(&self) -> Option<&DestinationPolicySpec> {
        match &self.spec {
            Some(MeshSpec::DestinationPolicy(dr)) => Some(dr),
            _ => None,
        }
    }

    /// 可变的目标策略规格
    pub fn destination_policy_mut(&mut self) -> Option<&mut DestinationPolicySpec> {
        match &mut self.spec {
            Some(MeshSpec::DestinationPolicy(dr)) => Some(dr),
            _ => None,
        }
    }

    /// 网关规格
    pub fn gateway(&self) -> Option<&GatewaySpec> {
        match &self.spec {
            Some(MeshSpec::Gateway(gw)) => Some(gw),
            _ => None,
        }
    }

    /// 路由规格
    pub fn route(&self) -> Option<&RouteSpec> {
        match &self.spec {
            Some(MeshSpec::Route(vs)) => Some(vs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::PolicyKind;

    fn entry(endpoints: Vec<Endpoint>) -> MeshObject {
        MeshObject::new(
            MeshMeta::new(
                "default",
                "service-entry-reviews",
                PolicyRef::new(PolicyKind::Binding, "default", "b"),
            ),
            MeshSpec::TrafficEntry(TrafficEntrySpec {
                hosts: vec!["reviews.default.svc.cluster.local".to_string()],
                ports: vec![Port::new(80, "HTTP", "http")],
                location: Location::MeshExternal,
                resolution: Resolution::Static,
                endpoints,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_mesh_kind_parsing() {
        for kind in MeshKind::ALL {
            assert_eq!(kind.to_string().parse::<MeshKind>().unwrap(), kind);
            assert_eq!(kind.manifest_kind().parse::<MeshKind>().unwrap(), kind);
        }
        assert!("Service".parse::<MeshKind>().is_err());
    }

    #[test]
    fn test_content_eq_ignores_order_and_revision() {
        let a = entry(vec![
            Endpoint::new("10.0.0.2", "http", 80),
            Endpoint::new("10.0.0.1", "http", 80),
        ]);
        let mut b = entry(vec![
            Endpoint::new("10.0.0.1", "http", 80),
            Endpoint::new("10.0.0.2", "http", 80),
        ]);
        b.meta.revision = Some("42".to_string());
        b.meta.provenance = None;

        assert!(a.content_eq(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_eq_detects_port_change() {
        let a = entry(vec![Endpoint::new("10.0.0.1", "http", 80)]);
        let b = entry(vec![Endpoint::new("10.0.0.1", "http", 8080)]);
        assert!(!a.content_eq(&b));
    }

    #[test]
    fn test_tombstone_keeps_identity() {
        let mut obj = entry(vec![Endpoint::new("10.0.0.1", "http", 80)]);
        obj.meta.revision = Some("7".to_string());
        obj.meta.labels.insert("app".to_string(), "reviews".to_string());
        let id = obj.id();
        let tombstone = obj.into_tombstone();

        assert!(tombstone.spec.is_none());
        assert!(tombstone.meta.provenance.is_none());
        assert!(tombstone.meta.revision.is_none());
        assert!(tombstone.meta.labels.is_empty());
        assert_eq!(tombstone.id(), id);
        assert_eq!(tombstone.kind, MeshKind::TrafficEntry);
        assert_eq!(id.to_string(), "service-entry default.service-entry-reviews");
    }

    #[test]
    fn test_tls_settings_serialization() {
        let yaml = serde_yaml::to_string(&TlsSettings::mutual("reviews.default.svc.cluster.local")).unwrap();
        assert!(yaml.contains("mode: MUTUAL"));
        assert!(yaml.contains("clientCertificate: /etc/certs/cert-chain.pem"));
        assert!(yaml.contains("sni: reviews.default.svc.cluster.local"));
    }
}
