//! 多集群策略模型
//!
//! 该模块定义了管理员声明的两类多集群意图：服务暴露策略（将本地服务暴露给指定的对端集群）
//! 与远程服务绑定（绑定对端集群暴露的服务），以及指向策略对象的来源标记。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// 默认命名空间
pub const DEFAULT_NAMESPACE: &str = "default";

/// 未指定端口时使用的默认端口
pub const DEFAULT_SERVICE_PORT: u32 = 80;

/// 返回非空命名空间，空字符串视为 `default`
pub fn namespace_or_default(namespace: &str) -> &str {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    }
}

/// 策略对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PolicyKind {
    /// 服务暴露策略
    Exposure,
    /// 远程服务绑定
    Binding,
}

impl PolicyKind {
    /// 清单中使用的资源类型名
    pub fn manifest_kind(&self) -> &'static str {
        match self {
            PolicyKind::Exposure => "ServiceExpositionPolicy",
            PolicyKind::Binding => "RemoteServiceBinding",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Exposure => write!(f, "service-exposition-policy"),
            PolicyKind::Binding => write!(f, "remote-service-binding"),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "service-exposition-policy" | "ServiceExpositionPolicy" => Ok(PolicyKind::Exposure),
            "remote-service-binding" | "RemoteServiceBinding" => Ok(PolicyKind::Binding),
            _ => Err(Error::Serialization(format!("无效的策略类型: {}", s))),
        }
    }
}

/// 策略对象引用，即派生对象的来源标记
///
/// 文本形式为 `<类型>/<命名空间>/<名称>`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyRef {
    /// 策略类型
    pub kind: PolicyKind,
    /// 策略所在命名空间
    pub namespace: String,
    /// 策略名称
    pub name: String,
}

impl PolicyRef {
    /// 创建新的策略引用，空命名空间归一化为 `default`
    pub fn new(kind: PolicyKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace_or_default(namespace).to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl FromStr for PolicyRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [kind, namespace, name] if !name.is_empty() => {
                Ok(PolicyRef::new(kind.parse()?, namespace, name))
            }
            _ => Err(Error::Serialization(format!("无效的来源标记: {}", s))),
        }
    }
}

impl Serialize for PolicyRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PolicyRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 被暴露的服务
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedService {
    /// 服务名称
    pub name: String,
    /// 对外暴露时使用的别名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// 服务所在命名空间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// 服务端口
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    /// 暴露的已有子集
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
    /// 允许访问的集群，为空表示所有集群
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub clusters: BTreeSet<String>,
}

impl ExposedService {
    /// 创建新的被暴露服务
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// 设置别名
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// 设置服务命名空间
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// 设置服务端口
    pub fn with_port(mut self, port: u32) -> Self {
        self.port = Some(port);
        self
    }

    /// 设置暴露的子集
    pub fn with_subset(mut self, subset: &str) -> Self {
        self.subset = Some(subset.to_string());
        self
    }

    /// 添加允许访问的集群
    pub fn with_cluster(mut self, cluster: &str) -> Self {
        self.clusters.insert(cluster.to_string());
        self
    }

    /// 对外暴露的名称（别名优先）
    pub fn exposed_name(&self) -> &str {
        non_empty(&self.alias).unwrap_or(&self.name)
    }

    /// 服务所在命名空间，未指定时为 `default`
    pub fn service_namespace(&self) -> &str {
        namespace_or_default(non_empty(&self.namespace).unwrap_or(""))
    }

    /// 服务监听的端口，未指定时为 80
    pub fn target_port(&self) -> u32 {
        self.port.filter(|p| *p != 0).unwrap_or(DEFAULT_SERVICE_PORT)
    }

    /// 暴露的子集名称
    pub fn subset_name(&self) -> Option<&str> {
        non_empty(&self.subset)
    }

    /// 无 TLS 子集名称：`notls` 或 `notls-<子集>`
    pub fn notls_subset_name(&self) -> String {
        match self.subset_name() {
            Some(subset) => format!("notls-{}", subset),
            None => "notls".to_string(),
        }
    }

    /// 本地后端服务的主机名
    pub fn backend_hostname(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.name, self.service_namespace())
    }

    /// 是否暴露给指定集群
    pub fn is_exposed_to(&self, cluster: &str) -> bool {
        self.clusters.is_empty() || self.clusters.contains(cluster)
    }
}

/// 服务暴露策略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposurePolicy {
    /// 策略名称
    pub name: String,
    /// 策略所在命名空间
    #[serde(default)]
    pub namespace: String,
    /// 策略标签
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// 被暴露的服务列表（有序）
    #[serde(default)]
    pub exposed: Vec<ExposedService>,
}

impl ExposurePolicy {
    /// 创建新的服务暴露策略
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    /// 添加被暴露的服务
    pub fn with_exposed(mut self, service: ExposedService) -> Self {
        self.exposed.push(service);
        self
    }
}

/// 远程服务
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteService {
    /// 远程服务名称
    pub name: String,
    /// 本地使用的别名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// 服务命名空间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// 客户端访问端口
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
}

impl RemoteService {
    /// 创建新的远程服务
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// 设置别名
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// 设置命名空间
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// 设置端口
    pub fn with_port(mut self, port: u32) -> Self {
        self.port = Some(port);
        self
    }

    /// 本地名称（别名优先）
    pub fn local_name(&self) -> &str {
        non_empty(&self.alias).unwrap_or(&self.name)
    }

    /// 服务命名空间，未指定时为 `default`
    pub fn service_namespace(&self) -> &str {
        namespace_or_default(non_empty(&self.namespace).unwrap_or(""))
    }

    /// 本地使用的主机名 `<本地名称>.<命名空间>.svc.cluster.local`
    pub fn hostname(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.local_name(), self.service_namespace())
    }

    /// 远程服务的真实主机名，用作 TLS SNI
    pub fn remote_hostname(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.name, self.service_namespace())
    }

    /// 客户端使用的端口，未指定时为 80
    pub fn client_port(&self) -> u32 {
        self.port.filter(|p| *p != 0).unwrap_or(DEFAULT_SERVICE_PORT)
    }
}

/// 远程集群及其上被绑定的服务
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCluster {
    /// 集群标识
    pub cluster: String,
    /// 绑定的服务列表
    #[serde(default)]
    pub services: Vec<RemoteService>,
}

impl RemoteCluster {
    /// 创建新的远程集群
    pub fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            services: Vec::new(),
        }
    }

    /// 添加服务
    pub fn with_service(mut self, service: RemoteService) -> Self {
        self.services.push(service);
        self
    }

    /// 集群入口网关主机名 `<集群小写>.myorg`
    pub fn gateway_hostname(&self) -> String {
        format!("{}.myorg", self.cluster.to_lowercase())
    }
}

/// 远程服务绑定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// 绑定名称
    pub name: String,
    /// 绑定所在命名空间
    #[serde(default)]
    pub namespace: String,
    /// 绑定标签
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// 远程集群列表
    #[serde(default)]
    pub remote: Vec<RemoteCluster>,
}

impl Binding {
    /// 创建新的远程服务绑定
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    /// 添加远程集群
    pub fn with_remote(mut self, remote: RemoteCluster) -> Self {
        self.remote.push(remote);
        self
    }

    /// 添加标签
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

/// 多集群策略对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PolicyObject {
    /// 服务暴露策略
    Exposure(ExposurePolicy),
    /// 远程服务绑定
    Binding(Binding),
}

impl PolicyObject {
    /// 策略类型
    pub fn kind(&self) -> PolicyKind {
        match self {
            PolicyObject::Exposure(_) => PolicyKind::Exposure,
            PolicyObject::Binding(_) => PolicyKind::Binding,
        }
    }

    /// 策略名称
    pub fn name(&self) -> &str {
        match self {
            PolicyObject::Exposure(p) => &p.name,
            PolicyObject::Binding(b) => &b.name,
        }
    }

    /// 策略命名空间，未指定时为 `default`
    pub fn namespace(&self) -> &str {
        match self {
            PolicyObject::Exposure(p) => namespace_or_default(&p.namespace),
            PolicyObject::Binding(b) => namespace_or_default(&b.namespace),
        }
    }

    /// 策略标签
    pub fn labels(&self) -> &BTreeMap<String, String> {
        match self {
            PolicyObject::Exposure(p) => &p.labels,
            PolicyObject::Binding(b) => &b.labels,
        }
    }

    /// 指向该策略的来源标记
    pub fn policy_ref(&self) -> PolicyRef {
        PolicyRef::new(self.kind(), self.namespace(), self.name())
    }
}

impl From<ExposurePolicy> for PolicyObject {
    fn from(policy: ExposurePolicy) -> Self {
        PolicyObject::Exposure(policy)
    }
}

impl From<Binding> for PolicyObject {
    fn from(binding: Binding) -> Self {
        PolicyObject::Binding(binding)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
