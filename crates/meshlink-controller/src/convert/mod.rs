//! 策略转换模块
//!
//! 将多集群策略对象转换为网格配置对象与派生服务。支持三种拓扑风格：
//! 直连对端入口网关、经本地出口网关再到对端入口网关，以及仅基于 SNI 的简化风格。
//! 每次调用显式指定风格，转换前先校验全部策略。

mod direct_ingress;
mod egress_ingress;
mod exposure;
mod sni;

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use meshlink_common::{
    validate_policy, Binding, ClusterInfo, DerivedService, Error, ExposurePolicy, MeshKind,
    MeshMeta, MeshObject, PolicyObject, PolicyRef, Result,
};

use crate::merge::{MeshBuilder, ServiceSet};
use crate::store::MeshObjectReader;

pub use direct_ingress::DirectIngress;
pub use egress_ingress::EgressIngress;
pub use sni::Sni;

/// 出口网关服务地址
pub const EGRESS_GATEWAY_ADDRESS: &str = "istio-egressgateway.istio-system.svc.cluster.local";

/// 网关监听端口
pub const GATEWAY_PORT: u32 = 80;

/// 拓扑风格
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConversionStyle {
    /// 直接访问对端入口网关，并为每个绑定创建派生服务
    #[default]
    DirectIngress,
    /// 经本地出口网关访问对端入口网关
    EgressIngress,
    /// 仅基于 SNI 的简化风格
    Sni,
}

impl ConversionStyle {
    /// 风格对应的转换器
    pub fn converter(&self) -> &'static dyn StyleConverter {
        match self {
            ConversionStyle::DirectIngress => &DirectIngress,
            ConversionStyle::EgressIngress => &EgressIngress,
            ConversionStyle::Sni => &Sni,
        }
    }
}

impl fmt::Display for ConversionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionStyle::DirectIngress => write!(f, "DIRECT_INGRESS"),
            ConversionStyle::EgressIngress => write!(f, "EGRESS_INGRESS"),
            ConversionStyle::Sni => write!(f, "SNI"),
        }
    }
}

impl FromStr for ConversionStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "DIRECT_INGRESS" => Ok(ConversionStyle::DirectIngress),
            "EGRESS_INGRESS" => Ok(ConversionStyle::EgressIngress),
            "SNI" => Ok(ConversionStyle::Sni),
            _ => Err(Error::Config(format!("无效的拓扑风格: {}", s))),
        }
    }
}

/// 转换结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversion {
    /// 网格配置对象，每个标识一项
    pub mesh: Vec<MeshObject>,
    /// 派生服务，每个标识一项
    pub services: Vec<DerivedService>,
}

/// 一次转换调用共享的状态
pub struct ConvertContext<'a> {
    /// 网格配置对象构建器
    pub mesh: MeshBuilder,
    /// 派生服务集合
    pub services: ServiceSet,
    /// 集群拓扑
    pub cluster_info: &'a dyn ClusterInfo,
    /// 已存储的网格配置
    pub store: &'a dyn MeshObjectReader,
    /// 已存在的派生服务
    pub existing_services: &'a [DerivedService],
}

impl<'a> ConvertContext<'a> {
    /// 创建转换上下文
    pub fn new(
        cluster_info: &'a dyn ClusterInfo,
        store: &'a dyn MeshObjectReader,
        existing_services: &'a [DerivedService],
    ) -> Self {
        Self {
            mesh: MeshBuilder::new(),
            services: ServiceSet::new(),
            cluster_info,
            store,
            existing_services,
        }
    }

    /// 载入命名空间下已存储的对象，供按主机名合并
    pub fn seed(&mut self, kind: MeshKind, namespace: &str) {
        self.mesh.seed(self.store, kind, namespace);
    }

    /// 查找已存在的派生服务
    pub fn existing_service(&self, namespace: &str, name: &str) -> Option<&DerivedService> {
        self.existing_services
            .iter()
            .find(|s| s.key() == (namespace.to_string(), name.to_string()))
    }

    fn finish(self) -> Conversion {
        Conversion {
            mesh: self.mesh.finish(),
            services: self.services.finish(),
        }
    }
}

/// 拓扑风格转换器
pub trait StyleConverter: Sync {
    /// 转换远程服务绑定
    fn convert_binding(&self, ctx: &mut ConvertContext<'_>, binding: &Binding, owner: &PolicyRef) -> Result<()>;

    /// 转换服务暴露策略
    fn convert_exposure(
        &self,
        ctx: &mut ConvertContext<'_>,
        policy: &ExposurePolicy,
        owner: &PolicyRef,
    ) -> Result<()>;
}

/// 将策略对象转换为网格配置对象与派生服务
///
/// 同一标识的片段在本次调用内合并，输出中不存在重复标识。
/// 任一策略校验或转换失败时整体返回错误。
pub fn convert(
    style: ConversionStyle,
    policies: &[PolicyObject],
    cluster_info: &dyn ClusterInfo,
    store: &dyn MeshObjectReader,
    existing_services: &[DerivedService],
) -> Result<Conversion> {
    for policy in policies {
        validate_policy(policy)?;
    }

    let converter = style.converter();
    let mut ctx = ConvertContext::new(cluster_info, store, existing_services);
    for policy in policies {
        let owner = policy.policy_ref();
        debug!("以 {} 风格转换策略 {}", style, owner);
        let result = match policy {
            PolicyObject::Binding(binding) => converter.convert_binding(&mut ctx, binding, &owner),
            PolicyObject::Exposure(exposure) => converter.convert_exposure(&mut ctx, exposure, &owner),
        };
        result.map_err(|e| match e {
            Error::Conversion(msg) => Error::Conversion(format!("无法转换 {}: {}", owner, msg)),
            other => other,
        })?;
    }

    let conversion = ctx.finish();
    debug!(
        "转换完成: {} 个网格配置对象, {} 个派生服务",
        conversion.mesh.len(),
        conversion.services.len()
    );
    Ok(conversion)
}

/// 派生对象的元数据，位于策略所在命名空间并带有来源标记
pub(crate) fn derived_meta(owner: &PolicyRef, name: &str) -> MeshMeta {
    MeshMeta::new(&owner.namespace, name, owner.clone())
}
