//! 清单读写
//!
//! 读取多文档 YAML 中的多集群策略、已有网格配置对象与派生服务，
//! 并把网格配置对象与派生服务写回为 `---` 分隔的清单。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use k8s_openapi::api::core::v1::{Service, ServicePort as KubeServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::debug;

use meshlink_common::{
    namespace_or_default, Binding, DerivedService, Error, ExposedService, ExposurePolicy,
    MeshKind, MeshMeta, MeshObject, MeshSpec, PolicyKind, PolicyObject, PolicyRef, RemoteCluster,
    Result, ServicePort, ServiceType, MESH_API_VERSION, PROVENANCE_ANNOTATION,
};

/// 多集群策略的 API 版本
pub const POLICY_API_VERSION: &str = "multicluster.istio.io/v1alpha1";

/// 通用清单结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    api_version: String,
    kind: String,
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec: Option<serde_yaml::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExposureSpec {
    #[serde(default)]
    exposed: Vec<ExposedService>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BindingSpec {
    #[serde(default)]
    remote: Vec<RemoteCluster>,
}

/// 一组清单的解析结果
#[derive(Debug, Default)]
pub struct ManifestSet {
    /// 多集群策略
    pub policies: Vec<PolicyObject>,
    /// 网格配置对象
    pub mesh: Vec<MeshObject>,
    /// 派生服务
    pub services: Vec<DerivedService>,
    /// 无法识别而被跳过的清单，形如 `Kind namespace/name`
    pub skipped: Vec<String>,
}

impl ManifestSet {
    /// 并入另一组解析结果
    pub fn extend(&mut self, other: ManifestSet) {
        self.policies.extend(other.policies);
        self.mesh.extend(other.mesh);
        self.services.extend(other.services);
        self.skipped.extend(other.skipped);
    }
}

/// 读取清单文件
pub fn read_manifests(path: &Path) -> Result<ManifestSet> {
    let content = fs::read_to_string(path)?;
    parse_manifests(&content)
}

/// 解析多文档 YAML（JSON 亦可）
///
/// 无法识别的资源类型不视为错误，记录在 `skipped` 中。
pub fn parse_manifests(input: &str) -> Result<ManifestSet> {
    let mut set = ManifestSet::default();

    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let manifest: Manifest = serde_yaml::from_value(value.clone())?;

        if let Ok(kind) = manifest.kind.parse::<PolicyKind>() {
            set.policies.push(policy_from_manifest(kind, manifest)?);
        } else if let Ok(kind) = manifest.kind.parse::<MeshKind>() {
            set.mesh.push(mesh_from_manifest(kind, manifest)?);
        } else if manifest.kind == "Service" {
            let service: Service = serde_yaml::from_value(value)?;
            set.services.push(service_from_kube(service)?);
        } else {
            let skipped = format!(
                "{} {}/{}",
                manifest.kind,
                manifest.metadata.namespace.as_deref().unwrap_or_default(),
                manifest.metadata.name.as_deref().unwrap_or_default()
            );
            debug!("跳过无法识别的清单 {}", skipped);
            set.skipped.push(skipped);
        }
    }
    Ok(set)
}

/// 将网格配置对象与派生服务写为 `---` 分隔的 YAML
///
/// 删除请求只写出类型与标识。
pub fn to_yaml(mesh: &[MeshObject], services: &[DerivedService]) -> Result<String> {
    let mut documents = Vec::with_capacity(mesh.len() + services.len());
    for object in mesh {
        documents.push(serde_yaml::to_string(&mesh_to_manifest(object)?)?);
    }
    for service in services {
        documents.push(serde_yaml::to_string(&service_to_kube(service)?)?);
    }
    Ok(documents.join("---\n"))
}

/// 将策略对象写为清单
pub fn policy_to_yaml(policy: &PolicyObject) -> Result<String> {
    let spec = match policy {
        PolicyObject::Exposure(p) => serde_yaml::to_value(ExposureSpec {
            exposed: p.exposed.clone(),
        })?,
        PolicyObject::Binding(b) => serde_yaml::to_value(BindingSpec {
            remote: b.remote.clone(),
        })?,
    };
    let manifest = Manifest {
        api_version: POLICY_API_VERSION.to_string(),
        kind: policy.kind().manifest_kind().to_string(),
        metadata: ObjectMeta {
            name: Some(policy.name().to_string()),
            namespace: Some(policy.namespace().to_string()),
            labels: non_empty(policy.labels().clone()),
            ..Default::default()
        },
        spec: Some(spec),
    };
    Ok(serde_yaml::to_string(&manifest)?)
}

fn policy_from_manifest(kind: PolicyKind, manifest: Manifest) -> Result<PolicyObject> {
    let name = manifest.metadata.name.unwrap_or_default();
    let namespace = manifest.metadata.namespace.unwrap_or_default();
    let labels = manifest.metadata.labels.unwrap_or_default();
    let spec = manifest.spec.unwrap_or(serde_yaml::Value::Null);

    let policy = match kind {
        PolicyKind::Exposure => {
            let spec: ExposureSpec = decode_spec(spec)?;
            PolicyObject::Exposure(ExposurePolicy {
                name,
                namespace,
                labels,
                exposed: spec.exposed,
            })
        }
        PolicyKind::Binding => {
            let spec: BindingSpec = decode_spec(spec)?;
            PolicyObject::Binding(Binding {
                name,
                namespace,
                labels,
                remote: spec.remote,
            })
        }
    };
    Ok(policy)
}

fn decode_spec<T: Default + serde::de::DeserializeOwned>(spec: serde_yaml::Value) -> Result<T> {
    if spec.is_null() {
        return Ok(T::default());
    }
    Ok(serde_yaml::from_value(spec)?)
}

fn mesh_from_manifest(kind: MeshKind, manifest: Manifest) -> Result<MeshObject> {
    let metadata = manifest.metadata;
    let provenance = metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PROVENANCE_ANNOTATION))
        .map(|p| p.parse::<PolicyRef>())
        .transpose()?;

    let meta = MeshMeta {
        name: metadata.name.unwrap_or_default(),
        namespace: namespace_or_default(metadata.namespace.as_deref().unwrap_or_default()).to_string(),
        provenance,
        revision: metadata.resource_version,
        labels: metadata.labels.unwrap_or_default(),
    };

    let spec = match manifest.spec {
        None => None,
        Some(spec) => Some(match kind {
            MeshKind::TrafficEntry => MeshSpec::TrafficEntry(serde_yaml::from_value(spec)?),
            MeshKind::DestinationPolicy => MeshSpec::DestinationPolicy(serde_yaml::from_value(spec)?),
            MeshKind::Gateway => MeshSpec::Gateway(serde_yaml::from_value(spec)?),
            MeshKind::Route => MeshSpec::Route(serde_yaml::from_value(spec)?),
        }),
    };
    Ok(MeshObject { kind, meta, spec })
}

fn mesh_to_manifest(object: &MeshObject) -> Result<Manifest> {
    let mut annotations = BTreeMap::new();
    if let Some(provenance) = &object.meta.provenance {
        annotations.insert(PROVENANCE_ANNOTATION.to_string(), provenance.to_string());
    }

    let spec = match &object.spec {
        None => None,
        Some(MeshSpec::TrafficEntry(se)) => Some(serde_yaml::to_value(se)?),
        Some(MeshSpec::DestinationPolicy(dr)) => Some(serde_yaml::to_value(dr)?),
        Some(MeshSpec::Gateway(gw)) => Some(serde_yaml::to_value(gw)?),
        Some(MeshSpec::Route(vs)) => Some(serde_yaml::to_value(vs)?),
    };

    Ok(Manifest {
        api_version: MESH_API_VERSION.to_string(),
        kind: object.kind.manifest_kind().to_string(),
        metadata: ObjectMeta {
            name: Some(object.meta.name.clone()),
            namespace: Some(namespace_or_default(&object.meta.namespace).to_string()),
            labels: non_empty(object.meta.labels.clone()),
            annotations: non_empty(annotations),
            resource_version: object.meta.revision.clone(),
            ..Default::default()
        },
        spec,
    })
}

fn service_from_kube(service: Service) -> Result<DerivedService> {
    let metadata = service.metadata;
    let owners = match metadata.annotations.as_ref().and_then(|a| a.get(PROVENANCE_ANNOTATION)) {
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<PolicyRef>)
            .collect::<Result<_>>()?,
        None => Default::default(),
    };

    let spec = service.spec.unwrap_or_default();
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| {
            let port = u32::try_from(p.port)
                .map_err(|_| Error::Serialization(format!("无效的 Service 端口: {}", p.port)))?;
            Ok(ServicePort {
                protocol: p.protocol.unwrap_or_else(|| "TCP".to_string()),
                port,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let service_type = match spec.type_.as_deref() {
        Some("NodePort") => ServiceType::NodePort,
        Some("LoadBalancer") => ServiceType::LoadBalancer,
        _ => ServiceType::ClusterIP,
    };

    Ok(DerivedService {
        name: metadata.name.unwrap_or_default(),
        namespace: namespace_or_default(metadata.namespace.as_deref().unwrap_or_default()).to_string(),
        owners,
        ports,
        service_type,
        cluster_ip: spec.cluster_ip,
        uid: metadata.uid,
    })
}

fn service_to_kube(service: &DerivedService) -> Result<Service> {
    let mut annotations = BTreeMap::new();
    if !service.owners.is_empty() {
        let owners: Vec<String> = service.owners.iter().map(PolicyRef::to_string).collect();
        annotations.insert(PROVENANCE_ANNOTATION.to_string(), owners.join(","));
    }

    let ports = service
        .ports
        .iter()
        .map(|p| {
            let port = i32::try_from(p.port)
                .map_err(|_| Error::Serialization(format!("{} 的端口 {} 超出范围", service, p.port)))?;
            Ok(KubeServicePort {
                port,
                protocol: Some(p.protocol.clone()),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(service.name.clone()),
            namespace: Some(namespace_or_default(&service.namespace).to_string()),
            annotations: non_empty(annotations),
            uid: service.uid.clone(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(ports),
            type_: Some(service.service_type.to_string()),
            cluster_ip: service.cluster_ip.clone(),
            ..Default::default()
        }),
        status: None,
    })
}

fn non_empty(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}
