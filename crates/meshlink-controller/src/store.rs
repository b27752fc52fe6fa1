//! 网格配置存储
//!
//! 该模块定义转换引擎读取的存储接口、调用方落地变更集所用的存储接口，
//! 以及供命令行工具与测试使用的内存实现。

use std::collections::BTreeMap;
use std::fmt::Display;

#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};
use uuid::Uuid;

use meshlink_common::{
    namespace_or_default, DerivedService, Error, ErrorList, MeshKind, MeshObject, MeshObjectId,
    Result, ServiceType,
};

use crate::reconcile::ChangeSet;

/// 网格配置只读接口
#[cfg_attr(test, automock)]
pub trait MeshObjectReader {
    /// 按类型、名称与命名空间读取对象
    fn get(&self, kind: MeshKind, name: &str, namespace: &str) -> Option<MeshObject>;

    /// 列出命名空间下某一类型的全部对象
    fn list(&self, kind: MeshKind, namespace: &str) -> Vec<MeshObject>;
}

/// 可写的网格配置与派生服务存储
pub trait MeshStore: MeshObjectReader {
    /// 命名空间下的派生服务快照
    fn services(&self, namespace: &str) -> Vec<DerivedService>;

    /// 创建网格配置对象，返回分配的修订版本
    fn create(&mut self, object: MeshObject) -> Result<String>;

    /// 更新网格配置对象，返回新的修订版本
    fn update(&mut self, object: MeshObject) -> Result<String>;

    /// 按标识删除网格配置对象
    fn delete(&mut self, kind: MeshKind, name: &str, namespace: &str) -> Result<()>;

    /// 创建派生服务，返回分配了地址的服务
    fn create_service(&mut self, service: DerivedService) -> Result<DerivedService>;

    /// 更新派生服务
    fn update_service(&mut self, service: DerivedService) -> Result<DerivedService>;

    /// 删除派生服务
    fn delete_service(&mut self, name: &str, namespace: &str) -> Result<()>;

    /// 落地变更集
    ///
    /// 依次执行修改、新增与删除；单个对象失败只记录警告，其余对象继续处理，
    /// 全部失败原因合并后返回。
    fn apply(&mut self, changes: &ChangeSet) -> Result<()> {
        let mut errors = ErrorList::new();

        debug!(
            "应用网格配置变更: 修改 {}, 新增 {}, 删除 {}",
            changes.mesh.modifications.len(),
            changes.mesh.additions.len(),
            changes.mesh.deletions.len()
        );
        for object in &changes.mesh.modifications {
            let result = self.update(object.clone()).map(|_| ());
            record(&mut errors, result, "更新", object.id());
        }
        for object in &changes.mesh.additions {
            let result = self.create(object.clone()).map(|_| ());
            record(&mut errors, result, "创建", object.id());
        }
        for object in &changes.mesh.deletions {
            let result = self.delete(object.kind, &object.meta.name, &object.meta.namespace);
            record(&mut errors, result, "删除", object.id());
        }

        debug!(
            "应用派生服务变更: 修改 {}, 新增 {}, 删除 {}",
            changes.services.modifications.len(),
            changes.services.additions.len(),
            changes.services.deletions.len()
        );
        for service in &changes.services.modifications {
            let result = self.update_service(service.clone()).map(|_| ());
            record(&mut errors, result, "更新", service);
        }
        for service in &changes.services.additions {
            let result = self.create_service(service.clone()).map(|_| ());
            record(&mut errors, result, "创建", service);
        }
        for service in &changes.services.deletions {
            let result = self.delete_service(&service.name, &service.namespace);
            record(&mut errors, result, "删除", service);
        }

        errors.into_result(())
    }
}

fn record(errors: &mut ErrorList, result: Result<()>, action: &str, target: impl Display) {
    match result {
        Ok(()) => debug!("\t{} [{}成功]", target, action),
        Err(e) => {
            warn!("\t{} [{}失败: {}]", target, action, e);
            errors.push(e);
        }
    }
}

/// 内存存储
///
/// 为每次写入分配递增的修订版本，为新建的派生服务分配集群地址与唯一标识。
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// 网格配置对象
    objects: BTreeMap<MeshObjectId, MeshObject>,
    /// 派生服务，按 (命名空间, 名称) 索引
    services: BTreeMap<(String, String), DerivedService>,
    /// 最近一次分配的修订版本
    revision: u64,
    /// 已分配的集群地址数量
    allocated_ips: u32,
}

impl MemoryStore {
    /// 创建空的内存存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组已有对象初始化存储
    pub fn with_objects(objects: Vec<MeshObject>, services: Vec<DerivedService>) -> Result<Self> {
        let mut store = Self::new();
        for object in objects {
            store.create(object)?;
        }
        for service in services {
            store.create_service(service)?;
        }
        Ok(store)
    }

    /// 存储的网格配置对象数量
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// 存储是否为空
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.services.is_empty()
    }

    /// 全部网格配置对象，按标识排序
    pub fn objects(&self) -> impl Iterator<Item = &MeshObject> {
        self.objects.values()
    }

    /// 全部派生服务
    pub fn all_services(&self) -> impl Iterator<Item = &DerivedService> {
        self.services.values()
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn allocate_ip(&mut self) -> String {
        self.allocated_ips += 1;
        let n = self.allocated_ips;
        format!("10.96.{}.{}", n / 256, n % 256)
    }
}

fn object_id(kind: MeshKind, name: &str, namespace: &str) -> MeshObjectId {
    MeshObjectId {
        kind,
        namespace: namespace_or_default(namespace).to_string(),
        name: name.to_string(),
    }
}

fn service_key(name: &str, namespace: &str) -> (String, String) {
    (namespace_or_default(namespace).to_string(), name.to_string())
}

impl MeshObjectReader for MemoryStore {
    fn get(&self, kind: MeshKind, name: &str, namespace: &str) -> Option<MeshObject> {
        self.objects.get(&object_id(kind, name, namespace)).cloned()
    }

    fn list(&self, kind: MeshKind, namespace: &str) -> Vec<MeshObject> {
        let namespace = namespace_or_default(namespace);
        self.objects
            .values()
            .filter(|o| o.kind == kind && namespace_or_default(&o.meta.namespace) == namespace)
            .cloned()
            .collect()
    }
}

impl MeshStore for MemoryStore {
    fn services(&self, namespace: &str) -> Vec<DerivedService> {
        let namespace = namespace_or_default(namespace);
        self.services
            .values()
            .filter(|s| namespace_or_default(&s.namespace) == namespace)
            .cloned()
            .collect()
    }

    fn create(&mut self, mut object: MeshObject) -> Result<String> {
        if object.spec.is_none() {
            return Err(Error::Store(format!("{} 缺少规格，无法创建", object.id())));
        }
        let id = object.id();
        if self.objects.contains_key(&id) {
            return Err(Error::Store(format!("{} 已存在", id)));
        }
        let revision = self.next_revision();
        object.meta.namespace = id.namespace.clone();
        object.meta.revision = Some(revision.clone());
        self.objects.insert(id, object);
        Ok(revision)
    }

    fn update(&mut self, mut object: MeshObject) -> Result<String> {
        if object.spec.is_none() {
            return Err(Error::Store(format!("{} 缺少规格，无法更新", object.id())));
        }
        let id = object.id();
        let stored_revision = match self.objects.get(&id) {
            Some(stored) => stored.meta.revision.clone(),
            None => return Err(Error::Store(format!("{} 不存在", id))),
        };
        if object.meta.revision.is_some() && object.meta.revision != stored_revision {
            return Err(Error::Store(format!(
                "{} 修订版本冲突: 期望 {:?}, 实际 {:?}",
                id, object.meta.revision, stored_revision
            )));
        }
        let revision = self.next_revision();
        object.meta.namespace = id.namespace.clone();
        object.meta.revision = Some(revision.clone());
        self.objects.insert(id, object);
        Ok(revision)
    }

    fn delete(&mut self, kind: MeshKind, name: &str, namespace: &str) -> Result<()> {
        let id = object_id(kind, name, namespace);
        match self.objects.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::Store(format!("{} 不存在", id))),
        }
    }

    fn create_service(&mut self, mut service: DerivedService) -> Result<DerivedService> {
        let key = service_key(&service.name, &service.namespace);
        if self.services.contains_key(&key) {
            return Err(Error::Store(format!("{} 已存在", service)));
        }
        service.namespace = key.0.clone();
        if service.cluster_ip.is_none() && service.service_type == ServiceType::ClusterIP {
            service.cluster_ip = Some(self.allocate_ip());
        }
        if service.uid.is_none() {
            service.uid = Some(Uuid::new_v4().to_string());
        }
        self.services.insert(key, service.clone());
        Ok(service)
    }

    fn update_service(&mut self, mut service: DerivedService) -> Result<DerivedService> {
        let key = service_key(&service.name, &service.namespace);
        let stored = match self.services.get(&key) {
            Some(stored) => stored,
            None => return Err(Error::Store(format!("{} 不存在", service))),
        };
        if service.cluster_ip.is_some() && service.cluster_ip != stored.cluster_ip {
            return Err(Error::Store(format!(
                "{} 的集群地址不可变更: {:?} -> {:?}",
                service, stored.cluster_ip, service.cluster_ip
            )));
        }
        service.inherit_immutable(stored);
        service.namespace = key.0.clone();
        self.services.insert(key, service.clone());
        Ok(service)
    }

    fn delete_service(&mut self, name: &str, namespace: &str) -> Result<()> {
        match self.services.remove(&service_key(name, namespace)) {
            Some(_) => Ok(()),
            None => Err(Error::Store(format!(
                "Service {}.{} 不存在",
                namespace_or_default(namespace),
                name
            ))),
        }
    }
}
