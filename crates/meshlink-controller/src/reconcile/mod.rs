//! 调和模块
//!
//! 将单个策略对象的转换结果与已存储状态比较，得出需要落地的最小变更集。
//! 调和器只读取存储快照，不做任何写入；同一 (存储, 命名空间) 上同时只能有一个
//! 调和在进行，由调用方保证。

mod changes;

use tracing::{debug, info};

use meshlink_common::{
    ClusterInfo, DerivedService, Error, ErrorList, MeshObject, PolicyObject, PolicyRef, Result,
};

use crate::convert::{convert, Conversion, ConversionStyle};
use crate::store::MeshObjectReader;

pub use changes::{ChangeSet, Changes};

/// 策略调和器
pub struct Reconciler<'a> {
    /// 已存储的网格配置
    store: &'a dyn MeshObjectReader,
    /// 策略所在命名空间的派生服务快照
    services: &'a [DerivedService],
    /// 集群拓扑
    cluster_info: &'a dyn ClusterInfo,
    /// 拓扑风格
    style: ConversionStyle,
}

impl<'a> Reconciler<'a> {
    /// 创建调和器
    pub fn new(
        store: &'a dyn MeshObjectReader,
        services: &'a [DerivedService],
        cluster_info: &'a dyn ClusterInfo,
        style: ConversionStyle,
    ) -> Self {
        Self {
            store,
            services,
            cluster_info,
            style,
        }
    }

    /// 新增策略对象
    ///
    /// 存储中不存在的对象为新增，内容不同的为修改，内容相同的省略。
    /// 没有持有者的同名服务不是本系统创建的，保持不变。
    pub fn reconcile_add(&self, policy: &PolicyObject) -> Result<ChangeSet> {
        let conversion = self.convert(policy)?;
        let mut changes = ChangeSet::default();

        for object in conversion.mesh {
            match self.store.get(object.kind, &object.meta.name, &object.meta.namespace) {
                None => changes.mesh.additions.push(object),
                Some(stored) if stored.content_eq(&object) => {
                    debug!("{} 未变化", object.id());
                }
                Some(stored) => {
                    let mut object = object;
                    object.meta.revision = stored.meta.revision;
                    changes.mesh.modifications.push(object);
                }
            }
        }

        for mut service in conversion.services {
            match self.stored_service(&service) {
                None => changes.services.additions.push(service),
                Some(stored) if stored.owners.is_empty() => {
                    info!("{} 不是由多集群策略创建的，保持不变", stored);
                }
                Some(stored) if stored.content_eq(&service) => {
                    debug!("{} 未变化", service);
                }
                Some(stored) => {
                    service.inherit_immutable(stored);
                    changes.services.modifications.push(service);
                }
            }
        }

        debug!("调和 {} 完成: {}", policy.policy_ref(), changes);
        Ok(changes)
    }

    /// 修改策略对象，与新增的处理相同
    pub fn reconcile_modify(&self, policy: &PolicyObject) -> Result<ChangeSet> {
        self.reconcile_add(policy)
    }

    /// 删除策略对象
    ///
    /// 只删除带有来源标记的对象；期望存在却缺失的对象记为一致性错误，不影响其余对象。
    /// 派生服务仍被其他策略持有时只移除当前策略的持有关系。
    /// 转换失败时返回 `Err`，否则返回变更集以及聚合后的一致性错误。
    pub fn reconcile_delete(&self, policy: &PolicyObject) -> Result<(ChangeSet, Option<Error>)> {
        let owner = policy.policy_ref();
        let conversion = self.convert(policy)?;
        let mut changes = ChangeSet::default();
        let mut errors = ErrorList::new();

        for object in conversion.mesh {
            match self.store.get(object.kind, &object.meta.name, &object.meta.namespace) {
                None => errors.push(Error::Consistency(format!(
                    "{} 应已由 {} 创建，但存储中不存在，跳过",
                    object.id(),
                    owner
                ))),
                Some(stored) if stored.meta.provenance.is_none() => {
                    info!("{} 不是由多集群策略创建的，跳过删除", stored.id());
                }
                Some(stored) => changes.mesh.deletions.push(stored.into_tombstone()),
            }
        }

        for service in conversion.services {
            if let Some(change) = self.release_service(&service, &owner) {
                match change {
                    ServiceRelease::Delete(stored) => changes.services.deletions.push(stored),
                    ServiceRelease::Keep(stored) => changes.services.modifications.push(stored),
                }
            }
        }

        debug!("调和删除 {} 完成: {}", owner, changes);
        Ok((changes, errors.into_error()))
    }

    fn convert(&self, policy: &PolicyObject) -> Result<Conversion> {
        convert(
            self.style,
            std::slice::from_ref(policy),
            self.cluster_info,
            self.store,
            self.services,
        )
    }

    fn stored_service(&self, service: &DerivedService) -> Option<&DerivedService> {
        let key = service.key();
        self.services.iter().find(|s| s.key() == key)
    }

    fn release_service(&self, service: &DerivedService, owner: &PolicyRef) -> Option<ServiceRelease> {
        let stored = match self.stored_service(service) {
            Some(stored) => stored,
            None => {
                debug!("{} 不存在，无需删除", service);
                return None;
            }
        };
        if stored.owners.is_empty() {
            info!("{} 不是由多集群策略创建的，跳过删除", stored);
            return None;
        }
        if !stored.is_owned_by(owner) {
            debug!("{} 不由 {} 持有，跳过", stored, owner);
            return None;
        }

        let mut remaining = stored.clone();
        remaining.owners.remove(owner);
        if remaining.owners.is_empty() {
            Some(ServiceRelease::Delete(stored.clone()))
        } else {
            debug!("{} 仍由 {} 个策略持有，仅移除 {}", stored, remaining.owners.len(), owner);
            Some(ServiceRelease::Keep(remaining))
        }
    }
}

/// 删除策略时派生服务的去向
enum ServiceRelease {
    Delete(DerivedService),
    Keep(DerivedService),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MeshStore, MockMeshObjectReader};
    use rstest::rstest;
    use meshlink_common::{
        Binding, DestinationPolicySpec, ExposedService, ExposurePolicy, GatewaySpec, MeshKind,
        MeshMeta, MeshSpec, PolicyKind, RemoteCluster, RemoteService, RouteSpec, ServicePort,
        StaticClusterInfo, TrafficEntrySpec,
    };

    fn topology(port: u32) -> StaticClusterInfo {
        StaticClusterInfo::new().with_gateway("cluster1", "169.62.129.93", port)
    }

    fn binding(name: &str) -> PolicyObject {
        Binding::new("default", name)
            .with_remote(RemoteCluster::new("cluster1").with_service(RemoteService::new("reviews")))
            .into()
    }

    fn exposure() -> PolicyObject {
        ExposurePolicy::new("default", "reviews")
            .with_exposed(ExposedService::new("server").with_port(9080))
            .into()
    }

    fn reconcile_add_in(
        style: ConversionStyle,
        store: &MemoryStore,
        info: &StaticClusterInfo,
        policy: &PolicyObject,
    ) -> ChangeSet {
        let services = store.services("default");
        Reconciler::new(store, &services, info, style)
            .reconcile_add(policy)
            .unwrap()
    }

    fn reconcile_add_with(store: &MemoryStore, info: &StaticClusterInfo, policy: &PolicyObject) -> ChangeSet {
        reconcile_add_in(ConversionStyle::DirectIngress, store, info, policy)
    }

    fn add_and_apply_in(
        style: ConversionStyle,
        store: &mut MemoryStore,
        info: &StaticClusterInfo,
        policy: &PolicyObject,
    ) -> ChangeSet {
        let changes = reconcile_add_in(style, store, info, policy);
        store.apply(&changes).unwrap();
        changes
    }

    fn add_and_apply(store: &mut MemoryStore, info: &StaticClusterInfo, policy: &PolicyObject) -> ChangeSet {
        add_and_apply_in(ConversionStyle::DirectIngress, store, info, policy)
    }

    fn delete_in(
        style: ConversionStyle,
        store: &MemoryStore,
        info: &StaticClusterInfo,
        policy: &PolicyObject,
    ) -> (ChangeSet, Option<Error>) {
        let services = store.services("default");
        Reconciler::new(store, &services, info, style)
            .reconcile_delete(policy)
            .unwrap()
    }

    fn delete(store: &MemoryStore, info: &StaticClusterInfo, policy: &PolicyObject) -> (ChangeSet, Option<Error>) {
        delete_in(ConversionStyle::DirectIngress, store, info, policy)
    }

    fn unprovenanced(kind: MeshKind, name: &str, namespace: &str) -> MeshObject {
        let spec = match kind {
            MeshKind::TrafficEntry => MeshSpec::TrafficEntry(TrafficEntrySpec::default()),
            MeshKind::DestinationPolicy => MeshSpec::DestinationPolicy(DestinationPolicySpec::default()),
            MeshKind::Gateway => MeshSpec::Gateway(GatewaySpec::default()),
            MeshKind::Route => MeshSpec::Route(RouteSpec::default()),
        };
        MeshObject::new(MeshMeta::unprovenanced(namespace, name), spec)
    }

    #[rstest]
    #[case(ConversionStyle::DirectIngress)]
    #[case(ConversionStyle::EgressIngress)]
    #[case(ConversionStyle::Sni)]
    fn test_add_is_idempotent(#[case] style: ConversionStyle) {
        let mut store = MemoryStore::new();
        let info = topology(31380);

        let first = add_and_apply_in(style, &mut store, &info, &binding("b"));
        assert!(!first.mesh.additions.is_empty());
        assert!(first.mesh.modifications.is_empty());

        let second = reconcile_add_in(style, &store, &info, &binding("b"));
        assert!(second.is_empty(), "{}: {}", style, second);

        add_and_apply_in(style, &mut store, &info, &exposure());
        let again = reconcile_add_in(style, &store, &info, &exposure());
        assert!(again.is_empty(), "{}: {}", style, again);

        // 删除两个策略后存储恢复为空
        for policy in [exposure(), binding("b")] {
            let (changes, err) = delete_in(style, &store, &info, &policy);
            assert!(err.is_none(), "{}: {:?}", style, err);
            store.apply(&changes).unwrap();
        }
        assert!(store.is_empty(), "{}", style);
    }

    #[test]
    fn test_modification_carries_stored_revision() {
        let mut store = MemoryStore::new();
        add_and_apply(&mut store, &topology(31380), &binding("b"));
        let stored = store
            .get(MeshKind::TrafficEntry, "service-entry-reviews", "default")
            .unwrap();

        let changes = reconcile_add_with(&store, &topology(31400), &binding("b"));

        assert!(changes.mesh.additions.is_empty());
        assert_eq!(changes.mesh.modifications.len(), 1);
        assert_eq!(changes.mesh.modifications[0].meta.revision, stored.meta.revision);
        assert!(changes.services.is_empty());
        store.apply(&changes).unwrap();
    }

    #[test]
    fn test_service_modification_keeps_cluster_ip() {
        let mut store = MemoryStore::new();
        let info = topology(31380);
        add_and_apply(&mut store, &info, &binding("b1"));
        let allocated = store.services("default")[0].clone();

        let changes = add_and_apply(&mut store, &info, &binding("b2"));
        assert!(changes.services.additions.is_empty());
        let modified = &changes.services.modifications[0];
        assert_eq!(modified.cluster_ip, allocated.cluster_ip);
        assert_eq!(modified.uid, allocated.uid);
        assert_eq!(modified.owners.len(), 2);
    }

    #[test]
    fn test_exposure_delete_yields_tombstones() {
        let mut store = MemoryStore::new();
        let info = topology(31380);
        add_and_apply(&mut store, &info, &exposure());

        let (changes, err) = delete(&store, &info, &exposure());
        assert!(err.is_none());
        assert_eq!(changes.mesh.deletions.len(), 3);
        for tombstone in &changes.mesh.deletions {
            assert!(tombstone.spec.is_none());
            assert!(tombstone.meta.provenance.is_none());
            assert_eq!(tombstone.meta.namespace, "default");
        }
        let mut kinds: Vec<MeshKind> = changes.mesh.deletions.iter().map(|o| o.kind).collect();
        kinds.sort();
        assert_eq!(kinds, vec![MeshKind::DestinationPolicy, MeshKind::Gateway, MeshKind::Route]);

        store.apply(&changes).unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_delete_never_removes_unprovenanced_objects() {
        let mut reader = MockMeshObjectReader::new();
        reader.expect_list().returning(|_, _| Vec::new());
        reader
            .expect_get()
            .times(3)
            .returning(|kind: MeshKind, name: &str, namespace: &str| Some(unprovenanced(kind, name, namespace)));
        let info = topology(31380);

        let (changes, err) = Reconciler::new(&reader, &[], &info, ConversionStyle::DirectIngress)
            .reconcile_delete(&exposure())
            .unwrap();

        assert!(changes.is_empty());
        assert!(err.is_none());
    }

    #[test]
    fn test_missing_objects_are_aggregated() {
        let mut reader = MockMeshObjectReader::new();
        reader.expect_list().returning(|_, _| Vec::new());
        reader.expect_get().returning(|_, _, _| None);
        let info = topology(31380);

        let (changes, err) = Reconciler::new(&reader, &[], &info, ConversionStyle::DirectIngress)
            .reconcile_delete(&exposure())
            .unwrap();

        assert!(changes.is_empty());
        let err = err.unwrap();
        assert_eq!(err.count(), 3);
        assert!(err.is_consistency());
        assert!(err.to_string().contains("存储中不存在"));
    }

    #[test]
    fn test_shared_service_released_one_owner_at_a_time() {
        let mut store = MemoryStore::new();
        let info = topology(31380);
        add_and_apply(&mut store, &info, &binding("b1"));
        add_and_apply(&mut store, &info, &binding("b2"));
        let ip = store.services("default")[0].cluster_ip.clone();

        let (changes, _) = delete(&store, &info, &binding("b1"));
        assert!(changes.services.deletions.is_empty());
        let kept = &changes.services.modifications[0];
        assert_eq!(kept.cluster_ip, ip);
        let owners: Vec<&str> = kept.owners.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(owners, vec!["b2"]);

        // 只应用服务部分，网格配置仍由 b2 使用
        let mut services_only = ChangeSet::default();
        services_only.services = changes.services.clone();
        store.apply(&services_only).unwrap();

        let (changes, _) = delete(&store, &info, &binding("b2"));
        assert_eq!(changes.services.deletions.len(), 1);
        assert!(changes.services.modifications.is_empty());
    }

    #[test]
    fn test_unowned_service_is_left_alone() {
        let store = MemoryStore::new();
        let info = topology(31380);
        let mut foreign = DerivedService::new(
            "default",
            "reviews",
            PolicyRef::new(PolicyKind::Binding, "default", "x"),
            vec![ServicePort::tcp(80)],
        );
        foreign.owners.clear();
        let services = vec![foreign];

        let (changes, _) = Reconciler::new(&store, &services, &info, ConversionStyle::DirectIngress)
            .reconcile_delete(&binding("b"))
            .unwrap();
        assert!(changes.services.is_empty());
    }

    #[test]
    fn test_user_service_survives_add_and_delete() {
        let mut user = DerivedService::new(
            "default",
            "reviews",
            PolicyRef::new(PolicyKind::Binding, "default", "x"),
            vec![ServicePort::tcp(9999)],
        );
        user.owners.clear();
        let mut store = MemoryStore::with_objects(Vec::new(), vec![user]).unwrap();
        let info = topology(31380);

        let added = add_and_apply(&mut store, &info, &binding("b"));
        assert!(added.services.is_empty(), "{}", added);
        assert_eq!(added.mesh.additions.len(), 2);

        let (deleted, err) = delete(&store, &info, &binding("b"));
        assert!(err.is_none());
        assert!(deleted.services.is_empty(), "{}", deleted);
        store.apply(&deleted).unwrap();

        let services = store.services("default");
        assert_eq!(services.len(), 1);
        assert!(services[0].owners.is_empty());
        assert_eq!(services[0].ports, vec![ServicePort::tcp(9999)]);
        assert_eq!(store.len(), 0);
    }
}
