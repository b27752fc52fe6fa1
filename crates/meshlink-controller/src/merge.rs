//! 合并引擎
//!
//! 按对象标识（以及按主机名）把新派生的片段合并进已有片段，保留其他策略对
//! 共享资源的贡献：流量入口只追加端点，目标策略只追加子集，其余类型整体覆盖。
//! 构建器持有所有片段的独立副本，调用方的数据不会被修改。

use std::collections::{HashMap, HashSet};

use tracing::warn;

use meshlink_common::{
    namespace_or_default, DerivedService, MeshKind, MeshObject, MeshObjectId, MeshSpec,
    TrafficEntrySpec,
};

use crate::store::MeshObjectReader;

/// 主机名索引键：(类型, 命名空间, 主机名)
type HostKey = (MeshKind, String, String);

/// 网格配置对象构建器
#[derive(Debug, Default)]
pub struct MeshBuilder {
    /// 按首次出现顺序排列的对象
    objects: Vec<MeshObject>,
    /// 标识到位置的索引
    index: HashMap<MeshObjectId, usize>,
    /// 主机名到已入列对象标识的索引
    hosts: HashMap<HostKey, MeshObjectId>,
    /// 从存储载入、尚未被任何片段引用的对象
    seeds: HashMap<HostKey, MeshObject>,
    /// 已载入种子的 (类型, 命名空间)
    seeded: HashSet<(MeshKind, String)>,
}

impl MeshBuilder {
    /// 创建空的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 从存储载入命名空间下某一类型的对象，作为按主机名合并的基础
    ///
    /// 同一 (类型, 命名空间) 只载入一次。
    pub fn seed(&mut self, store: &dyn MeshObjectReader, kind: MeshKind, namespace: &str) {
        let namespace = namespace_or_default(namespace).to_string();
        if !self.seeded.insert((kind, namespace.clone())) {
            return;
        }
        for object in store.list(kind, &namespace) {
            for host in hosts_of(&object) {
                self.seeds
                    .entry((kind, namespace.clone(), host))
                    .or_insert_with(|| object.clone());
            }
        }
    }

    /// 按标识合并片段
    pub fn merge_into(&mut self, fragment: MeshObject) {
        let id = fragment.id();
        match self.index.get(&id) {
            Some(&pos) => merge_content(&mut self.objects[pos], fragment),
            None => {
                self.index.insert(id, self.objects.len());
                self.objects.push(fragment);
            }
        }
    }

    /// 按主机名合并片段
    ///
    /// 已有对象（包括存储中的对象）声明了相同主机名时，片段并入该对象并沿用其标识；
    /// 否则按标识合并。
    pub fn merge_by_host(&mut self, fragment: MeshObject) {
        let key = match hosts_of(&fragment).into_iter().next() {
            Some(host) => (fragment.kind, namespace_or_default(&fragment.meta.namespace).to_string(), host),
            None => return self.merge_into(fragment),
        };

        if let Some(id) = self.hosts.get(&key).cloned() {
            self.merge_at(&id, fragment);
            return;
        }

        if let Some(seed) = self.seeds.remove(&key) {
            let id = seed.id();
            self.merge_into(seed);
            self.hosts.insert(key, id.clone());
            self.merge_at(&id, fragment);
            return;
        }

        let id = fragment.id();
        self.merge_into(fragment);
        self.hosts.insert(key, id);
    }

    /// 按主机名查找对象，已入列的对象优先于存储中的对象
    pub fn find_by_host(&self, kind: MeshKind, namespace: &str, host: &str) -> Option<&MeshObject> {
        let key = (kind, namespace_or_default(namespace).to_string(), host.to_string());
        if let Some(id) = self.hosts.get(&key) {
            return self.get(id);
        }
        self.seeds.get(&key)
    }

    /// 按标识查找已入列的对象
    pub fn get(&self, id: &MeshObjectId) -> Option<&MeshObject> {
        self.index.get(id).map(|&pos| &self.objects[pos])
    }

    /// 已入列的对象数量
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// 是否没有入列任何对象
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 输出合并结果，每个标识一项，保持首次出现顺序
    pub fn finish(self) -> Vec<MeshObject> {
        self.objects
    }

    fn merge_at(&mut self, id: &MeshObjectId, fragment: MeshObject) {
        match self.index.get(id) {
            Some(&pos) => merge_content(&mut self.objects[pos], fragment),
            None => self.merge_into(fragment),
        }
    }
}

/// 派生服务集合，同一标识后写入者覆盖
#[derive(Debug, Default)]
pub struct ServiceSet {
    /// 按首次出现顺序排列的服务
    services: Vec<DerivedService>,
    /// (命名空间, 名称) 到位置的索引
    index: HashMap<(String, String), usize>,
}

impl ServiceSet {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖服务
    pub fn insert(&mut self, service: DerivedService) {
        let key = service.key();
        match self.index.get(&key) {
            Some(&pos) => self.services[pos] = service,
            None => {
                self.index.insert(key, self.services.len());
                self.services.push(service);
            }
        }
    }

    /// 按 (命名空间, 名称) 查找服务
    pub fn get(&self, namespace: &str, name: &str) -> Option<&DerivedService> {
        let key = (namespace_or_default(namespace).to_string(), name.to_string());
        self.index.get(&key).map(|&pos| &self.services[pos])
    }

    /// 输出服务列表
    pub fn finish(self) -> Vec<DerivedService> {
        self.services
    }
}

fn hosts_of(object: &MeshObject) -> Vec<String> {
    match &object.spec {
        Some(MeshSpec::TrafficEntry(se)) => se.hosts.clone(),
        Some(MeshSpec::DestinationPolicy(dr)) if !dr.host.is_empty() => vec![dr.host.clone()],
        _ => Vec::new(),
    }
}

/// 把片段内容并入目标对象，目标对象保留自身的元数据
fn merge_content(target: &mut MeshObject, fragment: MeshObject) {
    let id = target.id();
    let MeshObject { kind, meta, spec } = fragment;
    match spec {
        Some(MeshSpec::TrafficEntry(incoming)) if target.traffic_entry().is_some() => {
            if let Some(existing) = target.traffic_entry_mut() {
                merge_endpoints(&id, existing, incoming);
            }
        }
        Some(MeshSpec::DestinationPolicy(incoming)) if target.destination_policy().is_some() => {
            if let Some(existing) = target.destination_policy_mut() {
                for subset in incoming.subsets {
                    if existing.subset(&subset.name).is_none() {
                        existing.subsets.push(subset);
                    }
                }
                existing.sort_subsets();
            }
        }
        spec => {
            target.kind = kind;
            target.meta = meta;
            target.spec = spec;
        }
    }
}

fn merge_endpoints(id: &MeshObjectId, existing: &mut TrafficEntrySpec, incoming: TrafficEntrySpec) {
    for endpoint in incoming.endpoints {
        let pos = match existing.endpoints.iter().position(|e| e.address == endpoint.address) {
            Some(pos) => pos,
            None => {
                existing.endpoints.push(endpoint);
                continue;
            }
        };
        let current = &mut existing.endpoints[pos];
        for (protocol, port) in endpoint.ports {
            match current.ports.get(&protocol) {
                Some(&known) if known == port => {}
                Some(&known) => {
                    warn!(
                        "{} 端点 {} 的 {} 端口由 {} 变为 {}，以后者为准",
                        id, current.address, protocol, known, port
                    );
                    current.ports.insert(protocol, port);
                }
                None => {
                    current.ports.insert(protocol, port);
                }
            }
        }
    }
    existing.sort_endpoints();
}
