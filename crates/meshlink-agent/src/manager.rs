//! 多集群配置管理模块
//!
//! 该模块接收多集群策略的增删改事件，调用调和器得出变更集，
//! 并将变更集落地到网格配置存储。同一存储上的事件严格串行处理。

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use meshlink_common::PolicyObject;
use meshlink_controller::{ChangeSet, ConversionStyle, MeshStore, Reconciler};

use crate::config::{ClusterConfig, ConnectionMode};
use crate::peer::connection_mode;

/// 策略事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    /// 策略新增
    Added(PolicyObject),
    /// 策略修改
    Modified(PolicyObject),
    /// 策略删除
    Deleted(PolicyObject),
}

impl PolicyEvent {
    /// 事件携带的策略对象
    pub fn policy(&self) -> &PolicyObject {
        match self {
            PolicyEvent::Added(p) | PolicyEvent::Modified(p) | PolicyEvent::Deleted(p) => p,
        }
    }
}

/// 多集群配置管理器
pub struct ConfigsManagement<S: MeshStore> {
    /// 网格配置存储
    store: S,
    /// 本地集群与对端配置
    cluster_config: ClusterConfig,
    /// 拓扑风格
    style: ConversionStyle,
}

impl<S: MeshStore> ConfigsManagement<S> {
    /// 创建配置管理器
    pub fn new(store: S, cluster_config: ClusterConfig, style: ConversionStyle) -> Self {
        Self {
            store,
            cluster_config,
            style,
        }
    }

    /// 网格配置存储
    pub fn store(&self) -> &S {
        &self.store
    }

    /// 取回网格配置存储
    pub fn into_store(self) -> S {
        self.store
    }

    /// 当前集群配置
    pub fn cluster_config(&self) -> &ClusterConfig {
        &self.cluster_config
    }

    /// 替换集群配置，之后的事件使用新的拓扑
    pub fn update_cluster_config(&mut self, cluster_config: ClusterConfig) {
        info!(
            "集群配置已更新: {} ({} 个对端)",
            cluster_config.id,
            cluster_config.peers.len()
        );
        self.cluster_config = cluster_config;
    }

    /// 处理单个策略事件，返回已落地的变更集
    ///
    /// 处于 potential 模式的绑定不做调和。删除时的一致性错误只记录警告，
    /// 其余变更照常落地。
    pub fn handle(&mut self, event: &PolicyEvent) -> Result<ChangeSet> {
        let policy = event.policy();
        let policy_ref = policy.policy_ref();

        if let PolicyObject::Binding(binding) = policy {
            if connection_mode(binding) == ConnectionMode::Potential {
                info!("绑定 {} 处于 potential 模式，跳过调和", policy_ref);
                return Ok(ChangeSet::default());
            }
        }

        let (changes, inconsistency) = {
            let services = self.store.services(policy.namespace());
            let reconciler = Reconciler::new(&self.store, &services, &self.cluster_config, self.style);
            match event {
                PolicyEvent::Added(p) => (reconciler.reconcile_add(p), None),
                PolicyEvent::Modified(p) => (reconciler.reconcile_modify(p), None),
                PolicyEvent::Deleted(p) => match reconciler.reconcile_delete(p) {
                    Ok((changes, inconsistency)) => (Ok(changes), inconsistency),
                    Err(e) => (Err(e), None),
                },
            }
        };
        let changes = changes.with_context(|| format!("调和 {} 失败", policy_ref))?;

        if let Some(e) = inconsistency {
            warn!("删除 {} 时存储状态不一致: {}", policy_ref, e);
        }

        if changes.is_empty() {
            debug!("{} 没有需要落地的变更", policy_ref);
            return Ok(changes);
        }

        self.store
            .apply(&changes)
            .with_context(|| format!("落地 {} 的变更失败", policy_ref))?;
        info!("已落地 {} 的变更: {}", policy_ref, changes);

        Ok(changes)
    }

    /// 串行处理事件通道中的全部事件，通道关闭后返回管理器
    pub async fn run(mut self, mut events: mpsc::Receiver<PolicyEvent>) -> Self {
        info!("开始处理多集群策略事件，拓扑风格 {}", self.style);

        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(&event) {
                error!("处理策略事件失败: {:#}", e);
            }
        }

        info!("策略事件通道已关闭");
        self
    }
}
