//! MeshLink Common - 多集群策略与网格配置的共享数据模型
//!
//! 该模块提供 MeshLink 项目中所有组件共享的数据结构和错误处理机制，
//! 包括服务暴露策略、远程服务绑定、网格配置对象、派生服务以及策略校验。

pub mod cluster;
pub mod error;
pub mod models;
pub mod validation;

/// 重新导出常用类型，方便使用
pub use cluster::{ClusterInfo, StaticClusterInfo, UNKNOWN_CLUSTER_IP, UNKNOWN_CLUSTER_PORT};
pub use error::{Error, ErrorList, Result};
pub use models::mesh::*;
pub use models::policy::*;
pub use models::service::*;
pub use validation::validate_policy;
