//! MeshLink Agent - 多集群配置管理代理
//!
//! 该模块负责加载集群配置、在对端之间交换被暴露的服务，
//! 并在多集群策略变化时驱动调和器、落地得到的变更集。

pub mod config;
pub mod manager;
pub mod peer;

pub use config::{ClusterConfig, ConnectionMode};
pub use manager::{ConfigsManagement, PolicyEvent};
pub use peer::{ExposedServiceInfo, ExposedServices};
