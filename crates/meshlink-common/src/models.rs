//! 数据模型模块
//!
//! 该模块定义了 MeshLink 项目中使用的核心数据模型，包括多集群策略对象、
//! 网格配置对象和派生的 Kubernetes 服务，并提供序列化/反序列化功能。

pub mod mesh;
pub mod policy;
pub mod service;
