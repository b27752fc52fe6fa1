//! MeshLink 控制平面
//!
//! 该模块实现多集群策略到网格配置的转换引擎：按所选拓扑风格派生网格配置对象，
//! 按标识合并来自不同策略的片段，并与已存储状态比较得出最小变更集。
//! 引擎本身不做任何网络 I/O，变更集由调用方负责落地。

pub mod convert;
pub mod manifest;
pub mod merge;
pub mod reconcile;
pub mod store;

pub use convert::{convert, Conversion, ConversionStyle};
pub use merge::MeshBuilder;
pub use reconcile::{ChangeSet, Changes, Reconciler};
pub use store::{MemoryStore, MeshObjectReader, MeshStore};
