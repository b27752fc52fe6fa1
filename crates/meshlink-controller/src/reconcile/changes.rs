//! 变更集

use std::fmt;

use meshlink_common::{DerivedService, MeshObject};

/// 同一类对象的新增、修改与删除
#[derive(Debug, Clone, PartialEq)]
pub struct Changes<T> {
    /// 新增
    pub additions: Vec<T>,
    /// 修改
    pub modifications: Vec<T>,
    /// 删除
    pub deletions: Vec<T>,
}

impl<T> Default for Changes<T> {
    fn default() -> Self {
        Self {
            additions: Vec::new(),
            modifications: Vec::new(),
            deletions: Vec::new(),
        }
    }
}

impl<T> Changes<T> {
    /// 是否没有任何变更
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.modifications.is_empty() && self.deletions.is_empty()
    }

    /// 变更总数
    pub fn len(&self) -> usize {
        self.additions.len() + self.modifications.len() + self.deletions.len()
    }
}

/// 一次调和得出的变更集
///
/// 删除项中的网格配置对象不携带规格，调用方只能按类型与标识删除。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// 网格配置对象变更
    pub mesh: Changes<MeshObject>,
    /// 派生服务变更
    pub services: Changes<DerivedService>,
}

impl ChangeSet {
    /// 是否没有任何变更
    pub fn is_empty(&self) -> bool {
        self.mesh.is_empty() && self.services.is_empty()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "网格配置 +{}/~{}/-{}, 派生服务 +{}/~{}/-{}",
            self.mesh.additions.len(),
            self.mesh.modifications.len(),
            self.mesh.deletions.len(),
            self.services.additions.len(),
            self.services.modifications.len(),
            self.services.deletions.len()
        )
    }
}
