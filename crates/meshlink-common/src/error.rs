//! 错误处理模块
//!
//! 该模块提供 MeshLink 项目的统一错误处理机制，区分校验、转换与一致性错误，
//! 并支持将多个错误聚合为一个错误值返回给调用方。

use std::fmt;
use std::io;
use thiserror::Error;

/// MeshLink 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 策略结构校验失败，转换前即被拒绝
    #[error("校验错误: {0}")]
    Validation(String),

    /// 策略转换失败，中止该策略对象的转换
    #[error("转换错误: {0}")]
    Conversion(String),

    /// 删除时发现期望存在的派生对象缺失
    #[error("一致性错误: {0}")]
    Consistency(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 存储操作错误
    #[error("存储错误: {0}")]
    Store(String),

    /// 序列化/反序列化错误
    #[error("序列化/反序列化错误: {0}")]
    Serialization(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 多个错误的聚合
    #[error("{}", AggregateDisplay(.0))]
    Aggregate(Vec<Error>),
}

/// MeshLink 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 展开聚合错误，返回其中包含的全部错误
    pub fn flatten(self) -> Vec<Error> {
        match self {
            Error::Aggregate(errors) => errors.into_iter().flat_map(Error::flatten).collect(),
            other => vec![other],
        }
    }

    /// 错误数量（聚合错误按其包含的错误计数）
    pub fn count(&self) -> usize {
        match self {
            Error::Aggregate(errors) => errors.iter().map(Error::count).sum(),
            _ => 1,
        }
    }

    /// 是否为一致性错误（或仅由一致性错误组成的聚合错误）
    pub fn is_consistency(&self) -> bool {
        match self {
            Error::Consistency(_) => true,
            Error::Aggregate(errors) => !errors.is_empty() && errors.iter().all(Error::is_consistency),
            _ => false,
        }
    }
}

struct AggregateDisplay<'a>(&'a [Error]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "发生 {} 个错误:", self.0.len())?;
        for err in self.0 {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}

/// 错误收集器
///
/// 逐个收集错误，最终合并为单个错误；未收集到错误时返回 `None`。
#[derive(Debug, Default)]
pub struct ErrorList {
    /// 已收集的错误
    errors: Vec<Error>,
}

impl ErrorList {
    /// 创建空的错误收集器
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// 追加一个错误，聚合错误会被展开
    pub fn push(&mut self, err: Error) {
        self.errors.extend(err.flatten());
    }

    /// 追加一个可能为空的错误
    pub fn extend(&mut self, err: Option<Error>) {
        if let Some(err) = err {
            self.push(err);
        }
    }

    /// 是否没有收集到任何错误
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// 已收集的错误数量
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// 合并为单个错误
    pub fn into_error(mut self) -> Option<Error> {
        match self.errors.len() {
            0 => None,
            1 => self.errors.pop(),
            _ => Some(Error::Aggregate(self.errors)),
        }
    }

    /// 没有错误时返回 `Ok(value)`，否则返回合并后的错误
    pub fn into_result<T>(self, value: T) -> Result<T> {
        match self.into_error() {
            None => Ok(value),
            Some(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_yields_no_error() {
        let list = ErrorList::new();
        assert!(list.is_empty());
        assert!(list.into_error().is_none());
    }

    #[test]
    fn test_single_error_is_not_wrapped() {
        let mut list = ErrorList::new();
        list.push(Error::Validation("invalid name".to_string()));

        let err = list.into_error().unwrap();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.to_string(), "校验错误: invalid name");
    }

    #[test]
    fn test_aggregate_is_flattened() {
        let mut list = ErrorList::new();
        list.push(Error::Consistency("a".to_string()));
        list.push(Error::Aggregate(vec![
            Error::Consistency("b".to_string()),
            Error::Consistency("c".to_string()),
        ]));
        list.extend(None);

        assert_eq!(list.len(), 3);
        let err = list.into_error().unwrap();
        assert_eq!(err.count(), 3);
        assert!(err.is_consistency());

        let rendered = err.to_string();
        assert!(rendered.starts_with("发生 3 个错误:"));
        assert!(rendered.contains("一致性错误: c"));
    }

    #[test]
    fn test_mixed_aggregate_is_not_consistency() {
        let err = Error::Aggregate(vec![
            Error::Consistency("a".to_string()),
            Error::Conversion("b".to_string()),
        ]);
        assert!(!err.is_consistency());
    }
}
