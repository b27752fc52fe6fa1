//! 策略校验模块
//!
//! 在转换之前对策略对象进行结构检查，收集所有问题后一次性返回。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, ErrorList, Result};
use crate::models::policy::{Binding, ExposedService, ExposurePolicy, PolicyObject, RemoteService};

/// DNS-1123 标签最大长度
const DNS1123_LABEL_MAX_LENGTH: usize = 63;

static DNS1123_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("DNS-1123 正则表达式无效")
});

/// 是否为合法的 DNS-1123 标签
pub fn is_dns1123_label(value: &str) -> bool {
    value.len() <= DNS1123_LABEL_MAX_LENGTH && DNS1123_LABEL.is_match(value)
}

/// 校验策略对象
pub fn validate_policy(policy: &PolicyObject) -> Result<()> {
    let mut errors = ErrorList::new();
    check_label(&mut errors, "policy name", policy.name());
    check_label(&mut errors, "policy namespace", policy.namespace());

    match policy {
        PolicyObject::Exposure(p) => validate_exposure(&mut errors, p),
        PolicyObject::Binding(b) => validate_binding(&mut errors, b),
    }

    errors.into_result(())
}

fn validate_exposure(errors: &mut ErrorList, policy: &ExposurePolicy) {
    if policy.exposed.is_empty() {
        errors.push(Error::Validation(format!(
            "策略 {}.{} 至少需要一个暴露服务",
            policy.namespace, policy.name
        )));
        return;
    }
    for exposed in &policy.exposed {
        validate_exposed_service(errors, exposed);
    }
}

fn validate_exposed_service(errors: &mut ErrorList, exposed: &ExposedService) {
    check_label(errors, "name", &exposed.name);
    check_optional_label(errors, "alias", &exposed.alias);
    check_optional_label(errors, "namespace", &exposed.namespace);
    check_optional_label(errors, "subset", &exposed.subset);
    for cluster in &exposed.clusters {
        if cluster.is_empty() {
            errors.push(Error::Validation(format!(
                "暴露服务 {} 的集群列表包含空值",
                exposed.name
            )));
        }
    }
}

fn validate_binding(errors: &mut ErrorList, binding: &Binding) {
    if binding.remote.is_empty() {
        errors.push(Error::Validation(format!(
            "绑定 {}.{} 至少需要一个远程集群",
            binding.namespace, binding.name
        )));
    }
    for remote in &binding.remote {
        if remote.cluster.is_empty() {
            errors.push(Error::Validation("集群不能为空".to_string()));
        }
        if remote.services.is_empty() {
            errors.push(Error::Validation(format!(
                "远程集群 {:?} 至少需要绑定一个服务",
                remote.cluster
            )));
        }
        for service in &remote.services {
            validate_remote_service(errors, service);
        }
    }
}

fn validate_remote_service(errors: &mut ErrorList, service: &RemoteService) {
    check_label(errors, "name", &service.name);
    check_optional_label(errors, "alias", &service.alias);
    check_optional_label(errors, "namespace", &service.namespace);
}

fn check_label(errors: &mut ErrorList, field: &str, value: &str) {
    if !is_dns1123_label(value) {
        errors.push(Error::Validation(format!("{} 不是合法的 DNS-1123 标签: {:?}", field, value)));
    }
}

fn check_optional_label(errors: &mut ErrorList, field: &str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        check_label(errors, field, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::RemoteCluster;
    use rstest::rstest;

    #[rstest]
    #[case("reviews", true)]
    #[case("reviews-v2", true)]
    #[case("a", true)]
    #[case("Reviews", false)]
    #[case("-reviews", false)]
    #[case("reviews_v2", false)]
    #[case("", false)]
    fn test_dns1123_label(#[case] value: &str, #[case] valid: bool) {
        assert_eq!(is_dns1123_label(value), valid);
    }

    #[test]
    fn test_label_length_limit() {
        assert!(is_dns1123_label(&"a".repeat(63)));
        assert!(!is_dns1123_label(&"a".repeat(64)));
    }

    #[test]
    fn test_valid_exposure() {
        let policy = ExposurePolicy::new("default", "reviews")
            .with_exposed(ExposedService::new("server").with_port(9080));
        assert!(validate_policy(&policy.into()).is_ok());
    }

    #[test]
    fn test_empty_exposure_rejected() {
        let err = validate_policy(&ExposurePolicy::new("default", "reviews").into()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("至少需要一个暴露服务"));
    }

    #[test]
    fn test_binding_errors_are_aggregated() {
        let binding = Binding::new("default", "Bad_Name")
            .with_remote(RemoteCluster::new(""))
            .with_remote(RemoteCluster::new("cluster2").with_service(RemoteService::new("Reviews")));

        let err = validate_policy(&binding.into()).unwrap_err();
        // 名称非法、集群为空、集群无服务、服务名非法
        assert_eq!(err.count(), 4);
        assert!(matches!(err, Error::Aggregate(_)));
    }

    #[test]
    fn test_empty_binding_rejected() {
        let err = validate_policy(&Binding::new("default", "b").into()).unwrap_err();
        assert!(err.to_string().contains("至少需要一个远程集群"));
    }

    #[test]
    fn test_empty_optional_fields_are_ignored() {
        let service = RemoteService {
            alias: Some(String::new()),
            ..RemoteService::new("ratings")
        };
        let binding = Binding::new("", "b")
            .with_remote(RemoteCluster::new("cluster1").with_service(service));
        assert!(validate_policy(&binding.into()).is_ok());
    }
}
