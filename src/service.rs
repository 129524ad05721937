//! Service identity.

/// Static identity fields stamped on every log record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    pub app_id: i64,
    /// Already normalised with [`service_name`].
    pub app_name: String,
    pub app_version: String,
    pub deploy_env: String,
}

impl ServiceInfo {
    pub fn new(app_id: i64, app_name: &str, app_version: &str, deploy_env: &str) -> Self {
        Self {
            app_id,
            app_name: service_name(app_name),
            app_version: app_version.to_owned(),
            deploy_env: deploy_env.to_owned(),
        }
    }
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self::new(1000, "microservice", "1.0.0", "test")
    }
}

/// Normalises a service name to its short form.
///
/// ```rust
/// use observa::service_name;
///
/// assert_eq!(service_name("Micro-Service-Article"), "article");
/// assert_eq!(service_name("micro_service_article_slb"), "article");
/// assert_eq!(service_name(""), "unknown");
/// ```
pub fn service_name(raw: &str) -> String {
    if raw.is_empty() {
        return "unknown".to_owned();
    }
    let name = raw.to_lowercase();
    for prefix in ["micro-service-", "ms.", "ms_"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest.to_owned();
        }
    }
    if let Some(inner) = name.strip_prefix("micro_service_").and_then(|s| s.strip_suffix("_slb")) {
        return inner.to_owned();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_prefixes() {
        assert_eq!(service_name("ms.order"), "order");
        assert_eq!(service_name("MS_order"), "order");
        assert_eq!(service_name("micro-service-user"), "user");
    }

    #[test]
    fn slb_form_needs_both_ends() {
        assert_eq!(service_name("micro_service_pay_slb"), "pay");
        assert_eq!(service_name("micro_service_pay"), "micro_service_pay");
        assert_eq!(service_name("pay_slb"), "pay_slb");
    }

    #[test]
    fn default_identity() {
        let info = ServiceInfo::default();
        assert_eq!(info.app_id, 1000);
        assert_eq!(info.app_name, "microservice");
        assert_eq!(info.deploy_env, "test");
    }
}
