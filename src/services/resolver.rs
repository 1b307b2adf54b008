//! 目标资源解析
//!
//! 通过标签选择器把已校验的部署解析为一个或多个 Application 名称

use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::application::{LabelKeys, ResolveError, TargetResource};
use crate::domain::deploy::ValidatedDeployment;
use crate::infra::store::ResourceStore;

/// 资源解析器
#[derive(Clone)]
pub struct ResourceResolver {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    labels: LabelKeys,
}

impl ResourceResolver {
    pub fn new(store: Arc<dyn ResourceStore>, namespace: impl Into<String>, labels: LabelKeys) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            labels,
        }
    }

    /// 构建标签选择器；`check_all_clusters` 时不限定集群类型
    pub fn label_selector(&self, deployment: &ValidatedDeployment) -> String {
        let mut selector = format!(
            "{}={},{}={},{}={}",
            self.labels.system,
            deployment.system(),
            self.labels.application,
            deployment.application_name(),
            self.labels.environment,
            deployment.environment(),
        );

        if !deployment.check_all_clusters() {
            selector.push_str(&format!(
                ",{}={}",
                self.labels.cluster_type,
                deployment.cluster_type()
            ));
        }

        selector
    }

    /// 解析目标资源
    pub async fn resolve(
        &self,
        deployment: &ValidatedDeployment,
    ) -> Result<Vec<TargetResource>, ResolveError> {
        let selector = self.label_selector(deployment);
        debug!(namespace = %self.namespace, selector = %selector, "Resolving applications");

        let objects = self
            .store
            .list(&self.namespace, &selector)
            .await
            .map_err(|e| ResolveError::Store(e.to_string()))?;

        if objects.is_empty() {
            return Err(ResolveError::NotFound { selector });
        }

        if objects.len() > 1 && !deployment.check_all_clusters() {
            return Err(ResolveError::Ambiguous {
                count: objects.len(),
            });
        }

        let targets = objects
            .iter()
            .map(|obj| {
                obj.name()
                    .map(|name| TargetResource {
                        name: name.to_string(),
                        namespace: self.namespace.clone(),
                    })
                    .ok_or(ResolveError::MissingName)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            count = targets.len(),
            targets = ?targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "Resolved applications"
        );

        Ok(targets)
    }
}
