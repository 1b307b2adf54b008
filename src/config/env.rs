//! 环境变量配置加载

use jsonwebtoken::Algorithm;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, warn};

use crate::domain::application::{ConvergenceMode, LabelKeys};
use crate::infra::kube::TokenSource;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 服务监听端口
    pub port: u16,
    /// 本地模式（跳过令牌校验）
    pub local: bool,
    /// 本地模式下强制启用令牌校验，仅用于测试
    pub testing_enable_oidc: bool,
    /// OIDC 令牌校验配置
    pub oidc: OidcConfig,
    /// 资源存储访问配置
    pub kube: KubeConfig,
    /// 监视配置
    pub watch: WatchConfig,
}

/// OIDC 令牌校验配置
#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub jwks_url: String,
    pub issuer: String,
    pub audience: String,
    pub repository_owner: String,
    pub jwks_cache_ttl: Duration,
    pub algorithms: Vec<Algorithm>,
}

/// 资源存储访问配置
#[derive(Clone, Debug)]
pub struct KubeConfig {
    pub api_url: String,
    pub token: TokenSource,
    pub ca_cert_path: Option<PathBuf>,
}

/// 监视配置
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// 目标资源所在的命名空间
    pub namespace: String,
    pub mode: ConvergenceMode,
    pub labels: LabelKeys,
    /// 请求未指定超时时使用
    pub default_timeout: Duration,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源加载配置
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let local = flag(&lookup, "LOCAL");
        let testing_enable_oidc = flag(&lookup, "TESTING_ENABLE_OIDC");
        if testing_enable_oidc {
            error!("TESTING_ENABLE_OIDC is set. This must never be used in production");
        }

        let port = lookup("PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(constants::DEFAULT_PORT);

        Self {
            port,
            local,
            testing_enable_oidc,
            oidc: OidcConfig::from_lookup(&lookup),
            kube: KubeConfig::from_lookup(&lookup, local),
            watch: WatchConfig::from_lookup(&lookup),
        }
    }

    /// 是否需要校验令牌
    pub fn auth_required(&self) -> bool {
        !self.local || self.testing_enable_oidc
    }
}

impl OidcConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwks_cache_ttl = lookup("OIDC_JWKS_CACHE_TTL_SECS")
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(constants::JWKS_CACHE_TTL);

        let algorithms = lookup("OIDC_ALGORITHMS")
            .map(|v| parse_algorithms(&v))
            .filter(|algs| !algs.is_empty())
            .unwrap_or_else(|| vec![Algorithm::RS256]);

        Self {
            jwks_url: non_empty(lookup, "OIDC_JWKS_URL")
                .unwrap_or_else(|| constants::GITHUB_JWKS_URL.to_string()),
            issuer: non_empty(lookup, "OIDC_ISSUER")
                .unwrap_or_else(|| constants::GITHUB_ISSUER.to_string()),
            audience: non_empty(lookup, "OIDC_AUDIENCE")
                .unwrap_or_else(|| constants::AUDIENCE.to_string()),
            repository_owner: non_empty(lookup, "OIDC_REPOSITORY_OWNER")
                .unwrap_or_else(|| constants::REPOSITORY_OWNER.to_string()),
            jwks_cache_ttl,
            algorithms,
        }
    }
}

impl KubeConfig {
    fn from_lookup<F>(lookup: &F, local: bool) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let in_cluster = !local;

        let api_url = non_empty(lookup, "KUBE_API_URL").unwrap_or_else(|| {
            if local {
                return constants::LOCAL_API_URL.to_string();
            }
            match (
                non_empty(lookup, "KUBERNETES_SERVICE_HOST"),
                non_empty(lookup, "KUBERNETES_SERVICE_PORT"),
            ) {
                // IPv6 地址需要方括号
                (Some(host), Some(port)) if host.contains(':') => format!("https://[{}]:{}", host, port),
                (Some(host), Some(port)) => format!("https://{}:{}", host, port),
                _ => {
                    warn!("KUBERNETES_SERVICE_HOST not set, using default in-cluster address");
                    constants::IN_CLUSTER_API_URL.to_string()
                }
            }
        });

        let token = match non_empty(lookup, "KUBE_TOKEN") {
            Some(token) => TokenSource::Static(token),
            None if in_cluster => {
                TokenSource::File(PathBuf::from(constants::SERVICE_ACCOUNT_DIR).join("token"))
            }
            None => TokenSource::None,
        };

        let ca_cert_path = non_empty(lookup, "KUBE_CA_CERT").map(PathBuf::from).or_else(|| {
            in_cluster.then(|| PathBuf::from(constants::SERVICE_ACCOUNT_DIR).join("ca.crt"))
        });

        Self {
            api_url,
            token,
            ca_cert_path,
        }
    }
}

impl WatchConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match non_empty(lookup, "CONVERGENCE_MODE") {
            None => ConvergenceMode::default(),
            Some(v) => ConvergenceMode::parse(&v).unwrap_or_else(|| {
                warn!(value = %v, "Unknown CONVERGENCE_MODE, using out-of-sync");
                ConvergenceMode::default()
            }),
        };

        Self {
            namespace: non_empty(lookup, "ARGOCD_NAMESPACE")
                .unwrap_or_else(|| constants::ARGOCD_NAMESPACE.to_string()),
            mode,
            labels: LabelKeys {
                system: constants::LABEL_SYSTEM.to_string(),
                application: constants::LABEL_APPLICATION.to_string(),
                environment: constants::LABEL_ENVIRONMENT.to_string(),
                cluster_type: constants::LABEL_CLUSTER_TYPE.to_string(),
            },
            default_timeout: constants::DEFAULT_WATCH_TIMEOUT,
        }
    }
}

/// 布尔开关：`1` 或 `true`（不区分大小写）
fn flag<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim() == "1" || v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 解析逗号分隔的签名算法列表，忽略无法识别的项
fn parse_algorithms(value: &str) -> Vec<Algorithm> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match Algorithm::from_str(s) {
            Ok(alg) => Some(alg),
            Err(_) => {
                warn!(algorithm = %s, "Ignoring unknown signing algorithm");
                None
            }
        })
        .collect()
}

/// 常量
pub mod constants {
    use std::time::Duration;

    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 8080;

    /// 默认监视超时
    pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(180);

    /// 签名密钥缓存时间
    pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(600);

    pub const GITHUB_JWKS_URL: &str = "https://token.actions.githubusercontent.com/.well-known/jwks";
    pub const GITHUB_ISSUER: &str = "https://token.actions.githubusercontent.com";
    pub const AUDIENCE: &str = "https://github.com/3lvia";
    pub const REPOSITORY_OWNER: &str = "3lvia";

    pub const ARGOCD_NAMESPACE: &str = "argocd";

    pub const LABEL_SYSTEM: &str = "elvia.no/system";
    pub const LABEL_APPLICATION: &str = "elvia.no/application";
    pub const LABEL_ENVIRONMENT: &str = "kubernetes.io/environment";
    pub const LABEL_CLUSTER_TYPE: &str = "elvia.no/cluster-type";

    /// `kubectl proxy` 默认地址
    pub const LOCAL_API_URL: &str = "http://127.0.0.1:8001";
    pub const IN_CLUSTER_API_URL: &str = "https://kubernetes.default.svc";
    pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
