//! OIDC 令牌校验
//!
//! 使用身份提供方公开的密钥集校验签名，然后按固定顺序检查声明：
//! iss → aud → exp → iat → repository_owner → repository，首个违例即返回。

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::domain::oidc::{AuthError, ClaimPolicy, Claims};
use crate::infra::jwks::{JwksClient, JwksError};

/// 令牌校验器
pub struct TokenValidator {
    jwks: JwksClient,
    policy: ClaimPolicy,
    algorithms: Vec<Algorithm>,
}

impl TokenValidator {
    pub fn new(jwks: JwksClient, policy: ClaimPolicy, algorithms: Vec<Algorithm>) -> Self {
        Self {
            jwks,
            policy,
            algorithms,
        }
    }

    pub fn jwks_url(&self) -> &str {
        self.jwks.url()
    }

    /// 校验令牌并返回声明
    pub async fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::Malformed(format!(
                "unsupported signing algorithm {:?}",
                header.alg
            )));
        }

        let jwk = self.jwks.find(header.kid.as_deref()).await.map_err(|e| match e {
            JwksError::Fetch { .. } | JwksError::Client(_) => AuthError::KeySet(e.to_string()),
            JwksError::UnknownKey(_) => AuthError::Malformed(e.to_string()),
        })?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| AuthError::Malformed(e.to_string()))?;

        // 只校验签名和算法，声明由 check_claims 按顺序检查
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<Map<String, Value>>(token, &key, &validation)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        check_claims(&data.claims, &self.policy, Utc::now())
    }
}

/// 按顺序检查声明
pub fn check_claims(
    claims: &Map<String, Value>,
    policy: &ClaimPolicy,
    now: DateTime<Utc>,
) -> Result<Claims, AuthError> {
    let issuer = claims
        .get("iss")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::claim("iss", "issuer is missing"))?;
    if issuer != policy.issuer {
        return Err(AuthError::claim("iss", format!("invalid issuer: {}", issuer)));
    }

    let audience = audience(claims.get("aud"))?;
    match audience.first() {
        None => return Err(AuthError::claim("aud", "audience is empty")),
        Some(first) if *first != policy.audience => {
            return Err(AuthError::claim("aud", format!("invalid audience: {}", first)));
        }
        Some(_) => {}
    }

    let expires_at = timestamp(claims.get("exp"), "exp", "expiration time")?;
    if expires_at <= now {
        return Err(AuthError::claim("exp", "token is expired"));
    }

    let issued_at = timestamp(claims.get("iat"), "iat", "issued at time")?;
    if issued_at > now {
        return Err(AuthError::claim("iat", "token is not yet valid"));
    }

    let repository_owner = claims
        .get("repository_owner")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AuthError::claim("repository_owner", "repository_owner claim is missing or not a string")
        })?;
    if repository_owner != policy.repository_owner {
        return Err(AuthError::claim(
            "repository_owner",
            format!("repository owner {} is not valid", repository_owner),
        ));
    }

    let repository = claims
        .get("repository")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::claim("repository", "repository claim is missing or not a string"))?;

    Ok(Claims {
        issuer: issuer.to_string(),
        audience,
        expires_at,
        issued_at,
        repository_owner: repository_owner.to_string(),
        repository: repository.to_string(),
    })
}

/// `aud` 可以是字符串或字符串数组
fn audience(value: Option<&Value>) -> Result<Vec<String>, AuthError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::String(aud)) => Ok(vec![aud.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| AuthError::claim("aud", "audience entries must be strings"))
            })
            .collect(),
        Some(_) => Err(AuthError::claim("aud", "audience must be a string or array")),
    }
}

/// 读取 NumericDate 声明，缺失或为零视为未设置
fn timestamp(
    value: Option<&Value>,
    claim: &'static str,
    label: &str,
) -> Result<DateTime<Utc>, AuthError> {
    let secs = match value {
        None | Some(Value::Null) => return Err(AuthError::claim(claim, format!("{} is zero", label))),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| AuthError::claim(claim, format!("error getting {}", label)))?,
    };

    if secs == 0.0 {
        return Err(AuthError::claim(claim, format!("{} is zero", label)));
    }

    Utc.timestamp_opt(secs.trunc() as i64, 0)
        .single()
        .ok_or_else(|| AuthError::claim(claim, format!("{} is out of range", label)))
}
