//! Authentication Module
//!
//! Verifies the bearer JWTs issued by the clinic's auth service and turns
//! them into an [`AuthContext`]. Tokens carry `{ id, role, iat, exp }`; the
//! `id` of a DOCTOR is the doctor scope of every queue operation.

use crate::config::is_production_environment;
use crate::error::{ApiError, ApiResult};
use clinic_core::DoctorId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Placeholder secret used when none is configured. Refused in production.
pub const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

/// Tokens are issued for a clinic shift.
pub const DEFAULT_JWT_EXPIRATION_SECS: i64 = 8 * 60 * 60;

// ============================================================================
// CLOCK ABSTRACTION
// ============================================================================

/// Clock abstraction for JWT time validation.
///
/// `jsonwebtoken` time checks are disabled; expiry is validated against this
/// clock so tests can pin time.
pub trait JwtClock: Send + Sync {
    /// Current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl JwtClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl JwtClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

/// Test clock helpers for common scenarios.
pub mod test_clocks {
    use super::FixedClock;

    /// 2024-01-01 00:00:00 UTC
    pub fn valid() -> FixedClock {
        FixedClock(1704067200)
    }

    /// 2020-01-01 00:00:00 UTC
    pub fn expired() -> FixedClock {
        FixedClock(1577836800)
    }

    /// 2030-01-01 00:00:00 UTC
    pub fn future() -> FixedClock {
        FixedClock(1893456000)
    }
}

// ============================================================================
// JWT SECRET (TYPE-SAFE)
// ============================================================================

/// JWT signing secret that never shows up in logs.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Wrap a secret. Empty or whitespace-only secrets are rejected.
    pub fn new(secret: impl Into<String>) -> ApiResult<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ApiError::invalid_input("JWT secret must not be empty"));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    /// Expose the secret value (cryptographic operations only).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

fn build_jwt_secret(raw: Option<String>) -> JwtSecret {
    raw.and_then(|s| JwtSecret::new(s).ok())
        .unwrap_or_else(|| JwtSecret(SecretString::new(INSECURE_DEFAULT_SECRET.into())))
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// JWT secret key for signing and verification
    pub jwt_secret: JwtSecret,

    /// JWT algorithm (default: HS256)
    pub jwt_algorithm: Algorithm,

    /// JWT token lifetime in seconds (default: 8 hours)
    pub jwt_expiration_secs: i64,

    /// Clock skew tolerance in seconds (default: 60)
    pub jwt_clock_skew_secs: i64,

    /// Clock for JWT time validation (injected for testing)
    pub clock: Arc<dyn JwtClock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_expiration_secs", &self.jwt_expiration_secs)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .field("clock", &"<JwtClock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: build_jwt_secret(None),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: DEFAULT_JWT_EXPIRATION_SECS,
            jwt_clock_skew_secs: 60,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `CLINIC_JWT_SECRET`: JWT signing secret
    /// - `CLINIC_JWT_EXPIRATION_SECS`: Token lifetime (default: 28800)
    /// - `CLINIC_JWT_CLOCK_SKEW_SECS`: Clock skew tolerance (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            jwt_secret: build_jwt_secret(std::env::var("CLINIC_JWT_SECRET").ok()),
            jwt_expiration_secs: std::env::var("CLINIC_JWT_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jwt_expiration_secs),
            jwt_clock_skew_secs: std::env::var("CLINIC_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jwt_clock_skew_secs),
            ..defaults
        }
    }

    /// Test configuration with a known secret and a pinned clock.
    pub fn with_secret(secret: &str, clock: Arc<dyn JwtClock>) -> ApiResult<Self> {
        Ok(Self {
            jwt_secret: JwtSecret::new(secret)?,
            clock,
            ..Self::default()
        })
    }

    /// Refuse weak secrets in production; warn elsewhere.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let is_production = is_production_environment();

        if self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(
                    "Cannot start server in production with insecure JWT secret. \
                     Set CLINIC_JWT_SECRET to a secure value.",
                ));
            }
            tracing::warn!(
                "Using insecure default JWT secret. Set CLINIC_JWT_SECRET \
                 (minimum 32 characters) before deploying."
            );
        } else if self.jwt_secret.len() < 32 {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "JWT secret is too short for production use ({} chars). \
                     It must be at least 32 characters long.",
                    self.jwt_secret.len()
                )));
            }
            tracing::warn!(
                secret_len = self.jwt_secret.len(),
                "JWT secret is short; use at least 32 characters in production"
            );
        }

        Ok(())
    }
}

// ============================================================================
// ROLES AND CLAIMS
// ============================================================================

/// Clinic user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Doctor,
    /// Front desk.
    Staff,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Doctor => "DOCTOR",
            UserRole::Staff => "STAFF",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims as issued by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub id: String,

    pub role: UserRole,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, role: UserRole, expiration_secs: i64, clock: &dyn JwtClock) -> Self {
        let now = clock.now_epoch_secs();
        Self {
            id: user_id.to_string(),
            role,
            iat: now,
            exp: now + expiration_secs,
        }
    }

    pub fn is_expired(&self, clock: &dyn JwtClock) -> bool {
        self.exp < clock.now_epoch_secs()
    }
}

// ============================================================================
// AUTHENTICATION CONTEXT
// ============================================================================

/// Authenticated caller, injected into request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthContext {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role }
    }

    /// The doctor whose queue this caller operates on.
    pub fn doctor_id(&self) -> DoctorId {
        self.user_id
    }

    /// Whether the caller may watch a doctor's queue in realtime.
    ///
    /// Doctors see only their own room; front desk staff see every room.
    pub fn can_view_doctor(&self, doctor_id: DoctorId) -> bool {
        match self.role {
            UserRole::Doctor => self.user_id == doctor_id,
            UserRole::Staff => true,
        }
    }
}

// ============================================================================
// TOKEN VALIDATION
// ============================================================================

/// Validate claim times against an injected clock with skew tolerance.
fn validate_claim_times(now: i64, exp: i64, leeway_secs: i64) -> ApiResult<()> {
    if exp < now - leeway_secs {
        return Err(ApiError::token_expired());
    }
    Ok(())
}

/// Validate a JWT token and extract claims.
///
/// Signature checking is done by `jsonwebtoken`; expiry is checked here with
/// the configured clock.
pub fn validate_jwt_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

    let token_data =
        decode::<Claims>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::invalid_token("Token signature is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidToken => {
                ApiError::invalid_token("Invalid token format")
            }
            _ => ApiError::invalid_token("Invalid or expired token"),
        })?;

    let claims = token_data.claims;
    let now = config.clock.now_epoch_secs();
    if now < 0 {
        tracing::error!(timestamp = now, "System clock returned pre-epoch time");
        return Err(ApiError::internal_error("Server time configuration error"));
    }

    validate_claim_times(now, claims.exp, config.jwt_clock_skew_secs)?;

    Ok(claims)
}

/// Sign a token for a user. The auth service owns issuance; this exists for
/// tests and local tooling.
pub fn generate_jwt_token(config: &AuthConfig, user_id: Uuid, role: UserRole) -> ApiResult<String> {
    let claims = Claims::new(user_id, role, config.jwt_expiration_secs, &*config.clock);
    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    let header = Header::new(config.jwt_algorithm);

    encode(&header, &claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

/// Authenticate a raw token.
pub fn authenticate_token(config: &AuthConfig, token: &str) -> ApiResult<AuthContext> {
    if token.split('.').count() != 3 {
        return Err(ApiError::invalid_token("Invalid token format"));
    }

    let claims = validate_jwt_token(config, token)?;
    let user_id = Uuid::parse_str(&claims.id)
        .map_err(|_| ApiError::invalid_token("Token subject is not a valid user id"))?;

    Ok(AuthContext::new(user_id, claims.role))
}

/// Authenticate an `Authorization` header value.
pub fn authenticate(config: &AuthConfig, auth_header: Option<&str>) -> ApiResult<AuthContext> {
    let token = auth_header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    authenticate_token(config, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_env::{self, EnvVarGuard};

    fn test_config() -> AuthConfig {
        AuthConfig::with_secret("test_secret", Arc::new(test_clocks::valid()))
            .expect("Test secret should be valid")
    }

    #[test]
    fn test_jwt_generation_and_validation() -> ApiResult<()> {
        let config = test_config();
        let doctor = Uuid::now_v7();

        let token = generate_jwt_token(&config, doctor, UserRole::Doctor)?;
        let claims = validate_jwt_token(&config, &token)?;

        assert_eq!(claims.id, doctor.to_string());
        assert_eq!(claims.role, UserRole::Doctor);
        assert_eq!(claims.exp - claims.iat, DEFAULT_JWT_EXPIRATION_SECS);
        assert!(!claims.is_expired(&test_clocks::valid()));
        Ok(())
    }

    #[test]
    fn test_expired_token() -> ApiResult<()> {
        let mut config = test_config();
        let token = generate_jwt_token(&config, Uuid::now_v7(), UserRole::Staff)?;

        config.clock = Arc::new(test_clocks::future());
        let err = validate_jwt_token(&config, &token).err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::TokenExpired));
        Ok(())
    }

    #[test]
    fn test_clock_skew_tolerated() -> ApiResult<()> {
        let mut config = test_config();
        let token = generate_jwt_token(&config, Uuid::now_v7(), UserRole::Staff)?;

        let just_after_expiry =
            test_clocks::valid().0 + DEFAULT_JWT_EXPIRATION_SECS + config.jwt_clock_skew_secs - 1;
        config.clock = Arc::new(FixedClock(just_after_expiry));
        assert!(validate_jwt_token(&config, &token).is_ok());
        Ok(())
    }

    #[test]
    fn test_wrong_secret_rejected() -> ApiResult<()> {
        let config = test_config();
        let token = generate_jwt_token(&config, Uuid::now_v7(), UserRole::Doctor)?;

        let other = AuthConfig::with_secret("another_secret", Arc::new(test_clocks::valid()))?;
        let err = validate_jwt_token(&other, &token).err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::InvalidToken));
        Ok(())
    }

    #[test]
    fn test_authenticate_header_forms() -> ApiResult<()> {
        let config = test_config();
        let doctor = Uuid::now_v7();
        let token = generate_jwt_token(&config, doctor, UserRole::Doctor)?;

        let ctx = authenticate(&config, Some(&format!("Bearer {}", token)))?;
        assert_eq!(ctx.doctor_id(), doctor);
        assert_eq!(ctx.role, UserRole::Doctor);

        let missing = authenticate(&config, None).err();
        assert_eq!(
            missing.as_ref().map(|e| e.message.as_str()),
            Some("Authentication required")
        );

        let wrong_scheme = authenticate(&config, Some(&format!("Basic {}", token))).err();
        assert_eq!(wrong_scheme.map(|e| e.code), Some(ErrorCode::Unauthorized));

        let malformed = authenticate(&config, Some("Bearer not-a-jwt")).err();
        assert_eq!(
            malformed.as_ref().map(|e| e.message.as_str()),
            Some("Invalid token format")
        );
        Ok(())
    }

    #[test]
    fn test_room_visibility_by_role() {
        let doctor = Uuid::now_v7();
        let other = Uuid::now_v7();

        let as_doctor = AuthContext::new(doctor, UserRole::Doctor);
        assert!(as_doctor.can_view_doctor(doctor));
        assert!(!as_doctor.can_view_doctor(other));

        let as_staff = AuthContext::new(Uuid::now_v7(), UserRole::Staff);
        assert!(as_staff.can_view_doctor(doctor));
        assert!(as_staff.can_view_doctor(other));
    }

    #[test]
    fn test_jwt_secret_debug_redacted() -> ApiResult<()> {
        let secret = JwtSecret::new("super-secret-value")?;
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("REDACTED"));
        assert!(JwtSecret::new("   ").is_err());
        Ok(())
    }

    #[test]
    fn test_from_env_reads_settings() {
        let _lock = test_env::lock();
        let _secret = EnvVarGuard::set("CLINIC_JWT_SECRET", Some("a-very-long-secret-for-the-test-suite"));
        let _exp = EnvVarGuard::set("CLINIC_JWT_EXPIRATION_SECS", Some("600"));
        let _skew = EnvVarGuard::set("CLINIC_JWT_CLOCK_SKEW_SECS", None);

        let config = AuthConfig::from_env();
        assert!(!config.jwt_secret.is_insecure_default());
        assert_eq!(config.jwt_expiration_secs, 600);
        assert_eq!(config.jwt_clock_skew_secs, 60);
    }

    #[test]
    fn test_production_rejects_default_secret() {
        let _lock = test_env::lock();
        let _env = EnvVarGuard::set("CLINIC_ENVIRONMENT", Some("production"));
        let _secret = EnvVarGuard::set("CLINIC_JWT_SECRET", None);

        let config = AuthConfig::from_env();
        assert!(config.jwt_secret.is_insecure_default());
        assert!(config.validate_for_production().is_err());

        let _dev = EnvVarGuard::set("CLINIC_ENVIRONMENT", Some("development"));
        assert!(config.validate_for_production().is_ok());
    }
}
