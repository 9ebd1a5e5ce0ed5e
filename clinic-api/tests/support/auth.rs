#![allow(dead_code)]

use std::sync::Arc;

use clinic_api::auth::{generate_jwt_token, test_clocks, AuthConfig, UserRole};
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "clinic-integration-secret-0123456789abcdef";

/// Auth config with a strong secret and a pinned clock.
pub fn test_auth_config() -> AuthConfig {
    AuthConfig::with_secret(TEST_JWT_SECRET, Arc::new(test_clocks::valid()))
        .expect("test secret is valid")
}

/// `Authorization` header value for a user.
pub fn bearer(config: &AuthConfig, user_id: Uuid, role: UserRole) -> String {
    let token = generate_jwt_token(config, user_id, role).expect("token signs");
    format!("Bearer {}", token)
}

pub fn doctor_bearer(config: &AuthConfig, doctor_id: Uuid) -> String {
    bearer(config, doctor_id, UserRole::Doctor)
}
