use super::*;
use crate::auth::password::{
    generate_opaque_token, hash_password, hash_token, validate_password_strength, verify_password,
};
use crate::config::config_model::AuthConfig;

fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "supersecretjwtsecretforunittesting123".to_string(),
        access_token_ttl_mins: 15,
        refresh_token_ttl_days: 7,
        max_login_attempts: 5,
        lockout_mins: 15,
    }
}

#[test]
fn test_access_token_round_trip() {
    let config = test_auth_config();
    let user_id = Uuid::new_v4();

    let (token, expires_at) = generate_access_token(
        user_id,
        "user",
        Some("test@example.com".to_string()),
        &config,
    )
    .expect("token generation should succeed");

    assert!(expires_at > Utc::now());

    let claims =
        validate_access_token(&token, &config.jwt_secret).expect("valid token should pass");
    assert_eq!(claims.sub, user_id.to_string());
    assert_eq!(claims.role, "user");
    assert_eq!(claims.email.as_deref(), Some("test@example.com"));
}

#[test]
fn test_access_token_rejects_wrong_secret() {
    let config = test_auth_config();
    let (token, _) =
        generate_access_token(Uuid::new_v4(), "user", None, &config).expect("token generation");

    let result = validate_access_token(&token, "a-different-secret");
    assert!(result.is_err());
}

#[test]
fn test_access_token_rejects_garbage() {
    let result = validate_access_token("not.a.jwt", "whatever");
    assert!(result.is_err());
}

#[test]
fn test_hash_and_verify_password() {
    let password = "correct-horse-battery-staple";
    let hash = hash_password(password).expect("hashing should succeed");

    assert!(
        hash.starts_with("$argon2id$"),
        "expected argon2id PHC prefix"
    );

    assert!(verify_password(password, &hash).expect("verify should succeed"));
    assert!(!verify_password("wrong-password", &hash).expect("verify should succeed"));
}

#[test]
fn test_password_strength() {
    assert!(validate_password_strength("short", 12).is_err());
    assert!(validate_password_strength("twelve_chars", 12).is_ok());
}

#[test]
fn test_opaque_tokens_are_unique_and_hash_deterministically() {
    let first = generate_opaque_token();
    let second = generate_opaque_token();
    assert_ne!(first, second);
    assert_eq!(first.len(), 64);

    assert_eq!(hash_token(&first), hash_token(&first));
    assert_ne!(hash_token(&first), hash_token(&second));
}
