use super::*;

// =============================================================================
// bytes_to_hex
// =============================================================================

#[test]
fn bytes_to_hex_empty() {
    assert_eq!(bytes_to_hex(&[]), "");
}

#[test]
fn bytes_to_hex_leading_zero() {
    assert_eq!(bytes_to_hex(&[0x0a]), "0a");
}

#[test]
fn bytes_to_hex_multi_byte() {
    assert_eq!(bytes_to_hex(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
}

// =============================================================================
// generate_token / generate_ws_ticket
// =============================================================================

#[test]
fn generate_token_is_64_hex_chars() {
    let token = generate_token();
    assert_eq!(token.len(), 64);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn generate_token_two_calls_differ() {
    assert_ne!(generate_token(), generate_token());
}

#[test]
fn generate_ws_ticket_is_32_hex_chars() {
    let ticket = generate_ws_ticket();
    assert_eq!(ticket.len(), 32);
    assert!(ticket.chars().all(|c| c.is_ascii_hexdigit()));
}

// =============================================================================
// SessionUser
// =============================================================================

#[test]
fn session_user_serializes_role_lowercase() {
    let user = SessionUser {
        id: Uuid::nil(),
        email: "gm@example.com".into(),
        display_name: "GM".into(),
        avatar_url: None,
        role: UserRole::Master,
    };
    let json = serde_json::to_value(&user).unwrap();
    assert_eq!(json["role"], "master");
    assert_eq!(json["display_name"], "GM");
    assert!(json["avatar_url"].is_null());
}

#[tokio::test]
#[ignore = "requires a migrated Postgres database"]
async fn ws_ticket_is_single_use() {
    let pool = sqlx::PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    let user_id: Uuid = sqlx::query_scalar("SELECT id FROM users LIMIT 1").fetch_one(&pool).await.unwrap();

    let ticket = create_ws_ticket(&pool, user_id, 60).await.unwrap();
    assert_eq!(consume_ws_ticket(&pool, &ticket).await.unwrap(), Some(user_id));
    assert_eq!(consume_ws_ticket(&pool, &ticket).await.unwrap(), None);
}
