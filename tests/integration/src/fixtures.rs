//! Test data builders: users, tokens, models, and department budgets, inserted
//! directly against the migrated database the same way `Repository`'s own
//! methods bind parameters.

use gateway_migrations::DatabasePool;
use gateway_security::HashingService;
use std::sync::Arc;
use uuid::Uuid;

/// A token fixture plus the raw key a client would present as `Authorization: Bearer <key>`.
pub struct TokenFixture {
    pub raw_key: String,
    pub token_id: Uuid,
    pub user_id: Uuid,
}

/// Insert a user in `department`, and an enabled token for them with the given
/// per-dimension rate-limit overrides (`None` inherits department/global defaults).
pub async fn insert_token(
    pool: &Arc<DatabasePool>,
    department: &str,
    rpm: Option<i32>,
    tpm: Option<i32>,
) -> TokenFixture {
    insert_token_with_allowed_models(pool, department, rpm, tpm, &[]).await
}

/// Like [`insert_token`], restricted to the given model identifiers (empty means
/// no restriction).
pub async fn insert_token_with_allowed_models(
    pool: &Arc<DatabasePool>,
    department: &str,
    rpm: Option<i32>,
    tpm: Option<i32>,
    allowed_models: &[&str],
) -> TokenFixture {
    let user_id = Uuid::new_v4();
    let email = format!("{user_id}@example.test");

    sqlx::query("INSERT INTO users (id, email, department) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(&email)
        .bind(department)
        .execute(pool.inner())
        .await
        .expect("insert user");

    let raw_key = format!("sk-{}", Uuid::new_v4().simple());
    let key_hash = HashingService::sha256_hex(raw_key.as_bytes());
    let key_prefix: String = raw_key.chars().take(12).collect();
    let token_id = Uuid::new_v4();

    let allowed: Vec<String> = allowed_models.iter().map(|m| (*m).to_string()).collect();

    sqlx::query(
        r#"
        INSERT INTO api_tokens
            (id, user_id, key_hash, key_prefix, enabled, banned, allowed_models, rate_limit_rpm, rate_limit_tpm)
        VALUES ($1, $2, $3, $4, TRUE, FALSE, $5, $6, $7)
        "#,
    )
    .bind(token_id)
    .bind(user_id)
    .bind(&key_hash)
    .bind(&key_prefix)
    .bind(&allowed)
    .bind(rpm)
    .bind(tpm)
    .execute(pool.inner())
    .await
    .expect("insert api token");

    TokenFixture { raw_key, token_id, user_id }
}

/// Insert an enabled model pointing at a single endpoint.
pub async fn insert_model(pool: &Arc<DatabasePool>, name: &str, endpoint_url: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO models (id, name, enabled, endpoint_url) VALUES ($1, $2, TRUE, $3)",
    )
    .bind(id)
    .bind(name)
    .bind(endpoint_url)
    .execute(pool.inner())
    .await
    .expect("insert model");
    id
}

/// Insert an additional failover endpoint for an existing model.
pub async fn insert_sub_model(pool: &Arc<DatabasePool>, parent_model_id: Uuid, sort_order: i32, endpoint_url: &str) {
    sqlx::query(
        r#"
        INSERT INTO sub_models (id, parent_model_id, sort_order, enabled, endpoint_url)
        VALUES ($1, $2, $3, TRUE, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(parent_model_id)
    .bind(sort_order)
    .bind(endpoint_url)
    .execute(pool.inner())
    .await
    .expect("insert sub model");
}

/// Insert a department budget row.
pub async fn insert_dept_budget(pool: &Arc<DatabasePool>, department: &str, monthly_budget_tokens: Option<i64>) {
    sqlx::query(
        "INSERT INTO dept_budgets (id, department, monthly_budget_tokens) VALUES ($1, $2, $3)",
    )
    .bind(Uuid::new_v4())
    .bind(department)
    .bind(monthly_budget_tokens)
    .execute(pool.inner())
    .await
    .expect("insert dept budget");
}
