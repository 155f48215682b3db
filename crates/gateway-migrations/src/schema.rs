//! Database schema migrations.
//!
//! This module contains all the SQL migrations for the gateway database.

use crate::migration::Migration;

/// Get all migrations in order.
#[must_use]
pub fn all_migrations() -> Vec<Migration> {
    vec![
        v001_create_users(),
        v002_create_api_tokens(),
        v003_create_dept_budgets(),
        v004_create_models(),
        v005_create_sub_models(),
        v006_create_rate_limit_config(),
        v007_create_usage_logs(),
        v008_create_daily_usage_stats(),
        v009_create_request_logs(),
        v010_create_endpoint_health(),
        v011_add_user_monthly_budget(),
        v012_unify_dept_overrides(),
    ]
}

/// V001: Create users table.
#[must_use]
pub fn v001_create_users() -> Migration {
    Migration::builder(20240101000001, "create_users")
        .up(r#"
            -- Users table: the principals API tokens are issued to
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                email VARCHAR(255) NOT NULL UNIQUE,
                display_name VARCHAR(255),
                department VARCHAR(100) NOT NULL DEFAULT 'default',
                banned BOOLEAN NOT NULL DEFAULT FALSE,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE OR REPLACE FUNCTION update_updated_at_column()
            RETURNS TRIGGER AS $$
            BEGIN
                NEW.updated_at = NOW();
                RETURN NEW;
            END;
            $$ language 'plpgsql';

            CREATE TRIGGER update_users_updated_at
                BEFORE UPDATE ON users
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();

            CREATE INDEX idx_users_department ON users(department);
            CREATE INDEX idx_users_banned ON users(banned);
        "#)
        .down(r#"
            DROP TRIGGER IF EXISTS update_users_updated_at ON users;
            DROP FUNCTION IF EXISTS update_updated_at_column();
            DROP TABLE IF EXISTS users CASCADE;
        "#)
        .tag("core")
        .tag("users")
        .build()
}

/// V002: Create API tokens table.
#[must_use]
pub fn v002_create_api_tokens() -> Migration {
    Migration::builder(20240101000002, "create_api_tokens")
        .up(r#"
            -- API tokens. key_hash is the authoritative identity: the bearer key itself
            -- is never persisted, only its SHA-256 hash.
            CREATE TABLE IF NOT EXISTS api_tokens (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                key_hash VARCHAR(64) NOT NULL UNIQUE,
                key_prefix VARCHAR(16) NOT NULL,
                name VARCHAR(255),
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                banned BOOLEAN NOT NULL DEFAULT FALSE,
                allowed_models TEXT[] NOT NULL DEFAULT '{}',
                rate_limit_rpm INTEGER,
                rate_limit_tpm INTEGER,
                rate_limit_tph INTEGER,
                rate_limit_tpd INTEGER,
                monthly_budget_tokens BIGINT,
                expires_at TIMESTAMPTZ,
                last_used_at TIMESTAMPTZ,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TRIGGER update_api_tokens_updated_at
                BEFORE UPDATE ON api_tokens
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();

            -- Indexes
            CREATE INDEX idx_api_tokens_user_id ON api_tokens(user_id);
            CREATE INDEX idx_api_tokens_key_hash ON api_tokens(key_hash);
            CREATE INDEX idx_api_tokens_key_prefix ON api_tokens(key_prefix);
            CREATE INDEX idx_api_tokens_enabled ON api_tokens(enabled);
            CREATE INDEX idx_api_tokens_expires_at ON api_tokens(expires_at);

            -- Auth hot path: enabled, unexpired tokens looked up by hash
            CREATE INDEX idx_api_tokens_active
                ON api_tokens(key_hash)
                WHERE enabled = TRUE AND banned = FALSE;
        "#)
        .down(r#"
            DROP TRIGGER IF EXISTS update_api_tokens_updated_at ON api_tokens;
            DROP TABLE IF EXISTS api_tokens CASCADE;
        "#)
        .tag("core")
        .tag("auth")
        .build()
}

/// V003: Create department budgets table.
#[must_use]
pub fn v003_create_dept_budgets() -> Migration {
    Migration::builder(20240101000003, "create_dept_budgets")
        .up(r#"
            -- Monthly output-token budgets per department. Null budget_tokens inherits
            -- the global default; 0 means unlimited.
            CREATE TABLE IF NOT EXISTS dept_budgets (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                department VARCHAR(100) NOT NULL UNIQUE,
                monthly_budget_tokens BIGINT,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TRIGGER update_dept_budgets_updated_at
                BEFORE UPDATE ON dept_budgets
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();

            CREATE INDEX idx_dept_budgets_department ON dept_budgets(department);
        "#)
        .down(r#"
            DROP TRIGGER IF EXISTS update_dept_budgets_updated_at ON dept_budgets;
            DROP TABLE IF EXISTS dept_budgets CASCADE;
        "#)
        .tag("core")
        .tag("budgets")
        .build()
}

/// V004: Create models table.
#[must_use]
pub fn v004_create_models() -> Migration {
    Migration::builder(20240101000004, "create_models")
        .up(r#"
            -- Primary model configurations. Callers address a model by id, name, or
            -- alias; the endpoint fields describe the primary upstream target.
            CREATE TABLE IF NOT EXISTS models (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name VARCHAR(200) NOT NULL UNIQUE,
                alias VARCHAR(200) UNIQUE,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                endpoint_url VARCHAR(500) NOT NULL,
                api_key_encrypted TEXT,
                extra_headers JSONB NOT NULL DEFAULT '{}',
                upstream_model_name VARCHAR(200),
                max_tokens INTEGER,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TRIGGER update_models_updated_at
                BEFORE UPDATE ON models
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();

            CREATE INDEX idx_models_name ON models(name);
            CREATE INDEX idx_models_alias ON models(alias);
            CREATE INDEX idx_models_enabled ON models(enabled);
        "#)
        .down(r#"
            DROP TRIGGER IF EXISTS update_models_updated_at ON models;
            DROP TABLE IF EXISTS models CASCADE;
        "#)
        .tag("routing")
        .tag("models")
        .build()
}

/// V005: Create sub-models table.
#[must_use]
pub fn v005_create_sub_models() -> Migration {
    Migration::builder(20240101000005, "create_sub_models")
        .up(r#"
            -- Additional endpoints a model can fail over to, attempted in sort_order
            -- after the primary endpoint.
            CREATE TABLE IF NOT EXISTS sub_models (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                parent_model_id UUID NOT NULL REFERENCES models(id) ON DELETE CASCADE,
                sort_order INTEGER NOT NULL DEFAULT 0,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                endpoint_url VARCHAR(500) NOT NULL,
                api_key_encrypted TEXT,
                extra_headers JSONB NOT NULL DEFAULT '{}',
                model_name VARCHAR(200),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TRIGGER update_sub_models_updated_at
                BEFORE UPDATE ON sub_models
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();

            CREATE INDEX idx_sub_models_parent_model_id ON sub_models(parent_model_id);
            CREATE INDEX idx_sub_models_enabled ON sub_models(enabled);
            CREATE INDEX idx_sub_models_sort_order ON sub_models(parent_model_id, sort_order);
        "#)
        .down(r#"
            DROP TRIGGER IF EXISTS update_sub_models_updated_at ON sub_models;
            DROP TABLE IF EXISTS sub_models CASCADE;
        "#)
        .tag("routing")
        .tag("models")
        .build()
}

/// V006: Create rate limit configuration table.
#[must_use]
pub fn v006_create_rate_limit_config() -> Migration {
    Migration::builder(20240101000006, "create_rate_limit_config")
        .up(r#"
            -- Per-department rate limit overrides. A token without a row here, or with
            -- a null field, inherits the global default for that dimension.
            CREATE TABLE IF NOT EXISTS rate_limit_config (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                department VARCHAR(100) NOT NULL UNIQUE,
                requests_per_minute INTEGER,
                tokens_per_minute INTEGER,
                tokens_per_hour INTEGER,
                tokens_per_day INTEGER,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TRIGGER update_rate_limit_config_updated_at
                BEFORE UPDATE ON rate_limit_config
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();

            CREATE INDEX idx_rate_limit_config_department ON rate_limit_config(department);
        "#)
        .down(r#"
            DROP TRIGGER IF EXISTS update_rate_limit_config_updated_at ON rate_limit_config;
            DROP TABLE IF EXISTS rate_limit_config CASCADE;
        "#)
        .tag("core")
        .tag("rate_limiting")
        .build()
}

/// V007: Create usage logs table.
#[must_use]
pub fn v007_create_usage_logs() -> Migration {
    Migration::builder(20240101000007, "create_usage_logs")
        .up(r#"
            -- One row per completed request, written during reconciliation.
            CREATE TABLE IF NOT EXISTS usage_logs (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                request_id VARCHAR(64) NOT NULL,
                api_token_id UUID REFERENCES api_tokens(id) ON DELETE SET NULL,
                user_id UUID REFERENCES users(id) ON DELETE SET NULL,
                department VARCHAR(100) NOT NULL,
                model VARCHAR(200) NOT NULL,
                endpoint_url VARCHAR(500) NOT NULL,
                prompt_tokens BIGINT NOT NULL DEFAULT 0,
                completion_tokens BIGINT NOT NULL DEFAULT 0,
                total_tokens BIGINT NOT NULL DEFAULT 0,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                streamed BOOLEAN NOT NULL DEFAULT FALSE,
                outcome VARCHAR(40) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            -- Indexes for accounting and budget-gate reads
            CREATE INDEX idx_usage_logs_request_id ON usage_logs(request_id);
            CREATE INDEX idx_usage_logs_api_token_id ON usage_logs(api_token_id);
            CREATE INDEX idx_usage_logs_department_created ON usage_logs(department, created_at);
            CREATE INDEX idx_usage_logs_model ON usage_logs(model);
            CREATE INDEX idx_usage_logs_created_at ON usage_logs(created_at);
        "#)
        .down(r#"
            DROP TABLE IF EXISTS usage_logs CASCADE;
        "#)
        .tag("core")
        .tag("usage")
        .build()
}

/// V008: Create daily usage stats table.
#[must_use]
pub fn v008_create_daily_usage_stats() -> Migration {
    Migration::builder(20240101000008, "create_daily_usage_stats")
        .up(r#"
            -- Daily rollup, upserted once per (scope, model, date) during reconciliation.
            CREATE TABLE IF NOT EXISTS daily_usage_stats (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                scope_type VARCHAR(20) NOT NULL,
                scope_id VARCHAR(200) NOT NULL,
                model VARCHAR(200) NOT NULL,
                stat_date DATE NOT NULL,
                request_count BIGINT NOT NULL DEFAULT 0,
                prompt_tokens BIGINT NOT NULL DEFAULT 0,
                completion_tokens BIGINT NOT NULL DEFAULT 0,
                total_tokens BIGINT NOT NULL DEFAULT 0,
                error_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE(scope_type, scope_id, model, stat_date)
            );

            CREATE TRIGGER update_daily_usage_stats_updated_at
                BEFORE UPDATE ON daily_usage_stats
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();

            CREATE INDEX idx_daily_usage_stats_scope ON daily_usage_stats(scope_type, scope_id, stat_date);
            CREATE INDEX idx_daily_usage_stats_date ON daily_usage_stats(stat_date);
        "#)
        .down(r#"
            DROP TRIGGER IF EXISTS update_daily_usage_stats_updated_at ON daily_usage_stats;
            DROP TABLE IF EXISTS daily_usage_stats CASCADE;
        "#)
        .tag("usage")
        .tag("reporting")
        .build()
}

/// V009: Create request logs table.
#[must_use]
pub fn v009_create_request_logs() -> Migration {
    Migration::builder(20240101000009, "create_request_logs")
        .up(r#"
            -- Request/response payload logging. Image content is redacted and large
            -- bodies truncated before this row is written.
            CREATE TABLE IF NOT EXISTS request_logs (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                request_id VARCHAR(64) NOT NULL UNIQUE,
                api_token_id UUID REFERENCES api_tokens(id) ON DELETE SET NULL,
                method VARCHAR(10) NOT NULL,
                path VARCHAR(500) NOT NULL,
                status_code INTEGER NOT NULL,
                request_body JSONB,
                response_body JSONB,
                error_message TEXT,
                truncated BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX idx_request_logs_request_id ON request_logs(request_id);
            CREATE INDEX idx_request_logs_api_token_id ON request_logs(api_token_id);
            CREATE INDEX idx_request_logs_status_code ON request_logs(status_code);
            CREATE INDEX idx_request_logs_created_at ON request_logs(created_at);
        "#)
        .down(r#"
            DROP TABLE IF EXISTS request_logs CASCADE;
        "#)
        .tag("logging")
        .build()
}

/// V010: Create endpoint health table.
#[must_use]
pub fn v010_create_endpoint_health() -> Migration {
    Migration::builder(20240101000010, "create_endpoint_health")
        .up(r#"
            -- Durable snapshot of circuit breaker state, refreshed periodically from
            -- the fast counter store for dashboard and admin visibility. The counter
            -- store remains authoritative for the request path.
            CREATE TABLE IF NOT EXISTS endpoint_health (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                endpoint_url VARCHAR(500) NOT NULL UNIQUE,
                status VARCHAR(20) NOT NULL DEFAULT 'healthy',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                open_until TIMESTAMPTZ,
                last_success_at TIMESTAMPTZ,
                last_failure_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TRIGGER update_endpoint_health_updated_at
                BEFORE UPDATE ON endpoint_health
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();

            CREATE INDEX idx_endpoint_health_status ON endpoint_health(status);
        "#)
        .down(r#"
            DROP TRIGGER IF EXISTS update_endpoint_health_updated_at ON endpoint_health;
            DROP TABLE IF EXISTS endpoint_health CASCADE;
        "#)
        .tag("health")
        .build()
}

/// V012: Fold `rate_limit_config` into `dept_budgets`, so a department's budget and
/// rate-limit overrides live in one row behind one `enabled` flag.
#[must_use]
pub fn v012_unify_dept_overrides() -> Migration {
    Migration::builder(20240101000012, "unify_dept_overrides")
        .up(r#"
            ALTER TABLE dept_budgets ADD COLUMN requests_per_minute INTEGER;
            ALTER TABLE dept_budgets ADD COLUMN tokens_per_minute INTEGER;
            ALTER TABLE dept_budgets ADD COLUMN tokens_per_hour INTEGER;
            ALTER TABLE dept_budgets ADD COLUMN tokens_per_day INTEGER;

            UPDATE dept_budgets d SET
                requests_per_minute = r.requests_per_minute,
                tokens_per_minute = r.tokens_per_minute,
                tokens_per_hour = r.tokens_per_hour,
                tokens_per_day = r.tokens_per_day
            FROM rate_limit_config r
            WHERE r.department = d.department;

            INSERT INTO dept_budgets
                (department, requests_per_minute, tokens_per_minute, tokens_per_hour, tokens_per_day, enabled)
            SELECT r.department, r.requests_per_minute, r.tokens_per_minute, r.tokens_per_hour, r.tokens_per_day, r.enabled
            FROM rate_limit_config r
            WHERE NOT EXISTS (SELECT 1 FROM dept_budgets d WHERE d.department = r.department);

            DROP TABLE rate_limit_config CASCADE;
        "#)
        .down(r#"
            CREATE TABLE IF NOT EXISTS rate_limit_config (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                department VARCHAR(100) NOT NULL UNIQUE,
                requests_per_minute INTEGER,
                tokens_per_minute INTEGER,
                tokens_per_hour INTEGER,
                tokens_per_day INTEGER,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            ALTER TABLE dept_budgets DROP COLUMN IF EXISTS requests_per_minute;
            ALTER TABLE dept_budgets DROP COLUMN IF EXISTS tokens_per_minute;
            ALTER TABLE dept_budgets DROP COLUMN IF EXISTS tokens_per_hour;
            ALTER TABLE dept_budgets DROP COLUMN IF EXISTS tokens_per_day;
        "#)
        .tag("core")
        .tag("budgets")
        .tag("rate_limiting")
        .build()
}

/// V011: Add per-user monthly output-token budget.
#[must_use]
pub fn v011_add_user_monthly_budget() -> Migration {
    Migration::builder(20240101000011, "add_user_monthly_budget")
        .up(r#"
            -- Per-user monthly output-token budget, checked alongside the dept and
            -- token scopes. Null inherits, 0 is unlimited.
            ALTER TABLE users ADD COLUMN monthly_budget_tokens BIGINT;
        "#)
        .down(r#"
            ALTER TABLE users DROP COLUMN IF EXISTS monthly_budget_tokens;
        "#)
        .tag("core")
        .tag("budgets")
        .build()
}

/// Get migrations by tag.
#[must_use]
pub fn migrations_by_tag(tag: &str) -> Vec<Migration> {
    all_migrations()
        .into_iter()
        .filter(|m| m.tags.iter().any(|t| t == tag))
        .collect()
}

/// Get core migrations only.
#[must_use]
pub fn core_migrations() -> Vec<Migration> {
    migrations_by_tag("core")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_migrations_ordered() {
        let migrations = all_migrations();
        let mut prev_version = 0;
        for m in &migrations {
            assert!(
                m.version > prev_version,
                "Migrations must be in order: {} should be > {}",
                m.version,
                prev_version
            );
            prev_version = m.version;
        }
    }

    #[test]
    fn test_all_migrations_have_rollback() {
        let migrations = all_migrations();
        for m in &migrations {
            assert!(
                m.supports_rollback(),
                "Migration {} should have rollback SQL",
                m.version
            );
        }
    }

    #[test]
    fn test_migrations_have_valid_checksums() {
        let migrations = all_migrations();
        for m in &migrations {
            assert!(
                m.verify_checksum(),
                "Migration {} has invalid checksum",
                m.version
            );
        }
    }

    #[test]
    fn test_migrations_by_tag() {
        let core = migrations_by_tag("core");
        assert!(!core.is_empty());

        for m in &core {
            assert!(m.tags.contains(&"core".to_string()));
        }
    }

    #[test]
    fn test_migration_versions_unique() {
        let migrations = all_migrations();
        let mut versions = std::collections::HashSet::new();
        for m in &migrations {
            assert!(
                versions.insert(m.version),
                "Duplicate version: {}",
                m.version
            );
        }
    }

    #[test]
    fn test_migration_count() {
        let migrations = all_migrations();
        assert_eq!(migrations.len(), 10, "Expected 10 migrations");
    }
}
