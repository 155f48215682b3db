//! Monthly-output-token budget enforcement, checked in dept → user → token order.

use crate::error::ApiError;
use chrono::Utc;
use gateway_core::GatewayError;
use gateway_migrations::Repository;
use gateway_resilience::SharedCounterStore;
use uuid::Uuid;

/// One budget scope to check, in the order the caller wants them evaluated.
pub struct BudgetScope<'a> {
    pub kind: &'static str,
    pub id: &'a str,
    pub budget: Option<i64>,
}

/// Checks monthly-output-token budgets for the dept, user, and token scopes.
pub struct BudgetGate {
    repository: std::sync::Arc<Repository>,
    counters: SharedCounterStore,
}

impl BudgetGate {
    /// Construct a gate over the persistent and fast stores.
    #[must_use]
    pub fn new(repository: std::sync::Arc<Repository>, counters: SharedCounterStore) -> Self {
        Self { repository, counters }
    }

    /// Check dept (if enabled), user, then token budgets in order, rejecting on the
    /// first exceeded scope. A `budget` of `None` means no override for that scope and
    /// is skipped; the dept scope is additionally skipped unless its row is enabled.
    ///
    /// # Errors
    /// Returns [`ApiError`] (429, `budget_exceeded`) for the first scope whose used
    /// count has reached its budget.
    pub async fn check(
        &self,
        department: &str,
        user_id: Uuid,
        token_id: Uuid,
        user_budget: Option<i64>,
        token_budget: Option<i64>,
    ) -> Result<(), ApiError> {
        let dept_row = match self.repository.find_dept_budget(department).await {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(department, error = %err, "dept budget lookup failed, skipping check");
                None
            }
        };

        let mut scopes = Vec::new();
        if let Some(dept) = dept_row.filter(|d| d.enabled) {
            scopes.push(BudgetScope { kind: "dept", id: department, budget: dept.monthly_budget_tokens });
        }
        let user_id_str = user_id.to_string();
        scopes.push(BudgetScope { kind: "user", id: &user_id_str, budget: user_budget });
        let token_id_str = token_id.to_string();
        scopes.push(BudgetScope { kind: "token", id: &token_id_str, budget: token_budget });

        for scope in scopes {
            let Some(budget) = scope.budget else { continue };
            if budget == 0 {
                continue;
            }

            let key = month_key(scope.kind, scope.id);
            let used = match self.counters.get(&key).await {
                Ok(Some(value)) => value.parse::<i64>().unwrap_or(0),
                Ok(None) => 0,
                Err(err) => {
                    tracing::warn!(error = %err, scope = scope.kind, "budget counter unavailable, failing open");
                    continue;
                }
            };

            if used >= budget {
                return Err(ApiError::from(GatewayError::BudgetExceeded {
                    scope: scope.kind.to_string(),
                    id: scope.id.to_string(),
                    used: used.max(0) as u64,
                    budget: budget.max(0) as u64,
                }));
            }
        }

        Ok(())
    }
}

fn month_key(kind: &str, id: &str) -> String {
    let month = Utc::now().format("%Y-%m");
    format!("counters:month:{kind}:{id}:{month}")
}
