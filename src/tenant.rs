//! Request-scoped tenant context
//!
//! The host runtime may partition cache keys within a storage by a
//! caller-supplied tenant. The tenant travels as task-local ambient state so
//! it does not thread through every storage call; it scopes the state map
//! and dirty set keys only. Orthogonal to the database tenant selected by
//! `use_tenant_per_storage`.

tokio::task_local! {
    static TENANT_ID: Option<String>;
}

/// Run `fut` with the request tenant set for its duration.
pub async fn with_tenant<F>(tenant: impl Into<String>, fut: F) -> F::Output
where
    F: std::future::Future,
{
    TENANT_ID.scope(Some(tenant.into()), fut).await
}

/// The request tenant currently in scope, if any. Blank values count as
/// absent.
pub fn current_tenant() -> Option<String> {
    TENANT_ID
        .try_with(|t| t.clone())
        .ok()
        .flatten()
        .filter(|t| !t.is_empty())
}
