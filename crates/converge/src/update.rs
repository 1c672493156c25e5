//! Conflict-resolving update with a bounded client-side merge loop.

use metrics::counter;
use tracing::{debug, info, warn};

use ferry_core::config::UpdatePolicy;
use ferry_core::{merge, FerryError, StoreError, VersionedObject};
use ferry_kubehub::ClientContext;

/// [`update_with`] using the retry budget from the environment.
pub async fn update(ctx: &ClientContext, obj: &mut VersionedObject) -> Result<(), FerryError> {
    update_with(ctx, obj, UpdatePolicy::from_env()).await
}

/// Push local edits of `obj`.
///
/// Unbound objects are created first; if they already exist the conditional
/// write path takes over. On a version conflict the remote object is re-read
/// and merged (local spec, remote status and token) before the next attempt.
/// Fails with `RetryExhausted` after `policy.max_retries` conflicting writes.
pub async fn update_with(ctx: &ClientContext, obj: &mut VersionedObject, policy: UpdatePolicy) -> Result<(), FerryError> {
    if !obj.is_bound() {
        match ctx.create(obj).await {
            Ok(()) => {
                counter!("update_ok", 1u64);
                info!(target_ref = %obj.reference(), rv = ?obj.version_token(), "created");
                return Ok(());
            }
            Err(FerryError::Store(StoreError::AlreadyExists(msg))) => {
                debug!(target_ref = %obj.reference(), reason = %msg, "exists; updating instead");
            }
            Err(e) => return Err(e),
        }
    }

    let max = policy.max_retries.max(1);
    for attempt in 1..=max {
        match ctx.write_update(obj).await {
            Ok(()) => {
                counter!("update_ok", 1u64);
                info!(target_ref = %obj.reference(), attempt, rv = ?obj.version_token(), "updated");
                return Ok(());
            }
            Err(FerryError::Store(StoreError::VersionConflict(msg))) => {
                counter!("update_conflicts_total", 1u64);
                warn!(target_ref = %obj.reference(), attempt, max, reason = %msg, "resource conflict; applying client-side merge");
                if attempt == max {
                    break;
                }
                let remote = ctx.load(obj.reference()).await?;
                *obj = merge(obj, &remote);
            }
            Err(e) => return Err(e),
        }
    }
    counter!("update_retry_exhausted_total", 1u64);
    Err(FerryError::RetryExhausted { attempts: max })
}
