//! Dynamic route mounting on the shared listener
//!
//! Axum routers are fixed once the app is built, so tool server endpoints
//! are not merged into the main router. Instead every deployer mounts a
//! self-contained router here, keyed by its path prefix, and the app's
//! fallback looks the prefix up **at request time**. Mounts added or removed
//! after startup take effect on the next request.
//!
//! Each mount records the generation of the instance that owns it, and only
//! that owner can remove it.

use crate::mcp::deployer::TransportError;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

#[derive(Default)]
pub struct MountTable {
    mounts: RwLock<HashMap<String, Mount>>,
}

struct Mount {
    owner: u64,
    router: Router,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `router` to serve `prefix` and everything below it
    ///
    /// The router sees the full request path, so its routes must include
    /// the prefix.
    pub fn mount(&self, prefix: &str, owner: u64, router: Router) -> Result<(), TransportError> {
        let mut mounts = self.mounts.write();
        if mounts.contains_key(prefix) {
            return Err(TransportError::AlreadyMounted(prefix.to_string()));
        }
        mounts.insert(prefix.to_string(), Mount { owner, router });
        tracing::debug!(path = %prefix, owner, "Route mounted");
        Ok(())
    }

    /// Removes the mount at `prefix` if `owner` holds it
    ///
    /// Returns `false` if nothing was mounted there or another owner holds it.
    pub fn unmount(&self, prefix: &str, owner: u64) -> bool {
        let mut mounts = self.mounts.write();
        match mounts.get(prefix) {
            Some(mount) if mount.owner == owner => {
                mounts.remove(prefix);
                tracing::debug!(path = %prefix, owner, "Route unmounted");
                true
            }
            Some(mount) => {
                tracing::debug!(
                    path = %prefix,
                    owner,
                    holder = mount.owner,
                    "Route held by another instance, left mounted"
                );
                false
            }
            None => false,
        }
    }

    pub fn is_mounted(&self, prefix: &str) -> bool {
        self.mounts.read().contains_key(prefix)
    }

    pub fn len(&self) -> usize {
        self.mounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.read().is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.mounts.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Router for the longest mounted prefix covering `path`
    pub fn resolve(&self, path: &str) -> Option<Router> {
        let mounts = self.mounts.read();
        mounts
            .iter()
            .filter(|(prefix, _)| {
                path == prefix.as_str()
                    || (path.starts_with(prefix.as_str())
                        && path.as_bytes().get(prefix.len()) == Some(&b'/'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, mount)| mount.router.clone())
    }
}

/// Fallback handler forwarding to whatever is mounted for the request path
pub async fn dispatch(State(table): State<Arc<MountTable>>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    let Some(router) = table.resolve(&path) else {
        tracing::debug!(path = %path, "No tool server mounted for path");
        return StatusCode::NOT_FOUND.into_response();
    };

    match router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Router that serves everything mounted in `table`
pub fn mounted_routes(table: Arc<MountTable>) -> Router {
    Router::new().fallback(dispatch).with_state(table)
}
