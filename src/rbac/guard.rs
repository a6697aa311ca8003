//! Per-route enforcement layers.
//!
//! Each layer wraps a downstream handler and short-circuits with 401 when no
//! principal is attached to the request, or 403 when the principal does not
//! satisfy the requirement. The principal is read through its typed extension,
//! never a raw map.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use super::{Principal, ROLE_ID_ADMIN, ROLE_ID_SUPER_ADMIN};

#[derive(Clone, Debug)]
enum Requirement {
    Permission(&'static str),
    AnyPermission(&'static [&'static str]),
    AllPermissions(&'static [&'static str]),
    Role(i64),
    AnyRole(&'static [i64]),
    /// The trailing numeric path segment must equal the principal's own id,
    /// or the principal must hold the Admin or Super Admin role.
    AdminOrOwner,
}

/// Layer enforcing a role/permission requirement on the wrapped route.
#[derive(Clone, Debug)]
pub struct RequireLayer {
    requirement: Requirement,
}

#[must_use]
pub fn permission(required: &'static str) -> RequireLayer {
    RequireLayer {
        requirement: Requirement::Permission(required),
    }
}

#[must_use]
pub fn any_permission(required: &'static [&'static str]) -> RequireLayer {
    RequireLayer {
        requirement: Requirement::AnyPermission(required),
    }
}

#[must_use]
pub fn all_permissions(required: &'static [&'static str]) -> RequireLayer {
    RequireLayer {
        requirement: Requirement::AllPermissions(required),
    }
}

#[must_use]
pub fn role(role_id: i64) -> RequireLayer {
    RequireLayer {
        requirement: Requirement::Role(role_id),
    }
}

#[must_use]
pub fn any_role(role_ids: &'static [i64]) -> RequireLayer {
    RequireLayer {
        requirement: Requirement::AnyRole(role_ids),
    }
}

#[must_use]
pub fn admin_or_owner() -> RequireLayer {
    RequireLayer {
        requirement: Requirement::AdminOrOwner,
    }
}

impl<S> Layer<S> for RequireLayer {
    type Service = Require<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Require {
            inner,
            requirement: self.requirement.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Require<S> {
    inner: S,
    requirement: Requirement,
}

impl<S> Service<Request<Body>> for Require<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Swap with the ready clone so readiness is not lost.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let requirement = self.requirement.clone();

        Box::pin(async move {
            let Some(principal) = req.extensions().get::<Principal>() else {
                return Ok(StatusCode::UNAUTHORIZED.into_response());
            };
            if satisfied(principal, &requirement, req.uri().path()) {
                inner.call(req).await
            } else {
                Ok(StatusCode::FORBIDDEN.into_response())
            }
        })
    }
}

fn satisfied(principal: &Principal, requirement: &Requirement, path: &str) -> bool {
    match requirement {
        Requirement::Permission(required) => principal.has_permission(required),
        Requirement::AnyPermission(required) => principal.has_any_permission(required),
        Requirement::AllPermissions(required) => principal.has_all_permissions(required),
        Requirement::Role(role_id) => principal.has_role(*role_id),
        Requirement::AnyRole(role_ids) => role_ids.iter().any(|id| principal.has_role(*id)),
        Requirement::AdminOrOwner => {
            let is_owner = trailing_id(path) == Some(principal.user_id);
            is_owner
                || principal.has_role(ROLE_ID_ADMIN)
                || principal.has_role(ROLE_ID_SUPER_ADMIN)
        }
    }
}

/// Parse the trailing path segment as a numeric identifier.
fn trailing_id(path: &str) -> Option<i64> {
    path.rsplit('/').find(|s| !s.is_empty())?.parse().ok()
}
