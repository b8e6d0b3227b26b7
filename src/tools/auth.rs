//! Auth gate - session-scoped access to sensitive tools.
//!
//! The gate holds two injected predicates. `needs_auth` says whether the
//! deployment requires auth at all; `verify_token` checks a presented token.
//! The per-session `authed` flag lives on [`SessionState`] and is only ever
//! set by [`AuthGate::authenticate`].
//!
//! [`SessionState`]: crate::types::SessionState

use crate::types::{CallContext, Error, Result};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type NeedsAuthFn = dyn Fn(&CallContext) -> bool + Send + Sync;
type VerifyTokenFn = dyn Fn(&str, &CallContext) -> bool + Send + Sync;

/// Injected predicate pair deciding access to sensitive tools.
#[derive(Clone)]
pub struct AuthGate {
    needs_auth: Arc<NeedsAuthFn>,
    verify_token: Arc<VerifyTokenFn>,
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

impl AuthGate {
    pub fn new<N, V>(needs_auth: N, verify_token: V) -> Self
    where
        N: Fn(&CallContext) -> bool + Send + Sync + 'static,
        V: Fn(&str, &CallContext) -> bool + Send + Sync + 'static,
    {
        Self {
            needs_auth: Arc::new(needs_auth),
            verify_token: Arc::new(verify_token),
        }
    }

    /// Gate that never requires auth and rejects every token.
    pub fn open() -> Self {
        Self::new(|_| false, |_, _| false)
    }

    /// Standard deployment gate: auth is required iff a secret is configured,
    /// and a token is valid iff it equals the secret.
    pub fn shared_secret(secret: Option<String>) -> Self {
        let secret: Option<Arc<str>> = secret
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Into::into);
        let required = secret.is_some();
        Self::new(
            move |_| required,
            move |token, _| match &secret {
                Some(expected) => {
                    bool::from(token.trim().as_bytes().ct_eq(expected.as_bytes()))
                }
                None => false,
            },
        )
    }

    pub fn needs_auth(&self, ctx: &CallContext) -> bool {
        (self.needs_auth)(ctx)
    }

    /// Fail with `Unauthorized` when the deployment requires auth and the
    /// session has not authenticated. Performs no I/O.
    pub fn check(&self, ctx: &CallContext) -> Result<()> {
        if self.needs_auth(ctx) && !ctx.is_authed() {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    /// Verify `token`; on success mark the session authed. A bad token never
    /// errors and never clears an existing grant.
    ///
    /// Returns whether the token verified.
    pub fn authenticate(&self, token: &str, ctx: &CallContext) -> bool {
        if token.trim().is_empty() || !(self.verify_token)(token, ctx) {
            return false;
        }
        if let Some(session) = &ctx.session {
            session.set_authed(true);
        }
        true
    }
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::open()
    }
}
