//! Single-use approval tokens

use chrono::{DateTime, Utc};
use gatepass_api::{ApprovalToken, Decision};
use gatepass_store::{Store, StoreError, TokenRedemption};
use gatepass_util::{stored_precision, GatepassId, ParentId, TokenId};
use std::sync::Arc;
use tracing::debug;

use crate::{CoreError, CoreResult};

/// Issues, validates and redeems approval tokens
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn Store>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Build a fresh, unpersisted token
    pub fn mint(
        gatepass: &GatepassId,
        parent: &ParentId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ApprovalToken {
        ApprovalToken {
            token: TokenId::new(),
            gatepass: *gatepass,
            parent: *parent,
            created_at: stored_precision(now),
            expires_at: stored_precision(expires_at),
            used: false,
            used_at: None,
            action_taken: None,
        }
    }

    /// Issue the token for a (gatepass, parent) pair.
    ///
    /// A still-valid token for the pair is returned unchanged. A used or
    /// expired one fails with `DuplicateToken`.
    pub fn issue(
        &self,
        gatepass: &GatepassId,
        parent: &ParentId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<ApprovalToken> {
        if let Some(existing) = self.store.find_token(gatepass, parent)? {
            return self.reuse(existing, now);
        }

        let token = Self::mint(gatepass, parent, expires_at, now);
        match self.store.insert_token(&token) {
            Ok(()) => {
                debug!(gatepass_id = %gatepass, parent_id = %parent, "Token issued");
                Ok(token)
            }
            // Lost an insert race for the same pair
            Err(StoreError::Duplicate(_)) => match self.store.find_token(gatepass, parent)? {
                Some(existing) => self.reuse(existing, now),
                None => Err(CoreError::DuplicateToken {
                    gatepass: *gatepass,
                    parent: *parent,
                }),
            },
            Err(e) => Err(e.into()),
        }
    }

    fn reuse(&self, existing: ApprovalToken, now: DateTime<Utc>) -> CoreResult<ApprovalToken> {
        if existing.is_valid(now) {
            Ok(existing)
        } else {
            Err(CoreError::DuplicateToken {
                gatepass: existing.gatepass,
                parent: existing.parent,
            })
        }
    }

    /// Look up a token without validating it
    pub fn inspect(&self, raw: &str) -> CoreResult<ApprovalToken> {
        let id = parse_token(raw)?;
        self.store.get_token(&id)?.ok_or(CoreError::TokenNotFound)
    }

    /// Look up a token and require it to be redeemable at `now`
    pub fn check(&self, raw: &str, now: DateTime<Utc>) -> CoreResult<ApprovalToken> {
        let token = self.inspect(raw)?;

        if token.used {
            return Err(CoreError::TokenAlreadyUsed);
        }
        if token.is_expired(now) {
            return Err(CoreError::TokenExpired);
        }

        Ok(token)
    }

    /// Consume a token on its own, outside a gatepass transition.
    ///
    /// Exactly one of any number of concurrent callers succeeds.
    pub fn redeem(
        &self,
        raw: &str,
        action: Decision,
        now: DateTime<Utc>,
    ) -> CoreResult<ApprovalToken> {
        let now = stored_precision(now);
        let mut token = self.check(raw, now)?;

        let redemption = TokenRedemption {
            token: token.token,
            action,
            at: now,
        };
        match self.store.redeem_token(&redemption) {
            Ok(()) => {}
            Err(StoreError::TokenAlreadyUsed(_)) => return Err(CoreError::TokenAlreadyUsed),
            Err(StoreError::NotFound(_)) => return Err(CoreError::TokenNotFound),
            Err(e) => return Err(e.into()),
        }

        token.used = true;
        token.used_at = Some(now);
        token.action_taken = Some(action);
        Ok(token)
    }
}

/// Token ids arrive as text from callback links. Anything unparseable is
/// reported exactly like an unknown token.
fn parse_token(raw: &str) -> CoreResult<TokenId> {
    raw.trim().parse().map_err(|_| CoreError::TokenNotFound)
}
