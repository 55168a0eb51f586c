//! The authorization engine.
//!
//! One engine owns one configuration and one store. It hands out the three
//! DAOs and answers permission checks:
//!
//! 1. collect the grants of every effective role bound to the user,
//! 2. short-circuit to the admin mark if any grant is the admin grant,
//! 3. otherwise resolve the granted ids to effective, lower-cased rule
//!    strings and compare them with the request under ANY or ALL semantics.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;
use warden_config::AuthConfig;
use warden_store::Store;
use warden_types::{RuleGrant, UserId};

use crate::access::AccessStore;
use crate::audit::{AuditEvent, AuditKind, AuditSink, TracingAuditSink};
use crate::context::DaoContext;
use crate::error::{RbacError, Result};
use crate::node::RuleNode;
use crate::role::RoleStore;
use crate::rule::RuleStore;

// ============================================================================
// Check inputs
// ============================================================================

/// One permission string or several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleQuery {
    One(String),
    Many(Vec<String>),
}

impl RuleQuery {
    /// Requested strings, lower-cased.
    pub fn normalized(&self) -> Vec<String> {
        match self {
            RuleQuery::One(rule) => vec![rule.to_lowercase()],
            RuleQuery::Many(rules) => rules.iter().map(|r| r.to_lowercase()).collect(),
        }
    }
}

impl From<&str> for RuleQuery {
    fn from(rule: &str) -> Self {
        RuleQuery::One(rule.to_string())
    }
}

impl From<String> for RuleQuery {
    fn from(rule: String) -> Self {
        RuleQuery::One(rule)
    }
}

impl From<Vec<String>> for RuleQuery {
    fn from(rules: Vec<String>) -> Self {
        RuleQuery::Many(rules)
    }
}

impl From<&[&str]> for RuleQuery {
    fn from(rules: &[&str]) -> Self {
        RuleQuery::Many(rules.iter().map(ToString::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RuleQuery {
    fn from(rules: [&str; N]) -> Self {
        RuleQuery::Many(rules.iter().map(ToString::to_string).collect())
    }
}

impl From<Vec<&str>> for RuleQuery {
    fn from(rules: Vec<&str>) -> Self {
        RuleQuery::Many(rules.into_iter().map(ToString::to_string).collect())
    }
}

impl TryFrom<serde_json::Value> for RuleQuery {
    type Error = RbacError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;

        match value {
            Json::String(rule) => Ok(RuleQuery::One(rule)),
            Json::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Json::String(rule) => Ok(rule),
                    other => Err(RbacError::UnsupportedRuleType(format!(
                        "array element {}",
                        json_kind(&other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(RuleQuery::Many),
            other => Err(RbacError::UnsupportedRuleType(json_kind(&other).to_string())),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// How several requested permissions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relation {
    /// At least one must be held.
    #[default]
    Any,
    /// Every one must be held.
    All,
}

impl From<bool> for Relation {
    /// `true` selects ANY, `false` selects ALL.
    fn from(any: bool) -> Self {
        if any { Relation::Any } else { Relation::All }
    }
}

impl From<Relation> for bool {
    fn from(relation: Relation) -> Self {
        matches!(relation, Relation::Any)
    }
}

// ============================================================================
// DAO dispatch
// ============================================================================

/// The three DAOs an engine serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaoKind {
    Rule,
    Role,
    Access,
}

impl FromStr for DaoKind {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rule" => Ok(DaoKind::Rule),
            "role" => Ok(DaoKind::Role),
            "access" => Ok(DaoKind::Access),
            _ => Err(RbacError::ModelNotFound(s.to_string())),
        }
    }
}

/// A DAO selected by [`DaoKind`].
#[derive(Clone, Copy)]
pub enum Dao<'a> {
    Rule(&'a RuleStore),
    Role(&'a RoleStore),
    Access(&'a AccessStore),
}

// ============================================================================
// Engine
// ============================================================================

/// Builder for [`AuthorizationEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<AuthConfig>,
    store: Option<Arc<dyn Store>>,
    sink: Option<Arc<dyn AuditSink>>,
}

impl EngineBuilder {
    /// Configuration; defaults apply when omitted.
    pub fn config(mut self, config: AuthConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Backing store.
    pub fn store<S: Store + 'static>(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// Destination of audit events; [`TracingAuditSink`] when omitted.
    pub fn audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> Result<AuthorizationEngine> {
        let store = self
            .store
            .ok_or_else(|| RbacError::NotInitialized("no store configured".to_string()))?;
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| RbacError::invalid_field("config", e.to_string()))?;

        let ctx = DaoContext::new(Arc::new(config), store);
        let rules = RuleStore::new(ctx.clone());
        let roles = RoleStore::new(ctx.clone());
        let access = AccessStore::new(ctx.clone(), roles.clone());
        Ok(AuthorizationEngine {
            ctx,
            rules,
            roles,
            access,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingAuditSink)),
        })
    }
}

/// Resolves effective permissions and answers checks.
pub struct AuthorizationEngine {
    ctx: DaoContext,
    rules: RuleStore,
    roles: RoleStore,
    access: AccessStore,
    sink: Arc<dyn AuditSink>,
}

impl fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}

impl AuthorizationEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// An engine with `config` over `store`, auditing through `tracing`.
    pub fn new<S: Store + 'static>(config: AuthConfig, store: Arc<S>) -> Result<Self> {
        Self::builder().config(config).store(store).build()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.ctx.config
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    pub fn access(&self) -> &AccessStore {
        &self.access
    }

    pub fn dao(&self, kind: DaoKind) -> Dao<'_> {
        match kind {
            DaoKind::Rule => Dao::Rule(&self.rules),
            DaoKind::Role => Dao::Role(&self.roles),
            DaoKind::Access => Dao::Access(&self.access),
        }
    }

    /// Looks a DAO up by name (`"rule"`, `"role"` or `"access"`).
    pub fn dao_named(&self, name: &str) -> Result<Dao<'_>> {
        Ok(self.dao(name.parse()?))
    }

    /// Union of the grants of every effective role bound to `uid`.
    pub fn effective_rule_ids(&self, uid: UserId) -> Result<RuleGrant> {
        let mut grant = RuleGrant::none();
        for role in self.access.user_roles(uid)? {
            if role.rules.is_all() {
                return Ok(RuleGrant::All);
            }
            grant = grant.union(&role.rules);
        }
        Ok(grant)
    }

    /// Lower-cased permission strings `uid` holds; just the admin mark for
    /// admins.
    pub fn effective_rule_strings(&self, uid: UserId) -> Result<BTreeSet<String>> {
        let ids = match self.effective_rule_ids(uid)? {
            RuleGrant::All => return Ok(BTreeSet::from([self.ctx.config.admin_mark.clone()])),
            RuleGrant::Ids(ids) => ids,
        };
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(self
            .rules
            .effective_by_ids(Some(&ids))?
            .into_iter()
            .map(|rule| rule.rule.to_lowercase())
            .collect())
    }

    /// The effective rules behind `uid`'s grants; every effective rule for
    /// admins.
    pub fn user_rules(&self, uid: UserId) -> Result<Vec<RuleNode>> {
        let mut rules = match self.effective_rule_ids(uid)? {
            RuleGrant::All => self.rules.effective_by_ids(None)?,
            RuleGrant::Ids(ids) if ids.is_empty() => Vec::new(),
            RuleGrant::Ids(ids) => self.rules.effective_by_ids(Some(&ids))?,
        };
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    /// Decides whether `uid` holds `rules`.
    ///
    /// Strings compare case-insensitively. Under [`Relation::Any`] one match
    /// suffices; under [`Relation::All`] every requested string must match,
    /// so an empty request is granted. The admin mark grants everything.
    pub fn check(
        &self,
        rules: impl Into<RuleQuery>,
        uid: impl Into<UserId>,
        relation: impl Into<Relation>,
    ) -> Result<bool> {
        let requested = rules.into().normalized();
        let uid = uid.into();
        let relation = relation.into();
        let effective = self.effective_rule_strings(uid)?;

        let (kind, auth) = decide(&requested, &effective, relation, &self.ctx.config.admin_mark);
        debug!(uid = %uid, kind = %kind, "Checked permission");
        if self.ctx.config.audit {
            self.sink.record(&AuditEvent {
                kind,
                uid,
                rules: requested,
                auth,
                relation: relation.into(),
            });
        }
        Ok(kind.granted())
    }

    /// [`check`](Self::check) over untyped input such as a decoded request
    /// body.
    pub fn check_json(
        &self,
        rules: serde_json::Value,
        uid: impl Into<UserId>,
        relation: impl Into<Relation>,
    ) -> Result<bool> {
        self.check(RuleQuery::try_from(rules)?, uid, relation)
    }
}

/// Pure decision over normalised inputs.
fn decide(
    requested: &[String],
    effective: &BTreeSet<String>,
    relation: Relation,
    admin_mark: &str,
) -> (AuditKind, BTreeSet<String>) {
    if effective.contains(admin_mark) {
        return (AuditKind::Admin, BTreeSet::from([admin_mark.to_string()]));
    }

    let matched: BTreeSet<String> = requested
        .iter()
        .filter(|r| effective.contains(*r))
        .cloned()
        .collect();
    let missing: BTreeSet<String> = requested
        .iter()
        .filter(|r| !matched.contains(*r))
        .cloned()
        .collect();

    match relation {
        Relation::Any if !matched.is_empty() => (AuditKind::Check, matched),
        Relation::All if missing.is_empty() => (AuditKind::Diff, missing),
        _ => (AuditKind::Failed, missing),
    }
}
