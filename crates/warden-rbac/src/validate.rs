//! Request types and their field validation.
//!
//! Requests mirror what a form or JSON body carries: ids as plain integers,
//! status as the stored code, role rules as string tokens. Validation checks
//! shape only and reports every failing field at once. Business rules that
//! need the store (parents, subsets, bindings) are checked by the DAOs.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use warden_config::AuthConfig;
use warden_store::Row;
use warden_types::{NodeId, RuleGrant, Status, StatusCodes, UserId};

use crate::error::{RbacError, Result};

const TITLE_MAX: usize = 50;
const RULE_MAX: usize = 250;
const REMARK_MAX: usize = 250;

/// Field rules derived from the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    admin_mark: String,
    codes: StatusCodes,
}

impl ValidationPolicy {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            admin_mark: config.admin_mark.clone(),
            codes: config.status_codes(),
        }
    }

    pub fn admin_mark(&self) -> &str {
        &self.admin_mark
    }

    /// Decodes a validated status code.
    pub fn status(&self, code: i64) -> Result<Status> {
        self.codes
            .status(code)
            .map_err(|_| RbacError::invalid_field("status", self.status_message()))
    }

    /// Parses validated role rule tokens.
    pub fn grant(&self, tokens: &[String]) -> Result<RuleGrant> {
        RuleGrant::from_tokens(tokens, &self.admin_mark)
            .map_err(|_| RbacError::invalid_field("rules", self.rules_message()))
    }

    fn status_message(&self) -> String {
        format!(
            "status must be {} (effective) or {} (invalid)",
            self.codes.effective, self.codes.invalid
        )
    }

    fn rules_message(&self) -> String {
        format!(
            "rules must be positive integer ids or {:?}",
            self.admin_mark
        )
    }

    fn is_rule_token(&self, token: &str) -> bool {
        let token = token.trim();
        token == self.admin_mark || token.parse::<u64>().is_ok_and(|id| id > 0)
    }
}

/// Collects failing fields.
#[derive(Debug, Default)]
struct Report(BTreeMap<String, String>);

impl Report {
    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| message.into());
    }

    fn id(&mut self, field: &str, value: i64) {
        if value <= 0 {
            self.fail(field, format!("{field} must be a positive integer"));
        }
    }

    fn pid(&mut self, value: i64) {
        if value < 0 {
            self.fail("pid", "pid must be a non-negative integer");
        }
    }

    fn text(&mut self, field: &str, value: &str, required: bool, max: usize) {
        if required && value.trim().is_empty() {
            self.fail(field, format!("{field} is required"));
        } else if value.chars().count() > max {
            self.fail(field, format!("{field} must be at most {max} characters"));
        }
    }

    fn status(&mut self, policy: &ValidationPolicy, code: i64) {
        if policy.codes.status(code).is_err() {
            self.fail("status", policy.status_message());
        }
    }

    fn rules(&mut self, policy: &ValidationPolicy, tokens: &[String]) {
        if !tokens.iter().all(|t| policy.is_rule_token(t)) {
            self.fail("rules", policy.rules_message());
        }
    }

    fn finish(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(RbacError::ValidationFailed(self.0))
        }
    }
}

/// A request whose fields can be checked without touching the store.
pub trait Validate {
    fn validate(&self, policy: &ValidationPolicy) -> Result<()>;
}

/// Accepts rule tokens as JSON strings or numbers.
fn rule_tokens<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Token {
        Int(i64),
        Text(String),
    }

    let tokens = Vec::<Token>::deserialize(deserializer)?;
    Ok(tokens
        .into_iter()
        .map(|t| match t {
            Token::Int(v) => v.to_string(),
            Token::Text(s) => s,
        })
        .collect())
}

pub(crate) fn node_id(value: i64) -> NodeId {
    NodeId::new(u64::try_from(value).unwrap_or_default())
}

pub(crate) fn user_id(value: i64) -> UserId {
    UserId::new(u64::try_from(value).unwrap_or_default())
}

// ============================================================================
// Rules
// ============================================================================

/// Create a permission rule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub pid: i64,
    pub title: String,
    pub rule: String,
    #[serde(default)]
    pub remark: String,
    /// Stored status code; effective when absent.
    #[serde(default)]
    pub status: Option<i64>,
    /// Extra columns written alongside the managed ones.
    #[serde(default)]
    pub ext: Row,
}

impl NewRule {
    pub fn new(title: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rule: rule.into(),
            ..Self::default()
        }
    }

    pub fn under(mut self, pid: impl Into<u64>) -> Self {
        self.pid = pid.into() as i64;
        self
    }

    pub fn with_status(mut self, code: i64) -> Self {
        self.status = Some(code);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }
}

impl Validate for NewRule {
    fn validate(&self, policy: &ValidationPolicy) -> Result<()> {
        let mut report = Report::default();
        report.pid(self.pid);
        report.text("title", &self.title, true, TITLE_MAX);
        report.text("rule", &self.rule, true, RULE_MAX);
        report.text("remark", &self.remark, false, REMARK_MAX);
        if let Some(code) = self.status {
            report.status(policy, code);
        }
        report.finish()
    }
}

/// Replace the editable fields of a permission rule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuleChanges {
    pub id: i64,
    pub pid: i64,
    pub title: String,
    pub rule: String,
    #[serde(default)]
    pub remark: String,
    pub status: i64,
    #[serde(default)]
    pub ext: Row,
}

impl Validate for RuleChanges {
    fn validate(&self, policy: &ValidationPolicy) -> Result<()> {
        let mut report = Report::default();
        report.id("id", self.id);
        report.pid(self.pid);
        report.text("title", &self.title, true, TITLE_MAX);
        report.text("rule", &self.rule, true, RULE_MAX);
        report.text("remark", &self.remark, false, REMARK_MAX);
        report.status(policy, self.status);
        report.finish()
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Create a role.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewRole {
    #[serde(default)]
    pub pid: i64,
    pub title: String,
    /// Rule ids, or the admin mark.
    #[serde(default, deserialize_with = "rule_tokens")]
    pub rules: Vec<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub ext: Row,
}

impl NewRole {
    pub fn new<I, T>(title: impl Into<String>, rules: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Self {
            title: title.into(),
            rules: rules.into_iter().map(|r| r.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn under(mut self, pid: impl Into<u64>) -> Self {
        self.pid = pid.into() as i64;
        self
    }

    pub fn with_status(mut self, code: i64) -> Self {
        self.status = Some(code);
        self
    }
}

impl Validate for NewRole {
    fn validate(&self, policy: &ValidationPolicy) -> Result<()> {
        let mut report = Report::default();
        report.pid(self.pid);
        report.text("title", &self.title, true, TITLE_MAX);
        report.rules(policy, &self.rules);
        if let Some(code) = self.status {
            report.status(policy, code);
        }
        report.finish()
    }
}

/// Replace the editable fields of a role.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RoleChanges {
    pub id: i64,
    pub pid: i64,
    pub title: String,
    #[serde(default, deserialize_with = "rule_tokens")]
    pub rules: Vec<String>,
    pub status: i64,
    #[serde(default)]
    pub ext: Row,
}

impl RoleChanges {
    /// Replaces the rule tokens.
    pub fn with_rules<I, T>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        self.rules = rules.into_iter().map(|r| r.to_string()).collect();
        self
    }
}

impl Validate for RoleChanges {
    fn validate(&self, policy: &ValidationPolicy) -> Result<()> {
        let mut report = Report::default();
        report.id("id", self.id);
        report.pid(self.pid);
        report.text("title", &self.title, true, TITLE_MAX);
        report.rules(policy, &self.rules);
        report.status(policy, self.status);
        report.finish()
    }
}

// ============================================================================
// Access bindings
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BindAccess {
    pub uid: i64,
    pub gid: i64,
    #[serde(default)]
    pub ext: Row,
}

impl BindAccess {
    pub fn new(uid: impl Into<u64>, gid: impl Into<u64>) -> Self {
        Self {
            uid: uid.into() as i64,
            gid: gid.into() as i64,
            ext: Row::new(),
        }
    }
}

impl Validate for BindAccess {
    fn validate(&self, _policy: &ValidationPolicy) -> Result<()> {
        let mut report = Report::default();
        report.id("uid", self.uid);
        report.id("gid", self.gid);
        report.finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct UnbindAccess {
    pub uid: i64,
    pub gid: i64,
}

impl UnbindAccess {
    pub fn new(uid: impl Into<u64>, gid: impl Into<u64>) -> Self {
        Self {
            uid: uid.into() as i64,
            gid: gid.into() as i64,
        }
    }
}

impl Validate for UnbindAccess {
    fn validate(&self, _policy: &ValidationPolicy) -> Result<()> {
        let mut report = Report::default();
        report.id("uid", self.uid);
        report.id("gid", self.gid);
        report.finish()
    }
}

/// Move a user from role `gid` to role `new_gid`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChangeAccess {
    pub uid: i64,
    pub gid: i64,
    pub new_gid: i64,
    #[serde(default)]
    pub ext: Row,
}

impl ChangeAccess {
    pub fn new(uid: impl Into<u64>, gid: impl Into<u64>, new_gid: impl Into<u64>) -> Self {
        Self {
            uid: uid.into() as i64,
            gid: gid.into() as i64,
            new_gid: new_gid.into() as i64,
            ext: Row::new(),
        }
    }
}

impl Validate for ChangeAccess {
    fn validate(&self, _policy: &ValidationPolicy) -> Result<()> {
        let mut report = Report::default();
        report.id("uid", self.uid);
        report.id("gid", self.gid);
        report.id("new_gid", self.new_gid);
        report.finish()
    }
}
