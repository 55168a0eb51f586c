//! # warden-types: Core types for `Warden`
//!
//! This crate contains shared types used across the `Warden` system:
//! - Entity IDs ([`NodeId`], [`UserId`])
//! - Lifecycle state of hierarchy nodes ([`Status`], [`StatusCodes`])
//! - Denormalized ancestor chains ([`AncestorChain`], the `pids` column)
//! - Role permission sets ([`RuleGrant`], the `rules` column)
//!
//! The `pids` and `rules` columns are stored as comma-delimited strings for
//! compatibility with existing tables. They are parsed exactly once at the
//! row boundary and rendered exactly once on write; nothing downstream ever
//! operates on the raw strings.

use std::{
    collections::BTreeSet,
    fmt::{Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

/// Identifier of a rule or role node.
///
/// `0` is reserved for the virtual root: a node whose parent is
/// [`NodeId::ROOT`] sits at the top of its hierarchy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(u64);

impl NodeId {
    /// The virtual root every top-level node hangs off.
    pub const ROOT: NodeId = NodeId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the id as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns whether this is the virtual root.
    pub fn is_root(&self) -> bool {
        self.0 == 0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl FromStr for NodeId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(NodeId)
            .map_err(|_| ParseError::InvalidId {
                token: s.to_string(),
            })
    }
}

/// Identifier of an end user holding role bindings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct UserId(u64);

impl UserId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the id as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<UserId> for u64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

// ============================================================================
// Parse errors
// ============================================================================

/// Errors raised while parsing delimited id columns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A token in an id list is not a non-negative integer.
    #[error("invalid id token {token:?}")]
    InvalidId { token: String },

    /// A stored status code matches neither configured state.
    #[error("unknown status code {0}")]
    UnknownStatus(i64),
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle state of a rule or role node.
///
/// Both transitions are reversible. Enabling requires every ancestor to be
/// [`Status::Effective`]; disabling cascades to every descendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Effective,
    Invalid,
}

impl Status {
    pub fn is_effective(&self) -> bool {
        matches!(self, Status::Effective)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Effective => write!(f, "effective"),
            Status::Invalid => write!(f, "invalid"),
        }
    }
}

/// Stored integer codes of the two [`Status`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodes {
    pub effective: i64,
    pub invalid: i64,
}

impl StatusCodes {
    pub fn new(effective: i64, invalid: i64) -> Self {
        Self { effective, invalid }
    }

    /// Returns the stored code for a status.
    pub fn code(&self, status: Status) -> i64 {
        match status {
            Status::Effective => self.effective,
            Status::Invalid => self.invalid,
        }
    }

    /// Decodes a stored code.
    pub fn status(&self, code: i64) -> Result<Status, ParseError> {
        if code == self.effective {
            Ok(Status::Effective)
        } else if code == self.invalid {
            Ok(Status::Invalid)
        } else {
            Err(ParseError::UnknownStatus(code))
        }
    }
}

impl Default for StatusCodes {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

// ============================================================================
// Ancestor chain (pids)
// ============================================================================

/// Ordered ancestor chain of a node, root-most first.
///
/// Always starts with [`NodeId::ROOT`]. For a node with parent `p`, the chain
/// is the parent's chain with `p` appended, so the stored form of a
/// grandchild of node 3 under root node 1 is `"0,1,3"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AncestorChain(Vec<NodeId>);

impl AncestorChain {
    /// The chain of a top-level node: just the virtual root.
    pub fn root() -> Self {
        Self(vec![NodeId::ROOT])
    }

    /// Parses a stored `pids` value.
    ///
    /// Empty tokens are skipped and a missing leading root is restored, so
    /// `""` and `"3,5"` parse to `"0"` and `"0,3,5"` respectively.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let mut ids = Vec::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            ids.push(token.parse::<NodeId>()?);
        }
        if ids.first() != Some(&NodeId::ROOT) {
            ids.insert(0, NodeId::ROOT);
        }
        Ok(Self(ids))
    }

    /// Returns the chain a direct child of `parent` carries, given that this
    /// is `parent`'s own chain.
    pub fn child_chain(&self, parent: NodeId) -> Self {
        let mut ids = self.0.clone();
        ids.push(parent);
        Self(ids)
    }

    /// Returns whether `id` appears in the chain.
    pub fn contains(&self, id: NodeId) -> bool {
        self.0.contains(&id)
    }

    /// Non-root ancestors, root-most first.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().copied().filter(|id| !id.is_root())
    }

    /// Number of entries including the root.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A chain is never empty; it always contains the root.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for AncestorChain {
    fn default() -> Self {
        Self::root()
    }
}

impl Display for AncestorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for id in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{id}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for AncestorChain {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<AncestorChain> for String {
    fn from(chain: AncestorChain) -> Self {
        chain.to_string()
    }
}

impl TryFrom<String> for AncestorChain {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

// ============================================================================
// Rule grant (rules)
// ============================================================================

/// Permission set held by a role.
///
/// `All` is the admin mark: it bypasses every subset and intersection check.
/// `Ids` is always de-duplicated and sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleGrant {
    All,
    Ids(BTreeSet<NodeId>),
}

impl RuleGrant {
    /// An empty, non-admin grant.
    pub fn none() -> Self {
        RuleGrant::Ids(BTreeSet::new())
    }

    /// Parses a stored `rules` value.
    ///
    /// Any token equal to `admin_mark` makes the whole grant [`RuleGrant::All`].
    ///
    /// # Examples
    ///
    /// ```
    /// # use warden_types::{NodeId, RuleGrant};
    /// let grant = RuleGrant::parse(" 3, 1,,3 ", "*").unwrap();
    /// assert_eq!(grant.to_column("*"), "1,3");
    /// assert!(RuleGrant::parse("1,*", "*").unwrap().is_all());
    /// ```
    pub fn parse(raw: &str, admin_mark: &str) -> Result<Self, ParseError> {
        Self::from_tokens(raw.split(','), admin_mark)
    }

    /// Builds a grant from individual tokens, such as request input.
    pub fn from_tokens<I, T>(tokens: I, admin_mark: &str) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut ids = BTreeSet::new();
        let mut all = false;
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            if token == admin_mark {
                all = true;
                continue;
            }
            ids.insert(token.parse::<NodeId>()?);
        }
        Ok(if all { RuleGrant::All } else { RuleGrant::Ids(ids) })
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RuleGrant::All)
    }

    /// Returns whether `id` is granted.
    pub fn grants(&self, id: NodeId) -> bool {
        match self {
            RuleGrant::All => true,
            RuleGrant::Ids(ids) => ids.contains(&id),
        }
    }

    /// Ids held by `self` that `parent` does not hold.
    ///
    /// Empty when `parent` is [`RuleGrant::All`]. When `self` is `All` and the
    /// parent is not, the excess cannot be enumerated and is reported as
    /// `None`.
    pub fn excess_over(&self, parent: &RuleGrant) -> Option<BTreeSet<NodeId>> {
        match (self, parent) {
            (_, RuleGrant::All) => Some(BTreeSet::new()),
            (RuleGrant::All, RuleGrant::Ids(_)) => None,
            (RuleGrant::Ids(mine), RuleGrant::Ids(theirs)) => {
                Some(mine.difference(theirs).copied().collect())
            }
        }
    }

    /// Returns whether every id in `self` is also in `parent`.
    pub fn is_subset_of(&self, parent: &RuleGrant) -> bool {
        self.excess_over(parent).is_some_and(|excess| excess.is_empty())
    }

    /// Narrows `self` to what `parent` holds. Unchanged when `parent` is `All`.
    pub fn intersect(&self, parent: &RuleGrant) -> RuleGrant {
        match (self, parent) {
            (mine, RuleGrant::All) => mine.clone(),
            (RuleGrant::All, theirs) => theirs.clone(),
            (RuleGrant::Ids(mine), RuleGrant::Ids(theirs)) => {
                RuleGrant::Ids(mine.intersection(theirs).copied().collect())
            }
        }
    }

    /// Merges two grants.
    pub fn union(&self, other: &RuleGrant) -> RuleGrant {
        match (self, other) {
            (RuleGrant::All, _) | (_, RuleGrant::All) => RuleGrant::All,
            (RuleGrant::Ids(a), RuleGrant::Ids(b)) => {
                RuleGrant::Ids(a.union(b).copied().collect())
            }
        }
    }

    /// Granted ids; empty for [`RuleGrant::All`].
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        let ids = match self {
            RuleGrant::All => None,
            RuleGrant::Ids(ids) => Some(ids.iter().copied()),
        };
        ids.into_iter().flatten()
    }

    /// Renders the stored column form.
    pub fn to_column(&self, admin_mark: &str) -> String {
        match self {
            RuleGrant::All => admin_mark.to_string(),
            RuleGrant::Ids(ids) => ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl Display for RuleGrant {
    /// Renders `all` for the admin grant and the sorted id list otherwise.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleGrant::All => f.write_str("all"),
            RuleGrant::Ids(_) => f.write_str(&self.to_column("all")),
        }
    }
}

impl Default for RuleGrant {
    fn default() -> Self {
        Self::none()
    }
}

impl FromIterator<NodeId> for RuleGrant {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        RuleGrant::Ids(iter.into_iter().collect())
    }
}
