//! User-role binding DAO.
//!
//! Every mutation touches a single row, so none needs a transaction; they are
//! still serialised with the hierarchy mutations of the same engine so the
//! existence checks cannot race each other.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};
use warden_store::{Filter, Row, Store, Value};
use warden_types::{NodeId, UserId};

use crate::context::DaoContext;
use crate::error::{RbacError, Result};
use crate::node::{AccessBinding, RoleNode};
use crate::role::RoleStore;
use crate::validate::{BindAccess, ChangeAccess, UnbindAccess, Validate, node_id, user_id};

/// Reads and writes the access table.
#[derive(Clone)]
pub struct AccessStore {
    ctx: DaoContext,
    roles: RoleStore,
}

impl AccessStore {
    pub(crate) fn new(ctx: DaoContext, roles: RoleStore) -> Self {
        Self { ctx, roles }
    }

    fn table(&self) -> &str {
        &self.ctx.config.access_table
    }

    fn pair(uid: UserId, gid: NodeId) -> Filter {
        Filter::new().eq("uid", uid.as_u64()).eq("gid", gid.as_u64())
    }

    fn exists(&self, store: &dyn Store, uid: UserId, gid: NodeId) -> Result<bool> {
        Ok(store.find_one(self.table(), &Self::pair(uid, gid))?.is_some())
    }

    /// Every binding of `uid`.
    pub fn bindings_for_user(&self, uid: UserId) -> Result<Vec<AccessBinding>> {
        let rows = self.ctx.store.find_all(
            self.table(),
            &Filter::new().eq("uid", uid.as_u64()),
            &["uid", "gid"],
        )?;
        rows.iter()
            .map(|row| AccessBinding::from_row(row, &self.ctx.config))
            .collect()
    }

    /// Users bound to role `gid`.
    pub fn users_in_role(&self, gid: NodeId) -> Result<BTreeSet<UserId>> {
        let rows = self.ctx.store.find_all(
            self.table(),
            &Filter::new().eq("gid", gid.as_u64()),
            &["uid", "gid"],
        )?;
        rows.iter()
            .map(|row| AccessBinding::from_row(row, &self.ctx.config).map(|b| b.uid))
            .collect()
    }

    /// Effective roles bound to `uid`.
    pub fn user_roles(&self, uid: UserId) -> Result<Vec<RoleNode>> {
        let gids: BTreeSet<NodeId> = self
            .bindings_for_user(uid)?
            .into_iter()
            .map(|b| b.gid)
            .collect();
        if gids.is_empty() {
            return Ok(Vec::new());
        }
        let roles = self.roles.effective_by_ids(&gids)?;
        debug!(uid = %uid, bound = gids.len(), effective = roles.len(), "Resolved user roles");
        Ok(roles)
    }

    /// Grants role `gid` to user `uid`.
    pub fn bind(&self, request: BindAccess) -> Result<()> {
        request.validate(&self.ctx.policy)?;
        let uid = user_id(request.uid);
        let gid = node_id(request.gid);

        self.ctx.serialized(|store| {
            if self.exists(store, uid, gid)? {
                warn!(uid = %uid, gid = %gid, "Rejected duplicate binding");
                return Err(RbacError::DuplicateBinding { uid, gid });
            }
            let managed = Row::from([
                ("uid".to_string(), Value::from(uid.as_u64())),
                ("gid".to_string(), Value::from(gid.as_u64())),
            ]);
            let row = self.ctx.row_for_insert(request.ext.clone(), managed);
            store.insert(self.table(), row)?;
            info!(uid = %uid, gid = %gid, "Role bound");
            Ok(())
        })
    }

    /// Revokes role `gid` from user `uid`.
    pub fn unbind(&self, request: UnbindAccess) -> Result<()> {
        request.validate(&self.ctx.policy)?;
        let uid = user_id(request.uid);
        let gid = node_id(request.gid);

        self.ctx.serialized(|store| {
            if !self.exists(store, uid, gid)? {
                return Err(RbacError::BindingNotFound { uid, gid });
            }
            store.delete(self.table(), &Self::pair(uid, gid), Some(1))?;
            info!(uid = %uid, gid = %gid, "Role unbound");
            Ok(())
        })
    }

    /// Moves user `uid` from role `gid` to `new_gid`.
    pub fn modify(&self, request: ChangeAccess) -> Result<()> {
        request.validate(&self.ctx.policy)?;
        let uid = user_id(request.uid);
        let gid = node_id(request.gid);
        let new_gid = node_id(request.new_gid);
        if gid == new_gid {
            return Err(RbacError::NoOpChange(format!(
                "user {uid} is already bound to role {gid}"
            )));
        }

        self.ctx.serialized(|store| {
            if !self.exists(store, uid, gid)? {
                return Err(RbacError::BindingNotFound { uid, gid });
            }
            if self.exists(store, uid, new_gid)? {
                warn!(uid = %uid, gid = %new_gid, "Rejected duplicate binding");
                return Err(RbacError::DuplicateBinding { uid, gid: new_gid });
            }
            let managed = Row::from([
                ("uid".to_string(), Value::from(uid.as_u64())),
                ("gid".to_string(), Value::from(new_gid.as_u64())),
            ]);
            let row = self.ctx.row_for_update(request.ext.clone(), managed);
            store.update(self.table(), &Self::pair(uid, gid), &row)?;
            info!(uid = %uid, from = %gid, to = %new_gid, "Role binding moved");
            Ok(())
        })
    }
}
