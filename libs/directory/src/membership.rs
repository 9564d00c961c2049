//! Group membership editing.

use dirsam_id::ExtendedDn;
use dirsam_reconcile::{plan_membership, MembershipOp};
use tracing::{debug, info};

use crate::directory::Directory;
use crate::error::DirectoryResult;
use crate::resolve::IdentityReference;
use crate::schema::MemberType;
use crate::store::{DirectoryStore, Entry, Modification};

const MEMBER: &str = "member";

impl<S: DirectoryStore> Directory<S> {
    /// Adds or removes `members` of `group` in one transaction.
    ///
    /// Members are resolved as `member_types` (the defaults when empty)
    /// under `member_base` (the domain when `None`). Returns whether the
    /// group changed; a request already satisfied writes nothing.
    pub fn add_or_remove_members<M: AsRef<str>>(
        &self,
        group: &str,
        members: &[M],
        add: bool,
        member_types: &[MemberType],
        member_base: Option<&ExtendedDn>,
    ) -> DirectoryResult<bool> {
        let op = MembershipOp::from_add_flag(add);
        let base = member_base.cloned().unwrap_or_else(|| self.domain_base());

        self.with_transaction(|dir| {
            let target = dir.resolve_group(group, &[MEMBER])?;

            let candidates = members
                .iter()
                .map(|m| dir.resolve_reference(m.as_ref(), &base, member_types))
                .collect::<DirectoryResult<Vec<_>>>()?;

            let current = target.get(MEMBER).unwrap_or_default();
            let plan = plan_membership(current, &candidates, op);
            if !plan.is_modified() {
                debug!(group = %target.dn(), ?op, "membership already as requested");
                return Ok(false);
            }

            let values = plan.changes.iter().map(|c| c.value.clone());
            let modification = match op {
                MembershipOp::Add => Modification::new(target.guid_reference()).add(MEMBER, values),
                MembershipOp::Remove => {
                    Modification::new(target.guid_reference()).delete(MEMBER, values)
                }
            };
            dir.store().modify(&modification)?;

            info!(group = %target.dn(), ?op, count = plan.changes.len(), "group membership updated");
            Ok(true)
        })
    }

    pub fn add_members<M: AsRef<str>>(&self, group: &str, members: &[M]) -> DirectoryResult<bool> {
        self.add_or_remove_members(group, members, true, &[], None)
    }

    pub fn remove_members<M: AsRef<str>>(&self, group: &str, members: &[M]) -> DirectoryResult<bool> {
        self.add_or_remove_members(group, members, false, &[], None)
    }

    /// True when `candidate` is a member of `group`.
    ///
    /// SID and GUID references are compared as given, so a bare
    /// `<SID=...>` matches a stored member carrying that SID without any
    /// lookup. Names and plain DNs are resolved first.
    pub fn is_member(&self, group: &str, candidate: &str) -> DirectoryResult<bool> {
        let target = self.resolve_group(group, &[MEMBER])?;
        let candidate = match IdentityReference::classify(candidate)? {
            IdentityReference::Sid(sid) => ExtendedDn::from_sid(sid),
            IdentityReference::Guid(guid) => ExtendedDn::from_guid(guid),
            IdentityReference::DistinguishedName(extended) if extended.has_identifiers() => extended,
            _ => self.resolve_reference(candidate, &self.domain_base(), &MemberType::ALL)?,
        };
        Ok(dirsam_reconcile::is_member(
            target.get(MEMBER).unwrap_or_default(),
            &candidate,
        ))
    }

    /// The stored members of `group`, in stored order.
    pub fn list_members(&self, group: &str) -> DirectoryResult<Vec<ExtendedDn>> {
        let target = self.resolve_group(group, &[MEMBER])?;
        member_values(&target)
    }
}

fn member_values(group: &Entry) -> DirectoryResult<Vec<ExtendedDn>> {
    group
        .get(MEMBER)
        .unwrap_or_default()
        .iter()
        .map(|value| ExtendedDn::parse(value).map_err(Into::into))
        .collect()
}
