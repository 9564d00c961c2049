//! Group membership reconciliation.
//!
//! This library decides whether a principal already belongs to a group and
//! turns a requested add or remove into the minimal set of attribute edits.
//!
//! - **Current state**: the group's stored `member` values, each an extended
//!   DN carrying the member's GUID and, for security principals, its SID.
//! - **Desired state**: the caller's resolved member references.
//! - **Plan**: the `member` values to add or delete so current matches
//!   desired.
//!
//! # Invariants
//!
//! - Identity is decided by SID when both sides carry one, then by GUID,
//!   and only then by the exact extended string, so a member added by name
//!   is found again by SID and vice versa
//! - Plans are idempotent: re-applying a request to its own result yields an
//!   empty plan
//! - A missing `member` attribute is an empty set, never an error

use dirsam_id::ExtendedDn;

/// Direction of a membership edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOp {
    Add,
    Remove,
}

impl MembershipOp {
    /// Maps the boolean "add" flag used by callers.
    #[must_use]
    pub fn from_add_flag(add: bool) -> Self {
        if add {
            Self::Add
        } else {
            Self::Remove
        }
    }
}

/// A single `member` value to add or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub op: MembershipOp,

    /// The attribute value to write. For removals this is the stored value
    /// that matched, not the caller's spelling of it.
    pub value: String,
}

/// The edits needed to apply one membership request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipPlan {
    pub changes: Vec<MembershipChange>,
}

impl MembershipPlan {
    /// True when applying the plan changes the group.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// A stored member value, parsed once.
#[derive(Debug, Clone)]
struct StoredMember<'a> {
    raw: &'a str,
    parsed: Option<ExtendedDn>,
}

impl<'a> StoredMember<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            raw,
            parsed: ExtendedDn::parse(raw).ok(),
        }
    }

    fn matches(&self, candidate: &ExtendedDn) -> bool {
        match &self.parsed {
            Some(member) => same_principal(member, candidate),
            None => self.raw == candidate.to_string(),
        }
    }
}

/// Compares two references to decide whether they name the same principal.
fn same_principal(member: &ExtendedDn, candidate: &ExtendedDn) -> bool {
    if let (Some(a), Some(b)) = (member.sid(), candidate.sid()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (member.guid(), candidate.guid()) {
        return a == b;
    }
    member.to_string() == candidate.to_string()
}

/// Returns the stored member value matching `candidate`, if any.
#[must_use]
pub fn find_member<'a, S: AsRef<str>>(members: &'a [S], candidate: &ExtendedDn) -> Option<&'a str> {
    members
        .iter()
        .map(|m| StoredMember::new(m.as_ref()))
        .find(|m| m.matches(candidate))
        .map(|m| m.raw)
}

/// True when `candidate` is among the group's `members`.
///
/// The candidate's own SID (if its extended form carries one) is the
/// authoritative key; a bare `<SID=...>` reference therefore matches a
/// stored entry that embeds the same SID.
#[must_use]
pub fn is_member<S: AsRef<str>>(members: &[S], candidate: &ExtendedDn) -> bool {
    find_member(members, candidate).is_some()
}

/// Plans the edits for adding or removing `candidates`.
///
/// Candidates repeated within one request (under any identifier form) are
/// planned once.
#[must_use]
pub fn plan_membership<S: AsRef<str>>(
    current: &[S],
    candidates: &[ExtendedDn],
    op: MembershipOp,
) -> MembershipPlan {
    let stored: Vec<StoredMember<'_>> = current.iter().map(|m| StoredMember::new(m.as_ref())).collect();
    let mut plan = MembershipPlan::default();

    match op {
        MembershipOp::Add => {
            let mut pending: Vec<&ExtendedDn> = Vec::new();
            for candidate in candidates {
                let present = stored.iter().any(|m| m.matches(candidate))
                    || pending.iter().any(|p| same_principal(p, candidate));
                if present {
                    continue;
                }
                pending.push(candidate);
                plan.changes.push(MembershipChange {
                    op,
                    value: candidate.to_string(),
                });
            }
        }
        MembershipOp::Remove => {
            let mut removed = vec![false; stored.len()];
            for candidate in candidates {
                let hit = stored
                    .iter()
                    .enumerate()
                    .find(|(i, m)| !removed[*i] && m.matches(candidate));
                if let Some((i, member)) = hit {
                    removed[i] = true;
                    plan.changes.push(MembershipChange {
                        op,
                        value: member.raw.to_string(),
                    });
                }
            }
        }
    }

    plan
}
