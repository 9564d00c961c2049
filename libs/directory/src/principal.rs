//! Principal creation, deletion and account maintenance.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use dirsam_id::{Dn, ExtendedDn};
use tracing::{debug, info};

use crate::directory::{already_exists, generalized_time, Directory};
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::{parse_flags, Filter};
use crate::schema::{
    atype, category, group_account_type, group_type_value, int32_attr, uf, GroupKind, GroupScope,
};
use crate::store::{DirectoryStore, Entry, Modification, Scope};

/// Seconds between 1601-01-01 and the Unix epoch.
const NT_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Placeholder written for NIS-enabled accounts; the real hash lives in
/// `unicodePwd`.
const UNIX_PASSWORD_PLACEHOLDER: &str = "ABCD!efgh12345$67890";

/// Initial password for a new account.
#[derive(Clone)]
pub struct InitialPassword {
    pub password: String,
    pub force_change: bool,
}

impl std::fmt::Debug for InitialPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitialPassword")
            .field("password", &"[redacted]")
            .field("force_change", &self.force_change)
            .finish()
    }
}

/// Everything needed to create one principal.
///
/// `attributes` go into the initial add. `secondary` attributes are written
/// by a follow-up modify once the object exists, and `password` is set after
/// that; a failure in either removes the object again.
#[derive(Debug, Clone)]
pub struct PrincipalSpec {
    pub dn: Dn,
    pub object_class: Vec<String>,
    /// Short schema category name, e.g. `Person`.
    pub category: String,
    /// Assign `objectSid` from the domain SID and a freshly allocated RID.
    pub security_principal: bool,
    pub sam_account_name: Option<String>,
    pub attributes: BTreeMap<String, Vec<String>>,
    pub secondary: BTreeMap<String, Vec<String>>,
    pub password: Option<InitialPassword>,
}

impl PrincipalSpec {
    pub fn new(dn: Dn, object_class: &[&str], category: &str) -> Self {
        Self {
            dn,
            object_class: object_class.iter().map(ToString::to_string).collect(),
            category: category.to_string(),
            security_principal: false,
            sam_account_name: None,
            attributes: BTreeMap::new(),
            secondary: BTreeMap::new(),
            password: None,
        }
    }

    /// Sets a single-valued attribute when `value` is present.
    pub fn set(&mut self, name: &str, value: Option<impl Into<String>>) {
        if let Some(value) = value {
            self.attributes.insert(name.to_string(), vec![value.into()]);
        }
    }
}

/// Unix (RFC 2307) attributes written after a user is created.
#[derive(Debug, Clone, Default)]
pub struct UnixAttributes {
    pub uid: Option<String>,
    pub uid_number: Option<u32>,
    pub gid_number: Option<u32>,
    pub gecos: Option<String>,
    pub login_shell: Option<String>,
    pub unix_home: Option<String>,
    pub nis_domain: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    /// `None` leaves the account disabled with no password.
    pub password: Option<String>,
    pub force_password_change: bool,
    /// Name the object after "given initials. surname" instead of the
    /// account name, when those parts are given.
    pub cn_from_names: bool,
    /// Container relative to the domain root. Defaults to `CN=Users`.
    pub ou: Option<Dn>,
    pub surname: Option<String>,
    pub given_name: Option<String>,
    pub initials: Option<String>,
    pub profile_path: Option<String>,
    pub script_path: Option<String>,
    pub home_drive: Option<String>,
    pub home_directory: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
    pub mail: Option<String>,
    pub www_home_page: Option<String>,
    pub telephone_number: Option<String>,
    pub physical_delivery_office: Option<String>,
    pub unix: Option<UnixAttributes>,
    /// Smartcard logon only; no password is set.
    pub smartcard_required: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub ou: Option<Dn>,
    pub scope: GroupScope,
    pub kind: GroupKind,
    pub description: Option<String>,
    pub mail: Option<String>,
    pub notes: Option<String>,
    pub gid_number: Option<u32>,
    pub nis_domain: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewComputer {
    /// Computer name, with or without the trailing `$`.
    pub name: String,
    /// Container relative to the domain root. Defaults to `CN=Computers`.
    pub ou: Option<Dn>,
    pub description: Option<String>,
    /// Enable the account with the lowercased name as its password, for
    /// clients that join with a pre-created account.
    pub prepare_oldjoin: bool,
    pub service_principal_names: Vec<String>,
    /// Record `dNSHostName` as `<name>.<dns domain>`.
    pub dns_host_name: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewContact {
    /// Overrides the name built from the name parts.
    pub full_name: Option<String>,
    /// Container relative to the domain root. Defaults to the root.
    pub ou: Option<Dn>,
    pub surname: Option<String>,
    pub given_name: Option<String>,
    pub initials: Option<String>,
    pub display_name: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
    pub mail: Option<String>,
    pub www_home_page: Option<String>,
    pub telephone_number: Option<String>,
    pub mobile: Option<String>,
    pub physical_delivery_office: Option<String>,
}

/// When an account stops being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountExpiry {
    /// Never expires; the password does not expire either.
    Never,
    /// Expires this long from now.
    After(Duration),
}

/// Joins name parts into a display name: "given initials. surname".
///
/// Parts not given fall back to the values on `old`. Initials gain a
/// trailing `.`. Returns `fallback` when every part is empty.
#[must_use]
pub fn fullname_from_names(
    given_name: Option<&str>,
    initials: Option<&str>,
    surname: Option<&str>,
    old: Option<&Entry>,
    fallback: &str,
) -> String {
    let pick = |value: Option<&str>, attr: &str| -> String {
        value
            .map(str::to_string)
            .or_else(|| old.and_then(|e| e.first(attr)).map(str::to_string))
            .unwrap_or_default()
    };

    let given_name = pick(given_name, "givenName");
    let mut initials = pick(initials, "initials");
    let surname = pick(surname, "sn");
    if !initials.is_empty() && !initials.ends_with('.') {
        initials.push('.');
    }

    let fullname = [given_name, initials, surname]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if fullname.is_empty() {
        fallback.to_string()
    } else {
        fullname
    }
}

/// Adds a change of `name` to `modification` unless it would be a no-op.
///
/// `None` leaves the attribute alone, as does a value equal to the single
/// stored one. An empty value deletes the attribute if present; anything
/// else replaces it.
#[must_use]
pub fn prepare_attr_replace(
    modification: Modification,
    old: &Entry,
    name: &str,
    value: Option<&str>,
) -> Modification {
    let Some(value) = value else {
        return modification;
    };
    if let Some([stored]) = old.get(name) {
        if stored == value {
            return modification;
        }
    }
    if value.is_empty() {
        if old.has(name) {
            return modification.delete(name, Vec::<String>::new());
        }
        return modification;
    }
    modification.replace(name, [value])
}

/// The `unicodePwd` encoding of a password: the quoted password as UTF-16LE,
/// base64 encoded for storage.
#[must_use]
pub fn encode_unicode_pwd(password: &str) -> String {
    let quoted = format!("\"{password}\"");
    let bytes: Vec<u8> = quoted.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

/// 100ns intervals since 1601-01-01, as stored in `accountExpires` and
/// `pwdLastSet`.
#[must_use]
pub fn nt_time(at: DateTime<Utc>) -> u64 {
    let secs = at.timestamp() + NT_EPOCH_OFFSET_SECS;
    if secs < 0 {
        return 0;
    }
    secs as u64 * 10_000_000 + u64::from(at.timestamp_subsec_nanos() / 100)
}

fn with_initials_dot(initials: &str) -> String {
    if initials.ends_with('.') {
        initials.to_string()
    } else {
        format!("{initials}.")
    }
}

impl<S: DirectoryStore> Directory<S> {
    /// Creates a principal in one transaction.
    ///
    /// Once the object has been added, a failure in any later step (the
    /// secondary modify, the password) deletes it again before the error is
    /// returned, so nothing is left behind even on a store without
    /// transactions.
    pub fn create_principal_with_cleanup(&self, spec: PrincipalSpec) -> DirectoryResult<ExtendedDn> {
        self.with_transaction(|dir| dir.create_principal_in_transaction(spec))
    }

    fn create_principal_in_transaction(&self, spec: PrincipalSpec) -> DirectoryResult<ExtendedDn> {
        if let Some(name) = &spec.sam_account_name {
            let taken = self.search(
                &self.domain_base(),
                Scope::Subtree,
                &Filter::equals("sAMAccountName", name.as_str()),
                &[],
            )?;
            if !taken.is_empty() {
                return Err(DirectoryError::AlreadyExists(format!(
                    "account name {name} is already in use"
                )));
            }
        }

        let sid = if spec.security_principal {
            let rid = self.allocate_rid_in_transaction()?;
            Some(self.config().domain_sid.with_rid(rid)?)
        } else {
            None
        };

        let name = spec.dn.rdn_value().unwrap_or_default().to_string();
        let mut entry = Entry::new(spec.dn.clone())
            .with_sid(sid)
            .with_attribute("objectClass", spec.object_class.iter().map(String::as_str))
            .with_attribute(
                "objectCategory",
                [self.well_known().category(&spec.category)?.to_string()],
            )
            .with_attribute("name", [name])
            .with_attribute("whenCreated", [generalized_time()]);
        if let Some(account) = &spec.sam_account_name {
            entry = entry.with_attribute("sAMAccountName", [account.as_str()]);
        }
        for (attr, values) in spec.attributes {
            entry.set(&attr, values);
        }

        let identity = entry.extended_dn();
        let target = entry.guid_reference();
        self.store().add(entry).map_err(already_exists)?;

        self.with_compensating_cleanup(&target, |dir| {
            if !spec.secondary.is_empty() {
                let modification = spec
                    .secondary
                    .iter()
                    .fold(Modification::new(target.clone()), |m, (attr, values)| {
                        m.replace(attr, values.iter().map(String::as_str))
                    });
                dir.store().modify(&modification)?;
            }
            if let Some(initial) = &spec.password {
                let account = dir.read(&target)?;
                dir.write_password(&account, &initial.password, initial.force_change)?;
            }
            Ok(())
        })?;

        info!(dn = %identity.dn(), sid = ?identity.sid(), "principal created");
        Ok(identity)
    }

    pub fn new_user(&self, user: NewUser) -> DirectoryResult<ExtendedDn> {
        if user.username.trim().is_empty() {
            return Err(DirectoryError::InvalidArgument("username cannot be empty".to_string()));
        }

        let display_name = fullname_from_names(
            user.given_name.as_deref(),
            user.initials.as_deref(),
            user.surname.as_deref(),
            None,
            "",
        );
        let cn = if user.cn_from_names && !display_name.is_empty() {
            display_name.clone()
        } else {
            user.username.clone()
        };
        let container = self.container_or(user.ou.as_ref(), &self.well_known().users);

        let mut spec = PrincipalSpec::new(
            container.child("CN", &cn)?,
            &["top", "person", "organizationalPerson", "user"],
            category::PERSON,
        );
        spec.security_principal = true;
        spec.sam_account_name = Some(user.username.clone());
        spec.set(
            "userPrincipalName",
            Some(format!("{}@{}", user.username, self.config().dns_domain)),
        );
        spec.set("sAMAccountType", Some(int32_attr(atype::NORMAL_ACCOUNT)));

        let uac = if user.smartcard_required {
            uf::NORMAL_ACCOUNT | uf::SMARTCARD_REQUIRED
        } else {
            uf::NORMAL_ACCOUNT | uf::ACCOUNTDISABLE | uf::PASSWD_NOTREQD
        };
        spec.set("userAccountControl", Some(int32_attr(uac)));

        if !display_name.is_empty() {
            spec.set("displayName", Some(display_name));
        }
        spec.set("sn", user.surname);
        spec.set("givenName", user.given_name);
        spec.set("initials", user.initials.as_deref().map(with_initials_dot));
        spec.set("profilePath", user.profile_path);
        spec.set("scriptPath", user.script_path);
        spec.set("homeDrive", user.home_drive);
        spec.set("homeDirectory", user.home_directory);
        spec.set("title", user.job_title);
        spec.set("department", user.department);
        spec.set("company", user.company);
        spec.set("description", user.description);
        spec.set("mail", user.mail);
        spec.set("wWWHomePage", user.www_home_page);
        spec.set("telephoneNumber", user.telephone_number);
        spec.set("physicalDeliveryOfficeName", user.physical_delivery_office);

        if let Some(unix) = user.unix {
            let mut put = |attr: &str, value: Option<String>| {
                if let Some(value) = value {
                    spec.secondary.insert(attr.to_string(), vec![value]);
                }
            };
            put("uid", unix.uid);
            put("uidNumber", unix.uid_number.map(|n| n.to_string()));
            put("gidNumber", unix.gid_number.map(|n| n.to_string()));
            put("gecos", unix.gecos);
            put("loginShell", unix.login_shell);
            put("unixHomeDirectory", unix.unix_home);
            if unix.nis_domain.is_some() {
                put("msSFU30Name", Some(user.username.clone()));
                put("unixUserPassword", Some(UNIX_PASSWORD_PLACEHOLDER.to_string()));
            }
            put("msSFU30NisDomain", unix.nis_domain);
        }

        if !user.smartcard_required {
            spec.password = user.password.map(|password| InitialPassword {
                password,
                force_change: user.force_password_change,
            });
        }

        self.create_principal_with_cleanup(spec)
    }

    pub fn new_group(&self, group: NewGroup) -> DirectoryResult<ExtendedDn> {
        if group.name.trim().is_empty() {
            return Err(DirectoryError::InvalidArgument("group name cannot be empty".to_string()));
        }
        let container = self.container_or(group.ou.as_ref(), &self.well_known().users);
        let group_type = group_type_value(group.scope, group.kind);

        let mut spec = PrincipalSpec::new(
            container.child("CN", &group.name)?,
            &["top", "group"],
            category::GROUP,
        );
        spec.security_principal = true;
        spec.sam_account_name = Some(group.name.clone());
        spec.set("groupType", Some(int32_attr(group_type)));
        spec.set("sAMAccountType", Some(int32_attr(group_account_type(group_type))));
        spec.set("description", group.description);
        spec.set("mail", group.mail);
        spec.set("info", group.notes);
        spec.set("gidNumber", group.gid_number.map(|n| n.to_string()));
        if let Some(nis_domain) = group.nis_domain {
            spec.set("msSFU30Name", Some(group.name.clone()));
            spec.set("msSFU30NisDomain", Some(nis_domain));
        }

        self.create_principal_with_cleanup(spec)
    }

    pub fn new_computer(&self, computer: NewComputer) -> DirectoryResult<ExtendedDn> {
        let cn = computer.name.strip_suffix('$').unwrap_or(&computer.name);
        if cn.is_empty() || cn.contains('$') {
            return Err(DirectoryError::InvalidArgument(format!(
                "illegal computer name \"{}\"",
                computer.name
            )));
        }
        let container = self.container_or(computer.ou.as_ref(), &self.well_known().computers);

        let mut spec = PrincipalSpec::new(
            container.child("CN", cn)?,
            &["top", "person", "organizationalPerson", "user", "computer"],
            category::COMPUTER,
        );
        spec.security_principal = true;
        spec.sam_account_name = Some(format!("{cn}$"));
        spec.set("sAMAccountType", Some(int32_attr(atype::WORKSTATION_TRUST)));

        let uac = if computer.prepare_oldjoin {
            uf::WORKSTATION_TRUST_ACCOUNT
        } else {
            uf::WORKSTATION_TRUST_ACCOUNT | uf::ACCOUNTDISABLE
        };
        spec.set("userAccountControl", Some(int32_attr(uac)));
        spec.set("description", computer.description);
        if !computer.service_principal_names.is_empty() {
            spec.attributes.insert(
                "servicePrincipalName".to_string(),
                computer.service_principal_names,
            );
        }
        if computer.dns_host_name {
            spec.set("dNSHostName", Some(format!("{cn}.{}", self.config().dns_domain)));
        }
        if computer.prepare_oldjoin {
            spec.password = Some(InitialPassword {
                password: cn.to_lowercase(),
                force_change: false,
            });
        }

        self.create_principal_with_cleanup(spec)
    }

    /// Creates a contact. Contacts are not security principals and get no
    /// SID or account name.
    pub fn new_contact(&self, contact: NewContact) -> DirectoryResult<ExtendedDn> {
        let cn = match &contact.full_name {
            Some(full_name) => full_name.clone(),
            None => fullname_from_names(
                contact.given_name.as_deref(),
                contact.initials.as_deref(),
                contact.surname.as_deref(),
                None,
                "",
            ),
        };
        if cn.is_empty() {
            return Err(DirectoryError::InvalidArgument(
                "no name for contact specified".to_string(),
            ));
        }
        let container = self.container_or(contact.ou.as_ref(), &self.well_known().domain);

        let mut spec = PrincipalSpec::new(
            container.child("CN", &cn)?,
            &["top", "person", "organizationalPerson", "contact"],
            category::PERSON,
        );
        spec.set("sn", contact.surname);
        spec.set("givenName", contact.given_name);
        spec.set("displayName", contact.display_name);
        spec.set("initials", contact.initials.as_deref().map(with_initials_dot));
        spec.set("title", contact.job_title);
        spec.set("department", contact.department);
        spec.set("company", contact.company);
        spec.set("description", contact.description);
        spec.set("mail", contact.mail);
        spec.set("wWWHomePage", contact.www_home_page);
        spec.set("telephoneNumber", contact.telephone_number);
        spec.set("mobile", contact.mobile);
        spec.set("physicalDeliveryOfficeName", contact.physical_delivery_office);

        self.create_principal_with_cleanup(spec)
    }

    pub fn delete_user(&self, username: &str) -> DirectoryResult<()> {
        self.delete_account(username, category::PERSON, "user")
    }

    pub fn delete_group(&self, group_name: &str) -> DirectoryResult<()> {
        self.delete_account(group_name, category::GROUP, "group")
    }

    fn delete_account(&self, name: &str, object_category: &str, what: &str) -> DirectoryResult<()> {
        let filter = Filter::And(vec![
            Filter::equals("sAMAccountName", name),
            Filter::category(object_category),
        ]);
        self.with_transaction(|dir| {
            let target = dir.find_account(&filter, &[]).map_err(|err| match err {
                DirectoryError::NotFound(_) => {
                    DirectoryError::NotFound(format!("unable to find {what} \"{name}\""))
                }
                other => other,
            })?;
            dir.store().delete(&target.guid_reference())?;
            info!(dn = %target.dn(), "{what} deleted");
            Ok(())
        })
    }

    /// Sets the password of the account matching `filter` and enables it.
    /// With `force_change` the user must change it at next logon.
    pub fn set_password(
        &self,
        filter: &Filter,
        password: &str,
        force_change: bool,
    ) -> DirectoryResult<()> {
        self.with_transaction(|dir| {
            let account = dir.find_account(filter, &["userAccountControl"])?;
            dir.write_password(&account, password, force_change)
        })
    }

    fn write_password(&self, account: &Entry, password: &str, force_change: bool) -> DirectoryResult<()> {
        let pwd_last_set = if force_change {
            "0".to_string()
        } else {
            nt_time(Utc::now()).to_string()
        };
        self.store().modify(
            &Modification::new(account.guid_reference())
                .replace("unicodePwd", [encode_unicode_pwd(password)])
                .replace("pwdLastSet", [pwd_last_set]),
        )?;
        debug!(dn = %account.dn(), force_change, "password set");

        self.toggle_flags(account, uf::ACCOUNTDISABLE | uf::PASSWD_NOTREQD, false)?;
        Ok(())
    }

    pub fn enable_account(&self, filter: &Filter) -> DirectoryResult<bool> {
        self.toggle_account_flags(filter, uf::ACCOUNTDISABLE | uf::PASSWD_NOTREQD, false)
    }

    pub fn disable_account(&self, filter: &Filter) -> DirectoryResult<bool> {
        self.toggle_account_flags(filter, uf::ACCOUNTDISABLE, true)
    }

    /// Sets (`on`) or clears `flags` in the account's `userAccountControl`.
    /// Returns whether anything changed.
    pub fn toggle_account_flags(&self, filter: &Filter, flags: u32, on: bool) -> DirectoryResult<bool> {
        self.with_transaction(|dir| {
            let account = dir.find_account(filter, &["userAccountControl"])?;
            dir.toggle_flags(&account, flags, on)
        })
    }

    fn toggle_flags(&self, account: &Entry, flags: u32, on: bool) -> DirectoryResult<bool> {
        let (stored, old) = account_control(account)?;
        let new = if on { old | flags } else { old & !flags };
        if new == old {
            return Ok(false);
        }

        // Deleting the exact old value fails if someone changed it meanwhile.
        self.store().modify(
            &Modification::new(account.guid_reference())
                .delete("userAccountControl", [stored])
                .add("userAccountControl", [int32_attr(new)]),
        )?;
        debug!(dn = %account.dn(), old, new, "account flags updated");
        Ok(true)
    }

    pub fn force_password_change(&self, filter: &Filter) -> DirectoryResult<()> {
        self.replace_on_account(filter, "pwdLastSet", "0")
    }

    /// Clears a lockout.
    pub fn unlock_account(&self, filter: &Filter) -> DirectoryResult<()> {
        self.replace_on_account(filter, "lockoutTime", "0")
    }

    fn replace_on_account(&self, filter: &Filter, attr: &str, value: &str) -> DirectoryResult<()> {
        self.with_transaction(|dir| {
            let account = dir.find_account(filter, &[])?;
            dir.store()
                .modify(&Modification::new(account.guid_reference()).replace(attr, [value]))?;
            Ok(())
        })
    }

    pub fn set_expiry(&self, filter: &Filter, expiry: AccountExpiry) -> DirectoryResult<()> {
        let (account_expires, dont_expire) = match expiry {
            AccountExpiry::Never => (0, true),
            AccountExpiry::After(after) => {
                let at = Utc::now().checked_add_signed(after).ok_or_else(|| {
                    DirectoryError::InvalidArgument(format!("expiry out of range: {after}"))
                })?;
                (nt_time(at), false)
            }
        };

        self.with_transaction(|dir| {
            let account = dir.find_account(filter, &["userAccountControl", "accountExpires"])?;
            let (_, uac) = account_control(&account)?;
            let uac = if dont_expire {
                uac | uf::DONT_EXPIRE_PASSWD
            } else {
                uac & !uf::DONT_EXPIRE_PASSWD
            };
            dir.store().modify(
                &Modification::new(account.guid_reference())
                    .replace("userAccountControl", [int32_attr(uac)])
                    .replace("accountExpires", [account_expires.to_string()]),
            )?;
            Ok(())
        })
    }

    fn container_or(&self, ou: Option<&Dn>, default: &Dn) -> Dn {
        match ou {
            Some(ou) => ou.qualified_under(&self.well_known().domain),
            None => default.clone(),
        }
    }
}

fn account_control(account: &Entry) -> DirectoryResult<(String, u32)> {
    let stored = account.first("userAccountControl").ok_or_else(|| {
        DirectoryError::InvalidArgument(format!("{} has no userAccountControl", account.dn()))
    })?;
    let flags = parse_flags(stored).ok_or_else(|| {
        DirectoryError::InvalidArgument(format!(
            "{} has a malformed userAccountControl: {stored}",
            account.dn()
        ))
    })?;
    Ok((stored.to_string(), flags))
}
