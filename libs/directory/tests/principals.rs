//! Integration tests for principal creation and account maintenance.

mod common;

use chrono::{Duration, Utc};
use common::{account, config, find_accounts, group, provisioned, read, user, RejectingStore};
use dirsam_directory::principal::nt_time;
use dirsam_directory::schema::uf;
use dirsam_directory::{
    AccountExpiry, DirectoryError, GroupKind, GroupScope, MemoryStore, NewComputer, NewContact,
    NewGroup, NewUser, UnixAttributes,
};
use dirsam_id::{Dn, Rid, Sid};
use dirsam_ridalloc::FIRST_ALLOCATABLE_RID;

fn uac(entry: &dirsam_directory::Entry) -> u32 {
    entry.first("userAccountControl").unwrap().parse::<i32>().unwrap() as u32
}

#[test]
fn test_new_user_defaults() {
    let dir = provisioned(MemoryStore::new(), config());
    let alice = dir.new_user(user("alice")).unwrap();

    let domain_sid = Sid::parse(common::DOMAIN_SID).unwrap();
    assert_eq!(
        alice.sid().unwrap(),
        &domain_sid.with_rid(Rid::new(FIRST_ALLOCATABLE_RID)).unwrap()
    );
    assert_eq!(alice.dn().to_string(), "CN=alice,CN=Users,DC=example,DC=com");

    let entry = read(&dir, &alice);
    assert_eq!(entry.first("sAMAccountName"), Some("alice"));
    assert_eq!(entry.first("userPrincipalName"), Some("alice@example.com"));
    assert_eq!(entry.first("sAMAccountType"), Some("805306368"));
    assert!(entry.has("unicodePwd"));
    // Setting the password enabled the account.
    assert_eq!(uac(&entry), uf::NORMAL_ACCOUNT);
    assert_ne!(entry.first("pwdLastSet"), Some("0"));
}

#[test]
fn test_user_without_password_stays_disabled() {
    let dir = provisioned(MemoryStore::new(), config());
    let bob = dir
        .new_user(NewUser {
            password: None,
            ..user("bob")
        })
        .unwrap();

    let entry = read(&dir, &bob);
    assert!(!entry.has("unicodePwd"));
    assert_eq!(
        uac(&entry),
        uf::NORMAL_ACCOUNT | uf::ACCOUNTDISABLE | uf::PASSWD_NOTREQD
    );
}

#[test]
fn test_user_name_parts() {
    let dir = provisioned(MemoryStore::new(), config());
    let jq = dir
        .new_user(NewUser {
            given_name: Some("John".to_string()),
            initials: Some("Q".to_string()),
            surname: Some("Public".to_string()),
            cn_from_names: true,
            force_password_change: true,
            ..user("jqpublic")
        })
        .unwrap();

    assert_eq!(jq.dn().rdn_value(), Some("John Q. Public"));
    let entry = read(&dir, &jq);
    assert_eq!(entry.first("displayName"), Some("John Q. Public"));
    assert_eq!(entry.first("initials"), Some("Q."));
    assert_eq!(entry.first("pwdLastSet"), Some("0"));
}

#[test]
fn test_smartcard_user_gets_no_password() {
    let dir = provisioned(MemoryStore::new(), config());
    let sc = dir
        .new_user(NewUser {
            smartcard_required: true,
            ..user("sc")
        })
        .unwrap();

    let entry = read(&dir, &sc);
    assert!(!entry.has("unicodePwd"));
    assert_eq!(uac(&entry), uf::NORMAL_ACCOUNT | uf::SMARTCARD_REQUIRED);
}

#[test]
fn test_unix_attributes_written() {
    let dir = provisioned(MemoryStore::new(), config());
    let tux = dir
        .new_user(NewUser {
            unix: Some(UnixAttributes {
                uid_number: Some(10_000),
                gid_number: Some(100),
                login_shell: Some("/bin/bash".to_string()),
                nis_domain: Some("example".to_string()),
                ..Default::default()
            }),
            ..user("tux")
        })
        .unwrap();

    let entry = read(&dir, &tux);
    assert_eq!(entry.first("uidNumber"), Some("10000"));
    assert_eq!(entry.first("loginShell"), Some("/bin/bash"));
    assert_eq!(entry.first("msSFU30Name"), Some("tux"));
    assert_eq!(entry.first("msSFU30NisDomain"), Some("example"));
}

#[test]
fn test_duplicate_account_name_consumes_no_rid() {
    let dir = provisioned(MemoryStore::new(), config());
    dir.new_user(user("alice")).unwrap();
    let next = dir.next_free_rid().unwrap();

    let err = dir
        .new_user(NewUser {
            ou: Some(Dn::parse("CN=Computers").unwrap()),
            ..user("alice")
        })
        .unwrap_err();
    assert!(matches!(err, DirectoryError::AlreadyExists(_)));
    assert_eq!(dir.next_free_rid().unwrap(), next);
    assert_eq!(find_accounts(&dir, "alice").len(), 1);
}

#[test]
fn test_password_failure_leaves_no_trace() {
    for store in [MemoryStore::new(), MemoryStore::without_transactions()] {
        let dir = provisioned(
            RejectingStore {
                inner: store,
                rejected_attribute: "unicodePwd",
            },
            config(),
        );

        let err = dir.new_user(user("mallory")).unwrap_err();
        assert!(matches!(err, DirectoryError::Store(_)), "unexpected error: {err}");
        assert!(find_accounts(&dir, "mallory").is_empty());

        // The handle is usable afterwards.
        dir.new_user(NewUser {
            password: None,
            ..user("trent")
        })
        .unwrap();
    }
}

#[test]
fn test_secondary_write_failure_leaves_no_trace() {
    let dir = provisioned(
        RejectingStore {
            inner: MemoryStore::without_transactions(),
            rejected_attribute: "loginShell",
        },
        config(),
    );

    dir.new_user(NewUser {
        unix: Some(UnixAttributes {
            login_shell: Some("/bin/false".to_string()),
            ..Default::default()
        }),
        ..user("eve")
    })
    .unwrap_err();
    assert!(find_accounts(&dir, "eve").is_empty());
}

#[test]
fn test_new_group_types() {
    let dir = provisioned(MemoryStore::new(), config());

    let staff = dir.new_group(group("staff")).unwrap();
    let entry = read(&dir, &staff);
    assert_eq!(entry.first("groupType"), Some("-2147483646"));
    assert_eq!(entry.first("sAMAccountType"), Some("268435456"));
    assert!(staff.sid().is_some());

    let list = dir
        .new_group(NewGroup {
            scope: GroupScope::DomainLocal,
            kind: GroupKind::Distribution,
            notes: Some("mailing list".to_string()),
            ..group("list")
        })
        .unwrap();
    let entry = read(&dir, &list);
    assert_eq!(entry.first("groupType"), Some("4"));
    assert_eq!(entry.first("sAMAccountType"), Some("536870913"));
    assert_eq!(entry.first("info"), Some("mailing list"));
}

#[test]
fn test_new_computer() {
    let dir = provisioned(MemoryStore::new(), config());

    let ws = dir
        .new_computer(NewComputer {
            name: "WS01$".to_string(),
            dns_host_name: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(ws.dn().to_string(), "CN=WS01,CN=Computers,DC=example,DC=com");
    let entry = read(&dir, &ws);
    assert_eq!(entry.first("sAMAccountName"), Some("WS01$"));
    assert_eq!(entry.first("dNSHostName"), Some("WS01.example.com"));
    assert_eq!(uac(&entry), uf::WORKSTATION_TRUST_ACCOUNT | uf::ACCOUNTDISABLE);

    let old = dir
        .new_computer(NewComputer {
            name: "LEGACY".to_string(),
            prepare_oldjoin: true,
            ..Default::default()
        })
        .unwrap();
    let entry = read(&dir, &old);
    assert!(entry.has("unicodePwd"));
    assert_eq!(uac(&entry), uf::WORKSTATION_TRUST_ACCOUNT);

    for bad in ["WS$01", "$", "A$B$"] {
        let err = dir
            .new_computer(NewComputer {
                name: bad.to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidArgument(_)), "{bad}");
    }
}

#[test]
fn test_new_contact() {
    let dir = provisioned(MemoryStore::new(), config());
    let rid_before = dir.next_free_rid().unwrap();

    let contact = dir
        .new_contact(NewContact {
            given_name: Some("Grace".to_string()),
            surname: Some("Hopper".to_string()),
            mail: Some("grace@example.org".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(contact.dn().to_string(), "CN=Grace Hopper,DC=example,DC=com");
    assert!(contact.sid().is_none());
    assert_eq!(dir.next_free_rid().unwrap(), rid_before);

    let err = dir.new_contact(NewContact::default()).unwrap_err();
    assert!(matches!(err, DirectoryError::InvalidArgument(_)));
}

#[test]
fn test_delete_user_and_group() {
    let dir = provisioned(MemoryStore::new(), config());
    dir.new_user(user("alice")).unwrap();
    dir.new_group(group("staff")).unwrap();

    // Each delete only finds its own kind of object.
    assert!(matches!(dir.delete_user("staff"), Err(DirectoryError::NotFound(_))));
    assert!(matches!(dir.delete_group("alice"), Err(DirectoryError::NotFound(_))));

    dir.delete_user("alice").unwrap();
    dir.delete_group("staff").unwrap();
    assert!(find_accounts(&dir, "alice").is_empty());
    assert!(find_accounts(&dir, "staff").is_empty());
}

#[test]
fn test_account_flags() {
    let dir = provisioned(MemoryStore::new(), config());
    dir.new_user(user("alice")).unwrap();
    let alice = account("alice");

    assert!(dir.disable_account(&alice).unwrap());
    assert!(!dir.disable_account(&alice).unwrap());
    assert_eq!(
        uac(&dir.find_account(&alice, &["userAccountControl"]).unwrap()),
        uf::NORMAL_ACCOUNT | uf::ACCOUNTDISABLE
    );

    assert!(dir.enable_account(&alice).unwrap());
    assert!(!dir.enable_account(&alice).unwrap());

    dir.force_password_change(&alice).unwrap();
    dir.unlock_account(&alice).unwrap();
    let entry = dir.find_account(&alice, &["*"]).unwrap();
    assert_eq!(entry.first("pwdLastSet"), Some("0"));
    assert_eq!(entry.first("lockoutTime"), Some("0"));
}

#[test]
fn test_set_password_enables_account() {
    let dir = provisioned(MemoryStore::new(), config());
    dir.new_user(NewUser {
        password: None,
        ..user("bob")
    })
    .unwrap();

    dir.set_password(&account("bob"), "Another-Secret-1", true).unwrap();
    let entry = dir.find_account(&account("bob"), &["*"]).unwrap();
    assert_eq!(uac(&entry), uf::NORMAL_ACCOUNT);
    assert_eq!(entry.first("pwdLastSet"), Some("0"));

    let err = dir.set_password(&account("nobody"), "x", false).unwrap_err();
    assert!(matches!(err, DirectoryError::NotFound(_)));
}

#[test]
fn test_set_expiry() {
    let dir = provisioned(MemoryStore::new(), config());
    dir.new_user(user("alice")).unwrap();
    let alice = account("alice");

    dir.set_expiry(&alice, AccountExpiry::Never).unwrap();
    let entry = dir.find_account(&alice, &["*"]).unwrap();
    assert_eq!(entry.first("accountExpires"), Some("0"));
    assert_ne!(uac(&entry) & uf::DONT_EXPIRE_PASSWD, 0);

    let now = nt_time(Utc::now());
    dir.set_expiry(&alice, AccountExpiry::After(Duration::days(30)))
        .unwrap();
    let entry = dir.find_account(&alice, &["*"]).unwrap();
    let expires: u64 = entry.first("accountExpires").unwrap().parse().unwrap();
    assert!(expires > now);
    assert_eq!(uac(&entry) & uf::DONT_EXPIRE_PASSWD, 0);
}
