//! Unit tests for the trust store.

use super::*;
use crate::compute::InstanceHandle;
use rstest::{fixture, rstest};
use tempfile::TempDir;

const KEY_A: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f";
const KEY_B: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAICAhIiMkJSYnKCkqKywtLi8wMTIzNDU2Nzg5Ojs8PT4/";

struct StoreFixture {
    _tmp: TempDir,
    path: Utf8PathBuf,
}

impl StoreFixture {
    fn store(&self) -> TrustStore {
        TrustStore::new(self.path.clone())
    }

    fn read(&self) -> String {
        std::fs::read_to_string(&self.path).unwrap_or_else(|err| panic!("read trust file: {err}"))
    }

    fn write(&self, contents: &str) {
        std::fs::write(&self.path, contents).unwrap_or_else(|err| panic!("write trust file: {err}"));
    }
}

#[fixture]
fn fixture() -> StoreFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("state").join("ssh-auth.json"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    StoreFixture { _tmp: tmp, path }
}

fn key(line: &str) -> HostKey {
    HostKey::from_openssh(line).unwrap_or_else(|err| panic!("parse key: {err}"))
}

#[rstest]
fn load_without_file_starts_empty(fixture: StoreFixture) {
    let store = fixture.store();

    let report = store.load().unwrap_or_else(|err| panic!("load: {err}"));

    assert!(!report.file_found);
    assert!(store.is_empty());
    assert!(!store.is_dirty());
}

#[rstest]
fn save_then_load_preserves_both_record_kinds(fixture: StoreFixture) {
    let store = fixture.store();
    store
        .put("ocid-pw", CredentialRecord::password("opc", "hunter2"))
        .unwrap_or_else(|err| panic!("put: {err}"));
    store
        .put(
            "ocid-key",
            CredentialRecord::public_key("ubuntu", "/keys/id_ed25519", Some(String::from("pass")))
                .with_trusted_host_key(key(KEY_A)),
        )
        .unwrap_or_else(|err| panic!("put: {err}"));
    store.save().unwrap_or_else(|err| panic!("save: {err}"));

    let reloaded = fixture.store();
    let report = reloaded.load().unwrap_or_else(|err| panic!("load: {err}"));

    assert_eq!(report.loaded, 2);
    assert_eq!(reloaded.snapshot(), store.snapshot());
    let Some(keyed) = reloaded.get("ocid-key") else {
        panic!("public-key record missing");
    };
    assert_eq!(
        keyed.trusted_host_key().map(HostKey::fingerprint),
        Some(key(KEY_A).fingerprint())
    );
}

#[rstest]
fn save_leaves_no_temporary_files(fixture: StoreFixture) {
    let store = fixture.store();
    store.set_default(CredentialRecord::password("opc", "pw"));
    store.save().unwrap_or_else(|err| panic!("save: {err}"));
    store.save().unwrap_or_else(|err| panic!("second save: {err}"));

    let parent = fixture
        .path
        .parent()
        .unwrap_or_else(|| panic!("trust path has a parent"));
    let entries: Vec<String> = std::fs::read_dir(parent)
        .unwrap_or_else(|err| panic!("read dir: {err}"))
        .map(|entry| {
            entry
                .unwrap_or_else(|err| panic!("dir entry: {err}"))
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(entries, vec![String::from("ssh-auth.json")]);
}

#[rstest]
fn load_skips_bad_records_and_keeps_the_rest(fixture: StoreFixture) {
    std::fs::create_dir_all(fixture.path.parent().unwrap_or_else(|| panic!("parent")))
        .unwrap_or_else(|err| panic!("mkdir: {err}"));
    fixture.write(
        r#"{
            "ocid-1": {"authType": "PASSWORD", "username": "opc", "password": "pw", "serverKey": null},
            "ocid-2": {"authType": "TOKEN", "username": "opc"}
        }"#,
    );
    let store = fixture.store();

    let report = store.load().unwrap_or_else(|err| panic!("load: {err}"));

    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(store.get("ocid-1").is_some());
    assert!(store.get("ocid-2").is_none());
}

#[rstest]
fn load_rejects_non_object_documents(fixture: StoreFixture) {
    std::fs::create_dir_all(fixture.path.parent().unwrap_or_else(|| panic!("parent")))
        .unwrap_or_else(|err| panic!("mkdir: {err}"));
    fixture.write("[]");

    let Err(err) = fixture.store().load() else {
        panic!("array root should not load");
    };
    assert!(matches!(err, TrustStoreError::Parse { .. }));
}

#[rstest]
fn resolve_falls_back_to_default(fixture: StoreFixture) {
    let store = fixture.store();
    assert!(matches!(
        store.resolve("ocid-1"),
        Err(TrustStoreError::NoCredentials { .. })
    ));

    store.set_default(CredentialRecord::password("opc", "default"));
    store
        .put("ocid-2", CredentialRecord::password("admin", "own"))
        .unwrap_or_else(|err| panic!("put: {err}"));

    let fallback = store.resolve("ocid-1").unwrap_or_else(|err| panic!("resolve: {err}"));
    let own = store.resolve("ocid-2").unwrap_or_else(|err| panic!("resolve: {err}"));
    assert_eq!(fallback.username(), "opc");
    assert_eq!(own.username(), "admin");
}

#[rstest]
fn put_rejects_malformed_ids(fixture: StoreFixture) {
    let store = fixture.store();

    let Err(err) = store.put("has space", CredentialRecord::password("opc", "pw")) else {
        panic!("id with whitespace should be rejected");
    };

    assert!(matches!(err, TrustStoreError::InvalidResourceId { .. }));
    assert!(!store.is_dirty());
}

#[rstest]
fn trusting_through_default_pins_a_private_copy(fixture: StoreFixture) {
    let store = fixture.store();
    store.set_default(CredentialRecord::password("opc", "pw"));
    store
        .flush_if_dirty()
        .unwrap_or_else(|err| panic!("flush: {err}"));

    let outcome = store
        .trust_host_key("ocid-1", key(KEY_A))
        .unwrap_or_else(|err| panic!("trust: {err}"));

    assert_eq!(outcome, PinOutcome::Pinned);
    assert!(store.is_dirty());
    let Some(pinned) = store.get("ocid-1") else {
        panic!("resource copy should exist");
    };
    assert_eq!(pinned.username(), "opc");
    assert_eq!(pinned.trusted_host_key(), Some(&key(KEY_A)));
    let Some(default) = store.get_default() else {
        panic!("default record should remain");
    };
    assert_eq!(default.trusted_host_key(), None);
}

#[rstest]
fn trusting_without_any_record_fails(fixture: StoreFixture) {
    let store = fixture.store();

    let Err(err) = store.trust_host_key("ocid-1", key(KEY_B)) else {
        panic!("trust without credentials should fail");
    };

    assert!(matches!(err, TrustStoreError::NoCredentials { .. }));
    assert!(!store.is_dirty());
}

#[rstest]
fn revoke_clears_key_and_marks_dirty(fixture: StoreFixture) {
    let store = fixture.store();
    store
        .put(
            "ocid-1",
            CredentialRecord::password("opc", "pw").with_trusted_host_key(key(KEY_A)),
        )
        .unwrap_or_else(|err| panic!("put: {err}"));
    store.save().unwrap_or_else(|err| panic!("save: {err}"));
    store
        .flush_if_dirty()
        .unwrap_or_else(|err| panic!("flush: {err}"));
    assert!(!store.is_dirty());

    assert!(store.revoke_host_key("ocid-1"));
    assert!(!store.revoke_host_key("ocid-1"));
    assert!(!store.revoke_host_key("unknown"));

    assert!(store.is_dirty());
    assert_eq!(
        store.get("ocid-1").and_then(|r| r.trusted_host_key().cloned()),
        None
    );
}

#[rstest]
fn flush_saves_only_when_dirty(fixture: StoreFixture) {
    let store = fixture.store();
    assert!(!store.flush_if_dirty().unwrap_or_else(|err| panic!("flush: {err}")));
    assert!(!fixture.path.exists());

    store
        .put("ocid-1", CredentialRecord::password("opc", "pw"))
        .unwrap_or_else(|err| panic!("put: {err}"));

    assert!(store.flush_if_dirty().unwrap_or_else(|err| panic!("flush: {err}")));
    assert!(!store.is_dirty());
    assert!(fixture.read().contains("\"ocid-1\""));
}

#[test]
fn failed_flush_does_not_rearm_the_flag() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap_or_else(|err| panic!("write: {err}"));
    let path = Utf8PathBuf::from_path_buf(blocker.join("ssh-auth.json"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let store = TrustStore::new(path);
    store
        .put("ocid-1", CredentialRecord::password("opc", "pw"))
        .unwrap_or_else(|err| panic!("put: {err}"));

    let Err(err) = store.flush_if_dirty() else {
        panic!("saving below a regular file should fail");
    };

    assert!(matches!(err, TrustStoreError::Io { .. }));
    assert!(!store.is_dirty());
}

#[rstest]
fn reports_inventory_instances_without_records(fixture: StoreFixture) {
    let store = fixture.store();
    store.set_default(CredentialRecord::password("opc", "pw"));
    store
        .put("ocid-1", CredentialRecord::password("opc", "pw"))
        .unwrap_or_else(|err| panic!("put: {err}"));
    let inventory = InstanceInventory::from_instances([
        InstanceHandle::new("ocid-1", "web", "tenancy"),
        InstanceHandle::new("ocid-2", "db", "tenancy"),
    ]);

    let report = store
        .load_with_inventory(&inventory)
        .unwrap_or_else(|err| panic!("load: {err}"));

    assert!(!report.file_found);
    assert_eq!(
        store.missing_records(inventory.ids()),
        BTreeSet::from([String::from("ocid-2")])
    );
}

/// Ed25519-shaped wire key whose material is `seed` repeated.
fn wire_key(seed: u8) -> HostKey {
    let mut blob = vec![0, 0, 0, 11];
    blob.extend_from_slice(b"ssh-ed25519");
    blob.extend_from_slice(&[0, 0, 0, 32]);
    blob.extend_from_slice(&[seed; 32]);
    HostKey::from_wire(blob).unwrap_or_else(|err| panic!("wire key: {err}"))
}

#[rstest]
fn pinned_key_is_never_replaced(fixture: StoreFixture) {
    let store = fixture.store();
    store.set_default(CredentialRecord::password("opc", "pw"));

    let first = store
        .trust_host_key("ocid-1", key(KEY_A))
        .unwrap_or_else(|err| panic!("trust: {err}"));
    store
        .flush_if_dirty()
        .unwrap_or_else(|err| panic!("flush: {err}"));
    let again = store
        .trust_host_key("ocid-1", key(KEY_A))
        .unwrap_or_else(|err| panic!("trust again: {err}"));
    let other = store
        .trust_host_key("ocid-1", key(KEY_B))
        .unwrap_or_else(|err| panic!("trust other: {err}"));

    assert_eq!(first, PinOutcome::Pinned);
    assert_eq!(again, PinOutcome::AlreadyPinned);
    assert_eq!(other, PinOutcome::Conflict { pinned: key(KEY_A) });
    assert!(!store.is_dirty());
    assert_eq!(
        store
            .get("ocid-1")
            .and_then(|record| record.trusted_host_key().cloned()),
        Some(key(KEY_A))
    );
}

#[rstest]
fn concurrent_pins_settle_on_a_single_key(fixture: StoreFixture) {
    let store = fixture.store();
    store.set_default(CredentialRecord::password("opc", "pw"));

    let shared = &store;
    let outcomes: Vec<(HostKey, PinOutcome)> = std::thread::scope(|scope| {
        let workers: Vec<_> = (1..=8_u8)
            .map(|seed| {
                scope.spawn(move || {
                    let candidate = wire_key(seed);
                    let outcome = shared
                        .trust_host_key("ocid-1", candidate.clone())
                        .unwrap_or_else(|err| panic!("trust: {err}"));
                    (candidate, outcome)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap_or_else(|_| panic!("worker panicked")))
            .collect()
    });

    let Some(pinned) = store
        .get("ocid-1")
        .and_then(|record| record.trusted_host_key().cloned())
    else {
        panic!("one key should be pinned");
    };
    let winners: Vec<_> = outcomes
        .iter()
        .filter(|(_, outcome)| *outcome == PinOutcome::Pinned)
        .map(|(candidate, _)| candidate.clone())
        .collect();
    assert_eq!(winners, vec![pinned.clone()]);
    assert!(outcomes.iter().all(|(_, outcome)| matches!(
        outcome,
        PinOutcome::Pinned | PinOutcome::Conflict { .. }
    )));
    assert!(outcomes.iter().all(|(_, outcome)| match outcome {
        PinOutcome::Conflict { pinned: kept } => *kept == pinned,
        _ => true,
    }));
}

#[rstest]
fn concurrent_puts_keep_every_record(fixture: StoreFixture) {
    let store = fixture.store();

    let shared = &store;
    std::thread::scope(|scope| {
        for worker in 0..8 {
            scope.spawn(move || {
                for index in 0..16 {
                    shared
                        .put(
                            &format!("ocid-{worker}-{index}"),
                            CredentialRecord::password("opc", "pw"),
                        )
                        .unwrap_or_else(|err| panic!("put: {err}"));
                }
            });
        }
    });

    assert_eq!(store.len(), 8 * 16);
    assert!(store.is_dirty());
    store.save().unwrap_or_else(|err| panic!("save: {err}"));
    let reloaded = fixture.store();
    let report = reloaded.load().unwrap_or_else(|err| panic!("load: {err}"));
    assert_eq!(report.loaded, 8 * 16);
}
