//! Desired-state loading: document shapes, error messages, directory expansion.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use realmsync_core::{
    loader,
    types::{ResourceKind, TargetName},
    CoreError,
};
use rstest::rstest;

// ---------------------------------------------------------------------------
// 1. Document shapes
// ---------------------------------------------------------------------------

#[rstest]
#[case::yaml("realm.yaml", "realm: acme\nclients:\n  - clientId: c1\n  - clientId: c2\n", 2)]
#[case::json("realm.json", r#"{"realm":"acme","clients":[{"clientId":"c1"}]}"#, 1)]
#[case::no_clients("realm.yml", "realm: acme\nenabled: false\n", 0)]
fn client_count_per_document(#[case] file: &str, #[case] body: &str, #[case] clients: usize) {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let child = dir.child(file);
    child.write_str(body).expect("write");

    let loaded = loader::load_file(child.path()).expect("load");
    assert_eq!(loaded.desired.target(), &TargetName::from("acme"));
    let got = loaded
        .desired
        .representation
        .clients
        .map(|c| c.len())
        .unwrap_or_default();
    assert_eq!(got, clients);
}

#[test]
fn roles_components_and_scope_mappings_are_typed() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let child = dir.child("realm.yaml");
    child
        .write_str(
            r#"
realm: acme
roles:
  realm:
    - name: admin
  client:
    web:
      - name: viewer
components:
  org.keycloak.storage.UserStorageProvider:
    - name: ldap
      providerId: ldap
scopeMappings:
  - clientScope: offline_access
    roles: [admin]
"#,
        )
        .expect("write");

    let desired = loader::load_file(child.path()).expect("load").desired;
    let rep = desired.representation;
    let roles = rep.roles.expect("roles");
    assert_eq!(roles.realm.expect("realm roles")[0].name, "admin");
    assert_eq!(roles.client.expect("client roles")["web"][0].name, "viewer");
    let components = rep.components.expect("components");
    assert_eq!(
        components["org.keycloak.storage.UserStorageProvider"][0].name,
        "ldap"
    );
    let mappings = rep.scope_mappings.expect("scope mappings");
    assert_eq!(mappings[0].owner(), "offline_access");
    assert_eq!(ResourceKind::ScopeMapping.key_field(), "clientScope");
}

// ---------------------------------------------------------------------------
// 2. Error messages
// ---------------------------------------------------------------------------

#[test]
fn malformed_document_reports_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let child = dir.child("broken.yaml");
    child
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = loader::load_file(child.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("broken.yaml"), "got: {err}");
}

#[test]
fn list_document_is_a_parse_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let child = dir.child("list.yaml");
    child.write_str("- realm: acme\n").expect("write");

    let err = loader::load_file(child.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
}

#[test]
fn missing_file_is_io_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = loader::load_file(&dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, CoreError::Io { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 3. Directory expansion
// ---------------------------------------------------------------------------

#[test]
fn files_and_directories_mix() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("realms/10_second.yaml")
        .write_str("realm: second\n")
        .expect("write");
    dir.child("realms/00_first.yaml")
        .write_str("realm: first\n")
        .expect("write");
    dir.child("standalone.json")
        .write_str(r#"{"realm":"third"}"#)
        .expect("write");
    dir.child("realms").assert(predicate::path::is_dir());

    let loaded = loader::load_paths(&[
        dir.child("realms").path().to_path_buf(),
        dir.child("standalone.json").path().to_path_buf(),
    ])
    .expect("load");
    let names: Vec<_> = loaded.iter().map(|l| l.desired.target().to_string()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}
