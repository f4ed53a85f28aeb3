//! Tests for SSH configuration parsing, merging, and persistence.

use super::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct StoreFixture {
    _tmp: TempDir,
    store: SshConfigStore,
}

#[fixture]
fn store_fixture() -> StoreFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let store = SshConfigStore::in_ssh_dir(&root.join(".ssh"));
    StoreFixture { _tmp: tmp, store }
}

fn read_file(path: &Utf8Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|err| panic!("read {path}: {err}"))
}

#[rstest]
#[case::empty("")]
#[case::blank_lines("\n\n   \n")]
#[case::comments_only("# managed by hand\n# nothing here\n")]
fn parse_yields_no_records_for_empty_input(#[case] source: &str) {
    let entries = parse(source).unwrap_or_else(|err| panic!("parse: {err}"));
    assert!(entries.is_empty());
}

#[test]
fn parse_reads_two_records() {
    let source = "Host a\n  HostName 1.2.3.4\n  User bob\n\nHost b\n  Port 2222\n";
    let entries = parse(source).unwrap_or_else(|err| panic!("parse: {err}"));

    assert_eq!(entries.len(), 2);
    let a = entries.get("a").unwrap_or_else(|| panic!("record a"));
    assert_eq!(a.get(FieldName::HostName), Some("1.2.3.4"));
    assert_eq!(a.get(FieldName::User), Some("bob"));
    let b = entries.get("b").unwrap_or_else(|| panic!("record b"));
    assert_eq!(b.get(FieldName::Port), Some("2222"));
    assert_eq!(b.fields.len(), 1);
}

#[test]
fn parse_lets_later_duplicate_win() {
    let source = "Host a\n  User first\n\nHost a\n  User second\n";
    let entries = parse(source).unwrap_or_else(|err| panic!("parse: {err}"));
    assert_eq!(entries.len(), 1);
    let a = entries.get("a").unwrap_or_else(|| panic!("record a"));
    assert_eq!(a.get(FieldName::User), Some("second"));
}

#[test]
fn parse_splits_records_without_blank_separator() {
    let source = "Host a\n  User alice\nHost b\n  User bob\n";
    let entries = parse(source).unwrap_or_else(|err| panic!("parse: {err}"));
    let users: Vec<_> = entries
        .values()
        .map(|entry| entry.get(FieldName::User))
        .collect();
    assert_eq!(users, vec![Some("alice"), Some("bob")]);
}

#[test]
fn parse_drops_unknown_options_and_canonicalises_case() {
    let source = "host dev\n  hostname dev.example.com\n  AddKeysToAgent yes\n  tcpkeepalive yes\n";
    let entries = parse(source).unwrap_or_else(|err| panic!("parse: {err}"));
    let dev = entries.get("dev").unwrap_or_else(|| panic!("record dev"));
    let keys: Vec<_> = dev.fields.keys().copied().collect();
    assert_eq!(keys, vec![FieldName::HostName, FieldName::TcpKeepAlive]);
}

#[test]
fn parse_keeps_multi_word_values() {
    let source = "Host inner\n  ProxyCommand ssh -W %h:%p bastion\n";
    let entries = parse(source).unwrap_or_else(|err| panic!("parse: {err}"));
    let inner = entries.get("inner").unwrap_or_else(|| panic!("record inner"));
    assert_eq!(
        inner.get(FieldName::ProxyCommand),
        Some("ssh -W %h:%p bastion")
    );
}

#[test]
fn parse_ignores_options_before_first_host() {
    let source = "User global\n\nHost a\n  User alice\n";
    let entries = parse(source).unwrap_or_else(|err| panic!("parse: {err}"));
    assert_eq!(entries.len(), 1);
}

#[rstest]
#[case::bare_keyword("Host a\n  User\n", 2)]
#[case::bare_host("Host\n", 1)]
#[case::after_blank("Host a\n  User x\n\nPort\n", 4)]
fn parse_rejects_lines_without_value(#[case] source: &str, #[case] expected_line: usize) {
    let err = parse(source).expect_err("malformed line should fail");
    let SshConfigError::Malformed { line, .. } = err else {
        panic!("expected Malformed, got {err:?}");
    };
    assert_eq!(line, expected_line);
}

#[test]
fn render_sorts_hosts_and_orders_fields() {
    let mut entries = ConfigEntries::new();
    for entry in [
        ConfigEntry::new("zeta").with(FieldName::Port, "22"),
        ConfigEntry::new("alpha")
            .with(FieldName::IdentityFile, "/k")
            .with(FieldName::HostName, "alpha.example.com"),
    ] {
        entries.insert(entry.host.clone(), entry);
    }

    assert_eq!(
        render(&entries),
        "Host alpha\n  HostName alpha.example.com\n  IdentityFile /k\n\nHost zeta\n  Port 22\n\n"
    );
}

#[test]
fn merge_replaces_whole_records() {
    let existing = parse("Host a\n  User old\n  Port 2200\n\nHost b\n  User keep\n")
        .unwrap_or_else(|err| panic!("parse: {err}"));
    let updates = parse("Host a\n  User new\n").unwrap_or_else(|err| panic!("parse: {err}"));

    let merged = merge(existing, updates);

    let a = merged.get("a").unwrap_or_else(|| panic!("record a"));
    assert_eq!(a.get(FieldName::User), Some("new"));
    assert_eq!(a.get(FieldName::Port), None, "stale fields must not survive");
    let b = merged.get("b").unwrap_or_else(|| panic!("record b"));
    assert_eq!(b.get(FieldName::User), Some("keep"));
}

#[rstest]
fn write_then_read_round_trips_in_sorted_order(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    let entries = parse("Host b\n  User bob\n\nHost a\n  User alice\n")
        .unwrap_or_else(|err| panic!("parse: {err}"));

    write_entries(store.path(), &entries).unwrap_or_else(|err| panic!("write: {err}"));

    let contents = read_file(store.path());
    assert_eq!(contents, "Host a\n  User alice\n\nHost b\n  User bob\n\n");
    let reread = read_entries(store.path()).unwrap_or_else(|err| panic!("read: {err}"));
    assert_eq!(reread, entries);
}

#[rstest]
fn ensure_host_entry_is_idempotent(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    let identity = Utf8Path::new("/home/me/.ssh/dev.example.com");

    store
        .ensure_host_entry("dev.example.com", "ubuntu", identity)
        .unwrap_or_else(|err| panic!("first ensure: {err}"));
    let first = read_file(store.path());
    store
        .ensure_host_entry("dev.example.com", "ubuntu", identity)
        .unwrap_or_else(|err| panic!("second ensure: {err}"));
    let second = read_file(store.path());

    assert_eq!(first, second);
    assert_eq!(
        first,
        concat!(
            "Host *\n",
            "  StrictHostKeyChecking no\n",
            "\n",
            "Host dev.example.com\n",
            "  HostName dev.example.com\n",
            "  User ubuntu\n",
            "  Port 22\n",
            "  IdentityFile /home/me/.ssh/dev.example.com\n",
            "\n",
        )
    );
}

#[rstest]
fn ensure_host_entry_preserves_unrelated_records(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    write_entries(
        store.path(),
        &parse("Host host-a\n  HostName 1.2.3.4\n").unwrap_or_else(|err| panic!("parse: {err}")),
    )
    .unwrap_or_else(|err| panic!("seed: {err}"));

    store
        .ensure_host_entry("host-b", "u", Utf8Path::new("/k/b"))
        .unwrap_or_else(|err| panic!("ensure: {err}"));

    let entries = read_entries(store.path()).unwrap_or_else(|err| panic!("read: {err}"));
    let hosts: Vec<_> = entries.keys().map(String::as_str).collect();
    assert_eq!(hosts, vec!["*", "host-a", "host-b"]);
    let a = entries.get("host-a").unwrap_or_else(|| panic!("host-a"));
    assert_eq!(a.get(FieldName::HostName), Some("1.2.3.4"));
    let b = entries.get("host-b").unwrap_or_else(|| panic!("host-b"));
    assert_eq!(b.get(FieldName::User), Some("u"));
    assert_eq!(b.get(FieldName::IdentityFile), Some("/k/b"));
}

#[rstest]
fn malformed_existing_file_is_left_untouched(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    let original = "Host a\n  User\n";
    let parent = store
        .path()
        .parent()
        .unwrap_or_else(|| panic!("config path has a parent"));
    std::fs::create_dir_all(parent).unwrap_or_else(|err| panic!("mkdir: {err}"));
    std::fs::write(store.path(), original).unwrap_or_else(|err| panic!("seed: {err}"));

    let err = store
        .ensure_host_entry("b", "u", Utf8Path::new("/k"))
        .expect_err("malformed file should abort");

    assert!(matches!(err, SshConfigError::Parse { .. }), "got {err:?}");
    assert!(err.to_string().contains("line 2"), "message: {err}");
    assert_eq!(read_file(store.path()), original);
}
