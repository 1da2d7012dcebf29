use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonschema::JSONSchema;
use serde_json::Value;

const TEXT: &str = "LEGITEXT000006070721";
const FIRST_ARTICLE: &str = "LEGIARTI000000000001";
const SECOND_ARTICLE: &str = "LEGIARTI000000000002";

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_lh<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_lh"))
        .args(args)
        .env("RUST_LOG", "info")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute lh binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_lh(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "lh command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn fixture_path() -> PathBuf {
    repo_root().join("contracts/v1/fixtures/code-exemple.dataset.json")
}

fn read_json_file(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read JSON file {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn validate_schema(schema_file: &str, instance: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_file);
    let schema_json = read_json_file(&schema_path);
    let compiled = JSONSchema::compile(&schema_json)
        .unwrap_or_else(|err| panic!("failed to compile schema {}: {err}", schema_path.display()));

    let errors = compiled
        .validate(instance)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>());
    if let Some(errors) = errors {
        panic!("schema validation failed for {}:\n{}", schema_file, errors.join("\n"));
    }
}

/// Database with the fixture imported, plus a body cache holding `bodies`.
fn seeded_sandbox(prefix: &str, bodies: &[(&str, &str)]) -> (PathBuf, PathBuf, PathBuf) {
    let sandbox = unique_temp_dir(prefix);
    let db = sandbox.join("lex.sqlite3");
    let cache = sandbox.join("cache");
    let text_cache = cache.join("markdown").join(TEXT);
    fs::create_dir_all(&text_cache)
        .unwrap_or_else(|err| panic!("failed to create cache dir {}: {err}", text_cache.display()));
    for (article_id, body) in bodies {
        let path = text_cache.join(format!("{article_id}.md"));
        fs::write(&path, body)
            .unwrap_or_else(|err| panic!("failed to write body {}: {err}", path.display()));
    }
    run_json(["--db", path_str(&db), "db", "import", "--in", path_str(&fixture_path())]);
    (sandbox, db, cache)
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok_and(|output| output.status.success())
}

fn git_log_subjects(repository: &Path) -> Vec<String> {
    let output = Command::new("git")
        .args(["log", "--reverse", "--format=%s|%an|%at"])
        .current_dir(repository)
        .output()
        .unwrap_or_else(|err| panic!("failed to run git log: {err}"));
    if !output.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&output.stdout).lines().map(str::to_string).collect()
}

#[test]
fn db_commands_cover_migrate_import_integrity_and_backup() {
    let sandbox = unique_temp_dir("lex-history-cli-db");
    let db = sandbox.join("lex.sqlite3");
    let backup = sandbox.join("backup").join("lex.sqlite3");

    let before = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_i64(&before, "current_version"), 0);
    assert_eq!(as_str(&before, "contract_version"), "cli.v1");

    let dry_run = run_json(["--db", path_str(&db), "db", "migrate", "--dry-run"]);
    assert_eq!(dry_run["would_apply_versions"], serde_json::json!([1]));
    let still_before = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_i64(&still_before, "current_version"), 0);

    let migrated = run_json(["--db", path_str(&db), "db", "migrate"]);
    assert_eq!(as_i64(&migrated, "after_version"), 1);
    assert_eq!(migrated["up_to_date"], Value::Bool(true));

    let fixture = fixture_path();
    let imported = run_json(["--db", path_str(&db), "db", "import", "--in", path_str(&fixture)]);
    assert_eq!(as_i64(&imported["summary"], "imported_documents"), 1);
    assert_eq!(as_i64(&imported["summary"], "imported_snapshots"), 3);
    assert_eq!(as_i64(&imported["summary"], "imported_sections"), 2);
    assert_eq!(as_i64(&imported["summary"], "imported_articles"), 2);

    let rejected = run_lh(["--db", path_str(&db), "db", "import", "--in", path_str(&fixture)]);
    assert!(!rejected.status.success());

    let skipped = run_json([
        "--db",
        path_str(&db),
        "db",
        "import",
        "--in",
        path_str(&fixture),
        "--skip-existing",
    ]);
    assert_eq!(as_i64(&skipped["summary"], "imported_articles"), 0);
    assert_eq!(as_i64(&skipped["summary"], "skipped_existing_articles"), 2);

    let integrity = run_json(["--db", path_str(&db), "db", "integrity-check"]);
    assert_eq!(integrity["quick_check_ok"], Value::Bool(true));
    assert_eq!(integrity["foreign_key_violations"], serde_json::json!([]));

    let backed_up = run_json(["--db", path_str(&db), "db", "backup", "--out", path_str(&backup)]);
    assert_eq!(as_str(&backed_up, "status"), "ok");
    let listed = run_json(["--db", path_str(&backup), "text", "list"]);
    assert_eq!(listed["texts"][0]["id"], TEXT);

    fs::remove_dir_all(&sandbox)
        .unwrap_or_else(|err| panic!("failed to clean sandbox {}: {err}", sandbox.display()));
}

#[test]
fn text_list_matches_contract() {
    let (sandbox, db, _) = seeded_sandbox("lex-history-cli-list", &[]);

    let listed = run_json(["--db", path_str(&db), "text", "list"]);

    validate_schema("text-list.schema.json", &listed);
    assert_eq!(listed["texts"][0]["name"], "Code Exemple");
    assert_eq!(listed["texts"][0]["is_code"], Value::Bool(true));
    fs::remove_dir_all(&sandbox)
        .unwrap_or_else(|err| panic!("failed to clean sandbox {}: {err}", sandbox.display()));
}

#[test]
fn render_prints_the_version_in_force() {
    let (sandbox, db, cache) = seeded_sandbox(
        "lex-history-cli-render",
        &[(FIRST_ARTICLE, "Corps de l'article 1."), (SECOND_ARTICLE, "Corps de l'article 2.")],
    );

    let rendered = run_json([
        "--db",
        path_str(&db),
        "render",
        "--text",
        TEXT,
        "--at",
        "2006-01-01",
        "--cache",
        path_str(&cache),
    ]);

    assert_eq!(as_i64(&rendered, "index"), 2);
    assert_eq!(rendered["window"]["start"], "2005-03-10");
    assert!(rendered["window"]["end"].is_null());
    let expected = "Code Exemple\n\
        \n\
        - Date de consolidation : 10 mars 2005\n\
        - [Lien permanent Légifrance](http://legifrance.gouv.fr/affichCode.do?cidTexte=LEGITEXT000006070721&dateTexte=20050310)\n\
        \n\
        \n\
        # Titre I\n\
        \n\
        ## Chapitre Ier\n\
        \n\
        ## Article 2\n\
        \n\
        Corps de l'article 2.\n\
        \n\
        \n\
        # Article 1\n\
        \n\
        Corps de l'article 1.\n\
        \n\
        \n";
    assert_eq!(as_str(&rendered, "content"), expected);

    let before_history = run_lh([
        "--db",
        path_str(&db),
        "render",
        "--text",
        TEXT,
        "--at",
        "1999-12-31",
        "--cache",
        path_str(&cache),
    ]);
    assert!(!before_history.status.success());

    fs::remove_dir_all(&sandbox)
        .unwrap_or_else(|err| panic!("failed to clean sandbox {}: {err}", sandbox.display()));
}

#[test]
fn export_dry_run_reports_versions_without_writing() {
    let (sandbox, db, cache) = seeded_sandbox(
        "lex-history-cli-dry-run",
        &[(FIRST_ARTICLE, "Corps 1."), (SECOND_ARTICLE, "Corps 2.")],
    );
    let out = sandbox.join("histoire");

    let exported = run_json([
        "--db",
        path_str(&db),
        "export",
        "--all",
        "--cache",
        path_str(&cache),
        "--out",
        path_str(&out),
        "--dry-run",
    ]);

    validate_schema("export-report.schema.json", &exported);
    let report = &exported["reports"][0];
    assert_eq!(report["skipped_placeholders"], serde_json::json!([0]));
    let commits = report["commits"]
        .as_array()
        .unwrap_or_else(|| panic!("commits should be an array: {report}"));
    assert_eq!(commits.len(), 2);
    assert_eq!(
        as_str(&commits[0], "message").lines().next(),
        Some("Version consolidée au 1er janvier 2000")
    );
    assert!(as_str(&commits[1], "message").contains("du 2005-03-10 à maintenant"));
    assert!(!out.exists());

    fs::remove_dir_all(&sandbox)
        .unwrap_or_else(|err| panic!("failed to clean sandbox {}: {err}", sandbox.display()));
}

#[test]
fn export_dry_run_refuses_an_existing_destination() {
    let (sandbox, db, cache) = seeded_sandbox(
        "lex-history-cli-dry-run-existing",
        &[(FIRST_ARTICLE, "Corps 1."), (SECOND_ARTICLE, "Corps 2.")],
    );
    let out = sandbox.join("histoire");
    let repository = out.join("codes").join("code_exemple");
    fs::create_dir_all(&repository)
        .unwrap_or_else(|err| panic!("failed to create {}: {err}", repository.display()));
    fs::write(repository.join("Code Exemple.md"), "déjà là")
        .unwrap_or_else(|err| panic!("failed to seed destination: {err}"));

    let result = run_lh([
        "--db",
        path_str(&db),
        "export",
        "--all",
        "--cache",
        path_str(&cache),
        "--out",
        path_str(&out),
        "--dry-run",
    ]);

    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("already exists"), "unexpected stderr: {stderr}");

    fs::remove_dir_all(&sandbox)
        .unwrap_or_else(|err| panic!("failed to clean sandbox {}: {err}", sandbox.display()));
}

#[test]
fn export_writes_one_git_commit_per_version_and_refuses_to_overwrite() {
    if !git_available() {
        return;
    }
    let (sandbox, db, cache) = seeded_sandbox(
        "lex-history-cli-git",
        &[(FIRST_ARTICLE, "Corps 1."), (SECOND_ARTICLE, "Corps 2.")],
    );
    let out = sandbox.join("histoire");
    let args = [
        "--db",
        path_str(&db),
        "export",
        "--text",
        TEXT,
        "--cache",
        path_str(&cache),
        "--out",
        path_str(&out),
    ];

    let exported = run_json(args);

    validate_schema("export-report.schema.json", &exported);
    for category in ["codes", "constitutions", "lois", "décrets", "ordonnances"] {
        assert!(out.join(category).is_dir(), "missing category directory {category}");
    }
    let repository = out.join("codes").join("code_exemple");
    let text = fs::read_to_string(repository.join("Code Exemple.md"))
        .unwrap_or_else(|err| panic!("exported text should exist: {err}"));
    assert!(text.contains("- Date de consolidation : 10 mars 2005\n"));
    assert_eq!(
        git_log_subjects(&repository),
        vec![
            "Version consolidée au 1er janvier 2000|Législateur|946684800".to_string(),
            "Version consolidée au 10 mars 2005|Législateur|1110412800".to_string(),
        ]
    );

    let again = run_lh(args);
    assert!(!again.status.success());
    let stderr = String::from_utf8_lossy(&again.stderr);
    assert!(stderr.contains("already exists"), "unexpected stderr: {stderr}");
    assert_eq!(git_log_subjects(&repository).len(), 2);

    fs::remove_dir_all(&sandbox)
        .unwrap_or_else(|err| panic!("failed to clean sandbox {}: {err}", sandbox.display()));
}

#[test]
fn export_with_missing_body_fails_before_any_commit() {
    if !git_available() {
        return;
    }
    let (sandbox, db, cache) =
        seeded_sandbox("lex-history-cli-missing-body", &[(FIRST_ARTICLE, "Corps 1.")]);
    let out = sandbox.join("histoire");

    let result = run_lh([
        "--db",
        path_str(&db),
        "export",
        "--text",
        TEXT,
        "--cache",
        path_str(&cache),
        "--out",
        path_str(&out),
    ]);

    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains(SECOND_ARTICLE), "unexpected stderr: {stderr}");
    let repository = out.join("codes").join("code_exemple");
    assert!(git_log_subjects(&repository).is_empty());
    assert!(!repository.join("Code Exemple.md").exists());

    fs::remove_dir_all(&sandbox)
        .unwrap_or_else(|err| panic!("failed to clean sandbox {}: {err}", sandbox.display()));
}

#[test]
fn unknown_text_is_rejected() {
    let (sandbox, db, cache) = seeded_sandbox("lex-history-cli-unknown", &[]);

    let result = run_lh([
        "--db",
        path_str(&db),
        "export",
        "--text",
        "LEGITEXT-inconnu",
        "--cache",
        path_str(&cache),
        "--out",
        path_str(&sandbox.join("histoire")),
        "--dry-run",
    ]);

    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("unknown text: LEGITEXT-inconnu"));
    fs::remove_dir_all(&sandbox)
        .unwrap_or_else(|err| panic!("failed to clean sandbox {}: {err}", sandbox.display()));
}
