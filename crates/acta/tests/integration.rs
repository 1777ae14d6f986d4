use std::process::{Child, Command};
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{Value, json};
use tempfile::TempDir;

fn acta_bin() -> String {
    env!("CARGO_BIN_EXE_acta").to_string()
}

struct DaemonGuard {
    child: Child,
    port: u16,
    _dir: TempDir,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl DaemonGuard {
    fn url(&self, project: &str) -> String {
        format!("http://localhost:{}/api/issues/{project}", self.port)
    }
}

fn start_daemon_with(extra: &[&str]) -> DaemonGuard {
    let dir = TempDir::new().expect("create temp dir");
    let port = portpicker::pick_unused_port().expect("no free port");

    let child = Command::new(acta_bin())
        .args(["serve", "--port", &port.to_string(), "--data-dir"])
        .arg(dir.path())
        .args(extra)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("spawn daemon");

    let base = format!("http://localhost:{port}");
    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(100));
        if reqwest::blocking::get(format!("{base}/status")).is_ok() {
            return DaemonGuard {
                child,
                port,
                _dir: dir,
            };
        }
    }
    panic!("daemon did not become ready within 5 seconds");
}

fn start_daemon() -> DaemonGuard {
    start_daemon_with(&[])
}

fn expect_json(resp: reqwest::blocking::Response) -> Value {
    assert_eq!(resp.status(), 200, "every response uses status 200");
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(
        content_type.starts_with("application/json"),
        "unexpected content type: {content_type}"
    );
    resp.json().expect("parse JSON body")
}

fn post(d: &DaemonGuard, project: &str, body: Value) -> Value {
    expect_json(
        Client::new()
            .post(d.url(project))
            .json(&body)
            .send()
            .expect("send POST"),
    )
}

fn put(d: &DaemonGuard, project: &str, body: Value) -> Value {
    expect_json(
        Client::new()
            .put(d.url(project))
            .json(&body)
            .send()
            .expect("send PUT"),
    )
}

fn get(d: &DaemonGuard, project: &str, query: &[(&str, &str)]) -> Value {
    expect_json(
        Client::new()
            .get(d.url(project))
            .query(query)
            .send()
            .expect("send GET"),
    )
}

fn create_basic(d: &DaemonGuard, project: &str, assigned_to: &str) -> Value {
    post(
        d,
        project,
        json!({
            "issue_title": "test issue",
            "issue_text": "test issue",
            "created_by": "George",
            "assigned_to": assigned_to,
        }),
    )
}

fn extract_id(val: &Value) -> String {
    val["_id"]
        .as_str()
        .expect("issue should have _id")
        .to_string()
}

#[test]
fn create_with_every_field() {
    let daemon = start_daemon();

    let issue = post(
        &daemon,
        "apitest",
        json!({
            "issue_title": "test issue",
            "issue_text": "test issue",
            "created_by": "George",
            "assigned_to": "Vlad",
            "status_text": "In QA",
        }),
    );
    assert_eq!(issue["issue_title"], "test issue");
    assert_eq!(issue["issue_text"], "test issue");
    assert_eq!(issue["created_by"], "George");
    assert_eq!(issue["assigned_to"], "Vlad");
    assert_eq!(issue["status_text"], "In QA");
    assert_eq!(issue["open"], true);
    assert_eq!(issue["created_on"], issue["updated_on"]);
    assert!(issue.get("project_id").is_none());
    extract_id(&issue);
}

#[test]
fn create_with_only_required_fields() {
    let daemon = start_daemon();

    let issue = post(
        &daemon,
        "apitest",
        json!({
            "issue_title": "test issue",
            "issue_text": "test issue",
            "created_by": "George",
        }),
    );
    assert_eq!(issue["assigned_to"], "");
    assert_eq!(issue["status_text"], "");
}

#[test]
fn create_with_missing_required_fields() {
    let daemon = start_daemon();

    let resp = post(
        &daemon,
        "fresh",
        json!({
            "issue_text": "Where is the title?!",
            "created_by": "Someone",
        }),
    );
    assert_eq!(resp, json!({"error": "required field(s) missing"}));

    let resp = post(
        &daemon,
        "fresh",
        json!({"issue_title": "", "issue_text": "x", "created_by": "y"}),
    );
    assert_eq!(resp["error"], "required field(s) missing");

    // No record and no project were created.
    assert_eq!(get(&daemon, "fresh", &[]), json!({"Error": "no such project"}));
}

#[test]
fn create_from_form_body() {
    let daemon = start_daemon();

    let resp = Client::new()
        .post(daemon.url("apitest"))
        .form(&[
            ("issue_title", "form issue"),
            ("issue_text", "sent urlencoded"),
            ("created_by", "Vladimir"),
        ])
        .send()
        .expect("send form POST");
    let issue = expect_json(resp);
    assert_eq!(issue["issue_title"], "form issue");
    assert_eq!(issue["open"], true);
}

#[test]
fn view_issues_with_filters() {
    let daemon = start_daemon();

    let george = create_basic(&daemon, "apitest", "George");
    let closed = create_basic(&daemon, "apitest", "George");
    create_basic(&daemon, "apitest", "Vlad");
    create_basic(&daemon, "other", "George");

    let resp = put(
        &daemon,
        "apitest",
        json!({"_id": extract_id(&closed), "open": "false"}),
    );
    assert_eq!(resp["result"], "successfully updated");

    let all = get(&daemon, "apitest", &[]);
    assert_eq!(all.as_array().unwrap().len(), 3);

    let open = get(&daemon, "apitest", &[("open", "true")]);
    let open = open.as_array().unwrap();
    assert_eq!(open.len(), 2);
    assert!(open.iter().all(|i| i["open"] == true));

    let both = get(
        &daemon,
        "apitest",
        &[("open", "true"), ("assigned_to", "George")],
    );
    let both = both.as_array().unwrap();
    assert_eq!(both.len(), 1);
    assert_eq!(both[0]["_id"], george["_id"]);

    let created_on = george["created_on"].as_str().unwrap();
    let by_stamp = get(&daemon, "apitest", &[("created_on", created_on)]);
    assert!(
        by_stamp
            .as_array()
            .unwrap()
            .iter()
            .any(|i| i["_id"] == george["_id"])
    );

    let stale = get(
        &daemon,
        "apitest",
        &[("created_on", "1999-01-01T00:00:00.000Z")],
    );
    assert_eq!(stale, json!([]));

    let typo = get(&daemon, "apitest", &[("issue_titel", "test issue")]);
    assert_eq!(typo, json!([]));
}

#[test]
fn view_unknown_project() {
    let daemon = start_daemon();
    assert_eq!(
        get(&daemon, "nowhere", &[]),
        json!({"Error": "no such project"})
    );
}

#[test]
fn update_one_field() {
    let daemon = start_daemon();

    let issue = create_basic(&daemon, "apitest", "Vlad");
    let id = extract_id(&issue);

    let resp = put(&daemon, "apitest", json!({"_id": id, "open": false}));
    assert_eq!(resp, json!({"result": "successfully updated", "_id": id}));

    let after = get(&daemon, "apitest", &[("_id", id.as_str())]);
    let after = &after.as_array().unwrap()[0];
    assert_eq!(after["open"], false);
    assert_eq!(after["assigned_to"], "Vlad");
    assert_eq!(after["issue_title"], issue["issue_title"]);
    assert_eq!(after["created_on"], issue["created_on"]);
    assert!(after["updated_on"].as_str().unwrap() > issue["updated_on"].as_str().unwrap());
}

#[test]
fn update_multiple_fields_and_repeat() {
    let daemon = start_daemon();

    let issue = create_basic(&daemon, "apitest", "Vlad");
    let id = extract_id(&issue);
    let patch = json!({"_id": id, "open": "false", "assigned_to": "Estragon"});

    put(&daemon, "apitest", patch.clone());
    let first = get(&daemon, "apitest", &[("_id", id.as_str())])[0].clone();
    assert_eq!(first["open"], false);
    assert_eq!(first["assigned_to"], "Estragon");

    let resp = put(&daemon, "apitest", patch);
    assert_eq!(resp["result"], "successfully updated");
    let second = get(&daemon, "apitest", &[("_id", id.as_str())])[0].clone();
    assert!(second["updated_on"].as_str().unwrap() > first["updated_on"].as_str().unwrap());
}

#[test]
fn update_errors() {
    let daemon = start_daemon();

    let issue = create_basic(&daemon, "apitest", "");
    let id = extract_id(&issue);

    let resp = put(&daemon, "apitest", json!({"issue_title": "no id"}));
    assert_eq!(resp, json!({"error": "missing _id"}));

    let resp = put(&daemon, "apitest", json!({"_id": id, "issue_text": ""}));
    assert_eq!(resp, json!({"error": "no update field(s) sent", "_id": id}));

    let resp = put(
        &daemon,
        "apitest",
        json!({"_id": "peepeepoopoo", "issue_text": "new"}),
    );
    assert_eq!(resp, json!({"error": "could not update", "_id": "peepeepoopoo"}));

    let resp = put(&daemon, "missing-project", json!({"_id": id, "open": "false"}));
    assert_eq!(resp, json!({"error": "could not update", "_id": id}));
}

#[test]
fn delete_lifecycle() {
    let daemon = start_daemon();

    let issue = create_basic(&daemon, "apitest", "");
    let id = extract_id(&issue);

    let resp = expect_json(
        Client::new()
            .delete(daemon.url("apitest"))
            .json(&json!({"_id": id}))
            .send()
            .expect("send DELETE"),
    );
    assert_eq!(resp, json!({"result": "successfully deleted", "_id": id}));

    let after = get(&daemon, "apitest", &[("_id", id.as_str())]);
    assert_eq!(after, json!([]));

    let resp = expect_json(
        Client::new()
            .delete(daemon.url("apitest"))
            .json(&json!({"_id": "peepeepoopoo"}))
            .send()
            .expect("send DELETE"),
    );
    assert_eq!(resp, json!({"error": "could not delete", "_id": "peepeepoopoo"}));

    let resp = expect_json(
        Client::new()
            .delete(daemon.url("apitest"))
            .send()
            .expect("send DELETE"),
    );
    assert_eq!(resp, json!({"error": "missing _id"}));

    // The project outlives its last issue.
    assert_eq!(get(&daemon, "apitest", &[]), json!([]));
}

#[test]
fn malformed_body_gets_json_error() {
    let daemon = start_daemon();

    let resp = expect_json(
        Client::new()
            .post(daemon.url("apitest"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{not json")
            .send()
            .expect("send POST"),
    );
    assert_eq!(resp, json!({"error": "invalid request body"}));
}

#[test]
fn unique_project_names_mode() {
    let daemon = start_daemon_with(&["--project-names", "unique"]);

    create_basic(&daemon, "apitest", "a");
    create_basic(&daemon, "apitest", "b");
    let all = get(&daemon, "apitest", &[]);
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[test]
fn acta_where() {
    let dir = TempDir::new().expect("create temp dir");
    let output = Command::new(acta_bin())
        .args(["where", "--data-dir"])
        .arg(dir.path())
        .output()
        .expect("run acta where");
    assert!(output.status.success(), "acta where should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains(".acta") && stdout.contains("db.sqlite"),
        "acta where should print the store path, got: {stdout}"
    );
}
