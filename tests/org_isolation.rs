use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_coachd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coachd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = request(stdin, reader, id, method, params);
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok for {}: {}",
        method,
        resp
    );
    resp["result"].clone()
}

#[test]
fn organizations_never_see_each_others_records() {
    let workspace = temp_dir("coachd-org-isolation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let org1 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "orgs.create",
        json!({ "name": "North Academy" }),
    )["id"]
        .as_str()
        .expect("org id")
        .to_string();
    let org2 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "orgs.create",
        json!({ "name": "South Academy" }),
    )["id"]
        .as_str()
        .expect("org id")
        .to_string();

    let batch = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "batches.create",
        json!({ "orgId": org1, "name": "Alpha", "monthlyFee": 1000.0 }),
    )["batch"]["id"]
        .as_str()
        .expect("batch id")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({
            "orgId": org1,
            "fullName": "Asha Verma",
            "joiningDate": "2024-01-01",
            "batchId": batch
        }),
    )["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();
    let test_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "tests.create",
        json!({
            "orgId": org1,
            "batchId": batch,
            "name": "Entrance Mock",
            "totalMarks": 100.0,
            "date": "2024-02-01"
        }),
    )["test"]["id"]
        .as_str()
        .expect("test id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "payments.create",
        json!({
            "orgId": org1,
            "studentId": student,
            "amount": 1000.0,
            "paymentDate": "2024-01-05"
        }),
    );

    // The second organization starts blank.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.list",
        json!({ "orgId": org2 }),
    );
    assert_eq!(listed["students"].as_array().expect("students").len(), 0);
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "batches.list",
        json!({ "orgId": org2 }),
    );
    assert_eq!(listed["batches"].as_array().expect("batches").len(), 0);
    let ledger = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "fees.ledger",
        json!({ "orgId": org2, "now": "2024-03-01" }),
    );
    assert_eq!(ledger["entries"].as_array().expect("entries").len(), 0);
    assert_eq!(ledger["summary"]["totalStudents"], 0);
    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "analytics.overview",
        json!({ "orgId": org2 }),
    )["overview"]
        .clone();
    assert_eq!(overview["stats"]["testsCount"], 0);

    // Records from one organization resolve as missing in the other.
    let resp = request(
        &mut stdin,
        &mut reader,
        "12",
        "students.profile",
        json!({ "orgId": org2, "studentId": student }),
    );
    assert_eq!(resp["error"]["code"], "not_found");
    let resp = request(
        &mut stdin,
        &mut reader,
        "13",
        "tests.detail",
        json!({ "orgId": org2, "testId": test_id }),
    );
    assert_eq!(resp["error"]["code"], "not_found");
    let resp = request(
        &mut stdin,
        &mut reader,
        "14",
        "batches.detail",
        json!({ "orgId": org2, "batchId": batch }),
    );
    assert_eq!(resp["error"]["code"], "not_found");
    let resp = request(
        &mut stdin,
        &mut reader,
        "15",
        "students.delete",
        json!({ "orgId": org2, "studentId": student }),
    );
    assert_eq!(resp["error"]["code"], "not_found");

    let resp = request(
        &mut stdin,
        &mut reader,
        "16",
        "students.list",
        json!({ "orgId": "" }),
    );
    assert_eq!(resp["error"]["code"], "bad_params");
    let resp = request(&mut stdin, &mut reader, "17", "students.list", json!({}));
    assert_eq!(resp["error"]["code"], "bad_params");

    // The first organization keeps its single student through all of it.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "students.list",
        json!({ "orgId": org1 }),
    );
    assert_eq!(listed["students"].as_array().expect("students").len(), 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
