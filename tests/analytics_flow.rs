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
fn analytics_roll_up_batch_student_and_org_views() {
    let workspace = temp_dir("coachd-analytics-flow");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let org = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "orgs.create",
        json!({ "name": "Insight Academy" }),
    )["id"]
        .as_str()
        .expect("org id")
        .to_string();
    let batch = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "batches.create",
        json!({ "orgId": org, "name": "Physics Morning" }),
    )["batch"]["id"]
        .as_str()
        .expect("batch id")
        .to_string();
    let asha = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "orgId": org,
            "fullName": "Asha Verma",
            "joiningDate": "2024-04-01",
            "batchId": batch
        }),
    )["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();
    let bilal = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({
            "orgId": org,
            "fullName": "Bilal Khan",
            "joiningDate": "2024-04-01",
            "batchId": batch
        }),
    )["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();

    let mechanics = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "tests.create",
        json!({
            "orgId": org,
            "batchId": batch,
            "name": "Mechanics Unit Test",
            "subject": "Physics",
            "totalMarks": 100.0,
            "date": "2024-05-01"
        }),
    )["test"]["id"]
        .as_str()
        .expect("test id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "scores.upsert",
        json!({
            "orgId": org,
            "testId": mechanics,
            "scores": [
                { "studentId": asha, "status": "present", "marksObtained": 90.0 },
                { "studentId": bilal, "status": "present", "marksObtained": 20.0 }
            ]
        }),
    );
    let optics = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "tests.create",
        json!({
            "orgId": org,
            "batchId": batch,
            "name": "Optics Unit Test",
            "subject": "Physics",
            "totalMarks": 100.0,
            "date": "2024-05-08"
        }),
    )["test"]["id"]
        .as_str()
        .expect("test id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "scores.upsert",
        json!({
            "orgId": org,
            "testId": optics,
            "scores": [
                { "studentId": asha, "status": "present", "marksObtained": 70.0 },
                { "studentId": bilal, "status": "absent" }
            ]
        }),
    );

    let perf = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "analytics.batch",
        json!({ "orgId": org, "batchId": batch }),
    )["performance"]
        .clone();

    let stats = &perf["stats"];
    assert_eq!(stats["avgScore"], 60);
    assert_eq!(stats["totalTests"], 2);
    assert_eq!(stats["avgAttendance"], 0);
    assert_eq!(stats["topPerformers"], 1);
    assert_eq!(stats["needsAttention"], 1);

    let rankings = perf["rankings"].as_array().expect("rankings");
    assert_eq!(rankings.len(), 2);
    assert_eq!(rankings[0]["rank"], 1);
    assert_eq!(rankings[0]["name"], "Asha Verma");
    assert_eq!(rankings[0]["avgScore"], 80);
    assert_eq!(rankings[0]["testsTaken"], 2);
    assert_eq!(rankings[1]["rank"], 2);
    assert_eq!(rankings[1]["name"], "Bilal Khan");
    assert_eq!(rankings[1]["avgScore"], 20);
    // The absent mark on Optics does not count as a taken test.
    assert_eq!(rankings[1]["testsTaken"], 1);

    let trend = perf["trend"].as_array().expect("trend");
    assert_eq!(trend.len(), 2);
    assert_eq!(trend[0]["name"], "Mechanics ");
    assert_eq!(trend[0]["average"], 55);
    assert_eq!(trend[0]["highest"], 90);
    assert_eq!(trend[0]["lowest"], 20);
    assert_eq!(trend[1]["name"], "Optics Uni");
    assert_eq!(trend[1]["average"], 70);
    assert_eq!(trend[1]["highest"], 70);
    assert_eq!(trend[1]["lowest"], 70);

    let subjects = perf["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0]["subject"], "Physics");
    assert_eq!(subjects[0]["average"], 60);
    assert_eq!(subjects[0]["tests"], 2);

    let grades = perf["gradeDistribution"].as_array().expect("grades");
    assert_eq!(grades.len(), 2);
    assert_eq!(grades[0]["name"], "Grade A");
    assert_eq!(grades[0]["value"], 1);
    assert_eq!(grades[1]["name"], "Grade F");
    assert_eq!(grades[1]["value"], 1);

    let perf = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "analytics.student",
        json!({ "orgId": org, "studentId": asha }),
    )["performance"]
        .clone();
    assert_eq!(perf["stats"]["avgScore"], 80);
    assert_eq!(perf["stats"]["totalTests"], 2);
    assert_eq!(perf["stats"]["passedTests"], 2);
    assert_eq!(perf["stats"]["attendance"], 0);
    assert_eq!(perf["stats"]["improvement"], 0);
    let subjects = perf["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0]["subject"], "Physics");
    assert_eq!(subjects[0]["score"], 80);
    assert_eq!(subjects[0]["fullMark"], 100);
    // Results read newest first.
    let results = perf["results"].as_array().expect("results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["testName"], "Optics Unit Test");
    assert_eq!(results[0]["percent"], 70);
    assert_eq!(results[0]["status"], "passed");
    assert_eq!(results[1]["testName"], "Mechanics Unit Test");
    assert_eq!(results[1]["percent"], 90);
    let trend = perf["trend"].as_array().expect("trend");
    assert_eq!(trend[0]["percent"], 90);
    assert_eq!(trend[1]["percent"], 70);

    let perf = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "analytics.student",
        json!({ "orgId": org, "studentId": bilal }),
    )["performance"]
        .clone();
    assert_eq!(perf["stats"]["avgScore"], 20);
    assert_eq!(perf["stats"]["totalTests"], 1);
    assert_eq!(perf["stats"]["passedTests"], 0);
    let results = perf["results"].as_array().expect("results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["testName"], "Optics Unit Test");
    assert_eq!(results[0]["status"], "absent");
    assert!(results[0]["marksObtained"].is_null());
    assert_eq!(results[0]["percent"], 0);
    assert_eq!(results[1]["testName"], "Mechanics Unit Test");
    assert_eq!(results[1]["status"], "failed");
    assert_eq!(results[1]["percent"], 20);

    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "analytics.overview",
        json!({ "orgId": org }),
    )["overview"]
        .clone();
    assert_eq!(overview["stats"]["avgScore"], 60);
    assert_eq!(overview["stats"]["testsCount"], 2);
    assert_eq!(overview["stats"]["avgAttendance"], 0);
    // 80 misses the org-wide 85 bar.
    assert_eq!(overview["stats"]["topPerformers"], 0);

    let batch_wise = overview["batchWise"].as_array().expect("batchWise");
    assert_eq!(batch_wise.len(), 1);
    assert_eq!(batch_wise[0]["name"], "Physics Morning");
    assert_eq!(batch_wise[0]["average"], 60);
    assert_eq!(batch_wise[0]["students"], 2);

    let top = overview["topPerformers"].as_array().expect("topPerformers");
    assert_eq!(top.len(), 1);
    assert_eq!(top[0]["name"], "Asha Verma");
    assert_eq!(top[0]["avgScore"], 80);

    let low = overview["needsAttention"].as_array().expect("needsAttention");
    assert_eq!(low.len(), 1);
    assert_eq!(low[0]["name"], "Bilal Khan");
    assert_eq!(low[0]["avgScore"], 20);

    // Nobody has an attendance mark yet, so the chart gets its placeholder.
    let dist = overview["attendanceDistribution"]
        .as_array()
        .expect("attendanceDistribution");
    assert_eq!(dist.len(), 1);
    assert_eq!(dist[0]["name"], "No Data");
    assert_eq!(dist[0]["value"], 1);

    let subject_wise = overview["subjectWise"].as_array().expect("subjectWise");
    assert_eq!(subject_wise.len(), 1);
    assert_eq!(subject_wise[0]["subject"], "Physics");
    assert_eq!(subject_wise[0]["average"], 60);

    let resp = request(
        &mut stdin,
        &mut reader,
        "14",
        "analytics.student",
        json!({ "orgId": org, "studentId": "missing" }),
    );
    assert_eq!(resp["error"]["code"], "not_found");
    let resp = request(
        &mut stdin,
        &mut reader,
        "15",
        "analytics.batch",
        json!({ "orgId": org, "batchId": "missing" }),
    );
    assert_eq!(resp["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
