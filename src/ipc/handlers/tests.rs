use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, optional_str, org_id, parse_date, required_date, required_f64, required_str,
    store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::records::{MarkStatus, Test};
use crate::store;
use rusqlite::types::Value;
use serde_json::json;
use uuid::Uuid;

fn test_row_json(t: &Test) -> serde_json::Value {
    let avg_raw = calc::test_raw_average(t);
    json!({
        "id": t.id,
        "batchId": t.batch_id,
        "name": t.name,
        "subject": t.subject,
        "totalMarks": t.total_marks,
        "date": t.date.format("%Y-%m-%d").to_string(),
        "scoresEntered": t.scores_entered,
        "scoreCount": t.scores.len(),
        "avgScore": avg_raw,
        "avgPercent": calc::round_percent(calc::score_percent(avg_raw, t.total_marks)),
    })
}

fn score_rows_json(t: &Test) -> Vec<serde_json::Value> {
    t.scores
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "studentId": s.student_id,
                "marksObtained": s.marks_obtained,
                "status": s.status.as_str(),
            })
        })
        .collect()
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch = optional_str(req, "batchId");
    match store::list_tests(conn, &org, batch.as_deref()) {
        Ok(tests) => ok(
            &req.id,
            json!({ "tests": tests.iter().map(test_row_json).collect::<Vec<_>>() }),
        ),
        Err(e) => store_err(req, e),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch_id = match required_str(req, "batchId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::batch_exists(conn, &org, &batch_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                format!("batch not found: {batch_id}"),
                None,
            )
        }
        Err(e) => return store_err(req, e),
    }
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if name.trim().is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let total_marks = match required_f64(req, "totalMarks") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if total_marks <= 0.0 {
        return err(&req.id, "bad_params", "totalMarks must be positive", None);
    }
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO tests(id, organization_id, batch_id, name, subject, total_marks, date, scores_entered)
         VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
        (
            &id,
            &org,
            &batch_id,
            name.trim(),
            &optional_str(req, "subject"),
            total_marks,
            date.format("%Y-%m-%d").to_string(),
        ),
    );
    if let Err(e) = inserted {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_test(conn, &org, &id) {
        Ok(Some(t)) => ok(&req.id, json!({ "test": test_row_json(&t) })),
        Ok(None) => err(&req.id, "db_query_failed", "test missing after insert", None),
        Err(e) => store_err(req, e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let test_id = match required_str(req, "testId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_test(conn, &org, &test_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(&req.id, "not_found", format!("test not found: {test_id}"), None)
        }
        Err(e) => return store_err(req, e),
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(v) = optional_str(req, "name") {
        if v.trim().is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        sets.push("name = ?");
        params.push(Value::from(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("subject") {
        sets.push("subject = ?");
        params.push(match v.as_str() {
            Some(s) => Value::from(s.to_string()),
            None => Value::Null,
        });
    }
    if let Some(v) = req.params.get("totalMarks").and_then(|v| v.as_f64()) {
        if v <= 0.0 {
            return err(&req.id, "bad_params", "totalMarks must be positive", None);
        }
        sets.push("total_marks = ?");
        params.push(Value::from(v));
    }
    if let Some(raw) = optional_str(req, "date") {
        let d = match parse_date(req, "date", &raw) {
            Ok(d) => d,
            Err(resp) => return resp,
        };
        sets.push("date = ?");
        params.push(Value::from(d.format("%Y-%m-%d").to_string()));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let sql = format!(
        "UPDATE tests SET {} WHERE id = ? AND organization_id = ?",
        sets.join(", ")
    );
    params.push(Value::from(test_id.clone()));
    params.push(Value::from(org.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(params)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_test(conn, &org, &test_id) {
        Ok(Some(t)) => ok(&req.id, json!({ "test": test_row_json(&t) })),
        Ok(None) => err(&req.id, "db_query_failed", "test missing after update", None),
        Err(e) => store_err(req, e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let test_id = match required_str(req, "testId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_test(conn, &org, &test_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(&req.id, "not_found", format!("test not found: {test_id}"), None)
        }
        Err(e) => return store_err(req, e),
    }

    let cleanup = [
        "DELETE FROM test_scores WHERE test_id = ?",
        "DELETE FROM tests WHERE id = ?",
    ];
    for sql in cleanup {
        if let Err(e) = conn.execute(sql, [&test_id]) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "deleted": test_id }))
}

fn handle_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let test_id = match required_str(req, "testId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let test = match store::get_test(conn, &org, &test_id) {
        Ok(Some(t)) => t,
        Ok(None) => {
            return err(&req.id, "not_found", format!("test not found: {test_id}"), None)
        }
        Err(e) => return store_err(req, e),
    };
    let stats = calc::test_detail_stats(&test);
    ok(
        &req.id,
        json!({
            "test": test_row_json(&test),
            "scores": score_rows_json(&test),
            "stats": stats,
        }),
    )
}

fn handle_scores_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let test_id = match required_str(req, "testId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let test = match store::get_test(conn, &org, &test_id) {
        Ok(Some(t)) => t,
        Ok(None) => {
            return err(&req.id, "not_found", format!("test not found: {test_id}"), None)
        }
        Err(e) => return store_err(req, e),
    };
    let Some(entries) = req.params.get("scores").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing scores array", None);
    };

    let mut written = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return err(&req.id, "bad_params", "score entry missing studentId", None);
        };
        match store::student_exists(conn, &org, student_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    format!("student not found: {student_id}"),
                    None,
                )
            }
            Err(e) => return store_err(req, e),
        }
        let status_raw = entry.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let Some(status) = MarkStatus::parse(status_raw) else {
            return err(
                &req.id,
                "bad_params",
                format!("status must be present or absent, got: {status_raw}"),
                None,
            );
        };
        let marks = match status {
            MarkStatus::Absent => None,
            MarkStatus::Present => {
                let m = entry.get("marksObtained").and_then(|v| v.as_f64());
                if let Some(m) = m {
                    if m < 0.0 || m > test.total_marks {
                        return err(
                            &req.id,
                            "bad_params",
                            format!("marksObtained must be between 0 and {}", test.total_marks),
                            None,
                        );
                    }
                }
                m
            }
        };

        let upserted = conn.execute(
            "INSERT INTO test_scores(id, test_id, student_id, marks_obtained, status)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(test_id, student_id)
             DO UPDATE SET marks_obtained = excluded.marks_obtained, status = excluded.status",
            (
                Uuid::new_v4().to_string(),
                &test_id,
                student_id,
                marks,
                status.as_str(),
            ),
        );
        if let Err(e) = upserted {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
        written += 1;
    }

    if let Err(e) = conn.execute(
        "UPDATE tests SET scores_entered = 1 WHERE id = ?",
        [&test_id],
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "testId": test_id, "written": written }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tests.list" => Some(handle_list(state, req)),
        "tests.create" => Some(handle_create(state, req)),
        "tests.update" => Some(handle_update(state, req)),
        "tests.delete" => Some(handle_delete(state, req)),
        "tests.detail" => Some(handle_detail(state, req)),
        "scores.upsert" => Some(handle_scores_upsert(state, req)),
        _ => None,
    }
}
