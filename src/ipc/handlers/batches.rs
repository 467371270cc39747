use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_i64, optional_str, org_id, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::records::Batch;
use crate::store;
use rusqlite::types::Value;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn batch_json(b: &Batch, student_count: usize) -> serde_json::Value {
    json!({
        "id": b.id,
        "name": b.name,
        "subject": b.subject,
        "monthlyFee": b.monthly_fee,
        "capacity": b.capacity,
        "status": b.status,
        "studentCount": student_count,
    })
}

fn enrolled_counts(
    conn: &rusqlite::Connection,
    req: &Request,
    org: &str,
) -> Result<HashMap<String, usize>, serde_json::Value> {
    let students = store::list_students(conn, org, None).map_err(|e| store_err(req, e))?;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for s in students {
        if let Some(bid) = s.batch_id {
            *counts.entry(bid).or_insert(0) += 1;
        }
    }
    Ok(counts)
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
    let batches = match store::list_batches(conn, &org) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let counts = match enrolled_counts(conn, req, &org) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let rows: Vec<serde_json::Value> = batches
        .iter()
        .map(|b| batch_json(b, counts.get(&b.id).copied().unwrap_or(0)))
        .collect();
    ok(&req.id, json!({ "batches": rows }))
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
    match store::org_exists(conn, &org) {
        Ok(true) => {}
        Ok(false) => {
            return err(&req.id, "not_found", format!("organization not found: {org}"), None)
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
    let monthly_fee = req
        .params
        .get("monthlyFee")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    if monthly_fee < 0.0 {
        return err(&req.id, "bad_params", "monthlyFee must not be negative", None);
    }
    let capacity = optional_i64(req, "capacity").unwrap_or(0);
    let status = optional_str(req, "status").unwrap_or_else(|| "Active".to_string());
    if status != "Active" && status != "Inactive" {
        return err(
            &req.id,
            "bad_params",
            "status must be Active or Inactive",
            None,
        );
    }

    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO batches(id, organization_id, name, subject, monthly_fee, capacity, status)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &org,
            name.trim(),
            &optional_str(req, "subject"),
            monthly_fee,
            capacity,
            &status,
        ),
    );
    if let Err(e) = inserted {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_batch(conn, &org, &id) {
        Ok(Some(b)) => ok(&req.id, json!({ "batch": batch_json(&b, 0) })),
        Ok(None) => err(&req.id, "db_query_failed", "batch missing after insert", None),
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
    if let Some(v) = req.params.get("monthlyFee").and_then(|v| v.as_f64()) {
        if v < 0.0 {
            return err(&req.id, "bad_params", "monthlyFee must not be negative", None);
        }
        sets.push("monthly_fee = ?");
        params.push(Value::from(v));
    }
    if let Some(v) = optional_i64(req, "capacity") {
        sets.push("capacity = ?");
        params.push(Value::from(v));
    }
    if let Some(v) = optional_str(req, "status") {
        if v != "Active" && v != "Inactive" {
            return err(
                &req.id,
                "bad_params",
                "status must be Active or Inactive",
                None,
            );
        }
        sets.push("status = ?");
        params.push(Value::from(v));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let sql = format!(
        "UPDATE batches SET {} WHERE id = ? AND organization_id = ?",
        sets.join(", ")
    );
    params.push(Value::from(batch_id.clone()));
    params.push(Value::from(org.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(params)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    let counts = match enrolled_counts(conn, req, &org) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_batch(conn, &org, &batch_id) {
        Ok(Some(b)) => {
            let count = counts.get(&b.id).copied().unwrap_or(0);
            ok(&req.id, json!({ "batch": batch_json(&b, count) }))
        }
        Ok(None) => err(&req.id, "db_query_failed", "batch missing after update", None),
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

    // Detach students, then drop everything recorded against the batch.
    let cleanup = [
        "UPDATE students SET batch_id = NULL WHERE batch_id = ?",
        "DELETE FROM test_scores WHERE test_id IN (SELECT id FROM tests WHERE batch_id = ?)",
        "DELETE FROM tests WHERE batch_id = ?",
        "DELETE FROM attendance WHERE batch_id = ?",
        "DELETE FROM batches WHERE id = ?",
    ];
    for sql in cleanup {
        if let Err(e) = conn.execute(sql, [&batch_id]) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "deleted": batch_id }))
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
    let batch_id = match required_str(req, "batchId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch = match store::get_batch(conn, &org, &batch_id) {
        Ok(Some(b)) => b,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("batch not found: {batch_id}"),
                None,
            )
        }
        Err(e) => return store_err(req, e),
    };
    let students = match store::list_students(conn, &org, Some(&batch_id)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let tests = match store::list_tests(conn, &org, Some(&batch_id)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let student_rows: Vec<serde_json::Value> = students
        .iter()
        .map(super::students::student_json)
        .collect();
    ok(
        &req.id,
        json!({
            "batch": batch_json(&batch, students.len()),
            "students": student_rows,
            "testCount": tests.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batches.list" => Some(handle_list(state, req)),
        "batches.create" => Some(handle_create(state, req)),
        "batches.update" => Some(handle_update(state, req)),
        "batches.delete" => Some(handle_delete(state, req)),
        "batches.detail" => Some(handle_detail(state, req)),
        _ => None,
    }
}
