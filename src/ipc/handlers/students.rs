use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    clock_param, db_conn, optional_str, org_id, parse_date, required_date, required_str, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::records::{FeePayment, Student};
use crate::store;
use rusqlite::types::Value;
use serde_json::json;
use uuid::Uuid;

pub fn student_json(s: &Student) -> serde_json::Value {
    json!({
        "id": s.id,
        "batchId": s.batch_id,
        "batchName": s.batch_name,
        "fullName": s.full_name,
        "phone": s.phone,
        "joiningDate": s.joining_date.format("%Y-%m-%d").to_string(),
        "monthlyFee": s.monthly_fee,
    })
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
    match store::list_students(conn, &org, batch.as_deref()) {
        Ok(students) => ok(
            &req.id,
            json!({ "students": students.iter().map(student_json).collect::<Vec<_>>() }),
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
    match store::org_exists(conn, &org) {
        Ok(true) => {}
        Ok(false) => {
            return err(&req.id, "not_found", format!("organization not found: {org}"), None)
        }
        Err(e) => return store_err(req, e),
    }
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if full_name.trim().is_empty() {
        return err(&req.id, "bad_params", "fullName must not be empty", None);
    }
    let joining_date = match required_date(req, "joiningDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch_id = optional_str(req, "batchId");
    if let Some(bid) = &batch_id {
        match store::batch_exists(conn, &org, bid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", format!("batch not found: {bid}"), None),
            Err(e) => return store_err(req, e),
        }
    }

    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO students(id, organization_id, batch_id, full_name, phone, joining_date)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            &id,
            &org,
            &batch_id,
            full_name.trim(),
            &optional_str(req, "phone"),
            joining_date.format("%Y-%m-%d").to_string(),
        ),
    );
    if let Err(e) = inserted {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_student(conn, &org, &id) {
        Ok(Some(s)) => ok(&req.id, json!({ "student": student_json(&s) })),
        Ok(None) => err(&req.id, "db_query_failed", "student missing after insert", None),
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::student_exists(conn, &org, &student_id) {
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

    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(v) = optional_str(req, "fullName") {
        if v.trim().is_empty() {
            return err(&req.id, "bad_params", "fullName must not be empty", None);
        }
        sets.push("full_name = ?");
        params.push(Value::from(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("phone") {
        sets.push("phone = ?");
        params.push(match v.as_str() {
            Some(s) => Value::from(s.to_string()),
            None => Value::Null,
        });
    }
    // An explicit null batchId detaches the student from their batch.
    if let Some(v) = req.params.get("batchId") {
        match v.as_str() {
            Some(bid) => {
                match store::batch_exists(conn, &org, bid) {
                    Ok(true) => {}
                    Ok(false) => {
                        return err(&req.id, "not_found", format!("batch not found: {bid}"), None)
                    }
                    Err(e) => return store_err(req, e),
                }
                sets.push("batch_id = ?");
                params.push(Value::from(bid.to_string()));
            }
            None => sets.push("batch_id = NULL"),
        }
    }
    if let Some(raw) = optional_str(req, "joiningDate") {
        let d = match parse_date(req, "joiningDate", &raw) {
            Ok(d) => d,
            Err(resp) => return resp,
        };
        sets.push("joining_date = ?");
        params.push(Value::from(d.format("%Y-%m-%d").to_string()));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let sql = format!(
        "UPDATE students SET {} WHERE id = ? AND organization_id = ?",
        sets.join(", ")
    );
    params.push(Value::from(student_id.clone()));
    params.push(Value::from(org.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(params)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_student(conn, &org, &student_id) {
        Ok(Some(s)) => ok(&req.id, json!({ "student": student_json(&s) })),
        Ok(None) => err(&req.id, "db_query_failed", "student missing after update", None),
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::student_exists(conn, &org, &student_id) {
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

    // Dependent rows go first so the foreign keys stay satisfied.
    let cleanup = [
        "DELETE FROM test_scores WHERE student_id = ?",
        "DELETE FROM fee_payments WHERE student_id = ?",
        "DELETE FROM attendance WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ];
    for sql in cleanup {
        if let Err(e) = conn.execute(sql, [&student_id]) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "deleted": student_id }))
}

fn handle_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let today = match clock_param(req, "today") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student = match store::get_student(conn, &org, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("student not found: {student_id}"),
                None,
            )
        }
        Err(e) => return store_err(req, e),
    };
    let payments = match store::list_fee_payments(conn, &org, Some(&student_id)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let payment_refs: Vec<&FeePayment> = payments.iter().collect();
    let ledger = calc::fee_ledger_entry(&student, &payment_refs, today);

    ok(
        &req.id,
        json!({
            "student": student_json(&student),
            "fees": ledger,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        "students.profile" => Some(handle_profile(state, req)),
        _ => None,
    }
}
