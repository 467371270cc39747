use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    clock_param, db_conn, optional_str, org_id, parse_date, required_date, required_f64,
    required_str, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::records::FeePayment;
use crate::store;
use rusqlite::types::Value;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn payment_json(p: &FeePayment) -> serde_json::Value {
    json!({
        "id": p.id,
        "studentId": p.student_id,
        "studentName": p.student_name,
        "amount": p.amount,
        "paymentDate": p.payment_date.format("%Y-%m-%d").to_string(),
        "paymentMode": p.payment_mode,
        "monthsCovered": p.months_covered,
        "notes": p.notes,
    })
}

fn handle_ledger(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let now = match clock_param(req, "now") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let students = match store::list_students(conn, &org, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let payments = match store::list_fee_payments(conn, &org, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let mut by_student: HashMap<&str, Vec<&FeePayment>> = HashMap::new();
    for p in &payments {
        by_student.entry(p.student_id.as_str()).or_default().push(p);
    }

    let entries: Vec<calc::FeeLedgerEntry> = students
        .iter()
        .map(|s| {
            let empty = Vec::new();
            let theirs = by_student.get(s.id.as_str()).unwrap_or(&empty);
            calc::fee_ledger_entry(s, theirs, now)
        })
        .collect();
    let summary = calc::fee_summary(&entries, &payments, now);
    ok(&req.id, json!({ "entries": entries, "summary": summary }))
}

fn handle_payments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student = optional_str(req, "studentId");
    match store::list_fee_payments(conn, &org, student.as_deref()) {
        Ok(payments) => ok(
            &req.id,
            json!({ "payments": payments.iter().map(payment_json).collect::<Vec<_>>() }),
        ),
        Err(e) => store_err(req, e),
    }
}

fn months_covered_param(req: &Request) -> Result<Option<String>, serde_json::Value> {
    let Some(v) = req.params.get("monthsCovered") else {
        return Ok(None);
    };
    let Some(arr) = v.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            "monthsCovered must be an array of YYYY-MM strings",
            None,
        ));
    };
    let mut months: Vec<String> = Vec::with_capacity(arr.len());
    for item in arr {
        match item.as_str() {
            Some(s) => months.push(s.to_string()),
            None => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "monthsCovered must be an array of YYYY-MM strings",
                    None,
                ))
            }
        }
    }
    match serde_json::to_string(&months) {
        Ok(s) => Ok(Some(s)),
        Err(e) => Err(err(&req.id, "internal", e.to_string(), None)),
    }
}

fn handle_payments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let amount = match required_f64(req, "amount") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if amount <= 0.0 {
        return err(&req.id, "bad_params", "amount must be positive", None);
    }
    let payment_date = match required_date(req, "paymentDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let months = match months_covered_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO fee_payments(id, organization_id, student_id, amount, payment_date, payment_mode, months_covered, notes)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &org,
            &student_id,
            amount,
            payment_date.format("%Y-%m-%d").to_string(),
            &optional_str(req, "paymentMode"),
            months.as_deref().unwrap_or("[]"),
            &optional_str(req, "notes"),
        ),
    );
    if let Err(e) = inserted {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_fee_payment(conn, &org, &id) {
        Ok(Some(p)) => ok(&req.id, json!({ "payment": payment_json(&p) })),
        Ok(None) => err(&req.id, "db_query_failed", "payment missing after insert", None),
        Err(e) => store_err(req, e),
    }
}

fn handle_payments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let payment_id = match required_str(req, "paymentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_fee_payment(conn, &org, &payment_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("payment not found: {payment_id}"),
                None,
            )
        }
        Err(e) => return store_err(req, e),
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(v) = req.params.get("amount").and_then(|v| v.as_f64()) {
        if v <= 0.0 {
            return err(&req.id, "bad_params", "amount must be positive", None);
        }
        sets.push("amount = ?");
        params.push(Value::from(v));
    }
    if let Some(raw) = optional_str(req, "paymentDate") {
        let d = match parse_date(req, "paymentDate", &raw) {
            Ok(d) => d,
            Err(resp) => return resp,
        };
        sets.push("payment_date = ?");
        params.push(Value::from(d.format("%Y-%m-%d").to_string()));
    }
    if let Some(v) = req.params.get("paymentMode") {
        sets.push("payment_mode = ?");
        params.push(match v.as_str() {
            Some(s) => Value::from(s.to_string()),
            None => Value::Null,
        });
    }
    match months_covered_param(req) {
        Ok(Some(serialized)) => {
            sets.push("months_covered = ?");
            params.push(Value::from(serialized));
        }
        Ok(None) => {}
        Err(resp) => return resp,
    }
    if let Some(v) = req.params.get("notes") {
        sets.push("notes = ?");
        params.push(match v.as_str() {
            Some(s) => Value::from(s.to_string()),
            None => Value::Null,
        });
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let sql = format!(
        "UPDATE fee_payments SET {} WHERE id = ? AND organization_id = ?",
        sets.join(", ")
    );
    params.push(Value::from(payment_id.clone()));
    params.push(Value::from(org.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(params)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_fee_payment(conn, &org, &payment_id) {
        Ok(Some(p)) => ok(&req.id, json!({ "payment": payment_json(&p) })),
        Ok(None) => err(&req.id, "db_query_failed", "payment missing after update", None),
        Err(e) => store_err(req, e),
    }
}

fn handle_payments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let payment_id = match required_str(req, "paymentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_fee_payment(conn, &org, &payment_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("payment not found: {payment_id}"),
                None,
            )
        }
        Err(e) => return store_err(req, e),
    }

    if let Err(e) = conn.execute("DELETE FROM fee_payments WHERE id = ?", [&payment_id]) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": payment_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.ledger" => Some(handle_ledger(state, req)),
        "payments.list" => Some(handle_payments_list(state, req)),
        "payments.create" => Some(handle_payments_create(state, req)),
        "payments.update" => Some(handle_payments_update(state, req)),
        "payments.delete" => Some(handle_payments_delete(state, req)),
        _ => None,
    }
}
