use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{clock_param, db_conn, org_id, store_err};
use crate::ipc::types::{AppState, Request};
use crate::records::FeePayment;
use crate::store;
use serde_json::json;
use std::collections::HashMap;

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let today = match clock_param(req, "today") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let students = match store::list_students(conn, &org, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let batches = match store::list_batches(conn, &org) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let payments = match store::list_fee_payments(conn, &org, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let marks = match store::list_attendance(conn, &org, None, None) {
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
            calc::fee_ledger_entry(s, theirs, today)
        })
        .collect();

    let stats = calc::dashboard_stats(&entries, &batches, &payments, &marks, today);
    ok(&req.id, json!({ "stats": stats }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
