use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    clock_param, db_conn, optional_date, optional_str, org_id, parse_month, required_date,
    required_str, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::records::MarkStatus;
use crate::store;
use serde_json::json;
use uuid::Uuid;

fn mark_json(m: &crate::records::AttendanceMark) -> serde_json::Value {
    json!({
        "id": m.id,
        "batchId": m.batch_id,
        "studentId": m.student_id,
        "date": m.date.format("%Y-%m-%d").to_string(),
        "status": m.status.as_str(),
    })
}

fn handle_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(entries) = req.params.get("marks").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing marks array", None);
    };

    let mut written = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return err(&req.id, "bad_params", "mark entry missing studentId", None);
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

        // One row per student per day, the latest submission wins.
        let upserted = conn.execute(
            "INSERT INTO attendance(id, organization_id, batch_id, student_id, date, status)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date)
             DO UPDATE SET batch_id = excluded.batch_id, status = excluded.status",
            (
                Uuid::new_v4().to_string(),
                &org,
                &batch_id,
                student_id,
                date.format("%Y-%m-%d").to_string(),
                status.as_str(),
            ),
        );
        if let Err(e) = upserted {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
        written += 1;
    }
    ok(
        &req.id,
        json!({
            "batchId": batch_id,
            "date": date.format("%Y-%m-%d").to_string(),
            "written": written,
        }),
    )
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
    let date = match optional_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::list_attendance(conn, &org, batch.as_deref(), date) {
        Ok(marks) => ok(
            &req.id,
            json!({ "marks": marks.iter().map(mark_json).collect::<Vec<_>>() }),
        ),
        Err(e) => store_err(req, e),
    }
}

fn handle_report(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let month_raw = match required_str(req, "month") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (year, month) = match parse_month(req, &month_raw) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let today = match clock_param(req, "today") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let students = match store::list_students(conn, &org, Some(&batch_id)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let marks = match store::list_attendance(conn, &org, Some(&batch_id), None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let report = calc::attendance_month_report(&students, &marks, year, month, today);
    ok(&req.id, json!({ "report": report }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_mark(state, req)),
        "attendance.list" => Some(handle_list(state, req)),
        "attendance.report" => Some(handle_report(state, req)),
        _ => None,
    }
}
