use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, org_id, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org = match org_id(req) {
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
    let tests = match store::list_tests(conn, &org, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let marks = match store::list_attendance(conn, &org, None, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let overview = calc::org_overview(&students, &batches, &tests, &marks);
    ok(&req.id, json!({ "overview": overview }))
}

fn handle_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let students = match store::list_students(conn, &org, Some(&batch_id)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let tests = match store::list_tests(conn, &org, Some(&batch_id)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let marks = match store::list_attendance(conn, &org, Some(&batch_id), None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let performance = calc::batch_performance(&students, &tests, &marks);
    ok(&req.id, json!({ "performance": performance }))
}

fn handle_student(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // Tests come from the student's batch; an unassigned student has none.
    let tests = match &student.batch_id {
        Some(bid) => match store::list_tests(conn, &org, Some(bid)) {
            Ok(v) => v,
            Err(e) => return store_err(req, e),
        },
        None => Vec::new(),
    };
    let marks = match store::list_attendance(conn, &org, None, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let performance = calc::student_performance(&student, &tests, &marks);
    ok(&req.id, json!({ "performance": performance }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.overview" => Some(handle_overview(state, req)),
        "analytics.batch" => Some(handle_batch(state, req)),
        "analytics.student" => Some(handle_student(state, req)),
        _ => None,
    }
}
