use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, optional_date, optional_str, org_id, parse_date, required_date, required_f64,
    required_str, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::records::Expense;
use crate::store;
use rusqlite::types::Value;
use serde_json::json;
use uuid::Uuid;

fn expense_json(e: &Expense) -> serde_json::Value {
    json!({
        "id": e.id,
        "expenseDate": e.expense_date.format("%Y-%m-%d").to_string(),
        "category": e.category,
        "amount": e.amount,
        "paymentMode": e.payment_mode,
        "description": e.description,
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
    let from = match optional_date(req, "from") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to = match optional_date(req, "to") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let expenses = match store::list_expenses(conn, &org, from, to) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let total: f64 = expenses.iter().map(|e| e.amount).sum();
    ok(
        &req.id,
        json!({
            "expenses": expenses.iter().map(expense_json).collect::<Vec<_>>(),
            "total": total,
        }),
    )
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
    let expense_date = match required_date(req, "expenseDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category = match required_str(req, "category") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if category.trim().is_empty() {
        return err(&req.id, "bad_params", "category must not be empty", None);
    }
    let amount = match required_f64(req, "amount") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if amount <= 0.0 {
        return err(&req.id, "bad_params", "amount must be positive", None);
    }

    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO expenses(id, organization_id, expense_date, category, amount, payment_mode, description)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &org,
            expense_date.format("%Y-%m-%d").to_string(),
            category.trim(),
            amount,
            &optional_str(req, "paymentMode"),
            &optional_str(req, "description"),
        ),
    );
    if let Err(e) = inserted {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_expense(conn, &org, &id) {
        Ok(Some(e)) => ok(&req.id, json!({ "expense": expense_json(&e) })),
        Ok(None) => err(&req.id, "db_query_failed", "expense missing after insert", None),
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
    let expense_id = match required_str(req, "expenseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_expense(conn, &org, &expense_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("expense not found: {expense_id}"),
                None,
            )
        }
        Err(e) => return store_err(req, e),
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(raw) = optional_str(req, "expenseDate") {
        let d = match parse_date(req, "expenseDate", &raw) {
            Ok(d) => d,
            Err(resp) => return resp,
        };
        sets.push("expense_date = ?");
        params.push(Value::from(d.format("%Y-%m-%d").to_string()));
    }
    if let Some(v) = optional_str(req, "category") {
        if v.trim().is_empty() {
            return err(&req.id, "bad_params", "category must not be empty", None);
        }
        sets.push("category = ?");
        params.push(Value::from(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("amount").and_then(|v| v.as_f64()) {
        if v <= 0.0 {
            return err(&req.id, "bad_params", "amount must be positive", None);
        }
        sets.push("amount = ?");
        params.push(Value::from(v));
    }
    if let Some(v) = req.params.get("paymentMode") {
        sets.push("payment_mode = ?");
        params.push(match v.as_str() {
            Some(s) => Value::from(s.to_string()),
            None => Value::Null,
        });
    }
    if let Some(v) = req.params.get("description") {
        sets.push("description = ?");
        params.push(match v.as_str() {
            Some(s) => Value::from(s.to_string()),
            None => Value::Null,
        });
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let sql = format!(
        "UPDATE expenses SET {} WHERE id = ? AND organization_id = ?",
        sets.join(", ")
    );
    params.push(Value::from(expense_id.clone()));
    params.push(Value::from(org.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(params)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    match store::get_expense(conn, &org, &expense_id) {
        Ok(Some(e)) => ok(&req.id, json!({ "expense": expense_json(&e) })),
        Ok(None) => err(&req.id, "db_query_failed", "expense missing after update", None),
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
    let expense_id = match required_str(req, "expenseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_expense(conn, &org, &expense_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("expense not found: {expense_id}"),
                None,
            )
        }
        Err(e) => return store_err(req, e),
    }

    if let Err(e) = conn.execute("DELETE FROM expenses WHERE id = ?", [&expense_id]) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": expense_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "expenses.list" => Some(handle_list(state, req)),
        "expenses.create" => Some(handle_create(state, req)),
        "expenses.update" => Some(handle_update(state, req)),
        "expenses.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
