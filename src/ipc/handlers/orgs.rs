use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if name.trim().is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO organizations(id, name) VALUES (?, ?)",
        [&id, name.trim()],
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "id": id, "name": name.trim() }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare("SELECT id, name FROM organizations ORDER BY name, id") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(orgs) => ok(&req.id, json!({ "organizations": orgs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "orgs.create" => Some(handle_create(state, req)),
        "orgs.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
