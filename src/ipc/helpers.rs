use chrono::NaiveDate;
use rusqlite::Connection;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::StoreError;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

/// All org-scoped methods refuse an absent or empty orgId up front.
pub fn org_id(req: &Request) -> Result<String, serde_json::Value> {
    let v = required_str(req, "orgId")?;
    if v.trim().is_empty() {
        return Err(err(&req.id, "bad_params", "orgId must not be empty", None));
    }
    Ok(v)
}

pub fn parse_date(req: &Request, key: &str, raw: &str) -> Result<NaiveDate, serde_json::Value> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            None,
        )
    })
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, serde_json::Value> {
    let raw = required_str(req, key)?;
    parse_date(req, key, &raw)
}

pub fn optional_date(req: &Request, key: &str) -> Result<Option<NaiveDate>, serde_json::Value> {
    match optional_str(req, key) {
        Some(raw) => parse_date(req, key, &raw).map(Some),
        None => Ok(None),
    }
}

/// The computation clock. Callers may pin it with a YYYY-MM-DD param; it
/// defaults to the wall-clock date here so nothing below the handlers ever
/// reads the system time.
pub fn clock_param(req: &Request, key: &str) -> Result<NaiveDate, serde_json::Value> {
    match optional_str(req, key) {
        Some(raw) => parse_date(req, key, &raw),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

pub fn parse_month(req: &Request, raw: &str) -> Result<(i32, u32), serde_json::Value> {
    let bad = || err(&req.id, "bad_params", "month must be YYYY-MM", None);
    let Some((y, m)) = raw.trim().split_once('-') else {
        return Err(bad());
    };
    let year = y.parse::<i32>().map_err(|_| bad())?;
    let month = m.parse::<u32>().map_err(|_| bad())?;
    if !(1..=12).contains(&month) {
        return Err(err(
            &req.id,
            "bad_params",
            "month must be between 01 and 12",
            None,
        ));
    }
    Ok((year, month))
}

pub fn store_err(req: &Request, e: StoreError) -> serde_json::Value {
    err(&req.id, e.code, e.message, None)
}
