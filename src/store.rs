use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Type, types::Value, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::records::{AttendanceMark, Batch, Expense, FeePayment, MarkStatus, Student, Test, TestScore};

/// Query-layer failure, carried up to the IPC boundary as {code, message}.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub code: &'static str,
    pub message: String,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError {
        code: "db_query_failed",
        message: e.to_string(),
    }
}

/// Every listing is keyed by organization; an empty key would silently match
/// nothing or, worse, be interpolated away by a caller bug upstream. Reject it
/// before touching the database.
pub fn require_org(org_id: &str) -> Result<(), StoreError> {
    if org_id.trim().is_empty() {
        return Err(StoreError {
            code: "bad_params",
            message: "orgId must not be empty".to_string(),
        });
    }
    Ok(())
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
    })
}

fn parse_status(raw: &str) -> rusqlite::Result<MarkStatus> {
    MarkStatus::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("unknown mark status: {raw}").into(),
        )
    })
}

pub fn org_exists(conn: &Connection, org_id: &str) -> Result<bool, StoreError> {
    conn.query_row("SELECT 1 FROM organizations WHERE id = ?", [org_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

pub fn batch_exists(conn: &Connection, org_id: &str, batch_id: &str) -> Result<bool, StoreError> {
    conn.query_row(
        "SELECT 1 FROM batches WHERE id = ? AND organization_id = ?",
        [batch_id, org_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

pub fn student_exists(conn: &Connection, org_id: &str, student_id: &str) -> Result<bool, StoreError> {
    conn.query_row(
        "SELECT 1 FROM students WHERE id = ? AND organization_id = ?",
        [student_id, org_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

pub fn list_students(
    conn: &Connection,
    org_id: &str,
    batch_id: Option<&str>,
) -> Result<Vec<Student>, StoreError> {
    require_org(org_id)?;
    let mut sql = String::from(
        "SELECT s.id, s.batch_id, s.full_name, s.phone, s.joining_date,
                b.name, COALESCE(b.monthly_fee, 0)
         FROM students s
         LEFT JOIN batches b ON b.id = s.batch_id
         WHERE s.organization_id = ?",
    );
    let mut params: Vec<Value> = vec![Value::from(org_id.to_string())];
    if let Some(bid) = batch_id {
        sql.push_str(" AND s.batch_id = ?");
        params.push(Value::from(bid.to_string()));
    }
    sql.push_str(" ORDER BY s.full_name, s.id");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    stmt.query_map(params_from_iter(params), |r| {
        let joining: String = r.get(4)?;
        Ok(Student {
            id: r.get(0)?,
            batch_id: r.get(1)?,
            full_name: r.get(2)?,
            phone: r.get(3)?,
            joining_date: parse_date(&joining)?,
            batch_name: r.get(5)?,
            monthly_fee: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

pub fn get_student(
    conn: &Connection,
    org_id: &str,
    student_id: &str,
) -> Result<Option<Student>, StoreError> {
    require_org(org_id)?;
    conn.query_row(
        "SELECT s.id, s.batch_id, s.full_name, s.phone, s.joining_date,
                b.name, COALESCE(b.monthly_fee, 0)
         FROM students s
         LEFT JOIN batches b ON b.id = s.batch_id
         WHERE s.id = ? AND s.organization_id = ?",
        [student_id, org_id],
        |r| {
            let joining: String = r.get(4)?;
            Ok(Student {
                id: r.get(0)?,
                batch_id: r.get(1)?,
                full_name: r.get(2)?,
                phone: r.get(3)?,
                joining_date: parse_date(&joining)?,
                batch_name: r.get(5)?,
                monthly_fee: r.get(6)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

pub fn list_batches(conn: &Connection, org_id: &str) -> Result<Vec<Batch>, StoreError> {
    require_org(org_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, subject, monthly_fee, capacity, status
             FROM batches
             WHERE organization_id = ?
             ORDER BY name, id",
        )
        .map_err(db_err)?;
    stmt.query_map([org_id], |r| {
        Ok(Batch {
            id: r.get(0)?,
            name: r.get(1)?,
            subject: r.get(2)?,
            monthly_fee: r.get(3)?,
            capacity: r.get(4)?,
            status: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

pub fn get_batch(
    conn: &Connection,
    org_id: &str,
    batch_id: &str,
) -> Result<Option<Batch>, StoreError> {
    require_org(org_id)?;
    conn.query_row(
        "SELECT id, name, subject, monthly_fee, capacity, status
         FROM batches
         WHERE id = ? AND organization_id = ?",
        [batch_id, org_id],
        |r| {
            Ok(Batch {
                id: r.get(0)?,
                name: r.get(1)?,
                subject: r.get(2)?,
                monthly_fee: r.get(3)?,
                capacity: r.get(4)?,
                status: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

fn scores_by_test(
    conn: &Connection,
    org_id: &str,
    batch_id: Option<&str>,
) -> Result<HashMap<String, Vec<TestScore>>, StoreError> {
    let mut sql = String::from(
        "SELECT sc.id, sc.test_id, sc.student_id, sc.marks_obtained, sc.status
         FROM test_scores sc
         JOIN tests t ON t.id = sc.test_id
         WHERE t.organization_id = ?",
    );
    let mut params: Vec<Value> = vec![Value::from(org_id.to_string())];
    if let Some(bid) = batch_id {
        sql.push_str(" AND t.batch_id = ?");
        params.push(Value::from(bid.to_string()));
    }

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(params), |r| {
            let status: String = r.get(4)?;
            Ok(TestScore {
                id: r.get(0)?,
                test_id: r.get(1)?,
                student_id: r.get(2)?,
                marks_obtained: r.get(3)?,
                status: parse_status(&status)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut by_test: HashMap<String, Vec<TestScore>> = HashMap::new();
    for score in rows {
        by_test.entry(score.test_id.clone()).or_default().push(score);
    }
    Ok(by_test)
}

/// Tests come back newest first with their score rows embedded, the shape the
/// engine consumes.
pub fn list_tests(
    conn: &Connection,
    org_id: &str,
    batch_id: Option<&str>,
) -> Result<Vec<Test>, StoreError> {
    require_org(org_id)?;
    let mut sql = String::from(
        "SELECT id, batch_id, name, subject, total_marks, date, scores_entered
         FROM tests
         WHERE organization_id = ?",
    );
    let mut params: Vec<Value> = vec![Value::from(org_id.to_string())];
    if let Some(bid) = batch_id {
        sql.push_str(" AND batch_id = ?");
        params.push(Value::from(bid.to_string()));
    }
    sql.push_str(" ORDER BY date DESC, id");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let mut tests = stmt
        .query_map(params_from_iter(params), |r| {
            let date: String = r.get(5)?;
            Ok(Test {
                id: r.get(0)?,
                batch_id: r.get(1)?,
                name: r.get(2)?,
                subject: r.get(3)?,
                total_marks: r.get(4)?,
                date: parse_date(&date)?,
                scores_entered: r.get::<_, i64>(6)? != 0,
                scores: Vec::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut by_test = scores_by_test(conn, org_id, batch_id)?;
    for test in &mut tests {
        if let Some(scores) = by_test.remove(&test.id) {
            test.scores = scores;
        }
    }
    Ok(tests)
}

pub fn get_test(
    conn: &Connection,
    org_id: &str,
    test_id: &str,
) -> Result<Option<Test>, StoreError> {
    require_org(org_id)?;
    let test = conn
        .query_row(
            "SELECT id, batch_id, name, subject, total_marks, date, scores_entered
             FROM tests
             WHERE id = ? AND organization_id = ?",
            [test_id, org_id],
            |r| {
                let date: String = r.get(5)?;
                Ok(Test {
                    id: r.get(0)?,
                    batch_id: r.get(1)?,
                    name: r.get(2)?,
                    subject: r.get(3)?,
                    total_marks: r.get(4)?,
                    date: parse_date(&date)?,
                    scores_entered: r.get::<_, i64>(6)? != 0,
                    scores: Vec::new(),
                })
            },
        )
        .optional()
        .map_err(db_err)?;
    let Some(mut test) = test else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, test_id, student_id, marks_obtained, status
             FROM test_scores
             WHERE test_id = ?",
        )
        .map_err(db_err)?;
    test.scores = stmt
        .query_map([&test.id], |r| {
            let status: String = r.get(4)?;
            Ok(TestScore {
                id: r.get(0)?,
                test_id: r.get(1)?,
                student_id: r.get(2)?,
                marks_obtained: r.get(3)?,
                status: parse_status(&status)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(Some(test))
}

pub fn list_fee_payments(
    conn: &Connection,
    org_id: &str,
    student_id: Option<&str>,
) -> Result<Vec<FeePayment>, StoreError> {
    require_org(org_id)?;
    let mut sql = String::from(
        "SELECT p.id, p.student_id, p.amount, p.payment_date, p.payment_mode,
                p.months_covered, p.notes, s.full_name
         FROM fee_payments p
         LEFT JOIN students s ON s.id = p.student_id
         WHERE p.organization_id = ?",
    );
    let mut params: Vec<Value> = vec![Value::from(org_id.to_string())];
    if let Some(sid) = student_id {
        sql.push_str(" AND p.student_id = ?");
        params.push(Value::from(sid.to_string()));
    }
    sql.push_str(" ORDER BY p.payment_date DESC, p.id");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    stmt.query_map(params_from_iter(params), |r| {
        let paid_on: String = r.get(3)?;
        let months_raw: String = r.get(5)?;
        Ok(FeePayment {
            id: r.get(0)?,
            student_id: r.get(1)?,
            amount: r.get(2)?,
            payment_date: parse_date(&paid_on)?,
            payment_mode: r.get(4)?,
            months_covered: serde_json::from_str(&months_raw).unwrap_or_default(),
            notes: r.get(6)?,
            student_name: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

pub fn get_fee_payment(
    conn: &Connection,
    org_id: &str,
    payment_id: &str,
) -> Result<Option<FeePayment>, StoreError> {
    require_org(org_id)?;
    conn.query_row(
        "SELECT p.id, p.student_id, p.amount, p.payment_date, p.payment_mode,
                p.months_covered, p.notes, s.full_name
         FROM fee_payments p
         LEFT JOIN students s ON s.id = p.student_id
         WHERE p.id = ? AND p.organization_id = ?",
        [payment_id, org_id],
        |r| {
            let paid_on: String = r.get(3)?;
            let months_raw: String = r.get(5)?;
            Ok(FeePayment {
                id: r.get(0)?,
                student_id: r.get(1)?,
                amount: r.get(2)?,
                payment_date: parse_date(&paid_on)?,
                payment_mode: r.get(4)?,
                months_covered: serde_json::from_str(&months_raw).unwrap_or_default(),
                notes: r.get(6)?,
                student_name: r.get(7)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

pub fn list_attendance(
    conn: &Connection,
    org_id: &str,
    batch_id: Option<&str>,
    date: Option<NaiveDate>,
) -> Result<Vec<AttendanceMark>, StoreError> {
    require_org(org_id)?;
    let mut sql = String::from(
        "SELECT id, batch_id, student_id, date, status
         FROM attendance
         WHERE organization_id = ?",
    );
    let mut params: Vec<Value> = vec![Value::from(org_id.to_string())];
    if let Some(bid) = batch_id {
        sql.push_str(" AND batch_id = ?");
        params.push(Value::from(bid.to_string()));
    }
    if let Some(d) = date {
        sql.push_str(" AND date = ?");
        params.push(Value::from(d.format("%Y-%m-%d").to_string()));
    }
    sql.push_str(" ORDER BY date DESC, student_id");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    stmt.query_map(params_from_iter(params), |r| {
        let on: String = r.get(3)?;
        let status: String = r.get(4)?;
        Ok(AttendanceMark {
            id: r.get(0)?,
            batch_id: r.get(1)?,
            student_id: r.get(2)?,
            date: parse_date(&on)?,
            status: parse_status(&status)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

pub fn get_expense(
    conn: &Connection,
    org_id: &str,
    expense_id: &str,
) -> Result<Option<Expense>, StoreError> {
    require_org(org_id)?;
    conn.query_row(
        "SELECT id, expense_date, category, amount, payment_mode, description
         FROM expenses
         WHERE id = ? AND organization_id = ?",
        [expense_id, org_id],
        |r| {
            let on: String = r.get(1)?;
            Ok(Expense {
                id: r.get(0)?,
                expense_date: parse_date(&on)?,
                category: r.get(2)?,
                amount: r.get(3)?,
                payment_mode: r.get(4)?,
                description: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

pub fn list_expenses(
    conn: &Connection,
    org_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<Expense>, StoreError> {
    require_org(org_id)?;
    let mut sql = String::from(
        "SELECT id, expense_date, category, amount, payment_mode, description
         FROM expenses
         WHERE organization_id = ?",
    );
    let mut params: Vec<Value> = vec![Value::from(org_id.to_string())];
    if let Some(d) = from {
        sql.push_str(" AND expense_date >= ?");
        params.push(Value::from(d.format("%Y-%m-%d").to_string()));
    }
    if let Some(d) = to {
        sql.push_str(" AND expense_date <= ?");
        params.push(Value::from(d.format("%Y-%m-%d").to_string()));
    }
    sql.push_str(" ORDER BY expense_date DESC, id");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    stmt.query_map(params_from_iter(params), |r| {
        let on: String = r.get(1)?;
        Ok(Expense {
            id: r.get(0)?,
            expense_date: parse_date(&on)?,
            category: r.get(2)?,
            amount: r.get(3)?,
            payment_mode: r.get(4)?,
            description: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}
