use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("coach.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS organizations(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            subject TEXT,
            monthly_fee REAL NOT NULL DEFAULT 0,
            capacity INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'Active',
            FOREIGN KEY(organization_id) REFERENCES organizations(id)
        )",
        [],
    )?;
    ensure_batches_status(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batches_org ON batches(organization_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            batch_id TEXT,
            full_name TEXT NOT NULL,
            phone TEXT,
            joining_date TEXT NOT NULL,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_org ON students(organization_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch ON students(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tests(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            name TEXT NOT NULL,
            subject TEXT,
            total_marks REAL NOT NULL,
            date TEXT NOT NULL,
            scores_entered INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    ensure_tests_scores_entered(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tests_org ON tests(organization_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tests_batch ON tests(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_scores(
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            marks_obtained REAL,
            status TEXT NOT NULL,
            FOREIGN KEY(test_id) REFERENCES tests(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(test_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_scores_test ON test_scores(test_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_scores_student ON test_scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            amount REAL NOT NULL,
            payment_date TEXT NOT NULL,
            payment_mode TEXT,
            months_covered TEXT NOT NULL DEFAULT '[]',
            notes TEXT,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_fee_payments_months_covered(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_org ON fee_payments(organization_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_student ON fee_payments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_org ON attendance(organization_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_batch_date ON attendance(batch_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expenses(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            expense_date TEXT NOT NULL,
            category TEXT NOT NULL,
            amount REAL NOT NULL,
            payment_mode TEXT,
            description TEXT,
            FOREIGN KEY(organization_id) REFERENCES organizations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_org_date ON expenses(organization_id, expense_date)",
        [],
    )?;

    Ok(conn)
}

fn ensure_batches_status(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "batches", "status")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE batches ADD COLUMN status TEXT NOT NULL DEFAULT 'Active'",
        [],
    )?;
    Ok(())
}

fn ensure_tests_scores_entered(conn: &Connection) -> anyhow::Result<()> {
    // Older workspaces predate the flag. Add it and backfill from the score
    // rows that already exist.
    if table_has_column(conn, "tests", "scores_entered")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE tests ADD COLUMN scores_entered INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute(
        "UPDATE tests SET scores_entered = 1
         WHERE EXISTS (SELECT 1 FROM test_scores WHERE test_scores.test_id = tests.id)",
        [],
    )?;
    Ok(())
}

fn ensure_fee_payments_months_covered(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "fee_payments", "months_covered")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE fee_payments ADD COLUMN months_covered TEXT NOT NULL DEFAULT '[]'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
