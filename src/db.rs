use log::{error, info};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::time::Instant;

/// Tables in dependency order: each table only references tables listed
/// before it.
pub const TABLES: [&str; 16] = [
    "workers",
    "classrooms",
    "students",
    "parents",
    "student_parents",
    "enrollments",
    "evaluations",
    "grades",
    "attendance",
    "payments",
    "payroll",
    "schedules",
    "tasks",
    "annotations",
    "lesson_plans",
    "reports",
];

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS workers(
        id TEXT PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        document_number TEXT UNIQUE,
        role TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        specialty TEXT,
        hire_date TEXT,
        base_salary REAL NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS classrooms(
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        age_group TEXT,
        section TEXT,
        shift TEXT NOT NULL,
        capacity INTEGER NOT NULL,
        teacher_id TEXT,
        school_year INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(teacher_id) REFERENCES workers(id)
    )",
    "CREATE TABLE IF NOT EXISTS students(
        id TEXT PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        document_number TEXT UNIQUE,
        birth_date TEXT,
        gender TEXT,
        classroom_id TEXT,
        status TEXT NOT NULL,
        address TEXT,
        medical_notes TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
    "CREATE TABLE IF NOT EXISTS parents(
        id TEXT PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        document_number TEXT,
        relationship TEXT NOT NULL,
        phone TEXT NOT NULL,
        email TEXT,
        address TEXT,
        occupation TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS student_parents(
        student_id TEXT NOT NULL,
        parent_id TEXT NOT NULL,
        is_primary INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY(student_id, parent_id),
        FOREIGN KEY(student_id) REFERENCES students(id),
        FOREIGN KEY(parent_id) REFERENCES parents(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_student_parents_parent ON student_parents(parent_id)",
    "CREATE TABLE IF NOT EXISTS enrollments(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        classroom_id TEXT NOT NULL,
        school_year INTEGER NOT NULL,
        status TEXT NOT NULL,
        fee REAL NOT NULL DEFAULT 0,
        enrolled_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id),
        FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
    "CREATE INDEX IF NOT EXISTS idx_enrollments_classroom ON enrollments(classroom_id)",
    "CREATE TABLE IF NOT EXISTS evaluations(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        course TEXT NOT NULL,
        classroom_id TEXT NOT NULL,
        teacher_id TEXT,
        period INTEGER NOT NULL,
        kind TEXT NOT NULL,
        date TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
        FOREIGN KEY(teacher_id) REFERENCES workers(id)
    )",
    "CREATE TABLE IF NOT EXISTS grades(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        classroom_id TEXT NOT NULL,
        course TEXT NOT NULL,
        period INTEGER NOT NULL,
        grade TEXT NOT NULL,
        comment TEXT,
        evaluation_id TEXT,
        teacher_id TEXT,
        updated_at TEXT NOT NULL,
        UNIQUE(student_id, course, period),
        FOREIGN KEY(student_id) REFERENCES students(id),
        FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
        FOREIGN KEY(evaluation_id) REFERENCES evaluations(id),
        FOREIGN KEY(teacher_id) REFERENCES workers(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_grades_classroom ON grades(classroom_id, period)",
    "CREATE TABLE IF NOT EXISTS attendance(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        classroom_id TEXT NOT NULL,
        date TEXT NOT NULL,
        status TEXT NOT NULL,
        note TEXT,
        updated_at TEXT NOT NULL,
        UNIQUE(student_id, date),
        FOREIGN KEY(student_id) REFERENCES students(id),
        FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_attendance_classroom_date ON attendance(classroom_id, date)",
    "CREATE TABLE IF NOT EXISTS payments(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        concept TEXT NOT NULL,
        description TEXT,
        amount REAL NOT NULL,
        due_date TEXT NOT NULL,
        status TEXT NOT NULL,
        method TEXT,
        paid_at TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
    "CREATE TABLE IF NOT EXISTS payroll(
        id TEXT PRIMARY KEY,
        worker_id TEXT NOT NULL,
        period TEXT NOT NULL,
        base_salary REAL NOT NULL,
        bonuses REAL NOT NULL DEFAULT 0,
        deductions REAL NOT NULL DEFAULT 0,
        net_pay REAL NOT NULL,
        status TEXT NOT NULL,
        paid_at TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(worker_id, period),
        FOREIGN KEY(worker_id) REFERENCES workers(id)
    )",
    "CREATE TABLE IF NOT EXISTS schedules(
        id TEXT PRIMARY KEY,
        classroom_id TEXT NOT NULL,
        teacher_id TEXT,
        course TEXT NOT NULL,
        day_of_week INTEGER NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
        FOREIGN KEY(teacher_id) REFERENCES workers(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_schedules_day ON schedules(day_of_week, start_time)",
    "CREATE TABLE IF NOT EXISTS tasks(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        classroom_id TEXT,
        assignee_id TEXT,
        due_date TEXT,
        priority TEXT NOT NULL,
        status TEXT NOT NULL,
        completed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
        FOREIGN KEY(assignee_id) REFERENCES workers(id)
    )",
    "CREATE TABLE IF NOT EXISTS annotations(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        author_id TEXT,
        kind TEXT NOT NULL,
        category TEXT,
        description TEXT NOT NULL,
        date TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id),
        FOREIGN KEY(author_id) REFERENCES workers(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_annotations_student ON annotations(student_id)",
    "CREATE TABLE IF NOT EXISTS lesson_plans(
        id TEXT PRIMARY KEY,
        teacher_id TEXT NOT NULL,
        classroom_id TEXT NOT NULL,
        title TEXT NOT NULL,
        week_start TEXT NOT NULL,
        objectives TEXT,
        activities TEXT NOT NULL DEFAULT '[]',
        resources TEXT,
        status TEXT NOT NULL,
        review_comment TEXT,
        submitted_at TEXT,
        reviewed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(teacher_id) REFERENCES workers(id),
        FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
    )",
    "CREATE TABLE IF NOT EXISTS reports(
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        params TEXT NOT NULL,
        data TEXT NOT NULL,
        generated_at TEXT NOT NULL
    )",
];

/// Opens the in-memory store. Nothing survives the process.
/// `fold_case(text)`: Unicode lowercase. SQLite's `LOWER` folds ASCII only.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text = ctx.get::<Option<String>>(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

pub fn open_store() -> anyhow::Result<Connection> {
    let started_at = Instant::now();
    let conn = match Connection::open_in_memory() {
        Ok(conn) => conn,
        Err(e) => {
            error!("event=db_open module=db status=error mode=memory error={e}");
            return Err(e.into());
        }
    };
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    register_functions(&conn)?;
    for stmt in SCHEMA {
        conn.execute(stmt, [])?;
    }
    info!(
        "event=db_open module=db status=ok mode=memory tables={} duration_ms={}",
        TABLES.len(),
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

/// Deletes every row, children before parents.
pub fn clear_all(conn: &Connection) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for table in TABLES.iter().rev() {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }
    tx.commit()?;
    Ok(())
}

pub fn table_counts(conn: &Connection) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let mut out = serde_json::Map::new();
    for table in TABLES {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        out.insert(table.to_string(), n.into());
    }
    Ok(out)
}
