//! Fictional sample dataset for the demo. Dates are relative to the day the
//! process seeds, so overdue payments and recent attendance always exist.

use std::time::Instant;

use anyhow::Context;
use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use log::info;
use rusqlite::{params, Connection, Transaction};
use uuid::Uuid;

use crate::calc::round_cents;
use crate::config::PayrollConfig;
use crate::db;

/// Stable ids so a reset reproduces the same records.
fn sid(table: u128, n: u128) -> String {
    Uuid::from_u128(0x6e69_646f_0000_4000_8000_0000_0000_0000 | (table << 32) | n).to_string()
}

const WORKERS: u128 = 1;
const CLASSROOMS: u128 = 2;
const STUDENTS: u128 = 3;
const PARENTS: u128 = 4;
const ENROLLMENTS: u128 = 5;
const EVALUATIONS: u128 = 6;
const GRADES: u128 = 7;
const ATTENDANCE: u128 = 8;
const PAYMENTS: u128 = 9;
const PAYROLL: u128 = 10;
const SCHEDULES: u128 = 11;
const TASKS: u128 = 12;
const ANNOTATIONS: u128 = 13;
const PLANS: u128 = 14;

// (first, last, document, role, specialty, base salary, status)
static WORKER_ROWS: [(&str, &str, &str, &str, Option<&str>, f64, &str); 7] = [
    ("Rosa", "Mendoza", "40112233", "teacher", Some("Early childhood"), 2800.0, "active"),
    ("Carmen", "Huaman", "40223344", "teacher", Some("Music and movement"), 2700.0, "active"),
    ("Lucia", "Vargas", "40334455", "teacher", Some("Early childhood"), 2750.0, "active"),
    ("Jorge", "Salas", "40445566", "assistant", None, 1500.0, "active"),
    ("Elena", "Paredes", "40556677", "director", None, 4200.0, "active"),
    ("Marco", "Rios", "40667788", "admin", None, 2100.0, "active"),
    ("Pedro", "Campos", "40778899", "support", None, 1300.0, "inactive"),
];

// (name, age group, section, shift, capacity, teacher index)
static CLASSROOM_ROWS: [(&str, &str, &str, &str, i64, u128); 3] = [
    ("Patitos", "3 years", "A", "morning", 15, 1),
    ("Conejitos", "4 years", "A", "morning", 18, 2),
    ("Ositos", "5 years", "B", "afternoon", 20, 3),
];

// (first, last, document, birth year offset, gender, classroom index, status)
static STUDENT_ROWS: [(&str, &str, &str, i32, &str, u128, &str); 10] = [
    ("Mateo", "Quispe", "78001001", 3, "male", 1, "active"),
    ("Valentina", "Flores", "78001002", 3, "female", 1, "active"),
    ("Santiago", "Rojas", "78001003", 3, "male", 1, "active"),
    ("Camila", "Torres", "78001004", 4, "female", 2, "active"),
    ("Thiago", "Chavez", "78001005", 4, "male", 2, "active"),
    ("Luciana", "Ramos", "78001006", 4, "female", 2, "active"),
    ("Gael", "Castillo", "78001007", 5, "male", 3, "active"),
    ("Isabella", "Diaz", "78001008", 5, "female", 3, "active"),
    ("Adriana", "Soto", "78001009", 5, "female", 3, "active"),
    ("Bruno", "Medina", "78001010", 5, "male", 0, "withdrawn"),
];

// (first, last, relationship, phone, student indexes)
static PARENT_ROWS: [(&str, &str, &str, &str, &[u128]); 7] = [
    ("Ana", "Quispe", "mother", "987000101", &[1]),
    ("Luis", "Flores", "father", "987000102", &[2]),
    ("Maria", "Rojas", "mother", "987000103", &[3]),
    ("Raul", "Torres", "father", "987000104", &[4, 6]),
    ("Sofia", "Chavez", "mother", "987000105", &[5]),
    ("Carlos", "Castillo", "father", "987000106", &[7]),
    ("Gloria", "Diaz", "guardian", "987000107", &[8, 9]),
];

const COURSES: [&str; 3] = ["Communication", "Mathematics", "Personal Social"];

/// Loads the sample dataset into an empty store.
pub fn seed(conn: &Connection, payroll: &PayrollConfig) -> anyhow::Result<()> {
    let started_at = Instant::now();
    let today = chrono::Local::now().date_naive();
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let tx = conn.unchecked_transaction()?;
    seed_people(&tx, today, &now).context("seed people")?;
    seed_academics(&tx, today, &now).context("seed academics")?;
    seed_finance(&tx, today, &now, payroll).context("seed finance")?;
    seed_operations(&tx, today, &now).context("seed operations")?;
    tx.commit()?;

    let counts = db::table_counts(conn)?;
    let total: i64 = counts.values().filter_map(|v| v.as_i64()).sum();
    info!(
        "event=seed module=seed status=ok records={} duration_ms={}",
        total,
        started_at.elapsed().as_millis()
    );
    Ok(())
}

fn day(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn monday_of(d: NaiveDate) -> NaiveDate {
    d - Duration::days(i64::from(d.weekday().num_days_from_monday()))
}

/// The `n` most recent weekdays up to and including `d`, oldest first.
fn recent_weekdays(d: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(n);
    let mut cur = d;
    while out.len() < n {
        if !matches!(cur.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(cur);
        }
        cur -= Duration::days(1);
    }
    out.reverse();
    out
}

fn seed_people(tx: &Transaction, today: NaiveDate, now: &str) -> anyhow::Result<()> {
    for (i, (first, last, doc, role, specialty, salary, status)) in WORKER_ROWS.iter().enumerate() {
        let hired = today - Months::new(12 * (i as u32 % 3 + 1));
        tx.execute(
            "INSERT INTO workers(id, first_name, last_name, document_number, role, email, phone,
                specialty, hire_date, base_salary, status, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                sid(WORKERS, i as u128 + 1),
                first,
                last,
                doc,
                role,
                format!("{}.{}@nido.example", first.to_lowercase(), last.to_lowercase()),
                format!("9650001{:02}", i + 1),
                specialty,
                day(hired),
                salary,
                status,
                now,
            ],
        )?;
    }

    let year = today.year();
    for (i, (name, age_group, section, shift, capacity, teacher)) in CLASSROOM_ROWS.iter().enumerate() {
        tx.execute(
            "INSERT INTO classrooms(id, name, age_group, section, shift, capacity, teacher_id,
                school_year, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                sid(CLASSROOMS, i as u128 + 1),
                name,
                age_group,
                section,
                shift,
                capacity,
                sid(WORKERS, *teacher),
                year,
                now,
            ],
        )?;
    }

    for (i, (first, last, doc, age, gender, classroom, status)) in STUDENT_ROWS.iter().enumerate() {
        let birth = NaiveDate::from_ymd_opt(year - age, (i as u32 % 12) + 1, 10)
            .context("birth date")?;
        let classroom_id = (*classroom > 0).then(|| sid(CLASSROOMS, *classroom));
        tx.execute(
            "INSERT INTO students(id, first_name, last_name, document_number, birth_date, gender,
                classroom_id, status, address, medical_notes, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                sid(STUDENTS, i as u128 + 1),
                first,
                last,
                doc,
                day(birth),
                gender,
                classroom_id,
                status,
                format!("Av. Los Olivos {}", 100 + i * 7),
                (i == 1).then_some("Allergic to peanuts"),
                now,
            ],
        )?;
    }

    for (i, (first, last, relationship, phone, children)) in PARENT_ROWS.iter().enumerate() {
        let parent_id = sid(PARENTS, i as u128 + 1);
        tx.execute(
            "INSERT INTO parents(id, first_name, last_name, relationship, phone, email,
                created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                parent_id,
                first,
                last,
                relationship,
                phone,
                format!("{}.{}@mail.example", first.to_lowercase(), last.to_lowercase()),
                now,
            ],
        )?;
        for child in children.iter() {
            tx.execute(
                "INSERT INTO student_parents(student_id, parent_id, is_primary) VALUES(?1, ?2, 1)",
                params![sid(STUDENTS, *child), parent_id],
            )?;
        }
    }
    Ok(())
}

fn active_students() -> impl Iterator<Item = (u128, u128)> {
    STUDENT_ROWS
        .iter()
        .enumerate()
        .filter(|(_, s)| s.6 == "active")
        .map(|(i, s)| (i as u128 + 1, s.5))
}

fn seed_academics(tx: &Transaction, today: NaiveDate, now: &str) -> anyhow::Result<()> {
    let year = today.year();
    let school_start = NaiveDate::from_ymd_opt(year, 3, 1).context("school start")?;
    for (n, (student, classroom)) in active_students().enumerate() {
        tx.execute(
            "INSERT INTO enrollments(id, student_id, classroom_id, school_year, status, fee,
                enrolled_at, created_at)
             VALUES(?1, ?2, ?3, ?4, 'active', 450.0, ?5, ?6)",
            params![
                sid(ENROLLMENTS, n as u128 + 1),
                sid(STUDENTS, student),
                sid(CLASSROOMS, classroom),
                year,
                day(school_start.min(today)),
                now,
            ],
        )?;
    }
    tx.execute(
        "INSERT INTO enrollments(id, student_id, classroom_id, school_year, status, fee,
            enrolled_at, created_at)
         VALUES(?1, ?2, ?3, ?4, 'cancelled', 450.0, ?5, ?6)",
        params![
            sid(ENROLLMENTS, 100),
            sid(STUDENTS, 10),
            sid(CLASSROOMS, 3),
            year,
            day(school_start.min(today)),
            now,
        ],
    )?;

    for (i, (_, _, _, _, _, teacher)) in CLASSROOM_ROWS.iter().enumerate() {
        let classroom = i as u128 + 1;
        tx.execute(
            "INSERT INTO evaluations(id, title, course, classroom_id, teacher_id, period, kind,
                date, status, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, 1, 'formative', ?6, 'completed', ?7)",
            params![
                sid(EVALUATIONS, classroom),
                "Counting to ten",
                COURSES[1],
                sid(CLASSROOMS, classroom),
                sid(WORKERS, *teacher),
                day(today - Duration::days(14)),
                now,
            ],
        )?;
    }

    let letters = ["AD", "A", "A", "B", "A", "C", "AD", "B"];
    let mut g = 0u128;
    for (student, classroom) in active_students() {
        let teacher = CLASSROOM_ROWS[(classroom - 1) as usize].5;
        for (c, course) in COURSES.iter().enumerate() {
            g += 1;
            let evaluation = (c == 1).then(|| sid(EVALUATIONS, classroom));
            tx.execute(
                "INSERT INTO grades(id, student_id, classroom_id, course, period, grade, comment,
                    evaluation_id, teacher_id, updated_at)
                 VALUES(?1, ?2, ?3, ?4, 1, ?5, NULL, ?6, ?7, ?8)",
                params![
                    sid(GRADES, g),
                    sid(STUDENTS, student),
                    sid(CLASSROOMS, classroom),
                    course,
                    letters[(g as usize) % letters.len()],
                    evaluation,
                    sid(WORKERS, teacher),
                    now,
                ],
            )?;
        }
    }

    let mut a = 0u128;
    for d in recent_weekdays(today, 5) {
        for (student, classroom) in active_students() {
            a += 1;
            let status = match a % 11 {
                3 => "absent",
                7 => "late",
                10 => "excused",
                _ => "present",
            };
            tx.execute(
                "INSERT INTO attendance(id, student_id, classroom_id, date, status, note, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, NULL, ?6)",
                params![
                    sid(ATTENDANCE, a),
                    sid(STUDENTS, student),
                    sid(CLASSROOMS, classroom),
                    day(d),
                    status,
                    now,
                ],
            )?;
        }
    }
    Ok(())
}

fn seed_finance(
    tx: &Transaction,
    today: NaiveDate,
    now: &str,
    payroll: &PayrollConfig,
) -> anyhow::Result<()> {
    let mut p = 0u128;
    let mut insert = |student: u128,
                      concept: &str,
                      amount: f64,
                      due: NaiveDate,
                      paid: Option<(&str, NaiveDate)>|
     -> anyhow::Result<()> {
        p += 1;
        tx.execute(
            "INSERT INTO payments(id, student_id, concept, description, amount, due_date, status,
                method, paid_at, created_at)
             VALUES(?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                sid(PAYMENTS, p),
                sid(STUDENTS, student),
                concept,
                amount,
                day(due),
                if paid.is_some() { "paid" } else { "pending" },
                paid.map(|(m, _)| m),
                paid.map(|(_, d)| day(d)),
                now,
            ],
        )?;
        Ok(())
    };
    for (student, _) in active_students() {
        insert(
            student,
            "enrollment",
            450.0,
            today - Duration::days(60),
            Some(("transfer", today - Duration::days(62))),
        )?;
        // Every third family is behind on this month's tuition.
        let due = today - Duration::days(if student % 3 == 0 { 10 } else { 0 });
        let paid = (student % 2 == 1).then_some(("cash", today - Duration::days(2)));
        insert(student, "tuition", 350.0, due, paid)?;
        insert(student, "tuition", 350.0, today + Duration::days(30), None)?;
    }

    let last_month = today - Months::new(1);
    let period = last_month.format("%Y-%m").to_string();
    for (i, (_, _, _, _, _, salary, status)) in WORKER_ROWS.iter().enumerate() {
        if *status != "active" {
            continue;
        }
        let deductions = round_cents(salary * payroll.pension_rate);
        tx.execute(
            "INSERT INTO payroll(id, worker_id, period, base_salary, bonuses, deductions, net_pay,
                status, paid_at, created_at)
             VALUES(?1, ?2, ?3, ?4, 0, ?5, ?6, 'paid', ?7, ?8)",
            params![
                sid(PAYROLL, i as u128 + 1),
                sid(WORKERS, i as u128 + 1),
                period,
                salary,
                deductions,
                round_cents(salary - deductions),
                day(last_month.with_day(28).unwrap_or(last_month)),
                now,
            ],
        )?;
    }
    Ok(())
}

fn seed_operations(tx: &Transaction, today: NaiveDate, now: &str) -> anyhow::Result<()> {
    // (classroom, teacher, course, day, start, end)
    let slots = [
        (1, 1, COURSES[0], 1, "08:30", "09:15"),
        (1, 1, COURSES[1], 1, "09:30", "10:15"),
        (2, 2, COURSES[1], 1, "08:30", "09:15"),
        (2, 2, "Music", 3, "10:00", "10:45"),
        (3, 3, COURSES[2], 2, "14:00", "14:45"),
        (3, 2, "Music", 4, "14:00", "14:45"),
    ];
    for (i, (classroom, teacher, course, dow, start, end)) in slots.iter().enumerate() {
        tx.execute(
            "INSERT INTO schedules(id, classroom_id, teacher_id, course, day_of_week, start_time,
                end_time)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sid(SCHEDULES, i as u128 + 1),
                sid(CLASSROOMS, *classroom),
                sid(WORKERS, *teacher),
                course,
                dow,
                start,
                end,
            ],
        )?;
    }

    // (title, classroom, assignee, due in days, priority, status)
    let tasks: [(&str, Option<u128>, Option<u128>, Option<i64>, &str, &str); 4] = [
        ("Prepare spring festival costumes", Some(1), Some(1), Some(7), "high", "in_progress"),
        ("Order art supplies", None, Some(6), Some(3), "medium", "pending"),
        ("Update emergency contact sheets", Some(2), Some(2), None, "low", "pending"),
        ("Send monthly newsletter", None, Some(5), Some(-2), "medium", "completed"),
    ];
    for (i, (title, classroom, assignee, due_in, priority, status)) in tasks.iter().enumerate() {
        tx.execute(
            "INSERT INTO tasks(id, title, description, classroom_id, assignee_id, due_date,
                priority, status, completed_at, created_at, updated_at)
             VALUES(?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                sid(TASKS, i as u128 + 1),
                title,
                classroom.map(|c| sid(CLASSROOMS, c)),
                assignee.map(|w| sid(WORKERS, w)),
                due_in.map(|n| day(today + Duration::days(n))),
                priority,
                status,
                (*status == "completed").then_some(now),
                now,
            ],
        )?;
    }

    // (student, author, kind, category, description, days ago)
    let annotations = [
        (1, 1, "positive", Some("social"), "Shared toys with classmates during free play", 1),
        (4, 2, "observation", Some("health"), "Seemed tired after lunch", 2),
        (7, 3, "negative", Some("behavior"), "Pushed a classmate in line", 3),
        (7, 3, "positive", Some("academic"), "Counted to twenty without help", 0),
    ];
    for (i, (student, author, kind, category, description, ago)) in annotations.iter().enumerate() {
        tx.execute(
            "INSERT INTO annotations(id, student_id, author_id, kind, category, description, date,
                created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sid(ANNOTATIONS, i as u128 + 1),
                sid(STUDENTS, *student),
                sid(WORKERS, *author),
                kind,
                category,
                description,
                day(today - Duration::days(*ago)),
                now,
            ],
        )?;
    }

    let week = monday_of(today);
    // (teacher, classroom, title, week offset, status, activities)
    let plans: [(u128, u128, &str, i64, &str, &[&str]); 3] = [
        (1, 1, "Colors around us", 0, "submitted", &["Color hunt", "Finger painting"]),
        (2, 2, "Numbers and rhythm", 0, "draft", &["Clap and count", "Number songs"]),
        (3, 3, "My family", -1, "approved", &["Family tree drawing", "Show and tell"]),
    ];
    for (i, (teacher, classroom, title, offset, status, activities)) in plans.iter().enumerate() {
        let submitted = (*status != "draft").then_some(now);
        let reviewed = (*status == "approved").then_some(now);
        tx.execute(
            "INSERT INTO lesson_plans(id, teacher_id, classroom_id, title, week_start, objectives,
                activities, resources, status, review_comment, submitted_at, reviewed_at,
                created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, NULL, ?9, ?10, ?11, ?11)",
            params![
                sid(PLANS, i as u128 + 1),
                sid(WORKERS, *teacher),
                sid(CLASSROOMS, *classroom),
                title,
                day(week + Duration::weeks(*offset)),
                format!("Explore {}", title.to_lowercase()),
                serde_json::to_string(activities)?,
                status,
                submitted,
                reviewed,
                now,
            ],
        )?;
    }
    Ok(())
}
