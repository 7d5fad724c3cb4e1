use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("outcomes.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            target_percentage REAL NOT NULL,
            level1_threshold REAL NOT NULL,
            level2_threshold REAL NOT NULL,
            level3_threshold REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'future',
            program TEXT NOT NULL,
            batch TEXT NOT NULL,
            semester TEXT NOT NULL,
            academic_year TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_outcomes(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            code TEXT NOT NULL,
            description TEXT NOT NULL,
            deleted_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_outcomes_course ON course_outcomes(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_course ON assessments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            label TEXT NOT NULL,
            max_marks INTEGER NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(assessment_id) REFERENCES assessments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_assessment ON questions(assessment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_co_mappings(
            question_id TEXT NOT NULL,
            co_id TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY(question_id, co_id),
            FOREIGN KEY(question_id) REFERENCES questions(id),
            FOREIGN KEY(co_id) REFERENCES course_outcomes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_co_mappings_co ON question_co_mappings(co_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS program_outcomes(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS co_po_mappings(
            co_id TEXT NOT NULL,
            po_id TEXT NOT NULL,
            level INTEGER NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY(co_id, po_id),
            FOREIGN KEY(co_id) REFERENCES course_outcomes(id),
            FOREIGN KEY(po_id) REFERENCES program_outcomes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_co_po_mappings_po ON co_po_mappings(po_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            roll_no TEXT,
            program TEXT NOT NULL,
            batch TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_program_batch ON students(program, batch)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            semester TEXT,
            enrolled_at TEXT,
            deleted_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    // One live enrollment per (student, course); soft-deleted rows may be
    // superseded by a fresh enrollment later.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_unique_active
         ON enrollments(student_id, course_id) WHERE deleted_at IS NULL",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_marks(
            id TEXT PRIMARY KEY,
            question_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            obtained_marks REAL NOT NULL,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            FOREIGN KEY(question_id) REFERENCES questions(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(question_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_marks_question ON student_marks(question_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_marks_student ON student_marks(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_attainments(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            co_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            percentage REAL NOT NULL,
            met_target INTEGER NOT NULL,
            calculated_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(co_id) REFERENCES course_outcomes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(course_id, co_id, student_id, academic_year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_attainments_course ON course_attainments(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_attainments_co ON course_attainments(co_id)",
        [],
    )?;

    // Early workspaces stored students without a roll number. Add if needed.
    ensure_students_roll_no(conn)?;

    Ok(())
}

fn ensure_students_roll_no(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "roll_no")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN roll_no TEXT", [])?;
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
