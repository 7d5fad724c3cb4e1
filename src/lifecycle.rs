use rusqlite::Connection;
use serde::Serialize;

use crate::calc::{self, CalcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseStatus {
    Future,
    Active,
    Completed,
}

impl CourseStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "future" => Some(CourseStatus::Future),
            "active" => Some(CourseStatus::Active),
            "completed" => Some(CourseStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CourseStatus::Future => "future",
            CourseStatus::Active => "active",
            CourseStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub course_id: String,
    pub previous_status: String,
    pub status: String,
    pub enrolled_count: usize,
    pub skipped_count: usize,
}

/// Course lifecycle controller. Every transition is a plain status write;
/// only future -> active carries a side effect: bulk enrollment of the
/// course's program/batch cohort. completed has no finalization step.
pub fn transition_course_status(
    conn: &Connection,
    course_id: &str,
    new_status: CourseStatus,
) -> Result<TransitionOutcome, CalcError> {
    let course = calc::load_course(conn, course_id)?;
    let Some(previous) = CourseStatus::parse(&course.status) else {
        return Err(CalcError::new(
            "db_query_failed",
            format!("course has unrecognized status: {}", course.status),
        ));
    };

    conn.execute(
        "UPDATE courses SET status = ? WHERE id = ?",
        (new_status.as_str(), course_id),
    )
    .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;

    let (enrolled_count, skipped_count) =
        if previous == CourseStatus::Future && new_status == CourseStatus::Active {
            bulk_enroll_cohort(conn, &course)?
        } else {
            (0, 0)
        };

    tracing::info!(
        course_id,
        from = previous.as_str(),
        to = new_status.as_str(),
        enrolled_count,
        skipped_count,
        "course status transition"
    );

    Ok(TransitionOutcome {
        course_id: course_id.to_string(),
        previous_status: previous.as_str().to_string(),
        status: new_status.as_str().to_string(),
        enrolled_count,
        skipped_count,
    })
}

/// Enroll every active student of the course's program and batch, tagging
/// rows with the course semester. INSERT OR IGNORE rides the partial
/// unique enrollment index: already-enrolled students are skipped row by
/// row, never failing the batch. Zero eligible students is a success.
fn bulk_enroll_cohort(
    conn: &Connection,
    course: &calc::CourseRow,
) -> Result<(usize, usize), CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM students
             WHERE program = ? AND batch = ? AND active = 1
             ORDER BY id",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let eligible: Vec<String> = stmt
        .query_map((&course.program, &course.batch), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    let enrolled_at = chrono::Utc::now().to_rfc3339();
    let mut enrolled = 0usize;
    let mut skipped = 0usize;
    for student_id in &eligible {
        let enrollment_id = uuid::Uuid::new_v4().to_string();
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO enrollments(
                    id, student_id, course_id, semester, enrolled_at, deleted_at)
                 VALUES(?, ?, ?, ?, ?, NULL)",
                (
                    &enrollment_id,
                    student_id,
                    &course.id,
                    &course.semester,
                    &enrolled_at,
                ),
            )
            .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;
        if inserted > 0 {
            enrolled += 1;
        } else {
            skipped += 1;
        }
    }

    tx.commit()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    Ok((enrolled, skipped))
}
