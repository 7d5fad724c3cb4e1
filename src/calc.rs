use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// Two-decimal rounding applied to every percentage leaving this module.
pub fn round_to_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// Course-configured attainment thresholds. The portal the data comes from
/// never validated these, so workspaces could end up with level jumps that
/// made no sense; construction rejects non-monotonic triples instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttainmentThresholds {
    pub level1: f64,
    pub level2: f64,
    pub level3: f64,
}

impl AttainmentThresholds {
    pub fn new(level1: f64, level2: f64, level3: f64) -> Result<Self, String> {
        for (name, v) in [("level1", level1), ("level2", level2), ("level3", level3)] {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(format!("{}Threshold must be in range 0..=100", name));
            }
        }
        if !(level1 < level2 && level2 < level3) {
            return Err("thresholds must satisfy level1 < level2 < level3".to_string());
        }
        Ok(Self {
            level1,
            level2,
            level3,
        })
    }

    /// Inclusive lower bounds; highest qualifying threshold wins.
    pub fn classify(&self, percentage_meeting_target: f64) -> i64 {
        if percentage_meeting_target >= self.level3 {
            3
        } else if percentage_meeting_target >= self.level2 {
            2
        } else if percentage_meeting_target >= self.level1 {
            1
        } else {
            0
        }
    }
}

/// Target evaluator: pure, re-applied on every read so edits to the
/// course's target take effect immediately.
pub fn meets_target(target_percentage: f64, percentage: f64) -> bool {
    percentage >= target_percentage
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub course_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct CourseRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub target_percentage: f64,
    pub thresholds: AttainmentThresholds,
    pub status: String,
    pub program: String,
    pub batch: String,
    pub semester: String,
    pub academic_year: String,
}

#[derive(Debug, Clone)]
struct QuestionRef {
    id: String,
    max_marks: f64,
}

#[derive(Debug, Clone)]
struct CoRow {
    id: String,
    code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCoAttainment {
    pub student_id: String,
    pub co_id: String,
    pub percentage: f64,
    pub met_target: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCoAttainment {
    pub co_id: String,
    pub co_code: String,
    pub total_students: usize,
    pub students_meeting_target: usize,
    pub percentage_meeting_target: f64,
    pub attainment_level: i64,
}

/// One row per active CO in the course summary. COs without a computable
/// result keep their slot with null metrics so report consumers can tell
/// "0% attainment" apart from "nothing to measure".
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoAttainmentSlot {
    pub co_id: String,
    pub co_code: String,
    pub attainment_level: Option<i64>,
    pub percentage_meeting_target: Option<f64>,
    pub students_meeting_target: Option<usize>,
    pub total_students: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAttainmentSummary {
    pub course_id: String,
    pub course_code: String,
    pub course_name: String,
    pub target_percentage: f64,
    pub level1_threshold: f64,
    pub level2_threshold: f64,
    pub level3_threshold: f64,
    pub total_students: usize,
    pub co_attainments: Vec<CoAttainmentSlot>,
    pub overall_attainment_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub rows_upserted: usize,
    pub cos_computed: usize,
    pub cos_without_data: usize,
}

pub fn load_course(conn: &Connection, course_id: &str) -> Result<CourseRow, CalcError> {
    let row: Option<(
        String,
        String,
        f64,
        f64,
        f64,
        f64,
        String,
        String,
        String,
        String,
        String,
    )> = conn
        .query_row(
            "SELECT code, name, target_percentage, level1_threshold, level2_threshold,
                    level3_threshold, status, program, batch, semester, academic_year
             FROM courses
             WHERE id = ?",
            [course_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                    r.get(8)?,
                    r.get(9)?,
                    r.get(10)?,
                ))
            },
        )
        .optional()
        .map_err(CalcError::query)?;
    let Some((code, name, target, t1, t2, t3, status, program, batch, semester, academic_year)) =
        row
    else {
        return Err(CalcError::new("not_found", "course not found"));
    };

    let thresholds = AttainmentThresholds::new(t1, t2, t3)
        .map_err(|msg| CalcError::new("bad_thresholds", msg))?;

    Ok(CourseRow {
        id: course_id.to_string(),
        code,
        name,
        target_percentage: target,
        thresholds,
        status,
        program,
        batch,
        semester,
        academic_year,
    })
}

fn active_cos(conn: &Connection, course_id: &str) -> Result<Vec<CoRow>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, code
             FROM course_outcomes
             WHERE course_id = ? AND deleted_at IS NULL
             ORDER BY code",
        )
        .map_err(CalcError::query)?;
    stmt.query_map([course_id], |r| {
        Ok(CoRow {
            id: r.get(0)?,
            code: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::query)
}

fn co_code(conn: &Connection, course_id: &str, co_id: &str) -> Result<Option<String>, CalcError> {
    conn.query_row(
        "SELECT code FROM course_outcomes
         WHERE id = ? AND course_id = ? AND deleted_at IS NULL",
        (co_id, course_id),
        |r| r.get(0),
    )
    .optional()
    .map_err(CalcError::query)
}

/// Questions of the course's assessments that are actively mapped to the CO.
fn mapped_questions(
    conn: &Connection,
    course_id: &str,
    co_id: &str,
) -> Result<Vec<QuestionRef>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT q.id, q.max_marks
             FROM questions q
             JOIN assessments a ON a.id = q.assessment_id
             JOIN question_co_mappings m ON m.question_id = q.id
             WHERE a.course_id = ? AND m.co_id = ? AND m.deleted_at IS NULL
             ORDER BY a.sort_order, q.sort_order",
        )
        .map_err(CalcError::query)?;
    stmt.query_map((course_id, co_id), |r| {
        Ok(QuestionRef {
            id: r.get(0)?,
            max_marks: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::query)
}

fn active_enrollment_student_ids(
    conn: &Connection,
    course_id: &str,
) -> Result<Vec<String>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id FROM enrollments
             WHERE course_id = ? AND deleted_at IS NULL
             ORDER BY student_id",
        )
        .map_err(CalcError::query)?;
    stmt.query_map([course_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::query)
}

/// One batched read of every mark for the given questions (optionally
/// narrowed to a student set), keyed (question_id, student_id). The old
/// portal re-fetched marks per student; a single IN query plus an
/// in-memory fold replaces that round-trip-per-student pattern.
fn marks_by_pair(
    conn: &Connection,
    question_ids: &[String],
    student_ids: Option<&[String]>,
) -> Result<HashMap<(String, String), f64>, CalcError> {
    let mut out = HashMap::new();
    if question_ids.is_empty() {
        return Ok(out);
    }
    if let Some(students) = student_ids {
        if students.is_empty() {
            return Ok(out);
        }
    }

    let q_placeholders = std::iter::repeat("?")
        .take(question_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let mut sql = format!(
        "SELECT question_id, student_id, obtained_marks
         FROM student_marks
         WHERE question_id IN ({})",
        q_placeholders
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(
        question_ids.len() + student_ids.map(|s| s.len()).unwrap_or(0),
    );
    for id in question_ids {
        bind_values.push(Value::Text(id.clone()));
    }
    if let Some(students) = student_ids {
        let s_placeholders = std::iter::repeat("?")
            .take(students.len())
            .collect::<Vec<_>>()
            .join(",");
        sql.push_str(&format!(" AND student_id IN ({})", s_placeholders));
        for id in students {
            bind_values.push(Value::Text(id.clone()));
        }
    }

    let mut stmt = conn.prepare(&sql).map_err(CalcError::query)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            let question_id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let obtained: f64 = r.get(2)?;
            Ok((question_id, student_id, obtained))
        })
        .map_err(CalcError::query)?;
    for row in rows {
        let (question_id, student_id, obtained) = row.map_err(CalcError::query)?;
        out.insert((question_id, student_id), obtained);
    }
    Ok(out)
}

/// The per-student fold: sum obtained marks over the questions the student
/// actually has a mark for, and max marks over exactly those questions.
/// Unmarked questions contribute to neither side. Returns None when the
/// student has no marks at all or the marked maxima sum to zero.
fn percentage_over_marked(
    questions: &[QuestionRef],
    mark_for_question: impl Fn(&str) -> Option<f64>,
) -> Option<f64> {
    let mut total_obtained = 0.0_f64;
    let mut total_max = 0.0_f64;
    let mut marked = 0usize;

    for q in questions {
        let Some(obtained) = mark_for_question(&q.id) else {
            continue;
        };
        marked += 1;
        total_obtained += obtained;
        total_max += q.max_marks;
    }

    if marked == 0 || total_max <= 0.0 {
        return None;
    }
    Some(round_to_2_decimals(100.0 * total_obtained / total_max))
}

/// Student attainment calculator. Missing data is an absent result, never
/// an error and never a zero.
pub fn compute_student_co_attainment(
    ctx: &CalcContext<'_>,
    co_id: &str,
    student_id: &str,
) -> Result<Option<StudentCoAttainment>, CalcError> {
    let course = load_course(ctx.conn, ctx.course_id)?;
    if co_code(ctx.conn, ctx.course_id, co_id)?.is_none() {
        return Err(CalcError::new("not_found", "course outcome not found"));
    }

    let questions = mapped_questions(ctx.conn, ctx.course_id, co_id)?;
    if questions.is_empty() {
        return Ok(None);
    }

    let question_ids: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
    let students = [student_id.to_string()];
    let marks = marks_by_pair(ctx.conn, &question_ids, Some(&students[..]))?;

    let percentage = percentage_over_marked(&questions, |qid| {
        marks.get(&(qid.to_string(), student_id.to_string())).copied()
    });

    Ok(percentage.map(|percentage| StudentCoAttainment {
        student_id: student_id.to_string(),
        co_id: co_id.to_string(),
        percentage,
        met_target: meets_target(course.target_percentage, percentage),
    }))
}

/// Usable (student_id, percentage) pairs for one CO across the enrolled
/// class; students without data are excluded, not zeroed.
fn co_class_percentages(
    conn: &Connection,
    course_id: &str,
    co_id: &str,
    student_ids: &[String],
) -> Result<Vec<(String, f64)>, CalcError> {
    let questions = mapped_questions(conn, course_id, co_id)?;
    if questions.is_empty() || student_ids.is_empty() {
        return Ok(Vec::new());
    }

    let question_ids: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
    let marks = marks_by_pair(conn, &question_ids, Some(student_ids))?;

    let mut out = Vec::new();
    for sid in student_ids {
        let percentage = percentage_over_marked(&questions, |qid| {
            marks.get(&(qid.to_string(), sid.clone())).copied()
        });
        if let Some(p) = percentage {
            out.push((sid.clone(), p));
        }
    }
    Ok(out)
}

fn class_co_attainment_inner(
    conn: &Connection,
    course: &CourseRow,
    co: &CoRow,
    student_ids: &[String],
) -> Result<Option<ClassCoAttainment>, CalcError> {
    let usable = co_class_percentages(conn, &course.id, &co.id, student_ids)?;
    if usable.is_empty() {
        return Ok(None);
    }

    let meeting = usable
        .iter()
        .filter(|(_, p)| meets_target(course.target_percentage, *p))
        .count();
    let percentage_meeting_target =
        round_to_2_decimals(100.0 * meeting as f64 / usable.len() as f64);

    Ok(Some(ClassCoAttainment {
        co_id: co.id.clone(),
        co_code: co.code.clone(),
        total_students: usable.len(),
        students_meeting_target: meeting,
        percentage_meeting_target,
        attainment_level: course.thresholds.classify(percentage_meeting_target),
    }))
}

/// Class attainment aggregator. None means the CO has nothing to measure:
/// no mapped questions, no enrollments, or no student with a mark.
pub fn compute_class_co_attainment(
    ctx: &CalcContext<'_>,
    co_id: &str,
) -> Result<Option<ClassCoAttainment>, CalcError> {
    let course = load_course(ctx.conn, ctx.course_id)?;
    let Some(code) = co_code(ctx.conn, ctx.course_id, co_id)? else {
        return Err(CalcError::new("not_found", "course outcome not found"));
    };
    let co = CoRow {
        id: co_id.to_string(),
        code,
    };
    let student_ids = active_enrollment_student_ids(ctx.conn, ctx.course_id)?;
    class_co_attainment_inner(ctx.conn, &course, &co, &student_ids)
}

fn check_cancel(cancel: Option<&AtomicBool>) -> Result<(), CalcError> {
    if let Some(flag) = cancel {
        if flag.load(Ordering::Relaxed) {
            return Err(CalcError::new("cancelled", "computation aborted by caller"));
        }
    }
    Ok(())
}

/// Course attainment summarizer: runs the class aggregator over every
/// active CO. Read-only and idempotent; `cancel` is checked between COs
/// so a large run can be abandoned cleanly.
pub fn compute_course_attainment_summary(
    ctx: &CalcContext<'_>,
    cancel: Option<&AtomicBool>,
) -> Result<CourseAttainmentSummary, CalcError> {
    let course = load_course(ctx.conn, ctx.course_id)?;
    let cos = active_cos(ctx.conn, ctx.course_id)?;
    let student_ids = active_enrollment_student_ids(ctx.conn, ctx.course_id)?;

    let mut slots = Vec::with_capacity(cos.len());
    let mut students_with_data: HashSet<String> = HashSet::new();
    let mut computable = 0usize;
    let mut attained = 0usize;

    for co in &cos {
        check_cancel(cancel)?;

        let usable = co_class_percentages(ctx.conn, &course.id, &co.id, &student_ids)?;
        if usable.is_empty() {
            slots.push(CoAttainmentSlot {
                co_id: co.id.clone(),
                co_code: co.code.clone(),
                attainment_level: None,
                percentage_meeting_target: None,
                students_meeting_target: None,
                total_students: None,
            });
            continue;
        }

        let meeting = usable
            .iter()
            .filter(|(_, p)| meets_target(course.target_percentage, *p))
            .count();
        let percentage_meeting_target =
            round_to_2_decimals(100.0 * meeting as f64 / usable.len() as f64);
        let level = course.thresholds.classify(percentage_meeting_target);

        computable += 1;
        if level > 0 {
            attained += 1;
        }
        for (sid, _) in &usable {
            students_with_data.insert(sid.clone());
        }

        slots.push(CoAttainmentSlot {
            co_id: co.id.clone(),
            co_code: co.code.clone(),
            attainment_level: Some(level),
            percentage_meeting_target: Some(percentage_meeting_target),
            students_meeting_target: Some(meeting),
            total_students: Some(usable.len()),
        });
    }

    let overall_attainment_rate = if computable > 0 {
        Some(round_to_2_decimals(
            100.0 * attained as f64 / computable as f64,
        ))
    } else {
        None
    };

    Ok(CourseAttainmentSummary {
        course_id: course.id,
        course_code: course.code,
        course_name: course.name,
        target_percentage: course.target_percentage,
        level1_threshold: course.thresholds.level1,
        level2_threshold: course.thresholds.level2,
        level3_threshold: course.thresholds.level3,
        total_students: students_with_data.len(),
        co_attainments: slots,
        overall_attainment_rate,
    })
}

/// Persist per-student CO results, upserting by the 5-part key. Each row
/// is independently correct, so a cancelled run leaves the rows it already
/// wrote valid and simply stops.
pub fn persist_course_attainment(
    ctx: &CalcContext<'_>,
    academic_year: &str,
    semester: &str,
    cancel: Option<&AtomicBool>,
) -> Result<PersistOutcome, CalcError> {
    let course = load_course(ctx.conn, ctx.course_id)?;
    let cos = active_cos(ctx.conn, ctx.course_id)?;
    let student_ids = active_enrollment_student_ids(ctx.conn, ctx.course_id)?;

    let mut rows_upserted = 0usize;
    let mut cos_computed = 0usize;
    let mut cos_without_data = 0usize;

    for co in &cos {
        check_cancel(cancel)?;

        let usable = co_class_percentages(ctx.conn, &course.id, &co.id, &student_ids)?;
        if usable.is_empty() {
            cos_without_data += 1;
            continue;
        }
        cos_computed += 1;

        let calculated_at = chrono::Utc::now().to_rfc3339();
        for (student_id, percentage) in &usable {
            let met = meets_target(course.target_percentage, *percentage);
            let row_id = uuid::Uuid::new_v4().to_string();
            ctx.conn
                .execute(
                    "INSERT INTO course_attainments(
                        id, course_id, co_id, student_id, academic_year, semester,
                        percentage, met_target, calculated_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(course_id, co_id, student_id, academic_year, semester)
                     DO UPDATE SET
                       percentage = excluded.percentage,
                       met_target = excluded.met_target,
                       calculated_at = excluded.calculated_at",
                    (
                        &row_id,
                        &course.id,
                        &co.id,
                        student_id,
                        academic_year,
                        semester,
                        percentage,
                        met as i64,
                        &calculated_at,
                    ),
                )
                .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;
            rows_upserted += 1;
        }
    }

    tracing::info!(
        course_id = %course.id,
        rows_upserted,
        cos_computed,
        "persisted course attainment"
    );

    Ok(PersistOutcome {
        rows_upserted,
        cos_computed,
        cos_without_data,
    })
}
