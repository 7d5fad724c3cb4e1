use std::path::PathBuf;

use outcomed::ipc::{self, AppState, Request};
use serde_json::json;

pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
}

pub fn request(
    state: &mut AppState,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    ipc::handle_request(
        state,
        Request {
            id: id.to_string(),
            method: method.to_string(),
            params,
        },
    )
}

pub fn request_ok(
    state: &mut AppState,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = request(state, id, method, params);
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response for {}: {}",
        method,
        resp
    );
    resp.get("result").cloned().expect("result")
}

pub fn state_with_workspace(prefix: &str) -> AppState {
    let workspace = temp_dir(prefix);
    let mut state = AppState {
        workspace: None,
        db: None,
    };
    let _ = request_ok(
        &mut state,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    state
}

/// The reference class used across suites: target 50, thresholds 50/65/80,
/// CO1 mapped to two 10-mark questions, four enrolled students scoring
/// 18/20, 11/20, 9/20 and 14/20, plus a fifth enrolled student with no
/// marks at all.
pub struct ScenarioCourse {
    pub course_id: String,
    pub co1_id: String,
    pub question_ids: Vec<String>,
    pub student_ids: Vec<String>,
}

pub fn create_course(state: &mut AppState, code: &str) -> String {
    let result = request_ok(
        state,
        "course",
        "course.create",
        json!({
            "code": code,
            "name": format!("{} Sample Course", code),
            "targetPercentage": 50.0,
            "level1Threshold": 50.0,
            "level2Threshold": 65.0,
            "level3Threshold": 80.0,
            "program": "BTech-CSE",
            "batch": "2024",
            "semester": "S1",
            "academicYear": "2025-26"
        }),
    );
    result
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string()
}

pub fn create_student(state: &mut AppState, name: &str, program: &str, batch: &str) -> String {
    let result = request_ok(
        state,
        "student",
        "student.create",
        json!({ "name": name, "program": program, "batch": batch }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

pub fn seed_scenario_course(state: &mut AppState) -> ScenarioCourse {
    let course_id = create_course(state, "CS301");

    let co1 = request_ok(
        state,
        "co1",
        "co.create",
        json!({ "courseId": course_id, "code": "CO1", "description": "Apply core concepts" }),
    );
    let co1_id = co1
        .get("coId")
        .and_then(|v| v.as_str())
        .expect("coId")
        .to_string();

    let assessment = request_ok(
        state,
        "assessment",
        "assessment.create",
        json!({ "courseId": course_id, "title": "Midterm" }),
    );
    let assessment_id = assessment
        .get("assessmentId")
        .and_then(|v| v.as_str())
        .expect("assessmentId")
        .to_string();

    let mut question_ids = Vec::new();
    for label in ["Q1", "Q2"] {
        let q = request_ok(
            state,
            label,
            "question.create",
            json!({ "assessmentId": assessment_id, "label": label, "maxMarks": 10 }),
        );
        let qid = q
            .get("questionId")
            .and_then(|v| v.as_str())
            .expect("questionId")
            .to_string();
        let _ = request_ok(
            state,
            "map",
            "question.mapCo",
            json!({ "questionId": qid, "coId": co1_id }),
        );
        question_ids.push(qid);
    }

    let mut student_ids = Vec::new();
    for name in ["S1", "S2", "S3", "S4", "S5"] {
        let sid = create_student(state, name, "BTech-CSE", "2024");
        let _ = request_ok(
            state,
            "enroll",
            "enrollment.create",
            json!({ "studentId": sid, "courseId": course_id }),
        );
        student_ids.push(sid);
    }

    // Per-question marks: S1 = 18/20, S2 = 11/20, S3 = 9/20, S4 = 14/20.
    // S5 stays markless.
    let per_question: [(usize, f64, f64); 4] =
        [(0, 10.0, 8.0), (1, 6.0, 5.0), (2, 5.0, 4.0), (3, 7.0, 7.0)];
    let mut marks = Vec::new();
    for (student_idx, q1, q2) in per_question {
        marks.push(json!({
            "questionId": question_ids[0],
            "studentId": student_ids[student_idx],
            "obtainedMarks": q1,
            "academicYear": "2025-26",
            "semester": "S1"
        }));
        marks.push(json!({
            "questionId": question_ids[1],
            "studentId": student_ids[student_idx],
            "obtainedMarks": q2,
            "academicYear": "2025-26",
            "semester": "S1"
        }));
    }
    let set = request_ok(state, "marks", "marks.set", json!({ "marks": marks }));
    assert_eq!(set.get("updated").and_then(|v| v.as_u64()), Some(8));

    ScenarioCourse {
        course_id,
        co1_id,
        question_ids,
        student_ids,
    }
}
