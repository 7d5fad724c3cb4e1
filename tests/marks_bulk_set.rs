mod test_support;

use serde_json::json;
use test_support::{request_ok, seed_scenario_course, state_with_workspace};

#[test]
fn bad_rows_are_reported_without_aborting_the_batch() {
    let mut state = state_with_workspace("outcomed-bulk-marks");
    let course = seed_scenario_course(&mut state);

    let result = request_ok(
        &mut state,
        "1",
        "marks.set",
        json!({ "marks": [
            {
                "questionId": course.question_ids[0],
                "studentId": course.student_ids[4],
                "obtainedMarks": 6.0,
                "academicYear": "2025-26",
                "semester": "S1"
            },
            {
                "questionId": course.question_ids[1],
                "studentId": course.student_ids[4],
                "academicYear": "2025-26",
                "semester": "S1"
            },
            {
                "questionId": "no-such-question",
                "studentId": course.student_ids[4],
                "obtainedMarks": 3.0,
                "academicYear": "2025-26",
                "semester": "S1"
            },
            {
                "questionId": course.question_ids[0],
                "studentId": course.student_ids[4],
                "obtainedMarks": -2.0,
                "academicYear": "2025-26",
                "semester": "S1"
            }
        ] }),
    );

    assert_eq!(result.get("updated").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(result.get("rejected").and_then(|v| v.as_u64()), Some(3));

    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .expect("errors");
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[0].get("index").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        errors[1].get("code").and_then(|v| v.as_str()),
        Some("not_found")
    );
    assert_eq!(errors[2].get("index").and_then(|v| v.as_u64()), Some(3));

    // The good row landed: S5 now has data on Q1.
    let attainment = request_ok(
        &mut state,
        "2",
        "attainment.student",
        json!({
            "courseId": course.course_id,
            "coId": course.co1_id,
            "studentId": course.student_ids[4]
        }),
    );
    assert_eq!(
        attainment
            .get("attainment")
            .and_then(|a| a.get("percentage"))
            .and_then(|v| v.as_f64()),
        Some(60.0)
    );
}

#[test]
fn resetting_a_mark_overwrites_the_previous_value() {
    let mut state = state_with_workspace("outcomed-mark-overwrite");
    let course = seed_scenario_course(&mut state);

    let before = request_ok(
        &mut state,
        "1",
        "attainment.student",
        json!({
            "courseId": course.course_id,
            "coId": course.co1_id,
            "studentId": course.student_ids[0]
        }),
    );
    assert_eq!(
        before
            .get("attainment")
            .and_then(|a| a.get("percentage"))
            .and_then(|v| v.as_f64()),
        Some(90.0)
    );

    let set = request_ok(
        &mut state,
        "2",
        "marks.set",
        json!({ "marks": [{
            "questionId": course.question_ids[0],
            "studentId": course.student_ids[0],
            "obtainedMarks": 5.0,
            "academicYear": "2025-26",
            "semester": "S1"
        }] }),
    );
    assert_eq!(set.get("updated").and_then(|v| v.as_u64()), Some(1));

    let after = request_ok(
        &mut state,
        "3",
        "attainment.student",
        json!({
            "courseId": course.course_id,
            "coId": course.co1_id,
            "studentId": course.student_ids[0]
        }),
    );
    assert_eq!(
        after
            .get("attainment")
            .and_then(|a| a.get("percentage"))
            .and_then(|v| v.as_f64()),
        Some(65.0)
    );
}
