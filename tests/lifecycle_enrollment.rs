mod test_support;

use serde_json::json;
use test_support::{create_course, create_student, request_ok, state_with_workspace};

fn active_enrollment_count(state: &mut outcomed::ipc::AppState, course_id: &str) -> usize {
    let result = request_ok(
        state,
        "list",
        "enrollment.list",
        json!({ "courseId": course_id }),
    );
    result
        .get("enrollments")
        .and_then(|v| v.as_array())
        .expect("enrollments")
        .len()
}

#[test]
fn activation_enrolls_the_matching_cohort() {
    let mut state = state_with_workspace("outcomed-activation");
    let course_id = create_course(&mut state, "CS301");

    let in_cohort: Vec<String> = ["A", "B", "C"]
        .iter()
        .map(|n| create_student(&mut state, n, "BTech-CSE", "2024"))
        .collect();
    // Wrong batch, wrong program, and inactive students are all out.
    let _ = create_student(&mut state, "OtherBatch", "BTech-CSE", "2025");
    let _ = create_student(&mut state, "OtherProgram", "BTech-ECE", "2024");
    let dropped = create_student(&mut state, "Dropped", "BTech-CSE", "2024");
    let _ = request_ok(
        &mut state,
        "drop",
        "student.setActive",
        json!({ "studentId": dropped, "active": false }),
    );

    let outcome = request_ok(
        &mut state,
        "1",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "active" }),
    );
    assert_eq!(
        outcome.get("previousStatus").and_then(|v| v.as_str()),
        Some("future")
    );
    assert_eq!(outcome.get("status").and_then(|v| v.as_str()), Some("active"));
    assert_eq!(
        outcome.get("enrolledCount").and_then(|v| v.as_u64()),
        Some(3)
    );
    assert_eq!(outcome.get("skippedCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(active_enrollment_count(&mut state, &course_id), 3);

    // New enrollments carry the course's semester label.
    let listed = request_ok(
        &mut state,
        "list",
        "enrollment.list",
        json!({ "courseId": course_id }),
    );
    for row in listed
        .get("enrollments")
        .and_then(|v| v.as_array())
        .expect("enrollments")
    {
        assert_eq!(row.get("semester").and_then(|v| v.as_str()), Some("S1"));
        assert!(in_cohort.iter().any(|sid| {
            row.get("studentId").and_then(|v| v.as_str()) == Some(sid.as_str())
        }));
    }
}

#[test]
fn reactivation_skips_already_enrolled_students() {
    let mut state = state_with_workspace("outcomed-reactivation");
    let course_id = create_course(&mut state, "CS302");
    for n in ["A", "B", "C"] {
        let _ = create_student(&mut state, n, "BTech-CSE", "2024");
    }

    let first = request_ok(
        &mut state,
        "1",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "active" }),
    );
    assert_eq!(first.get("enrolledCount").and_then(|v| v.as_u64()), Some(3));

    // A second activation from active is a plain status write.
    let again = request_ok(
        &mut state,
        "2",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "active" }),
    );
    assert_eq!(again.get("enrolledCount").and_then(|v| v.as_u64()), Some(0));

    // Winding back to future and re-activating must not duplicate anyone.
    let _ = request_ok(
        &mut state,
        "3",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "future" }),
    );
    let replay = request_ok(
        &mut state,
        "4",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "active" }),
    );
    assert_eq!(replay.get("enrolledCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(replay.get("skippedCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(active_enrollment_count(&mut state, &course_id), 3);
}

#[test]
fn activation_with_empty_cohort_succeeds() {
    let mut state = state_with_workspace("outcomed-empty-cohort");
    let course_id = create_course(&mut state, "CS303");

    let outcome = request_ok(
        &mut state,
        "1",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "active" }),
    );
    assert_eq!(outcome.get("status").and_then(|v| v.as_str()), Some("active"));
    assert_eq!(outcome.get("enrolledCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(active_enrollment_count(&mut state, &course_id), 0);
}

#[test]
fn completion_changes_status_only() {
    let mut state = state_with_workspace("outcomed-completion");
    let course_id = create_course(&mut state, "CS304");
    for n in ["A", "B"] {
        let _ = create_student(&mut state, n, "BTech-CSE", "2024");
    }

    let _ = request_ok(
        &mut state,
        "1",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "active" }),
    );
    let done = request_ok(
        &mut state,
        "2",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "completed" }),
    );
    assert_eq!(
        done.get("status").and_then(|v| v.as_str()),
        Some("completed")
    );
    assert_eq!(done.get("enrolledCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(active_enrollment_count(&mut state, &course_id), 2);

    let course = request_ok(
        &mut state,
        "3",
        "course.get",
        json!({ "courseId": course_id }),
    );
    assert_eq!(
        course
            .get("course")
            .and_then(|c| c.get("status"))
            .and_then(|v| v.as_str()),
        Some("completed")
    );
}

#[test]
fn skipping_future_enrolls_nobody() {
    // completed directly from future: permitted, but only future -> active
    // carries the enrollment side effect.
    let mut state = state_with_workspace("outcomed-skip-future");
    let course_id = create_course(&mut state, "CS305");
    let _ = create_student(&mut state, "A", "BTech-CSE", "2024");

    let outcome = request_ok(
        &mut state,
        "1",
        "course.transitionStatus",
        json!({ "courseId": course_id, "status": "completed" }),
    );
    assert_eq!(
        outcome.get("status").and_then(|v| v.as_str()),
        Some("completed")
    );
    assert_eq!(outcome.get("enrolledCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(active_enrollment_count(&mut state, &course_id), 0);
}

#[test]
fn manual_duplicate_enrollment_is_reported_not_failed() {
    let mut state = state_with_workspace("outcomed-manual-duplicate");
    let course_id = create_course(&mut state, "CS306");
    let sid = create_student(&mut state, "A", "BTech-CSE", "2024");

    let first = request_ok(
        &mut state,
        "1",
        "enrollment.create",
        json!({ "studentId": sid, "courseId": course_id }),
    );
    assert_eq!(first.get("created").and_then(|v| v.as_bool()), Some(true));

    let second = request_ok(
        &mut state,
        "2",
        "enrollment.create",
        json!({ "studentId": sid, "courseId": course_id }),
    );
    assert_eq!(second.get("created").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(active_enrollment_count(&mut state, &course_id), 1);
}
