use crate::auth::{ProfileUpdate, Role};
use crate::db::{
    authenticate_user, change_application_status, create_application, create_feedback,
    create_notification, create_req_course, create_user, delete_feedback, delete_notification,
    delete_req_course, find_application_by_resume, find_user_by_username,
    get_accepted_applications, get_all_applications, get_all_feedback, get_all_req_courses,
    get_application, get_applications_by_username, get_feedback_by_username, get_notification,
    get_notifications_by_role, get_notifications_by_username, get_user, mark_notification_seen,
    update_user_profile,
};
use crate::error::AppError;
use crate::models::{NewApplication, NewFeedback, NewNotification, NewReqCourse, StatusActor};
use crate::test::test_utils::{STANDARD_PASSWORD, TestDbBuilder, create_standard_test_db};

async fn notification_count(pool: &sqlx::Pool<sqlx::Sqlite>) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications")
        .fetch_one(pool)
        .await
        .expect("Failed to count notifications")
}

#[tokio::test]
async fn test_create_user_and_authenticate() {
    let test_db = TestDbBuilder::new()
        .committee("reviewer", Some("Review Er"))
        .build()
        .await
        .expect("Failed to build test database");

    let user = authenticate_user(&test_db.pool, "reviewer", STANDARD_PASSWORD)
        .await
        .expect("Authentication query failed")
        .expect("Credentials should match");

    assert_eq!(user.role, Role::TACommittee);
    assert_eq!(user.name.as_deref(), Some("Review Er"));

    let wrong = authenticate_user(&test_db.pool, "reviewer", "not-the-password")
        .await
        .expect("Authentication query failed");
    assert!(wrong.is_none());

    let unknown = authenticate_user(&test_db.pool, "nobody", STANDARD_PASSWORD)
        .await
        .expect("Authentication query failed");
    assert!(unknown.is_none());
}

#[tokio::test]
async fn test_passwords_are_stored_hashed() {
    let test_db = TestDbBuilder::new()
        .student("hashed", None)
        .build()
        .await
        .expect("Failed to build test database");

    let stored = sqlx::query_scalar::<_, String>("SELECT password FROM users WHERE username = ?")
        .bind("hashed")
        .fetch_one(&test_db.pool)
        .await
        .expect("Failed to read password");

    assert_ne!(stored, STANDARD_PASSWORD);
    assert!(bcrypt::verify(STANDARD_PASSWORD, &stored).expect("Stored value is not a bcrypt hash"));
}

#[tokio::test]
async fn test_duplicate_username_is_rejected() {
    let test_db = TestDbBuilder::new()
        .student("taken", None)
        .build()
        .await
        .expect("Failed to build test database");

    match create_user(&test_db.pool, "taken", "other", Role::Instructor).await {
        Err(AppError::Validation(msg)) => assert_eq!(msg, "User already exists"),
        other => panic!("Expected Validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_duplicate_signup_is_rejected() {
    let test_db = TestDbBuilder::new()
        .build()
        .await
        .expect("Failed to build test database");

    let (first, second) = tokio::join!(
        create_user(&test_db.pool, "dup", "one", Role::Student),
        create_user(&test_db.pool, "dup", "two", Role::Student),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results {
        if let Err(e) = result {
            match e {
                AppError::Validation(msg) => assert_eq!(msg, "User already exists"),
                other => panic!("Expected Validation error, got {:?}", other),
            }
        }
    }
}

#[tokio::test]
async fn test_update_profile_keeps_unspecified_fields() {
    let test_db = TestDbBuilder::new()
        .student("profiled", Some("Original Name"))
        .build()
        .await
        .expect("Failed to build test database");
    let user_id = test_db.user_id("profiled").expect("User not found");

    let updated = update_user_profile(
        &test_db.pool,
        user_id,
        &ProfileUpdate {
            email: Some("p@example.edu".to_string()),
            znumber: Some("Z12345678".to_string()),
            ..Default::default()
        },
    )
    .await
    .expect("Failed to update profile");

    assert_eq!(updated.name.as_deref(), Some("Original Name"));
    assert_eq!(updated.email.as_deref(), Some("p@example.edu"));
    assert_eq!(updated.znumber.as_deref(), Some("Z12345678"));

    let reloaded = get_user(&test_db.pool, user_id).await.expect("Failed to reload");
    assert_eq!(reloaded.email.as_deref(), Some("p@example.edu"));

    let found = find_user_by_username(&test_db.pool, "profiled")
        .await
        .expect("Lookup failed");
    assert_eq!(found.map(|u| u.id), Some(user_id));
}

#[tokio::test]
async fn test_get_missing_user_is_not_found() {
    let test_db = TestDbBuilder::new()
        .build()
        .await
        .expect("Failed to build test database");

    assert!(matches!(
        get_user(&test_db.pool, 999).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_application_courses_start_pending_in_order() {
    let test_db = TestDbBuilder::new()
        .student("applicant", None)
        .build()
        .await
        .expect("Failed to build test database");

    let application = create_application(
        &test_db.pool,
        &NewApplication {
            username: "applicant".to_string(),
            name: "App Licant".to_string(),
            email: Some("a@example.edu".to_string()),
            znumber: None,
            resume: "abc.pdf".to_string(),
            courses: vec!["COP3530".into(), "CDA3101".into(), "COT4400".into()],
        },
    )
    .await
    .expect("Failed to create application");

    assert_eq!(application.eligible_courses(), "COP3530,CDA3101,COT4400");
    assert_eq!(application.status(), "Pending,Pending,Pending");
    assert_eq!(application.username, "applicant");

    let by_user = get_applications_by_username(&test_db.pool, "applicant")
        .await
        .expect("Failed to list applications");
    assert_eq!(by_user.len(), 1);
    assert_eq!(by_user[0].id, application.id);

    let by_resume = find_application_by_resume(&test_db.pool, "abc.pdf")
        .await
        .expect("Lookup failed");
    assert_eq!(by_resume.map(|a| a.id), Some(application.id));

    assert!(
        find_application_by_resume(&test_db.pool, "missing.pdf")
            .await
            .expect("Lookup failed")
            .is_none()
    );
}

#[tokio::test]
async fn test_change_status_touches_only_the_indexed_course() {
    let test_db = create_standard_test_db().await;
    let app_id = test_db.application_ids[0];

    let change = change_application_status(&test_db.pool, app_id, 1, "Rejected", StatusActor::Reviewer)
        .await
        .expect("Failed to change status");

    assert_eq!(change.course, "CDA3101");
    assert_eq!(change.previous_status, "Pending");
    assert_eq!(change.new_status, "Rejected");
    assert!(change.notification_id.is_none());

    let application = get_application(&test_db.pool, app_id)
        .await
        .expect("Failed to load application");
    assert_eq!(application.status(), "Pending,Rejected");
    assert_eq!(notification_count(&test_db.pool).await, 0);
}

#[tokio::test]
async fn test_accepting_notifies_instructors_once() {
    let test_db = create_standard_test_db().await;
    let app_id = test_db.application_ids[0];

    let change = change_application_status(&test_db.pool, app_id, 0, "Accepted", StatusActor::Reviewer)
        .await
        .expect("Failed to change status");

    let notification_id = change.notification_id.expect("Accepting should notify");
    let notification = get_notification(&test_db.pool, notification_id)
        .await
        .expect("Notification should exist");

    assert_eq!(notification.user, Role::Instructor);
    assert_eq!(notification.username, None);
    assert!(!notification.seen);
    assert_eq!(
        notification.message,
        "Student User has accepted the TAship offer for COP3530"
    );
    assert_eq!(notification_count(&test_db.pool).await, 1);
}

#[tokio::test]
async fn test_only_exact_accepted_notifies() {
    let test_db = create_standard_test_db().await;
    let app_id = test_db.application_ids[0];

    for status in ["accepted", "NotAccepted", "Accepted "] {
        let change = change_application_status(&test_db.pool, app_id, 0, status, StatusActor::Reviewer)
            .await
            .expect("Failed to change status");
        assert!(change.notification_id.is_none(), "{status:?} should not notify");
    }

    assert_eq!(notification_count(&test_db.pool).await, 0);
}

#[tokio::test]
async fn test_applicant_may_only_answer_an_offer() {
    let test_db = create_standard_test_db().await;
    let app_id = test_db.application_ids[0];

    for status in ["Accepted", "Offered", "Declined"] {
        assert!(matches!(
            change_application_status(&test_db.pool, app_id, 0, status, StatusActor::Applicant)
                .await,
            Err(AppError::Authorization(_))
        ));
    }
    assert_eq!(notification_count(&test_db.pool).await, 0);

    change_application_status(&test_db.pool, app_id, 0, "Offered", StatusActor::Reviewer)
        .await
        .expect("Reviewer should offer");
    change_application_status(&test_db.pool, app_id, 1, "Offered", StatusActor::Reviewer)
        .await
        .expect("Reviewer should offer");

    assert!(matches!(
        change_application_status(&test_db.pool, app_id, 0, "Rejected", StatusActor::Applicant)
            .await,
        Err(AppError::Authorization(_))
    ));

    let accepted =
        change_application_status(&test_db.pool, app_id, 0, "Accepted", StatusActor::Applicant)
            .await
            .expect("Applicant should accept an offer");
    assert!(accepted.notification_id.is_some());

    change_application_status(&test_db.pool, app_id, 1, "Declined", StatusActor::Applicant)
        .await
        .expect("Applicant should decline an offer");

    let application = get_application(&test_db.pool, app_id)
        .await
        .expect("Failed to load application");
    assert_eq!(application.status(), "Accepted,Declined");
    assert_eq!(notification_count(&test_db.pool).await, 1);
}

#[tokio::test]
async fn test_change_status_rejects_bad_targets() {
    let test_db = create_standard_test_db().await;
    let app_id = test_db.application_ids[0];

    assert!(matches!(
        change_application_status(&test_db.pool, app_id, 2, "Accepted", StatusActor::Reviewer).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        change_application_status(&test_db.pool, app_id, -1, "Accepted", StatusActor::Reviewer).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        change_application_status(&test_db.pool, app_id + 50, 0, "Accepted", StatusActor::Reviewer).await,
        Err(AppError::NotFound(_))
    ));

    let application = get_application(&test_db.pool, app_id)
        .await
        .expect("Failed to load application");
    assert_eq!(application.status(), "Pending,Pending");
    assert_eq!(notification_count(&test_db.pool).await, 0);
}

#[tokio::test]
async fn test_accepted_search_matches_substring_case_insensitively() {
    let test_db = TestDbBuilder::new()
        .student("a", None)
        .student("b", None)
        .student("c", None)
        .student("d", None)
        .application("a", "A", &["COP3530", "CDA3101"])
        .with_status(1, "Accepted")
        .application("b", "B", &["COP3530"])
        .with_status(0, "NotAccepted")
        .application("c", "C", &["COP3530"])
        .application("d", "D", &["COP3530"])
        .with_status(0, "ACCEPTED")
        .build()
        .await
        .expect("Failed to build test database");

    let accepted = get_accepted_applications(&test_db.pool)
        .await
        .expect("Failed to query accepted applications");

    let usernames: Vec<_> = accepted.iter().map(|a| a.username.as_str()).collect();
    assert_eq!(usernames, vec!["a", "b", "d"]);

    let all = get_all_applications(&test_db.pool)
        .await
        .expect("Failed to list applications");
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn test_req_courses_lifecycle() {
    let test_db = TestDbBuilder::new()
        .build()
        .await
        .expect("Failed to build test database");

    let id = create_req_course(
        &test_db.pool,
        &NewReqCourse {
            course_name: "Data Structures".to_string(),
            course_number: "COP3530".to_string(),
            cap: 3,
            cot: "Lab".to_string(),
            len: 20,
        },
    )
    .await
    .expect("Failed to create course");

    let courses = get_all_req_courses(&test_db.pool)
        .await
        .expect("Failed to list courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0].id, id);
    assert_eq!(courses[0].course_number, "COP3530");
    assert_eq!(courses[0].cap, 3);

    delete_req_course(&test_db.pool, id)
        .await
        .expect("Failed to delete course");

    match delete_req_course(&test_db.pool, id).await {
        Err(AppError::NotFound(msg)) => assert_eq!(msg, "Course not found"),
        other => panic!("Expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_feedback_creates_student_notification() {
    let test_db = create_standard_test_db().await;

    let id = create_feedback(
        &test_db.pool,
        &NewFeedback {
            username: "student_user".to_string(),
            name: Some("Student User".to_string()),
            email: None,
            course: "COP3530".to_string(),
            feedback: "Great work".to_string(),
            author: Some("instructor_user".to_string()),
        },
    )
    .await
    .expect("Failed to create feedback");

    let feedback = get_feedback_by_username(&test_db.pool, "student_user")
        .await
        .expect("Failed to list feedback");
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].id, id);
    assert_eq!(feedback[0].author.as_deref(), Some("instructor_user"));

    let notifications = get_notifications_by_username(&test_db.pool, "student_user")
        .await
        .expect("Failed to list notifications");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user, Role::Student);
    assert_eq!(notifications[0].message, "You got feedback for the course COP3530");

    delete_feedback(&test_db.pool, id)
        .await
        .expect("Failed to delete feedback");
    assert!(get_all_feedback(&test_db.pool).await.expect("List failed").is_empty());
    assert!(matches!(
        delete_feedback(&test_db.pool, id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_notifications_by_role_and_seen_flag() {
    let test_db = TestDbBuilder::new()
        .build()
        .await
        .expect("Failed to build test database");

    let broadcast = create_notification(
        &test_db.pool,
        &NewNotification {
            username: None,
            user: Role::TACommittee,
            message: "Review deadline Friday".to_string(),
            seen: false,
        },
    )
    .await
    .expect("Failed to create notification");

    create_notification(
        &test_db.pool,
        &NewNotification {
            username: Some("someone".to_string()),
            user: Role::Student,
            message: "Direct".to_string(),
            seen: true,
        },
    )
    .await
    .expect("Failed to create notification");

    let committee = get_notifications_by_role(&test_db.pool, Role::TACommittee)
        .await
        .expect("Failed to list by role");
    assert_eq!(committee.len(), 1);
    assert_eq!(committee[0].id, broadcast.id);

    mark_notification_seen(&test_db.pool, broadcast.id)
        .await
        .expect("Failed to mark seen");
    let reloaded = get_notification(&test_db.pool, broadcast.id)
        .await
        .expect("Failed to reload");
    assert!(reloaded.seen);

    delete_notification(&test_db.pool, broadcast.id)
        .await
        .expect("Failed to delete");
    match get_notification(&test_db.pool, broadcast.id).await {
        Err(AppError::NotFound(msg)) => assert_eq!(msg, "Notification not found"),
        other => panic!("Expected NotFound, got {:?}", other),
    }
    assert!(matches!(
        delete_notification(&test_db.pool, broadcast.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_deleting_application_removes_its_courses() {
    let test_db = create_standard_test_db().await;
    let app_id = test_db.application_ids[0];

    sqlx::query("DELETE FROM ta_applications WHERE id = ?")
        .bind(app_id)
        .execute(&test_db.pool)
        .await
        .expect("Failed to delete application");

    let remaining = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM application_courses WHERE application_id = ?",
    )
    .bind(app_id)
    .fetch_one(&test_db.pool)
    .await
    .expect("Failed to count courses");

    assert_eq!(remaining, 0);
}
