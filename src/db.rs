use crate::{
    auth::{DbUser, DbUserSession, ProfileUpdate, Role, User, UserSession},
    error::AppError,
    models::{
        ACCEPTED_STATUS, ApplicationCourse, DbApplicationCourse, DbFeedback, DbNotification,
        DbReqCourse, DbTaApplication, Feedback, NewApplication, NewFeedback, NewNotification,
        NewReqCourse, Notification, PENDING_STATUS, ReqCourse, StatusActor, StatusChange,
        TaApplication,
    },
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

const USER_COLUMNS: &str =
    "SELECT id, username, role, name, email, phone_number, joining_date, znumber FROM users";

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!("{USER_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!("{USER_COLUMNS} WHERE username = ?"))
        .bind(username)
        .fetch_optional(pool)
        .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip(pool, password))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: Role,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let already_exists = || AppError::Validation("User already exists".to_string());

    if find_user_by_username(pool, username).await?.is_some() {
        return Err(already_exists());
    }

    let hashed_password = bcrypt::hash(password, HASH_COST)?;

    // A concurrent signup can still win between the lookup and the insert.
    let res = sqlx::query("INSERT INTO users (username, password, role) VALUES (?, ?, ?)")
        .bind(username)
        .bind(hashed_password)
        .bind(role.as_str())
        .execute(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => already_exists(),
            e => AppError::from(e),
        })?;

    Ok(res.last_insert_rowid())
}

/// Returns the user when the password matches, `None` for an unknown
/// username or a wrong password.
#[instrument(skip(pool, password))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, password FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some((id, hashed_password)) = row else {
        return Ok(None);
    };

    match bcrypt::verify(password, &hashed_password) {
        Ok(true) => Ok(Some(get_user(pool, id).await?)),
        _ => Ok(None),
    }
}

#[instrument(skip(pool, update))]
pub async fn update_user_profile(
    pool: &Pool<Sqlite>,
    user_id: i64,
    update: &ProfileUpdate,
) -> Result<User, AppError> {
    info!("Updating user profile");
    let res = sqlx::query(
        "UPDATE users
         SET name = COALESCE(?, name),
             email = COALESCE(?, email),
             phone_number = COALESCE(?, phone_number),
             joining_date = COALESCE(?, joining_date),
             znumber = COALESCE(?, znumber)
         WHERE id = ?",
    )
    .bind(update.name.as_deref())
    .bind(update.email.as_deref())
    .bind(update.phone_number.as_deref())
    .bind(update.joining_date.as_deref())
    .bind(update.znumber.as_deref())
    .bind(user_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    get_user(pool, user_id).await
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res =
        sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .execute(pool)
            .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

/// Removes one token from the user's active sessions. Other devices keep
/// theirs.
#[instrument(skip(pool, token))]
pub async fn invalidate_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
) -> Result<u64, AppError> {
    info!("Invalidating session");

    let res = sqlx::query("DELETE FROM user_sessions WHERE user_id = ? AND token = ?")
        .bind(user_id)
        .bind(token)
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

async fn load_application_courses(
    pool: &Pool<Sqlite>,
    application_id: i64,
) -> Result<Vec<ApplicationCourse>, AppError> {
    let rows = sqlx::query_as::<_, DbApplicationCourse>(
        "SELECT course, status FROM application_courses
         WHERE application_id = ?
         ORDER BY position",
    )
    .bind(application_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ApplicationCourse::from).collect())
}

async fn attach_courses(
    pool: &Pool<Sqlite>,
    rows: Vec<DbTaApplication>,
) -> Result<Vec<TaApplication>, AppError> {
    let mut applications = Vec::with_capacity(rows.len());
    for row in rows {
        let courses = load_application_courses(pool, row.id.unwrap_or_default()).await?;
        applications.push(row.with_courses(courses));
    }
    Ok(applications)
}

#[instrument(skip(pool, application), fields(username = %application.username))]
pub async fn create_application(
    pool: &Pool<Sqlite>,
    application: &NewApplication,
) -> Result<TaApplication, AppError> {
    info!(courses = application.courses.len(), "Creating TA application");

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO ta_applications (username, name, email, znumber, resume)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&application.username)
    .bind(&application.name)
    .bind(application.email.as_deref())
    .bind(application.znumber.as_deref())
    .bind(&application.resume)
    .execute(&mut *tx)
    .await?;

    let application_id = res.last_insert_rowid();

    for (position, course) in application.courses.iter().enumerate() {
        sqlx::query(
            "INSERT INTO application_courses (application_id, position, course, status)
             VALUES (?, ?, ?, ?)",
        )
        .bind(application_id)
        .bind(position as i64)
        .bind(course)
        .bind(PENDING_STATUS)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    get_application(pool, application_id).await
}

#[instrument(skip(pool))]
pub async fn get_application(pool: &Pool<Sqlite>, id: i64) -> Result<TaApplication, AppError> {
    info!("Getting TA application");
    let row = sqlx::query_as::<_, DbTaApplication>("SELECT * FROM ta_applications WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let courses = load_application_courses(pool, id).await?;
            Ok(row.with_courses(courses))
        }
        _ => Err(AppError::NotFound(format!("Application {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn get_all_applications(pool: &Pool<Sqlite>) -> Result<Vec<TaApplication>, AppError> {
    info!("Getting all TA applications");
    let rows = sqlx::query_as::<_, DbTaApplication>("SELECT * FROM ta_applications ORDER BY id")
        .fetch_all(pool)
        .await?;

    attach_courses(pool, rows).await
}

#[instrument(skip(pool))]
pub async fn get_applications_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Vec<TaApplication>, AppError> {
    info!("Getting TA applications for user");
    let rows = sqlx::query_as::<_, DbTaApplication>(
        "SELECT * FROM ta_applications WHERE username = ? ORDER BY id",
    )
    .bind(username)
    .fetch_all(pool)
    .await?;

    attach_courses(pool, rows).await
}

/// Applications where any course status contains "accepted", compared case
/// insensitively as a substring. "NotAccepted" therefore matches as well.
#[instrument(skip(pool))]
pub async fn get_accepted_applications(
    pool: &Pool<Sqlite>,
) -> Result<Vec<TaApplication>, AppError> {
    info!("Getting accepted TA applications");
    let rows = sqlx::query_as::<_, DbTaApplication>(
        "SELECT a.* FROM ta_applications a
         WHERE EXISTS (
             SELECT 1 FROM application_courses c
             WHERE c.application_id = a.id AND c.status LIKE '%accepted%'
         )
         ORDER BY a.id",
    )
    .fetch_all(pool)
    .await?;

    attach_courses(pool, rows).await
}

#[instrument(skip(pool))]
pub async fn find_application_by_resume(
    pool: &Pool<Sqlite>,
    resume: &str,
) -> Result<Option<TaApplication>, AppError> {
    info!("Finding TA application by resume");
    let row = sqlx::query_as::<_, DbTaApplication>(
        "SELECT * FROM ta_applications WHERE resume = ? LIMIT 1",
    )
    .bind(resume)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let courses = load_application_courses(pool, row.id.unwrap_or_default()).await?;
            Ok(Some(row.with_courses(courses)))
        }
        None => Ok(None),
    }
}

/// Sets the status of the course at `index` and, when the new status is
/// exactly "Accepted", tells every instructor about it. Both writes commit
/// together or not at all. An applicant may only move an `Offered` course
/// to `Accepted` or `Declined`.
#[instrument(skip(pool))]
pub async fn change_application_status(
    pool: &Pool<Sqlite>,
    application_id: i64,
    index: i64,
    new_status: &str,
    actor: StatusActor,
) -> Result<StatusChange, AppError> {
    info!("Changing application status");

    if index < 0 {
        return Err(AppError::Validation(format!(
            "Course index {} is out of range",
            index
        )));
    }

    let mut tx = pool.begin().await?;

    let applicant =
        sqlx::query_scalar::<_, String>("SELECT name FROM ta_applications WHERE id = ?")
            .bind(application_id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some(applicant) = applicant else {
        return Err(AppError::NotFound(format!(
            "Application {} not found",
            application_id
        )));
    };

    let current = sqlx::query_as::<_, DbApplicationCourse>(
        "SELECT course, status FROM application_courses
         WHERE application_id = ? AND position = ?",
    )
    .bind(application_id)
    .bind(index)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(current) = current.map(ApplicationCourse::from) else {
        return Err(AppError::Validation(format!(
            "Course index {} is out of range",
            index
        )));
    };

    if !actor.may_change(&current.status, new_status) {
        return Err(AppError::Authorization(format!(
            "Cannot change {} from {} to {}",
            current.course, current.status, new_status
        )));
    }

    sqlx::query(
        "UPDATE application_courses SET status = ?
         WHERE application_id = ? AND position = ?",
    )
    .bind(new_status)
    .bind(application_id)
    .bind(index)
    .execute(&mut *tx)
    .await?;

    let notification_id = if new_status == ACCEPTED_STATUS {
        let notification = NewNotification::offer_accepted(&applicant, &current.course);
        Some(insert_notification(&mut tx, &notification).await?)
    } else {
        None
    };

    tx.commit().await?;

    Ok(StatusChange {
        application_id,
        course: current.course,
        previous_status: current.status,
        new_status: new_status.to_string(),
        notification_id,
    })
}

#[instrument(skip(pool, course), fields(course_number = %course.course_number))]
pub async fn create_req_course(pool: &Pool<Sqlite>, course: &NewReqCourse) -> Result<i64, AppError> {
    info!("Creating course requirement");
    let res = sqlx::query(
        "INSERT INTO req_courses (course_name, course_number, cap, cot, len)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&course.course_name)
    .bind(&course.course_number)
    .bind(course.cap)
    .bind(&course.cot)
    .bind(course.len)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_all_req_courses(pool: &Pool<Sqlite>) -> Result<Vec<ReqCourse>, AppError> {
    info!("Getting all course requirements");
    let rows = sqlx::query_as::<_, DbReqCourse>("SELECT * FROM req_courses ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(ReqCourse::from).collect())
}

#[instrument(skip(pool))]
pub async fn delete_req_course(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting course requirement");
    let res = sqlx::query("DELETE FROM req_courses WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Course not found".to_string()));
    }

    Ok(())
}

/// Stores the feedback and notifies the student it is about.
#[instrument(skip(pool, feedback), fields(username = %feedback.username, course = %feedback.course))]
pub async fn create_feedback(pool: &Pool<Sqlite>, feedback: &NewFeedback) -> Result<i64, AppError> {
    info!("Creating feedback");

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO feedback (username, name, email, course, feedback, author)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&feedback.username)
    .bind(feedback.name.as_deref())
    .bind(feedback.email.as_deref())
    .bind(&feedback.course)
    .bind(&feedback.feedback)
    .bind(feedback.author.as_deref())
    .execute(&mut *tx)
    .await?;

    let notification = NewNotification::feedback_received(&feedback.username, &feedback.course);
    insert_notification(&mut tx, &notification).await?;

    tx.commit().await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_feedback(pool: &Pool<Sqlite>, id: i64) -> Result<Feedback, AppError> {
    info!("Getting feedback");
    let row = sqlx::query_as::<_, DbFeedback>("SELECT * FROM feedback WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Feedback::from)
        .ok_or_else(|| AppError::NotFound("Feedback not found".to_string()))
}

#[instrument(skip(pool))]
pub async fn get_all_feedback(pool: &Pool<Sqlite>) -> Result<Vec<Feedback>, AppError> {
    info!("Getting all feedback");
    let rows = sqlx::query_as::<_, DbFeedback>("SELECT * FROM feedback ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Feedback::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_feedback_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Vec<Feedback>, AppError> {
    info!("Getting feedback for student");
    let rows =
        sqlx::query_as::<_, DbFeedback>("SELECT * FROM feedback WHERE username = ? ORDER BY id")
            .bind(username)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(Feedback::from).collect())
}

#[instrument(skip(pool))]
pub async fn delete_feedback(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting feedback");
    let res = sqlx::query("DELETE FROM feedback WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Feedback not found".to_string()));
    }

    Ok(())
}

async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &NewNotification,
) -> Result<i64, AppError> {
    let res = sqlx::query(
        "INSERT INTO notifications (username, user_role, message, seen) VALUES (?, ?, ?, ?)",
    )
    .bind(notification.username.as_deref())
    .bind(notification.user.as_str())
    .bind(&notification.message)
    .bind(notification.seen)
    .execute(&mut *conn)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, notification), fields(role = %notification.user))]
pub async fn create_notification(
    pool: &Pool<Sqlite>,
    notification: &NewNotification,
) -> Result<Notification, AppError> {
    info!("Creating notification");
    let id = {
        let mut conn = pool.acquire().await?;
        insert_notification(&mut conn, notification).await?
    };

    get_notification(pool, id).await
}

#[instrument(skip(pool))]
pub async fn get_notification(pool: &Pool<Sqlite>, id: i64) -> Result<Notification, AppError> {
    info!("Getting notification");
    let row = sqlx::query_as::<_, DbNotification>("SELECT * FROM notifications WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Notification::try_from(row),
        None => Err(AppError::NotFound("Notification not found".to_string())),
    }
}

#[instrument(skip(pool))]
pub async fn get_notifications_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Vec<Notification>, AppError> {
    info!("Getting notifications for user");
    let rows = sqlx::query_as::<_, DbNotification>(
        "SELECT * FROM notifications WHERE username = ? ORDER BY id",
    )
    .bind(username)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Notification::try_from).collect()
}

/// Every notification tagged with `role`, direct or broadcast.
#[instrument(skip(pool), fields(role = %role))]
pub async fn get_notifications_by_role(
    pool: &Pool<Sqlite>,
    role: Role,
) -> Result<Vec<Notification>, AppError> {
    info!("Getting notifications for role");
    let rows = sqlx::query_as::<_, DbNotification>(
        "SELECT * FROM notifications WHERE user_role = ? ORDER BY id",
    )
    .bind(role.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Notification::try_from).collect()
}

#[instrument(skip(pool))]
pub async fn mark_notification_seen(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Marking notification as seen");
    let res = sqlx::query("UPDATE notifications SET seen = TRUE WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_notification(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting notification");
    let res = sqlx::query("DELETE FROM notifications WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }

    Ok(())
}
