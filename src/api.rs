use std::path::Path;

use rocket::State;
use rocket::form::Form;
use rocket::fs::{NamedFile, TempFile};
use rocket::http::{Cookie, CookieJar, Header, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use rocket::{FromForm, Responder};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    Permission, ProfileUpdate, Role, SESSION_COOKIE, User, issue_token, verify_token,
};
use crate::config::AppConfig;
use crate::db::{
    authenticate_user, change_application_status, create_application, create_feedback,
    create_notification, create_req_course, create_user, create_user_session, delete_feedback,
    delete_notification, delete_req_course, find_application_by_resume, get_accepted_applications,
    get_all_applications, get_all_feedback, get_all_req_courses, get_application, get_feedback,
    get_applications_by_username, get_feedback_by_username, get_notification, get_notifications_by_role,
    get_notifications_by_username, get_user, invalidate_session, mark_notification_seen,
    update_user_profile,
};
use crate::error::AppError;
use crate::models::{
    ApplicationCourse, Feedback, NewApplication, NewFeedback, NewNotification, NewReqCourse,
    Notification, ReqCourse, StatusActor, TaApplication,
};
use crate::validation::JsonValidateExt;

const ALL_COURSE_FIELDS_REQUIRED: &str = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours).";

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionUser {
    pub username: String,
    pub role: Role,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ValidateSessionResponse {
    pub user: SessionUser,
}

#[derive(Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 64, message = "Username must be 1 to 64 characters"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
    role: String,
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

fn session_cookie(token: String, ttl_hours: i64) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(rocket::time::Duration::hours(ttl_hours))
        .build()
}

/// Issues a token for `user`, records it as one of the user's active
/// sessions and hands it to the client in the session cookie.
async fn start_session(
    db: &Pool<Sqlite>,
    config: &AppConfig,
    cookies: &CookieJar<'_>,
    user: &User,
) -> Result<(), AppError> {
    let issued = issue_token(user.id, &config.jwt_secret, config.token_ttl())?;

    create_user_session(db, user.id, &issued.token, issued.expires_at.naive_utc()).await?;

    cookies.add(session_cookie(issued.token, config.token_ttl_hours));
    Ok(())
}

#[post("/signup", data = "<signup>")]
pub async fn api_signup(
    signup: Json<SignupRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<SessionUser>, AppError> {
    let signup = signup.validate_custom()?;

    let role: Role = signup
        .role
        .parse()
        .map_err(|_| AppError::Validation(format!("Unknown role: {}", signup.role)))?;

    info!(username = %signup.username, role = %role, "Signup attempt");

    let user_id = create_user(db, &signup.username, &signup.password, role).await?;
    let user = get_user(db, user_id).await?;

    start_session(db, config, cookies, &user).await?;

    Ok(Json(SessionUser::from(&user)))
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<SessionUser>, AppError> {
    let login = login.validate_custom()?;

    info!(username = %login.username, "Login attempt");

    let Some(user) = authenticate_user(db, &login.username, &login.password).await? else {
        return Err(AppError::Authentication("Invalid credentials".to_string()));
    };

    start_session(db, config, cookies, &user).await?;

    info!(username = %user.username, "Authentication successful");
    Ok(Json(SessionUser::from(&user)))
}

#[post("/logout")]
pub async fn api_logout(
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<MessageResponse>, AppError> {
    let Some(token) = cookies
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
    else {
        return Err(AppError::Validation("No token provided".to_string()));
    };

    let claims = verify_token(&token, &config.jwt_secret)?;
    let removed = invalidate_session(db, claims.sub, &token).await?;

    cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));

    info!(user_id = claims.sub, removed, "Logged out");
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

#[get("/validate-session")]
pub async fn api_validate_session(user: User) -> Json<ValidateSessionResponse> {
    Json(ValidateSessionResponse {
        user: SessionUser::from(&user),
    })
}

#[get("/profile")]
pub async fn api_get_profile(user: User) -> Json<User> {
    Json(user)
}

#[derive(Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    name: Option<String>,
    email: Option<String>,
    phone_number: Option<String>,
    joining_date: Option<String>,
    znumber: Option<String>,
}

impl From<ProfileUpdateRequest> for ProfileUpdate {
    fn from(request: ProfileUpdateRequest) -> Self {
        Self {
            name: request.name,
            email: request.email,
            phone_number: request.phone_number,
            joining_date: request.joining_date,
            znumber: request.znumber,
        }
    }
}

#[put("/profile", data = "<profile>")]
pub async fn api_update_profile(
    profile: Json<ProfileUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<User>, AppError> {
    user.require_permission(Permission::EditOwnProfile)?;

    let update = ProfileUpdate::from(profile.into_inner());
    let updated = update_user_profile(db, user.id, &update).await?;

    Ok(Json(updated))
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationResponse {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub email: Option<String>,
    pub znumber: Option<String>,
    pub resume: String,
    pub eligible_courses: String,
    pub status: String,
    pub courses: Vec<ApplicationCourse>,
    pub created_at: String,
}

impl From<TaApplication> for ApplicationResponse {
    fn from(application: TaApplication) -> Self {
        Self {
            eligible_courses: application.eligible_courses(),
            status: application.status(),
            id: application.id,
            name: application.name,
            username: application.username,
            email: application.email,
            znumber: application.znumber,
            resume: application.resume,
            courses: application.courses,
            created_at: application.created_at.to_rfc3339(),
        }
    }
}

fn to_responses(applications: Vec<TaApplication>) -> Vec<ApplicationResponse> {
    applications
        .into_iter()
        .map(ApplicationResponse::from)
        .collect()
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApplicationsResponse {
    pub applications: Vec<ApplicationResponse>,
}

#[derive(FromForm)]
pub struct ApplicationForm<'r> {
    name: String,
    email: Option<String>,
    znumber: Option<String>,
    #[field(name = "eligibleCourses")]
    eligible_courses: String,
    resume: TempFile<'r>,
}

/// Splits the comma-delimited course list the form submits, dropping blanks.
pub fn parse_course_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|course| !course.is_empty())
        .map(String::from)
        .collect()
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

async fn store_resume(file: &mut TempFile<'_>, upload_dir: &Path) -> Result<String, AppError> {
    tokio::fs::create_dir_all(upload_dir).await?;

    let extension = file
        .content_type()
        .and_then(|ct| ct.extension())
        .map(|ext| format!(".{}", ext.as_str()))
        .unwrap_or_default();
    let filename = format!("{}{}", Uuid::new_v4().simple(), extension);

    file.move_copy_to(upload_dir.join(&filename)).await?;

    Ok(filename)
}

#[post("/ta-application", data = "<form>")]
pub async fn api_submit_application(
    form: Form<ApplicationForm<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Custom<Json<ApplicationResponse>>, AppError> {
    user.require_permission(Permission::SubmitApplication)?;

    let mut form = form.into_inner();

    let name = form.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }

    let courses = parse_course_list(&form.eligible_courses);
    if courses.is_empty() {
        return Err(AppError::Validation(
            "At least one eligible course is required".to_string(),
        ));
    }

    let resume = store_resume(&mut form.resume, &config.upload_dir).await?;

    let application = NewApplication {
        username: user.username.clone(),
        name,
        email: non_blank(&form.email),
        znumber: non_blank(&form.znumber),
        resume: resume.clone(),
        courses,
    };

    match create_application(db, &application).await {
        Ok(created) => {
            info!(application_id = created.id, username = %user.username, "TA application submitted");
            Ok(Custom(Status::Created, Json(ApplicationResponse::from(created))))
        }
        Err(err) => {
            if let Err(io_err) = tokio::fs::remove_file(config.upload_dir.join(&resume)).await {
                warn!(error = %io_err, resume = %resume, "Failed to remove orphaned resume");
            }
            Err(err)
        }
    }
}

#[get("/ta-applications")]
pub async fn api_get_all_applications(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ApplicationResponse>>, AppError> {
    user.require_permission(Permission::ViewAllApplications)?;

    let applications = get_all_applications(db).await?;

    Ok(Json(to_responses(applications)))
}

#[get("/applications")]
pub async fn api_get_my_applications(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ApplicationsResponse>, AppError> {
    let applications = get_applications_by_username(db, &user.username).await?;

    Ok(Json(ApplicationsResponse {
        applications: to_responses(applications),
    }))
}

#[get("/getAcceptedApplications")]
pub async fn api_get_accepted_applications(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ApplicationResponse>>, AppError> {
    user.require_permission(Permission::ViewAcceptedApplications)?;

    let applications = get_accepted_applications(db).await?;

    Ok(Json(to_responses(applications)))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusRequest {
    #[validate(length(min = 1, message = "newStatus is required"))]
    new_status: String,
    app_id: i64,
    index: i64,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusResponse {
    pub message: String,
    pub new_status: String,
}

#[post("/application/changeStatus", data = "<request>")]
pub async fn api_change_status(
    request: Json<ChangeStatusRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ChangeStatusResponse>, AppError> {
    let request = request.validate_custom()?;

    let application = get_application(db, request.app_id).await?;
    user.require_owner_or(&application.username, Permission::ChangeApplicationStatus)?;

    let actor = if user.has_permission(Permission::ChangeApplicationStatus) {
        StatusActor::Reviewer
    } else {
        StatusActor::Applicant
    };

    let change = change_application_status(
        db,
        request.app_id,
        request.index,
        &request.new_status,
        actor,
    )
    .await?;

    info!(
        application_id = change.application_id,
        course = %change.course,
        from = %change.previous_status,
        to = %change.new_status,
        notified = change.notification_id.is_some(),
        "Application status changed"
    );

    Ok(Json(ChangeStatusResponse {
        message: "Status changed successfully".to_string(),
        new_status: change.new_status,
    }))
}

#[derive(Responder)]
pub struct ResumeDownload {
    file: NamedFile,
    disposition: Header<'static>,
}

/// A single path segment that stays inside the upload directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

#[get("/download-resume/<filename>")]
pub async fn api_download_resume(
    filename: &str,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<ResumeDownload, AppError> {
    let not_found = || AppError::NotFound("File not found".to_string());

    if !is_plain_file_name(filename) {
        return Err(not_found());
    }

    if !user.has_permission(Permission::ViewAllApplications) {
        match find_application_by_resume(db, filename).await? {
            Some(application) if application.username == user.username => {}
            _ => return Err(not_found()),
        }
    }

    let file = NamedFile::open(config.upload_dir.join(filename))
        .await
        .map_err(|_| not_found())?;

    Ok(ResumeDownload {
        file,
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename={}", filename),
        ),
    })
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddCourseRequest {
    #[validate(
        required(message = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours)."),
        length(min = 1, message = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours).")
    )]
    course_name: Option<String>,
    #[validate(
        required(message = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours)."),
        length(min = 1, message = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours).")
    )]
    course_number: Option<String>,
    #[validate(
        required(message = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours)."),
        range(min = 0, message = "cap must not be negative")
    )]
    cap: Option<i64>,
    #[validate(
        required(message = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours)."),
        length(min = 1, message = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours).")
    )]
    cot: Option<String>,
    #[validate(
        required(message = "All fields are required: courseName, courseNumber, cap (capacity), cot (type), and len (hours)."),
        range(min = 0, message = "len must not be negative")
    )]
    len: Option<i64>,
}

#[post("/add-course", data = "<course>")]
pub async fn api_add_course(
    course: Json<AddCourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<MessageResponse>>, AppError> {
    user.require_permission(Permission::ManageCourses)?;

    let AddCourseRequest {
        course_name: Some(course_name),
        course_number: Some(course_number),
        cap: Some(cap),
        cot: Some(cot),
        len: Some(len),
    } = course.validate_custom()?
    else {
        return Err(AppError::Validation(ALL_COURSE_FIELDS_REQUIRED.to_string()));
    };

    let id = create_req_course(
        db,
        &NewReqCourse {
            course_name,
            course_number,
            cap,
            cot,
            len,
        },
    )
    .await?;

    info!(course_id = id, "Course requirement added");
    Ok(Custom(
        Status::Created,
        Json(MessageResponse::new("Course requirement added successfully")),
    ))
}

#[get("/req-courses")]
pub async fn api_get_req_courses(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ReqCourse>>, AppError> {
    let courses = get_all_req_courses(db).await?;
    Ok(Json(courses))
}

#[derive(Deserialize)]
pub struct DeleteCourseRequest {
    id: i64,
}

#[post("/delete-course", data = "<request>")]
pub async fn api_delete_course(
    request: Json<DeleteCourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    user.require_permission(Permission::ManageCourses)?;

    delete_req_course(db, request.id).await?;

    Ok(Json(MessageResponse::new("Course deleted successfully")))
}

#[derive(Deserialize, Validate)]
pub struct CreateFeedbackRequest {
    #[validate(length(min = 1, message = "username is required"))]
    username: String,
    name: Option<String>,
    email: Option<String>,
    #[validate(length(min = 1, message = "course is required"))]
    course: String,
    #[validate(length(min = 1, message = "feedback is required"))]
    feedback: String,
}

#[post("/createFeedback", data = "<request>")]
pub async fn api_create_feedback(
    request: Json<CreateFeedbackRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<MessageResponse>>, AppError> {
    user.require_permission(Permission::WriteFeedback)?;

    let request = request.validate_custom()?;

    let id = create_feedback(
        db,
        &NewFeedback {
            username: request.username,
            name: non_blank(&request.name),
            email: non_blank(&request.email),
            course: request.course,
            feedback: request.feedback,
            author: Some(user.username.clone()),
        },
    )
    .await?;

    info!(feedback_id = id, author = %user.username, "Feedback created");
    Ok(Custom(
        Status::Created,
        Json(MessageResponse::new("Feedback created successfully")),
    ))
}

#[get("/getAllFeedbacks")]
pub async fn api_get_all_feedbacks(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Feedback>>, AppError> {
    user.require_permission(Permission::ViewAllFeedback)?;

    let feedback = get_all_feedback(db).await?;
    Ok(Json(feedback))
}

#[get("/getFeedbacks/<username>")]
pub async fn api_get_feedbacks_for(
    username: &str,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Feedback>>, AppError> {
    user.require_owner_or(username, Permission::ViewAllFeedback)?;

    let feedback = get_feedback_by_username(db, username).await?;
    Ok(Json(feedback))
}

#[delete("/feedbacks/<id>")]
pub async fn api_delete_feedback(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let feedback = get_feedback(db, id).await?;

    match feedback.author.as_deref() {
        Some(author) => user.require_owner_or(author, Permission::ManageFeedback)?,
        None => user.require_permission(Permission::ManageFeedback)?,
    }

    delete_feedback(db, id).await?;

    Ok(Json(MessageResponse::new("Feedback deleted")))
}

#[derive(Deserialize, Validate)]
pub struct CreateNotificationRequest {
    username: Option<String>,
    user: String,
    #[validate(length(min = 1, message = "message is required"))]
    message: String,
    seen: Option<bool>,
}

fn require_notification_access(user: &User, notification: &Notification) -> Result<(), AppError> {
    if notification.is_addressed_to(&user.username, user.role) {
        return Ok(());
    }
    user.require_permission(Permission::ManageNotifications)
}

#[post("/notifications", data = "<request>")]
pub async fn api_create_notification(
    request: Json<CreateNotificationRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Notification>>, AppError> {
    user.require_permission(Permission::SendNotifications)?;

    let request = request.validate_custom()?;
    let role: Role = request
        .user
        .parse()
        .map_err(|_| AppError::Validation(format!("Unknown role: {}", request.user)))?;

    let notification = create_notification(
        db,
        &NewNotification {
            username: non_blank(&request.username),
            user: role,
            message: request.message,
            // New notifications stay unread until the recipient marks them seen.
            seen: request.seen.unwrap_or(false),
        },
    )
    .await?;

    Ok(Custom(Status::Created, Json(notification)))
}

#[delete("/notifications/<id>")]
pub async fn api_delete_notification(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let notification = get_notification(db, id).await?;
    require_notification_access(&user, &notification)?;

    delete_notification(db, id).await?;

    Ok(Json(MessageResponse::new("Notification deleted")))
}

#[put("/notifications/<id>/seen")]
pub async fn api_mark_notification_seen(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Notification>, AppError> {
    let notification = get_notification(db, id).await?;
    require_notification_access(&user, &notification)?;

    mark_notification_seen(db, id).await?;

    Ok(Json(get_notification(db, id).await?))
}

#[get("/notifications/<username>")]
pub async fn api_get_notifications_for_user(
    username: &str,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Notification>>, AppError> {
    user.require_owner_or(username, Permission::ManageNotifications)?;

    let notifications = get_notifications_by_username(db, username).await?;
    Ok(Json(notifications))
}

#[get("/notifications/user/<role>")]
pub async fn api_get_notifications_for_role(
    role: &str,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let role: Role = role
        .parse()
        .map_err(|_| AppError::Validation(format!("Unknown role: {}", role)))?;

    if user.role != role {
        user.require_permission(Permission::ManageNotifications)?;
    }

    let notifications = get_notifications_by_role(db, role).await?;
    Ok(Json(notifications))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
