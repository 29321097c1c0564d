use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Role;

pub const PENDING_STATUS: &str = "Pending";
pub const ACCEPTED_STATUS: &str = "Accepted";
pub const OFFERED_STATUS: &str = "Offered";
pub const DECLINED_STATUS: &str = "Declined";

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusActor {
    /// Committee or staff; any transition is allowed.
    Reviewer,
    /// The owning student; may only answer an outstanding offer.
    Applicant,
}

impl StatusActor {
    pub fn may_change(self, current: &str, new_status: &str) -> bool {
        match self {
            StatusActor::Reviewer => true,
            StatusActor::Applicant => {
                current == OFFERED_STATUS
                    && (new_status == ACCEPTED_STATUS || new_status == DECLINED_STATUS)
            }
        }
    }
}

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

/// One eligible course of an application together with its own status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationCourse {
    pub course: String,
    pub status: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbApplicationCourse {
    pub course: Option<String>,
    pub status: Option<String>,
}

impl From<DbApplicationCourse> for ApplicationCourse {
    fn from(db: DbApplicationCourse) -> Self {
        Self {
            course: db.course.unwrap_or_default(),
            status: db.status.unwrap_or_else(|| PENDING_STATUS.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaApplication {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub znumber: Option<String>,
    pub resume: String,
    pub courses: Vec<ApplicationCourse>,
    pub created_at: DateTime<Utc>,
}

impl TaApplication {
    /// Comma-joined course list in the shape the frontend has always read.
    pub fn eligible_courses(&self) -> String {
        self.courses
            .iter()
            .map(|c| c.course.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Comma-joined statuses, index aligned with `eligible_courses`.
    pub fn status(&self) -> String {
        self.courses
            .iter()
            .map(|c| c.status.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbTaApplication {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub znumber: Option<String>,
    pub resume: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl DbTaApplication {
    pub fn with_courses(self, courses: Vec<ApplicationCourse>) -> TaApplication {
        TaApplication {
            id: self.id.unwrap_or_default(),
            username: self.username.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            email: self.email,
            znumber: self.znumber,
            resume: self.resume.unwrap_or_default(),
            courses,
            created_at: to_utc(self.created_at),
        }
    }
}

pub struct NewApplication {
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub znumber: Option<String>,
    pub resume: String,
    pub courses: Vec<String>,
}

/// Result of a status change: what was written and for which course.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub application_id: i64,
    pub course: String,
    pub previous_status: String,
    pub new_status: String,
    pub notification_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReqCourse {
    pub id: i64,
    pub course_name: String,
    pub course_number: String,
    pub cap: i64,
    pub cot: String,
    pub len: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbReqCourse {
    pub id: Option<i64>,
    pub course_name: Option<String>,
    pub course_number: Option<String>,
    pub cap: Option<i64>,
    pub cot: Option<String>,
    pub len: Option<i64>,
}

impl From<DbReqCourse> for ReqCourse {
    fn from(db: DbReqCourse) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            course_name: db.course_name.unwrap_or_default(),
            course_number: db.course_number.unwrap_or_default(),
            cap: db.cap.unwrap_or_default(),
            cot: db.cot.unwrap_or_default(),
            len: db.len.unwrap_or_default(),
        }
    }
}

pub struct NewReqCourse {
    pub course_name: String,
    pub course_number: String,
    pub cap: i64,
    pub cot: String,
    pub len: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: i64,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub course: String,
    pub feedback: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbFeedback {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub course: Option<String>,
    pub feedback: Option<String>,
    pub author: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbFeedback> for Feedback {
    fn from(db: DbFeedback) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            username: db.username.unwrap_or_default(),
            name: db.name,
            email: db.email,
            course: db.course.unwrap_or_default(),
            feedback: db.feedback.unwrap_or_default(),
            author: db.author,
            created_at: to_utc(db.created_at),
        }
    }
}

pub struct NewFeedback {
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub course: String,
    pub feedback: String,
    pub author: Option<String>,
}

/// `username: None` addresses every user holding `user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub username: Option<String>,
    pub user: Role,
    pub message: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_addressed_to(&self, username: &str, role: Role) -> bool {
        match &self.username {
            Some(target) => target == username,
            None => self.user == role,
        }
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbNotification {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub user_role: Option<String>,
    pub message: Option<String>,
    pub seen: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
}

impl TryFrom<DbNotification> for Notification {
    type Error = crate::error::AppError;

    fn try_from(db: DbNotification) -> Result<Self, Self::Error> {
        let user = db
            .user_role
            .unwrap_or_default()
            .parse::<Role>()
            .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;

        Ok(Self {
            id: db.id.unwrap_or_default(),
            username: db.username,
            user,
            message: db.message.unwrap_or_default(),
            seen: db.seen.unwrap_or_default(),
            created_at: to_utc(db.created_at),
        })
    }
}

pub struct NewNotification {
    pub username: Option<String>,
    pub user: Role,
    pub message: String,
    pub seen: bool,
}

impl NewNotification {
    pub fn offer_accepted(applicant: &str, course: &str) -> Self {
        Self {
            username: None,
            user: Role::Instructor,
            message: format!(
                "{} has accepted the TAship offer for {}",
                applicant, course
            ),
            seen: false,
        }
    }

    pub fn feedback_received(student: &str, course: &str) -> Self {
        Self {
            username: Some(student.to_string()),
            user: Role::Student,
            message: format!("You got feedback for the course {}", course),
            seen: false,
        }
    }
}
