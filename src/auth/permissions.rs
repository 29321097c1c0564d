use anyhow::Error;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    EditOwnProfile,
    SubmitApplication,

    ViewAllApplications,
    ViewAcceptedApplications,
    ChangeApplicationStatus,

    ManageCourses,

    WriteFeedback,
    ViewAllFeedback,
    ManageFeedback,

    SendNotifications,
    ManageNotifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Instructor,
    TACommittee,
    DepartmentStaff,
}

static STUDENT_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::EditOwnProfile);
    permissions.insert(Permission::SubmitApplication);

    permissions
});

static INSTRUCTOR_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::EditOwnProfile);
    permissions.insert(Permission::ViewAcceptedApplications);
    permissions.insert(Permission::WriteFeedback);
    permissions.insert(Permission::ViewAllFeedback);
    permissions.insert(Permission::SendNotifications);

    permissions
});

// Shared by both administrative roles.
static REVIEWER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::EditOwnProfile);
    permissions.insert(Permission::ViewAllApplications);
    permissions.insert(Permission::ViewAcceptedApplications);
    permissions.insert(Permission::ChangeApplicationStatus);
    permissions.insert(Permission::ViewAllFeedback);
    permissions.insert(Permission::SendNotifications);
    permissions.insert(Permission::ManageNotifications);

    permissions
});

static COMMITTEE_PERMISSIONS: Lazy<HashSet<Permission>> =
    Lazy::new(|| REVIEWER_PERMISSIONS.clone());

static STAFF_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(REVIEWER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageCourses);
    permissions.insert(Permission::ManageFeedback);

    permissions
});

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Student,
        Role::Instructor,
        Role::TACommittee,
        Role::DepartmentStaff,
    ];

    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Student => &STUDENT_PERMISSIONS,
            Role::Instructor => &INSTRUCTOR_PERMISSIONS,
            Role::TACommittee => &COMMITTEE_PERMISSIONS,
            Role::DepartmentStaff => &STAFF_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "Student",
            Role::Instructor => "Instructor",
            Role::TACommittee => "TACommittee",
            Role::DepartmentStaff => "DepartmentStaff",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| Error::msg(format!("Unknown role: {}", s)))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
