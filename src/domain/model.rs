use crate::utils::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CourseStatus {
    Initial,
    Register,
    Ongoing,
    Complete,
}

impl CourseStatus {
    pub const ALL: [CourseStatus; 4] = [
        CourseStatus::Initial,
        CourseStatus::Register,
        CourseStatus::Ongoing,
        CourseStatus::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Initial => "Initial",
            CourseStatus::Register => "Register",
            CourseStatus::Ongoing => "Ongoing",
            CourseStatus::Complete => "Complete",
        }
    }

    /// 只允許往前推進（或維持不變），例如 Complete -> Initial 會被拒絕
    pub fn can_transition_to(&self, next: CourseStatus) -> bool {
        next >= *self
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CourseStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                RegistryError::invalid_input(
                    "Course status must be Initial, Register, Ongoing or Complete",
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Role::Admin),
            "Teacher" => Ok(Role::Teacher),
            "Student" => Ok(Role::Student),
            other => Err(RegistryError::invalid_input(format!(
                "Unknown role '{}', expected Admin, Teacher or Student",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub semester_number: i32,
    pub academic_year: String,
    pub capacity: u32,
    pub size: u32,
    pub status: CourseStatus,
}

impl Course {
    pub fn remaining_seats(&self) -> u32 {
        self.capacity.saturating_sub(self.size)
    }
}

/// 查詢用的課程資料，附上授課教師與科目的名稱
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseDetails {
    #[serde(flatten)]
    pub course: Course,
    pub teacher_name: String,
    pub subject_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
}

/// 建立課程的輸入；size 與 status 由服務層決定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourse {
    pub id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub semester_number: i32,
    pub academic_year: String,
    pub capacity: u32,
}

impl NewCourse {
    pub fn into_course(self) -> Course {
        Course {
            id: self.id,
            teacher_id: self.teacher_id,
            subject_id: self.subject_id,
            semester_number: self.semester_number,
            academic_year: self.academic_year,
            capacity: self.capacity,
            size: 0,
            status: CourseStatus::Initial,
        }
    }
}

/// 課程的部分更新；`None` 表示維持原值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePatch {
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub semester_number: Option<i32>,
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub status: Option<CourseStatus>,
}

impl CoursePatch {
    pub fn is_empty(&self) -> bool {
        self.teacher_id.is_none()
            && self.subject_id.is_none()
            && self.semester_number.is_none()
            && self.academic_year.is_none()
            && self.capacity.is_none()
            && self.status.is_none()
    }

    pub fn apply_to(&self, course: &mut Course) {
        if let Some(teacher_id) = &self.teacher_id {
            course.teacher_id = teacher_id.clone();
        }
        if let Some(subject_id) = &self.subject_id {
            course.subject_id = subject_id.clone();
        }
        if let Some(semester_number) = self.semester_number {
            course.semester_number = semester_number;
        }
        if let Some(academic_year) = &self.academic_year {
            course.academic_year = academic_year.clone();
        }
        if let Some(capacity) = self.capacity {
            course.capacity = capacity;
        }
        if let Some(status) = self.status {
            course.status = status;
        }
    }

    /// 已設定欄位的資料表欄名，依宣告順序
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.teacher_id.is_some() {
            fields.push("teacher_id");
        }
        if self.subject_id.is_some() {
            fields.push("subject_id");
        }
        if self.semester_number.is_some() {
            fields.push("semester_number");
        }
        if self.academic_year.is_some() {
            fields.push("academic_year");
        }
        if self.capacity.is_some() {
            fields.push("capacity");
        }
        if self.status.is_some() {
            fields.push("status");
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSchedule {
    pub id: i64,
    pub course_id: String,
    pub room: String,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourseSchedule {
    pub course_id: String,
    pub room: String,
    pub start_time: i64,
    pub end_time: i64,
}

impl NewCourseSchedule {
    pub fn with_id(self, id: i64) -> CourseSchedule {
        CourseSchedule {
            id,
            course_id: self.course_id,
            room: self.room,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CourseRegistration {
    pub course_id: String,
    pub student_id: String,
}

impl CourseRegistration {
    pub fn new(course_id: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            student_id: student_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub role: Role,
}

/// 依角色決定課程列表要走哪一種關聯
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseMembership {
    Enrolled,
    Teaching,
}

impl CourseMembership {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Student => CourseMembership::Enrolled,
            Role::Teacher | Role::Admin => CourseMembership::Teaching,
        }
    }
}
