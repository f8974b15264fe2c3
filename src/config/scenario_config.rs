use crate::domain::model::{NewCourse, NewCourseSchedule, Subject, UserInfo};
use crate::utils::error::{RegistryError, Result};
use crate::utils::validation::Validate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// 情境檔：一組使用者與依序執行的步驟
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub scenario: ScenarioInfo,
    #[serde(default)]
    pub users: Vec<UserInfo>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub actor: String,
    pub description: Option<String>,
    pub expect: Option<String>, // "ok" 或錯誤代碼，例如 "course_limit_exceeded"
    #[serde(flatten)]
    pub action: ScenarioAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioAction {
    CreateCourse(NewCourse),
    UpdateCourse {
        course_id: String,
        teacher_id: Option<String>,
        subject_id: Option<String>,
        semester_number: Option<i32>,
        academic_year: Option<String>,
        capacity: Option<u32>,
        status: Option<String>, // 執行時才解析，錯誤值走 InvalidInput
    },
    DeleteCourse {
        course_id: String,
    },
    GetCourse {
        course_id: String,
        expect_size: Option<u32>,
        expect_status: Option<String>,
        expect_capacity: Option<u32>,
        expect_teacher_name: Option<String>,
        expect_subject_name: Option<String>,
    },
    Register {
        course_id: String,
        student_id: String,
    },
    Unregister {
        course_id: String,
        student_id: String,
    },
    AddSchedule(NewCourseSchedule),
    ListSchedules {
        course_id: String,
        expect_count: Option<usize>,
    },
    DeleteSchedule {
        schedule_id: i64,
    },
    ListCourses {
        user_id: String,
        semester: i32,
        academic_year: String,
        expect_count: Option<usize>,
    },
}

impl ScenarioAction {
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioAction::CreateCourse(_) => "create_course",
            ScenarioAction::UpdateCourse { .. } => "update_course",
            ScenarioAction::DeleteCourse { .. } => "delete_course",
            ScenarioAction::GetCourse { .. } => "get_course",
            ScenarioAction::Register { .. } => "register",
            ScenarioAction::Unregister { .. } => "unregister",
            ScenarioAction::AddSchedule(_) => "add_schedule",
            ScenarioAction::ListSchedules { .. } => "list_schedules",
            ScenarioAction::DeleteSchedule { .. } => "delete_schedule",
            ScenarioAction::ListCourses { .. } => "list_courses",
        }
    }
}

impl ScenarioStep {
    pub fn expected(&self) -> &str {
        self.expect.as_deref().unwrap_or("ok")
    }
}

pub const OUTCOME_KINDS: [&str; 7] = [
    "ok",
    "resource_not_found",
    "unique_constraint",
    "unauthorized",
    "invalid_input",
    "course_limit_exceeded",
    "course_register_timeout",
];

impl ScenarioConfig {
    /// 從 TOML 檔案載入情境
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(RegistryError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = crate::config::toml_config::substitute_env_vars(content);
        toml::from_str(&processed_content).map_err(|e| RegistryError::ConfigError {
            message: format!("Scenario parsing error: {}", e),
        })
    }

    pub fn find_user(&self, user_id: &str) -> Option<&UserInfo> {
        self.users.iter().find(|user| user.id == user_id)
    }
}

impl Validate for ScenarioConfig {
    fn validate(&self) -> Result<()> {
        crate::utils::validation::validate_non_empty_string("scenario.name", &self.scenario.name)?;

        let mut seen = HashSet::new();
        for user in &self.users {
            if !seen.insert(user.id.as_str()) {
                return Err(RegistryError::InvalidConfigValueError {
                    field: "users.id".to_string(),
                    value: user.id.clone(),
                    reason: "Duplicate user id".to_string(),
                });
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            if self.find_user(&step.actor).is_none() {
                return Err(RegistryError::InvalidConfigValueError {
                    field: format!("steps[{}].actor", index),
                    value: step.actor.clone(),
                    reason: "Actor is not declared in [[users]]".to_string(),
                });
            }
            if !OUTCOME_KINDS.contains(&step.expected()) {
                return Err(RegistryError::InvalidConfigValueError {
                    field: format!("steps[{}].expect", index),
                    value: step.expected().to_string(),
                    reason: format!("Valid outcomes: {}", OUTCOME_KINDS.join(", ")),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Role;

    const SCENARIO: &str = r#"
[scenario]
name = "capacity"

[[users]]
id = "A1"
name = "Admin"
role = "Admin"

[[users]]
id = "S1"
name = "Student One"
role = "Student"

[[steps]]
actor = "A1"
action = "create_course"
id = "C1"
teacher_id = "T1"
subject_id = "MATH"
semester_number = 1
academic_year = "2024-2025"
capacity = 2

[[steps]]
actor = "A1"
action = "update_course"
course_id = "C1"
status = "Register"

[[steps]]
actor = "S1"
action = "register"
course_id = "C1"
student_id = "S1"

[[steps]]
actor = "S1"
action = "register"
course_id = "C1"
student_id = "S1"
expect = "unique_constraint"
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = ScenarioConfig::from_toml_str(SCENARIO).unwrap();

        assert_eq!(scenario.scenario.name, "capacity");
        assert_eq!(scenario.users[1].role, Role::Student);
        assert_eq!(scenario.steps.len(), 4);
        assert_eq!(scenario.steps[0].action.name(), "create_course");
        match &scenario.steps[0].action {
            ScenarioAction::CreateCourse(course) => assert_eq!(course.capacity, 2),
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(scenario.steps[2].expected(), "ok");
        assert_eq!(scenario.steps[3].expected(), "unique_constraint");
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn test_unknown_actor_fails_validation() {
        let mut scenario = ScenarioConfig::from_toml_str(SCENARIO).unwrap();
        scenario.steps[0].actor = "ghost".to_string();
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_unknown_expectation_fails_validation() {
        let mut scenario = ScenarioConfig::from_toml_str(SCENARIO).unwrap();
        scenario.steps[1].expect = Some("exploded".to_string());
        assert!(scenario.validate().is_err());
    }
}
