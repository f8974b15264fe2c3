use course_registry::utils::validation::Validate;
use course_registry::{run_scenario, MemoryCourseService, MemoryDatabase, ScenarioConfig};

async fn service_for(scenario: &ScenarioConfig) -> MemoryCourseService {
    let database = MemoryDatabase::new();
    for user in &scenario.users {
        database.upsert_user(user).await;
    }
    for subject in &scenario.subjects {
        database.upsert_subject(subject).await;
    }
    MemoryCourseService::in_memory(database)
}

#[tokio::test]
async fn test_bundled_registration_scenario_passes() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios/registration.toml");
    let scenario = ScenarioConfig::from_file(path).unwrap();
    scenario.validate().unwrap();

    let service = service_for(&scenario).await;
    let report = run_scenario(&service, &scenario).await;

    for outcome in &report.outcomes {
        assert!(
            outcome.passed,
            "step {} ({}) expected {} got {} {:?}",
            outcome.index, outcome.action, outcome.expected, outcome.actual, outcome.detail
        );
    }
    assert_eq!(report.outcomes.len(), scenario.steps.len());
    assert!(report.passed());
    assert!(report.finished_at >= report.started_at);
}

#[tokio::test]
async fn test_wrong_expectation_is_reported_as_failure() {
    let toml = r#"
[scenario]
name = "overbooking"

[[users]]
id = "A1"
name = "Registrar"
role = "Admin"

[[users]]
id = "T1"
name = "Teacher"
role = "Teacher"

[[users]]
id = "S1"
name = "Student"
role = "Student"

[[subjects]]
id = "CS101"
name = "Introduction to Computing"

[[steps]]
actor = "A1"
action = "create_course"
id = "C1"
teacher_id = "T1"
subject_id = "CS101"
semester_number = 1
academic_year = "2024-2025"
capacity = 1

[[steps]]
actor = "S1"
action = "register"
course_id = "C1"
student_id = "S1"

[[steps]]
actor = "A1"
action = "get_course"
course_id = "C1"
expect_status = "Initial"
expect_size = 0
"#;
    let scenario = ScenarioConfig::from_toml_str(toml).unwrap();
    scenario.validate().unwrap();

    let service = service_for(&scenario).await;
    let report = run_scenario(&service, &scenario).await;

    assert!(!report.passed());
    assert_eq!(report.failed_count(), 1);
    let failed = &report.outcomes[1];
    assert_eq!(failed.action, "register");
    assert_eq!(failed.expected, "ok");
    assert_eq!(failed.actual, "course_register_timeout");
    assert!(report.outcomes[2].passed);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"overbooking\""));
}

#[tokio::test]
async fn test_unknown_actor_fails_validation() {
    let toml = r#"
[scenario]
name = "ghost"

[[steps]]
actor = "nobody"
action = "get_course"
course_id = "C1"
"#;
    let scenario = ScenarioConfig::from_toml_str(toml).unwrap();
    assert!(scenario.validate().is_err());
}
