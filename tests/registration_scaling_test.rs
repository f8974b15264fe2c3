use std::time::{Duration, Instant};

use course_registry::core::RegistrationLedger;
use course_registry::{
    CoursePatch, CourseRegistration, CourseStatus, Identity, MemoryCourseService, MemoryDatabase,
    NewCourse, Role, Subject, UserInfo,
};

const REGISTRATIONS: usize = 50;
const UNRELATED_ROWS: usize = 50_000;

fn student(i: usize) -> UserInfo {
    UserInfo {
        id: format!("S{}", i),
        name: format!("Student {}", i),
        role: Role::Student,
    }
}

async fn open_course(service: &MemoryCourseService, id: &str, capacity: u32) {
    let admin = Identity::admin("A1");
    service
        .create_course(
            &admin,
            NewCourse {
                id: id.to_string(),
                teacher_id: "T1".to_string(),
                subject_id: "CS101".to_string(),
                semester_number: 1,
                academic_year: "2024-2025".to_string(),
                capacity,
            },
        )
        .await
        .unwrap();
    let patch = CoursePatch {
        status: Some(CourseStatus::Register),
        ..Default::default()
    };
    service.update_course(&admin, id, &patch).await.unwrap();
}

/// 建立資料庫，並在另一門課 BIG 上放 `unrelated` 筆選課紀錄
async fn database_with(unrelated: usize) -> (MemoryCourseService, MemoryDatabase) {
    let database = MemoryDatabase::new();
    database
        .upsert_subject(&Subject {
            id: "CS101".to_string(),
            name: "Introduction to Computing".to_string(),
        })
        .await;
    database
        .upsert_user(&UserInfo {
            id: "T1".to_string(),
            name: "Teacher".to_string(),
            role: Role::Teacher,
        })
        .await;
    for i in 0..unrelated.max(REGISTRATIONS) {
        database.upsert_user(&student(i)).await;
    }

    let service = MemoryCourseService::in_memory(database.clone());
    open_course(&service, "C1", REGISTRATIONS as u32).await;
    if unrelated > 0 {
        open_course(&service, "BIG", unrelated as u32).await;
        for i in 0..unrelated {
            database
                .insert_registration(&CourseRegistration::new("BIG", format!("S{}", i)), None)
                .await
                .unwrap();
        }
    }
    (service, database)
}

async fn time_registrations(service: &MemoryCourseService) -> Duration {
    let admin = Identity::admin("A1");
    let started = Instant::now();
    for i in 0..REGISTRATIONS {
        service
            .register_student_to_course(&admin, &CourseRegistration::new("C1", format!("S{}", i)))
            .await
            .unwrap();
    }
    started.elapsed() / REGISTRATIONS as u32
}

#[tokio::test]
async fn test_registration_cost_ignores_rows_on_other_courses() {
    let (empty_service, _) = database_with(0).await;
    let baseline = time_registrations(&empty_service).await;

    let (loaded_service, database) = database_with(UNRELATED_ROWS).await;
    assert_eq!(database.registration_count("BIG").await, UNRELATED_ROWS);
    let loaded = time_registrations(&loaded_service).await;

    assert!(
        loaded <= baseline * 20 + Duration::from_millis(1),
        "per-registration cost grew from {:?} to {:?} with {} rows on another course",
        baseline,
        loaded,
        UNRELATED_ROWS
    );
    assert_eq!(database.registration_count("C1").await, REGISTRATIONS);
    assert_eq!(database.registration_count("BIG").await, UNRELATED_ROWS);
}
