use course_registry::{
    CoursePatch, CourseRegistration, CourseStatus, Identity, MemoryCourseService, MemoryDatabase,
    NewCourse, NewCourseSchedule, RegistryError, Role, Subject, UserInfo,
};

fn admin() -> Identity {
    Identity::admin("A1")
}

async fn setup() -> (MemoryCourseService, MemoryDatabase) {
    let database = MemoryDatabase::new();
    database
        .upsert_subject(&Subject {
            id: "CS101".to_string(),
            name: "Introduction to Computing".to_string(),
        })
        .await;
    for (id, name, role) in [
        ("A1", "Registrar", Role::Admin),
        ("T1", "Grace Hopper", Role::Teacher),
        ("T2", "Alan Kay", Role::Teacher),
        ("S1", "Student One", Role::Student),
        ("S2", "Student Two", Role::Student),
        ("S3", "Student Three", Role::Student),
    ] {
        database
            .upsert_user(&UserInfo {
                id: id.to_string(),
                name: name.to_string(),
                role,
            })
            .await;
    }
    let service = MemoryCourseService::in_memory(database.clone());
    (service, database)
}

fn new_course(id: &str, capacity: u32) -> NewCourse {
    NewCourse {
        id: id.to_string(),
        teacher_id: "T1".to_string(),
        subject_id: "CS101".to_string(),
        semester_number: 1,
        academic_year: "2024-2025".to_string(),
        capacity,
    }
}

async fn open_course(service: &MemoryCourseService, id: &str, capacity: u32) {
    service
        .create_course(&admin(), new_course(id, capacity))
        .await
        .unwrap();
    set_status(service, id, CourseStatus::Register).await;
}

async fn set_status(service: &MemoryCourseService, id: &str, status: CourseStatus) {
    let patch = CoursePatch {
        status: Some(status),
        ..Default::default()
    };
    service.update_course(&admin(), id, &patch).await.unwrap();
}

async fn size_of(service: &MemoryCourseService, id: &str) -> u32 {
    service.get_course_by_id(&admin(), id).await.unwrap().course.size
}

#[tokio::test]
async fn test_registration_walkthrough_keeps_size_in_sync() {
    let (service, database) = setup().await;
    open_course(&service, "C1", 2).await;

    let s1 = Identity::student("S1");
    let s2 = Identity::student("S2");
    let s3 = Identity::student("S3");

    service
        .register_student_to_course(&s1, &CourseRegistration::new("C1", "S1"))
        .await
        .unwrap();
    assert_eq!(size_of(&service, "C1").await, 1);

    let err = service
        .register_student_to_course(&s1, &CourseRegistration::new("C1", "S1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::UniqueConstraint { .. }));
    assert_eq!(size_of(&service, "C1").await, 1);

    service
        .register_student_to_course(&s2, &CourseRegistration::new("C1", "S2"))
        .await
        .unwrap();
    assert_eq!(size_of(&service, "C1").await, 2);

    let err = service
        .register_student_to_course(&s3, &CourseRegistration::new("C1", "S3"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::CourseLimitExceeded));
    assert_eq!(size_of(&service, "C1").await, 2);

    service
        .unregister_student_from_course(&s1, "C1", "S1")
        .await
        .unwrap();
    assert_eq!(size_of(&service, "C1").await, 1);

    service
        .register_student_to_course(&s3, &CourseRegistration::new("C1", "S3"))
        .await
        .unwrap();
    assert_eq!(size_of(&service, "C1").await, 2);
    assert_eq!(database.registration_count("C1").await, 2);
    assert!(
        database
            .is_registered(&CourseRegistration::new("C1", "S3"))
            .await
    );
}

#[tokio::test]
async fn test_create_course_forces_initial_status_and_zero_size() {
    let (service, _) = setup().await;

    let course = service
        .create_course(&admin(), new_course("C1", 30))
        .await
        .unwrap();

    assert_eq!(course.status, CourseStatus::Initial);
    assert_eq!(course.size, 0);
    let stored = service.get_course_by_id(&admin(), "C1").await.unwrap();
    assert_eq!(stored.course, course);
}

#[tokio::test]
async fn test_create_course_requires_admin_and_valid_input() {
    let (service, _) = setup().await;

    let err = service
        .create_course(&Identity::teacher("T1"), new_course("C1", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));

    let err = service
        .create_course(&admin(), new_course("C1", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput { .. }));

    let mut not_a_teacher = new_course("C1", 10);
    not_a_teacher.teacher_id = "S1".to_string();
    let err = service
        .create_course(&admin(), not_a_teacher)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput { .. }));

    service
        .create_course(&admin(), new_course("C1", 10))
        .await
        .unwrap();
    let err = service
        .create_course(&admin(), new_course("C1", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::UniqueConstraint { .. }));
}

#[tokio::test]
async fn test_registration_is_gated_on_register_status() {
    let (service, _) = setup().await;
    service
        .create_course(&admin(), new_course("C1", 5))
        .await
        .unwrap();
    let registration = CourseRegistration::new("C1", "S1");

    // Initial
    let err = service
        .register_student_to_course(&admin(), &registration)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::CourseRegisterTimeout));
    let err = service
        .unregister_student_from_course(&admin(), "C1", "S1")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::CourseRegisterTimeout));

    set_status(&service, "C1", CourseStatus::Register).await;
    service
        .register_student_to_course(&admin(), &registration)
        .await
        .unwrap();

    for status in [CourseStatus::Ongoing, CourseStatus::Complete] {
        set_status(&service, "C1", status).await;
        let err = service
            .register_student_to_course(&admin(), &CourseRegistration::new("C1", "S2"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::CourseRegisterTimeout));
        let err = service
            .unregister_student_from_course(&admin(), "C1", "S1")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::CourseRegisterTimeout));
    }
    assert_eq!(size_of(&service, "C1").await, 1);
}

#[tokio::test]
async fn test_students_cannot_act_for_other_students() {
    let (service, _) = setup().await;
    open_course(&service, "C1", 5).await;
    let s1 = Identity::student("S1");

    let err = service
        .register_student_to_course(&s1, &CourseRegistration::new("C1", "S2"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));

    service
        .register_student_to_course(&Identity::student("S2"), &CourseRegistration::new("C1", "S2"))
        .await
        .unwrap();
    let err = service
        .unregister_student_from_course(&s1, "C1", "S2")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));
    assert_eq!(size_of(&service, "C1").await, 1);
}

#[tokio::test]
async fn test_teachers_cannot_register_students() {
    let (service, _) = setup().await;
    open_course(&service, "C1", 5).await;

    let err = service
        .register_student_to_course(&Identity::teacher("T1"), &CourseRegistration::new("C1", "S1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));
}

#[tokio::test]
async fn test_register_unknown_course_is_not_found() {
    let (service, _) = setup().await;
    let err = service
        .register_student_to_course(&Identity::student("S1"), &CourseRegistration::new("C9", "S1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound { .. }));
}

#[tokio::test]
async fn test_unregistering_absent_student_leaves_size_untouched() {
    let (service, database) = setup().await;
    open_course(&service, "C1", 3).await;
    service
        .register_student_to_course(&admin(), &CourseRegistration::new("C1", "S1"))
        .await
        .unwrap();

    service
        .unregister_student_from_course(&admin(), "C1", "S2")
        .await
        .unwrap();

    assert_eq!(size_of(&service, "C1").await, 1);
    assert_eq!(database.registration_count("C1").await, 1);
}

#[tokio::test]
async fn test_partial_update_changes_only_capacity() {
    let (service, _) = setup().await;
    open_course(&service, "C1", 2).await;
    service
        .register_student_to_course(&admin(), &CourseRegistration::new("C1", "S1"))
        .await
        .unwrap();
    let before = service.get_course_by_id(&admin(), "C1").await.unwrap().course;

    let patch = CoursePatch {
        capacity: Some(5),
        ..Default::default()
    };
    service.update_course(&admin(), "C1", &patch).await.unwrap();

    let after = service.get_course_by_id(&admin(), "C1").await.unwrap().course;
    assert_eq!(after.capacity, 5);
    assert_eq!(after.status, before.status);
    assert_eq!(after.size, before.size);
    assert_eq!(after.teacher_id, before.teacher_id);
    assert_eq!(after.subject_id, before.subject_id);
    assert_eq!(after.academic_year, before.academic_year);
}

#[tokio::test]
async fn test_update_rejects_invalid_changes() {
    let (service, _) = setup().await;
    open_course(&service, "C1", 3).await;
    for student in ["S1", "S2"] {
        service
            .register_student_to_course(&admin(), &CourseRegistration::new("C1", student))
            .await
            .unwrap();
    }

    let shrink = CoursePatch {
        capacity: Some(1),
        ..Default::default()
    };
    let err = service.update_course(&admin(), "C1", &shrink).await.unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput { .. }));

    let backwards = CoursePatch {
        status: Some(CourseStatus::Initial),
        ..Default::default()
    };
    let err = service.update_course(&admin(), "C1", &backwards).await.unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput { .. }));

    let err = service
        .update_course(&Identity::student("S1"), "C1", &CoursePatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));

    let course = service.get_course_by_id(&admin(), "C1").await.unwrap().course;
    assert_eq!(course.capacity, 3);
    assert_eq!(course.status, CourseStatus::Register);
}

#[tokio::test]
async fn test_empty_patch_is_a_noop() {
    let (service, _) = setup().await;
    service
        .create_course(&admin(), new_course("C1", 2))
        .await
        .unwrap();
    service
        .update_course(&admin(), "C1", &CoursePatch::default())
        .await
        .unwrap();
    assert_eq!(
        service.get_course_by_id(&admin(), "C1").await.unwrap().course.status,
        CourseStatus::Initial
    );
}

#[tokio::test]
async fn test_course_schedules() {
    let (service, _) = setup().await;
    service
        .create_course(&admin(), new_course("C1", 2))
        .await
        .unwrap();

    let err = service
        .get_course_schedules_by_course_id(&Identity::student("S1"), "C1")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound { .. }));

    let schedule = |start: i64, end: i64| NewCourseSchedule {
        course_id: "C1".to_string(),
        room: "B-204".to_string(),
        start_time: start,
        end_time: end,
    };

    let err = service
        .add_course_schedule(&Identity::teacher("T1"), schedule(100, 200))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));

    let err = service
        .add_course_schedule(&admin(), schedule(200, 200))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput { .. }));

    let later = service
        .add_course_schedule(&admin(), schedule(500, 600))
        .await
        .unwrap();
    let earlier = service
        .add_course_schedule(&admin(), schedule(100, 200))
        .await
        .unwrap();
    assert_ne!(later.id, earlier.id);

    let schedules = service
        .get_course_schedules_by_course_id(&Identity::student("S1"), "C1")
        .await
        .unwrap();
    assert_eq!(schedules, vec![earlier.clone(), later.clone()]);

    service
        .delete_course_schedule_by_id(&admin(), earlier.id)
        .await
        .unwrap();
    let err = service
        .delete_course_schedule_by_id(&admin(), earlier.id)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound { .. }));

    let mut orphan = schedule(100, 200);
    orphan.course_id = "C9".to_string();
    let err = service.add_course_schedule(&admin(), orphan).await.unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound { .. }));
}

#[tokio::test]
async fn test_courses_by_user_follow_role() {
    let (service, _) = setup().await;
    open_course(&service, "C1", 5).await;
    open_course(&service, "C2", 5).await;
    let mut other_term = new_course("C3", 5);
    other_term.semester_number = 2;
    service.create_course(&admin(), other_term).await.unwrap();
    let mut other_teacher = new_course("C4", 5);
    other_teacher.teacher_id = "T2".to_string();
    service.create_course(&admin(), other_teacher).await.unwrap();

    service
        .register_student_to_course(&Identity::student("S1"), &CourseRegistration::new("C2", "S1"))
        .await
        .unwrap();

    let enrolled = service
        .get_courses_by_user_id(&Identity::student("S1"), "S1", 1, "2024-2025")
        .await
        .unwrap();
    assert_eq!(
        enrolled.iter().map(|c| c.course.id.as_str()).collect::<Vec<_>>(),
        vec!["C2"]
    );
    assert_eq!(enrolled[0].teacher_name, "Grace Hopper");
    assert_eq!(enrolled[0].subject_name, "Introduction to Computing");

    let taught = service
        .get_courses_by_user_id(&Identity::teacher("T1"), "T1", 1, "2024-2025")
        .await
        .unwrap();
    assert_eq!(
        taught.iter().map(|c| c.course.id.as_str()).collect::<Vec<_>>(),
        vec!["C1", "C2"]
    );

    // 管理員可查任何人
    let by_admin = service
        .get_courses_by_user_id(&admin(), "T1", 2, "2024-2025")
        .await
        .unwrap();
    assert_eq!(by_admin.len(), 1);

    let err = service
        .get_courses_by_user_id(&Identity::student("S2"), "S1", 1, "2024-2025")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));

    let err = service
        .get_courses_by_user_id(&Identity::student("S2"), "S2", 1, "2024-2025")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound { .. }));

    let err = service
        .get_courses_by_user_id(&admin(), "ghost", 1, "2024-2025")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound { .. }));
}

#[tokio::test]
async fn test_delete_course_removes_registrations() {
    let (service, database) = setup().await;
    open_course(&service, "C1", 2).await;
    service
        .register_student_to_course(&admin(), &CourseRegistration::new("C1", "S1"))
        .await
        .unwrap();

    let err = service
        .delete_course_by_id(&Identity::teacher("T1"), "C1")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));

    service.delete_course_by_id(&admin(), "C1").await.unwrap();
    assert_eq!(database.registration_count("C1").await, 0);
    let err = service.get_course_by_id(&admin(), "C1").await.unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound { .. }));
}

#[tokio::test]
async fn test_course_reads_include_teacher_and_subject_names() {
    let (service, _) = setup().await;
    service
        .create_course(&admin(), new_course("C1", 2))
        .await
        .unwrap();

    let details = service
        .get_course_by_id(&Identity::student("S1"), "C1")
        .await
        .unwrap();
    assert_eq!(details.teacher_name, "Grace Hopper");
    assert_eq!(details.subject_name, "Introduction to Computing");

    let patch = CoursePatch {
        teacher_id: Some("T2".to_string()),
        ..Default::default()
    };
    service.update_course(&admin(), "C1", &patch).await.unwrap();
    let details = service.get_course_by_id(&admin(), "C1").await.unwrap();
    assert_eq!(details.course.teacher_id, "T2");
    assert_eq!(details.teacher_name, "Alan Kay");
}

#[tokio::test]
async fn test_create_course_with_unknown_subject_is_not_found() {
    let (service, _) = setup().await;
    let mut course = new_course("C1", 2);
    course.subject_id = "ART".to_string();

    let err = service.create_course(&admin(), course).await.unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound { .. }));
}
