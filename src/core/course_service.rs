use crate::core::transaction::exec_transaction;
use crate::domain::identity::Identity;
use crate::domain::model::{
    Course, CourseDetails, CourseMembership, CoursePatch, CourseRegistration, CourseSchedule,
    CourseStatus, NewCourse, NewCourseSchedule, Role,
};
use crate::domain::ports::{CourseStore, RegistrationLedger, TransactionManager, UserDirectory};
use crate::utils::error::{RegistryError, Result};

fn ensure_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RegistryError::invalid_input(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

/// 課程生命週期服務：授權、狀態檢查與名額計算都在這一層
pub struct CourseService<S, L, M, U> {
    course_store: S,
    ledger: L,
    transaction_manager: M,
    user_directory: U,
}

impl<S, L, M, U> CourseService<S, L, M, U>
where
    M: TransactionManager,
    S: CourseStore<Tx = M::Tx>,
    L: RegistrationLedger<Tx = M::Tx>,
    U: UserDirectory,
{
    pub fn new(course_store: S, ledger: L, transaction_manager: M, user_directory: U) -> Self {
        Self {
            course_store,
            ledger,
            transaction_manager,
            user_directory,
        }
    }

    /// 授課者必須存在且角色為 Teacher
    async fn ensure_teacher(&self, teacher_id: &str) -> Result<()> {
        let teacher = self.user_directory.get_user(teacher_id).await?;
        if teacher.role != Role::Teacher {
            return Err(RegistryError::invalid_input(format!(
                "teacher_id {} does not reference a teacher",
                teacher_id
            )));
        }
        Ok(())
    }

    pub async fn create_course(&self, identity: &Identity, new_course: NewCourse) -> Result<Course> {
        identity.require(&[Role::Admin], "Required admin role to create course")?;
        ensure_non_empty("id", &new_course.id)?;
        ensure_non_empty("subject_id", &new_course.subject_id)?;
        ensure_non_empty("academic_year", &new_course.academic_year)?;
        if new_course.capacity == 0 {
            return Err(RegistryError::invalid_input("Course capacity must be positive"));
        }
        if new_course.semester_number <= 0 {
            return Err(RegistryError::invalid_input("Semester number must be positive"));
        }
        self.ensure_teacher(&new_course.teacher_id).await?;

        // 不論輸入為何，新課程一律從 Initial、0 人開始
        let course = new_course.into_course();
        self.course_store.create_course(&course, None).await?;
        tracing::info!(
            course_id = %course.id,
            capacity = course.capacity,
            "course created"
        );
        Ok(course)
    }

    /// 課程連同授課教師與科目名稱
    pub async fn get_course_by_id(&self, identity: &Identity, id: &str) -> Result<CourseDetails> {
        tracing::debug!(user_id = %identity.user_id, course_id = %id, "get course");
        self.course_store.get_course_by_id(id, None).await
    }

    pub async fn update_course(
        &self,
        identity: &Identity,
        id: &str,
        patch: &CoursePatch,
    ) -> Result<()> {
        identity.require(&[Role::Admin], "Required admin role to update course")?;
        if patch.is_empty() {
            tracing::debug!(course_id = %id, "empty course patch, nothing to update");
            return Ok(());
        }
        if patch.capacity == Some(0) {
            return Err(RegistryError::invalid_input("Course capacity must be positive"));
        }
        if matches!(patch.semester_number, Some(n) if n <= 0) {
            return Err(RegistryError::invalid_input("Semester number must be positive"));
        }
        if let Some(subject_id) = &patch.subject_id {
            ensure_non_empty("subject_id", subject_id)?;
        }
        if let Some(academic_year) = &patch.academic_year {
            ensure_non_empty("academic_year", academic_year)?;
        }
        if let Some(teacher_id) = &patch.teacher_id {
            self.ensure_teacher(teacher_id).await?;
        }

        exec_transaction(&self.transaction_manager, |tx| async move {
            let course = self.course_store.get_course_for_update(id, Some(&tx)).await?;
            if let Some(status) = patch.status {
                if !course.status.can_transition_to(status) {
                    return Err(RegistryError::invalid_input(format!(
                        "Course status cannot move from {} back to {}",
                        course.status, status
                    )));
                }
            }
            if let Some(capacity) = patch.capacity {
                if capacity < course.size {
                    return Err(RegistryError::invalid_input(format!(
                        "Course capacity {} is below the {} registered students",
                        capacity, course.size
                    )));
                }
            }
            self.course_store.update_course(id, patch, Some(&tx)).await
        })
        .await?;

        tracing::info!(course_id = %id, fields = ?patch.field_names(), "course updated");
        Ok(())
    }

    pub async fn delete_course_by_id(&self, identity: &Identity, id: &str) -> Result<()> {
        identity.require(&[Role::Admin], "Required admin role to delete course")?;
        self.course_store.delete_course_by_id(id, None).await?;
        tracing::info!(course_id = %id, "course deleted");
        Ok(())
    }

    /// 學生選課。整個流程在同一交易內，課程列從讀取到提交都被鎖住，
    /// 同一課程的並行選課會互相排隊，最後一個名額只會被一人取得
    pub async fn register_student_to_course(
        &self,
        identity: &Identity,
        registration: &CourseRegistration,
    ) -> Result<()> {
        identity.require(
            &[Role::Admin, Role::Student],
            "Required admin role or student role to register student",
        )?;
        identity.require_self_service(&registration.student_id)?;
        tracing::debug!(
            course_id = %registration.course_id,
            student_id = %registration.student_id,
            "registering student to course"
        );

        exec_transaction(&self.transaction_manager, |tx| async move {
            let course = self
                .course_store
                .get_course_for_update(&registration.course_id, Some(&tx))
                .await?;
            if course.status != CourseStatus::Register {
                return Err(RegistryError::CourseRegisterTimeout);
            }
            if course.remaining_seats() == 0 {
                return Err(RegistryError::CourseLimitExceeded);
            }
            self.ledger
                .insert_registration(registration, Some(&tx))
                .await?;
            self.course_store
                .adjust_course_size(&course.id, 1, Some(&tx))
                .await
        })
        .await?;

        tracing::info!(
            course_id = %registration.course_id,
            student_id = %registration.student_id,
            "student registered to course"
        );
        Ok(())
    }

    pub async fn unregister_student_from_course(
        &self,
        identity: &Identity,
        course_id: &str,
        student_id: &str,
    ) -> Result<()> {
        identity.require(
            &[Role::Admin, Role::Student],
            "Required admin or student role to delete student from course",
        )?;
        identity.require_self_service(student_id)?;
        let registration = &CourseRegistration::new(course_id, student_id);

        let removed = exec_transaction(&self.transaction_manager, |tx| async move {
            let course = self
                .course_store
                .get_course_for_update(course_id, Some(&tx))
                .await?;
            if course.status != CourseStatus::Register {
                return Err(RegistryError::CourseRegisterTimeout);
            }
            let removed = self
                .ledger
                .delete_registration(registration, Some(&tx))
                .await?;
            // 只有真的刪除了紀錄才扣人數，避免 size 與實際選課數不一致
            if removed {
                self.course_store
                    .adjust_course_size(course_id, -1, Some(&tx))
                    .await?;
            }
            Ok(removed)
        })
        .await?;

        if removed {
            tracing::info!(course_id = %course_id, student_id = %student_id, "student unregistered from course");
        } else {
            tracing::debug!(course_id = %course_id, student_id = %student_id, "student was not registered, nothing to remove");
        }
        Ok(())
    }

    pub async fn add_course_schedule(
        &self,
        identity: &Identity,
        schedule: NewCourseSchedule,
    ) -> Result<CourseSchedule> {
        identity.require(&[Role::Admin], "Required admin role to add course schedule")?;
        ensure_non_empty("room", &schedule.room)?;
        if schedule.end_time <= schedule.start_time {
            return Err(RegistryError::invalid_input(
                "Course schedule end_time must be after start_time",
            ));
        }
        let schedule = self.course_store.add_course_schedule(&schedule, None).await?;
        tracing::info!(
            schedule_id = schedule.id,
            course_id = %schedule.course_id,
            room = %schedule.room,
            "course schedule added"
        );
        Ok(schedule)
    }

    pub async fn get_course_schedules_by_course_id(
        &self,
        identity: &Identity,
        course_id: &str,
    ) -> Result<Vec<CourseSchedule>> {
        tracing::debug!(user_id = %identity.user_id, course_id = %course_id, "list course schedules");
        self.course_store
            .get_course_schedules_by_course_id(course_id, None)
            .await
    }

    pub async fn delete_course_schedule_by_id(&self, identity: &Identity, id: i64) -> Result<()> {
        identity.require(&[Role::Admin], "Required admin role to delete course schedule")?;
        self.course_store.delete_course_schedule_by_id(id, None).await?;
        tracing::info!(schedule_id = id, "course schedule deleted");
        Ok(())
    }

    /// 學生取得已選課程，教師取得授課課程
    pub async fn get_courses_by_user_id(
        &self,
        identity: &Identity,
        user_id: &str,
        semester: i32,
        academic_year: &str,
    ) -> Result<Vec<CourseDetails>> {
        if identity.role != Role::Admin && !identity.is_self(user_id) {
            tracing::warn!(
                user_id = %identity.user_id,
                target = %user_id,
                "course listing for another user rejected"
            );
            return Err(RegistryError::unauthorized("Unauthorized"));
        }
        let user = self.user_directory.get_user(user_id).await?;
        let membership = CourseMembership::for_role(user.role);
        tracing::debug!(user_id = %user_id, ?membership, semester, academic_year = %academic_year, "list courses");
        self.course_store
            .get_courses_by_user_id(user_id, membership, semester, academic_year, None)
            .await
    }
}
