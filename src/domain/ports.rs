use crate::domain::model::{
    Course, CourseDetails, CourseMembership, CoursePatch, CourseRegistration, CourseSchedule,
    NewCourseSchedule, UserInfo,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 交易協調器。`Tx` 是可複製的交易控制代碼，交易內取得的列鎖
/// 會持有到 commit 或 rollback 為止
#[async_trait]
pub trait TransactionManager: Send + Sync {
    type Tx: Clone + Send + Sync + 'static;

    async fn begin(&self) -> Result<Self::Tx>;
    async fn commit(&self, tx: Self::Tx) -> Result<()>;
    async fn rollback(&self, tx: Self::Tx) -> Result<()>;
}

/// 課程與課表的持久化。`tx` 為 `None` 時每個呼叫自動提交
#[async_trait]
pub trait CourseStore: Send + Sync {
    type Tx: Send + Sync;

    async fn create_course(&self, course: &Course, tx: Option<&Self::Tx>) -> Result<()>;
    /// 課程連同教師與科目名稱
    async fn get_course_by_id(&self, id: &str, tx: Option<&Self::Tx>) -> Result<CourseDetails>;
    /// 讀取並鎖定課程列（SELECT ... FOR UPDATE）
    async fn get_course_for_update(&self, id: &str, tx: Option<&Self::Tx>) -> Result<Course>;
    async fn update_course(&self, id: &str, patch: &CoursePatch, tx: Option<&Self::Tx>)
        -> Result<()>;
    async fn adjust_course_size(&self, id: &str, delta: i32, tx: Option<&Self::Tx>) -> Result<()>;
    async fn delete_course_by_id(&self, id: &str, tx: Option<&Self::Tx>) -> Result<()>;

    async fn add_course_schedule(
        &self,
        schedule: &NewCourseSchedule,
        tx: Option<&Self::Tx>,
    ) -> Result<CourseSchedule>;
    async fn get_course_schedules_by_course_id(
        &self,
        course_id: &str,
        tx: Option<&Self::Tx>,
    ) -> Result<Vec<CourseSchedule>>;
    async fn delete_course_schedule_by_id(&self, id: i64, tx: Option<&Self::Tx>) -> Result<()>;

    async fn get_courses_by_user_id(
        &self,
        user_id: &str,
        membership: CourseMembership,
        semester: i32,
        academic_year: &str,
        tx: Option<&Self::Tx>,
    ) -> Result<Vec<CourseDetails>>;
}

#[async_trait]
pub trait RegistrationLedger: Send + Sync {
    type Tx: Send + Sync;

    async fn insert_registration(
        &self,
        registration: &CourseRegistration,
        tx: Option<&Self::Tx>,
    ) -> Result<()>;
    /// 回傳是否真的刪除了一列；不存在不視為錯誤
    async fn delete_registration(
        &self,
        registration: &CourseRegistration,
        tx: Option<&Self::Tx>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<UserInfo>;
}
