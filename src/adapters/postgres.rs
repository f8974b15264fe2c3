//! PostgreSQL backend for the course store, registration ledger and
//! transaction manager.
//!
//! Row locking relies on `SELECT ... FOR UPDATE`; uniqueness and foreign-key
//! violations are translated into domain errors so callers never inspect
//! driver error codes.

use crate::config::toml_config::DatabaseConfig;
use crate::domain::model::{
    Course, CourseDetails, CourseMembership, CoursePatch, CourseRegistration, CourseSchedule,
    NewCourseSchedule, Subject, UserInfo,
};
use crate::domain::ports::{CourseStore, RegistrationLedger, TransactionManager, UserDirectory};
use crate::utils::error::{RegistryError, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

const COURSE_COLUMNS: &str =
    "courses.id, courses.teacher_id, courses.subject_id, courses.semester_number, courses.academic_year, courses.capacity, courses.size, courses.status";

// 查詢回傳教師與科目名稱
const DETAIL_JOINS: &str = "JOIN users ON courses.teacher_id = users.id \
     JOIN subjects ON courses.subject_id = subjects.id";

/// 可複製的交易控制代碼；提交或回滾後內部變為 `None`
#[derive(Clone)]
pub struct PgTx(Arc<Mutex<Option<Transaction<'static, Postgres>>>>);

enum Conn<'a> {
    Pooled(PoolConnection<Postgres>),
    Tx(MutexGuard<'a, Option<Transaction<'static, Postgres>>>),
}

impl Conn<'_> {
    fn get(&mut self) -> Result<&mut PgConnection> {
        match self {
            Conn::Pooled(conn) => Ok(&mut **conn),
            Conn::Tx(guard) => guard
                .as_mut()
                .map(|tx| &mut **tx)
                .ok_or_else(|| RegistryError::storage("transaction already closed")),
        }
    }
}

fn to_i32(field: &str, value: u32) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| RegistryError::invalid_input(format!("{} is too large: {}", field, value)))
}

fn to_u32(field: &str, value: i32) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RegistryError::storage(format!("{} is negative in store: {}", field, value)))
}

fn course_from_row(row: &PgRow) -> Result<Course> {
    let status: String = row.try_get("status")?;
    Ok(Course {
        id: row.try_get("id")?,
        teacher_id: row.try_get("teacher_id")?,
        subject_id: row.try_get("subject_id")?,
        semester_number: row.try_get("semester_number")?,
        academic_year: row.try_get("academic_year")?,
        capacity: to_u32("capacity", row.try_get("capacity")?)?,
        size: to_u32("size", row.try_get("size")?)?,
        status: status.parse()?,
    })
}

fn details_from_row(row: &PgRow) -> Result<CourseDetails> {
    Ok(CourseDetails {
        course: course_from_row(row)?,
        teacher_name: row.try_get("teacher_name")?,
        subject_name: row.try_get("subject_name")?,
    })
}

fn detail_query(from: &str, filter: &str) -> String {
    format!(
        "SELECT {}, users.name AS teacher_name, subjects.name AS subject_name FROM {} {} WHERE {}",
        COURSE_COLUMNS, from, DETAIL_JOINS, filter
    )
}

fn schedule_from_row(row: &PgRow) -> Result<CourseSchedule> {
    Ok(CourseSchedule {
        id: row.try_get("id")?,
        course_id: row.try_get("course_id")?,
        room: row.try_get("room")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
    })
}

/// 外鍵違反時回傳對應的「找不到」錯誤，其餘原樣保留
fn map_insert_error(err: sqlx::Error, unique_message: &str) -> RegistryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RegistryError::UniqueConstraint {
                message: unique_message.to_string(),
            };
        }
        if db_err.is_foreign_key_violation() {
            let constraint = db_err.constraint().unwrap_or_default();
            let resource = if constraint.contains("course_id") {
                "course"
            } else if constraint.contains("subject_id") {
                "subject"
            } else {
                "user"
            };
            return RegistryError::not_found(resource);
        }
    }
    RegistryError::Database(err)
}

#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds()))
            .connect(url)
            .await?;
        tracing::info!(
            max_connections = config.max_connections(),
            "connected to PostgreSQL"
        );
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 在單一交易中建立資料表（可重複執行）
    pub async fn initialize_schema(&self) -> Result<()> {
        let schema_sql = include_str!("schema.sql");
        let mut tx = self.pool.begin().await?;
        for statement in schema_sql.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
        }
        tx.commit().await?;
        tracing::info!("course registry schema initialized");
        Ok(())
    }

    /// 情境執行前寫入使用者（已存在則更新名稱與角色）
    pub async fn upsert_user(&self, user: &UserInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name, role) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, role = EXCLUDED.role",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_subject(&self, subject: &Subject) -> Result<()> {
        sqlx::query(
            "INSERT INTO subjects (id, name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(&subject.id)
        .bind(&subject.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn conn<'a>(&self, tx: Option<&'a PgTx>) -> Result<Conn<'a>> {
        match tx {
            Some(tx) => Ok(Conn::Tx(tx.0.lock().await)),
            None => Ok(Conn::Pooled(self.pool.acquire().await?)),
        }
    }

    async fn fetch_details(&self, id: &str, tx: Option<&PgTx>) -> Result<CourseDetails> {
        let query = detail_query("courses", "courses.id = $1");
        let mut conn = self.conn(tx).await?;
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(conn.get()?)
            .await
            .map_err(|e| {
                tracing::error!("Course repo, get course err: {}", e);
                RegistryError::from(e)
            })?;
        match row {
            Some(row) => details_from_row(&row),
            None => Err(RegistryError::not_found("course")),
        }
    }
}

#[async_trait]
impl TransactionManager for PgDatabase {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        let tx = self.pool.begin().await?;
        Ok(PgTx(Arc::new(Mutex::new(Some(tx)))))
    }

    async fn commit(&self, tx: PgTx) -> Result<()> {
        let inner = tx
            .0
            .lock()
            .await
            .take()
            .ok_or_else(|| RegistryError::storage("transaction already closed"))?;
        inner.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: PgTx) -> Result<()> {
        let inner = tx.0.lock().await.take();
        if let Some(inner) = inner {
            inner.rollback().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CourseStore for PgDatabase {
    type Tx = PgTx;

    async fn create_course(&self, course: &Course, tx: Option<&PgTx>) -> Result<()> {
        let mut conn = self.conn(tx).await?;
        sqlx::query(
            r#"
            INSERT INTO courses (id, teacher_id, subject_id, semester_number, academic_year, capacity, size, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&course.id)
        .bind(&course.teacher_id)
        .bind(&course.subject_id)
        .bind(course.semester_number)
        .bind(&course.academic_year)
        .bind(to_i32("capacity", course.capacity)?)
        .bind(to_i32("size", course.size)?)
        .bind(course.status.as_str())
        .execute(conn.get()?)
        .await
        .map_err(|e| map_insert_error(e, &format!("course {} already exists", course.id)))?;
        Ok(())
    }

    async fn get_course_by_id(&self, id: &str, tx: Option<&PgTx>) -> Result<CourseDetails> {
        self.fetch_details(id, tx).await
    }

    async fn get_course_for_update(&self, id: &str, tx: Option<&PgTx>) -> Result<Course> {
        let query = format!(
            "SELECT {} FROM courses WHERE courses.id = $1 FOR UPDATE",
            COURSE_COLUMNS
        );
        let mut conn = self.conn(tx).await?;
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(conn.get()?)
            .await
            .map_err(|e| {
                tracing::error!("Course repo, lock course err: {}", e);
                RegistryError::from(e)
            })?;
        match row {
            Some(row) => course_from_row(&row),
            None => Err(RegistryError::not_found("course")),
        }
    }

    async fn update_course(&self, id: &str, patch: &CoursePatch, tx: Option<&PgTx>) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE courses SET ");
        {
            let mut fields = builder.separated(", ");
            if let Some(teacher_id) = &patch.teacher_id {
                fields.push("teacher_id = ").push_bind_unseparated(teacher_id.clone());
            }
            if let Some(subject_id) = &patch.subject_id {
                fields.push("subject_id = ").push_bind_unseparated(subject_id.clone());
            }
            if let Some(semester_number) = patch.semester_number {
                fields.push("semester_number = ").push_bind_unseparated(semester_number);
            }
            if let Some(academic_year) = &patch.academic_year {
                fields.push("academic_year = ").push_bind_unseparated(academic_year.clone());
            }
            if let Some(capacity) = patch.capacity {
                fields.push("capacity = ").push_bind_unseparated(to_i32("capacity", capacity)?);
            }
            if let Some(status) = patch.status {
                fields.push("status = ").push_bind_unseparated(status.as_str());
            }
        }
        builder.push(" WHERE id = ").push_bind(id.to_string());

        let mut conn = self.conn(tx).await?;
        let result = builder
            .build()
            .execute(conn.get()?)
            .await
            .map_err(|e| map_insert_error(e, "course update violates a unique constraint"))?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("course"));
        }
        Ok(())
    }

    async fn adjust_course_size(&self, id: &str, delta: i32, tx: Option<&PgTx>) -> Result<()> {
        let mut conn = self.conn(tx).await?;
        let result = sqlx::query("UPDATE courses SET size = size + $1 WHERE id = $2")
            .bind(delta)
            .bind(id)
            .execute(conn.get()?)
            .await
            .map_err(|e| {
                tracing::error!("Course repo, adjust course size err: {}", e);
                RegistryError::from(e)
            })?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("course"));
        }
        Ok(())
    }

    async fn delete_course_by_id(&self, id: &str, tx: Option<&PgTx>) -> Result<()> {
        let mut conn = self.conn(tx).await?;
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(conn.get()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("course"));
        }
        Ok(())
    }

    async fn add_course_schedule(
        &self,
        schedule: &NewCourseSchedule,
        tx: Option<&PgTx>,
    ) -> Result<CourseSchedule> {
        let mut conn = self.conn(tx).await?;
        let row = sqlx::query(
            r#"
            INSERT INTO course_schedules (course_id, room, start_time, end_time)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&schedule.course_id)
        .bind(&schedule.room)
        .bind(schedule.start_time)
        .bind(schedule.end_time)
        .fetch_one(conn.get()?)
        .await
        .map_err(|e| map_insert_error(e, "course schedule already exists"))?;
        let id: i64 = row.try_get("id")?;
        Ok(schedule.clone().with_id(id))
    }

    async fn get_course_schedules_by_course_id(
        &self,
        course_id: &str,
        tx: Option<&PgTx>,
    ) -> Result<Vec<CourseSchedule>> {
        let mut conn = self.conn(tx).await?;
        let rows = sqlx::query(
            "SELECT id, course_id, room, start_time, end_time FROM course_schedules WHERE course_id = $1 ORDER BY start_time, id",
        )
        .bind(course_id)
        .fetch_all(conn.get()?)
        .await?;
        if rows.is_empty() {
            return Err(RegistryError::not_found("course schedules"));
        }
        rows.iter().map(schedule_from_row).collect()
    }

    async fn delete_course_schedule_by_id(&self, id: i64, tx: Option<&PgTx>) -> Result<()> {
        let mut conn = self.conn(tx).await?;
        let result = sqlx::query("DELETE FROM course_schedules WHERE id = $1")
            .bind(id)
            .execute(conn.get()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("course schedule"));
        }
        Ok(())
    }

    async fn get_courses_by_user_id(
        &self,
        user_id: &str,
        membership: CourseMembership,
        semester: i32,
        academic_year: &str,
        tx: Option<&PgTx>,
    ) -> Result<Vec<CourseDetails>> {
        let filter = "courses.semester_number = $2 AND courses.academic_year = $3";
        let query = match membership {
            CourseMembership::Enrolled => detail_query(
                "course_registrations JOIN courses ON course_registrations.course_id = courses.id",
                &format!("course_registrations.student_id = $1 AND {}", filter),
            ),
            CourseMembership::Teaching => detail_query(
                "courses",
                &format!("courses.teacher_id = $1 AND {}", filter),
            ),
        };
        let query = format!("{} ORDER BY courses.id", query);
        let mut conn = self.conn(tx).await?;
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(semester)
            .bind(academic_year)
            .fetch_all(conn.get()?)
            .await?;
        if rows.is_empty() {
            return Err(RegistryError::not_found("courses"));
        }
        rows.iter().map(details_from_row).collect()
    }
}

#[async_trait]
impl RegistrationLedger for PgDatabase {
    type Tx = PgTx;

    async fn insert_registration(
        &self,
        registration: &CourseRegistration,
        tx: Option<&PgTx>,
    ) -> Result<()> {
        let mut conn = self.conn(tx).await?;
        sqlx::query("INSERT INTO course_registrations (course_id, student_id) VALUES ($1, $2)")
            .bind(&registration.course_id)
            .bind(&registration.student_id)
            .execute(conn.get()?)
            .await
            .map_err(|e| map_insert_error(e, "student already registered"))?;
        Ok(())
    }

    async fn delete_registration(
        &self,
        registration: &CourseRegistration,
        tx: Option<&PgTx>,
    ) -> Result<bool> {
        let mut conn = self.conn(tx).await?;
        let result = sqlx::query(
            "DELETE FROM course_registrations WHERE course_id = $1 AND student_id = $2",
        )
        .bind(&registration.course_id)
        .bind(&registration.student_id)
        .execute(conn.get()?)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserDirectory for PgDatabase {
    async fn get_user(&self, user_id: &str) -> Result<UserInfo> {
        let row = sqlx::query("SELECT id, name, role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RegistryError::not_found("user"))?;
        let role: String = row.try_get("role")?;
        Ok(UserInfo {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            role: role.parse()?,
        })
    }
}
