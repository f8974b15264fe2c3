use crate::domain::model::{
    Course, CourseDetails, CourseMembership, CoursePatch, CourseRegistration, CourseSchedule,
    NewCourseSchedule, Subject, UserInfo,
};
use crate::domain::ports::{CourseStore, RegistrationLedger, TransactionManager, UserDirectory};
use crate::utils::error::{RegistryError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// 已提交的資料。選課與課表依課程分組，單一課程的操作不需掃過其他課程
#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, UserInfo>,
    subjects: HashMap<String, Subject>,
    courses: HashMap<String, Course>,
    schedules: HashMap<String, BTreeMap<i64, CourseSchedule>>,
    schedule_courses: HashMap<i64, String>,
    registrations: HashMap<String, BTreeSet<String>>,
}

impl Tables {
    fn drop_children(&mut self, course_id: &str) {
        self.registrations.remove(course_id);
        if let Some(schedules) = self.schedules.remove(course_id) {
            for id in schedules.keys() {
                self.schedule_courses.remove(id);
            }
        }
    }

    fn insert_schedule(&mut self, schedule: CourseSchedule) {
        self.schedule_courses
            .insert(schedule.id, schedule.course_id.clone());
        self.schedules
            .entry(schedule.course_id.clone())
            .or_default()
            .insert(schedule.id, schedule);
    }

    fn remove_schedule(&mut self, id: i64) {
        let Some(course_id) = self.schedule_courses.remove(&id) else {
            return;
        };
        if let Some(schedules) = self.schedules.get_mut(&course_id) {
            schedules.remove(&id);
            if schedules.is_empty() {
                self.schedules.remove(&course_id);
            }
        }
    }

    fn remove_registration(&mut self, registration: &CourseRegistration) {
        if let Some(students) = self.registrations.get_mut(&registration.course_id) {
            students.remove(&registration.student_id);
            if students.is_empty() {
                self.registrations.remove(&registration.course_id);
            }
        }
    }

    fn ensure_references(&self, course: &Course) -> Result<()> {
        if !self.users.contains_key(&course.teacher_id) {
            return Err(RegistryError::not_found("user"));
        }
        if !self.subjects.contains_key(&course.subject_id) {
            return Err(RegistryError::not_found("subject"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    InsertCourse(Course),
    UpdateCourse { id: String, patch: CoursePatch },
    AdjustSize { id: String, delta: i32 },
    DeleteCourse(String),
    InsertSchedule(CourseSchedule),
    DeleteSchedule(i64),
    InsertRegistration(CourseRegistration),
    DeleteRegistration(CourseRegistration),
}

impl WriteOp {
    /// 寫入會取得列鎖的課程 id
    fn locked_course(&self) -> Option<&str> {
        match self {
            WriteOp::UpdateCourse { id, .. }
            | WriteOp::AdjustSize { id, .. }
            | WriteOp::DeleteCourse(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

fn check_size(course: &Course) -> Result<()> {
    if course.size > course.capacity {
        return Err(RegistryError::storage(format!(
            "check constraint violated: course {} size {} exceeds capacity {}",
            course.id, course.size, course.capacity
        )));
    }
    Ok(())
}

/// 交易尚未提交的寫入，以主鍵記錄最終狀態；`None`/`false` 代表刪除
#[derive(Debug, Default)]
struct Overlay {
    courses: HashMap<String, Option<Course>>,
    inserted_courses: HashSet<String>,
    // 這些課程已提交的課表與選課在交易內不可見，提交時一併刪除
    dropped_courses: HashSet<String>,
    schedules: BTreeMap<i64, Option<CourseSchedule>>,
    registrations: BTreeMap<CourseRegistration, bool>,
}

impl Overlay {
    fn view<'a>(&'a self, committed: &'a Tables) -> View<'a> {
        View {
            committed,
            overlay: self,
        }
    }

    fn len(&self) -> usize {
        self.courses.len() + self.schedules.len() + self.registrations.len()
    }

    /// 檢查後暫存一筆寫入；回傳是否影響到資料列
    fn stage(&mut self, committed: &Tables, op: WriteOp) -> Result<bool> {
        let view = self.view(committed);
        match op {
            WriteOp::InsertCourse(course) => {
                if view.course(&course.id).is_some() {
                    return Err(RegistryError::UniqueConstraint {
                        message: format!("course {} already exists", course.id),
                    });
                }
                committed.ensure_references(&course)?;
                self.inserted_courses.insert(course.id.clone());
                self.courses.insert(course.id.clone(), Some(course));
            }
            WriteOp::UpdateCourse { id, patch } => {
                let mut updated = view
                    .course(&id)
                    .cloned()
                    .ok_or_else(|| RegistryError::not_found("course"))?;
                patch.apply_to(&mut updated);
                check_size(&updated)?;
                committed.ensure_references(&updated)?;
                self.courses.insert(id, Some(updated));
            }
            WriteOp::AdjustSize { id, delta } => {
                let mut course = view
                    .course(&id)
                    .cloned()
                    .ok_or_else(|| RegistryError::not_found("course"))?;
                let next = i64::from(course.size) + i64::from(delta);
                if next < 0 || next > i64::from(course.capacity) {
                    return Err(RegistryError::storage(format!(
                        "check constraint violated: course {} size would become {} (capacity {})",
                        id, next, course.capacity
                    )));
                }
                course.size = next as u32;
                self.courses.insert(id, Some(course));
            }
            WriteOp::DeleteCourse(id) => {
                if view.course(&id).is_none() {
                    return Err(RegistryError::not_found("course"));
                }
                self.schedules.retain(|_, schedule| {
                    schedule
                        .as_ref()
                        .map_or(true, |schedule| schedule.course_id != id)
                });
                self.registrations
                    .retain(|registration, _| registration.course_id != id);
                self.inserted_courses.remove(&id);
                self.dropped_courses.insert(id.clone());
                self.courses.insert(id, None);
            }
            WriteOp::InsertSchedule(schedule) => {
                if view.course(&schedule.course_id).is_none() {
                    return Err(RegistryError::not_found("course"));
                }
                self.schedules.insert(schedule.id, Some(schedule));
            }
            WriteOp::DeleteSchedule(id) => {
                if view.schedule(id).is_none() {
                    return Err(RegistryError::not_found("course schedule"));
                }
                self.schedules.insert(id, None);
            }
            WriteOp::InsertRegistration(registration) => {
                if view.course(&registration.course_id).is_none() {
                    return Err(RegistryError::not_found("course"));
                }
                if !committed.users.contains_key(&registration.student_id) {
                    return Err(RegistryError::not_found("user"));
                }
                if view.is_registered(&registration) {
                    return Err(RegistryError::UniqueConstraint {
                        message: "student already registered".to_string(),
                    });
                }
                self.registrations.insert(registration, true);
            }
            WriteOp::DeleteRegistration(registration) => {
                if !view.is_registered(&registration) {
                    return Ok(false);
                }
                self.registrations.insert(registration, false);
            }
        }
        Ok(true)
    }

    /// 提交前對照最新的已提交資料；只檢查不修改
    fn check_conflicts(&self, committed: &Tables) -> Result<()> {
        for id in &self.inserted_courses {
            if committed.courses.contains_key(id) && !self.dropped_courses.contains(id) {
                return Err(RegistryError::UniqueConstraint {
                    message: format!("course {} already exists", id),
                });
            }
        }
        for (id, staged) in &self.courses {
            if staged.is_some()
                && !self.inserted_courses.contains(id)
                && !committed.courses.contains_key(id)
            {
                return Err(RegistryError::not_found("course"));
            }
        }

        let view = self.view(committed);
        for schedule in self.schedules.values().flatten() {
            if view.course(&schedule.course_id).is_none() {
                return Err(RegistryError::not_found("course"));
            }
        }
        for (registration, present) in &self.registrations {
            if !*present {
                continue;
            }
            if view.course(&registration.course_id).is_none() {
                return Err(RegistryError::not_found("course"));
            }
            let already = !self.dropped_courses.contains(&registration.course_id)
                && committed
                    .registrations
                    .get(&registration.course_id)
                    .is_some_and(|students| students.contains(&registration.student_id));
            if already {
                return Err(RegistryError::UniqueConstraint {
                    message: "student already registered".to_string(),
                });
            }
        }
        Ok(())
    }

    fn apply_to(self, tables: &mut Tables) {
        for id in &self.dropped_courses {
            tables.drop_children(id);
        }
        for (id, staged) in self.courses {
            match staged {
                Some(course) => {
                    tables.courses.insert(id, course);
                }
                None => {
                    tables.courses.remove(&id);
                    tables.drop_children(&id);
                }
            }
        }
        for (id, staged) in self.schedules {
            match staged {
                Some(schedule) => tables.insert_schedule(schedule),
                None => tables.remove_schedule(id),
            }
        }
        for (registration, present) in self.registrations {
            if present {
                tables
                    .registrations
                    .entry(registration.course_id)
                    .or_default()
                    .insert(registration.student_id);
            } else {
                tables.remove_registration(&registration);
            }
        }
    }
}

/// 交易看到的資料：先查暫存寫入，沒有才查已提交的資料
#[derive(Clone, Copy)]
struct View<'a> {
    committed: &'a Tables,
    overlay: &'a Overlay,
}

impl<'a> View<'a> {
    fn course(self, id: &str) -> Option<&'a Course> {
        match self.overlay.courses.get(id) {
            Some(staged) => staged.as_ref(),
            None => self.committed.courses.get(id),
        }
    }

    fn courses(self) -> impl Iterator<Item = &'a Course> {
        let overlay = self.overlay;
        self.committed
            .courses
            .iter()
            .filter(move |(id, _)| !overlay.courses.contains_key(id.as_str()))
            .map(|(_, course)| course)
            .chain(overlay.courses.values().flatten())
    }

    fn committed_children_visible(self, course_id: &str) -> bool {
        !self.overlay.dropped_courses.contains(course_id)
    }

    fn is_registered(self, registration: &CourseRegistration) -> bool {
        if let Some(present) = self.overlay.registrations.get(registration) {
            return *present;
        }
        self.committed_children_visible(&registration.course_id)
            && self
                .committed
                .registrations
                .get(&registration.course_id)
                .is_some_and(|students| students.contains(&registration.student_id))
    }

    fn enrolled_course_ids(self, student_id: &str) -> BTreeSet<String> {
        let mut course_ids: BTreeSet<String> = self
            .committed
            .registrations
            .iter()
            .filter(|(course_id, students)| {
                students.contains(student_id) && self.committed_children_visible(course_id)
            })
            .map(|(course_id, _)| course_id.clone())
            .collect();
        for (registration, present) in &self.overlay.registrations {
            if registration.student_id != student_id {
                continue;
            }
            if *present {
                course_ids.insert(registration.course_id.clone());
            } else {
                course_ids.remove(&registration.course_id);
            }
        }
        course_ids
    }

    fn schedule(self, id: i64) -> Option<&'a CourseSchedule> {
        if let Some(staged) = self.overlay.schedules.get(&id) {
            return staged.as_ref();
        }
        let course_id = self.committed.schedule_courses.get(&id)?;
        if !self.committed_children_visible(course_id) {
            return None;
        }
        self.committed.schedules.get(course_id)?.get(&id)
    }

    fn schedules_of(self, course_id: &str) -> Vec<CourseSchedule> {
        let mut schedules = Vec::new();
        if self.committed_children_visible(course_id) {
            if let Some(committed) = self.committed.schedules.get(course_id) {
                schedules.extend(
                    committed
                        .values()
                        .filter(|schedule| !self.overlay.schedules.contains_key(&schedule.id))
                        .cloned(),
                );
            }
        }
        schedules.extend(
            self.overlay
                .schedules
                .values()
                .flatten()
                .filter(|schedule| schedule.course_id == course_id)
                .cloned(),
        );
        schedules.sort_by_key(|schedule| (schedule.start_time, schedule.id));
        schedules
    }

    /// 與教師、科目做內部聯結；參照不存在時視同查無此課程
    fn details(self, course: &Course) -> Option<CourseDetails> {
        let teacher = self.committed.users.get(&course.teacher_id)?;
        let subject = self.committed.subjects.get(&course.subject_id)?;
        Some(CourseDetails {
            course: course.clone(),
            teacher_name: teacher.name.clone(),
            subject_name: subject.name.clone(),
        })
    }
}

/// 課程列鎖表。鎖放開且沒有人等待時即移除該項目
#[derive(Default)]
struct RowLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RowLocks {
    async fn acquire(row_locks: &Arc<RowLocks>, course_id: &str) -> Result<RowGuard> {
        let lock = {
            let mut locks = row_locks
                .locks
                .lock()
                .map_err(|_| RegistryError::storage("row lock table poisoned"))?;
            locks.entry(course_id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        Ok(RowGuard {
            course_id: course_id.to_string(),
            guard: Some(guard),
            row_locks: Arc::clone(row_locks),
        })
    }
}

struct RowGuard {
    course_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    row_locks: Arc<RowLocks>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut locks) = self.row_locks.locks.lock() {
            // 只剩鎖表自己持有時才移除，等待中的交易仍握有複本
            let idle = locks
                .get(&self.course_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1);
            if idle {
                locks.remove(&self.course_id);
            }
        }
    }
}

#[derive(Default)]
struct TxState {
    overlay: Overlay,
    row_locks: HashMap<String, RowGuard>,
    closed: bool,
}

impl TxState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RegistryError::storage("transaction already closed"));
        }
        Ok(())
    }
}

/// 記憶體交易的控制代碼。最後一個複本被丟棄時，未提交的寫入與列鎖一併釋放
#[derive(Clone)]
pub struct MemoryTx {
    id: u64,
    state: Arc<Mutex<TxState>>,
}

impl MemoryTx {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTx").field("id", &self.id).finish()
    }
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    row_locks: Arc<RowLocks>,
    next_schedule_id: AtomicI64,
    next_tx_id: AtomicU64,
}

/// 行程內的課程資料庫：使用者、科目、課程、課表與選課紀錄，附帶列鎖與交易
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// 寫入使用者（已存在則覆蓋名稱與角色）
    pub async fn upsert_user(&self, user: &UserInfo) {
        let mut tables = self.inner.tables.write().await;
        tables.users.insert(user.id.clone(), user.clone());
    }

    pub async fn upsert_subject(&self, subject: &Subject) {
        let mut tables = self.inner.tables.write().await;
        tables.subjects.insert(subject.id.clone(), subject.clone());
    }

    /// 目前已提交的選課人數（測試與稽核用）
    pub async fn registration_count(&self, course_id: &str) -> usize {
        let tables = self.inner.tables.read().await;
        tables
            .registrations
            .get(course_id)
            .map_or(0, |students| students.len())
    }

    pub async fn is_registered(&self, registration: &CourseRegistration) -> bool {
        let tables = self.inner.tables.read().await;
        Overlay::default().view(&tables).is_registered(registration)
    }

    /// 交易內取得課程列鎖，已持有則直接返回
    async fn lock_row(&self, tx: &MemoryTx, course_id: &str) -> Result<()> {
        {
            let state = tx.state.lock().await;
            state.ensure_open()?;
            if state.row_locks.contains_key(course_id) {
                return Ok(());
            }
        }

        let guard = RowLocks::acquire(&self.inner.row_locks, course_id).await?;
        tracing::trace!(tx = tx.id, course_id = %course_id, "row lock acquired");

        let mut state = tx.state.lock().await;
        state.ensure_open()?;
        state.row_locks.entry(course_id.to_string()).or_insert(guard);
        Ok(())
    }

    // 鎖的順序固定為交易狀態 -> 資料表
    async fn read<R>(&self, tx: Option<&MemoryTx>, f: impl FnOnce(View<'_>) -> R) -> Result<R> {
        match tx {
            None => {
                let tables = self.inner.tables.read().await;
                let overlay = Overlay::default();
                Ok(f(overlay.view(&tables)))
            }
            Some(tx) => {
                let state = tx.state.lock().await;
                state.ensure_open()?;
                let tables = self.inner.tables.read().await;
                Ok(f(state.overlay.view(&tables)))
            }
        }
    }

    async fn write(&self, tx: Option<&MemoryTx>, op: WriteOp) -> Result<bool> {
        match tx {
            None => {
                let _row = match op.locked_course() {
                    Some(course_id) => {
                        Some(RowLocks::acquire(&self.inner.row_locks, course_id).await?)
                    }
                    None => None,
                };
                let mut tables = self.inner.tables.write().await;
                let mut overlay = Overlay::default();
                let changed = overlay.stage(&tables, op)?;
                overlay.apply_to(&mut tables);
                Ok(changed)
            }
            Some(tx) => {
                if let Some(course_id) = op.locked_course() {
                    self.lock_row(tx, course_id).await?;
                }
                let mut state = tx.state.lock().await;
                state.ensure_open()?;
                let tables = self.inner.tables.read().await;
                state.overlay.stage(&tables, op)
            }
        }
    }
}

#[async_trait]
impl TransactionManager for MemoryDatabase {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let id = self.inner.next_tx_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(tx = id, "transaction started");
        Ok(MemoryTx {
            id,
            state: Arc::new(Mutex::new(TxState::default())),
        })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<()> {
        let mut state = tx.state.lock().await;
        state.ensure_open()?;
        state.closed = true;
        let overlay = std::mem::take(&mut state.overlay);
        let row_locks = std::mem::take(&mut state.row_locks);

        let writes = overlay.len();
        if writes > 0 {
            let mut tables = self.inner.tables.write().await;
            overlay.check_conflicts(&tables)?;
            overlay.apply_to(&mut tables);
        }
        // 資料寫入後才釋放列鎖，等待中的交易才會讀到最新狀態
        drop(row_locks);
        tracing::trace!(tx = tx.id, writes, "transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<()> {
        let mut state = tx.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.overlay = Overlay::default();
        state.row_locks.clear();
        tracing::trace!(tx = tx.id, "transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl CourseStore for MemoryDatabase {
    type Tx = MemoryTx;

    async fn create_course(&self, course: &Course, tx: Option<&MemoryTx>) -> Result<()> {
        self.write(tx, WriteOp::InsertCourse(course.clone()))
            .await
            .map(|_| ())
    }

    async fn get_course_by_id(&self, id: &str, tx: Option<&MemoryTx>) -> Result<CourseDetails> {
        self.read(tx, |view| view.course(id).and_then(|course| view.details(course)))
            .await?
            .ok_or_else(|| RegistryError::not_found("course"))
    }

    async fn get_course_for_update(&self, id: &str, tx: Option<&MemoryTx>) -> Result<Course> {
        match tx {
            Some(tx) => self.lock_row(tx, id).await?,
            // 自動提交：等待其他交易釋放後立即放開
            None => drop(RowLocks::acquire(&self.inner.row_locks, id).await?),
        }
        self.read(tx, |view| view.course(id).cloned())
            .await?
            .ok_or_else(|| RegistryError::not_found("course"))
    }

    async fn update_course(
        &self,
        id: &str,
        patch: &CoursePatch,
        tx: Option<&MemoryTx>,
    ) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let op = WriteOp::UpdateCourse {
            id: id.to_string(),
            patch: patch.clone(),
        };
        self.write(tx, op).await.map(|_| ())
    }

    async fn adjust_course_size(&self, id: &str, delta: i32, tx: Option<&MemoryTx>) -> Result<()> {
        let op = WriteOp::AdjustSize {
            id: id.to_string(),
            delta,
        };
        self.write(tx, op).await.map(|_| ())
    }

    async fn delete_course_by_id(&self, id: &str, tx: Option<&MemoryTx>) -> Result<()> {
        self.write(tx, WriteOp::DeleteCourse(id.to_string()))
            .await
            .map(|_| ())
    }

    async fn add_course_schedule(
        &self,
        schedule: &NewCourseSchedule,
        tx: Option<&MemoryTx>,
    ) -> Result<CourseSchedule> {
        let id = self.inner.next_schedule_id.fetch_add(1, Ordering::SeqCst) + 1;
        let schedule = schedule.clone().with_id(id);
        self.write(tx, WriteOp::InsertSchedule(schedule.clone()))
            .await?;
        Ok(schedule)
    }

    async fn get_course_schedules_by_course_id(
        &self,
        course_id: &str,
        tx: Option<&MemoryTx>,
    ) -> Result<Vec<CourseSchedule>> {
        let schedules = self.read(tx, |view| view.schedules_of(course_id)).await?;
        if schedules.is_empty() {
            return Err(RegistryError::not_found("course schedules"));
        }
        Ok(schedules)
    }

    async fn delete_course_schedule_by_id(&self, id: i64, tx: Option<&MemoryTx>) -> Result<()> {
        self.write(tx, WriteOp::DeleteSchedule(id)).await.map(|_| ())
    }

    async fn get_courses_by_user_id(
        &self,
        user_id: &str,
        membership: CourseMembership,
        semester: i32,
        academic_year: &str,
        tx: Option<&MemoryTx>,
    ) -> Result<Vec<CourseDetails>> {
        let mut courses = self
            .read(tx, |view| {
                let matches_term = |course: &&Course| {
                    course.semester_number == semester && course.academic_year == academic_year
                };
                match membership {
                    CourseMembership::Enrolled => view
                        .enrolled_course_ids(user_id)
                        .iter()
                        .filter_map(|course_id| view.course(course_id))
                        .filter(matches_term)
                        .filter_map(|course| view.details(course))
                        .collect::<Vec<_>>(),
                    CourseMembership::Teaching => view
                        .courses()
                        .filter(|course| course.teacher_id == user_id)
                        .filter(matches_term)
                        .filter_map(|course| view.details(course))
                        .collect::<Vec<_>>(),
                }
            })
            .await?;
        if courses.is_empty() {
            return Err(RegistryError::not_found("courses"));
        }
        courses.sort_by(|a, b| a.course.id.cmp(&b.course.id));
        Ok(courses)
    }
}

#[async_trait]
impl RegistrationLedger for MemoryDatabase {
    type Tx = MemoryTx;

    async fn insert_registration(
        &self,
        registration: &CourseRegistration,
        tx: Option<&MemoryTx>,
    ) -> Result<()> {
        self.write(tx, WriteOp::InsertRegistration(registration.clone()))
            .await
            .map(|_| ())
    }

    async fn delete_registration(
        &self,
        registration: &CourseRegistration,
        tx: Option<&MemoryTx>,
    ) -> Result<bool> {
        self.write(tx, WriteOp::DeleteRegistration(registration.clone()))
            .await
    }
}

#[async_trait]
impl UserDirectory for MemoryDatabase {
    async fn get_user(&self, user_id: &str) -> Result<UserInfo> {
        let tables = self.inner.tables.read().await;
        tables
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found("user"))
    }
}
