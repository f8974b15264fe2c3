pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

#[cfg(feature = "postgres")]
pub use adapters::postgres::{PgDatabase, PgTx};

pub use adapters::memory::MemoryDatabase;
pub use config::{RegistryConfig, ScenarioConfig};
pub use core::{course_service::CourseService, scenario::run_scenario, transaction::exec_transaction};
pub use domain::identity::Identity;
pub use domain::model::{
    Course, CourseDetails, CoursePatch, CourseRegistration, CourseSchedule, CourseStatus,
    NewCourse, NewCourseSchedule, Role, Subject, UserInfo,
};
pub use utils::error::{RegistryError, Result};

/// 記憶體後端組成的服務；同一個資料庫同時提供四個介面
pub type MemoryCourseService =
    CourseService<MemoryDatabase, MemoryDatabase, MemoryDatabase, MemoryDatabase>;

impl MemoryCourseService {
    pub fn in_memory(database: MemoryDatabase) -> Self {
        CourseService::new(database.clone(), database.clone(), database.clone(), database)
    }
}
