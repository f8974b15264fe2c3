pub mod course_service;
pub mod scenario;
pub mod transaction;

pub use crate::domain::identity::Identity;
pub use crate::domain::model::{
    Course, CourseDetails, CourseMembership, CoursePatch, CourseRegistration, CourseSchedule,
    CourseStatus, NewCourse, NewCourseSchedule, Role, Subject, UserInfo,
};
pub use crate::domain::ports::{CourseStore, RegistrationLedger, TransactionManager, UserDirectory};
pub use crate::utils::error::Result;
