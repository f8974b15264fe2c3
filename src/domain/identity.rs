use crate::domain::model::Role;
use crate::utils::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};

/// 已驗證的呼叫者身份，在邊界層建立一次後傳入每個服務操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn teacher(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Teacher)
    }

    pub fn student(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Student)
    }

    pub fn check_authorities(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role)
    }

    pub fn is_self(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn require(&self, allowed: &[Role], message: &str) -> Result<()> {
        if self.check_authorities(allowed) {
            return Ok(());
        }
        tracing::warn!(
            user_id = %self.user_id,
            role = %self.role,
            "authorization rejected: {}",
            message
        );
        Err(RegistryError::unauthorized(message))
    }

    /// 學生只能替自己操作；管理員不受限
    pub fn require_self_service(&self, student_id: &str) -> Result<()> {
        if self.role == Role::Student && !self.is_self(student_id) {
            tracing::warn!(
                user_id = %self.user_id,
                target = %student_id,
                "student attempted to act for another student"
            );
            return Err(RegistryError::unauthorized("Unauthorized"));
        }
        Ok(())
    }
}
