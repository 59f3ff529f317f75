use serde::Serialize;

use crate::error::AppError;

use super::{Permission, Role};

/// The authenticated caller, resolved from the bearer token by the request
/// guard. `school_id` is set for school-role users and scopes everything
/// they can see or touch.
#[derive(Debug, Serialize, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub school_id: Option<i64>,
    pub school_name: Option<String>,
}

impl AuthUser {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role,
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "Role '{}' may not perform this action",
                self.role
            )))
        }
    }

    /// Single ownership policy for school-scoped resources: admins and DGTT
    /// agents pass, school callers pass only for their own school.
    pub fn require_school_access(&self, owner_school_id: Option<i64>) -> Result<(), AppError> {
        match self.role {
            Role::Admin | Role::DgttAgent => Ok(()),
            Role::School => {
                if self.school_id.is_some() && self.school_id == owner_school_id {
                    Ok(())
                } else {
                    tracing::warn!(
                        username = %self.username,
                        caller_school = ?self.school_id,
                        owner_school = ?owner_school_id,
                        "School ownership check failed"
                    );
                    Err(AppError::Authorization(
                        "Resource belongs to another school".to_string(),
                    ))
                }
            }
        }
    }

    /// `Some(school_id)` for school callers; `None` means unscoped.
    pub fn school_scope(&self) -> Option<i64> {
        match self.role {
            Role::School => self.school_id,
            _ => None,
        }
    }
}
