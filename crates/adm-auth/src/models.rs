use adm_core::{bare_column, DataScope, EntityShape, ScopedEntity, ScopedRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::permissions::Permission;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SysUser {
    pub user_id: i64,
    pub dept_id: Option<i64>,
    pub user_name: String,
    pub nick_name: String,
    pub status: String,
}

impl ScopedEntity for SysUser {
    const SHAPE: EntityShape = EntityShape::SYS_USER;
}

impl ScopedRow for SysUser {
    fn column(&self, name: &str) -> Option<i64> {
        match bare_column(name) {
            "user_id" => Some(self.user_id),
            "dept_id" => self.dept_id,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SysDept {
    pub dept_id: i64,
    pub parent_id: Option<i64>,
    pub ancestors: String,
    pub dept_name: String,
    pub status: String,
}

impl ScopedEntity for SysDept {
    const SHAPE: EntityShape = EntityShape::SYS_DEPT;
}

impl ScopedRow for SysDept {
    fn column(&self, name: &str) -> Option<i64> {
        match bare_column(name) {
            "dept_id" => Some(self.dept_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SysRole {
    pub role_id: i64,
    pub role_name: String,
    pub role_key: String,
    pub data_scope: String,
    pub status: String,
}

/// 当前用户持有的角色（数据权限视角）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleScope {
    pub role_id: i64,
    pub role_key: String,
    pub data_scope: DataScope,
    /// 仅自定义数据权限使用：sys_role_dept 中授予的部门
    #[serde(default)]
    pub custom_dept_ids: BTreeSet<i64>,
}

impl RoleScope {
    pub fn new(role_id: i64, role_key: &str, data_scope: DataScope) -> Self {
        Self {
            role_id,
            role_key: role_key.to_string(),
            data_scope,
            custom_dept_ids: BTreeSet::new(),
        }
    }

    pub fn with_custom_depts<I: IntoIterator<Item = i64>>(mut self, dept_ids: I) -> Self {
        self.custom_dept_ids = dept_ids.into_iter().collect();
        self
    }
}

impl From<SysRole> for RoleScope {
    fn from(role: SysRole) -> Self {
        Self {
            role_id: role.role_id,
            role_key: role.role_key,
            data_scope: DataScope::parse(&role.data_scope),
            custom_dept_ids: BTreeSet::new(),
        }
    }
}

/// 当前请求的登录用户，角色已解析
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub user_id: i64,
    pub user_name: String,
    pub dept_id: Option<i64>,
    pub is_admin: bool,
    pub roles: Vec<RoleScope>,
    pub permissions: HashSet<String>,
}

impl CurrentUser {
    pub fn new(user_id: i64, user_name: &str, dept_id: Option<i64>) -> Self {
        Self {
            user_id,
            user_name: user_name.to_string(),
            dept_id,
            is_admin: false,
            roles: Vec::new(),
            permissions: HashSet::new(),
        }
    }

    pub fn with_role(mut self, role: RoleScope) -> Self {
        self.roles.push(role);
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(Permission::ALL) || self.permissions.contains(permission)
    }

    pub fn has_any_permission(&self, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.has_permission(p))
    }

    pub fn has_all_permissions(&self, permissions: &[&str]) -> bool {
        permissions.iter().all(|p| self.has_permission(p))
    }

    pub fn has_role(&self, role_key: &str) -> bool {
        self.roles.iter().any(|r| r.role_key == role_key)
    }

    pub fn role_keys(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.role_key.as_str()).collect()
    }

    /// 管理员或持有“全部数据权限”角色时不受数据权限限制
    pub fn bypasses_data_scope(&self) -> bool {
        self.is_admin || self.roles.iter().any(|r| r.data_scope == DataScope::All)
    }

    pub fn custom_role_ids(&self) -> Vec<i64> {
        self.roles
            .iter()
            .filter(|r| r.data_scope == DataScope::Custom)
            .map(|r| r.role_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_permission() {
        let mut user = CurrentUser::new(2, "ry", Some(105));
        user.permissions.insert(Permission::ALL.to_string());
        assert!(user.has_permission(Permission::USER_REMOVE));
        assert!(user.has_all_permissions(&[Permission::ROLE_LIST, Permission::DEPT_EDIT]));
    }

    #[test]
    fn test_custom_role_ids_and_bypass() {
        let user = CurrentUser::new(2, "ry", Some(105))
            .with_role(RoleScope::new(2, "common", DataScope::Custom))
            .with_role(RoleScope::new(3, "auditor", DataScope::SelfOnly))
            .with_role(RoleScope::new(4, "ops", DataScope::Custom));
        assert_eq!(user.custom_role_ids(), vec![2, 4]);
        assert!(!user.bypasses_data_scope());
        assert!(user.has_role("auditor"));
        assert_eq!(user.role_keys(), vec!["common", "auditor", "ops"]);

        let user = user.with_role(RoleScope::new(1, "admin", DataScope::All));
        assert!(user.bypasses_data_scope());
    }

    #[test]
    fn test_role_from_row_parses_scope() {
        let role = SysRole {
            role_id: 9,
            role_name: "审计".to_string(),
            role_key: "audit".to_string(),
            data_scope: "8".to_string(),
            status: "0".to_string(),
        };
        let scope = RoleScope::from(role);
        assert_eq!(scope.data_scope, DataScope::Unknown("8".to_string()));
    }

    #[test]
    fn test_model_rows_expose_scoped_columns() {
        let user = SysUser {
            user_id: 7,
            dept_id: None,
            user_name: "u7".to_string(),
            nick_name: "u7".to_string(),
            status: "0".to_string(),
        };
        assert_eq!(user.column("sys_user.user_id"), Some(7));
        assert_eq!(user.column("sys_user.dept_id"), None);
        assert_eq!(SysUser::SHAPE, EntityShape::SYS_USER);
    }
}
