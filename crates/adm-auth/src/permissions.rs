/// 权限定义模块
/// 定义系统管理接口的权限标识、内置角色以及接口级权限校验
use adm_error::{AdmError, Result};

use crate::models::CurrentUser;

/// 权限标识常量，格式为 `模块:资源:操作`
pub struct Permission;

impl Permission {
    /// 超级管理员通配权限
    pub const ALL: &'static str = "*:*:*";

    // 用户管理
    pub const USER_LIST: &'static str = "system:user:list";
    pub const USER_QUERY: &'static str = "system:user:query";
    pub const USER_ADD: &'static str = "system:user:add";
    pub const USER_EDIT: &'static str = "system:user:edit";
    pub const USER_REMOVE: &'static str = "system:user:remove";
    pub const USER_EXPORT: &'static str = "system:user:export";
    pub const USER_RESET_PWD: &'static str = "system:user:resetPwd";

    // 角色管理
    pub const ROLE_LIST: &'static str = "system:role:list";
    pub const ROLE_QUERY: &'static str = "system:role:query";
    pub const ROLE_ADD: &'static str = "system:role:add";
    pub const ROLE_EDIT: &'static str = "system:role:edit";
    pub const ROLE_REMOVE: &'static str = "system:role:remove";
    pub const ROLE_EXPORT: &'static str = "system:role:export";

    // 部门管理
    pub const DEPT_LIST: &'static str = "system:dept:list";
    pub const DEPT_QUERY: &'static str = "system:dept:query";
    pub const DEPT_ADD: &'static str = "system:dept:add";
    pub const DEPT_EDIT: &'static str = "system:dept:edit";
    pub const DEPT_REMOVE: &'static str = "system:dept:remove";

    pub fn all() -> Vec<&'static str> {
        vec![
            Self::USER_LIST,
            Self::USER_QUERY,
            Self::USER_ADD,
            Self::USER_EDIT,
            Self::USER_REMOVE,
            Self::USER_EXPORT,
            Self::USER_RESET_PWD,
            Self::ROLE_LIST,
            Self::ROLE_QUERY,
            Self::ROLE_ADD,
            Self::ROLE_EDIT,
            Self::ROLE_REMOVE,
            Self::ROLE_EXPORT,
            Self::DEPT_LIST,
            Self::DEPT_QUERY,
            Self::DEPT_ADD,
            Self::DEPT_EDIT,
            Self::DEPT_REMOVE,
        ]
    }
}

/// 内置角色
pub struct SystemRole;

impl SystemRole {
    pub const ADMIN: &'static str = "admin";
    pub const COMMON: &'static str = "common";

    /// 超级管理员角色 ID，持有该角色即拥有通配权限
    pub const ADMIN_ROLE_ID: i64 = 1;

    pub fn all() -> Vec<&'static str> {
        vec![Self::ADMIN, Self::COMMON]
    }

    pub fn is_system_role(role: &str) -> bool {
        Self::all().contains(&role)
    }
}

const NO_PERMISSION: &str = "该用户无此接口权限";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    One(&'static str),
    Any(Vec<&'static str>),
    All(Vec<&'static str>),
}

/// 接口权限要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAuth(Requirement);

impl InterfaceAuth {
    pub fn permission(permission: &'static str) -> Self {
        Self(Requirement::One(permission))
    }

    pub fn any(permissions: &[&'static str]) -> Self {
        Self(Requirement::Any(permissions.to_vec()))
    }

    pub fn all(permissions: &[&'static str]) -> Self {
        Self(Requirement::All(permissions.to_vec()))
    }

    pub fn check(&self, user: &CurrentUser) -> Result<()> {
        let granted = match &self.0 {
            Requirement::One(p) => user.has_permission(p),
            Requirement::Any(list) => user.has_any_permission(list),
            Requirement::All(list) => user.has_all_permissions(list),
        };
        if granted {
            Ok(())
        } else {
            Err(AdmError::Unauthorized {
                operation: NO_PERMISSION.to_string(),
            })
        }
    }
}

/// 接口角色要求，按角色标识匹配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAuth(Requirement);

impl RoleAuth {
    pub fn role(role_key: &'static str) -> Self {
        Self(Requirement::One(role_key))
    }

    pub fn any(role_keys: &[&'static str]) -> Self {
        Self(Requirement::Any(role_keys.to_vec()))
    }

    pub fn all(role_keys: &[&'static str]) -> Self {
        Self(Requirement::All(role_keys.to_vec()))
    }

    pub fn check(&self, user: &CurrentUser) -> Result<()> {
        let has = |key: &str| user.has_role(key);
        let granted = match &self.0 {
            Requirement::One(key) => has(key),
            Requirement::Any(keys) => keys.iter().any(|k| has(k)),
            Requirement::All(keys) => keys.iter().all(|k| has(k)),
        };
        if granted {
            Ok(())
        } else {
            Err(AdmError::Unauthorized {
                operation: NO_PERMISSION.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoleScope;
    use adm_core::DataScope;

    fn user_with(perms: &[&str]) -> CurrentUser {
        let mut user = CurrentUser::new(2, "ry", Some(105))
            .with_role(RoleScope::new(2, SystemRole::COMMON, DataScope::Dept));
        user.permissions = perms.iter().map(|p| p.to_string()).collect();
        user
    }

    #[test]
    fn test_single_permission() {
        let user = user_with(&[Permission::USER_LIST]);
        assert!(InterfaceAuth::permission(Permission::USER_LIST).check(&user).is_ok());

        let err = InterfaceAuth::permission(Permission::USER_REMOVE)
            .check(&user)
            .unwrap_err();
        assert!(matches!(err, AdmError::Unauthorized { .. }));
        assert_eq!(err.user_message(), "该用户无此接口权限");
    }

    #[test]
    fn test_any_and_all() {
        let user = user_with(&[Permission::ROLE_LIST, Permission::ROLE_QUERY]);
        assert!(InterfaceAuth::any(&[Permission::ROLE_EDIT, Permission::ROLE_LIST])
            .check(&user)
            .is_ok());
        assert!(InterfaceAuth::all(&[Permission::ROLE_LIST, Permission::ROLE_QUERY])
            .check(&user)
            .is_ok());
        assert!(InterfaceAuth::all(&[Permission::ROLE_LIST, Permission::ROLE_EDIT])
            .check(&user)
            .is_err());
        assert!(InterfaceAuth::any(&[]).check(&user).is_err());
    }

    #[test]
    fn test_wildcard_grants_everything() {
        let user = user_with(&[Permission::ALL]);
        for p in Permission::all() {
            assert!(InterfaceAuth::permission(p).check(&user).is_ok());
        }
    }

    #[test]
    fn test_role_auth() {
        let user = user_with(&[]);
        assert!(RoleAuth::role(SystemRole::COMMON).check(&user).is_ok());
        assert!(RoleAuth::role(SystemRole::ADMIN).check(&user).is_err());
        assert!(RoleAuth::any(&[SystemRole::ADMIN, SystemRole::COMMON])
            .check(&user)
            .is_ok());

        assert!(SystemRole::is_system_role("admin"));
    }

    #[test]
    fn test_role_auth_requires_role_even_for_admin() {
        let mut admin = CurrentUser::new(1, "admin", Some(100))
            .with_role(RoleScope::new(1, SystemRole::ADMIN, DataScope::All));
        admin.is_admin = true;
        admin.permissions.insert(Permission::ALL.to_string());

        let err = RoleAuth::role(SystemRole::COMMON).check(&admin).unwrap_err();
        assert!(matches!(err, AdmError::Unauthorized { .. }));
        assert!(RoleAuth::all(&[SystemRole::ADMIN, SystemRole::COMMON])
            .check(&admin)
            .is_err());
        assert!(RoleAuth::role(SystemRole::ADMIN).check(&admin).is_ok());
        // 通配权限只作用于接口权限
        assert!(InterfaceAuth::permission(Permission::ROLE_EDIT).check(&admin).is_ok());
    }
}
