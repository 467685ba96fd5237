pub mod cache;
pub mod data_scope;
pub mod models;
pub mod permissions;
pub mod predicate;
pub mod rbac;

// 重新导出核心类型
pub use cache::GrantCache;
pub use data_scope::{build_data_scope, DataScopeService, DeptHierarchy, RoleDeptGrants, StaticGrants};
pub use models::{CurrentUser, RoleScope, SysDept, SysRole, SysUser};
pub use permissions::{InterfaceAuth, Permission, RoleAuth, SystemRole};
pub use predicate::Predicate;
pub use rbac::RbacService;

// 错误类型
pub use adm_error::{AdmError, Result};
