//! 数据权限范围处理
//!
//! 根据当前用户角色的数据权限范围，为被查询实体生成行级过滤谓词：
//! - 全部数据权限：不做限制
//! - 自定义数据权限：部门列属于角色被授予的部门
//! - 本部门数据权限：部门列等于用户所在部门
//! - 本部门及以下数据权限：部门列为用户所在部门或其后代部门
//! - 仅本人数据权限：所属用户列等于当前用户
//!
//! 多个角色的条件以 OR 组合，用户可见各角色可见范围的并集。

use adm_core::{DataScope, DeptTree, EntityShape, ScopedEntity, ScopedRow};
use adm_error::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::CurrentUser;
use crate::predicate::Predicate;

/// 角色 -> 自定义数据权限部门（sys_role_dept）
#[async_trait]
pub trait RoleDeptGrants: Send + Sync {
    /// 未授予任何部门的角色可以不出现在结果中
    async fn dept_ids_for_roles(&self, role_ids: &[i64]) -> Result<HashMap<i64, BTreeSet<i64>>>;
}

/// 部门层级（祖级链）
#[async_trait]
pub trait DeptHierarchy: Send + Sync {
    async fn load_tree(&self) -> Result<DeptTree>;
}

/// 构造数据权限谓词。纯函数，不做任何 I/O。
///
/// 自定义数据权限角色的部门须已填入 [`crate::models::RoleScope::custom_dept_ids`]。
/// 返回值总是 `Always` 或 `Or(..)`；零个条件的 `Or` 表示不可见任何数据。
pub fn build_data_scope(user: &CurrentUser, shape: &EntityShape) -> Predicate {
    if user.is_admin {
        return Predicate::Always;
    }

    // 多个自定义角色合并为同一个 IN 条件
    let custom_depts: BTreeSet<i64> = user
        .roles
        .iter()
        .filter(|r| r.data_scope == DataScope::Custom)
        .flat_map(|r| r.custom_dept_ids.iter().copied())
        .collect();

    let mut clauses: Vec<Predicate> = Vec::new();
    for role in &user.roles {
        let clause = match &role.data_scope {
            // 已累积的条件全部丢弃
            DataScope::All => return Predicate::Always,
            DataScope::Custom => match shape.dept_column {
                Some(column) => Predicate::In {
                    column,
                    values: custom_depts.clone(),
                },
                None => Predicate::Never,
            },
            DataScope::Dept => match (shape.dept_column, user.dept_id) {
                (Some(column), Some(dept_id)) => Predicate::Equals {
                    column,
                    value: dept_id,
                },
                _ => Predicate::Never,
            },
            DataScope::DeptAndChild => match (shape.dept_column, user.dept_id) {
                (Some(column), Some(dept_id)) => Predicate::AncestorContains { column, dept_id },
                _ => Predicate::Never,
            },
            DataScope::SelfOnly => match shape.owner_column {
                Some(column) => Predicate::Equals {
                    column,
                    value: user.user_id,
                },
                None => Predicate::Never,
            },
            DataScope::Unknown(code) => {
                warn!(
                    user_id = user.user_id,
                    role_id = role.role_id,
                    data_scope = %code,
                    "未知的数据权限范围，按无权限处理"
                );
                Predicate::Never
            }
        };

        if !clauses.contains(&clause) {
            clauses.push(clause);
        }
    }

    debug!(
        user_id = user.user_id,
        entity = shape.alias,
        clauses = clauses.len(),
        "数据权限条件已生成"
    );

    Predicate::Or(clauses)
}

/// 数据权限服务：补全自定义数据权限的部门授权后构造谓词
pub struct DataScopeService {
    grants: Arc<dyn RoleDeptGrants>,
    hierarchy: Arc<dyn DeptHierarchy>,
}

impl DataScopeService {
    pub fn new(grants: Arc<dyn RoleDeptGrants>, hierarchy: Arc<dyn DeptHierarchy>) -> Self {
        Self { grants, hierarchy }
    }

    /// 管理员或持有全部数据权限时直接返回 `Always`，不查询授权
    pub async fn resolve(&self, user: &CurrentUser, shape: &EntityShape) -> Result<Predicate> {
        if user.bypasses_data_scope() {
            debug!(user_id = user.user_id, entity = shape.alias, "不受数据权限限制");
            return Ok(Predicate::Always);
        }

        let custom_role_ids = user.custom_role_ids();
        if custom_role_ids.is_empty() {
            return Ok(build_data_scope(user, shape));
        }

        let grants = self.grants.dept_ids_for_roles(&custom_role_ids).await?;
        let mut resolved = user.clone();
        for role in resolved
            .roles
            .iter_mut()
            .filter(|r| r.data_scope == DataScope::Custom)
        {
            role.custom_dept_ids = grants.get(&role.role_id).cloned().unwrap_or_default();
        }

        Ok(build_data_scope(&resolved, shape))
    }

    pub async fn resolve_for<E: ScopedEntity>(&self, user: &CurrentUser) -> Result<Predicate> {
        self.resolve(user, &E::SHAPE).await
    }

    /// 在内存中过滤可见行，只有需要时才加载部门树
    pub async fn visible_rows<R>(&self, user: &CurrentUser, rows: Vec<R>) -> Result<Vec<R>>
    where
        R: ScopedEntity + ScopedRow,
    {
        let predicate = self.resolve_for::<R>(user).await?;
        if predicate.is_always() {
            return Ok(rows);
        }
        if predicate.is_never() {
            return Ok(Vec::new());
        }

        let tree = if predicate.needs_dept_tree() {
            self.hierarchy.load_tree().await?
        } else {
            DeptTree::new()
        };

        Ok(rows
            .into_iter()
            .filter(|row| predicate.matches(row, &tree))
            .collect())
    }
}

/// 预先加载好的授权表
#[derive(Debug, Clone, Default)]
pub struct StaticGrants {
    grants: HashMap<i64, BTreeSet<i64>>,
}

impl StaticGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant<I: IntoIterator<Item = i64>>(mut self, role_id: i64, dept_ids: I) -> Self {
        self.grants.entry(role_id).or_default().extend(dept_ids);
        self
    }
}

#[async_trait]
impl RoleDeptGrants for StaticGrants {
    async fn dept_ids_for_roles(&self, role_ids: &[i64]) -> Result<HashMap<i64, BTreeSet<i64>>> {
        Ok(role_ids
            .iter()
            .filter_map(|id| self.grants.get(id).map(|depts| (*id, depts.clone())))
            .collect())
    }
}

#[async_trait]
impl DeptHierarchy for DeptTree {
    async fn load_tree(&self) -> Result<DeptTree> {
        Ok(self.clone())
    }
}
