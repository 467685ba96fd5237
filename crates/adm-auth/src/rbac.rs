use adm_core::{parse_ancestors, DeptSourceConfig, DeptTree};
use adm_error::{AdmError, DatabaseContext, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use crate::cache::GrantCache;
use crate::data_scope::{DeptHierarchy, RoleDeptGrants};
use crate::models::{CurrentUser, RoleScope, SysRole, SysUser};
use crate::permissions::{Permission, SystemRole};
use crate::predicate::Predicate;

/// RBAC服务 - 加载登录用户的角色与权限，并执行数据权限校验
///
/// 登录用户每次请求都从数据库读取，角色的数据权限范围变更即时生效；
/// 只缓存自定义数据权限的部门授权。
pub struct RbacService {
    db_pool: PgPool,
    admin_user_id: i64,
    dept_source: DeptSourceConfig,
    grant_cache: GrantCache,
}

impl RbacService {
    pub fn new(
        db_pool: PgPool,
        admin_user_id: i64,
        dept_source: DeptSourceConfig,
        grant_cache: GrantCache,
    ) -> Self {
        Self {
            db_pool,
            admin_user_id,
            dept_source,
            grant_cache,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        user_id == self.admin_user_id
    }

    pub fn dept_source(&self) -> &DeptSourceConfig {
        &self.dept_source
    }

    /// 清除所有缓存
    pub async fn clear_all_cache(&self) -> Result<()> {
        self.grant_cache.clear().await
    }

    /// 角色的部门授权变更后调用
    pub async fn clear_role_grants(&self, role_id: i64) -> Result<()> {
        debug!(role_id, "清除角色部门授权缓存");
        self.grant_cache.invalidate(role_id).await
    }

    /// 获取登录用户：基本信息、启用的角色、菜单权限
    pub async fn load_current_user(&self, user_id: i64) -> Result<CurrentUser> {
        let row: Option<SysUser> = sqlx::query_as(
            r#"
            SELECT user_id, dept_id, user_name, nick_name, status
            FROM sys_user
            WHERE user_id = $1 AND del_flag = '0'
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| AdmError::Database {
            message: format!("load_user: {}", e),
            context: Some(DatabaseContext::table("sys_user")),
        })?;

        let sys_user = row.ok_or_else(|| AdmError::NotFound {
            resource: format!("sys_user: {}", user_id),
        })?;

        let roles: Vec<SysRole> = sqlx::query_as(
            r#"
            SELECT r.role_id, r.role_name, r.role_key, r.data_scope, r.status
            FROM sys_role r
            JOIN sys_user_role ur ON ur.role_id = r.role_id
            WHERE ur.user_id = $1
            AND r.status = '0'
            AND r.del_flag = '0'
            ORDER BY r.role_sort, r.role_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| AdmError::Database {
            message: format!("load_user_roles: {}", e),
            context: Some(DatabaseContext::table("sys_role")),
        })?;

        let is_admin = self.is_admin(user_id);
        let holds_admin_role = roles.iter().any(|r| r.role_id == SystemRole::ADMIN_ROLE_ID);
        let permissions = if is_admin || holds_admin_role {
            HashSet::from([Permission::ALL.to_string()])
        } else {
            self.load_menu_permissions(user_id).await?
        };

        let user = CurrentUser {
            user_id: sys_user.user_id,
            user_name: sys_user.user_name,
            dept_id: sys_user.dept_id,
            is_admin,
            roles: roles.into_iter().map(RoleScope::from).collect(),
            permissions,
        };

        debug!(
            user_id,
            roles = ?user.role_keys(),
            permissions = user.permissions.len(),
            "登录用户已加载"
        );

        Ok(user)
    }

    async fn load_menu_permissions(&self, user_id: i64) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT m.perms
            FROM sys_menu m
            JOIN sys_role_menu rm ON rm.menu_id = m.menu_id
            JOIN sys_user_role ur ON ur.role_id = rm.role_id
            JOIN sys_role r ON r.role_id = ur.role_id
            WHERE ur.user_id = $1
            AND m.status = '0'
            AND r.status = '0'
            AND r.del_flag = '0'
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| AdmError::Database {
            message: format!("load_menu_permissions: {}", e),
            context: Some(DatabaseContext::table("sys_menu")),
        })?;

        let mut permissions = HashSet::new();
        for row in rows {
            let perms: Option<String> = row.get("perms");
            // 一个菜单可以配置多个以逗号分隔的权限标识
            permissions.extend(
                perms
                    .iter()
                    .flat_map(|p| p.split(','))
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(permissions)
    }

    /// 校验是否有部门的数据权限
    pub async fn check_dept_data_scope(&self, dept_id: i64, scope: &Predicate) -> Result<()> {
        if scope.is_always() {
            return Ok(());
        }
        let mut qb = dept_scope_query(dept_id, scope, &self.dept_source);
        self.ensure_visible(&mut qb, "sys_dept", "没有权限访问部门数据")
            .await
    }

    /// 校验是否有用户的数据权限
    pub async fn check_user_data_scope(&self, user_id: i64, scope: &Predicate) -> Result<()> {
        if scope.is_always() {
            return Ok(());
        }
        let mut qb = user_scope_query(user_id, scope, &self.dept_source);
        self.ensure_visible(&mut qb, "sys_user", "没有权限访问用户数据")
            .await
    }

    /// 校验是否有角色的数据权限，所有角色都必须可见
    pub async fn check_role_data_scope(&self, role_ids: &[i64], scope: &Predicate) -> Result<()> {
        if scope.is_always() {
            return Ok(());
        }
        let distinct: BTreeSet<i64> = role_ids.iter().copied().collect();
        if distinct.is_empty() {
            return Ok(());
        }

        let mut qb = role_scope_query(&distinct, scope, &self.dept_source);
        let visible: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.db_pool)
            .await
            .map_err(|e| AdmError::Database {
                message: format!("check_role_data_scope: {}", e),
                context: Some(DatabaseContext::table("sys_role")),
            })?;

        if visible as usize == distinct.len() {
            Ok(())
        } else {
            warn!(role_ids = ?distinct, visible, "角色数据权限校验未通过");
            Err(AdmError::Unauthorized {
                operation: "没有权限访问角色数据".to_string(),
            })
        }
    }

    async fn ensure_visible(
        &self,
        qb: &mut QueryBuilder<'static, Postgres>,
        table: &str,
        denied: &str,
    ) -> Result<()> {
        let visible: bool = qb
            .build_query_scalar::<bool>()
            .fetch_one(&self.db_pool)
            .await
            .map_err(|e| AdmError::Database {
                message: format!("check_data_scope: {}", e),
                context: Some(DatabaseContext::table(table)),
            })?;

        if visible {
            Ok(())
        } else {
            warn!(table, "数据权限校验未通过");
            Err(AdmError::Unauthorized {
                operation: denied.to_string(),
            })
        }
    }
}

pub(crate) fn dept_scope_query(
    dept_id: i64,
    scope: &Predicate,
    dept_source: &DeptSourceConfig,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT EXISTS(SELECT 1 FROM sys_dept WHERE sys_dept.del_flag = '0' AND sys_dept.dept_id = ",
    );
    qb.push_bind(dept_id).push(" AND ");
    scope.push_sql(&mut qb, dept_source);
    qb.push(")");
    qb
}

pub(crate) fn user_scope_query(
    user_id: i64,
    scope: &Predicate,
    dept_source: &DeptSourceConfig,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT EXISTS(SELECT 1 FROM sys_user WHERE sys_user.del_flag = '0' AND sys_user.user_id = ",
    );
    qb.push_bind(user_id).push(" AND ");
    scope.push_sql(&mut qb, dept_source);
    qb.push(")");
    qb
}

pub(crate) fn role_scope_query(
    role_ids: &BTreeSet<i64>,
    scope: &Predicate,
    dept_source: &DeptSourceConfig,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT COUNT(DISTINCT sys_role.role_id) FROM sys_role \
         LEFT JOIN sys_user_role ON sys_user_role.role_id = sys_role.role_id \
         LEFT JOIN sys_user ON sys_user.user_id = sys_user_role.user_id \
         LEFT JOIN sys_dept ON sys_dept.dept_id = sys_user.dept_id \
         WHERE sys_role.del_flag = '0' AND sys_role.role_id = ANY(",
    );
    let ids: Vec<i64> = role_ids.iter().copied().collect();
    qb.push_bind(ids).push(") AND ");
    scope.push_sql(&mut qb, dept_source);
    qb
}

/// 读取全部部门的祖级链；与谓词的 SQL 子查询一样不过滤删除标志
pub(crate) fn dept_tree_sql(dept_source: &DeptSourceConfig) -> String {
    // 标识符已在配置加载时校验
    format!(
        "SELECT {}, {} FROM {}",
        dept_source.id_column, dept_source.ancestors_column, dept_source.table
    )
}

#[async_trait]
impl RoleDeptGrants for RbacService {
    async fn dept_ids_for_roles(&self, role_ids: &[i64]) -> Result<HashMap<i64, BTreeSet<i64>>> {
        let mut grants = HashMap::new();
        let mut missing = Vec::new();

        for &role_id in role_ids {
            match self.grant_cache.get(role_id).await {
                Ok(Some(depts)) => {
                    grants.insert(role_id, depts);
                }
                Ok(None) => missing.push(role_id),
                Err(e) => {
                    // 缓存不可用时回源数据库
                    warn!(role_id, error = %e, "读取角色部门授权缓存失败");
                    missing.push(role_id);
                }
            }
        }

        if missing.is_empty() {
            return Ok(grants);
        }

        let rows = sqlx::query("SELECT role_id, dept_id FROM sys_role_dept WHERE role_id = ANY($1)")
            .bind(&missing)
            .fetch_all(&self.db_pool)
            .await
            .map_err(|e| AdmError::Database {
                message: format!("load_role_dept: {}", e),
                context: Some(DatabaseContext::table("sys_role_dept")),
            })?;

        let mut loaded: HashMap<i64, BTreeSet<i64>> =
            missing.iter().map(|id| (*id, BTreeSet::new())).collect();
        for row in rows {
            let role_id: i64 = row.get("role_id");
            let dept_id: i64 = row.get("dept_id");
            loaded.entry(role_id).or_default().insert(dept_id);
        }

        // 空授权同样缓存，避免反复回源
        for (role_id, depts) in loaded {
            if let Err(e) = self.grant_cache.put(role_id, &depts).await {
                warn!(role_id, error = %e, "写入角色部门授权缓存失败");
            }
            grants.insert(role_id, depts);
        }

        Ok(grants)
    }
}

#[async_trait]
impl DeptHierarchy for RbacService {
    async fn load_tree(&self) -> Result<DeptTree> {
        let ds = &self.dept_source;
        let sql = dept_tree_sql(ds);

        let rows = sqlx::query(&sql)
            .fetch_all(&self.db_pool)
            .await
            .map_err(|e| AdmError::Database {
                message: format!("load_dept_tree: {}", e),
                context: Some(DatabaseContext {
                    query: Some(sql.clone()),
                    table: Some(ds.table.clone()),
                }),
            })?;

        let mut tree = DeptTree::new();
        for row in rows {
            let dept_id: i64 = row.get(0);
            let chain: Option<String> = row.get(1);
            match parse_ancestors(chain.as_deref().unwrap_or(""), &ds.delimiter) {
                Ok(ancestors) => tree.insert(dept_id, ancestors),
                // 祖级链损坏的部门不视为任何部门的后代
                Err(e) => warn!(dept_id, error = %e, "部门祖级链无法解析"),
            }
        }

        debug!(depts = tree.len(), "部门树已加载");
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    fn dept_scope() -> Predicate {
        Predicate::Or(vec![
            Predicate::Equals {
                column: "sys_dept.dept_id",
                value: 5,
            },
            Predicate::AncestorContains {
                column: "sys_dept.dept_id",
                dept_id: 5,
            },
        ])
    }

    #[test]
    fn test_dept_scope_query() {
        let qb = dept_scope_query(12, &dept_scope(), &DeptSourceConfig::default());
        assert_eq!(
            qb.sql(),
            "SELECT EXISTS(SELECT 1 FROM sys_dept WHERE sys_dept.del_flag = '0' \
             AND sys_dept.dept_id = $1 AND (sys_dept.dept_id = $2 OR (sys_dept.dept_id = $3 \
             OR sys_dept.dept_id IN (SELECT dept_id FROM sys_dept \
             WHERE $4 = ANY(string_to_array(ancestors, $5))))))"
        );
    }

    #[test]
    fn test_user_scope_query_no_roles() {
        let qb = user_scope_query(8, &Predicate::Or(vec![]), &DeptSourceConfig::default());
        assert_eq!(
            qb.sql(),
            "SELECT EXISTS(SELECT 1 FROM sys_user WHERE sys_user.del_flag = '0' \
             AND sys_user.user_id = $1 AND FALSE)"
        );
    }

    #[test]
    fn test_role_scope_query() {
        let scope = Predicate::Or(vec![Predicate::In {
            column: "sys_dept.dept_id",
            values: BTreeSet::from([3, 7]),
        }]);
        let qb = role_scope_query(&BTreeSet::from([2, 4]), &scope, &DeptSourceConfig::default());
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT COUNT(DISTINCT sys_role.role_id) FROM sys_role"));
        assert!(sql.ends_with("sys_role.role_id = ANY($1) AND (sys_dept.dept_id = ANY($2))"));
    }

    #[test]
    fn test_dept_source_only_drives_ancestor_lookup() {
        let ds = DeptSourceConfig {
            table: "org.departments".to_string(),
            id_column: "id".to_string(),
            ancestors_column: "path".to_string(),
            delimiter: "/".to_string(),
        };
        let qb = dept_scope_query(12, &dept_scope(), &ds);
        let sql = qb.sql();
        assert!(sql.contains("(SELECT id FROM org.departments WHERE $4 = ANY(string_to_array(path, $5)))"));
        // 被校验的记录仍来自内置表
        assert!(sql.starts_with("SELECT EXISTS(SELECT 1 FROM sys_dept WHERE sys_dept.del_flag = '0'"));
        assert_eq!(dept_tree_sql(&ds), "SELECT id, path FROM org.departments");
    }

    #[test]
    fn test_dept_tree_keeps_deleted_departments() {
        // 与 SQL 子查询一致，祖级判断不过滤删除标志
        let sql = dept_tree_sql(&DeptSourceConfig::default());
        assert_eq!(sql, "SELECT dept_id, ancestors FROM sys_dept");
    }

    fn lazy_service() -> RbacService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/ruoyi")
            .unwrap();
        RbacService::new(pool, 1, DeptSourceConfig::default(), GrantCache::in_memory())
    }

    #[tokio::test]
    async fn test_unrestricted_scope_skips_queries() {
        // 连接池不会真正建立连接
        let service = lazy_service();
        assert!(service.is_admin(1));
        assert!(!service.is_admin(2));

        service
            .check_dept_data_scope(12, &Predicate::Always)
            .await
            .unwrap();
        service
            .check_user_data_scope(8, &Predicate::Always)
            .await
            .unwrap();
        service
            .check_role_data_scope(&[2, 3], &Predicate::Always)
            .await
            .unwrap();
        service
            .check_role_data_scope(&[], &Predicate::Or(vec![]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cached_grants_served_without_database() {
        let service = lazy_service();
        service
            .grant_cache
            .put(2, &BTreeSet::from([3, 7]))
            .await
            .unwrap();
        service.grant_cache.put(4, &BTreeSet::new()).await.unwrap();

        let grants = service.dept_ids_for_roles(&[2, 4]).await.unwrap();
        assert_eq!(grants.get(&2), Some(&BTreeSet::from([3, 7])));
        assert_eq!(grants.get(&4), Some(&BTreeSet::new()));

        service.clear_role_grants(2).await.unwrap();
        assert_eq!(service.grant_cache.get(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_current_user_always_read_from_database() {
        // 数据库不可达：每次加载都必须回源，角色变更后不会读到旧的数据权限
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://127.0.0.1:1/ruoyi")
            .unwrap();
        let service =
            RbacService::new(pool, 1, DeptSourceConfig::default(), GrantCache::in_memory());

        for _ in 0..2 {
            let err = service.load_current_user(8).await.unwrap_err();
            assert!(matches!(err, AdmError::Database { .. }));
        }
        service.clear_role_grants(3).await.unwrap();
        let err = service.load_current_user(8).await.unwrap_err();
        assert!(matches!(err, AdmError::Database { .. }));
    }
}
