use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

pub mod config;
pub mod dept;

pub use config::{AppConfig, DeptSourceConfig};
pub use dept::{parse_ancestors, DeptAncestry, DeptTree};

/// 角色数据权限范围，数据库中以字符编码存储（sys_role.data_scope）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataScope {
    /// 全部数据权限
    All,
    /// 自定义数据权限（sys_role_dept 中授予的部门）
    Custom,
    /// 本部门数据权限
    Dept,
    /// 本部门及以下数据权限
    DeptAndChild,
    /// 仅本人数据权限
    SelfOnly,
    /// 无法识别的编码，按拒绝处理
    Unknown(String),
}

impl DataScope {
    pub const ALL: &'static str = "1";
    pub const CUSTOM: &'static str = "2";
    pub const DEPT: &'static str = "3";
    pub const DEPT_AND_CHILD: &'static str = "4";
    pub const SELF: &'static str = "5";

    pub fn parse(code: &str) -> Self {
        match code.trim() {
            Self::ALL => Self::All,
            Self::CUSTOM => Self::Custom,
            Self::DEPT => Self::Dept,
            Self::DEPT_AND_CHILD => Self::DeptAndChild,
            Self::SELF => Self::SelfOnly,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::All => Self::ALL,
            Self::Custom => Self::CUSTOM,
            Self::Dept => Self::DEPT,
            Self::DeptAndChild => Self::DEPT_AND_CHILD,
            Self::SelfOnly => Self::SELF,
            Self::Unknown(code) => code,
        }
    }
}

impl From<String> for DataScope {
    fn from(code: String) -> Self {
        Self::parse(&code)
    }
}

impl From<&str> for DataScope {
    fn from(code: &str) -> Self {
        Self::parse(code)
    }
}

impl From<DataScope> for String {
    fn from(scope: DataScope) -> Self {
        scope.code().to_string()
    }
}

/// 被查询实体的字段描述：声明该实体是否拥有“所属用户”列与“所属部门”列。
///
/// 列名为编译期常量（可带表名前缀），数据权限构造器只对实体实际拥有的列生成条件，
/// 缺失的列对应的条件一律按拒绝处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityShape {
    pub alias: &'static str,
    pub owner_column: Option<&'static str>,
    pub dept_column: Option<&'static str>,
}

impl EntityShape {
    /// 用户行：sys_user.user_id / sys_user.dept_id
    pub const SYS_USER: EntityShape = EntityShape::new("sys_user")
        .with_owner("sys_user.user_id")
        .with_dept("sys_user.dept_id");

    /// 部门行：只有部门列
    pub const SYS_DEPT: EntityShape = EntityShape::new("sys_dept").with_dept("sys_dept.dept_id");

    /// 角色行：经 sys_user_role -> sys_user -> sys_dept 连接后按部门过滤
    pub const SYS_ROLE: EntityShape = EntityShape::new("sys_role").with_dept("sys_dept.dept_id");

    pub const fn new(alias: &'static str) -> Self {
        Self {
            alias,
            owner_column: None,
            dept_column: None,
        }
    }

    pub const fn with_owner(mut self, column: &'static str) -> Self {
        self.owner_column = Some(column);
        self
    }

    pub const fn with_dept(mut self, column: &'static str) -> Self {
        self.dept_column = Some(column);
        self
    }

    pub fn builtin() -> &'static [EntityShape] {
        &[Self::SYS_USER, Self::SYS_DEPT, Self::SYS_ROLE]
    }

    pub fn by_alias(alias: &str) -> Option<EntityShape> {
        Self::builtin()
            .iter()
            .find(|shape| shape.alias.eq_ignore_ascii_case(alias))
            .copied()
    }
}

/// 在编译期把实体类型与其字段描述绑定
pub trait ScopedEntity {
    const SHAPE: EntityShape;
}

/// 可被数据权限谓词在内存中求值的数据行
pub trait ScopedRow {
    /// 返回列值；列不存在或为 NULL 时返回 None
    fn column(&self, name: &str) -> Option<i64>;
}

/// 去掉表名前缀："sys_user.dept_id" -> "dept_id"
pub fn bare_column(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

impl<K> ScopedRow for HashMap<K, i64>
where
    K: std::borrow::Borrow<str> + Hash + Eq,
{
    fn column(&self, name: &str) -> Option<i64> {
        self.get(name).or_else(|| self.get(bare_column(name))).copied()
    }
}

impl<K> ScopedRow for BTreeMap<K, i64>
where
    K: std::borrow::Borrow<str> + Ord,
{
    fn column(&self, name: &str) -> Option<i64> {
        self.get(name).or_else(|| self.get(bare_column(name))).copied()
    }
}

pub use adm_error::{AdmError as Error, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_scope_codes() {
        assert_eq!(DataScope::parse("1"), DataScope::All);
        assert_eq!(DataScope::parse("4"), DataScope::DeptAndChild);
        assert_eq!(DataScope::parse(" 5 "), DataScope::SelfOnly);
        assert_eq!(DataScope::parse("9"), DataScope::Unknown("9".to_string()));
        assert_eq!(DataScope::Custom.code(), "2");
    }

    #[test]
    fn test_data_scope_serde_uses_code() {
        let json = serde_json::to_string(&DataScope::Dept).unwrap();
        assert_eq!(json, "\"3\"");

        let scope: DataScope = serde_json::from_str("\"7\"").unwrap();
        assert_eq!(scope, DataScope::Unknown("7".to_string()));
    }

    #[test]
    fn test_shape_lookup() {
        let shape = EntityShape::by_alias("SYS_USER").unwrap();
        assert_eq!(shape.owner_column, Some("sys_user.user_id"));
        assert_eq!(EntityShape::SYS_DEPT.owner_column, None);
        assert!(EntityShape::by_alias("sys_post").is_none());
    }

    #[test]
    fn test_map_row_accepts_qualified_and_bare_names() {
        let row: HashMap<&str, i64> = HashMap::from([("dept_id", 12)]);
        assert_eq!(row.column("sys_user.dept_id"), Some(12));
        assert_eq!(row.column("dept_id"), Some(12));
        assert_eq!(row.column("user_id"), None);
        assert_eq!(bare_column("sys_dept.dept_id"), "dept_id");
        assert_eq!(bare_column("dept_id"), "dept_id");
    }
}
