use adm_error::{AdmError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// 部门祖级链的来源，只用于“本部门及以下”条件的子查询和部门树加载。
///
/// 被过滤实体的表与列由内置的 `EntityShape` 决定，不受此配置影响。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeptSourceConfig {
    pub table: String,
    pub id_column: String,
    pub ancestors_column: String,
    pub delimiter: String,
}

impl Default for DeptSourceConfig {
    fn default() -> Self {
        Self {
            table: "sys_dept".to_string(),
            id_column: "dept_id".to_string(),
            ancestors_column: "ancestors".to_string(),
            delimiter: ",".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    /// 超级管理员用户 ID，跳过所有数据权限
    pub admin_user_id: i64,
    pub grant_cache_ttl_secs: u64,
    pub dept_source: DeptSourceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/ruoyi".to_string(),
            redis_url: None,
            admin_user_id: 1,
            grant_cache_ttl_secs: 1800,
            dept_source: DeptSourceConfig::default(),
        }
    }
}

impl AppConfig {
    /// 读取 YAML 配置文件（不存在时使用默认值），再叠加环境变量并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            let s = std::fs::read_to_string(path).map_err(|e| AdmError::Configuration {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?;
            Self::from_yaml(&s)?
        } else {
            info!(path = %path.display(), "配置文件不存在，使用默认配置");
            Self::default()
        };

        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// 环境变量覆盖：DATABASE_URL / REDIS_URL / ADMIN_USER_ID
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.redis_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(raw) = lookup("ADMIN_USER_ID") {
            self.admin_user_id = raw.parse().map_err(|_| AdmError::Configuration {
                key: "ADMIN_USER_ID".to_string(),
                reason: format!("不是合法的用户ID: {}", raw),
            })?;
        }
        Ok(())
    }

    /// 部门表名、列名会被拼入 SQL，只允许普通标识符
    pub fn validate(&self) -> Result<()> {
        let ds = &self.dept_source;
        for (key, value) in [
            ("dept_source.table", &ds.table),
            ("dept_source.id_column", &ds.id_column),
            ("dept_source.ancestors_column", &ds.ancestors_column),
        ] {
            if !is_sql_identifier(value) {
                return Err(AdmError::Configuration {
                    key: key.to_string(),
                    reason: format!("非法的SQL标识符: {}", value),
                });
            }
        }

        if ds.delimiter.is_empty() {
            return Err(AdmError::Configuration {
                key: "dept_source.delimiter".to_string(),
                reason: "分隔符不能为空".to_string(),
            });
        }

        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`，允许一级 schema 前缀
fn is_sql_identifier(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}
