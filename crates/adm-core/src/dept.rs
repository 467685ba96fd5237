//! 部门祖级链（ancestors）与内存部门树
//!
//! sys_dept.ancestors 保存从根到直接父级的全部部门 ID，例如 `"0,100,101"`。
//! 判断“部门 X 是否为部门 Y 的后代”只需检查 X 的祖级链中是否包含 Y，无需递归遍历。

use adm_error::{AdmError, Result};
use std::collections::HashMap;

/// 解析祖级链，忽略空段
pub fn parse_ancestors(chain: &str, delimiter: &str) -> Result<Vec<i64>> {
    if delimiter.is_empty() {
        return Err(AdmError::Validation {
            message: "祖级链分隔符不能为空".to_string(),
        });
    }

    chain
        .split(delimiter)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment.parse::<i64>().map_err(|_| AdmError::Validation {
                message: format!("祖级链包含非法部门ID: {}", segment),
            })
        })
        .collect()
}

/// 部门祖级查询
pub trait DeptAncestry {
    fn ancestors_of(&self, dept_id: i64) -> Option<&[i64]>;

    /// 严格后代判断：dept_id 的祖级链包含 ancestor_id
    fn is_descendant_of(&self, dept_id: i64, ancestor_id: i64) -> bool {
        self.ancestors_of(dept_id)
            .map(|chain| chain.contains(&ancestor_id))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeptTree {
    ancestors: HashMap<i64, Vec<i64>>,
}

impl DeptTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由 (dept_id, ancestors) 记录构建
    pub fn from_chains<'a, I>(rows: I, delimiter: &str) -> Result<Self>
    where
        I: IntoIterator<Item = (i64, &'a str)>,
    {
        let mut tree = Self::new();
        for (dept_id, chain) in rows {
            tree.insert(dept_id, parse_ancestors(chain, delimiter)?);
        }
        Ok(tree)
    }

    pub fn insert(&mut self, dept_id: i64, ancestors: Vec<i64>) {
        self.ancestors.insert(dept_id, ancestors);
    }

    pub fn contains(&self, dept_id: i64) -> bool {
        self.ancestors.contains_key(&dept_id)
    }

    pub fn len(&self) -> usize {
        self.ancestors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }

    /// 所有后代部门（不含自身），按 ID 升序
    pub fn descendants_of(&self, dept_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .ancestors
            .iter()
            .filter(|(_, chain)| chain.contains(&dept_id))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl DeptAncestry for DeptTree {
    fn ancestors_of(&self, dept_id: i64) -> Option<&[i64]> {
        self.ancestors.get(&dept_id).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> DeptTree {
        DeptTree::from_chains(
            vec![
                (100, "0"),
                (101, "0,100"),
                (5, "0,100,101"),
                (12, "0,100,101,5"),
                (13, "0,100,101,5,12"),
                (99, "0,100"),
            ],
            ",",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_ancestors() {
        assert_eq!(parse_ancestors("0,100,101", ",").unwrap(), vec![0, 100, 101]);
        assert_eq!(parse_ancestors(" 0, 100 ,", ",").unwrap(), vec![0, 100]);
        assert!(parse_ancestors("", ",").unwrap().is_empty());
        assert!(parse_ancestors("0,abc", ",").is_err());
        assert!(parse_ancestors("0,1", "").is_err());
    }

    #[test]
    fn test_descendant_check_uses_chain() {
        let tree = sample_tree();
        assert!(tree.is_descendant_of(12, 5));
        assert!(tree.is_descendant_of(13, 5));
        assert!(!tree.is_descendant_of(5, 5));
        assert!(!tree.is_descendant_of(99, 5));
        assert!(!tree.is_descendant_of(404, 5));
    }

    #[test]
    fn test_descendants_of() {
        let tree = sample_tree();
        assert_eq!(tree.descendants_of(5), vec![12, 13]);
        assert_eq!(tree.descendants_of(100), vec![5, 12, 13, 99, 101]);
        assert!(tree.descendants_of(13).is_empty());
        assert_eq!(tree.len(), 6);
        assert!(tree.contains(99));
    }
}
