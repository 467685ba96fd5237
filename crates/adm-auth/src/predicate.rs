//! 数据权限谓词
//!
//! 谓词是一棵类型化的表达式树，可以：
//! - 在内存中对单行求值（[`Predicate::matches`]），
//! - 以绑定参数的形式追加到 sqlx 的 `QueryBuilder` 中（[`Predicate::push_sql`]）。
//!
//! 列名只来自编译期的 [`adm_core::EntityShape`]，所有值均通过绑定参数传入。

use adm_core::{DeptAncestry, DeptSourceConfig, ScopedRow};
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Predicate {
    /// 永真，不做限制
    Always,
    /// 永假
    Never,
    Equals {
        column: &'static str,
        value: i64,
    },
    /// 空集合永假
    In {
        column: &'static str,
        values: BTreeSet<i64>,
    },
    /// 列值等于 dept_id，或该部门的祖级链包含 dept_id
    AncestorContains {
        column: &'static str,
        dept_id: i64,
    },
    /// 零个操作数时永假
    Or(Vec<Predicate>),
    /// 零个操作数时永真
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }

    /// 结构上可判定的永假
    pub fn is_never(&self) -> bool {
        match self {
            Predicate::Never => true,
            Predicate::In { values, .. } => values.is_empty(),
            Predicate::Or(items) => items.iter().all(Predicate::is_never),
            Predicate::And(items) => items.iter().any(Predicate::is_never),
            _ => false,
        }
    }

    /// 与调用方的查询条件组合（AND）
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Always, p) | (p, Predicate::Always) => p,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, Predicate::And(mut right)) => {
                right.insert(0, p);
                Predicate::And(right)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// 求值是否需要部门祖级信息
    pub fn needs_dept_tree(&self) -> bool {
        match self {
            Predicate::AncestorContains { .. } => true,
            Predicate::Or(items) | Predicate::And(items) => {
                items.iter().any(Predicate::needs_dept_tree)
            }
            _ => false,
        }
    }

    /// 在内存中对一行求值；行缺少该列或值为 NULL 时列条件不成立
    pub fn matches<R, A>(&self, row: &R, ancestry: &A) -> bool
    where
        R: ScopedRow + ?Sized,
        A: DeptAncestry + ?Sized,
    {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::Equals { column, value } => row.column(column) == Some(*value),
            Predicate::In { column, values } => row
                .column(column)
                .map(|v| values.contains(&v))
                .unwrap_or(false),
            Predicate::AncestorContains { column, dept_id } => match row.column(column) {
                Some(v) => v == *dept_id || ancestry.is_descendant_of(v, *dept_id),
                None => false,
            },
            Predicate::Or(items) if items.is_empty() => false,
            Predicate::Or(items) => items.iter().any(|p| p.matches(row, ancestry)),
            Predicate::And(items) if items.is_empty() => true,
            Predicate::And(items) => items.iter().all(|p| p.matches(row, ancestry)),
        }
    }

    /// 以绑定参数形式追加 SQL（Postgres）
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>, dept: &DeptSourceConfig) {
        match self {
            Predicate::Always => {
                qb.push("TRUE");
            }
            Predicate::Never => {
                qb.push("FALSE");
            }
            Predicate::Equals { column, value } => {
                qb.push(column).push(" = ").push_bind(*value);
            }
            Predicate::In { values, .. } if values.is_empty() => {
                qb.push("FALSE");
            }
            Predicate::In { column, values } => {
                let ids: Vec<i64> = values.iter().copied().collect();
                qb.push(column).push(" = ANY(").push_bind(ids).push(")");
            }
            Predicate::AncestorContains { column, dept_id } => {
                // 与内存求值一致：本部门直接比较，后代按祖级链判断，不过滤删除标志
                qb.push("(")
                    .push(column)
                    .push(" = ")
                    .push_bind(*dept_id)
                    .push(" OR ")
                    .push(column)
                    .push(" IN (SELECT ")
                    .push(&dept.id_column)
                    .push(" FROM ")
                    .push(&dept.table)
                    .push(" WHERE ")
                    .push_bind(dept_id.to_string())
                    .push(" = ANY(string_to_array(")
                    .push(&dept.ancestors_column)
                    .push(", ")
                    .push_bind(dept.delimiter.clone())
                    .push("))))");
            }
            Predicate::Or(items) if items.is_empty() => {
                qb.push("FALSE");
            }
            Predicate::And(items) if items.is_empty() => {
                qb.push("TRUE");
            }
            Predicate::Or(items) => push_joined(qb, items, " OR ", dept),
            Predicate::And(items) => push_joined(qb, items, " AND ", dept),
        }
    }

    /// 生成 `<prefix><谓词>` 形式的查询构造器
    pub fn to_query_builder(
        &self,
        prefix: &str,
        dept: &DeptSourceConfig,
    ) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(prefix);
        self.push_sql(&mut qb, dept);
        qb
    }
}

fn push_joined(
    qb: &mut QueryBuilder<'_, Postgres>,
    items: &[Predicate],
    separator: &str,
    dept: &DeptSourceConfig,
) {
    qb.push("(");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        item.push_sql(qb, dept);
    }
    qb.push(")");
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Predicate], separator: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", separator)?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, ")")
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => write!(f, "TRUE"),
            Predicate::Never => write!(f, "FALSE"),
            Predicate::Equals { column, value } => write!(f, "{} = {}", column, value),
            Predicate::In { column, values } => {
                let ids: Vec<String> = values.iter().map(i64::to_string).collect();
                write!(f, "{} IN ({})", column, ids.join(", "))
            }
            Predicate::AncestorContains { column, dept_id } => {
                write!(f, "{} IN dept_and_children({})", column, dept_id)
            }
            Predicate::Or(items) if items.is_empty() => write!(f, "FALSE"),
            Predicate::And(items) if items.is_empty() => write!(f, "TRUE"),
            Predicate::Or(items) => write_joined(f, items, " OR "),
            Predicate::And(items) => write_joined(f, items, " AND "),
        }
    }
}
