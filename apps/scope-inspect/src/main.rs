use std::sync::Arc;

use adm_auth::{CurrentUser, DataScopeService, GrantCache, Predicate, RbacService};
use adm_core::{AppConfig, EntityShape};
use adm_error::{AdmError, ErrorMetadataBuilder};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// 查看用户的数据权限范围
#[derive(Debug, Parser)]
#[command(name = "scope-inspect", version)]
struct Cli {
    /// YAML 配置文件
    #[arg(long, default_value = "configs/default.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 列出内置实体
    Shapes,
    /// 输出用户对某实体的数据权限条件
    Resolve {
        #[arg(long)]
        user_id: i64,
        #[arg(long, default_value = "sys_user")]
        entity: String,
    },
    /// 校验用户能否访问指定记录
    Check {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        entity: String,
        #[arg(long)]
        target_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Command::Shapes = cli.command {
        for shape in EntityShape::builtin() {
            println!(
                "{:<10} owner={:<20} dept={}",
                shape.alias,
                shape.owner_column.unwrap_or("-"),
                shape.dept_column.unwrap_or("-")
            );
        }
        return Ok(());
    }

    let cfg = AppConfig::load(&cli.config)?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&cfg.database_url)
        .await
        .context("connect postgres")?;

    let grant_cache = GrantCache::new(cfg.redis_url.clone(), cfg.grant_cache_ttl_secs)?;
    let rbac = Arc::new(RbacService::new(
        pool,
        cfg.admin_user_id,
        cfg.dept_source.clone(),
        grant_cache,
    ));
    let data_scope = DataScopeService::new(rbac.clone(), rbac.clone());

    match cli.command {
        Command::Shapes => {}
        Command::Resolve { user_id, entity } => {
            let shape = lookup_shape(&entity)?;
            let user = rbac.load_current_user(user_id).await?;
            let predicate = data_scope.resolve(&user, &shape).await?;
            print_predicate(&user, &shape, &predicate, &cfg)?;
        }
        Command::Check {
            user_id,
            entity,
            target_id,
        } => {
            let shape = lookup_shape(&entity)?;
            let user = rbac.load_current_user(user_id).await?;
            let predicate = data_scope.resolve(&user, &shape).await?;
            let outcome = match shape.alias {
                "sys_dept" => rbac.check_dept_data_scope(target_id, &predicate).await,
                "sys_user" => rbac.check_user_data_scope(target_id, &predicate).await,
                "sys_role" => rbac.check_role_data_scope(&[target_id], &predicate).await,
                _ => return Err(anyhow!("unsupported entity: {}", entity)),
            };
            match outcome {
                Ok(()) => println!("allowed: {} {} -> {}", user.user_name, shape.alias, target_id),
                Err(e @ AdmError::Unauthorized { .. }) => {
                    let metadata = ErrorMetadataBuilder::new("scope-inspect")
                        .operation("check_data_scope")
                        .user_id(&user_id.to_string())
                        .context("entity", shape.alias)
                        .context("target_id", &target_id.to_string())
                        .build(&e);
                    e.log(&metadata);
                    println!("denied: {}", e.user_message());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

fn lookup_shape(entity: &str) -> anyhow::Result<EntityShape> {
    EntityShape::by_alias(entity).ok_or_else(|| anyhow!("unknown entity: {}", entity))
}

fn print_predicate(
    user: &CurrentUser,
    shape: &EntityShape,
    predicate: &Predicate,
    cfg: &AppConfig,
) -> anyhow::Result<()> {
    println!("user:   {} ({})", user.user_name, user.user_id);
    println!("roles:  {}", user.role_keys().join(", "));
    println!("entity: {}", shape.alias);
    println!("scope:  {}", predicate);
    println!("sql:    {}", predicate.to_query_builder("WHERE ", &cfg.dept_source).sql());
    println!("{}", serde_json::to_string_pretty(predicate)?);
    Ok(())
}

/// 须在加载 .env 之后调用，RUST_LOG 才会生效
fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(false);
    let subscriber = Registry::default().with(env_filter()).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_dotenv_file() {
        let path = std::env::temp_dir().join(format!("scope-inspect-{}.env", std::process::id()));
        std::fs::write(&path, "RUST_LOG=debug\n").unwrap();

        std::env::remove_var("RUST_LOG");
        assert_eq!(env_filter().to_string(), "info");

        dotenv::from_path(&path).unwrap();
        assert_eq!(env_filter().to_string(), "debug");

        std::env::remove_var("RUST_LOG");
        std::fs::remove_file(&path).ok();
    }
}
