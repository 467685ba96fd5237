use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// 系统统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum AdmError {
    // === 业务错误 ===
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    #[error("请求无效: {reason}")]
    InvalidRequest { reason: String },

    #[error("权限不足: {operation}")]
    Unauthorized { operation: String },

    #[error("认证失败: {message}")]
    Authentication { message: String },

    #[error("验证失败: {message}")]
    Validation { message: String },

    // === 技术错误 ===
    #[error("数据库错误")]
    Database {
        message: String,
        #[serde(skip)]
        context: Option<DatabaseContext>,
    },

    #[error("网络错误: {operation}")]
    Network { operation: String, message: String },

    // === 系统错误 ===
    #[error("内部系统错误: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },

    #[error("配置错误: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("序列化错误: {format}")]
    Serialization { format: String, message: String },
}

/// 数据库上下文信息
#[derive(Debug, Clone)]
pub struct DatabaseContext {
    pub query: Option<String>,
    pub table: Option<String>,
}

impl DatabaseContext {
    pub fn table(table: &str) -> Self {
        Self {
            query: None,
            table: Some(table.to_string()),
        }
    }
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的业务错误
    Medium,   // 技术错误但不影响核心功能
    High,     // 影响核心功能的错误
    Critical, // 系统级严重错误
}

/// 错误元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context: std::collections::HashMap<String, String>,
}

impl AdmError {
    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AdmError::NotFound { .. } | AdmError::InvalidRequest { .. } => ErrorSeverity::Low,
            AdmError::Unauthorized { .. }
            | AdmError::Authentication { .. }
            | AdmError::Validation { .. } => ErrorSeverity::Medium,
            AdmError::Network { .. } => ErrorSeverity::Medium,
            AdmError::Database { .. } | AdmError::Serialization { .. } => ErrorSeverity::High,
            AdmError::Internal { .. } | AdmError::Configuration { .. } => ErrorSeverity::Critical,
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdmError::Network { .. })
    }

    /// 记录错误日志
    pub fn log(&self, metadata: &ErrorMetadata) {
        match metadata.severity {
            ErrorSeverity::Low => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user_id = ?metadata.user_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    "业务错误"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user_id = ?metadata.user_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    context = ?metadata.context,
                    "技术错误"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    user_id = ?metadata.user_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    context = ?metadata.context,
                    severity = ?metadata.severity,
                    "严重错误"
                );
            }
        }
    }

    /// 转换为 HTTP 状态码
    pub fn to_http_status(&self) -> u16 {
        match self {
            AdmError::NotFound { .. } => 404,
            AdmError::InvalidRequest { .. } | AdmError::Validation { .. } => 400,
            AdmError::Authentication { .. } => 401,
            AdmError::Unauthorized { .. } => 403,
            _ => 500,
        }
    }

    /// 获取用户友好的错误消息
    pub fn user_message(&self) -> String {
        match self {
            AdmError::NotFound { .. } => "请求的资源不存在".to_string(),
            AdmError::InvalidRequest { .. } => "请求参数有误，请检查后重试".to_string(),
            AdmError::Unauthorized { operation } => operation.clone(),
            AdmError::Authentication { .. } => "认证失败，请重新登录".to_string(),
            AdmError::Validation { .. } => "输入数据验证失败，请检查格式".to_string(),
            AdmError::Network { .. } => "服务暂时不可用，请稍后重试".to_string(),
            _ => "系统内部错误，请联系管理员".to_string(),
        }
    }
}

/// 创建错误元数据的便捷构造器
pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                user_id: None,
                request_id: None,
                timestamp: chrono::Utc::now(),
                context: std::collections::HashMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn user_id(mut self, user_id: &str) -> Self {
        self.metadata.user_id = Some(user_id.to_string());
        self
    }

    pub fn request_id(mut self, request_id: &str) -> Self {
        self.metadata.request_id = Some(request_id.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .context
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(mut self, error: &AdmError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, AdmError>;

// === 转换实现 ===

impl From<serde_json::Error> for AdmError {
    fn from(err: serde_json::Error) -> Self {
        AdmError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for AdmError {
    fn from(err: serde_yaml::Error) -> Self {
        AdmError::Serialization {
            format: "yaml".to_string(),
            message: err.to_string(),
        }
    }
}
