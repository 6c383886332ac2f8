use crate::registration::RegistrationState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SipError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("SIP stack error: {0}")]
    Stack(#[from] rsipstack::Error),

    #[error("Invalid URI: {0}")]
    Uri(#[from] rsip::Error),

    #[error("SIP protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl From<Box<dyn std::error::Error>> for SipError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        SipError::Other(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    Missing(String),
}

/// 注册操作的Result类型别名
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// 注册流程错误类型
///
/// 所有变体都在控制器内部转换为 `Failed` 终态，不会导致进程退出
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// 401/407 响应缺少必要的认证参数，或参数不受支持
    #[error("认证挑战无效: {reason}")]
    ChallengeParse { reason: String },

    /// 携带认证信息重试后仍被挑战，且超过重试上限
    #[error("认证被拒绝: 已重试 {attempts} 次")]
    AuthenticationRejected { attempts: u32 },

    /// 其它非 2xx 最终响应
    #[error("注册被拒绝: {code} {reason}")]
    Rejected { code: u16, reason: String },

    /// 发送失败
    #[error("传输失败: {0}")]
    Transport(String),

    #[error("注册已取消")]
    Cancelled,

    #[error("当前状态 {state} 不允许该操作")]
    InvalidState { state: RegistrationState },
}

impl RegistrationError {
    /// 获取标准错误代码，用于日志分析
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistrationError::ChallengeParse { .. } => "CHALLENGE_PARSE_FAILURE",
            RegistrationError::AuthenticationRejected { .. } => "AUTHENTICATION_REJECTED",
            RegistrationError::Rejected { .. } => "TERMINAL_PROTOCOL_ERROR",
            RegistrationError::Transport(_) => "TRANSPORT_ERROR",
            RegistrationError::Cancelled => "CANCELLED",
            RegistrationError::InvalidState { .. } => "INVALID_STATE",
        }
    }

    /// 获取SIP状态码（如果有）
    pub fn sip_status_code(&self) -> Option<u16> {
        match self {
            RegistrationError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 创建挑战解析错误
    pub fn challenge_parse(reason: impl Into<String>) -> Self {
        RegistrationError::ChallengeParse {
            reason: reason.into(),
        }
    }

    /// 创建传输错误
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        RegistrationError::Transport(reason.to_string())
    }
}

impl From<SipError> for RegistrationError {
    fn from(err: SipError) -> Self {
        RegistrationError::Transport(err.to_string())
    }
}
