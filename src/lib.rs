// 声明所有模块
pub mod config;
pub mod console;
pub mod digest;
pub mod dispatcher;
pub mod error;
pub mod registration;
pub mod sip_bot;
pub mod sip_transport;
pub mod utils;

/// 重新导出thiserror错误类型
pub use crate::error::{ConfigError, RegistrationError, RegistrationResult, SipError};

/// 主要API重新导出，简化使用
pub use crate::config::BotConfig;
pub use crate::dispatcher::{EventDispatcher, InboundEvent, StatusClass};
pub use crate::registration::{
    RegistrationController, RegistrationState, RegistrationStatus, TransactionSender,
};
pub use crate::sip_bot::SipBot;

/// SIP Bot库的版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 便捷函数：使用默认本地地址创建并启动机器人
pub async fn create_sip_bot(
    server: &str,
    user: &str,
    password: &str,
    cancel_token: tokio_util::sync::CancellationToken,
) -> Result<SipBot, SipError> {
    let config = BotConfig::new(server, user, password)?;
    SipBot::start(config, cancel_token).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[tokio::test]
    async fn test_create_sip_bot_rejects_bad_server() {
        let result = create_sip_bot(
            "example.com:notaport",
            "1001",
            "password",
            tokio_util::sync::CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(SipError::Config(_))));
    }
}
