/// Registration 模块
///
/// 注册核心：构造 REGISTER、应答摘要挑战、驱动注册状态机
///
/// ## 组成
///
/// - `RegistrationMessageFactory`: 根据配置构造初始 REGISTER
/// - `AuthenticationChallengeHandler`: 解析 401/407 挑战并生成认证后的请求
/// - `RegistrationController`: `Idle → Sent → Challenged → Retrying → Registered / Failed`
/// - `TransactionSender`: 核心对外部协议栈的唯一依赖
///
/// ## 使用示例
///
/// ```rust,no_run
/// use sip_bot::config::BotConfig;
/// use sip_bot::registration::*;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo(sender: Arc<dyn TransactionSender>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = BotConfig::default();
/// let mut controller = RegistrationController::new(&config, sender, CancellationToken::new())?;
/// controller.register().await?;
/// // 响应由 EventDispatcher 送回 controller
/// # Ok(())
/// # }
/// ```

mod challenge;
mod controller;
mod factory;
mod session;
mod traits;

#[cfg(test)]
pub(crate) use controller::test_support;

// 导出公共接口
pub use challenge::{
    parse_auth_params, AuthenticationChallengeHandler, AuthorizedRequest, ChallengeKind,
    DigestChallenge,
};
pub use controller::RegistrationController;
pub use factory::{RegistrationMessageFactory, MAX_FORWARDS};
pub use session::{RegistrationSession, RegistrationState, RegistrationStatus};
pub use traits::{Credentials, Destination, ResponseEvent, TransactionId, TransactionSender};
