/// 注册控制器
///
/// 驱动 发送 → 挑战 → 重试 → 终态 的状态机。
/// 控制器本身不等待响应，响应由 `EventDispatcher` 串行送回
use super::challenge::{AuthenticationChallengeHandler, ChallengeKind};
use super::factory::RegistrationMessageFactory;
use super::session::{RegistrationSession, RegistrationState, RegistrationStatus};
use super::traits::{Destination, ResponseEvent, TransactionId, TransactionSender};
use crate::config::BotConfig;
use crate::error::{ConfigError, RegistrationError, RegistrationResult};
use rsip::prelude::{HeadersExt, UntypedHeader};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 注册控制器
pub struct RegistrationController {
    factory: RegistrationMessageFactory,
    challenge: AuthenticationChallengeHandler,
    sender: Arc<dyn TransactionSender>,
    destination: Destination,
    max_auth_retries: u32,
    session: Option<RegistrationSession>,
    /// 下一个请求使用的 CSeq
    next_cseq: u32,
    cancel: CancellationToken,
    status: watch::Sender<RegistrationStatus>,
    last_error: Option<RegistrationError>,
}

impl RegistrationController {
    /// 创建控制器
    ///
    /// # 参数
    /// - `config`: 机器人配置
    /// - `sender`: 外部协议栈的事务发送器
    /// - `cancel`: 进程级关闭信号
    pub fn new(
        config: &BotConfig,
        sender: Arc<dyn TransactionSender>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (status, _) = watch::channel(RegistrationStatus::default());
        Ok(Self {
            factory: RegistrationMessageFactory::new(config)?,
            challenge: AuthenticationChallengeHandler::new(
                config.credentials(),
                config.digest_uri(),
            ),
            sender,
            destination: config.destination(),
            max_auth_retries: config.max_auth_retries,
            session: None,
            next_cseq: 1,
            cancel,
            status,
            last_error: None,
        })
    }

    /// 当前状态，尚未注册时为 `Idle`
    pub fn state(&self) -> RegistrationState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<&RegistrationSession> {
        self.session.as_ref()
    }

    /// 最近一次进入 `Failed` 的原因
    pub fn last_error(&self) -> Option<&RegistrationError> {
        self.last_error.as_ref()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<RegistrationStatus> {
        self.status.subscribe()
    }

    /// 发起注册 (`Idle → Sent`)
    ///
    /// 等待传输层就绪后构造 REGISTER 并发送。
    /// 允许在 `Idle`、`Registered`、`Failed` 时调用，每次都开启新的会话
    pub async fn register(&mut self) -> RegistrationResult<TransactionId> {
        let state = self.state();
        if state.is_in_flight() {
            warn!("注册进行中，忽略重复的 register 调用: state={}", state);
            return Err(RegistrationError::InvalidState { state });
        }
        if self.cancel.is_cancelled() {
            return Err(RegistrationError::Cancelled);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(RegistrationError::Cancelled),
            ready = self.sender.ready() => ready?,
        }

        let cseq = self.take_cseq();
        let request = self.factory.build_register(cseq);
        let call_id = request
            .call_id_header()
            .map(|c| c.value().to_string())
            .unwrap_or_default();

        info!(
            "发起注册: {} -> {}, Call-ID: {}",
            self.factory.request_uri(),
            self.destination,
            call_id
        );
        self.session = Some(RegistrationSession::new(call_id, cseq, request.clone()));
        self.last_error = None;

        match self.sender.send(request, &self.destination).await {
            Ok(transaction) => {
                if let Some(session) = self.session.as_mut() {
                    session.set_transaction(transaction.clone());
                }
                self.transition(RegistrationState::Sent, None, None);
                Ok(transaction)
            }
            Err(e) => Err(self.fail(RegistrationError::from(e), None)),
        }
    }

    /// 处理 401/407 挑战 (`Sent → Challenged → Retrying → Sent`)
    ///
    /// 超过重试上限或挑战无法解析时进入 `Failed`
    pub async fn handle_challenge(&mut self, event: &ResponseEvent) {
        let code = event.status_code();
        if ChallengeKind::from_status(code).is_none() {
            self.handle_response(event);
            return;
        }
        if !self.accepts(event) {
            return;
        }

        let reason = reason_phrase(&event.response.status_code);
        self.transition(RegistrationState::Challenged, Some(code), Some(reason));

        let Some(session) = self.session.as_ref() else {
            return;
        };
        let attempts = session.auth_attempts();
        if attempts >= self.max_auth_retries {
            self.fail(RegistrationError::AuthenticationRejected { attempts }, Some(code));
            return;
        }

        let original = session.request().clone();
        let cseq = self.take_cseq();
        let authorized = match self.challenge.authorize(&event.response, &original, cseq) {
            Ok(authorized) => authorized,
            Err(e) => {
                self.fail(e, Some(code));
                return;
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.replace_request(authorized.call_id, cseq, authorized.request.clone());
        }
        self.transition(RegistrationState::Retrying, None, None);

        if self.cancel.is_cancelled() {
            self.fail(RegistrationError::Cancelled, None);
            return;
        }

        match self.sender.send(authorized.request, &self.destination).await {
            Ok(transaction) => {
                debug!("认证重试已发送: transaction={}, CSeq={}", transaction, cseq);
                if let Some(session) = self.session.as_mut() {
                    session.set_transaction(transaction);
                }
                self.transition(RegistrationState::Sent, None, None);
            }
            Err(e) => {
                self.fail(RegistrationError::from(e), None);
            }
        }
    }

    /// 处理非挑战响应
    ///
    /// - 1xx：忽略
    /// - 2xx：`Sent → Registered`
    /// - 其它最终响应：`Sent → Failed`
    pub fn handle_response(&mut self, event: &ResponseEvent) {
        let code = event.status_code();
        if ChallengeKind::from_status(code).is_some() {
            warn!("认证挑战 {} 需要经由 handle_challenge 处理", code);
            return;
        }
        if (100..200).contains(&code) {
            debug!("收到临时响应 {}，保持当前状态", code);
            return;
        }
        if !self.accepts(event) {
            return;
        }

        let reason = reason_phrase(&event.response.status_code);
        if (200..300).contains(&code) {
            self.transition(RegistrationState::Registered, Some(code), Some(reason));
        } else {
            self.fail(RegistrationError::Rejected { code, reason }, Some(code));
        }
    }

    /// 判断事件能否驱动当前会话
    fn accepts(&self, event: &ResponseEvent) -> bool {
        if self.cancel.is_cancelled() {
            warn!("已请求关闭，忽略响应 {}", event.status_code());
            return false;
        }
        let Some(session) = self.session.as_ref() else {
            warn!("没有活动的注册会话，忽略响应 {}", event.status_code());
            return false;
        };
        if !session.owns(&event.transaction) {
            warn!(
                "响应不属于当前事务，忽略: transaction={}, status={}",
                event.transaction,
                event.status_code()
            );
            return false;
        }
        if session.state() != RegistrationState::Sent {
            warn!(
                "状态 {} 下不处理响应 {}",
                session.state(),
                event.status_code()
            );
            return false;
        }
        true
    }

    fn take_cseq(&mut self) -> u32 {
        let cseq = self.next_cseq;
        self.next_cseq = self.next_cseq.saturating_add(1);
        cseq
    }

    /// 执行状态迁移并通知观察者，非法迁移只记录日志
    fn transition(&mut self, next: RegistrationState, code: Option<u16>, reason: Option<String>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let current = session.state();
        if !current.can_transition_to(next) {
            warn!("非法状态迁移被拒绝: {} -> {}", current, next);
            return;
        }
        session.set_state(next);

        let status = RegistrationStatus {
            state: next,
            code,
            reason,
        };
        info!("注册状态: {} -> {}", current, status);
        self.status.send_replace(status);
    }

    fn fail(&mut self, err: RegistrationError, code: Option<u16>) -> RegistrationError {
        error!("注册失败 [{}]: {}", err.error_code(), err);
        self.last_error = Some(err.clone());
        self.transition(RegistrationState::Failed, code, Some(err.to_string()));
        err
    }
}

/// 从状态行中取出原因短语
fn reason_phrase(status: &rsip::StatusCode) -> String {
    let text = status.to_string();
    match text.split_once(' ') {
        Some((code, reason)) if code.parse::<u16>().is_ok() => reason.to_string(),
        _ => text,
    }
}
