/// 注册会话与状态
use super::traits::TransactionId;
use std::fmt;

/// 注册状态
///
/// ```text
/// Idle → Sent → Registered
///          ↓ ↑
///   Challenged → Retrying
///
/// Sent / Challenged / Retrying → Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegistrationState {
    #[default]
    Idle,
    Sent,
    Challenged,
    Retrying,
    Registered,
    Failed,
}

impl RegistrationState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationState::Registered | RegistrationState::Failed)
    }

    /// 是否有事务在途
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            RegistrationState::Sent | RegistrationState::Challenged | RegistrationState::Retrying
        )
    }

    /// 状态迁移表
    pub fn can_transition_to(&self, next: RegistrationState) -> bool {
        use RegistrationState::*;
        matches!(
            (self, next),
            (Idle, Sent)
                | (Idle, Failed)
                | (Sent, Registered)
                | (Sent, Challenged)
                | (Sent, Failed)
                | (Challenged, Retrying)
                | (Challenged, Failed)
                | (Retrying, Sent)
                | (Retrying, Failed)
        )
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Idle => "Idle",
            RegistrationState::Sent => "Sent",
            RegistrationState::Challenged => "Challenged",
            RegistrationState::Retrying => "Retrying",
            RegistrationState::Registered => "Registered",
            RegistrationState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// 状态变化通知，附带触发迁移的状态码与描述
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationStatus {
    pub state: RegistrationState,
    pub code: Option<u16>,
    pub reason: Option<String>,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(code) = self.code {
            write!(f, " ({})", code)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// 一次注册尝试链的会话
///
/// 字段只允许控制器修改
#[derive(Debug, Clone)]
pub struct RegistrationSession {
    call_id: String,
    cseq: u32,
    request: rsip::Request,
    transaction: Option<TransactionId>,
    state: RegistrationState,
    auth_attempts: u32,
}

impl RegistrationSession {
    pub(super) fn new(call_id: String, cseq: u32, request: rsip::Request) -> Self {
        Self {
            call_id,
            cseq,
            request,
            transaction: None,
            state: RegistrationState::Idle,
            auth_attempts: 0,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// 最近一次发出的请求
    pub fn request(&self) -> &rsip::Request {
        &self.request
    }

    pub fn transaction(&self) -> Option<&TransactionId> {
        self.transaction.as_ref()
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// 已经携带认证信息重试的次数
    pub fn auth_attempts(&self) -> u32 {
        self.auth_attempts
    }

    pub(super) fn set_state(&mut self, state: RegistrationState) {
        self.state = state;
    }

    pub(super) fn set_transaction(&mut self, transaction: TransactionId) {
        self.transaction = Some(transaction);
    }

    /// 以重试请求替换当前请求
    pub(super) fn replace_request(&mut self, call_id: String, cseq: u32, request: rsip::Request) {
        self.call_id = call_id;
        self.cseq = cseq;
        self.request = request;
        self.transaction = None;
        self.auth_attempts += 1;
    }

    /// 判断响应是否属于当前事务
    pub fn owns(&self, transaction: &TransactionId) -> bool {
        self.transaction.as_ref() == Some(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::RegistrationState::*;
    use super::*;

    const ALL: [RegistrationState; 6] = [Idle, Sent, Challenged, Retrying, Registered, Failed];

    #[test]
    fn test_allowed_transitions() {
        assert!(Idle.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Challenged));
        assert!(Challenged.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Registered));
        assert!(Challenged.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for next in ALL {
            assert!(!Registered.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_no_shortcuts() {
        assert!(!Idle.can_transition_to(Registered));
        assert!(!Idle.can_transition_to(Challenged));
        assert!(!Challenged.can_transition_to(Sent));
        assert!(!Challenged.can_transition_to(Registered));
        assert!(!Retrying.can_transition_to(Registered));
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn test_state_predicates() {
        assert!(Registered.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Sent.is_terminal());
        assert!(Sent.is_in_flight());
        assert!(!Idle.is_in_flight());
    }

    #[test]
    fn test_status_display() {
        let status = RegistrationStatus {
            state: Failed,
            code: Some(403),
            reason: Some("Forbidden".into()),
        };
        assert_eq!(status.to_string(), "Failed (403): Forbidden");
        assert_eq!(RegistrationStatus::default().to_string(), "Idle");
    }
}
