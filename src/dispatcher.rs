/// 入站事件分发
///
/// 外部协议栈的事件统一投递到一个 mpsc 通道，由 `EventDispatcher::run`
/// 在单个任务中逐个处理，保证同一会话的状态迁移严格有序
use crate::registration::{RegistrationController, ResponseEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 协议栈送来的入站事件
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// 对端发起的请求
    Request(rsip::Request),
    /// 客户端事务上收到的响应
    Response(ResponseEvent),
    /// 无法归类的消息
    Malformed { source: String, reason: String },
}

/// 响应状态码分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 1xx
    Provisional,
    /// 2xx
    Success,
    /// 401 / 407
    Challenge,
    /// 3xx
    Redirect,
    /// 其它 4xx/5xx/6xx
    Failure,
}

impl StatusClass {
    /// 超出 100..=699 的状态码返回 `None`
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            401 | 407 => Some(StatusClass::Challenge),
            100..=199 => Some(StatusClass::Provisional),
            200..=299 => Some(StatusClass::Success),
            300..=399 => Some(StatusClass::Redirect),
            400..=699 => Some(StatusClass::Failure),
            _ => None,
        }
    }
}

/// 请求分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// INVITE/ACK/CANCEL/BYE，只记录日志
    Informational,
    /// 其它方法
    Ignored,
}

impl From<&rsip::Method> for RequestClass {
    fn from(method: &rsip::Method) -> Self {
        match method {
            rsip::Method::Invite | rsip::Method::Ack | rsip::Method::Cancel | rsip::Method::Bye => {
                RequestClass::Informational
            }
            _ => RequestClass::Ignored,
        }
    }
}

/// 事件分发器，持有注册控制器
pub struct EventDispatcher {
    controller: RegistrationController,
}

impl EventDispatcher {
    pub fn new(controller: RegistrationController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &RegistrationController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut RegistrationController {
        &mut self.controller
    }

    pub fn into_controller(self) -> RegistrationController {
        self.controller
    }

    /// 分发单个事件
    pub async fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Request(request) => {
                self.on_request(&request);
            }
            InboundEvent::Response(response) => self.on_response(response).await,
            InboundEvent::Malformed { source, reason } => {
                warn!("丢弃无法解析的事件: source={}, reason={}", source, reason);
            }
        }
    }

    /// 入站请求只记录，不影响注册状态
    pub fn on_request(&self, request: &rsip::Request) -> RequestClass {
        let class = RequestClass::from(&request.method);
        match class {
            RequestClass::Informational => {
                info!("收到 {} 请求: {}", request.method, request.uri);
            }
            RequestClass::Ignored => {
                debug!("忽略 {} 请求: {}", request.method, request.uri);
            }
        }
        class
    }

    /// 按状态码分类把响应交给控制器
    pub async fn on_response(&mut self, event: ResponseEvent) {
        let code = event.status_code();
        match StatusClass::from_code(code) {
            Some(StatusClass::Challenge) => {
                info!("收到认证挑战 {}, transaction={}", code, event.transaction);
                self.controller.handle_challenge(&event).await;
            }
            Some(class) => {
                debug!("收到响应 {} ({:?}), transaction={}", code, class, event.transaction);
                self.controller.handle_response(&event);
            }
            None => {
                warn!("丢弃状态码非法的响应: {}", code);
            }
        }
    }

    /// 事件循环，通道关闭或收到关闭信号时退出
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<InboundEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("事件分发器收到关闭信号");
                    break;
                }
                event = events.recv() => event,
            };
            match event {
                Some(event) => self.dispatch(event).await,
                None => {
                    debug!("事件通道已关闭");
                    break;
                }
            }
        }
    }
}
