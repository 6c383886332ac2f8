/// SIP 机器人
///
/// 组装传输层、注册控制器与事件分发器：
/// 启动传输层 → 等待就绪 → 发送 REGISTER → 串行处理入站事件
use crate::config::BotConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::SipError;
use crate::registration::{RegistrationController, RegistrationStatus};
use crate::sip_transport::SipTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 运行中的 SIP 机器人
pub struct SipBot {
    transport: Arc<SipTransport>,
    cancel_token: CancellationToken,
    status: watch::Receiver<RegistrationStatus>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SipBot {
    /// 启动机器人并发起注册
    ///
    /// 注册失败不会返回错误，结果通过 `status()` 观察
    pub async fn start(config: BotConfig, cancel_token: CancellationToken) -> Result<Self, SipError> {
        config.validate()?;
        let local_addr = SocketAddr::new(config.local_ip, config.local_port);
        info!(
            "启动 SIP 机器人: {}@{}:{}, 本地地址 {}",
            config.username, config.server_host, config.server_port, local_addr
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(
            SipTransport::create_listen_point(
                local_addr,
                &config.user_agent,
                events_tx,
                cancel_token.child_token(),
            )
            .await?,
        );

        let controller =
            RegistrationController::new(&config, transport.clone(), cancel_token.clone())?;
        let status = controller.subscribe();

        transport.start()?;

        let mut dispatcher = EventDispatcher::new(controller);
        let dispatcher_cancel = cancel_token.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = dispatcher.controller_mut().register().await {
                warn!("注册未能发出: {}", e);
            }
            dispatcher.run(events_rx, dispatcher_cancel).await;
        });

        Ok(Self {
            transport,
            cancel_token,
            status,
            dispatcher: Some(handle),
        })
    }

    /// 注册状态观察者
    pub fn status(&self) -> watch::Receiver<RegistrationStatus> {
        self.status.clone()
    }

    /// 停止传输层并等待分发任务退出
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        self.transport.stop();
        if let Some(handle) = self.dispatcher.take() {
            if let Err(e) = handle.await {
                warn!("事件分发任务异常退出: {}", e);
            }
        }
        info!("SIP 机器人已停止");
    }
}
