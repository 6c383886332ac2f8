/// SIP 传输层适配
///
/// 基于 rsipstack 的 Endpoint 实现 `TransactionSender`：
/// - 创建 UDP 监听点并构建 Endpoint
/// - `start` 之后才发出就绪信号
/// - 每个客户端事务的响应都转成 `InboundEvent` 投递给分发器
use crate::dispatcher::InboundEvent;
use crate::error::SipError;
use crate::registration::{Destination, ResponseEvent, TransactionId, TransactionSender};
use async_trait::async_trait;
use rsip::SipMessage;
use rsipstack::{
    transaction::{
        key::{TransactionKey, TransactionRole},
        transaction::Transaction,
        Endpoint, TransactionReceiver,
    },
    transport::{udp::UdpConnection, SipAddr, SipConnection, TransportLayer},
    EndpointBuilder,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 创建 UDP 传输连接
pub async fn create_transport_connection(
    local_addr: SocketAddr,
    cancel_token: CancellationToken,
) -> Result<SipConnection, SipError> {
    let connection =
        UdpConnection::create_connection(local_addr, None, Some(cancel_token.child_token()))
            .await?;
    info!("UDP 监听点已创建: {}", local_addr);
    Ok(connection.into())
}

/// 把发送目标转换为 rsipstack 地址
pub fn destination_addr(destination: &Destination) -> SipAddr {
    let host = match destination.host.parse::<IpAddr>() {
        Ok(ip) => rsip::Host::IpAddr(ip),
        Err(_) => rsip::Host::Domain(destination.host.clone().into()),
    };
    SipAddr {
        r#type: Some(rsip::transport::Transport::Udp),
        addr: rsip::HostWithPort {
            host,
            port: Some(destination.port.into()),
        },
    }
}

/// rsipstack 传输层
pub struct SipTransport {
    endpoint: Endpoint,
    cancel_token: CancellationToken,
    ready: watch::Sender<bool>,
    events: mpsc::UnboundedSender<InboundEvent>,
    incoming: Mutex<Option<TransactionReceiver>>,
}

impl SipTransport {
    /// 创建监听点并构建 Endpoint，此时尚未就绪
    ///
    /// # 参数
    /// - `local_addr`: 本地 UDP 监听地址
    /// - `user_agent`: User-Agent 字符串
    /// - `events`: 入站事件通道
    /// - `cancel_token`: 关闭信号
    pub async fn create_listen_point(
        local_addr: SocketAddr,
        user_agent: &str,
        events: mpsc::UnboundedSender<InboundEvent>,
        cancel_token: CancellationToken,
    ) -> Result<Self, SipError> {
        let transport_layer = TransportLayer::new(cancel_token.child_token());
        let connection = create_transport_connection(local_addr, cancel_token.clone()).await?;
        transport_layer.add_transport(connection);

        let mut endpoint_builder = EndpointBuilder::new();
        endpoint_builder
            .with_cancel_token(cancel_token.child_token())
            .with_transport_layer(transport_layer)
            .with_user_agent(user_agent);
        let endpoint = endpoint_builder.build();
        let incoming = endpoint.incoming_transactions()?;

        let (ready, _) = watch::channel(false);
        Ok(Self {
            endpoint,
            cancel_token,
            ready,
            events,
            incoming: Mutex::new(Some(incoming)),
        })
    }

    /// 启动 Endpoint 服务循环与入站请求处理，然后发出就绪信号
    pub fn start(&self) -> Result<(), SipError> {
        let incoming = self
            .incoming
            .lock()
            .map_err(|_| SipError::Transport("传输层状态锁已损坏".into()))?
            .take()
            .ok_or_else(|| SipError::Transport("传输层已经启动".into()))?;

        let endpoint_for_serve = self.endpoint.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = endpoint_for_serve.serve().await {
                error!("Endpoint 服务退出: {}", e);
            }
        });

        Self::start_incoming_handler(incoming, self.events.clone(), self.cancel_token.clone());

        for addr in self.endpoint.get_addrs() {
            info!("本地绑定的实际地址: {}", addr);
        }
        self.ready.send_replace(true);
        Ok(())
    }

    /// 停止传输层，未完成的事务随之取消
    pub fn stop(&self) {
        self.ready.send_replace(false);
        self.cancel_token.cancel();
        info!("传输层已停止");
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// 入站请求只转发给分发器
    fn start_incoming_handler(
        mut incoming: TransactionReceiver,
        events: mpsc::UnboundedSender<InboundEvent>,
        cancel_token: CancellationToken,
    ) {
        tokio::spawn(async move {
            while let Some(transaction) = tokio::select! {
                tx = incoming.recv() => tx,
                _ = cancel_token.cancelled() => None,
            } {
                debug!("收到传入请求: {}", transaction.original.method);
                if events
                    .send(InboundEvent::Request(transaction.original.clone()))
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// 把客户端事务上的后续消息转发给分发器
    fn start_response_pump(
        mut tx: Transaction,
        transaction: TransactionId,
        events: mpsc::UnboundedSender<InboundEvent>,
        cancel_token: CancellationToken,
    ) {
        tokio::spawn(async move {
            let origin = tx.original.clone();
            loop {
                let message = tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    message = tx.receive() => message,
                };
                let event = match message {
                    Some(SipMessage::Response(response)) => InboundEvent::Response(ResponseEvent {
                        transaction: transaction.clone(),
                        origin: origin.clone(),
                        response,
                    }),
                    Some(SipMessage::Request(request)) => InboundEvent::Malformed {
                        source: transaction.to_string(),
                        reason: format!("客户端事务上收到 {} 请求", request.method),
                    },
                    None => {
                        debug!("事务已结束: {}", transaction);
                        break;
                    }
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl TransactionSender for SipTransport {
    async fn ready(&self) -> Result<(), SipError> {
        let mut ready = self.ready.subscribe();
        loop {
            let is_ready = *ready.borrow_and_update();
            if is_ready {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    return Err(SipError::Transport("传输层已停止".into()));
                }
                changed = ready.changed() => {
                    changed.map_err(|_| SipError::Transport("传输层已关闭".into()))?;
                }
            }
        }
    }

    async fn send(
        &self,
        request: rsip::Request,
        destination: &Destination,
    ) -> Result<TransactionId, SipError> {
        if !self.is_ready() {
            return Err(SipError::Transport("传输层尚未就绪".into()));
        }

        let transaction = TransactionId::from_request(&request)?;
        let key = TransactionKey::from_request(&request, TransactionRole::Client)?;
        let method = request.method;
        let mut tx = Transaction::new_client(key, request, self.endpoint.inner.clone(), None);
        tx.destination = Some(destination_addr(destination));

        match tx.send().await {
            Ok(_) => {
                info!("{} 已发送到 {}, transaction={}", method, destination, transaction);
                debug!("发送的请求:\n{}", tx.original);
            }
            Err(e) => {
                warn!("发送 {} 到 {} 失败: {}", method, destination, e);
                return Err(e.into());
            }
        }

        Self::start_response_pump(
            tx,
            transaction.clone(),
            self.events.clone(),
            self.cancel_token.clone(),
        );
        Ok(transaction)
    }
}
