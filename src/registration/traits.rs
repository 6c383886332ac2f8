/// Registration traits 定义
///
/// 注册核心对外部 SIP 协议栈的全部依赖都收敛在 `TransactionSender` 中
use crate::error::SipError;
use crate::utils::via_branch;
use async_trait::async_trait;
use std::fmt;

/// 登录凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// 用户名
    pub username: String,

    /// 密码
    pub password: String,
}

/// 请求的物理发送目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 客户端事务标识，取自请求第一个 Via 的 branch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn from_request(request: &rsip::Request) -> Result<Self, SipError> {
        via_branch(&request.headers)
            .map(TransactionId)
            .ok_or_else(|| SipError::Protocol("请求缺少 Via branch".into()))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 事务上收到的响应
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    /// 响应所属的客户端事务
    pub transaction: TransactionId,

    /// 事务的原始请求
    pub origin: rsip::Request,

    /// 事务上最近一次收到的响应
    pub response: rsip::Response,
}

impl ResponseEvent {
    pub fn status_code(&self) -> u16 {
        self.response.status_code.code()
    }
}

/// 事务发送器 trait
///
/// 由外部协议栈实现：为请求创建新的客户端事务并发往目标，
/// 响应通过 `EventDispatcher` 异步送回
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// 等待传输层就绪
    ///
    /// 传输层启动前调用 `send` 的行为未定义，控制器发送前必须先等待此信号
    async fn ready(&self) -> Result<(), SipError>;

    /// 新建客户端事务并发送请求
    ///
    /// # 返回
    /// - `Ok(TransactionId)`: 已交给传输层
    /// - `Err`: 发送失败，核心不会重传
    async fn send(
        &self,
        request: rsip::Request,
        destination: &Destination,
    ) -> Result<TransactionId, SipError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsip::headers::*;

    #[test]
    fn test_transaction_id_from_request() {
        let request = rsip::Request {
            method: rsip::Method::Register,
            uri: rsip::Uri::try_from("sip:example.com").unwrap(),
            headers: vec![
                Via::new("SIP/2.0/UDP 10.0.0.1:8000;branch=z9hG4bKabc").into(),
                CSeq::new("1 REGISTER").into(),
            ]
            .into(),
            version: rsip::Version::V2,
            body: vec![],
        };

        let id = TransactionId::from_request(&request).unwrap();
        assert_eq!(id, TransactionId("z9hG4bKabc".into()));
        assert_eq!(id.to_string(), "z9hG4bKabc");
    }

    #[test]
    fn test_transaction_id_requires_branch() {
        let request = rsip::Request {
            method: rsip::Method::Register,
            uri: rsip::Uri::try_from("sip:example.com").unwrap(),
            headers: vec![CSeq::new("1 REGISTER").into()].into(),
            version: rsip::Version::V2,
            body: vec![],
        };

        assert!(TransactionId::from_request(&request).is_err());
    }

    #[test]
    fn test_destination_display() {
        let destination = Destination {
            host: "192.168.2.59".into(),
            port: 7206,
        };
        assert_eq!(destination.to_string(), "192.168.2.59:7206");
    }
}
