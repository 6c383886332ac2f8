/// REGISTER 请求工厂
///
/// 报头顺序固定为：Via, To, From, Contact, Call-ID, CSeq, Max-Forwards,
/// （可选 Expires,）Content-Length
use crate::config::BotConfig;
use crate::error::ConfigError;
use crate::utils::{make_branch, make_call_id, make_tag};
use rsip::headers::{CSeq, Contact, ContentLength, Expires, MaxForwards, To, Via};
use rsip::prelude::UntypedHeader;
use tracing::debug;

/// Max-Forwards 固定值
pub const MAX_FORWARDS: u32 = 70;

/// REGISTER 请求工厂
#[derive(Debug, Clone)]
pub struct RegistrationMessageFactory {
    request_uri: rsip::Uri,
    /// 地址记录，From 与 To 共用
    aor: String,
    contact: String,
    via_sent_by: String,
    local_host: String,
    expires: Option<u32>,
}

impl RegistrationMessageFactory {
    /// 根据配置创建工厂
    ///
    /// 请求 URI 无法解析时返回错误
    pub fn new(config: &BotConfig) -> Result<Self, ConfigError> {
        let aor = format!(
            "sip:{}@{}:{}",
            config.username, config.server_host, config.server_port
        );
        let request_uri = rsip::Uri::try_from(aor.as_str())
            .map_err(|e| ConfigError::Invalid(format!("无效的请求 URI {}: {}", aor, e)))?;

        let local_host = config.local_ip.to_string();
        Ok(Self {
            request_uri,
            contact: format!(
                "sip:{}@{}:{}",
                config.username, local_host, config.local_port
            ),
            via_sent_by: format!("{}:{}", local_host, config.local_port),
            local_host,
            aor,
            expires: config.expires,
        })
    }

    pub fn request_uri(&self) -> &rsip::Uri {
        &self.request_uri
    }

    /// 构造 REGISTER 请求
    ///
    /// branch、tag 与 Call-ID 每次调用都重新生成
    pub fn build_register(&self, cseq: u32) -> rsip::Request {
        let mut headers: Vec<rsip::Header> = vec![
            Via::new(format!(
                "SIP/2.0/UDP {};branch={}",
                self.via_sent_by,
                make_branch()
            ))
            .into(),
            To::new(format!("<{}>", self.aor)).into(),
            rsip::headers::From::new(format!("<{}>;tag={}", self.aor, make_tag())).into(),
            Contact::new(format!("<{}>", self.contact)).into(),
            rsip::Header::CallId(make_call_id(Some(&self.local_host))),
            CSeq::new(format!("{} {}", cseq, rsip::Method::Register)).into(),
            MaxForwards::new(MAX_FORWARDS.to_string()).into(),
        ];
        if let Some(expires) = self.expires {
            headers.push(Expires::new(expires.to_string()).into());
        }
        headers.push(ContentLength::new("0").into());

        let request = rsip::Request {
            method: rsip::Method::Register,
            uri: self.request_uri.clone(),
            version: rsip::Version::V2,
            headers: headers.into(),
            body: vec![],
        };
        debug!("构造的 REGISTER 请求:\n{}", request);
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::via_branch;
    use rsip::prelude::HeadersExt;
    use std::mem::discriminant;

    fn factory() -> RegistrationMessageFactory {
        RegistrationMessageFactory::new(&BotConfig::default()).unwrap()
    }

    fn header_value(request: &rsip::Request, name: &str) -> Option<String> {
        request.headers.iter().find_map(|header| {
            let text = header.to_string();
            let (header_name, value) = text.split_once(':')?;
            header_name
                .trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    #[test]
    fn test_request_line() {
        let request = factory().build_register(1);
        assert_eq!(request.method, rsip::Method::Register);
        assert_eq!(request.uri.to_string(), "sip:1001@192.168.2.59:7206");
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_header_order() {
        let request = factory().build_register(1);
        let expected = [
            rsip::Header::Via(Via::new("")),
            rsip::Header::To(To::new("")),
            rsip::Header::From(rsip::headers::From::new("")),
            rsip::Header::Contact(Contact::new("")),
            rsip::Header::CallId(rsip::headers::CallId::new("")),
            rsip::Header::CSeq(CSeq::new("")),
            rsip::Header::MaxForwards(MaxForwards::new("")),
            rsip::Header::ContentLength(ContentLength::new("")),
        ];

        let actual: Vec<_> = request.headers.iter().map(discriminant).collect();
        let expected: Vec<_> = expected.iter().map(discriminant).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_header_values() {
        let request = factory().build_register(1);

        assert_eq!(request.cseq_header().unwrap().value(), "1 REGISTER");
        assert_eq!(request.to_header().unwrap().value(), "<sip:1001@192.168.2.59:7206>");
        assert!(request
            .from_header()
            .unwrap()
            .value()
            .starts_with("<sip:1001@192.168.2.59:7206>;tag="));
        assert_eq!(
            request.contact_header().unwrap().value(),
            "<sip:1001@192.168.2.59:8000>"
        );
        assert_eq!(header_value(&request, "Max-Forwards").as_deref(), Some("70"));
        assert_eq!(header_value(&request, "Content-Length").as_deref(), Some("0"));

        let via = request.via_header().unwrap().value().to_string();
        assert!(via.starts_with("SIP/2.0/UDP 192.168.2.59:8000;branch=z9hG4bK"));
        assert!(request
            .call_id_header()
            .unwrap()
            .value()
            .ends_with("@192.168.2.59"));
    }

    #[test]
    fn test_unique_fields_are_fresh() {
        let factory = factory();
        let first = factory.build_register(1);
        let second = factory.build_register(1);

        assert_ne!(via_branch(&first.headers), via_branch(&second.headers));
        assert_ne!(
            first.call_id_header().unwrap().value(),
            second.call_id_header().unwrap().value()
        );
        assert_ne!(
            first.from_header().unwrap().value(),
            second.from_header().unwrap().value()
        );
    }

    #[test]
    fn test_cseq_follows_argument() {
        let request = factory().build_register(7);
        assert_eq!(request.cseq_header().unwrap().value(), "7 REGISTER");
    }

    #[test]
    fn test_optional_expires() {
        let config = BotConfig::default().with_expires(3600);
        let request = RegistrationMessageFactory::new(&config)
            .unwrap()
            .build_register(1);

        assert_eq!(header_value(&request, "Expires").as_deref(), Some("3600"));
        assert!(matches!(
            request.headers.iter().last(),
            Some(rsip::Header::ContentLength(_))
        ));
    }

    #[test]
    fn test_wire_roundtrip() {
        let request = factory().build_register(1);
        let wire = request.to_string();
        assert!(wire.starts_with("REGISTER sip:1001@192.168.2.59:7206 SIP/2.0\r\n"));

        let parsed = rsip::Request::try_from(wire.as_bytes()).unwrap();
        assert_eq!(parsed.method, request.method);
        assert_eq!(parsed.uri, request.uri);

        let original: Vec<String> = request.headers.iter().map(|h| h.to_string()).collect();
        let reparsed: Vec<String> = parsed.headers.iter().map(|h| h.to_string()).collect();
        assert_eq!(original, reparsed);
    }
}
