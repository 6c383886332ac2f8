//! 注册流程集成测试
//!
//! 用内存中的模拟注册服务器驱动公开 API，不访问网络

use async_trait::async_trait;
use rsip::prelude::{HeadersExt, UntypedHeader};
use sip_bot::digest::{ChallengeDigest, DigestAlgorithm, DigestQop};
use sip_bot::dispatcher::{EventDispatcher, InboundEvent};
use sip_bot::registration::{
    parse_auth_params, Destination, RegistrationController, RegistrationState, ResponseEvent,
    TransactionId, TransactionSender,
};
use sip_bot::utils::via_branch;
use sip_bot::{BotConfig, RegistrationError, SipError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// 模拟注册服务器的应答策略
#[derive(Clone, Copy)]
enum Policy {
    /// 永远返回 401
    AlwaysChallenge,
    /// 首次 401，带认证后 200
    ChallengeThenAccept,
    /// 直接 403
    Forbid,
}

struct SimulatedRegistrar {
    sent: Mutex<Vec<rsip::Request>>,
}

impl SimulatedRegistrar {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<rsip::Request> {
        self.sent.lock().unwrap().clone()
    }

    fn respond(policy: Policy, request: &rsip::Request) -> ResponseEvent {
        let authorized = request
            .headers
            .iter()
            .any(|h| matches!(h, rsip::Header::Authorization(_)));

        let (status, headers): (rsip::StatusCode, Vec<rsip::Header>) = match policy {
            Policy::Forbid => (rsip::StatusCode::Forbidden, vec![]),
            Policy::ChallengeThenAccept if authorized => (rsip::StatusCode::OK, vec![]),
            Policy::AlwaysChallenge | Policy::ChallengeThenAccept => (
                rsip::StatusCode::Unauthorized,
                vec![rsip::headers::WwwAuthenticate::new(
                    r#"Digest realm="r", nonce="abc", qop="auth", algorithm=MD5"#,
                )
                .into()],
            ),
        };

        ResponseEvent {
            transaction: TransactionId::from_request(request).unwrap(),
            origin: request.clone(),
            response: rsip::Response {
                status_code: status,
                version: rsip::Version::V2,
                headers: headers.into(),
                body: vec![],
            },
        }
    }
}

#[async_trait]
impl TransactionSender for SimulatedRegistrar {
    async fn ready(&self) -> Result<(), SipError> {
        Ok(())
    }

    async fn send(
        &self,
        request: rsip::Request,
        _destination: &Destination,
    ) -> Result<TransactionId, SipError> {
        let id = TransactionId::from_request(&request)?;
        self.sent.lock().unwrap().push(request);
        Ok(id)
    }
}

/// 注册并按策略应答，直到终态或超过步数
async fn drive(policy: Policy, config: BotConfig) -> (EventDispatcher, Arc<SimulatedRegistrar>) {
    let registrar = SimulatedRegistrar::new();
    let controller =
        RegistrationController::new(&config, registrar.clone(), CancellationToken::new()).unwrap();
    let mut dispatcher = EventDispatcher::new(controller);
    dispatcher.controller_mut().register().await.unwrap();

    for _ in 0..20 {
        if dispatcher.controller().state().is_terminal() {
            break;
        }
        let last = registrar.sent().last().cloned().unwrap();
        let event = SimulatedRegistrar::respond(policy, &last);
        dispatcher.dispatch(InboundEvent::Response(event)).await;
    }
    (dispatcher, registrar)
}

fn authorization(request: &rsip::Request) -> HashMap<String, String> {
    let value = request
        .headers
        .iter()
        .find_map(|h| match h {
            rsip::Header::Authorization(a) => Some(a.value().to_string()),
            _ => None,
        })
        .unwrap();
    parse_auth_params(value.strip_prefix("Digest ").unwrap())
}

#[tokio::test]
async fn always_challenging_registrar_hits_retry_bound() {
    let (dispatcher, registrar) = drive(Policy::AlwaysChallenge, BotConfig::default()).await;

    assert_eq!(dispatcher.controller().state(), RegistrationState::Failed);
    assert_eq!(registrar.sent().len(), 3);
    assert_eq!(
        dispatcher.controller().last_error(),
        Some(&RegistrationError::AuthenticationRejected { attempts: 2 })
    );
}

#[tokio::test]
async fn retry_bound_is_configurable() {
    let config = BotConfig::default().with_max_auth_retries(5);
    let (dispatcher, registrar) = drive(Policy::AlwaysChallenge, config).await;

    assert_eq!(dispatcher.controller().state(), RegistrationState::Failed);
    assert_eq!(registrar.sent().len(), 6);
}

#[tokio::test]
async fn retries_are_fresh_and_monotonic() {
    let (_dispatcher, registrar) = drive(Policy::AlwaysChallenge, BotConfig::default()).await;
    let sent = registrar.sent();

    for pair in sent.windows(2) {
        assert_ne!(via_branch(&pair[0].headers), via_branch(&pair[1].headers));
        assert_ne!(
            pair[0].call_id_header().unwrap().value(),
            pair[1].call_id_header().unwrap().value()
        );
    }

    let cseqs: Vec<String> = sent
        .iter()
        .map(|r| r.cseq_header().unwrap().value().to_string())
        .collect();
    assert_eq!(cseqs, vec!["1 REGISTER", "2 REGISTER", "3 REGISTER"]);

    let first = authorization(&sent[1]);
    let second = authorization(&sent[2]);
    assert_eq!(first["nc"], "00000001");
    assert_eq!(second["nc"], "00000002");
    assert_ne!(first["cnonce"], second["cnonce"]);
}

#[tokio::test]
async fn challenge_scenario_produces_expected_digest() {
    let (dispatcher, registrar) = drive(Policy::ChallengeThenAccept, BotConfig::default()).await;
    assert_eq!(dispatcher.controller().state(), RegistrationState::Registered);

    let sent = registrar.sent();
    assert_eq!(sent.len(), 2);
    let (original, retry) = (&sent[0], &sent[1]);
    assert_ne!(
        original.call_id_header().unwrap().value(),
        retry.call_id_header().unwrap().value()
    );

    let params = authorization(retry);
    let expected = ChallengeDigest {
        username: "1001",
        password: "100672",
        realm: "r",
        nonce: "abc",
        method: &rsip::Method::Register,
        uri: "sip:192.168.2.59",
        algorithm: DigestAlgorithm::Md5,
        qop: Some(DigestQop {
            qop: "auth",
            cnonce: &params["cnonce"],
            nc: 1,
        }),
    }
    .compute();
    assert_eq!(params["response"], expected);
    assert_eq!(params["username"], "1001");
    assert_eq!(params["uri"], "sip:192.168.2.59");
}

#[tokio::test]
async fn forbidden_is_terminal_without_retry() {
    let (dispatcher, registrar) = drive(Policy::Forbid, BotConfig::default()).await;

    assert_eq!(dispatcher.controller().state(), RegistrationState::Failed);
    assert_eq!(registrar.sent().len(), 1);
    assert_eq!(
        dispatcher.controller().last_error().and_then(|e| e.sip_status_code()),
        Some(403)
    );
}

#[tokio::test]
async fn status_observer_sees_final_outcome() {
    let registrar = SimulatedRegistrar::new();
    let controller = RegistrationController::new(
        &BotConfig::default(),
        registrar.clone(),
        CancellationToken::new(),
    )
    .unwrap();
    let status = controller.subscribe();
    let mut dispatcher = EventDispatcher::new(controller);
    dispatcher.controller_mut().register().await.unwrap();

    let first = registrar.sent().last().cloned().unwrap();
    dispatcher
        .dispatch(InboundEvent::Response(SimulatedRegistrar::respond(
            Policy::Forbid,
            &first,
        )))
        .await;

    let current = status.borrow().clone();
    assert_eq!(current.state, RegistrationState::Failed);
    assert_eq!(current.code, Some(403));
}
