/// 认证挑战处理
///
/// 解析 401/407 响应中的摘要挑战，生成带认证信息的新请求：
/// - 401 读取 `WWW-Authenticate`，回写 `Authorization`
/// - 407 读取 `Proxy-Authenticate`，回写 `Proxy-Authorization`
use super::traits::Credentials;
use crate::digest::{format_nc, ChallengeDigest, DigestAlgorithm, DigestQop};
use crate::error::{RegistrationError, RegistrationResult};
use crate::utils::{
    insert_header, make_branch, make_call_id, make_cnonce, remove_headers, replace_header,
    set_via_branch,
};
use rsip::prelude::{HeadersExt, UntypedHeader};
use std::collections::HashMap;
use tracing::{debug, info};

/// 挑战来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// 401 Unauthorized
    Www,
    /// 407 Proxy Authentication Required
    Proxy,
}

impl ChallengeKind {
    pub fn from_status(code: u16) -> Option<Self> {
        match code {
            401 => Some(ChallengeKind::Www),
            407 => Some(ChallengeKind::Proxy),
            _ => None,
        }
    }

    /// 响应中所有同类挑战报头，按出现顺序
    fn challenge_values(&self, response: &rsip::Response) -> Vec<String> {
        response
            .headers
            .iter()
            .filter_map(|header| match (self, header) {
                (ChallengeKind::Www, rsip::Header::WwwAuthenticate(h)) => {
                    Some(h.value().to_string())
                }
                (ChallengeKind::Proxy, rsip::Header::ProxyAuthenticate(h)) => {
                    Some(h.value().to_string())
                }
                _ => None,
            })
            .collect()
    }

    /// 判断报头是否是本类挑战在 `realm` 下的旧应答
    ///
    /// 无法读出 realm 的同类应答也视为旧应答
    fn is_stale_answer(&self, header: &rsip::Header, realm: &str) -> bool {
        let value = match (self, header) {
            (ChallengeKind::Www, rsip::Header::Authorization(h)) => h.value(),
            (ChallengeKind::Proxy, rsip::Header::ProxyAuthorization(h)) => h.value(),
            _ => return false,
        };
        let params = value
            .trim()
            .split_once(char::is_whitespace)
            .map(|(_, params)| params)
            .unwrap_or_default();
        parse_auth_params(params)
            .get("realm")
            .map_or(true, |answered| answered == realm)
    }

    fn answer_header(&self, value: String) -> rsip::Header {
        match self {
            ChallengeKind::Www => rsip::Header::Authorization(value.into()),
            ChallengeKind::Proxy => rsip::Header::ProxyAuthorization(value.into()),
        }
    }
}

/// 服务器下发的摘要挑战
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    /// qop 选项列表，未提供时为空
    pub qop: Vec<String>,
    pub stale: bool,
}

impl DigestChallenge {
    /// 解析 `Digest realm="...", nonce="...", ...`
    pub fn parse(value: &str) -> RegistrationResult<Self> {
        let value = value.trim();
        let (scheme, params) = value.split_once(char::is_whitespace).unwrap_or((value, ""));
        if !scheme.eq_ignore_ascii_case("Digest") {
            return Err(RegistrationError::challenge_parse(format!(
                "不支持的认证方案: {}",
                scheme
            )));
        }

        let mut params = parse_auth_params(params);
        let realm = params
            .remove("realm")
            .ok_or_else(|| RegistrationError::challenge_parse("缺少 realm"))?;
        let nonce = params
            .remove("nonce")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| RegistrationError::challenge_parse("缺少 nonce"))?;

        let qop = params
            .remove("qop")
            .map(|q| {
                q.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            realm,
            nonce,
            opaque: params.remove("opaque"),
            algorithm: params.remove("algorithm"),
            qop,
            stale: params
                .remove("stale")
                .map(|s| s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}

/// 解析 auth-param 列表（key=value 或 key="value"，逗号分隔）
///
/// 键统一转为小写
pub fn parse_auth_params(params: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_key = true;
    let mut in_quotes = false;
    let mut escaped = false;

    let mut flush = |key: &mut String, value: &mut String| {
        let k = key.trim().to_ascii_lowercase();
        if !k.is_empty() {
            result.insert(k, value.trim().to_string());
        }
        key.clear();
        value.clear();
    };

    for ch in params.chars() {
        if escaped {
            value.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '=' if in_key && !in_quotes => in_key = false,
            ',' if !in_quotes => {
                flush(&mut key, &mut value);
                in_key = true;
            }
            _ if in_key => key.push(ch),
            _ => value.push(ch),
        }
    }
    flush(&mut key, &mut value);

    result
}

/// 同一 nonce 下的 nonce-count 计数器
#[derive(Debug, Default, Clone)]
struct NonceCounter {
    nonce: Option<String>,
    count: u32,
}

impl NonceCounter {
    /// 返回本次应使用的 nc；换 nonce 时从 1 重新计数
    fn next(&mut self, nonce: &str) -> u32 {
        if self.nonce.as_deref() == Some(nonce) {
            self.count = self.count.saturating_add(1);
        } else {
            self.nonce = Some(nonce.to_string());
            self.count = 1;
        }
        self.count
    }
}

/// 认证后的请求以及本次使用的客户端参数
#[derive(Debug, Clone)]
pub struct AuthorizedRequest {
    pub request: rsip::Request,
    pub call_id: String,
    pub cnonce: Option<String>,
    pub nc: Option<u32>,
}

/// 认证挑战处理器
#[derive(Debug, Clone)]
pub struct AuthenticationChallengeHandler {
    credentials: Credentials,
    digest_uri: String,
    nonce_counter: NonceCounter,
}

impl AuthenticationChallengeHandler {
    /// # 参数
    /// - `credentials`: 登录凭证
    /// - `digest_uri`: 摘要计算与 `uri` 字段使用的地址
    pub fn new(credentials: Credentials, digest_uri: impl Into<String>) -> Self {
        Self {
            credentials,
            digest_uri: digest_uri.into(),
            nonce_counter: NonceCounter::default(),
        }
    }

    /// 根据挑战响应生成新的请求
    ///
    /// 响应带多个挑战时应答第一个算法与 qop 都受支持的。
    /// 新请求是 `original` 的副本，并且：
    /// - 写入 Authorization / Proxy-Authorization，只替换同类同 realm 的旧应答
    /// - Via branch 重新生成
    /// - 方法不是 INVITE 时 Call-ID 重新生成
    /// - CSeq 更新为 `cseq`
    pub fn authorize(
        &mut self,
        response: &rsip::Response,
        original: &rsip::Request,
        cseq: u32,
    ) -> RegistrationResult<AuthorizedRequest> {
        let code = response.status_code.code();
        let kind = ChallengeKind::from_status(code).ok_or_else(|| {
            RegistrationError::challenge_parse(format!("{} 不是认证挑战", code))
        })?;
        let headers = kind.challenge_values(response);
        if headers.is_empty() {
            return Err(RegistrationError::challenge_parse(format!(
                "{} 响应缺少认证报头",
                code
            )));
        }
        let (challenge, algorithm, qop) = select_challenge(&headers)?;

        let (cnonce, nc) = match qop {
            Some(_) => (Some(make_cnonce()), Some(self.nonce_counter.next(&challenge.nonce))),
            None => (None, None),
        };

        let digest = ChallengeDigest {
            username: &self.credentials.username,
            password: &self.credentials.password,
            realm: &challenge.realm,
            nonce: &challenge.nonce,
            method: &original.method,
            uri: &self.digest_uri,
            algorithm,
            qop: match (qop, cnonce.as_deref(), nc) {
                (Some(qop), Some(cnonce), Some(nc)) => Some(DigestQop { qop, cnonce, nc }),
                _ => None,
            },
        };
        let response_hash = digest.compute();

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            self.credentials.username, challenge.realm, challenge.nonce, self.digest_uri, response_hash
        );
        if let (Some(qop), Some(cnonce), Some(nc)) = (qop, cnonce.as_deref(), nc) {
            value.push_str(&format!(
                ", cnonce=\"{}\", nc={}, qop={}",
                cnonce,
                format_nc(nc),
                qop
            ));
        }
        if challenge.algorithm.is_some() {
            value.push_str(&format!(", algorithm={}", algorithm));
        }
        if let Some(opaque) = &challenge.opaque {
            value.push_str(&format!(", opaque=\"{}\"", opaque));
        }

        let mut request = original.clone();
        // 只替换同类同 realm 的旧应答，其它 realm 已通过的凭证保留
        remove_headers(&mut request.headers, |h| {
            kind.is_stale_answer(h, &challenge.realm)
        });
        insert_header(&mut request.headers, kind.answer_header(value));

        if !set_via_branch(&mut request.headers, &make_branch()) {
            return Err(RegistrationError::challenge_parse("原始请求缺少 Via 报头"));
        }

        let call_id = if original.method != rsip::Method::Invite {
            let old = original
                .call_id_header()
                .map(|c| c.value().to_string())
                .unwrap_or_default();
            let domain = old.split_once('@').map(|(_, d)| d);
            let call_id = make_call_id(domain);
            let value = call_id.value().to_string();
            replace_header(&mut request.headers, rsip::Header::CallId(call_id));
            value
        } else {
            original
                .call_id_header()
                .map(|c| c.value().to_string())
                .unwrap_or_default()
        };

        replace_header(
            &mut request.headers,
            rsip::headers::CSeq::new(format!("{} {}", cseq, original.method)).into(),
        );

        info!(
            "生成认证请求: realm={}, nc={:?}, algorithm={}",
            challenge.realm,
            nc.map(format_nc),
            algorithm
        );

        Ok(AuthorizedRequest {
            request,
            call_id,
            cnonce,
            nc,
        })
    }
}

/// 在多个挑战中选出第一个算法与 qop 都受支持的
///
/// 全部不受支持时返回最后一个挑战的错误
fn select_challenge(
    headers: &[String],
) -> RegistrationResult<(DigestChallenge, DigestAlgorithm, Option<&'static str>)> {
    let mut last_error = RegistrationError::challenge_parse("没有可用的认证挑战");
    for header in headers {
        debug!("认证挑战: {}", header);
        match usable_challenge(header) {
            Ok(selected) => return Ok(selected),
            Err(e) => {
                debug!("跳过认证挑战: {}", e);
                last_error = e;
            }
        }
    }
    Err(last_error)
}

fn usable_challenge(
    header: &str,
) -> RegistrationResult<(DigestChallenge, DigestAlgorithm, Option<&'static str>)> {
    let challenge = DigestChallenge::parse(header)?;
    let algorithm = DigestAlgorithm::from_challenge(challenge.algorithm.as_deref())
        .ok_or_else(|| {
            RegistrationError::challenge_parse(format!(
                "不支持的算法: {}",
                challenge.algorithm.as_deref().unwrap_or_default()
            ))
        })?;
    let qop = select_qop(&challenge.qop)?;
    if algorithm == DigestAlgorithm::Md5Sess && qop.is_none() {
        return Err(RegistrationError::challenge_parse("MD5-sess 需要 qop"));
    }
    Ok((challenge, algorithm, qop))
}

/// 从挑战的 qop 列表中选择 `auth`
fn select_qop(offered: &[String]) -> RegistrationResult<Option<&'static str>> {
    if offered.is_empty() {
        return Ok(None);
    }
    if offered.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
        Ok(Some("auth"))
    } else {
        Err(RegistrationError::challenge_parse(format!(
            "不支持的 qop: {}",
            offered.join(",")
        )))
    }
}
