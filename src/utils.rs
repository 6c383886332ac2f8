/// SIP 工具函数模块
///
/// 提供标识符生成、日志初始化以及报头操作等辅助函数

use rand::Rng;
use rsip::prelude::ToTypedHeader;
use std::mem::discriminant;
use std::net::IpAddr;
use uuid::Uuid;

/// RFC 3261 要求的 branch 魔术前缀
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// 初始化日志
///
/// 无法识别的级别字符串按 `info` 处理；重复调用不会报错
pub fn initialize_logging(level: &str) {
    let level = level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

/// 获取第一个非回环的网络接口 IP 地址
///
/// 遍历系统所有网络接口，返回第一个非回环的 IPv4 地址
///
/// # 返回
/// - `Ok(IpAddr)` - 成功找到的 IPv4 地址
/// - `Err` - 未找到可用的 IPv4 接口
pub fn get_first_non_loopback_interface() -> Result<IpAddr, Box<dyn std::error::Error>> {
    for interface in get_if_addrs::get_if_addrs()? {
        if !interface.is_loopback() {
            match interface.addr {
                get_if_addrs::IfAddr::V4(ref addr) => return Ok(IpAddr::V4(addr.ip)),
                _ => continue,
            }
        }
    }
    Err("未找到 IPv4 接口".into())
}

/// 生成基于 UUID 的 Call-ID
///
/// # 参数
/// * `domain` - 可选的域名后缀
///
/// # 示例
/// ```rust
/// use sip_bot::utils::make_call_id;
///
/// let call_id = make_call_id(Some("example.com"));
/// // 生成类似: "550e8400-e29b-41d4-a716-446655440000@example.com"
/// assert!(call_id.to_string().contains("@example.com"));
/// ```
pub fn make_call_id(domain: Option<&str>) -> rsip::headers::CallId {
    let uuid = Uuid::new_v4();

    match domain {
        Some(d) => format!("{}@{}", uuid, d).into(),
        None => uuid.to_string().into(),
    }
}

/// 生成新的 Via branch，始终带 `z9hG4bK` 前缀
pub fn make_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, Uuid::new_v4().simple())
}

/// 生成 From tag
pub fn make_tag() -> String {
    format!("{:08x}", rand::rng().random::<u32>())
}

/// 生成客户端 cnonce
///
/// 使用线程本地的密码学安全随机数生成器，每次调用结果都不同
pub fn make_cnonce() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}

/// 读取第一个 Via 报头的 branch 参数
pub fn via_branch(headers: &rsip::Headers) -> Option<String> {
    let via = headers.iter().find_map(|header| match header {
        rsip::Header::Via(via) => via.typed().ok(),
        _ => None,
    })?;

    via.params.iter().find_map(|param| match param {
        rsip::Param::Branch(branch) => Some(branch.to_string()),
        _ => None,
    })
}

/// 替换第一个 Via 报头的 branch 参数
///
/// 请求中没有可解析的 Via 报头时返回 `false`
pub fn set_via_branch(headers: &mut rsip::Headers, branch: &str) -> bool {
    let via = headers.iter().find_map(|header| match header {
        rsip::Header::Via(via) => via.typed().ok(),
        _ => None,
    });

    let Some(mut via) = via else {
        return false;
    };

    via.params.retain(|param| !matches!(param, rsip::Param::Branch(_)));
    via.params.push(rsip::Param::Branch(branch.to_string().into()));
    replace_header(headers, rsip::Header::Via(via.into()));
    true
}

/// 原位替换同类报头，保持报头顺序
///
/// 同类报头不存在时插入到 Content-Length 之前（没有 Content-Length 则追加到末尾）；
/// 存在多个同类报头时只保留第一个位置
pub fn replace_header(headers: &mut rsip::Headers, header: rsip::Header) {
    let kind = discriminant(&header);
    let mut updated: Vec<rsip::Header> = Vec::new();
    let mut replaced = false;

    for existing in headers.iter() {
        if discriminant(existing) != kind {
            updated.push(existing.clone());
        } else if !replaced {
            updated.push(header.clone());
            replaced = true;
        }
    }

    if !replaced {
        insert_before_content_length(&mut updated, header);
    }

    *headers = updated.into();
}

/// 插入报头到 Content-Length 之前，已有的同类报头不受影响
pub fn insert_header(headers: &mut rsip::Headers, header: rsip::Header) {
    let mut updated: Vec<rsip::Header> = headers.iter().cloned().collect();
    insert_before_content_length(&mut updated, header);
    *headers = updated.into();
}

fn insert_before_content_length(headers: &mut Vec<rsip::Header>, header: rsip::Header) {
    let position = headers
        .iter()
        .position(|h| matches!(h, rsip::Header::ContentLength(_)))
        .unwrap_or(headers.len());
    headers.insert(position, header);
}

/// 删除所有满足条件的报头
pub fn remove_headers<F>(headers: &mut rsip::Headers, predicate: F)
where
    F: Fn(&rsip::Header) -> bool,
{
    let kept: Vec<rsip::Header> = headers
        .iter()
        .filter(|header| !predicate(header))
        .cloned()
        .collect();
    *headers = kept.into();
}
