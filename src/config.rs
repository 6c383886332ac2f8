/// 机器人配置
///
/// 编译期内置一套默认身份，命令行与环境变量可以覆盖
use crate::error::ConfigError;
use crate::registration::{Credentials, Destination};
use std::net::IpAddr;

pub const DEFAULT_SERVER_HOST: &str = "192.168.2.59";
pub const DEFAULT_SERVER_PORT: u16 = 7206;
pub const DEFAULT_USERNAME: &str = "1001";
pub const DEFAULT_PASSWORD: &str = "100672";
pub const DEFAULT_LOCAL_IP: &str = "192.168.2.59";
pub const DEFAULT_LOCAL_PORT: u16 = 8000;
pub const DEFAULT_USER_AGENT: &str = "Goodstartsoft";
pub const DEFAULT_MAX_AUTH_RETRIES: u32 = 2;

/// SIP 机器人配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    /// 注册服务器地址（主机名或 IP）
    pub server_host: String,

    /// 注册服务器端口
    pub server_port: u16,

    /// SIP 用户名
    pub username: String,

    /// SIP 密码
    pub password: String,

    /// 本地监听地址
    pub local_ip: IpAddr,

    /// 本地监听端口
    pub local_port: u16,

    /// User-Agent字符串
    pub user_agent: String,

    /// 收到认证挑战后最多重试的次数
    pub max_auth_retries: u32,

    /// 可选的 Expires 报头（秒）
    pub expires: Option<u32>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            local_ip: DEFAULT_LOCAL_IP
                .parse()
                .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            local_port: DEFAULT_LOCAL_PORT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_auth_retries: DEFAULT_MAX_AUTH_RETRIES,
            expires: None,
        }
    }
}

impl BotConfig {
    /// 创建新的配置，其余字段取默认值
    pub fn new(server: &str, username: &str, password: &str) -> Result<Self, ConfigError> {
        let (server_host, server_port) = split_host_port(server, DEFAULT_SERVER_PORT)?;
        let config = Self {
            server_host,
            server_port,
            username: username.to_string(),
            password: password.to_string(),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_local_addr(mut self, local_ip: IpAddr, local_port: u16) -> Self {
        self.local_ip = local_ip;
        self.local_port = local_port;
        self
    }

    pub fn with_max_auth_retries(mut self, max_auth_retries: u32) -> Self {
        self.max_auth_retries = max_auth_retries;
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::Missing("server_host".into()));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("username".into()));
        }
        if self.server_port == 0 {
            return Err(ConfigError::Invalid("server_port 不能为 0".into()));
        }
        if self.local_port == 0 {
            return Err(ConfigError::Invalid("local_port 不能为 0".into()));
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// 请求的物理发送目标
    pub fn destination(&self) -> Destination {
        Destination {
            host: self.server_host.clone(),
            port: self.server_port,
        }
    }

    /// 摘要计算使用的 uri，即 `sip:<server_host>`
    pub fn digest_uri(&self) -> String {
        format!("sip:{}", self.server_host)
    }
}

/// 拆分 `host[:port]`，缺省端口使用 `default_port`
pub fn split_host_port(value: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    let value = value.trim().trim_start_matches("sip:");
    if value.is_empty() {
        return Err(ConfigError::Missing("server".into()));
    }

    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("无效端口: {}", port)))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((value.to_string(), default_port)),
    }
}
