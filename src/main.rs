use clap::Parser;
use sip_bot::config::{
    BotConfig, DEFAULT_LOCAL_IP, DEFAULT_LOCAL_PORT, DEFAULT_MAX_AUTH_RETRIES, DEFAULT_PASSWORD,
    DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, DEFAULT_USERNAME, DEFAULT_USER_AGENT,
};
use sip_bot::console::{run_console, ConsoleExit};
use sip_bot::{utils, SipBot};
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// SIP Bot CLI Application
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Registrar host
    #[arg(short, long, env = "SIPBOT_SERVER", default_value = DEFAULT_SERVER_HOST)]
    server: String,

    /// Registrar port
    #[arg(long, env = "SIPBOT_PORT", default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// SIP username
    #[arg(short, long, env = "SIPBOT_USER", default_value = DEFAULT_USERNAME)]
    user: String,

    /// SIP password
    #[arg(short, long, env = "SIPBOT_PASSWORD", default_value = DEFAULT_PASSWORD, hide_env_values = true)]
    password: String,

    /// Local listen IP, or "auto" for the first non-loopback IPv4 interface
    #[arg(long, env = "SIPBOT_LOCAL_IP", default_value = DEFAULT_LOCAL_IP)]
    local_ip: String,

    /// Local listen port
    #[arg(long, env = "SIPBOT_LOCAL_PORT", default_value_t = DEFAULT_LOCAL_PORT)]
    local_port: u16,

    /// User-Agent string
    #[arg(long, env = "SIPBOT_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Maximum authenticated retries after a challenge
    #[arg(long, env = "SIPBOT_MAX_AUTH_RETRIES", default_value_t = DEFAULT_MAX_AUTH_RETRIES)]
    max_auth_retries: u32,

    /// Optional Expires value in seconds
    #[arg(long, env = "SIPBOT_EXPIRES")]
    expires: Option<u32>,

    /// Log level
    #[arg(short, long, env = "SIPBOT_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<BotConfig, Box<dyn std::error::Error>> {
        let local_ip: IpAddr = if self.local_ip.eq_ignore_ascii_case("auto") {
            let ip = utils::get_first_non_loopback_interface()?;
            info!("检测到本地出口IP: {}", ip);
            ip
        } else {
            self.local_ip.parse()?
        };

        let mut config = BotConfig {
            server_host: self.server,
            server_port: self.port,
            username: self.user,
            password: self.password,
            user_agent: self.user_agent,
            ..BotConfig::default()
        }
        .with_local_addr(local_ip, self.local_port)
        .with_max_auth_retries(self.max_auth_retries);
        if let Some(expires) = self.expires {
            config = config.with_expires(expires);
        }
        config.validate()?;
        Ok(config)
    }
}

/// 运行时关闭时等待阻塞任务的上限
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run());
    shutdown_runtime(runtime);
    result
}

/// 限时关闭运行时
///
/// 标准输入的阻塞读取在收到关闭信号后仍会挂起，不能无限等待它结束
fn shutdown_runtime(runtime: Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    utils::initialize_logging(args.log_level.as_str());
    let config = args.into_config()?;

    let cancel_token = CancellationToken::new();
    spawn_signal_handler(cancel_token.clone());

    let mut bot = SipBot::start(config, cancel_token.clone()).await?;

    let mut status = bot.status();
    let status_cancel = cancel_token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = status_cancel.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    println!("Registration: {}", current);
                }
            }
        }
    });

    let reader = BufReader::new(tokio::io::stdin());
    let exit = run_console(reader, tokio::io::stdout(), cancel_token.clone()).await;
    match &exit {
        Ok(ConsoleExit::Command) => info!("收到 exit 命令"),
        Ok(ConsoleExit::EndOfInput) => info!("标准输入已关闭"),
        Ok(ConsoleExit::Cancelled) => info!("收到关闭信号"),
        Err(e) => error!("控制台读取失败: {}", e),
    }

    info!("Shutting down...");
    bot.stop().await;
    Ok(())
}

/// SIGINT / SIGTERM / SIGQUIT 触发关闭
fn spawn_signal_handler(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("无法监听 SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
                (Ok(mut term), Ok(mut quit)) => {
                    tokio::select! {
                        _ = term.recv() => {}
                        _ = quit.recv() => {}
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!("无法监听 SIGTERM/SIGQUIT: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = interrupt => info!("收到 SIGINT"),
            _ = terminate => info!("收到 SIGTERM/SIGQUIT"),
            _ = cancel_token.cancelled() => return,
        }
        cancel_token.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_shutdown_does_not_wait_for_blocked_reader() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let (_keep_open, blocked) = std::sync::mpsc::channel::<()>();
        runtime.spawn_blocking(move || blocked.recv());

        let started = Instant::now();
        shutdown_runtime(runtime);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "sip-bot",
            "--server",
            "10.0.0.9",
            "--port",
            "5080",
            "--local-ip",
            "127.0.0.1",
            "--max-auth-retries",
            "4",
            "--expires",
            "600",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.server_host, "10.0.0.9");
        assert_eq!(config.server_port, 5080);
        assert_eq!(config.max_auth_retries, 4);
        assert_eq!(config.expires, Some(600));
    }
}
