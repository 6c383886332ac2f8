/// 操作员控制台
///
/// 只识别 `exit`；空行忽略，其它输入提示未知命令
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const PROMPT: &str = "sipbot> ";

/// 控制台命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Command::Empty,
            "exit" => Command::Exit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// 控制台退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// 输入了 exit
    Command,
    /// 输入流结束
    EndOfInput,
    /// 收到关闭信号
    Cancelled,
}

/// 逐行读取命令直到 `exit`、输入结束或关闭信号
pub async fn run_console<R, W>(
    reader: R,
    mut writer: W,
    cancel_token: CancellationToken,
) -> std::io::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        writer.write_all(PROMPT.as_bytes()).await?;
        writer.flush().await?;

        let line = tokio::select! {
            _ = cancel_token.cancelled() => return Ok(ConsoleExit::Cancelled),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("控制台输入结束");
            return Ok(ConsoleExit::EndOfInput);
        };

        match Command::parse(&line) {
            Command::Exit => {
                writer.write_all(b"Exiting...\n").await?;
                writer.flush().await?;
                return Ok(ConsoleExit::Command);
            }
            Command::Empty => {}
            Command::Unknown(command) => {
                writer
                    .write_all(format!("Unknown command: {}\n", command).as_bytes())
                    .await?;
            }
        }
    }
}
