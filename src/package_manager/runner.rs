//! 子进程调用：一次性捕获输出的命令，以及可取消的流式命令

use super::parser::clean_terminal_output;
use super::types::CaptureOutput;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// 合并后的 stdout + stderr 行流；读取失败以 `Err` 的形式出现在流中
pub type LineStream = mpsc::UnboundedReceiver<io::Result<String>>;

/// 对一个正在运行的子进程（及其进程组）的控制能力
pub trait ProcessControl: Send + Sync {
    /// 温和中断（unix 上是发给进程组的 SIGINT）
    fn send_interrupt(&self) -> io::Result<()>;

    /// 强制终止
    fn terminate(&self) -> io::Result<()>;

    fn poll_exited(&self) -> io::Result<bool>;

    /// 阻塞直到进程退出，返回退出码
    fn wait(&self) -> io::Result<Option<i32>>;
}

pub struct StreamingProcess {
    pub lines: LineStream,
    pub control: Arc<dyn ProcessControl>,
}

/// 包管理器命令行的调用方式
pub trait Runner: Send + Sync {
    fn program(&self) -> &str;

    /// 阻塞执行并捕获输出（search / list / show / source）
    fn run_capture(&self, args: &[String]) -> Result<CaptureOutput>;

    /// 非阻塞启动，输出以行流的形式交给调用方
    fn spawn_streaming(&self, args: &[String]) -> Result<StreamingProcess>;
}

#[derive(Debug, Clone)]
pub struct WingetRunner {
    program: String,
    poll_interval: Duration,
}

impl WingetRunner {
    pub fn new(program: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            program: program.into(),
            poll_interval,
        }
    }

    fn launch_error(&self, source: io::Error) -> Error {
        Error::Launch {
            program: self.program.clone(),
            source,
        }
    }
}

impl Runner for WingetRunner {
    fn program(&self) -> &str {
        &self.program
    }

    fn run_capture(&self, args: &[String]) -> Result<CaptureOutput> {
        log::debug!("run {} {}", self.program, args.join(" "));
        let output = duct::cmd(&self.program, args)
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|e| self.launch_error(e))?;

        Ok(CaptureOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }

    fn spawn_streaming(&self, args: &[String]) -> Result<StreamingProcess> {
        log::debug!("spawn {} {}", self.program, args.join(" "));
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| self.launch_error(e))?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // 两个读取线程共用一个 channel，两个发送端都关闭后流才结束
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = stdout {
            let tx = tx.clone();
            std::thread::spawn(move || read_stream_lines(stdout, &tx));
        }
        if let Some(stderr) = stderr {
            std::thread::spawn(move || read_stream_lines(stderr, &tx));
        }

        Ok(StreamingProcess {
            lines: rx,
            control: Arc::new(ChildControl {
                pid,
                child: Mutex::new(child),
                poll_interval: self.poll_interval,
            }),
        })
    }
}

/// 子进程放进独立的进程组，取消一个任务时不会波及其他任务或本进程
#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn isolate_process_group(_cmd: &mut Command) {}

/// 按行读取管道并发送到 channel；`\r` 刷新的进度帧只保留最后一帧
fn read_stream_lines(stream: impl Read, tx: &mpsc::UnboundedSender<io::Result<String>>) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                let line = clean_terminal_output(&String::from_utf8_lossy(&buffer));
                if tx.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

struct ChildControl {
    pid: u32,
    child: Mutex<Child>,
    poll_interval: Duration,
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let ret = unsafe { libc::kill(-(pgid as i32), signal) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// 向子进程所在的进程组发送 CTRL_BREAK（需要 CREATE_NEW_PROCESS_GROUP）
#[cfg(windows)]
fn ctrl_break_group(pgid: u32) -> io::Result<()> {
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
    let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pgid) };
    if ok != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// 结束整棵进程树，安装程序等孙进程一并结束
#[cfg(windows)]
fn kill_process_tree(pid: u32) -> io::Result<()> {
    let output = duct::cmd("taskkill", ["/T", "/F", "/PID", &pid.to_string()])
        .stdin_null()
        .stdout_null()
        .stderr_capture()
        .unchecked()
        .run()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "taskkill 失败: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

impl ChildControl {
    /// 持锁确认子进程尚未被回收后再发信号。
    /// 已回收的 pid / 进程组号可能被复用，此时不能再发任何信号。
    fn signal_if_alive(&self, signal: impl FnOnce(&mut Child) -> io::Result<()>) -> io::Result<()> {
        let mut child = self.child.lock();
        if child.try_wait()?.is_some() {
            log::debug!("进程 {} 已退出，跳过信号", self.pid);
            return Ok(());
        }
        signal(&mut child)
    }
}

impl ProcessControl for ChildControl {
    fn send_interrupt(&self) -> io::Result<()> {
        self.signal_if_alive(|_child| {
            #[cfg(unix)]
            {
                signal_group(self.pid, libc::SIGINT)
            }
            #[cfg(windows)]
            {
                ctrl_break_group(self.pid)
            }
            // 没有进程组信号时退化为直接结束子进程
            #[cfg(not(any(unix, windows)))]
            {
                _child.kill()
            }
        })
    }

    fn terminate(&self) -> io::Result<()> {
        self.signal_if_alive(|child| {
            #[cfg(unix)]
            {
                let _ = child;
                signal_group(self.pid, libc::SIGKILL)
            }
            #[cfg(windows)]
            {
                kill_process_tree(self.pid).or_else(|e| {
                    log::warn!("结束进程树 {} 失败，仅结束子进程: {}", self.pid, e);
                    child.kill()
                })
            }
            #[cfg(not(any(unix, windows)))]
            {
                child.kill()
            }
        })
    }

    fn poll_exited(&self) -> io::Result<bool> {
        Ok(self.child.lock().try_wait()?.is_some())
    }

    fn wait(&self) -> io::Result<Option<i32>> {
        // 轮询 try_wait，锁只在单次查询期间持有
        loop {
            if let Some(status) = self.child.lock().try_wait()? {
                return Ok(status.code());
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
