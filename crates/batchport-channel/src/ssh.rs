//! SSH/SFTP channel to a remote login node.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use ssh2::{CheckResult, ErrorCode, FileStat, KnownHostFileKind, Session, Sftp};
use tracing::{debug, info};

use crate::channel::{Channel, ExecOutput};
use crate::error::{ChannelError, ChannelResult};
use crate::shell::shell_quote;

/// libssh2 session error code for an expired session timeout.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
/// SFTP status codes.
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_PERMISSION_DENIED: i32 = 3;

/// Extra time granted to the blocking call over the session timeout.
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);
/// Pause between non-blocking reads when neither stream has data.
const DRAIN_BACKOFF: Duration = Duration::from_millis(5);

/// Connection settings for [`SshChannel`].
#[derive(Clone)]
pub struct SshConfig {
    /// Remote hostname.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Password (tried before keys when set).
    pub password: Option<String>,
    /// Private key file. Falls back to the SSH agent when unset.
    pub key_path: Option<PathBuf>,
    /// known_hosts file to verify the server key against. Unverified when unset.
    pub known_hosts: Option<PathBuf>,
    /// Remote directory for staged scripts.
    pub script_dir: PathBuf,
    /// Environment variables prepended to every command.
    pub envs: FxHashMap<String, String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl SshConfig {
    /// Create settings for `username@host` with defaults for everything else.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            password: None,
            key_path: None,
            known_hosts: None,
            script_dir: PathBuf::from(".batchport/scripts"),
            envs: FxHashMap::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("key_path", &self.key_path)
            .field("known_hosts", &self.known_hosts)
            .field("script_dir", &self.script_dir)
            .field("envs", &self.envs)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

struct SshSession {
    session: Session,
    sftp: Sftp,
}

/// Channel over a single libssh2 session.
///
/// All libssh2 calls are blocking and run on the blocking thread pool while
/// holding the session lock. The session timeout is set per call, so a call
/// abandoned by its caller still returns and releases the lock.
pub struct SshChannel {
    config: SshConfig,
    inner: Arc<Mutex<SshSession>>,
}

impl std::fmt::Debug for SshChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshChannel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SshChannel {
    /// Connect, authenticate, and make sure the script directory exists.
    pub async fn connect(config: SshConfig) -> ChannelResult<Self> {
        let cfg = config.clone();
        let session = tokio::task::spawn_blocking(move || connect_blocking(&cfg))
            .await
            .map_err(|e| ChannelError::connection(&config.host, e.to_string()))??;

        info!(host = %config.host, user = %config.username, "SSH channel connected");

        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(session)),
        })
    }

    /// Run `f` against the session on the blocking pool.
    async fn with_session<T, F>(&self, timeout: Duration, f: F) -> ChannelResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SshSession, &str) -> ChannelResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let host = self.config.host.clone();
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        let task = tokio::task::spawn_blocking(move || {
            let guard = inner
                .lock()
                .map_err(|_| ChannelError::connection(&host, "session lock poisoned"))?;
            guard.session.set_timeout(millis);
            let result = f(&guard, &host);
            guard.session.set_timeout(0);
            result
        });

        match tokio::time::timeout(timeout + TIMEOUT_GRACE, task).await {
            Ok(joined) => joined.map_err(|e| ChannelError::connection(&self.config.host, e.to_string()))?,
            Err(_) => Err(ChannelError::Timeout {
                command: "ssh session call".to_string(),
                timeout,
            }),
        }
    }

    /// Prefix a command with `env K=V ...` for the configured variables.
    fn prepend_envs(&self, command: &str) -> String {
        prepend_envs(&self.config.envs, command)
    }
}

#[async_trait]
impl Channel for SshChannel {
    fn hostname(&self) -> &str {
        &self.config.host
    }

    fn script_dir(&self) -> &Path {
        &self.config.script_dir
    }

    async fn execute(&self, command: &str, timeout: Duration) -> ChannelResult<ExecOutput> {
        let full = self.prepend_envs(command);
        debug!(host = %self.config.host, command = %full, "Executing remote command");

        let cmd = full.clone();
        self.with_session(timeout, move |s, host| {
            let ssh_err = |e: ssh2::Error| map_ssh_error(e, host, &cmd, timeout);
            let io_err = |e: std::io::Error| map_io_error(e, host, &cmd, timeout);

            let mut channel = s.session.channel_session().map_err(ssh_err)?;
            channel.exec(&cmd).map_err(ssh_err)?;

            s.session.set_blocking(false);
            let drained = drain_output(&mut channel, timeout);
            s.session.set_blocking(true);
            let (stdout, stderr) = drained.map_err(io_err)?;

            channel.wait_close().map_err(ssh_err)?;
            let exit_code = channel.exit_status().map_err(ssh_err)?;

            Ok(ExecOutput {
                exit_code,
                stdout,
                stderr,
            })
        })
        .await
    }

    async fn push_file(&self, local_path: &Path, remote_path: &Path) -> ChannelResult<()> {
        let local = local_path.to_path_buf();
        let remote = remote_path.to_path_buf();
        let timeout = self.config.connect_timeout;

        self.with_session(timeout, move |s, host| {
            if let Some(parent) = remote.parent() {
                create_remote_dir_all(&s.sftp, parent, host)?;
            }

            let mut src = std::fs::File::open(&local)?;
            let mut dst = s
                .sftp
                .create(&remote)
                .map_err(|e| map_sftp_error(e, host, &remote))?;
            std::io::copy(&mut src, &mut dst)
                .map_err(|e| ChannelError::file_copy(host, e.to_string()))?;
            dst.flush()
                .map_err(|e| ChannelError::file_copy(host, e.to_string()))?;

            let perms = FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: Some(0o755),
                atime: None,
                mtime: None,
            };
            s.sftp
                .setstat(&remote, perms)
                .map_err(|e| map_sftp_error(e, host, &remote))?;
            Ok(())
        })
        .await?;

        debug!(
            host = %self.config.host,
            from = %local_path.display(),
            to = %remote_path.display(),
            "Pushed file"
        );
        Ok(())
    }

    async fn pull_file(&self, remote_path: &Path, local_path: &Path) -> ChannelResult<()> {
        if tokio::fs::try_exists(local_path).await? {
            return Err(ChannelError::FileExists(local_path.to_path_buf()));
        }
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let local = local_path.to_path_buf();
        let remote = remote_path.to_path_buf();
        let timeout = self.config.connect_timeout;

        self.with_session(timeout, move |s, host| {
            let mut src = s
                .sftp
                .open(&remote)
                .map_err(|e| map_sftp_error(e, host, &remote))?;
            let mut dst = std::fs::File::create(&local)?;
            std::io::copy(&mut src, &mut dst)
                .map_err(|e| ChannelError::file_copy(host, e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> ChannelResult<()> {
        self.with_session(self.config.connect_timeout, |s, host| {
            s.session
                .disconnect(None, "batchport channel closed", None)
                .map_err(|e| ChannelError::connection(host, e.to_string()))
        })
        .await?;
        info!(host = %self.config.host, "SSH channel closed");
        Ok(())
    }
}

fn connect_blocking(config: &SshConfig) -> ChannelResult<SshSession> {
    let host = &config.host;
    let addr = (host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| ChannelError::connection(host, e.to_string()))?
        .next()
        .ok_or_else(|| ChannelError::connection(host, "hostname did not resolve"))?;

    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout)
        .map_err(|e| ChannelError::connection(host, e.to_string()))?;

    let mut session = Session::new().map_err(|e| ChannelError::connection(host, e.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| ChannelError::connection(host, e.to_string()))?;

    if let Some(known_hosts) = &config.known_hosts {
        verify_host_key(&session, config, known_hosts)?;
    }

    authenticate(&session, config)?;

    let sftp = session
        .sftp()
        .map_err(|e| ChannelError::connection(host, e.to_string()))?;
    create_remote_dir_all(&sftp, &config.script_dir, host)?;

    Ok(SshSession { session, sftp })
}

fn verify_host_key(session: &Session, config: &SshConfig, known_hosts: &Path) -> ChannelResult<()> {
    let bad_key = || ChannelError::BadHostKey {
        host: config.host.clone(),
    };

    let mut known = session.known_hosts().map_err(|_| bad_key())?;
    known
        .read_file(known_hosts, KnownHostFileKind::OpenSSH)
        .map_err(|_| bad_key())?;
    let (key, _) = session.host_key().ok_or_else(bad_key)?;

    match known.check_port(&config.host, config.port, key) {
        CheckResult::Match => Ok(()),
        _ => Err(bad_key()),
    }
}

fn authenticate(session: &Session, config: &SshConfig) -> ChannelResult<()> {
    let auth_err = |reason: String| ChannelError::Authentication {
        host: config.host.clone(),
        reason,
    };

    if let Some(password) = &config.password {
        session
            .userauth_password(&config.username, password)
            .map_err(|e| auth_err(e.to_string()))?;
    } else if let Some(key_path) = &config.key_path {
        session
            .userauth_pubkey_file(&config.username, None, key_path, None)
            .map_err(|e| auth_err(e.to_string()))?;
    } else {
        let mut agent = session.agent().map_err(|e| auth_err(e.to_string()))?;
        agent.connect().map_err(|e| auth_err(e.to_string()))?;
        agent.list_identities().map_err(|e| auth_err(e.to_string()))?;

        let identities = agent.identities().map_err(|e| auth_err(e.to_string()))?;
        let accepted = identities
            .iter()
            .any(|identity| agent.userauth(&config.username, identity).is_ok());
        if !accepted {
            return Err(auth_err("no key in the SSH agent was accepted".to_string()));
        }
    }

    if !session.authenticated() {
        return Err(auth_err("authentication failed".to_string()));
    }
    Ok(())
}

fn create_remote_dir_all(sftp: &Sftp, path: &Path, host: &str) -> ChannelResult<()> {
    let mut current = PathBuf::new();
    for component in path.components() {
        current.push(component);
        match sftp.stat(&current) {
            Ok(stat) if stat.is_dir() => {}
            Ok(_) => {
                return Err(ChannelError::BadScriptPath {
                    host: host.to_string(),
                    path: current,
                });
            }
            Err(_) => {
                sftp.mkdir(&current, 0o755).map_err(|e| match e.code() {
                    ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => ChannelError::PermissionDenied {
                        host: host.to_string(),
                        path: current.clone(),
                    },
                    _ => ChannelError::BadScriptPath {
                        host: host.to_string(),
                        path: current.clone(),
                    },
                })?;
            }
        }
    }
    Ok(())
}

fn prepend_envs(envs: &FxHashMap<String, String>, command: &str) -> String {
    if envs.is_empty() {
        return command.to_string();
    }
    let mut pairs: Vec<_> = envs.iter().collect();
    pairs.sort();

    let mut full = String::from("env");
    for (k, v) in pairs {
        full.push_str(&format!(" {}={}", k, shell_quote(v)));
    }
    full.push(' ');
    full.push_str(command);
    full
}

/// The two output streams of a running remote command.
trait OutputStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    /// The remote side has sent end of file.
    fn finished(&self) -> bool;
}

impl OutputStreams for ssh2::Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stderr().read(buf)
    }

    fn finished(&self) -> bool {
        self.eof()
    }
}

/// Read stdout and stderr together until end of file. Both streams share
/// one flow-control window, so draining one to the end first stalls once
/// the other fills it. Expects a non-blocking session.
fn drain_output<S: OutputStreams>(
    streams: &mut S,
    timeout: Duration,
) -> std::io::Result<(String, String)> {
    let deadline = Instant::now() + timeout;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let out = read_available(streams.read_stdout(&mut buf), &buf, &mut stdout)?;
        let err = read_available(streams.read_stderr(&mut buf), &buf, &mut stderr)?;
        if out > 0 || err > 0 {
            continue;
        }
        if streams.finished() {
            break;
        }
        if Instant::now() >= deadline {
            return Err(std::io::ErrorKind::TimedOut.into());
        }
        std::thread::sleep(DRAIN_BACKOFF);
    }

    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

/// Append what one read produced. `WouldBlock` counts as nothing read.
fn read_available(
    read: std::io::Result<usize>,
    buf: &[u8],
    sink: &mut Vec<u8>,
) -> std::io::Result<usize> {
    match read {
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

fn map_ssh_error(err: ssh2::Error, host: &str, command: &str, timeout: Duration) -> ChannelError {
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => ChannelError::Timeout {
            command: command.to_string(),
            timeout,
        },
        _ => ChannelError::connection(host, err.to_string()),
    }
}

fn map_io_error(err: std::io::Error, host: &str, command: &str, timeout: Duration) -> ChannelError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ChannelError::Timeout {
            command: command.to_string(),
            timeout,
        },
        _ => ChannelError::connection(host, err.to_string()),
    }
}

fn map_sftp_error(err: ssh2::Error, host: &str, path: &Path) -> ChannelError {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => ChannelError::BadScriptPath {
            host: host.to_string(),
            path: path.to_path_buf(),
        },
        ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => ChannelError::PermissionDenied {
            host: host.to_string(),
            path: path.to_path_buf(),
        },
        _ => ChannelError::file_copy(host, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_envs() {
        let mut envs = FxHashMap::default();
        assert_eq!(prepend_envs(&envs, "squeue"), "squeue");

        envs.insert("PATH".to_string(), "/opt/slurm/bin".to_string());
        envs.insert("LANG".to_string(), "C".to_string());
        assert_eq!(
            prepend_envs(&envs, "squeue -u me"),
            "env LANG=C PATH=/opt/slurm/bin squeue -u me"
        );
    }

    #[test]
    fn test_prepend_envs_quotes_values() {
        let mut envs = FxHashMap::default();
        envs.insert("MSG".to_string(), "hello world; rm -rf x".to_string());
        assert_eq!(
            prepend_envs(&envs, "squeue"),
            "env MSG='hello world; rm -rf x' squeue"
        );
    }

    /// Remote side that cannot send stdout until its stderr backlog has
    /// been read, as when stderr fills the channel window.
    struct WindowedStreams {
        stderr_left: usize,
        stdout: Option<Vec<u8>>,
    }

    impl OutputStreams for WindowedStreams {
        fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.stderr_left > 0 {
                return Err(std::io::ErrorKind::WouldBlock.into());
            }
            match self.stdout.take() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None => Ok(0),
            }
        }

        fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.stderr_left.min(buf.len());
            buf[..n].fill(b'e');
            self.stderr_left -= n;
            Ok(n)
        }

        fn finished(&self) -> bool {
            self.stderr_left == 0 && self.stdout.is_none()
        }
    }

    #[test]
    fn test_drain_output_interleaves_large_stderr() {
        let mut streams = WindowedStreams {
            stderr_left: 4 * 1024 * 1024,
            stdout: Some(b"done\n".to_vec()),
        };
        let (stdout, stderr) = drain_output(&mut streams, Duration::from_secs(10)).unwrap();
        assert_eq!(stdout, "done\n");
        assert_eq!(stderr.len(), 4 * 1024 * 1024);
    }

    struct SilentStreams;

    impl OutputStreams for SilentStreams {
        fn read_stdout(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::WouldBlock.into())
        }

        fn read_stderr(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::WouldBlock.into())
        }

        fn finished(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_drain_output_times_out() {
        let err = drain_output(&mut SilentStreams, Duration::from_millis(30)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_config_debug_redacts_password() {
        let mut config = SshConfig::new("login.cluster.org", "alice");
        config.password = Some("hunter2".to_string());

        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(config.port, 22);
    }

    #[tokio::test]
    async fn test_connect_unresolvable_host_is_connection_error() {
        let mut config = SshConfig::new("host.invalid", "nobody");
        config.connect_timeout = Duration::from_millis(500);

        let err = SshChannel::connect(config).await.unwrap_err();
        assert!(err.is_transient());
    }
}
