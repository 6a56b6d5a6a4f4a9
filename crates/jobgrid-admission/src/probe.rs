//! External bid probes.
//!
//! A probe sees the full job spec as JSON and may veto the bid. Probes run
//! only after the built-in checks pass. Any probe failure (unreachable
//! endpoint, command that cannot start) counts as a rejection.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use jobgrid_core::JobSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Accept,
    Reject(String),
}

#[async_trait]
pub trait BidProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, job: &JobSpec) -> ProbeVerdict;
}

// ── HTTP probe ─────────────────────────────────────────────────────

/// Optional JSON answer from an HTTP probe endpoint.
#[derive(Debug, Deserialize)]
struct ProbeResponse {
    should_bid: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// POSTs the job as JSON to a URL.
///
/// A non-2xx status rejects. A 2xx body of the form
/// `{"should_bid": false, "reason": "..."}` also rejects with that reason;
/// any other 2xx body accepts.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post(&self, body: Vec<u8>) -> Result<(http::StatusCode, bytes::Bytes), String> {
        let uri: http::Uri = self
            .url
            .parse()
            .map_err(|e| format!("invalid probe url {}: {e}", self.url))?;
        // Plain HTTP only; there is no TLS client here.
        match uri.scheme_str() {
            Some("http") => {}
            Some(scheme) => {
                return Err(format!(
                    "unsupported probe url scheme {scheme} in {}: only http is supported",
                    self.url
                ));
            }
            None => return Err(format!("probe url {} has no scheme", self.url)),
        }
        let authority = uri
            .authority()
            .ok_or_else(|| format!("probe url {} has no host", self.url))?
            .clone();
        let address = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:80", authority.host()),
        };

        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| format!("probe connection to {address} failed: {e}"))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| format!("probe handshake failed: {e}"))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let path = uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let req = http::Request::builder()
            .method("POST")
            .uri(path)
            .header("host", authority.as_str())
            .header("content-type", "application/json")
            .header("user-agent", "jobgrid-admission/0.1")
            .body(Full::new(bytes::Bytes::from(body)))
            .map_err(|e| format!("failed to build probe request: {e}"))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| format!("probe request failed: {e}"))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| format!("failed to read probe response: {e}"))?
            .to_bytes();
        Ok((status, body))
    }
}

#[async_trait]
impl BidProbe for HttpProbe {
    fn name(&self) -> &str {
        "http"
    }

    async fn check(&self, job: &JobSpec) -> ProbeVerdict {
        let body = match serde_json::to_vec(job) {
            Ok(b) => b,
            Err(e) => return ProbeVerdict::Reject(format!("failed to encode job: {e}")),
        };

        let (status, body) = match tokio::time::timeout(self.timeout, self.post(body)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(reason)) => {
                debug!(url = %self.url, %reason, "http probe failed");
                return ProbeVerdict::Reject(reason);
            }
            Err(_) => {
                debug!(url = %self.url, "http probe timed out");
                return ProbeVerdict::Reject(format!("probe {} timed out", self.url));
            }
        };

        if !status.is_success() {
            debug!(url = %self.url, %status, "http probe non-2xx");
            return ProbeVerdict::Reject(format!("probe {} returned {status}", self.url));
        }

        match serde_json::from_slice::<ProbeResponse>(&body) {
            Ok(ProbeResponse {
                should_bid: false,
                reason,
            }) => ProbeVerdict::Reject(
                reason.unwrap_or_else(|| format!("rejected by probe {}", self.url)),
            ),
            _ => ProbeVerdict::Accept,
        }
    }
}

// ── Exec probe ─────────────────────────────────────────────────────

/// Runs a local command with the job JSON on stdin.
///
/// Exit status 0 accepts. Otherwise the trimmed stdout is the rejection
/// reason.
#[derive(Debug, Clone)]
pub struct ExecProbe {
    program: String,
    args: Vec<String>,
}

impl ExecProbe {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Split a whitespace-separated command line. `None` if it is empty.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }
}

#[async_trait]
impl BidProbe for ExecProbe {
    fn name(&self) -> &str {
        "exec"
    }

    async fn check(&self, job: &JobSpec) -> ProbeVerdict {
        let input = match serde_json::to_vec(job) {
            Ok(b) => b,
            Err(e) => return ProbeVerdict::Reject(format!("failed to encode job: {e}")),
        };

        let mut child = match tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                return ProbeVerdict::Reject(format!("probe {} failed to start: {e}", self.program));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            // The command may exit without reading its input.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(program = %self.program, error = %e, "exec probe did not read stdin");
            }
        }

        let output = match child.wait_with_output().await {
            Ok(o) => o,
            Err(e) => return ProbeVerdict::Reject(format!("probe {} failed: {e}", self.program)),
        };

        if output.status.success() {
            return ProbeVerdict::Accept;
        }

        let reason = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if reason.is_empty() {
            ProbeVerdict::Reject(format!("probe {} exited with {}", self.program, output.status))
        } else {
            ProbeVerdict::Reject(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgrid_core::PublisherType;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn job() -> JobSpec {
        let mut job = JobSpec::new(&["echo", "hi"], PublisherType::Noop);
        job.id = "job-probe".to_string();
        job
    }

    /// Serve one canned HTTP response and hand back the request bytes.
    async fn one_shot_server(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "{status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}/bid"), handle)
    }

    #[tokio::test]
    async fn http_probe_accepts_plain_2xx() {
        let (url, server) = one_shot_server("HTTP/1.1 200 OK", "").await;
        let verdict = HttpProbe::new(&url).check(&job()).await;
        assert_eq!(verdict, ProbeVerdict::Accept);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /bid"));
        assert!(request.contains("job-probe"));
    }

    #[tokio::test]
    async fn http_probe_passes_reason_from_body() {
        let (url, _server) = one_shot_server(
            "HTTP/1.1 200 OK",
            r#"{"should_bid": false, "reason": "busy with a batch"}"#,
        )
        .await;
        let verdict = HttpProbe::new(&url).check(&job()).await;
        assert_eq!(verdict, ProbeVerdict::Reject("busy with a batch".to_string()));
    }

    #[tokio::test]
    async fn http_probe_rejects_non_2xx() {
        let (url, _server) = one_shot_server("HTTP/1.1 403 Forbidden", "").await;
        let verdict = HttpProbe::new(&url).check(&job()).await;
        assert!(matches!(verdict, ProbeVerdict::Reject(r) if r.contains("403")));
    }

    #[tokio::test]
    async fn http_probe_rejects_when_unreachable() {
        // Bind and drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let verdict = HttpProbe::new(&format!("http://{addr}/bid"))
            .with_timeout(Duration::from_secs(2))
            .check(&job())
            .await;
        assert!(matches!(verdict, ProbeVerdict::Reject(_)));
    }

    #[tokio::test]
    async fn http_probe_rejects_non_http_schemes() {
        let (url, _server) = one_shot_server("HTTP/1.1 200 OK", "").await;
        let https = url.replacen("http://", "https://", 1);
        let verdict = HttpProbe::new(&https).check(&job()).await;
        assert!(matches!(verdict, ProbeVerdict::Reject(r) if r.contains("unsupported probe url scheme https")));

        let verdict = HttpProbe::new("localhost:9/bid").check(&job()).await;
        assert!(matches!(verdict, ProbeVerdict::Reject(_)));
    }

    #[tokio::test]
    async fn exec_probe_accepts_on_zero_exit() {
        let probe = ExecProbe::new("cat", &[]);
        assert_eq!(probe.check(&job()).await, ProbeVerdict::Accept);
    }

    #[tokio::test]
    async fn exec_probe_rejects_with_stdout() {
        let probe = ExecProbe::new("sh", &["-c", "cat > /dev/null; echo '  not today  '; exit 3"]);
        assert_eq!(
            probe.check(&job()).await,
            ProbeVerdict::Reject("not today".to_string())
        );
    }

    #[tokio::test]
    async fn exec_probe_sees_job_json() {
        let probe = ExecProbe::new("sh", &["-c", "grep -q job-probe"]);
        assert_eq!(probe.check(&job()).await, ProbeVerdict::Accept);
    }

    #[tokio::test]
    async fn exec_probe_missing_program_rejects() {
        let probe = ExecProbe::new("/nonexistent/should-bid", &[]);
        assert!(matches!(probe.check(&job()).await, ProbeVerdict::Reject(_)));
    }

    #[test]
    fn command_line_splits_on_whitespace() {
        let probe = ExecProbe::from_command_line("  /bin/check --strict  -v ").unwrap();
        assert_eq!(probe.program, "/bin/check");
        assert_eq!(probe.args, vec!["--strict", "-v"]);
        assert!(ExecProbe::from_command_line("   ").is_none());
    }
}
