use crate::utils::error::{FinderError, Result};
use crate::utils::logger::ERRORS_TARGET;
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const ROOT_SERVER: &str = "whois.iana.org:43";
pub const MAX_REFERRALS: usize = 4;

const REFERRAL_KEYS: [&str; 3] = ["refer", "whois", "referralserver"];

/// Port-43 whois client that follows registry referrals.
#[derive(Debug, Clone)]
pub struct WhoisClient {
    root: String,
    timeout: Duration,
}

impl WhoisClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_root(ROOT_SERVER, timeout)
    }

    pub fn with_root(root: impl Into<String>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
        }
    }

    /// Queries the root server and every server it refers to, returning all
    /// answers concatenated. Only a failure of the first server is an error.
    pub async fn lookup(&self, query: &str) -> Result<String> {
        let mut server = self.root.clone();
        let mut visited = HashSet::new();
        let mut answers: Vec<String> = Vec::new();

        for _ in 0..=MAX_REFERRALS {
            if !visited.insert(server.clone()) {
                break;
            }

            let answer = match self.query(&server, query).await {
                Ok(answer) => answer,
                Err(e) if !answers.is_empty() => {
                    tracing::warn!(target: ERRORS_TARGET, "Referral to {} failed: {}", server, e);
                    break;
                }
                Err(e) => return Err(e),
            };

            let next = find_referral(&answer);
            answers.push(answer);
            match next {
                Some(next) => {
                    tracing::debug!("whois referral {} -> {}", server, next);
                    server = next;
                }
                None => break,
            }
        }

        Ok(answers.join("\n"))
    }

    async fn query(&self, server: &str, query: &str) -> Result<String> {
        let exchange = async {
            let mut stream = TcpStream::connect(server).await?;
            stream.write_all(format!("{}\r\n", query).as_bytes()).await?;

            let mut answer = Vec::new();
            stream.read_to_end(&mut answer).await?;
            Ok::<_, std::io::Error>(answer)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(answer)) => Ok(String::from_utf8_lossy(&answer).into_owned()),
            Ok(Err(e)) => Err(FinderError::WhoisError {
                server: server.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(FinderError::WhoisError {
                server: server.to_string(),
                message: format!("no answer within {}s", self.timeout.as_secs()),
            }),
        }
    }
}

/// The `host:port` a whois answer points to, if any.
pub fn find_referral(answer: &str) -> Option<String> {
    answer.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if !REFERRAL_KEYS.contains(&key.trim().to_ascii_lowercase().as_str()) {
            return None;
        }

        let value = value.trim();
        if value.starts_with("rwhois://") || value.starts_with("http") {
            return None;
        }
        let host = value.trim_start_matches("whois://").trim_end_matches('/');
        if host.is_empty() {
            return None;
        }

        let has_port = host
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        Some(if has_port {
            host.to_string()
        } else {
            format!("{}:43", host)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve_once(answer: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(answer.as_bytes()).await.unwrap();
        });

        addr
    }

    #[test]
    fn test_find_referral_variants() {
        assert_eq!(
            find_referral("% IANA WHOIS server\nrefer:        whois.ripe.net\n"),
            Some("whois.ripe.net:43".to_string())
        );
        assert_eq!(
            find_referral("ReferralServer:  whois://whois.apnic.net"),
            Some("whois.apnic.net:43".to_string())
        );
        assert_eq!(
            find_referral("whois: 127.0.0.1:4343"),
            Some("127.0.0.1:4343".to_string())
        );
        assert_eq!(find_referral("ReferralServer: rwhois://rwhois.example.net:4321"), None);
        assert_eq!(find_referral("inetnum: 192.0.2.0 - 192.0.2.255"), None);
    }

    #[tokio::test]
    async fn test_lookup_follows_referral() {
        let registry = serve_once(
            "inetnum: 192.0.2.0 - 192.0.2.255\ngeofeed: https://example.net/geofeed.csv\n"
                .to_string(),
        )
        .await;
        let root = serve_once(format!("refer: {}\n", registry)).await;

        let client = WhoisClient::with_root(root, Duration::from_secs(5));
        let answer = client.lookup("192.0.2.1").await.unwrap();

        assert!(answer.contains("refer:"));
        assert!(answer.contains("geofeed: https://example.net/geofeed.csv"));
    }

    #[tokio::test]
    async fn test_prefix_query_is_sent_verbatim() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (sent, received) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = sent.send(String::from_utf8_lossy(&buf[..n]).into_owned());
            socket
                .write_all(b"inet6num: 2001:db8::/32\n")
                .await
                .unwrap();
        });

        let client = WhoisClient::with_root(addr, Duration::from_secs(5));
        let answer = client.lookup("2001:db8::/48").await.unwrap();

        assert_eq!(received.await.unwrap(), "2001:db8::/48\r\n");
        assert!(answer.contains("inet6num: 2001:db8::/32"));
    }

    #[tokio::test]
    async fn test_failed_referral_keeps_earlier_answers() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_addr = closed.local_addr().unwrap().to_string();
        drop(closed);

        let root = serve_once(format!(
            "inetnum: 192.0.2.0 - 192.0.2.255\nrefer: {}\n",
            closed_addr
        ))
        .await;

        let client = WhoisClient::with_root(root, Duration::from_secs(2));
        let answer = client.lookup("192.0.2.1").await.unwrap();
        assert!(answer.contains("inetnum: 192.0.2.0 - 192.0.2.255"));
    }

    #[tokio::test]
    async fn test_unreachable_root_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = WhoisClient::with_root(addr, Duration::from_secs(2));
        let err = client.lookup("192.0.2.1").await.unwrap_err();
        assert!(matches!(err, FinderError::WhoisError { .. }));
    }
}
