//! SchemeProbe: determines `http` vs `https` for a bare hostname
//! by racing `GET /v2/` on both schemes.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;

const FALLBACK_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, thiserror::Error)]
#[error("scheme probe failed: https={https}, http={http}")]
pub struct ProbeError {
    https: String,
    http: String,
}

/// Skips the network probe for hosts known to be local/private, defaulting
/// to `http`.
pub fn is_local_or_private(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

/// Races `https://{host}/v2/` against `http://{host}/v2/`: `https` starts
/// immediately, `http` starts after [`FALLBACK_DELAY`] unless `https` has
/// already failed, in which case `http` starts immediately. Any response
/// (not just 200) counts as that scheme winning; if both fail, the errors
/// are joined.
pub async fn probe_scheme(client: &Client, host: &str) -> Result<&'static str, ProbeError> {
    if is_local_or_private(host) {
        debug!("probe: {host:?} is local/private, defaulting to http without network I/O");
        return Ok("http");
    }

    let https_url = format!("https://{host}/v2/");
    let http_url = format!("http://{host}/v2/");

    let https_fut = client.get(&https_url).send();
    let http_fut = async {
        tokio::time::sleep(FALLBACK_DELAY).await;
        client.get(&http_url).send().await
    };

    tokio::pin!(https_fut);
    tokio::pin!(http_fut);

    let https_result = tokio::select! {
        biased;
        r = &mut https_fut => Some(r),
        r = &mut http_fut => {
            // http's delayed start raced ahead only if https is genuinely
            // slower; either way this counts as http winning.
            debug!("probe: http://{host} responded first");
            return r.map(|_| "http").map_err(|e| ProbeError { https: "pending".to_string(), http: e.to_string() });
        }
    };

    match https_result {
        Some(Ok(_)) => {
            debug!("probe: https://{host} won the race");
            Ok("https")
        }
        Some(Err(https_err)) => {
            debug!("probe: https://{host} failed ({https_err}), trying http immediately");
            match client.get(&http_url).send().await {
                Ok(_) => Ok("http"),
                Err(http_err) => Err(ProbeError { https: https_err.to_string(), http: http_err.to_string() }),
            }
        }
        None => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_is_local() {
        assert!(is_local_or_private("localhost"));
    }

    #[test]
    fn loopback_v4_is_local() {
        assert!(is_local_or_private("127.0.0.1"));
    }

    #[test]
    fn loopback_v6_is_local() {
        assert!(is_local_or_private("[::1]"));
    }

    #[test]
    fn rfc1918_is_local() {
        assert!(is_local_or_private("10.0.0.5"));
        assert!(is_local_or_private("192.168.1.1"));
        assert!(is_local_or_private("172.16.0.1"));
    }

    #[test]
    fn public_host_is_not_local() {
        assert!(!is_local_or_private("registry-1.docker.io"));
    }

    #[tokio::test]
    async fn private_host_skips_network_and_defaults_to_http() {
        let client = Client::new();
        let scheme = probe_scheme(&client, "localhost:5000").await.unwrap();
        assert_eq!(scheme, "http");
    }
}
