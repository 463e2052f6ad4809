//! Amazon CloudWatch observer.
//!
//! Every outcome becomes one `PutMetricData` call on the query API:
//!
//! | metric           | unit         | sent on |
//! |------------------|--------------|---------|
//! | `ReceiveSuccess` | Count        | success |
//! | `ReceiveLatency` | Milliseconds | success |
//! | `ReceiveError`   | Count        | error   |
//!
//! Calls are synchronous with a short timeout. A failed call is logged and
//! never affects the transmission it reports on.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, error};

use super::Observer;
use crate::aws::{self, CanonicalRequest, Credentials};
use crate::config::CloudWatchConfig;
use crate::error::{InboundError, Result};

const API_VERSION: &str = "2010-08-01";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One value of one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Datum {
    name: &'static str,
    unit: &'static str,
    value: f64,
}

pub struct CloudWatchObserver {
    agent: ureq::Agent,
    credentials: Credentials,
    region: String,
    url: String,
    host: String,
    namespace: String,
    dimensions: BTreeMap<String, String>,
}

impl CloudWatchObserver {
    pub fn new(config: &CloudWatchConfig, credentials: Credentials) -> Result<Self> {
        if config.namespace.trim().is_empty() {
            return Err(InboundError::Config("CloudWatch namespace is empty".into()));
        }

        let base = match config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://monitoring.{}.amazonaws.com", config.region),
        };
        let (_, host) = aws::split_scheme(&base)?;
        let host = host.to_string();

        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            credentials,
            region: config.region.clone(),
            url: format!("{base}/"),
            host,
            namespace: config.namespace.clone(),
            dimensions: config.dimensions.clone(),
        })
    }

    /// Form-encoded `PutMetricData` parameters.
    fn request_body(&self, data: &[Datum], now: DateTime<Utc>) -> String {
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut params = vec![
            ("Action".to_string(), "PutMetricData".to_string()),
            ("Version".to_string(), API_VERSION.to_string()),
            ("Namespace".to_string(), self.namespace.clone()),
        ];
        for (i, datum) in data.iter().enumerate() {
            let member = format!("MetricData.member.{}", i + 1);
            params.push((format!("{member}.MetricName"), datum.name.to_string()));
            params.push((format!("{member}.Timestamp"), timestamp.clone()));
            params.push((format!("{member}.Unit"), datum.unit.to_string()));
            params.push((format!("{member}.Value"), datum.value.to_string()));
            for (j, (name, value)) in self.dimensions.iter().enumerate() {
                let dimension = format!("{member}.Dimensions.member.{}", j + 1);
                params.push((format!("{dimension}.Name"), name.clone()));
                params.push((format!("{dimension}.Value"), value.clone()));
            }
        }

        params
            .iter()
            .map(|(key, value)| {
                format!("{}={}", aws::uri_encode(key, true), aws::uri_encode(value, true))
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    fn put_metric_data(&self, data: &[Datum]) -> Result<()> {
        let now = Utc::now();
        let body = self.request_body(data, now);
        let payload_hash = aws::payload_hash(body.as_bytes());

        let mut headers = vec![
            ("content-type", FORM_CONTENT_TYPE.to_string()),
            ("host", self.host.clone()),
            ("x-amz-date", aws::amz_date(now)),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token", token.clone()));
        }
        let request = CanonicalRequest {
            method: "POST",
            uri: "/",
            headers: &headers,
            payload_hash: &payload_hash,
        };
        let authorization =
            aws::sign_request(&self.credentials, &self.region, "monitoring", &request, now)?;

        let mut call = self.agent.post(&self.url).set("Authorization", &authorization);
        for (name, value) in &headers {
            if *name != "host" {
                call = call.set(name, value);
            }
        }
        call.send_string(&body)
            .map_err(|e| InboundError::Sink(format!("PutMetricData failed: {e}")))?;
        debug!(namespace = %self.namespace, metrics = data.len(), "Sent CloudWatch metrics");
        Ok(())
    }
}

impl Observer for CloudWatchObserver {
    fn on_receive_success(&self, elapsed: Duration) {
        let data = [
            Datum {
                name: "ReceiveSuccess",
                unit: "Count",
                value: 1.0,
            },
            Datum {
                name: "ReceiveLatency",
                unit: "Milliseconds",
                value: elapsed.as_millis() as f64,
            },
        ];
        if let Err(e) = self.put_metric_data(&data) {
            error!(error = %e, "Failed to send CloudWatch metric for ReceiveSuccess");
        }
    }

    fn on_receive_error(&self) {
        let data = [Datum {
            name: "ReceiveError",
            unit: "Count",
            value: 1.0,
        }];
        if let Err(e) = self.put_metric_data(&data) {
            error!(error = %e, "Failed to send CloudWatch metric for ReceiveError");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: Some("token".into()),
        }
    }

    fn config(endpoint: Option<String>) -> CloudWatchConfig {
        CloudWatchConfig {
            namespace: "Inbound/Mail".into(),
            region: "eu-north-1".into(),
            endpoint,
            dimensions: BTreeMap::from([
                ("Environment".to_string(), "test".to_string()),
                ("Service".to_string(), "inbound".to_string()),
            ]),
        }
    }

    #[test]
    fn test_default_endpoint_follows_region() {
        let observer = CloudWatchObserver::new(&config(None), credentials()).unwrap();
        assert_eq!(observer.url, "https://monitoring.eu-north-1.amazonaws.com/");
        assert_eq!(observer.host, "monitoring.eu-north-1.amazonaws.com");
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let mut cfg = config(None);
        cfg.namespace = " ".into();
        assert!(matches!(
            CloudWatchObserver::new(&cfg, credentials()),
            Err(InboundError::Config(_))
        ));
    }

    #[test]
    fn test_request_body_lists_metrics_with_dimensions() {
        let observer = CloudWatchObserver::new(&config(None), credentials()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let body = observer.request_body(
            &[
                Datum {
                    name: "ReceiveSuccess",
                    unit: "Count",
                    value: 1.0,
                },
                Datum {
                    name: "ReceiveLatency",
                    unit: "Milliseconds",
                    value: 42.0,
                },
            ],
            now,
        );
        let params: Vec<&str> = body.split('&').collect();

        assert_eq!(&params[..3], &[
            "Action=PutMetricData",
            "Version=2010-08-01",
            "Namespace=Inbound%2FMail",
        ]);
        assert!(params.contains(&"MetricData.member.1.MetricName=ReceiveSuccess"));
        assert!(params.contains(&"MetricData.member.1.Unit=Count"));
        assert!(params.contains(&"MetricData.member.1.Value=1"));
        assert!(params.contains(&"MetricData.member.1.Timestamp=2024-03-01T12%3A00%3A00Z"));
        assert!(params.contains(&"MetricData.member.2.MetricName=ReceiveLatency"));
        assert!(params.contains(&"MetricData.member.2.Unit=Milliseconds"));
        assert!(params.contains(&"MetricData.member.2.Value=42"));
        assert!(params.contains(&"MetricData.member.2.Dimensions.member.1.Name=Environment"));
        assert!(params.contains(&"MetricData.member.2.Dimensions.member.2.Value=inbound"));
    }

    /// Accept one HTTP request, answer 200 and return its head and body.
    fn capture_one(listener: TcpListener) -> (String, String) {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut head = String::new();
        let mut length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().unwrap();
                }
            }
            if line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).unwrap();
        let mut writer = stream;
        writer
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .unwrap();
        (head, String::from_utf8(body).unwrap())
    }

    #[test]
    fn test_success_posts_signed_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let server = std::thread::spawn(move || capture_one(listener));

        let observer = CloudWatchObserver::new(&config(Some(endpoint)), credentials()).unwrap();
        observer.on_receive_success(Duration::from_millis(250));

        let (head, body) = server.join().unwrap();
        let head = head.to_ascii_lowercase();
        assert!(head.starts_with("post / http/1.1"));
        assert!(head.contains("/eu-north-1/monitoring/aws4_request"));
        assert!(head.contains("signedheaders=content-type;host;x-amz-date;x-amz-security-token"));
        assert!(head.contains("x-amz-security-token: token"));
        assert!(body.contains("MetricName=ReceiveSuccess"));
        assert!(body.contains("MetricData.member.2.Value=250"));
    }

    #[test]
    fn test_failed_call_is_only_logged() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let observer = CloudWatchObserver::new(&config(Some(endpoint)), credentials()).unwrap();
        observer.on_receive_error();
    }
}
