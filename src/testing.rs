//! Shared fixtures for unit tests: a mock server that honours `Range` headers.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-looking payload.
pub fn sample_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Serves `body` for HEAD and ranged GET requests, recording every `Range`
/// header it sees.
pub struct RangeResponder {
    body: Vec<u8>,
    delay: Option<Duration>,
    hits: Arc<Mutex<Vec<String>>>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let template = match range.as_deref().and_then(parse_range) {
            Some((start, end)) if end < self.body.len() as u64 && start <= end => {
                self.hits.lock().unwrap().push(range.clone().unwrap_or_default());
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, end, self.body.len()).as_str(),
                    )
                    .set_body_bytes(self.body[start as usize..=end as usize].to_vec())
            }
            Some(_) => ResponseTemplate::new(416),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        };

        match self.delay {
            Some(d) => template.set_delay(d),
            None => template,
        }
    }
}

fn parse_range(header: &str) -> Option<(u64, u64)> {
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

pub async fn range_server(
    body: Vec<u8>,
    delay: Option<Duration>,
) -> (MockServer, Arc<Mutex<Vec<String>>>) {
    let server = MockServer::start().await;
    let hits = Arc::new(Mutex::new(Vec::new()));

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body, delay, hits: hits.clone() })
        .mount(&server)
        .await;

    (server, hits)
}
