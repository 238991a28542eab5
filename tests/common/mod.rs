#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub fn sample_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

/// Ranged GET responder that keeps every `Range` header it served.
struct Ranges {
    body: Vec<u8>,
    delay: Option<Duration>,
    seen: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Respond for Ranges {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(s, e)| Some((s.parse::<u64>().ok()?, e.parse::<u64>().ok()?)));

        let Some((start, end)) = range else {
            return ResponseTemplate::new(400);
        };
        self.seen.lock().unwrap().push((start, end));

        let template = ResponseTemplate::new(206)
            .insert_header("content-range", format!("bytes {}-{}/{}", start, end, self.body.len()).as_str())
            .set_body_bytes(self.body[start as usize..=end as usize].to_vec());
        match self.delay {
            Some(d) => template.set_delay(d),
            None => template,
        }
    }
}

pub struct TestServer {
    pub server: MockServer,
    pub seen: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl TestServer {
    pub async fn start(body: Vec<u8>, delay: Option<Duration>) -> Self {
        let server = MockServer::start().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(Ranges { body, delay, seen: seen.clone() })
            .mount(&server)
            .await;
        Self { server, seen }
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/{}", self.server.uri(), name)
    }

    pub fn requested(&self) -> Vec<(u64, u64)> {
        self.seen.lock().unwrap().clone()
    }
}
