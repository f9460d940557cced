//! Scripted transport and envelope helpers shared by the integration
//! tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fetchbox::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use fetchbox_core::{now_ms, CacheEntry, Payload};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

/// One scripted exchange.
#[derive(Clone, Debug)]
pub struct Scripted {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Scripted {
    pub fn json(status: u16, body: &str) -> Self {
        Scripted {
            status,
            headers: vec![("content-type", "application/json".to_owned())],
            body: body.to_owned(),
        }
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_owned()));
        self
    }

    pub fn empty(status: u16) -> Self {
        Scripted {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MockInner {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<(String, HeaderMap)>>,
    delay: Option<Duration>,
}

/// A transport that replays a script and records every request it sees.
/// Running out of script is an error, so tests prove exactly how many
/// exchanges happened.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        MockTransport {
            inner: Arc::new(MockInner {
                delay: Some(delay),
                ..MockInner::default()
            }),
        }
    }

    pub fn script(&self, response: Scripted) {
        self.inner.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.inner.requests.lock().unwrap().len()
    }

    pub fn request_headers(&self, index: usize) -> HeaderMap {
        self.inner.requests.lock().unwrap()[index].1.clone()
    }

    pub fn request_url(&self, index: usize) -> String {
        self.inner.requests.lock().unwrap()[index].0.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        if let Some(signal) = &request.signal {
            if signal.is_aborted() {
                return Err(TransportError::Aborted);
            }
        }
        self.inner
            .requests
            .lock()
            .unwrap()
            .push((request.url.to_string(), request.headers.clone()));

        if let Some(delay) = self.inner.delay {
            match &request.signal {
                Some(signal) => {
                    tokio::select! {
                        _ = signal.aborted() => return Err(TransportError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }

        let scripted = self
            .inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Network("transport script exhausted".to_owned()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &scripted.headers {
            headers.append(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        Ok(TransportResponse {
            status: StatusCode::from_u16(scripted.status).unwrap(),
            headers,
            body: scripted.body,
        })
    }
}

/// Builds response headers from static pairs.
pub fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.append(
            name.parse::<HeaderName>().unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    map
}

/// Builds an envelope as if the response had been received `age_secs` ago.
pub fn aged_entry(
    value: Payload,
    response_headers: &HeaderMap,
    age_secs: i64,
) -> CacheEntry {
    CacheEntry::from_response(value, response_headers, 200, now_ms() - age_secs * 1000)
}
