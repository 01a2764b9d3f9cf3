//! Mock transport for testing — returns preconfigured responses.

use super::{FetchResponse, Transport, TransportError};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Canned responses keyed by URL, with a log of every request made.
///
/// A URL can be given a queue of responses (`with_sequence`); each fetch pops
/// the next one and the last entry repeats once the queue is down to one.
/// Unknown URLs answer 404 with a null body.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<FetchResponse, String>>>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with a 200 and the given JSON body.
    pub fn with_json(self, url: impl Into<String>, body: Value) -> Self {
        self.with_response(url, FetchResponse::new(200, body))
    }

    /// Answer `url` with a bare status code.
    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.with_response(url, FetchResponse::new(status, Value::Null))
    }

    pub fn with_response(self, url: impl Into<String>, response: FetchResponse) -> Self {
        self.with_sequence(url, vec![response])
    }

    /// Answer successive fetches of `url` with `responses` in order.
    pub fn with_sequence(self, url: impl Into<String>, responses: Vec<FetchResponse>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.into(), responses.into_iter().map(Ok).collect());
        self
    }

    /// Fail every fetch of `url` below the HTTP layer.
    pub fn with_failure(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.into(), VecDeque::from([Err(message.into())]));
        self
    }

    /// Every URL fetched so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// How many times `url` was fetched.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

impl Transport for MockTransport {
    fn fetch_json(&self, url: &str) -> Result<FetchResponse, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());

        let mut responses = self.responses.lock().unwrap();
        let Some(queue) = responses.get_mut(url) else {
            return Ok(FetchResponse::new(404, Value::Null));
        };

        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::Request {
                url: url.to_string(),
                message,
            }),
            None => Ok(FetchResponse::new(404, Value::Null)),
        }
    }
}
