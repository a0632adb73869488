//! In-memory transport fake (testing only)
//!
//! `ScriptedTransport` replays queued responses in order and records every
//! request it receives.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::Result;

/// Transport that answers from a queue of scripted outcomes.
///
/// Once the queue is drained every request gets a `500`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<std::result::Result<HttpResponse, String>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn push_response(&self, status: u16, reason: &str, body: impl Into<String>) -> &Self {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Ok(HttpResponse::new(status, reason, body)));
        self
    }

    /// Queue a `200 OK` with a JSON body.
    pub fn push_json(&self, body: serde_json::Value) -> &Self {
        self.push_response(200, "OK", body.to_string())
    }

    /// Queue a transport failure.
    pub fn push_error(&self, message: &str) -> &Self {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests received with the given method.
    pub fn requests_with(&self, method: Method) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(RemoteError::Http(message)),
            None => Ok(HttpResponse::new(500, "Internal Server Error", "unscripted request")),
        }
    }
}
