//! In-memory inference services for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::prompt::{AI_PROMPT, HUMAN_PROMPT};
use crate::service::{InferenceService, InvokeRequest, InvokeResponse, ServiceError};

/// Replays a fixed script of results, then answers `response N`.
pub(crate) struct ScriptedService {
    script: Mutex<VecDeque<Result<InvokeResponse, ServiceError>>>,
    requests: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedService {
    pub(crate) fn new(script: Vec<Result<InvokeResponse, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceService for ScriptedService {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, ServiceError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(InvokeResponse::completion(format!("response {call}"))))
    }
}

/// Answers with the latest human instruction in brackets, after an optional delay.
#[derive(Default)]
pub(crate) struct EchoService {
    pub(crate) delay: Duration,
}

impl EchoService {
    pub(crate) fn instruction(prompt: &str) -> &str {
        let start = prompt.rfind(HUMAN_PROMPT).map_or(0, |i| i + HUMAN_PROMPT.len());
        let tail = &prompt[start..];
        tail.strip_suffix(AI_PROMPT).unwrap_or(tail)
    }
}

#[async_trait]
impl InferenceService for EchoService {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, ServiceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let instruction = Self::instruction(&request.body.prompt);
        Ok(InvokeResponse::completion(format!("[{instruction}]")))
    }
}
