use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::api_method::{log_exchange, ApiMethod};
use crate::error::{ApiMethodError, Result};
use crate::transport::{ExpectedStatus, HttpResponse};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Which attempts of a poll session have their exchange logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStrategy {
    /// Every attempt at info level
    #[default]
    All,
    /// Only the final attempt at info level, intermediate ones at trace
    LastOnly,
    /// Nothing
    None,
}

impl FromStr for LogStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all" => Ok(LogStrategy::All),
            "last_only" | "last" => Ok(LogStrategy::LastOnly),
            "none" => Ok(LogStrategy::None),
            other => Err(format!("Unknown log strategy: {}", other)),
        }
    }
}

pub type ResponsePredicate = Box<dyn Fn(&HttpResponse) -> bool + Send + Sync>;
pub type AfterExecute = Box<dyn FnMut(&HttpResponse) + Send>;

/// Configuration of one poll session
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
    /// Success condition; defaults to a 2xx status
    pub predicate: ResponsePredicate,
    /// Runs after every attempt, whatever the predicate says
    pub after_execute: Option<AfterExecute>,
    pub log_strategy: LogStrategy,
}

impl Default for PollSpec {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            predicate: Box::new(HttpResponse::is_success),
            after_execute: None,
            log_strategy: LogStrategy::default(),
        }
    }
}

impl std::fmt::Debug for PollSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSpec")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("after_execute", &self.after_execute.is_some())
            .field("log_strategy", &self.log_strategy)
            .finish()
    }
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            ..Self::default()
        }
    }

    /// Succeed once the response status matches `status`
    pub fn until_status(mut self, status: ExpectedStatus) -> Self {
        self.predicate = Box::new(move |response: &HttpResponse| status.matches(response.status_code));
        self
    }
}

/// Call `method` every `spec.interval` until the predicate holds or `spec.timeout` passes.
///
/// Only a false predicate is retried. Any error from the call itself ends the session.
/// No attempt is started once the next one would begin past the deadline.
pub async fn poll(method: &mut ApiMethod, mut spec: PollSpec) -> Result<HttpResponse> {
    let started = Instant::now();
    let deadline = started + spec.timeout;
    let mut attempts: u32 = 0;

    log::debug!(
        "Polling {} every {:?} for up to {:?}",
        method.name(),
        spec.interval,
        spec.timeout
    );

    loop {
        attempts += 1;
        let (request, response) = method.exchange().await?;

        if let Some(after_execute) = spec.after_execute.as_mut() {
            after_execute(&response);
        }

        let satisfied = (spec.predicate)(&response);
        let now = Instant::now();
        let out_of_time = now + spec.interval > deadline;

        match spec.log_strategy {
            LogStrategy::All => log_exchange(log::Level::Info, &request, &response),
            LogStrategy::LastOnly if satisfied || out_of_time => log_exchange(log::Level::Info, &request, &response),
            LogStrategy::LastOnly => log_exchange(log::Level::Trace, &request, &response),
            LogStrategy::None => {}
        }

        if satisfied {
            log::debug!("{} satisfied after {} attempt(s)", method.name(), attempts);
            return Ok(response);
        }

        if out_of_time {
            let elapsed = now - started;
            log::warn!(
                "{} not satisfied after {} attempt(s) in {:?}",
                method.name(),
                attempts,
                elapsed
            );
            return Err(ApiMethodError::PollTimeout {
                attempts,
                elapsed,
                last_response: Some(Box::new(response)),
            });
        }

        log::trace!("Attempt {} not satisfied, retrying in {:?}", attempts, spec.interval);
        sleep(spec.interval).await;
    }
}

/// Fluent wrapper over [`poll`] for one method; nothing is sent before `execute`
pub struct MethodPoller<'a> {
    method: &'a mut ApiMethod,
    spec: PollSpec,
}

impl<'a> MethodPoller<'a> {
    pub fn new(method: &'a mut ApiMethod) -> Self {
        Self {
            method,
            spec: PollSpec::default(),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.spec.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = timeout;
        self
    }

    pub fn until<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&HttpResponse) -> bool + Send + Sync + 'static,
    {
        self.spec.predicate = Box::new(predicate);
        self
    }

    pub fn until_status(mut self, status: ExpectedStatus) -> Self {
        self.spec = self.spec.until_status(status);
        self
    }

    pub fn after_execute<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&HttpResponse) + Send + 'static,
    {
        self.spec.after_execute = Some(Box::new(callback));
        self
    }

    pub fn log_strategy(mut self, strategy: LogStrategy) -> Self {
        self.spec.log_strategy = strategy;
        self
    }

    pub fn spec(&self) -> &PollSpec {
        &self.spec
    }

    pub async fn execute(self) -> Result<HttpResponse> {
        poll(self.method, self.spec).await
    }
}
