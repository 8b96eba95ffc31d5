//! The dispatcher: ordered rules, the current state token and the call log.

use crate::config::{DispatcherSettings, DoubleConfig};
use crate::error::DispatchError;
use crate::matcher::MatchOutcome;
use crate::request::Request;
use crate::rule::{ResponseBody, Rule};
use crate::template::TemplateEngine;
use parking_lot::{Mutex, RwLock};
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State token the dispatcher starts in, and returns to on [`Dispatcher::clear`].
pub const INITIAL_STATE: &str = "INITIAL_STATE";

/// A synthesized response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// One dispatched request.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: Request,
    /// `None` when no rule matched, the rule injected a fault, or the
    /// response was not generated yet.
    pub response: Option<Response>,
    /// State token at dispatch time.
    pub state: String,
    /// Label of the matched rule.
    pub rule: Option<String>,
}

/// Request counters since construction or the last [`Dispatcher::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub total: u64,
    pub matched: u64,
    pub unmatched: u64,
}

struct Session {
    state: String,
    calls: Vec<RecordedCall>,
    no_match_status: u16,
    /// Bumped by `clear()` so in-flight dispatches never touch a fresh log.
    generation: u64,
}

/// Programmable HTTP double.
///
/// Rules are evaluated in registration order and the first match wins.
/// Every dispatch is recorded exactly once, in dispatch order.
pub struct Dispatcher {
    settings: DispatcherSettings,
    rules: RwLock<Vec<Arc<Rule>>>,
    session: Mutex<Session>,
    template_engine: TemplateEngine,
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_unmatched: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_settings(DispatcherSettings::default())
    }

    pub fn with_settings(settings: DispatcherSettings) -> Self {
        info!(
            initial_state = %settings.initial_state,
            no_match_status = settings.no_match_status,
            "HTTP double initialized"
        );

        let session = Session {
            state: settings.initial_state.clone(),
            calls: Vec::new(),
            no_match_status: settings.no_match_status,
            generation: 0,
        };

        Self {
            settings,
            rules: RwLock::new(Vec::new()),
            session: Mutex::new(session),
            template_engine: TemplateEngine::new(),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        }
    }

    /// Build a dispatcher with the rules of a loaded configuration.
    pub fn from_config(config: DoubleConfig) -> anyhow::Result<Self> {
        let settings = config.settings.clone();
        let rules = config.into_rules()?;
        let dispatcher = Self::with_settings(settings);
        for rule in rules {
            dispatcher.register(rule);
        }
        info!(rules = dispatcher.rules_len(), "Rules loaded from configuration");
        Ok(dispatcher)
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Append a rule. Earlier rules take precedence.
    pub fn register(&self, rule: impl Into<Rule>) {
        let rule = rule.into();
        debug!(rule = %rule.label(), "Registering rule");
        self.rules.write().push(Arc::new(rule));
    }

    pub fn rules_len(&self) -> usize {
        self.rules.read().len()
    }

    /// Current state token.
    pub fn state(&self) -> String {
        self.session.lock().state.clone()
    }

    /// Status used for the no-match diagnostic response, until the next `clear()`.
    pub fn set_no_match_status(&self, status: u16) {
        self.session.lock().no_match_status = status;
    }

    /// Snapshot of the call log, in dispatch order.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.session.lock().calls.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            total: self.requests_total.load(Ordering::Relaxed),
            matched: self.requests_matched.load(Ordering::Relaxed),
            unmatched: self.requests_unmatched.load(Ordering::Relaxed),
        }
    }

    /// Reset rules, state, call log, no-match status and counters.
    pub fn clear(&self) {
        let mut rules = self.rules.write();
        let mut session = self.session.lock();
        rules.clear();
        session.state = self.settings.initial_state.clone();
        session.calls.clear();
        session.no_match_status = self.settings.no_match_status;
        session.generation += 1;
        self.requests_total.store(0, Ordering::Relaxed);
        self.requests_matched.store(0, Ordering::Relaxed);
        self.requests_unmatched.store(0, Ordering::Relaxed);
        debug!("HTTP double cleared");
    }

    /// Evaluate `request` against the rules and produce the first match's response.
    ///
    /// Without a match, the response carries the no-match status and a
    /// plain-text report with one line per rule. A rule's fault is returned
    /// as [`DispatchError::Fault`]. The call is recorded in every case.
    pub fn dispatch(&self, request: Request) -> Result<Response, DispatchError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        // Patterns run with no lock held so custom predicates may read the
        // double. The outcome only applies if the state it saw is still current.
        let (rule, state, index, generation) = loop {
            let rules = self.rules.read().clone();
            let (state, generation) = {
                let session = self.session.lock();
                (session.state.clone(), session.generation)
            };
            let winner = find_winner(&rules, &request, &state);

            let mut session = self.session.lock();
            if session.state != state || session.generation != generation {
                debug!(state = %state, "State changed during rule evaluation, retrying");
                continue;
            }

            let rule = match winner {
                Ok(rule) => rule,
                Err(mismatches) => {
                    self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                    let response = no_match_response(session.no_match_status, &mismatches);
                    session.calls.push(RecordedCall {
                        request: request.clone(),
                        response: None,
                        state: state.clone(),
                        rule: None,
                    });
                    drop(session);

                    if self.settings.log_unmatched {
                        warn!(
                            method = %request.method,
                            path = %request.path,
                            state = %state,
                            rules = mismatches.len(),
                            "No rule matched request"
                        );
                        for (label, reason) in &mismatches {
                            debug!(rule = %label, reason = %reason, "Rule mismatch");
                        }
                    }
                    return Ok(response);
                }
            };

            self.requests_matched.fetch_add(1, Ordering::Relaxed);
            if let Some(next) = &rule.response().next_state {
                debug!(from = %state, to = %next, "State transition");
                session.state = next.clone();
            }
            let index = session.calls.len();
            session.calls.push(RecordedCall {
                request: request.clone(),
                response: None,
                state: state.clone(),
                rule: Some(rule.label()),
            });
            break (rule, state, index, generation);
        };
        let template = rule.response();

        if self.settings.log_matches {
            info!(
                rule = %rule.label(),
                method = %request.method,
                path = %request.path,
                state = %state,
                "Request matched rule"
            );
        }

        if let Some(fault) = &template.fault {
            debug!(rule = %rule.label(), fault = %fault, "Injecting fault");
            return Err(DispatchError::Fault(fault.clone()));
        }

        let response = self.build_response(&rule, &request, &state)?;

        let mut session = self.session.lock();
        if session.generation == generation {
            if let Some(call) = session.calls.get_mut(index) {
                call.response = Some(response.clone());
            }
        }
        Ok(response)
    }

    /// Build the response for a matched rule.
    fn build_response(
        &self,
        rule: &Rule,
        request: &Request,
        state: &str,
    ) -> Result<Response, DispatchError> {
        let template = rule.response();
        let body_error = |message: String| DispatchError::BodyGeneration {
            rule: rule.label(),
            message,
        };

        let body = match &template.body {
            ResponseBody::Empty => Vec::new(),
            ResponseBody::Bytes(bytes) => bytes.clone(),
            ResponseBody::Json(value) => value.to_string().into_bytes(),
            ResponseBody::Template(text) => self
                .template_engine
                .render(text, request, state)
                .map_err(|e| body_error(e.to_string()))?
                .into_bytes(),
            ResponseBody::JsonTemplate(value) => self
                .template_engine
                .render_json(value, request, state)
                .map_err(|e| body_error(e.to_string()))?
                .to_string()
                .into_bytes(),
            ResponseBody::Generator(generate) => generate(request),
        };

        let content_type = template
            .content_type
            .clone()
            .or_else(|| template.body.content_type().map(String::from))
            .unwrap_or_else(|| self.settings.default_content_type.clone());

        let mut headers = vec![("Content-Type".to_string(), content_type)];
        headers.extend(
            template
                .headers
                .iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type"))
                .cloned(),
        );

        Ok(Response {
            status: template.status,
            headers,
            body,
        })
    }
}

/// First rule matching `request`, or every rule's mismatch reason.
fn find_winner(
    rules: &[Arc<Rule>],
    request: &Request,
    state: &str,
) -> Result<Arc<Rule>, Vec<(String, String)>> {
    let mut mismatches = Vec::with_capacity(rules.len());
    for rule in rules {
        match rule.pattern().evaluate(request, state) {
            MatchOutcome::Match => return Ok(Arc::clone(rule)),
            MatchOutcome::Mismatch { reason } => mismatches.push((rule.label(), reason)),
        }
    }
    Err(mismatches)
}

/// Diagnostic response listing why each rule rejected the request.
fn no_match_response(status: u16, mismatches: &[(String, String)]) -> Response {
    let mut body = String::from("No matching handler found");
    for (i, (label, reason)) in mismatches.iter().enumerate() {
        body.push_str(&format!("\n{}. {} -> {}", i + 1, label, reason));
    }
    Response {
        status,
        headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
        body: body.into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentMatcher;
    use crate::error::Fault;
    use crate::matcher::RequestPattern;
    use crate::rule::ResponseTemplate;
    use crate::value::ValueMatcher;
    use serde_json::json;
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_first_registered_rule_wins() {
        let double = Dispatcher::new();
        double.register(Rule::get("/api/data").respond(ResponseTemplate::ok().text("first")));
        double.register(Rule::get("/api/data").respond(ResponseTemplate::ok().text("second")));

        for _ in 0..3 {
            let response = double.dispatch(Request::get("/api/data")).unwrap();
            assert_eq!(response.text(), "first");
        }
    }

    #[test]
    fn test_response_defaults() {
        let double = Dispatcher::new();
        double.register(Rule::get("/empty").respond(ResponseTemplate::ok()));

        let response = double.dispatch(Request::get("/empty")).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some("application/json"));
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_response_headers_and_content_type() {
        let double = Dispatcher::new();
        double.register(
            Rule::post("/api/users").respond(
                ResponseTemplate::new(201)
                    .content_type("text/plain")
                    .header("X-Request-Id", "abc")
                    .header("content-type", "ignored/override")
                    .text("created"),
            ),
        );

        let response = double.dispatch(Request::post("/api/users")).unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.header("x-request-id"), Some("abc"));
        assert_eq!(response.headers.len(), 2);
    }

    #[test]
    fn test_stateful_login_flow() {
        let double = Dispatcher::new();
        double.register(
            Rule::post("/login")
                .state(INITIAL_STATE)
                .respond(ResponseTemplate::ok().text("welcome").next_state("LOGGED_IN")),
        );
        double.register(
            Rule::get("/profile")
                .state("LOGGED_IN")
                .respond(ResponseTemplate::ok().json(json!({"name": "John"}))),
        );
        double.register(
            Rule::post("/logout")
                .state("LOGGED_IN")
                .respond(ResponseTemplate::ok().next_state(INITIAL_STATE)),
        );

        assert_eq!(double.state(), INITIAL_STATE);
        assert_eq!(double.dispatch(Request::get("/profile")).unwrap().status, 404);

        assert_eq!(double.dispatch(Request::post("/login")).unwrap().text(), "welcome");
        assert_eq!(double.state(), "LOGGED_IN");

        assert_eq!(double.dispatch(Request::get("/profile")).unwrap().status, 200);
        assert_eq!(double.dispatch(Request::post("/login")).unwrap().status, 404);

        double.dispatch(Request::post("/logout")).unwrap();
        assert_eq!(double.state(), INITIAL_STATE);
        assert_eq!(double.dispatch(Request::get("/profile")).unwrap().status, 404);
    }

    #[test]
    fn test_no_match_diagnostic() {
        let double = Dispatcher::new();
        double.register(Rule::get("/api/users").respond(ResponseTemplate::ok()));
        double.register(Rule::post("/api/posts").respond(ResponseTemplate::new(201)));

        let response = double.dispatch(Request::get("/api/posts")).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.content_type(), Some("text/plain"));

        let body = response.text();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "No matching handler found");
        assert!(lines[1].starts_with("1. [GET /api/users] -> Path mismatch"));
        assert!(lines[2].starts_with("2. [POST /api/posts] -> Method mismatch"));

        let calls = double.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].response.is_none());
        assert!(calls[0].rule.is_none());
    }

    #[test]
    fn test_no_match_without_rules() {
        let double = Dispatcher::new();
        let response = double.dispatch(Request::get("/")).unwrap();
        assert_eq!(response.text(), "No matching handler found");
    }

    #[test]
    fn test_custom_no_match_status() {
        let double = Dispatcher::new();
        double.set_no_match_status(418);
        assert_eq!(double.dispatch(Request::get("/")).unwrap().status, 418);

        double.clear();
        assert_eq!(double.dispatch(Request::get("/")).unwrap().status, 404);
    }

    #[test]
    fn test_fault_is_returned_and_recorded() {
        let double = Dispatcher::new();
        double.register(
            Rule::get("/fail").respond(ResponseTemplate::fault(Fault::ConnectionRefused).next_state("DOWN")),
        );

        let err = double.dispatch(Request::get("/fail")).unwrap_err();
        assert!(matches!(err.fault(), Some(Fault::ConnectionRefused)));
        // The transition is applied before the fault is raised.
        assert_eq!(double.state(), "DOWN");

        let calls = double.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].response.is_none());
        assert_eq!(calls[0].rule.as_deref(), Some("[GET /fail]"));
    }

    #[test]
    fn test_custom_fault_round_trips() {
        #[derive(Debug, thiserror::Error)]
        #[error("quota exceeded")]
        struct QuotaExceeded;

        let double = Dispatcher::new();
        double.register(Rule::get("/quota").respond(ResponseTemplate::fault(Fault::custom(QuotaExceeded))));

        let err = double.dispatch(Request::get("/quota")).unwrap_err();
        assert!(err.fault().unwrap().downcast_ref::<QuotaExceeded>().is_some());
    }

    #[test]
    fn test_recorded_calls_in_order() {
        let double = Dispatcher::new();
        double.register(Rule::get("/a").respond(ResponseTemplate::ok().text("a")));

        double.dispatch(Request::get("/a")).unwrap();
        double.dispatch(Request::get("/b")).unwrap();
        double.dispatch(Request::get("/a?x=1")).unwrap();

        let calls = double.recorded_calls();
        let paths: Vec<&str> = calls.iter().map(|c| c.request.path.as_str()).collect();
        assert_eq!(paths, ["/a", "/b", "/a"]);
        assert_eq!(calls[0].response.as_ref().unwrap().text(), "a");
        assert!(calls[1].response.is_none());
        assert_eq!(calls[2].state, INITIAL_STATE);

        assert_eq!(
            double.stats(),
            DispatchStats {
                total: 3,
                matched: 2,
                unmatched: 1
            }
        );
    }

    #[test]
    fn test_clear_is_full_reset() {
        let double = Dispatcher::new();
        double.register(Rule::get("/x").respond(ResponseTemplate::ok().next_state("NEXT")));
        double.dispatch(Request::get("/x")).unwrap();
        assert_eq!(double.state(), "NEXT");

        double.clear();
        double.clear();

        assert!(double.recorded_calls().is_empty());
        assert_eq!(double.state(), INITIAL_STATE);
        assert_eq!(double.rules_len(), 0);
        assert_eq!(double.stats(), DispatchStats::default());
        assert_eq!(double.dispatch(Request::get("/x")).unwrap().status, 404);
    }

    #[test]
    fn test_template_bodies() {
        let double = Dispatcher::new();
        double.register(
            Rule::get(ValueMatcher::like("/users/\\d+").unwrap())
                .respond(ResponseTemplate::ok().body(ResponseBody::JsonTemplate(json!({
                    "path": "{{path}}",
                    "state": "{{state}}"
                })))),
        );
        double.register(
            Rule::post("/echo").respond(ResponseTemplate::ok().template("you said {{body}}")),
        );

        let response = double.dispatch(Request::get("/users/7")).unwrap();
        assert_eq!(response.content_type(), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, json!({"path": "/users/7", "state": INITIAL_STATE}));

        let response = double.dispatch(Request::post("/echo").text("hi")).unwrap();
        assert_eq!(response.text(), "you said hi");
    }

    #[test]
    fn test_template_failure_is_fatal() {
        let double = Dispatcher::new();
        double.register(
            Rule::get("/broken")
                .respond(ResponseTemplate::ok().template("{{#each}}").next_state("AFTER")),
        );

        let err = double.dispatch(Request::get("/broken")).unwrap_err();
        assert!(matches!(err, DispatchError::BodyGeneration { .. }));
        // No rollback.
        assert_eq!(double.state(), "AFTER");
        assert_eq!(double.recorded_calls().len(), 1);
    }

    #[test]
    fn test_bad_date_format_is_a_body_error() {
        let double = Dispatcher::new();
        double.register(Rule::get("/t").respond(ResponseTemplate::ok().template("{{now \"%Q\"}}")));

        let err = double.dispatch(Request::get("/t")).unwrap_err();
        assert!(matches!(err, DispatchError::BodyGeneration { .. }));
        assert!(err.to_string().contains("invalid date format"));
    }

    #[test]
    fn test_predicate_may_read_the_double() {
        let double = Arc::new(Dispatcher::new());
        let observer = Arc::clone(&double);
        double.register(
            Rule::get("/first")
                .matching(move |_| observer.recorded_calls().is_empty())
                .respond(ResponseTemplate::ok()),
        );

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&double);
        thread::spawn(move || {
            let first = worker.dispatch(Request::get("/first")).map(|r| r.status);
            let second = worker.dispatch(Request::get("/first")).map(|r| r.status);
            tx.send((first, second)).unwrap();
        });

        let (first, second) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.unwrap(), 200);
        assert_eq!(second.unwrap(), 404);
    }

    #[test]
    fn test_clear_during_generation_drops_the_response() {
        let started = Arc::new(Barrier::new(2));
        let resume = Arc::new(Barrier::new(2));
        let double = Arc::new(Dispatcher::new());
        {
            let started = Arc::clone(&started);
            let resume = Arc::clone(&resume);
            double.register(Rule::get("/slow").respond(ResponseTemplate::ok().generate(
                move |_| {
                    started.wait();
                    resume.wait();
                    b"late".to_vec()
                },
            )));
        }

        let worker = Arc::clone(&double);
        let handle = thread::spawn(move || worker.dispatch(Request::get("/slow")));

        started.wait();
        // Generation in progress: the call is logged, its response is not.
        let calls = double.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].response.is_none());
        assert!(calls[0].rule.is_some());

        double.clear();
        resume.wait();

        let response = handle.join().unwrap().unwrap();
        assert_eq!(response.text(), "late");
        assert!(double.recorded_calls().is_empty());
    }

    #[test]
    fn test_generator_sees_request() {
        let double = Dispatcher::new();
        double.register(
            Rule::post("/upper")
                .respond(ResponseTemplate::ok().generate(|r| r.body.to_ascii_uppercase())),
        );
        let response = double.dispatch(Request::post("/upper").text("abc")).unwrap();
        assert_eq!(response.text(), "ABC");
    }

    #[test]
    fn test_body_matching_rule() {
        let double = Dispatcher::new();
        double.register(
            RequestPattern::builder()
                .method(crate::request::Method::Post)
                .path("/api/users")
                .body(ContentMatcher::json_value(&json!({"name": "John", "age": 30})))
                .respond(ResponseTemplate::new(201)),
        );

        let request = Request::post("/api/users").text(r#"{ "age": 30.0, "name": "John" }"#);
        assert_eq!(double.dispatch(request).unwrap().status, 201);

        let request = Request::post("/api/users").text(r#"{"age": 31, "name": "John"}"#);
        let response = double.dispatch(request).unwrap();
        assert_eq!(response.status, 404);
        assert!(response.text().contains("Expected 30 but was 31 at path $.age"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatch() {
        let double = Arc::new(Dispatcher::new());
        double.register(Rule::get("/ping").respond(ResponseTemplate::ok().text("pong")));

        let mut handles = Vec::new();
        for i in 0..8 {
            let double = Arc::clone(&double);
            handles.push(tokio::spawn(async move {
                for j in 0..25 {
                    let path = if (i + j) % 5 == 0 { "/miss" } else { "/ping" };
                    double.dispatch(Request::get(path)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = double.stats();
        assert_eq!(stats.total, 200);
        assert_eq!(stats.matched + stats.unmatched, 200);
        assert_eq!(double.recorded_calls().len(), 200);
        assert_eq!(
            double
                .recorded_calls()
                .iter()
                .filter(|c| c.response.is_some())
                .count() as u64,
            stats.matched
        );
    }
}
