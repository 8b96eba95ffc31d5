//! HTTP Double
//!
//! A programmable HTTP test double. Tests register ordered rules; each
//! request is dispatched to the first matching rule, recorded, and can be
//! verified afterwards with the same matcher vocabulary.
//!
//! # Features
//!
//! - **Value Matching**: equality, regex, substring and negated forms for
//!   method, path, content type, headers and parameters
//! - **Semantic Bodies**: JSON and XML compared structurally, form bodies key by key
//! - **Stateful Dispatch**: rules gated on a state token and moving it forward
//! - **Diagnostics**: unmatched requests get a report of why every rule failed
//! - **Fault Injection**: rules can fail a call instead of answering it
//! - **Verification**: count recorded calls matching a pattern
//!
//! # Example
//!
//! ```
//! use http_double::{Dispatcher, Request, ResponseTemplate, Rule};
//!
//! let double = Dispatcher::new();
//! double.register(
//!     Rule::post("/login").respond(ResponseTemplate::ok().next_state("LOGGED_IN")),
//! );
//! double.register(
//!     Rule::get("/profile")
//!         .state("LOGGED_IN")
//!         .respond(ResponseTemplate::ok().text("hello")),
//! );
//!
//! assert_eq!(double.dispatch(Request::get("/profile")).unwrap().status, 404);
//! double.dispatch(Request::post("/login")).unwrap();
//! assert_eq!(double.dispatch(Request::get("/profile")).unwrap().text(), "hello");
//!
//! double.verify(Some(2), Rule::get("/profile")).unwrap();
//! ```
//!
//! # Example Configuration
//!
//! ```yaml
//! rules:
//!   - name: login
//!     request:
//!       method: POST
//!       path: /login
//!       form:
//!         params:
//!           username: ["john"]
//!     response:
//!       status: 200
//!       next_state: LOGGED_IN
//!       body:
//!         type: json
//!         content:
//!           token: "abc"
//! ```

pub mod config;
pub mod content;
pub mod dispatcher;
pub mod error;
pub mod json;
pub mod matcher;
pub mod params;
pub mod request;
pub mod rule;
pub mod template;
pub mod value;
mod verify;
pub mod xml;

pub use config::{DispatcherSettings, DoubleConfig};
pub use content::ContentMatcher;
pub use dispatcher::{DispatchStats, Dispatcher, RecordedCall, Response, INITIAL_STATE};
pub use error::{DispatchError, Fault, RuleError, VerificationError};
pub use matcher::{MatchOutcome, PatternBuilder, RequestPattern};
pub use params::{HeaderMatcher, MultiValueMap, ParamsMatcher};
pub use request::{Method, Request};
pub use rule::{ResponseBody, ResponseTemplate, Rule, RuleBuilder};
pub use value::ValueMatcher;
