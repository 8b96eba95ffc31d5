//! Post-hoc verification against the call log.
//!
//! A pattern is re-evaluated against every recorded request with the state
//! token captured at dispatch time. Whether the call matched a rule back then
//! is irrelevant.

use crate::dispatcher::Dispatcher;
use crate::error::VerificationError;
use crate::matcher::RequestPattern;

impl Dispatcher {
    /// Number of recorded calls matching `pattern`.
    pub fn count_matching(&self, pattern: &RequestPattern) -> usize {
        self.recorded_calls()
            .iter()
            .filter(|call| pattern.evaluate(&call.request, &call.state).is_match())
            .count()
    }

    /// Assert how many recorded calls match `pattern`.
    ///
    /// With `Some(n)` exactly `n` calls must match; with `None` at least one.
    pub fn verify(
        &self,
        expected: Option<usize>,
        pattern: impl Into<RequestPattern>,
    ) -> Result<(), VerificationError> {
        let pattern = pattern.into();
        let actual = self.count_matching(&pattern);
        match expected {
            Some(expected) if expected != actual => Err(VerificationError::CountMismatch {
                expected,
                actual,
                pattern: pattern.to_string(),
            }),
            None if actual == 0 => Err(VerificationError::NotCalled {
                pattern: pattern.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::dispatcher::Dispatcher;
    use crate::error::VerificationError;
    use crate::matcher::RequestPattern;
    use crate::request::{Method, Request};
    use crate::rule::{ResponseTemplate, Rule};
    use serde_json::json;

    fn bookings() -> Dispatcher {
        let double = Dispatcher::new();
        double.register(Rule::post("/api/bookings").respond(ResponseTemplate::new(201)));
        double
    }

    #[test]
    fn test_exact_count() {
        let double = bookings();
        for i in 0..3 {
            double
                .dispatch(Request::post("/api/bookings").json(&json!({"seat": i})))
                .unwrap();
        }

        let pattern = Rule::post("/api/bookings");
        assert!(double.verify(Some(3), pattern.clone()).is_ok());

        let err = double.verify(Some(4), pattern).unwrap_err();
        assert_eq!(
            err,
            VerificationError::CountMismatch {
                expected: 4,
                actual: 3,
                pattern: "[POST /api/bookings]".to_string(),
            }
        );
        assert!(err.to_string().contains("expected 4"));
        assert!(err.to_string().contains("found 3"));
    }

    #[test]
    fn test_at_least_once() {
        let double = bookings();
        let pattern = Rule::post("/api/bookings");
        assert!(matches!(
            double.verify(None, pattern.clone()),
            Err(VerificationError::NotCalled { .. })
        ));

        double.dispatch(Request::post("/api/bookings")).unwrap();
        double.dispatch(Request::post("/api/bookings")).unwrap();
        assert!(double.verify(None, pattern).is_ok());
    }

    #[test]
    fn test_never_called() {
        let double = bookings();
        double.dispatch(Request::post("/api/bookings")).unwrap();
        assert!(double.verify(Some(0), Rule::delete("/api/bookings")).is_ok());
    }

    #[test]
    fn test_unmatched_calls_are_verifiable() {
        let double = bookings();
        double.dispatch(Request::get("/api/unknown?id=5")).unwrap();

        let pattern = RequestPattern::builder()
            .method(Method::Get)
            .path("/api/unknown")
            .query_param("id", "5");
        assert!(double.verify(Some(1), pattern).is_ok());
    }

    #[test]
    fn test_headers_and_recorded_state() {
        let double = Dispatcher::new();
        double.register(Rule::post("/login").respond(ResponseTemplate::ok().next_state("LOGGED_IN")));
        double.register(Rule::get("/profile").respond(ResponseTemplate::ok()));

        double.dispatch(Request::get("/profile")).unwrap();
        double.dispatch(Request::post("/login")).unwrap();
        double
            .dispatch(Request::get("/profile").header("Authorization", "Bearer t"))
            .unwrap();

        assert!(double
            .verify(Some(1), Rule::get("/profile").state("LOGGED_IN"))
            .is_ok());
        assert!(double
            .verify(Some(1), Rule::get("/profile").header("authorization", "Bearer t"))
            .is_ok());
        assert_eq!(double.count_matching(&Rule::get("/profile").build()), 2);
    }
}
