//! Endpoint registry and request routing.

use crate::handlers::{ComputeHandler, Handler, HealthHandler, Workload};
use crate::protocol::{Request, Response, Status};
use crate::stats::Stats;
use std::sync::Arc;

/// Registered endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/v1/api`: simulated computation
    Compute,
    /// `/health`: cumulative totals
    Health,
}

impl Endpoint {
    pub const ALL: [Endpoint; 2] = [Endpoint::Compute, Endpoint::Health];

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Compute => "/v1/api",
            Endpoint::Health => "/health",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|endpoint| endpoint.path() == path)
    }
}

/// Outcome of routing one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Endpoint(Endpoint),
    NotFound,
    MethodNotAllowed,
}

impl Route {
    pub fn status(self) -> Status {
        match self {
            Route::Endpoint(_) => Status::Ok,
            Route::NotFound => Status::NotFound,
            Route::MethodNotAllowed => Status::MethodNotAllowed,
        }
    }
}

/// Maps endpoints to their handlers
pub struct Router {
    compute: ComputeHandler,
    health: HealthHandler,
}

impl Router {
    pub fn new(workload: Arc<dyn Workload>) -> Self {
        Router {
            compute: ComputeHandler::new(workload),
            health: HealthHandler,
        }
    }

    /// Route a method and path. The method is checked before the path.
    pub fn route(method: &str, path: &str) -> Route {
        if method != "GET" {
            return Route::MethodNotAllowed;
        }
        match Endpoint::from_path(path) {
            Some(endpoint) => Route::Endpoint(endpoint),
            None => Route::NotFound,
        }
    }

    /// Status for a method and path, from the same lookup as [`Router::route`]
    pub fn classify(method: &str, path: &str) -> Status {
        Self::route(method, path).status()
    }

    fn handler(&self, endpoint: Endpoint) -> &dyn Handler {
        match endpoint {
            Endpoint::Compute => &self.compute,
            Endpoint::Health => &self.health,
        }
    }

    /// Produce the body for a routed request
    pub async fn dispatch(&self, route: Route, stats: &Stats) -> serde_json::Value {
        match route {
            Route::Endpoint(endpoint) => self.handler(endpoint).invoke(stats).await,
            Route::NotFound | Route::MethodNotAllowed => route.status().error_body(),
        }
    }

    /// Classify, dispatch and wrap the result in a response
    pub async fn respond(&self, request: &Request<'_>, stats: &Stats) -> Response {
        let status = Self::classify(request.method, request.path);
        let body = self
            .dispatch(Self::route(request.method, request.path), stats)
            .await;
        Response::new(status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::FixedWork;
    use serde_json::json;

    fn router(seconds: u64) -> Router {
        Router::new(Arc::new(FixedWork(seconds)))
    }

    #[test]
    fn test_classify() {
        assert_eq!(Router::classify("GET", "/health"), Status::Ok);
        assert_eq!(Router::classify("GET", "/v1/api"), Status::Ok);
        assert_eq!(Router::classify("POST", "/health"), Status::MethodNotAllowed);
        assert_eq!(Router::classify("GET", "/nope"), Status::NotFound);
    }

    #[test]
    fn test_method_checked_before_path() {
        assert_eq!(Router::classify("DELETE", "/nope"), Status::MethodNotAllowed);
        assert_eq!(Router::classify("get", "/health"), Status::MethodNotAllowed);
    }

    #[test]
    fn test_path_match_is_exact() {
        assert_eq!(Router::classify("GET", "/health/"), Status::NotFound);
        assert_eq!(Router::classify("GET", "/v1/api?x=1"), Status::NotFound);
    }

    #[test]
    fn test_endpoint_paths_round_trip() {
        for endpoint in Endpoint::ALL {
            assert_eq!(Endpoint::from_path(endpoint.path()), Some(endpoint));
        }
    }

    #[tokio::test]
    async fn test_dispatch_error_routes() {
        let router = router(1);
        let stats = Stats::new();

        assert_eq!(
            router.dispatch(Route::NotFound, &stats).await,
            json!({"msg": "Page not found", "status_code": 404})
        );
        assert_eq!(
            router.dispatch(Route::MethodNotAllowed, &stats).await,
            json!({"msg": "Method not allowed", "status_code": 405})
        );
        assert_eq!(stats.snapshot().queries, 0);
    }

    #[tokio::test]
    async fn test_compute_calls_accumulate() {
        let router = router(3);
        let stats = Stats::new();
        let request = Request::parse("GET /v1/api").unwrap();

        for _ in 0..4 {
            let response = router.respond(&request, &stats).await;
            assert_eq!(response.status, Status::Ok);
            assert_eq!(response.body["response_took_seconds"], 3);
        }

        let totals = stats.snapshot();
        assert_eq!((totals.queries, totals.seconds), (4, 12));
    }

    #[tokio::test]
    async fn test_respond_status_matches_classify() {
        let router = router(1);
        let stats = Stats::new();

        for line in [
            "GET /health",
            "GET /v1/api",
            "GET /nope",
            "POST /health",
            "PUT /nope",
        ] {
            let request = Request::parse(line).unwrap();
            let response = router.respond(&request, &stats).await;
            assert_eq!(
                response.status,
                Router::classify(request.method, request.path),
                "{line}"
            );
            if response.status != Status::Ok {
                assert_eq!(response.body, response.status.error_body());
            }
        }
    }

    #[tokio::test]
    async fn test_non_get_compute_does_not_record() {
        let router = router(3);
        let stats = Stats::new();
        let request = Request::parse("POST /v1/api").unwrap();

        let response = router.respond(&request, &stats).await;
        assert_eq!(response.status, Status::MethodNotAllowed);
        assert_eq!(stats.snapshot().queries, 0);
    }

    #[tokio::test]
    async fn test_health_after_compute() {
        let router = router(2);
        let stats = Stats::new();

        router
            .dispatch(Route::Endpoint(Endpoint::Compute), &stats)
            .await;
        let body = router
            .dispatch(Route::Endpoint(Endpoint::Health), &stats)
            .await;
        assert_eq!(body, json!({"total": {"queries": 1, "seconds": 2}}));
    }
}
