use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::http::{HttpStatus, Method, Request};
use crate::pool::ResourcePool;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A handler's answer: the target of the static document to send back.
pub type HandlerResult = Result<String, HandlerError>;

pub type Handler = Box<dyn Fn(&Request<'_>) -> HandlerResult + Send + Sync>;
pub type LeasedHandler<R> = Box<dyn Fn(&Request<'_>, &mut R) -> HandlerResult + Send + Sync>;

pub enum Route<R> {
    /// Serve another document in place of the requested one.
    Alias(String),
    /// Run side effects that do not need a pooled resource.
    Handler(Handler),
    /// Run side effects with a resource leased from the pool.
    Leased(LeasedHandler<R>),
}

/// Explicit route table keyed by method and path (query string removed).
///
/// Requests that match no entry are served straight from the document root.
pub struct Router<R> {
    routes: HashMap<String, HashMap<Method, Route<R>>>,
}

impl<R> Default for Router<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Router<R> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn add(&mut self, method: Method, path: &str, route: Route<R>) {
        self.routes
            .entry(path.to_string())
            .or_default()
            .insert(method, route);
    }

    pub fn alias(&mut self, method: Method, path: &str, target: &str) {
        self.add(method, path, Route::Alias(target.to_string()));
    }

    pub fn handler<F>(&mut self, method: Method, path: &str, handler: F)
    where
        F: Fn(&Request<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(method, path, Route::Handler(Box::new(handler)));
    }

    pub fn leased<F>(&mut self, method: Method, path: &str, handler: F)
    where
        F: Fn(&Request<'_>, &mut R) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(method, path, Route::Leased(Box::new(handler)));
    }

    pub fn match_route(&self, method: Method, path: &str) -> Option<&Route<R>> {
        self.routes.get(path)?.get(&method)
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Decide which document answers `req`.
    ///
    /// Leased routes block on `pool` for a resource; the lease is returned
    /// before this function returns, on success, error and panic alike. A
    /// failing or panicking handler maps to `InternalFault`.
    pub fn dispatch<'a>(
        &self,
        req: &Request<'a>,
        pool: &ResourcePool<R>,
    ) -> Result<Cow<'a, str>, HttpStatus> {
        let path = req.path();
        let outcome = match self.match_route(req.method, path) {
            None => return Ok(Cow::Borrowed(req.target)),
            Some(Route::Alias(target)) => return Ok(Cow::Owned(target.clone())),
            Some(Route::Handler(handler)) => {
                panic::catch_unwind(AssertUnwindSafe(|| handler(req)))
            }
            Some(Route::Leased(handler)) => panic::catch_unwind(AssertUnwindSafe(|| {
                let mut lease = pool.acquire();
                handler(req, &mut *lease)
            })),
        };

        match outcome {
            Ok(Ok(target)) => Ok(Cow::Owned(target)),
            Ok(Err(e)) => {
                warn!(method = req.method.as_str(), path, error = %e, "handler failed");
                Err(HttpStatus::InternalFault)
            }
            Err(_) => {
                warn!(method = req.method.as_str(), path, "handler panicked");
                Err(HttpStatus::InternalFault)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, target: &str) -> Request<'_> {
        Request {
            method,
            target,
            host: None,
            keep_alive: false,
            content_length: 0,
            body: b"",
        }
    }

    fn router() -> Router<Vec<String>> {
        let mut router = Router::new();
        router.alias(Method::Get, "/login", "/log.html");
        router.handler(Method::Post, "/ping", |_| Ok("/pong.html".to_string()));
        router.handler(Method::Post, "/fail", |_| Err("store offline".into()));
        router.leased(Method::Post, "/note", |req, notes: &mut Vec<String>| {
            notes.push(String::from_utf8_lossy(req.body).into_owned());
            Ok("/saved.html".to_string())
        });
        router.leased(Method::Post, "/boom", |_, _| panic!("bad handler"));
        router
    }

    #[test]
    fn unrouted_targets_pass_through() {
        let pool = ResourcePool::new(vec![Vec::new()]).unwrap();
        let req = request(Method::Get, "/page.html?x=1");
        assert_eq!(router().dispatch(&req, &pool).unwrap(), "/page.html?x=1");
    }

    #[test]
    fn routes_match_on_method_and_path_without_query() {
        let pool = ResourcePool::new(vec![Vec::new()]).unwrap();
        let router = router();
        assert_eq!(router.dispatch(&request(Method::Get, "/login?next=1"), &pool).unwrap(), "/log.html");
        // Same path, other method: not routed.
        assert_eq!(router.dispatch(&request(Method::Post, "/login"), &pool).unwrap(), "/login");
        assert_eq!(router.dispatch(&request(Method::Post, "/ping"), &pool).unwrap(), "/pong.html");
        assert_eq!(router.len(), 5);
    }

    #[test]
    fn leased_routes_use_and_return_the_resource() {
        let pool = ResourcePool::new(vec![Vec::new()]).unwrap();
        let mut req = request(Method::Post, "/note");
        req.body = &b"hello"[..];
        assert_eq!(router().dispatch(&req, &pool).unwrap(), "/saved.html");
        assert_eq!(pool.available(), 1);
        assert_eq!(*pool.acquire(), vec!["hello".to_string()]);
    }

    #[test]
    fn failures_become_internal_faults() {
        let pool = ResourcePool::new(vec![Vec::new()]).unwrap();
        let router = router();
        assert_eq!(
            router.dispatch(&request(Method::Post, "/fail"), &pool).unwrap_err(),
            HttpStatus::InternalFault
        );
        assert_eq!(
            router.dispatch(&request(Method::Post, "/boom"), &pool).unwrap_err(),
            HttpStatus::InternalFault
        );
        assert_eq!(pool.available(), 1);
    }
}
