//! Route table for the demo account site.

use std::sync::Arc;

use etude_core::{HandlerResult, Method, Request, Router};
use etude_store::{Accounts, MemorySession, RegisterOutcome};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct Credentials {
    user: String,
    passwd: String,
}

#[derive(Debug, Deserialize)]
struct Post {
    user: String,
    content: String,
}

/// Build the demo site's routes over a shared account directory.
pub fn routes(accounts: Arc<Accounts>) -> Router<MemorySession> {
    let mut router = Router::new();

    router.alias(Method::Get, "/register", "/register.html");
    router.alias(Method::Get, "/login", "/log.html");
    router.alias(Method::Get, "/post", "/welcome.html");
    router.alias(Method::Get, "/fans", "/fans.html");

    let dir = accounts.clone();
    router.leased(Method::Post, "/register", move |req, session| register(&dir, req, session));

    let dir = accounts.clone();
    router.handler(Method::Post, "/login", move |req| login(&dir, req));

    router.leased(Method::Post, "/post", move |req, session| post(&accounts, req, session));

    router
}

fn register(accounts: &Accounts, req: &Request<'_>, session: &mut MemorySession) -> HandlerResult {
    let Ok(form) = serde_urlencoded::from_bytes::<Credentials>(req.body) else {
        return Ok("/registerError.html".to_string());
    };
    match accounts.register(session, &form.user, &form.passwd)? {
        RegisterOutcome::Created => {
            info!(user = %form.user, "user registered");
            Ok("/log.html".to_string())
        }
        RegisterOutcome::Taken => {
            debug!(user = %form.user, "name already taken");
            Ok("/registerError.html".to_string())
        }
    }
}

fn login(accounts: &Accounts, req: &Request<'_>) -> HandlerResult {
    let accepted = serde_urlencoded::from_bytes::<Credentials>(req.body)
        .is_ok_and(|form| accounts.login(&form.user, &form.passwd));
    if accepted {
        Ok("/welcome.html".to_string())
    } else {
        Ok("/logError.html".to_string())
    }
}

fn post(accounts: &Accounts, req: &Request<'_>, session: &mut MemorySession) -> HandlerResult {
    let form: Post = serde_urlencoded::from_bytes(req.body)?;
    accounts.post_message(session, &form.user, &form.content)?;
    Ok("/insert_info.html".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use etude_core::{HttpStatus, ResourcePool};
    use etude_store::{MemoryStore, create_schema};

    struct Site {
        store: MemoryStore,
        accounts: Arc<Accounts>,
        router: Router<MemorySession>,
        pool: ResourcePool<MemorySession>,
    }

    fn site() -> Site {
        let store = MemoryStore::new();
        create_schema(&store);
        let accounts = Arc::new(Accounts::new());
        let router = routes(accounts.clone());
        let pool = ResourcePool::new(vec![store.connect(), store.connect()]).unwrap();
        Site {
            store,
            accounts,
            router,
            pool,
        }
    }

    fn post_form<'a>(target: &'a str, body: &'a [u8]) -> Request<'a> {
        Request {
            method: Method::Post,
            target,
            host: None,
            keep_alive: true,
            content_length: body.len(),
            body,
        }
    }

    fn get(target: &str) -> Request<'_> {
        Request {
            method: Method::Get,
            target,
            host: None,
            keep_alive: true,
            content_length: 0,
            body: b"",
        }
    }

    #[test]
    fn form_pages_are_aliases() {
        let site = site();
        let answer = site.router.dispatch(&get("/login"), &site.pool).unwrap();
        assert_eq!(answer, "/log.html");
        let answer = site.router.dispatch(&get("/fans"), &site.pool).unwrap();
        assert_eq!(answer, "/fans.html");
    }

    #[test]
    fn register_then_login() {
        let site = site();
        let req = post_form("/register", b"user=ann&passwd=secret");
        assert_eq!(site.router.dispatch(&req, &site.pool).unwrap(), "/log.html");
        assert_eq!(site.router.dispatch(&req, &site.pool).unwrap(), "/registerError.html");
        assert_eq!(site.store.count("user").unwrap(), 1);

        let ok = post_form("/login", b"user=ann&passwd=secret");
        assert_eq!(site.router.dispatch(&ok, &site.pool).unwrap(), "/welcome.html");
        let bad = post_form("/login", b"user=ann&passwd=nope");
        assert_eq!(site.router.dispatch(&bad, &site.pool).unwrap(), "/logError.html");
        assert!(site.accounts.login("ann", "secret"));
        assert_eq!(site.pool.available(), 2);
    }

    #[test]
    fn malformed_forms() {
        let site = site();
        let req = post_form("/register", b"user=ann");
        assert_eq!(site.router.dispatch(&req, &site.pool).unwrap(), "/registerError.html");
        let req = post_form("/login", b"garbage");
        assert_eq!(site.router.dispatch(&req, &site.pool).unwrap(), "/logError.html");
        let req = post_form("/post", b"content=hi");
        assert_eq!(
            site.router.dispatch(&req, &site.pool).unwrap_err(),
            HttpStatus::InternalFault
        );
        assert_eq!(site.pool.available(), 2);
    }

    #[test]
    fn posts_are_stored_verbatim() {
        let site = site();
        let req = post_form("/post", b"user=ann&content=it%27s+fine%3B+DROP+TABLE+info");
        assert_eq!(site.router.dispatch(&req, &site.pool).unwrap(), "/insert_info.html");

        let mut session = site.store.connect();
        let messages = site.accounts.messages(&mut session).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "it's fine; DROP TABLE info");
    }
}
