//! Sample application showing routing, codecs, middleware and worker dispatch.
//!
//! Listens on `SWITCHYARD_ADDR` (default `127.0.0.1:8000`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use switchyard_core::{
    init_tracing, CorsMiddleware, FieldError, HandlerError, JsonParser, LoggingMiddleware, Model,
    Outcome, Router, Server, StatusCode, StatusError, ThreadPool, TimingMiddleware,
    ValidationCode, ValidationErrors,
};
use tracing::info;

#[derive(Debug, Deserialize)]
struct NewUser {
    name: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct User {
    id: i64,
    name: String,
    email: String,
}

fn routes() -> anyhow::Result<Router> {
    let mut router = Router::new();
    router
        .add_middleware(LoggingMiddleware::new())
        .add_middleware(TimingMiddleware::new())
        .add_middleware(CorsMiddleware::new())
        .parser(JsonParser)
        .executor("reports", ThreadPool::new("reports", 2)?);

    router.get("/", |_| Ok(Outcome::render("switchyard is running")))?;

    router.get("/users/{id}", |ctx| {
        let id = ctx.path("id").to_i64()?;
        if id == 0 {
            return Err(StatusError::not_found(format!("no user {id}")).into());
        }
        Ok(Outcome::render(Model::json(&User {
            id,
            name: format!("user-{id}"),
            email: format!("user-{id}@example.com"),
        })?))
    })?;

    router.post("/users", |ctx| {
        let new_user: NewUser = ctx.body()?;
        let mut errors = ValidationErrors::new();
        if new_user.name.trim().is_empty() {
            errors.add(FieldError::required("name"));
        }
        if !new_user.email.contains('@') {
            errors.add(FieldError::new(
                "email",
                "must be an email address",
                ValidationCode::InvalidFormat,
            ));
        }
        if !errors.is_empty() {
            return Err(HandlerError::from(errors));
        }

        ctx.set_status(StatusCode::CREATED);
        Ok(Outcome::render(Model::json(&User {
            id: 1,
            name: new_user.name,
            email: new_user.email,
        })?))
    })?;

    router.get("/reports/{name}", |ctx| {
        let name = ctx.path("name").value()?.to_string();
        Ok(Outcome::dispatch_to("reports", move |_| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(Outcome::render(format!("report {name} is ready")))
        }))
    })?;

    router.get("/files/*path", |ctx| {
        Ok(Outcome::render(format!("file: {}", ctx.path("path").value_or(""))))
    })?;

    router.get("/old-home", |ctx| {
        ctx.send_redirect("/")?;
        Ok(Outcome::Done)
    })?;

    Ok(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let addr: SocketAddr = std::env::var("SWITCHYARD_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
        .parse()?;

    let router = routes()?;
    info!(routes = router.route_count(), "Application assembled");

    Server::new(router).bind(addr).serve().await?;
    Ok(())
}
