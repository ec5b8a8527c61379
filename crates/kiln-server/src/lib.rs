//! Build daemon library for kiln.
//!
//! Routes:
//!
//! | Method | Path                   | Effect                                   |
//! |--------|------------------------|------------------------------------------|
//! | POST   | `/boot`                | start the singleton boot, 409 if active  |
//! | GET    | `/boot`                | current boot record                      |
//! | POST   | `/build`               | accept `{url, sha, relPath}`             |
//! | GET    | `/build/{id}`          | build record                             |
//! | GET    | `/build/{id}/manifest` | manifest copy of a finished build        |
//! | GET    | `/health`              | liveness                                 |
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

pub mod config;
pub mod lifecycle;
pub mod registry;
pub mod service;

pub use config::{ServerConfig, DEFAULT_CONFIG_PATH};
pub use lifecycle::{validate_transition, Lifecycle, Phase};
pub use registry::{BootRecord, BootStatus, BuildRecord, BuildRegistry, BuildStatus};
pub use service::{BuildService, ServiceConfig};

use kiln_core::BuildRequest;
use kiln_schema::BuildId;
use serde::Serialize;
use std::fs;
use std::sync::Arc;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a build for this url, sha and relPath is already in progress ({0})")]
    Conflict(BuildId),
    #[error("boot in progress")]
    BootInProgress,
    #[error("no such build: {0}")]
    NotFound(BuildId),
    #[error("boot has not been started")]
    BootNotStarted,
    #[error("{0}")]
    Invalid(#[source] kiln_core::CoreError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

impl RegistryError {
    pub fn status_code(&self) -> u16 {
        match self {
            RegistryError::Conflict(_) | RegistryError::BootInProgress => 409,
            RegistryError::NotFound(_) | RegistryError::BootNotStarted => 404,
            RegistryError::Invalid(_) => 400,
            RegistryError::InvalidTransition { .. }
            | RegistryError::Config(_)
            | RegistryError::Bind { .. } => 500,
        }
    }
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name, value).ok()
}

fn respond_err(req: Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_registry_err(req: Request, e: &RegistryError) {
    respond_err(req, e.status_code(), &e.to_string());
}

fn respond_json(req: Request, value: &impl Serialize) {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut resp = Response::from_data(body);
            if let Some(h) = header("Content-Type", "application/json") {
                resp = resp.with_header(h);
            }
            let _ = req.respond(resp);
        }
        Err(e) => respond_err(req, 500, &format!("serialization error: {e}")),
    }
}

fn read_body(req: &mut Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

/// Routes under `/build/`.
#[derive(Debug, PartialEq, Eq)]
pub enum BuildRoute<'a> {
    Record(&'a str),
    Manifest(&'a str),
}

pub fn parse_build_route(path: &str) -> Option<BuildRoute<'_>> {
    let rest = path.strip_prefix("/build/")?;
    match rest.split_once('/') {
        None if !rest.is_empty() => Some(BuildRoute::Record(rest)),
        Some((id, "manifest")) if !id.is_empty() => Some(BuildRoute::Manifest(id)),
        _ => None,
    }
}

fn handle_boot(service: &Arc<BuildService>, req: Request, method: &Method) {
    match *method {
        Method::Post => match service.start_boot() {
            Ok(record) => {
                info!("POST /boot: started");
                respond_json(req, &record);
            }
            Err(e) => respond_registry_err(req, &e),
        },
        Method::Get => match service.registry().boot() {
            Some(record) => respond_json(req, &record),
            None => respond_registry_err(req, &RegistryError::BootNotStarted),
        },
        _ => respond_err(req, 405, "method not allowed"),
    }
}

fn handle_post_build(service: &Arc<BuildService>, mut req: Request) {
    let Some(body) = read_body(&mut req) else {
        respond_err(req, 500, "read error");
        return;
    };
    let request: BuildRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            respond_err(req, 400, &format!("error decoding build request: {e}"));
            return;
        }
    };
    match service.submit_build(request) {
        Ok(record) => {
            info!("POST /build: accepted {}", record.id);
            respond_json(req, &record);
        }
        Err(e) => {
            debug!("POST /build rejected: {e}");
            respond_registry_err(req, &e);
        }
    }
}

fn handle_manifest(service: &BuildService, req: Request, id: &BuildId) {
    let Some(record) = service.registry().build(id) else {
        respond_registry_err(req, &RegistryError::NotFound(id.clone()));
        return;
    };
    match record.status {
        BuildStatus::Done => {}
        BuildStatus::Error => {
            respond_err(req, 400, "build ended with error");
            return;
        }
        BuildStatus::Init | BuildStatus::Building => {
            respond_err(req, 400, "build not finished");
            return;
        }
    }
    match fs::read(service.manifest_path(id)) {
        Ok(data) => {
            let mut resp = Response::from_data(data);
            if let Some(h) = header("Content-Type", "application/toml") {
                resp = resp.with_header(h);
            }
            let _ = req.respond(resp);
        }
        Err(e) => {
            error!("manifest of build {id}: {e}");
            respond_err(req, 500, &format!("cannot read manifest: {e}"));
        }
    }
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(service: &Arc<BuildService>, req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let path = url.split('?').next().unwrap_or_default();
    debug!("{method} {path}");

    if path == "/boot" {
        handle_boot(service, req, &method);
    } else if path == "/build" {
        if method == Method::Post {
            handle_post_build(service, req);
        } else {
            respond_err(req, 405, "method not allowed");
        }
    } else if let Some(route) = parse_build_route(path) {
        if method != Method::Get {
            respond_err(req, 405, "method not allowed");
            return;
        }
        match route {
            BuildRoute::Record(id) => match service.registry().build(&BuildId::new(id)) {
                Some(record) => respond_json(req, &record),
                None => respond_registry_err(req, &RegistryError::NotFound(BuildId::new(id))),
            },
            BuildRoute::Manifest(id) => handle_manifest(service, req, &BuildId::new(id)),
        }
    } else if path == "/health" && method == Method::Get {
        let _ = req.respond(Response::from_string(r#"{"status":"ok"}"#));
    } else {
        respond_err(req, 404, "not found");
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(service: &Arc<BuildService>, addr: &str) -> Result<(), RegistryError> {
    let server = Server::http(addr).map_err(|e| RegistryError::Bind {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })?;
    for request in server.incoming_requests() {
        handle_request(service, request);
    }
    Ok(())
}

/// A test helper that serves a `BuildService` on a random port in a background thread.
///
/// Drop the `TestServer` to stop the server (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub service: Arc<BuildService>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Binds to `127.0.0.1:0` (random port).
    pub fn start(service: Arc<BuildService>) -> Result<Self, RegistryError> {
        let addr = "127.0.0.1:0";
        let server = Arc::new(Server::http(addr).map_err(|e| RegistryError::Bind {
            addr: addr.to_owned(),
            reason: e.to_string(),
        })?);
        let port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .ok_or_else(|| RegistryError::Bind {
                addr: addr.to_owned(),
                reason: "not an IP address".to_owned(),
            })?;
        let url = format!("http://127.0.0.1:{port}");

        let srv = Arc::clone(&server);
        let svc = Arc::clone(&service);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&svc, request);
            }
        });

        Ok(Self {
            url,
            port,
            service,
            server,
            _handle: handle,
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_build_record_route() {
        assert_eq!(
            parse_build_route("/build/abc123"),
            Some(BuildRoute::Record("abc123"))
        );
    }

    #[test]
    fn parse_build_manifest_route() {
        assert_eq!(
            parse_build_route("/build/abc123/manifest"),
            Some(BuildRoute::Manifest("abc123"))
        );
    }

    #[test]
    fn parse_build_route_rejects_others() {
        assert!(parse_build_route("/build/").is_none());
        assert!(parse_build_route("/build//manifest").is_none());
        assert!(parse_build_route("/build/abc/logs").is_none());
        assert!(parse_build_route("/boot").is_none());
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(RegistryError::Conflict(BuildId::new("x")).status_code(), 409);
        assert_eq!(RegistryError::BootInProgress.status_code(), 409);
        assert_eq!(RegistryError::NotFound(BuildId::new("x")).status_code(), 404);
        assert_eq!(RegistryError::BootNotStarted.status_code(), 404);
        assert_eq!(
            RegistryError::Invalid(kiln_core::CoreError::EmptyField("url")).status_code(),
            400
        );
    }
}
