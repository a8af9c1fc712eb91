//! HTTP ingress of the gateway: the two relay routes and the prometheus
//! exposition, bound to an orchestrator instance. Bodies are passed through
//! as raw bytes in both directions; all JSON-RPC interpretation happens in
//! the orchestrator.

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::{StatusCode, header};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use gateway_primitives::errors::RelayError;
use gateway_primitives::relay::RelayResponse;
use gateway_relayer::{RelayOrchestrator, RequestContext};
use std::sync::Arc;

/// Custom header letting whitelisted clients pick a blockchain alias
/// explicitly instead of through the vhost they called.
pub const BLOCKCHAIN_ALIAS_HEADER: &str = "blockchain-subdomain";

/// Header carrying the application's shared secret.
pub const SECRET_KEY_HEADER: &str = "secret-key";

pub fn route_app(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/lb/{lb_id}", web::post().to(relay_load_balancer))
        .route("/v1/{app_id}", web::post().to(relay_application))
        .route("/metrics", web::get().to(prometheus_metrics));
}

/// Starts the ingress server. The returned `Server` future drives all
/// workers; callers spawn it on their runtime.
pub fn start_http(
    addr: &str,
    orchestrator: Arc<RelayOrchestrator>,
) -> std::io::Result<Server> {
    let data = web::Data::from(orchestrator);
    let server = HttpServer::new(move || {
        App::new().wrap(get_cors()).app_data(data.clone()).configure(route_app)
    })
    .bind(addr)?
    .run();
    tracing::info!(target: "http", addr, "gateway ingress listening");
    Ok(server)
}

fn get_cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::USER_AGENT])
        .allowed_header(BLOCKCHAIN_ALIAS_HEADER)
        .allowed_header(SECRET_KEY_HEADER)
        .max_age(3600)
}

async fn relay_application(
    request: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    orchestrator: web::Data<RelayOrchestrator>,
) -> HttpResponse {
    let ctx = request_context(&request);
    respond(orchestrator.relay_by_application(&path, &body, &ctx).await)
}

async fn relay_load_balancer(
    request: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    orchestrator: web::Data<RelayOrchestrator>,
) -> HttpResponse {
    let ctx = request_context(&request);
    respond(orchestrator.relay_by_load_balancer(&path, &body, &ctx).await)
}

async fn prometheus_metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(gateway_o11y::metrics::export_text())
}

/// Builds the orchestrator's request context from the HTTP surface: the
/// chain alias is the leftmost label of the host the client addressed,
/// optionally overridden by the explicit alias header for whitelisted
/// applications.
fn request_context(request: &HttpRequest) -> RequestContext {
    let host = request.connection_info().host().to_owned();
    let alias = host.split(['.', ':']).next().unwrap_or_default();
    let mut ctx = RequestContext::new(alias);
    ctx.host_alias = header_value(request, BLOCKCHAIN_ALIAS_HEADER);
    ctx.secret_key = header_value(request, SECRET_KEY_HEADER);
    ctx.user_agent = header_value(request, header::USER_AGENT.as_str());
    ctx.origin = header_value(request, header::ORIGIN.as_str());
    ctx
}

fn header_value(request: &HttpRequest, name: &str) -> Option<String> {
    request.headers().get(name)?.to_str().ok().map(str::to_owned)
}

fn respond(result: Result<RelayResponse, RelayError>) -> HttpResponse {
    match result {
        Ok(response) => {
            HttpResponse::Ok().content_type("application/json").body(response.payload)
        }
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            tracing::debug!(target: "http", %err, status = status.as_u16(), "relay request failed");
            HttpResponse::build(status).json(serde_json::json!({ "error": err.to_string() }))
        }
    }
}
