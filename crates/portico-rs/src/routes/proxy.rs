use crate::module::ReverseProxyModule;
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;

/// Catch-all handler: every path not claimed by a reserved endpoint lands
/// here and is dispatched through the routing engine. The request body is
/// buffered by the server so dry-run and composite routes can replay it.
pub async fn proxy_entry(
    req: HttpRequest,
    body: web::Bytes,
    module: web::Data<Arc<ReverseProxyModule>>,
) -> HttpResponse {
    module.handle(&req, body).await
}
