use actix_web::{Responder, get};

use super::models::ok;

#[get("/health/")]
pub async fn health_check() -> impl Responder {
    ok("API is up and running 🦀")
}
