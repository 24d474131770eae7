use actix_web::{Responder, get, web};

use super::models::{AppState, chain_error, ok};

/// Chain parameters, head block and the transfers a template should carry.
#[get("/mining/info/")]
pub async fn get_mining_info(state: web::Data<AppState>) -> impl Responder {
    match state.blockchain.mining_info().await {
        Ok(info) => ok(info),
        Err(e) => chain_error(e),
    }
}
