use actix_web::{Responder, get, web};

use super::models::{AppState, bad_request, ok, store_error};
use crate::wallet::is_valid_address;

/// Balance and nonce of an account; unknown accounts read as zero.
#[get("/balance/{address}/")]
pub async fn get_balance(state: web::Data<AppState>, path: web::Path<(String,)>) -> impl Responder {
    let address = path.into_inner().0;
    if !is_valid_address(&address) {
        return bad_request(format!("`{address}` is not a checksum address"));
    }

    match state.blockchain.get_balance(&address).await {
        Ok(account) => ok(account),
        Err(e) => store_error(e),
    }
}

/// Every known account, ascending by address.
#[get("/accounts/")]
pub async fn get_accounts(state: web::Data<AppState>) -> impl Responder {
    match state.blockchain.accounts().accounts().await {
        Ok(accounts) => ok(accounts),
        Err(e) => store_error(e),
    }
}
