mod balance;
mod chain;
mod health;
mod mining;
pub mod models;
mod tx;
mod wallet;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::web::{self, ServiceConfig};
use actix_web::{Error, HttpRequest};

pub use models::AppState;

/// Malformed bodies get the same `{status, result}` envelope as every other failure.
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> Error {
    let response = models::bad_request(format!("invalid request body: {err}"));
    InternalError::from_response(err, response).into()
}

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .app_data(web::JsonConfig::default().error_handler(json_error))
            .service(health::health_check)
            .service(tx::post_transaction)
            .service(tx::get_pending)
            .service(chain::post_block)
            .service(chain::get_latest_block)
            .service(chain::get_block)
            .service(chain::get_chain)
            .service(mining::get_mining_info)
            .service(balance::get_balance)
            .service(balance::get_accounts)
            .service(wallet::create_wallet),
    );
}
