use actix_web::HttpResponse;
use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::blockchain::{Blockchain, ChainError, ChainParams};
use crate::store::StoreError;
use crate::vm::TxError;

/// Shared application state: the ledger service behind every handler.
pub struct AppState {
    pub blockchain: Arc<Blockchain>,
}

impl AppState {
    pub fn new(blockchain: Arc<Blockchain>) -> Self {
        Self { blockchain }
    }
}

/// Envelope of every response: `status` is 1 on success, 0 on failure, and
/// `result` holds either the payload or the error message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: u8,
    pub result: T,
}

pub fn ok<T: Serialize>(result: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse { status: 1, result })
}

pub fn bad_request(message: impl ToString) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse {
        status: 0,
        result: message.to_string(),
    })
}

pub fn not_found(message: impl ToString) -> HttpResponse {
    HttpResponse::NotFound().json(ApiResponse {
        status: 0,
        result: message.to_string(),
    })
}

pub fn internal_error(message: impl ToString) -> HttpResponse {
    let message = message.to_string();
    error!("{message}");
    HttpResponse::InternalServerError().json(ApiResponse {
        status: 0,
        result: message,
    })
}

pub fn chain_error(e: ChainError) -> HttpResponse {
    if e.is_rejection() {
        bad_request(e)
    } else {
        internal_error(e)
    }
}

pub fn tx_error(e: TxError) -> HttpResponse {
    match e {
        TxError::Store(e) => store_error(e),
        e => bad_request(e),
    }
}

pub fn store_error(e: StoreError) -> HttpResponse {
    internal_error(e)
}

/* ---------- TX API Models ---------- */

#[derive(Debug, Serialize, Deserialize)]
pub struct NewTxResponse {
    pub hash: String,
    /// True when the same signed transaction was already pending.
    pub duplicate: bool,
}

/* ---------- Chain API Models ---------- */

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResponse {
    #[serde(flatten)]
    pub params: ChainParams,
    pub state_root: String,
}

/* ---------- Wallet API Models (dev) ---------- */

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWalletResponse {
    pub private_key: String,
    pub public_key: String,
    pub address: String,
}
