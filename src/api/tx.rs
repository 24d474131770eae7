use actix_web::{Responder, get, post, web};
use log::debug;
use std::time::Instant;

use super::models::{AppState, NewTxResponse, ok, store_error, tx_error};
use crate::transaction::Transaction;
use crate::vm::Admission;

/// Submit a signed transfer into the pending pool.
#[post("/transactions/")]
pub async fn post_transaction(
    state: web::Data<AppState>,
    body: web::Json<Transaction>,
) -> impl Responder {
    let t0 = Instant::now();
    let tx = body.into_inner();
    debug!(
        "POST /transactions/ - received {} from={} index={}",
        tx.hash, tx.from, tx.index
    );

    let result = state.blockchain.add_transaction(&tx).await;
    debug!(
        "POST /transactions/ - {} handled in {} ms",
        tx.hash,
        t0.elapsed().as_millis()
    );

    match result {
        Ok(admission) => ok(NewTxResponse {
            hash: tx.hash,
            duplicate: admission == Admission::Duplicate,
        }),
        Err(e) => tx_error(e),
    }
}

/// Everything waiting in the pending pool, selectable or not.
#[get("/transactions/pending/")]
pub async fn get_pending(state: web::Data<AppState>) -> impl Responder {
    match state.blockchain.pending_transactions().await {
        Ok(txs) => ok(txs),
        Err(e) => store_error(e),
    }
}
