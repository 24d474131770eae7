use actix_web::{Responder, get, post, web};
use log::debug;

use super::models::{AppState, ChainResponse, chain_error, not_found, ok, store_error};
use crate::blockchain::{Block, ChainError};

/// Chain parameters plus the current state root.
#[get("/chain/")]
pub async fn get_chain(state: web::Data<AppState>) -> impl Responder {
    let params = match state.blockchain.params().await {
        Ok(params) => params,
        Err(e) => return chain_error(e),
    };
    match state.blockchain.accounts().compute_state_root().await {
        Ok(state_root) => ok(ChainResponse { params, state_root }),
        Err(e) => store_error(e),
    }
}

/// Submit a mined block. On success the stored block, with its state root, is returned.
#[post("/blocks/")]
pub async fn post_block(state: web::Data<AppState>, body: web::Json<Block>) -> impl Responder {
    let block = body.into_inner();
    debug!(
        "POST /blocks/ - #{} hash={} txs={}",
        block.index,
        block.hash,
        block.transactions.len()
    );
    match state.blockchain.submit_block(block).await {
        Ok(accepted) => ok(accepted),
        Err(e) => chain_error(e),
    }
}

#[get("/blocks/latest/")]
pub async fn get_latest_block(state: web::Data<AppState>) -> impl Responder {
    match state.blockchain.latest_block().await {
        Ok(block) => ok(block),
        Err(e) => chain_error(e),
    }
}

#[get("/blocks/{index}/")]
pub async fn get_block(state: web::Data<AppState>, path: web::Path<(u64,)>) -> impl Responder {
    let index = path.into_inner().0;
    match state.blockchain.block_by_height(index).await {
        Ok(Some(block)) => ok(block),
        Ok(None) => not_found(format!("block #{index} not found")),
        Err(e) => chain_error(ChainError::Store(e)),
    }
}
