use actix_web::{Responder, post};

use super::models::{NewWalletResponse, ok};
use crate::wallet::generate_keypair;

/// Dev helper: fresh keypair and its checksum address. Nothing is stored.
#[post("/wallet/new/")]
pub async fn create_wallet() -> impl Responder {
    let (sk, pk, addr) = generate_keypair();
    ok(NewWalletResponse {
        private_key: sk,
        public_key: pk,
        address: addr,
    })
}
