//! CLOB client: order book reads and fill-or-kill order submission.
//!
//! Order construction signs EIP-712 typed data for the CTF exchange
//! contract. Everything here is crate-private plumbing for the guarded
//! executor, which is the only component allowed to submit orders.

use alloy_primitives::{keccak256, Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Side;

use super::types::{OrderBook, OrderResponse};

/// CTF Exchange contract on Polygon.
const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Parameters for a fill-or-kill market order.
#[derive(Debug, Clone)]
pub struct MarketOrderArgs {
    pub token_id: String,
    pub side: Side,
    /// Size in outcome tokens.
    pub size: Decimal,
    /// Limit price (0 to 1).
    pub price: Decimal,
}

/// Signed order ready for submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub side: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub signature_type: u8,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload<'a> {
    order: &'a SignedOrder,
    owner: String,
    order_type: &'static str,
}

/// Client for order placement against the CLOB.
pub struct ClobClient {
    http: Client,
    signer: PrivateKeySigner,
    host: String,
    chain_id: u64,
    /// Proxy wallet holding the funds; orders are made on its behalf.
    funder: String,
}

impl ClobClient {
    pub fn new(host: &str, chain_id: u64, private_key: &str, funder: &str) -> Result<Self> {
        let pk = private_key.strip_prefix("0x").unwrap_or(private_key);
        let signer = PrivateKeySigner::from_str(pk).context("Invalid private key")?;

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            signer,
            host: host.trim_end_matches('/').to_string(),
            chain_id,
            funder: funder.to_string(),
        })
    }

    /// Get the order book for a token.
    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBook> {
        let url = format!("{}/book?token_id={}", self.host, token_id);
        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to get order book: {} - {}", status, text));
        }

        resp.json().await.context("Failed to parse order book")
    }

    /// Build and sign a market order. Does not submit anything.
    pub async fn create_market_order(&self, args: &MarketOrderArgs) -> Result<SignedOrder> {
        let maker = self.funder.clone();
        let signer_addr = format!("{:?}", self.signer.address());

        // BUY: give USDC (size * price), receive tokens (size).
        // SELL: give tokens (size), receive USDC (size * price).
        let usdc_amount = args.size * args.price;
        let (maker_amount, taker_amount) = match args.side {
            Side::Buy => (to_base_units(usdc_amount), to_base_units(args.size)),
            Side::Sell => (to_base_units(args.size), to_base_units(usdc_amount)),
        };

        let salt = uuid::Uuid::new_v4().as_u128().to_string();
        let nonce = "0".to_string();
        let expiration = "0".to_string();
        let fee_rate_bps = "0".to_string();

        let order_hash = compute_order_hash(
            &salt,
            &maker,
            &signer_addr,
            ZERO_ADDRESS,
            &args.token_id,
            &maker_amount,
            &taker_amount,
            &expiration,
            &nonce,
            &fee_rate_bps,
            side_index(args.side),
        )?;
        let domain_hash = compute_domain_separator(self.chain_id)?;

        // keccak256("\x19\x01" || domainSeparator || orderHash)
        let mut message = vec![0x19, 0x01];
        message.extend_from_slice(&domain_hash);
        message.extend_from_slice(&order_hash);
        let final_hash = keccak256(&message);

        let signature = self
            .signer
            .sign_hash(&final_hash)
            .await
            .context("Failed to sign order")?;

        Ok(SignedOrder {
            salt,
            maker,
            signer: signer_addr,
            taker: ZERO_ADDRESS.to_string(),
            token_id: args.token_id.clone(),
            maker_amount,
            taker_amount,
            side: args.side.as_str().to_string(),
            expiration,
            nonce,
            fee_rate_bps,
            signature_type: 1, // proxy wallet
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        })
    }

    /// Submit a signed order as fill-or-kill.
    pub async fn post_order(&self, order: &SignedOrder) -> Result<OrderResponse> {
        let payload = OrderPayload {
            order,
            owner: self.funder.clone(),
            order_type: "FOK",
        };

        let url = format!("{}/order", self.host);
        let resp = self.http.post(&url).json(&payload).send().await?;

        if !resp.status().is_success() && !resp.status().is_client_error() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Order submission failed: {} - {}", status, text));
        }

        // 4xx bodies carry the exchange's structured error payload.
        resp.json().await.context("Failed to parse order response")
    }
}

fn side_index(side: Side) -> u8 {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

/// Convert a decimal amount to 6-decimal base units (USDC and CTF tokens).
fn to_base_units(amount: Decimal) -> String {
    let scaled = amount * dec!(1_000_000);
    scaled
        .trunc()
        .to_string()
        .split('.')
        .next()
        .unwrap_or("0")
        .to_string()
}

#[allow(clippy::too_many_arguments)]
fn compute_order_hash(
    salt: &str,
    maker: &str,
    signer: &str,
    taker: &str,
    token_id: &str,
    maker_amount: &str,
    taker_amount: &str,
    expiration: &str,
    nonce: &str,
    fee_rate_bps: &str,
    side: u8,
) -> Result<[u8; 32]> {
    let type_hash = keccak256(
        b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)"
    );

    let mut encoded = Vec::with_capacity(13 * 32);
    encoded.extend_from_slice(type_hash.as_slice());
    encoded.extend_from_slice(&encode_uint256(salt)?);
    encoded.extend_from_slice(&encode_address(maker)?);
    encoded.extend_from_slice(&encode_address(signer)?);
    encoded.extend_from_slice(&encode_address(taker)?);
    encoded.extend_from_slice(&encode_uint256(token_id)?);
    encoded.extend_from_slice(&encode_uint256(maker_amount)?);
    encoded.extend_from_slice(&encode_uint256(taker_amount)?);
    encoded.extend_from_slice(&encode_uint256(expiration)?);
    encoded.extend_from_slice(&encode_uint256(nonce)?);
    encoded.extend_from_slice(&encode_uint256(fee_rate_bps)?);
    encoded.extend_from_slice(&encode_uint8(side));
    encoded.extend_from_slice(&encode_uint8(1));

    Ok(keccak256(&encoded).0)
}

fn compute_domain_separator(chain_id: u64) -> Result<[u8; 32]> {
    let type_hash = keccak256(
        b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    );
    let name_hash = keccak256(b"Polymarket CTF Exchange");
    let version_hash = keccak256(b"1");

    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(type_hash.as_slice());
    encoded.extend_from_slice(name_hash.as_slice());
    encoded.extend_from_slice(version_hash.as_slice());
    encoded.extend_from_slice(&encode_uint256(&chain_id.to_string())?);
    encoded.extend_from_slice(&encode_address(CTF_EXCHANGE)?);

    Ok(keccak256(&encoded).0)
}

fn encode_address(addr: &str) -> Result<[u8; 32]> {
    let addr = Address::from_str(addr.strip_prefix("0x").unwrap_or(addr))
        .context("Invalid address")?;
    let mut buf = [0u8; 32];
    buf[12..].copy_from_slice(addr.as_slice());
    Ok(buf)
}

fn encode_uint256(value: &str) -> Result<[u8; 32]> {
    let n = U256::from_str(value).context("Invalid uint256")?;
    Ok(n.to_be_bytes())
}

fn encode_uint8(value: u8) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[31] = value;
    buf
}
