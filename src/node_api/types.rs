use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::NodeApiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub from_address: String,
    pub to_address: String,
    pub amount: f64,
    pub timestamp: i64,
    pub transaction_id: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub is_sign_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub transactions: Vec<Transaction>,
    pub timestamp: i64,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
    pub capacity: u32,
}

/// Full snapshot returned by `GET /blockchain`. Replaced wholesale on every
/// successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blockchain {
    pub blocks: Vec<Block>,
    pub block_size: u32,
    pub mining_reward: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u32>,
}

impl Blockchain {
    pub fn height(&self) -> usize {
        self.blocks.len()
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.blocks.last()
    }
}

/// Body of `POST /transactions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    pub private_key: String,
    pub from: String,
    pub to: String,
    pub amount: f64,
}

impl TransactionDraft {
    /// Field checks the submission form enforces before anything is sent.
    pub fn validate(&self) -> Result<(), NodeApiError> {
        for (name, value) in [
            ("privateKey", &self.private_key),
            ("from", &self.from),
            ("to", &self.to),
        ] {
            if value.trim().is_empty() {
                return Err(NodeApiError::validation(format!("{} is required", name)));
            }
        }
        if !self.amount.is_finite() {
            return Err(NodeApiError::validation("amount must be a number"));
        }
        if self.amount <= 0.0 {
            return Err(NodeApiError::validation("amount must be bigger than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MiningJobId(String);

impl MiningJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MiningJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiningStatus {
    Pending,
    Successful,
    Failed,
}

impl MiningStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MiningStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MiningJob {
    pub id: MiningJobId,
    pub status: MiningStatus,
    pub details: String,
}

impl MiningJob {
    pub fn not_found(id: MiningJobId) -> Self {
        Self {
            id,
            status: MiningStatus::Failed,
            details: "job not found".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MineResponse {
    pub id: MiningJobId,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MiningStatusResponse {
    pub status: MiningStatus,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ErrorDetails {
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(amount: f64) -> TransactionDraft {
        TransactionDraft {
            private_key: "key".to_string(),
            from: "alice".to_string(),
            to: "bob".to_string(),
            amount,
        }
    }

    #[test]
    fn test_blockchain_snapshot_uses_camel_case_fields() {
        let value = json!({
            "blocks": [{
                "transactions": [{
                    "fromAddress": "alice",
                    "toAddress": "bob",
                    "amount": 50.75,
                    "timestamp": 1622547600,
                    "transactionId": "b6f1c4e6",
                    "signature": "MEUCIQ",
                    "isSignValid": true
                }],
                "timestamp": 1622547602,
                "previousHash": "0000",
                "nonce": 23857,
                "hash": "000000b8",
                "capacity": 2
            }],
            "blockSize": 2,
            "miningReward": 5.0
        });

        let chain: Blockchain = serde_json::from_value(value).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.block_size, 2);
        assert_eq!(chain.difficulty, None);
        let block = chain.latest_block().unwrap();
        assert_eq!(block.nonce, 23857);
        assert_eq!(block.transactions[0].from_address, "alice");
        assert!(block.transactions[0].is_sign_valid);
    }

    #[test]
    fn test_transaction_without_signature_fields_still_parses() {
        let tx: Transaction = serde_json::from_value(json!({
            "fromAddress": "",
            "toAddress": "miner",
            "amount": 5.0,
            "timestamp": 1,
            "transactionId": "reward"
        }))
        .unwrap();
        assert_eq!(tx.signature, "");
        assert!(!tx.is_sign_valid);
    }

    #[test]
    fn test_mining_status_parses_lowercase() {
        let status: MiningStatusResponse =
            serde_json::from_value(json!({"status": "successful", "details": "Block #42 mined"}))
                .unwrap();
        assert_eq!(status.status, MiningStatus::Successful);
        assert!(status.status.is_terminal());

        let status: MiningStatusResponse =
            serde_json::from_value(json!({"status": "pending"})).unwrap();
        assert_eq!(status.status, MiningStatus::Pending);
        assert_eq!(status.details, "");
    }

    #[test]
    fn test_draft_serializes_private_key_in_camel_case() {
        let body = serde_json::to_value(draft(5.0)).unwrap();
        assert_eq!(body["privateKey"], "key");
        assert_eq!(body["amount"], 5.0);
    }

    #[test]
    fn test_draft_validation() {
        assert!(draft(5.0).validate().is_ok());
        assert_eq!(
            draft(-5.0).validate(),
            Err(NodeApiError::validation("amount must be bigger than 0"))
        );
        assert!(draft(0.0).validate().is_err());
        assert!(draft(f64::NAN).validate().is_err());

        let mut missing_to = draft(5.0);
        missing_to.to = "  ".to_string();
        assert_eq!(
            missing_to.validate(),
            Err(NodeApiError::validation("to is required"))
        );
    }
}
