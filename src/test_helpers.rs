use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::error::NodeApiError;
use crate::node_api::{
    Block, Blockchain, MiningJob, MiningJobId, MiningStatus, RemoteDataClient, Transaction,
    TransactionDraft,
};

pub fn sample_transaction(id: &str, amount: f64) -> Transaction {
    Transaction {
        from_address: "publicKeyFromAddress1".to_string(),
        to_address: "publicKeyToAddress1".to_string(),
        amount,
        timestamp: 1622547600,
        transaction_id: id.to_string(),
        signature: "MEUCIQDfZ5x".to_string(),
        is_sign_valid: true,
    }
}

pub fn sample_blockchain(blocks: usize) -> Blockchain {
    let blocks = (0..blocks)
        .map(|i| Block {
            transactions: vec![sample_transaction(&format!("tx-{}", i), 10.0)],
            timestamp: 1622547602 + i as i64,
            previous_hash: format!("{:064x}", i),
            nonce: 1000 + i as u64,
            hash: format!("{:064x}", i + 1),
            capacity: 2,
        })
        .collect();
    Blockchain {
        blocks,
        block_size: 2,
        mining_reward: 5.0,
        difficulty: None,
    }
}

#[derive(Debug, Clone)]
pub enum StatusReply {
    Pending,
    Successful(&'static str),
    Failed(&'static str),
    NotFound,
    TransportError,
    Panic,
}

fn transport_error() -> NodeApiError {
    NodeApiError::Network {
        status: None,
        message: "connection refused".to_string(),
    }
}

/// In-memory node with scripted mining replies and call counters.
pub struct FakeNode {
    blockchain: Mutex<Blockchain>,
    pool: Mutex<Vec<Transaction>>,
    blockchain_failures: Mutex<VecDeque<NodeApiError>>,
    start_replies: Mutex<VecDeque<Result<MiningJobId, NodeApiError>>>,
    status_replies: Mutex<VecDeque<StatusReply>>,
    latency: Duration,
    pub blockchain_fetches: AtomicUsize,
    pub pool_fetches: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    status_in_flight: AtomicUsize,
    pub max_status_in_flight: AtomicUsize,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(10))
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            blockchain: Mutex::new(sample_blockchain(1)),
            pool: Mutex::new(vec![sample_transaction("pending-1", 3.5)]),
            blockchain_failures: Mutex::new(VecDeque::new()),
            start_replies: Mutex::new(VecDeque::new()),
            status_replies: Mutex::new(VecDeque::new()),
            latency,
            blockchain_fetches: AtomicUsize::new(0),
            pool_fetches: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            status_in_flight: AtomicUsize::new(0),
            max_status_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_blockchain(&self, chain: Blockchain) {
        *self.blockchain.lock().unwrap() = chain;
    }

    pub fn fail_next_blockchain_fetch(&self, error: NodeApiError) {
        self.blockchain_failures.lock().unwrap().push_back(error);
    }

    pub fn reply_to_start(&self, reply: Result<&str, NodeApiError>) {
        self.start_replies
            .lock()
            .unwrap()
            .push_back(reply.map(MiningJobId::new));
    }

    /// Queues status replies; once the queue is empty the job stays pending.
    pub fn reply_to_status(&self, replies: impl IntoIterator<Item = StatusReply>) {
        self.status_replies.lock().unwrap().extend(replies);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteDataClient for FakeNode {
    async fn fetch_blockchain(&self) -> Result<Blockchain, NodeApiError> {
        self.blockchain_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if let Some(error) = self.blockchain_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.blockchain.lock().unwrap().clone())
    }

    async fn fetch_transaction_pool(&self) -> Result<Vec<Transaction>, NodeApiError> {
        self.pool_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(self.pool.lock().unwrap().clone())
    }

    async fn submit_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<Transaction, NodeApiError> {
        draft.validate()?;
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        let tx = Transaction {
            from_address: draft.from.clone(),
            to_address: draft.to.clone(),
            amount: draft.amount,
            timestamp: 1622551600,
            transaction_id: format!("submitted-{}", self.submit_calls.load(Ordering::SeqCst)),
            signature: "sig".to_string(),
            is_sign_valid: true,
        };
        self.pool.lock().unwrap().push(tx.clone());
        Ok(tx)
    }

    async fn start_mining_job(&self) -> Result<MiningJobId, NodeApiError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.start_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MiningJobId::new("J1")))
    }

    async fn get_mining_job_status(&self, id: &MiningJobId) -> Result<MiningJob, NodeApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.status_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_status_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.status_in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .status_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StatusReply::Pending);
        let job = |status, details: &str| MiningJob {
            id: id.clone(),
            status,
            details: details.to_string(),
        };
        match reply {
            StatusReply::Pending => Ok(job(MiningStatus::Pending, "")),
            StatusReply::Successful(details) => Ok(job(MiningStatus::Successful, details)),
            StatusReply::Failed(details) => Ok(job(MiningStatus::Failed, details)),
            StatusReply::NotFound => Ok(MiningJob::not_found(id.clone())),
            StatusReply::TransportError => Err(transport_error()),
            StatusReply::Panic => panic!("status handler crashed for job {}", id),
        }
    }
}

/// Serves `router` on an ephemeral local port and returns its base url.
pub async fn spawn_mock_node(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
