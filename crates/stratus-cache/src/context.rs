//! Pipeline vocabulary: query context, stages, and the chain walker.

use async_trait::async_trait;
use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Stage error types.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("stage timed out")]
    Timeout,
}

/// Result type for stage execution.
pub type Result<T> = std::result::Result<T, StageError>;

/// Context for a DNS query as it moves through the pipeline.
///
/// Holds the query message and the response slot that stages fill in.
/// `Clone` produces an independent deep copy, safe to hand to a background
/// task while the original keeps moving.
#[derive(Debug, Clone)]
pub struct QueryContext {
    query: Message,
    response: Option<Message>,

    /// Client address, when known.
    pub client: Option<SocketAddr>,

    /// When the query entered the pipeline.
    pub received_at: Instant,
}

impl QueryContext {
    /// Creates a context for a query message.
    pub fn new(query: Message) -> Self {
        Self {
            query,
            response: None,
            client: None,
            received_at: Instant::now(),
        }
    }

    /// Attaches the client address.
    pub fn with_client(mut self, client: SocketAddr) -> Self {
        self.client = Some(client);
        self
    }

    /// Returns the query message.
    pub fn query(&self) -> &Message {
        &self.query
    }

    /// Returns the response, if any stage has produced one.
    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    /// Sets (or replaces) the response.
    pub fn set_response(&mut self, response: Message) {
        self.response = Some(response);
    }

    /// Takes the response out of the context.
    pub fn take_response(&mut self) -> Option<Message> {
        self.response.take()
    }
}

/// One stage of the query pipeline.
///
/// A stage may inspect and mutate the context, and decides whether and
/// when to hand the query to the rest of the chain via `next`.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Executes this stage.
    async fn execute(&self, qctx: &mut QueryContext, next: ChainWalker) -> Result<()>;
}

/// Cursor over the remaining stages of a pipeline.
///
/// Cloning is cheap; a walker can be captured by a background task and
/// invoked independently of the foreground query.
#[derive(Clone)]
pub struct ChainWalker {
    stages: Arc<[Arc<dyn Stage>]>,
    index: usize,
}

impl ChainWalker {
    /// Creates a walker over a full pipeline.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            stages: stages.into(),
            index: 0,
        }
    }

    /// Invokes the next stage, if any.
    ///
    /// Walking past the end of the chain is not an error; the context is
    /// simply left as the last stage produced it.
    pub async fn next(&self, qctx: &mut QueryContext) -> Result<()> {
        match self.stages.get(self.index) {
            Some(stage) => {
                let rest = Self {
                    stages: self.stages.clone(),
                    index: self.index + 1,
                };
                stage.execute(qctx, rest).await
            }
            None => Ok(()),
        }
    }
}
