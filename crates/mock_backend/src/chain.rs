//! 内存链数据库
//!
//! 用于测试的 `ChainDatabase` 实现：区块按位置存储，写请求先进入 pending，
//! 调用 `seal_block` 后才成为已提交区块。

use std::sync::Mutex;

use contracts::{
    Block, ChainDatabase, ChainRequest, ChainTransaction, ContractError, DatabaseId,
    ExecuteOutcome, FetchedBlock, NodeId, Statement, LATEST_BLOCK,
};
use tracing::instrument;

/// 失败注入配置
#[derive(Debug, Default, Clone)]
pub struct MemoryDatabaseConfig {
    /// 所有 execute 调用失败
    pub fail_execute: bool,
    /// 所有 fetch 调用失败
    pub fail_fetch: bool,
    /// execute 时 panic (用于 handler 隔离测试)
    pub panic_on_execute: bool,
}

/// 内存链数据库
pub struct MemoryDatabase {
    id: DatabaseId,
    blocks: Mutex<Vec<Block>>,
    pending: Mutex<Vec<ChainTransaction>>,
    executed: Mutex<Vec<ChainRequest>>,
    config: Mutex<MemoryDatabaseConfig>,
}

impl MemoryDatabase {
    /// 创建空链
    pub fn new(id: impl Into<DatabaseId>) -> Self {
        Self::with_blocks(id, Vec::new())
    }

    /// 使用已提交区块创建
    pub fn with_blocks(id: impl Into<DatabaseId>, blocks: Vec<Block>) -> Self {
        Self {
            id: id.into(),
            blocks: Mutex::new(blocks),
            pending: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            config: Mutex::new(MemoryDatabaseConfig::default()),
        }
    }

    /// 替换失败注入配置
    pub fn set_config(&self, config: MemoryDatabaseConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// 追加一个已提交区块
    pub fn push_block(&self, block: Block) {
        self.blocks.lock().unwrap().push(block);
    }

    /// 把 pending 交易封装为新区块，返回区块位置
    pub fn seal_block(&self) -> Option<i32> {
        let transactions = std::mem::take(&mut *self.pending.lock().unwrap());
        if transactions.is_empty() {
            return None;
        }
        let mut blocks = self.blocks.lock().unwrap();
        blocks.push(Block { transactions });
        Some(blocks.len() as i32 - 1)
    }

    /// 已收到的所有请求 (按到达顺序)
    pub fn executed_requests(&self) -> Vec<ChainRequest> {
        self.executed.lock().unwrap().clone()
    }

    /// 已提交区块数
    pub fn block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    fn config(&self) -> MemoryDatabaseConfig {
        self.config.lock().unwrap().clone()
    }
}

impl ChainDatabase for MemoryDatabase {
    fn database_id(&self) -> &DatabaseId {
        &self.id
    }

    #[instrument(
        name = "memory_db_execute",
        skip(self, request),
        fields(database_id = %self.id, seq_no = request.header.seq_no)
    )]
    async fn execute(&self, request: ChainRequest) -> Result<ExecuteOutcome, ContractError> {
        let config = self.config();
        if config.panic_on_execute {
            panic!("memory database '{}' asked to panic", self.id);
        }
        if config.fail_execute {
            return Err(ContractError::chain_execute(&self.id, "mock failure"));
        }

        let affected_rows = request.statements.len() as i64;
        self.executed.lock().unwrap().push(request.clone());
        self.pending
            .lock()
            .unwrap()
            .push(ChainTransaction { request });

        Ok(ExecuteOutcome {
            affected_rows,
            last_insert_id: 0,
        })
    }

    #[instrument(name = "memory_db_fetch_block_at", skip(self), fields(database_id = %self.id))]
    async fn fetch_block_at(&self, position: i32) -> Result<FetchedBlock, ContractError> {
        if self.config().fail_fetch {
            return Err(ContractError::chain_read(&self.id, position, "mock failure"));
        }

        let blocks = self.blocks.lock().unwrap();
        let len = blocks.len() as i32;
        let index = if position == LATEST_BLOCK {
            len - 1
        } else {
            position
        };

        if index < 0 || index >= len {
            return Err(ContractError::chain_read(
                &self.id,
                position,
                format!("block not found, chain has {len} blocks"),
            ));
        }

        Ok(FetchedBlock {
            block: blocks[index as usize].clone(),
            count: index,
            has_more: index < len - 1,
        })
    }
}

/// 构造测试区块：`len` 笔来自 `client` 的交易，序号从 `first_seq` 开始
pub fn synthetic_block(
    database_id: &DatabaseId,
    client: &NodeId,
    first_seq: u64,
    len: usize,
) -> Block {
    let transactions = (0..len as u64)
        .map(|offset| {
            let seq = first_seq + offset;
            ChainTransaction {
                request: ChainRequest::write(
                    client.clone(),
                    database_id.clone(),
                    seq,
                    vec![Statement::new(format!("INSERT INTO t VALUES ({seq})"))],
                ),
            }
        })
        .collect();
    Block { transactions }
}
