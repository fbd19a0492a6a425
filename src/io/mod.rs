//! I/O utilities: relay buffer pool and bidirectional copy

mod buffer_pool;
mod relay;

pub use buffer_pool::{BufferPoolStats, PooledBuffer, RelayBufferPool, DEFAULT_BUFFER_SIZE};
pub use relay::relay;
