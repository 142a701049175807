//! # Buffer Pool
//!
//! Object pool for reusable instances (byte buffers, framing storage) so the message
//! path does not allocate per message.
//!
//! Instances are created through a factory only when the pool runs dry, and live
//! until [`Pool::clear`] hands every pooled instance to the disposer. Nothing is
//! disposed implicitly.
//!
//! The pool is owned by one world and used from that world's thread only; it does no
//! locking of its own.
//!
//! ## Usage
//! ```rust
//! use net_session::utils::buffer_pool::BufferPool;
//!
//! let mut pool = BufferPool::with_buffers(4, 1024);
//! let mut buffer = pool.take();
//! buffer.extend_from_slice(b"payload");
//! pool.give(buffer);
//! assert_eq!(pool.available(), 4);
//! ```

use std::fmt;

type Factory<T> = Box<dyn FnMut() -> T>;
type Disposer<T> = Box<dyn FnMut(T)>;

/// Single-threaded pool of reusable instances
pub struct Pool<T> {
    items: Vec<T>,
    factory: Factory<T>,
    disposer: Disposer<T>,
}

impl<T> Pool<T> {
    /// Create an empty pool with a factory and a disposer
    pub fn new<F, D>(factory: F, disposer: D) -> Self
    where
        F: FnMut() -> T + 'static,
        D: FnMut(T) + 'static,
    {
        Self {
            items: Vec::new(),
            factory: Box::new(factory),
            disposer: Box::new(disposer),
        }
    }

    /// Pre-create `count` instances
    pub fn warm(&mut self, count: usize) {
        self.items.reserve(count);
        for _ in 0..count {
            let item = (self.factory)();
            self.items.push(item);
        }
    }

    /// Take a pooled instance, creating one if the pool is empty
    pub fn take(&mut self) -> T {
        match self.items.pop() {
            Some(item) => item,
            None => (self.factory)(),
        }
    }

    /// Return an instance for reuse
    pub fn give(&mut self, item: T) {
        self.items.push(item);
    }

    /// Dispose every pooled instance and empty the pool
    pub fn clear(&mut self) {
        for item in self.items.drain(..) {
            (self.disposer)(item);
        }
    }

    /// Number of instances currently waiting in the pool
    pub fn available(&self) -> usize {
        self.items.len()
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("available", &self.items.len())
            .finish()
    }
}

/// Pool of byte buffers. Returned buffers are cleared but keep their capacity.
#[derive(Debug)]
pub struct BufferPool {
    inner: Pool<Vec<u8>>,
}

impl BufferPool {
    /// Create a pool holding `count` buffers of `capacity` bytes each
    pub fn with_buffers(count: usize, capacity: usize) -> Self {
        let mut inner = Pool::new(move || Vec::with_capacity(capacity), drop);
        inner.warm(count);
        Self { inner }
    }

    /// Take an empty buffer
    pub fn take(&mut self) -> Vec<u8> {
        self.inner.take()
    }

    /// Return a buffer; its contents are discarded
    pub fn give(&mut self, mut buffer: Vec<u8>) {
        buffer.clear();
        self.inner.give(buffer);
    }

    /// Release every pooled buffer
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Get the current number of available buffers in the pool
    pub fn available(&self) -> usize {
        self.inner.available()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::with_buffers(
            crate::config::DEFAULT_BUFFER_POOL_SIZE,
            crate::config::MAX_MESSAGE_SIZE,
        )
    }
}
