//! Buffer allocation strategies for the read path.

use bytes::BytesMut;


/// Strategy for allocating the buffer each read fills
///
/// The read pipeline asks for a fresh buffer before every read and reads into its spare
/// capacity, so the capacity bounds the size of each delivered chunk.
pub trait Buffers: Send + Sync {
    /// Allocate the buffer for the next read
    fn create(&self) -> BytesMut;
}

impl<F> Buffers for F
where
    F: Fn() -> BytesMut + Send + Sync,
{
    fn create(&self) -> BytesMut {
        self()
    }
}

/// Fixed-size buffers
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Standard {
    /// One byte, the smallest possible buffer; useful for debugging
    Min,
    /// One kibibyte
    K1,
    /// Four kibibytes
    K4,
    /// Eight kibibytes
    K8,
    /// Sixteen kibibytes
    K16,
}

impl Standard {
    /// Buffer capacity in bytes
    pub const fn size(self) -> usize {
        match self {
            Standard::Min => 1,
            Standard::K1 => 1024,
            Standard::K4 => 4 * 1024,
            Standard::K8 => 8 * 1024,
            Standard::K16 => 16 * 1024,
        }
    }
}

impl Default for Standard {
    fn default() -> Self {
        Standard::K8
    }
}

impl Buffers for Standard {
    fn create(&self) -> BytesMut {
        BytesMut::with_capacity(self.size())
    }
}

/// Buffers of an arbitrary fixed capacity
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fixed(pub usize);

impl Buffers for Fixed {
    fn create(&self) -> BytesMut {
        BytesMut::with_capacity(self.0)
    }
}
