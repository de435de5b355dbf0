use bytes::Bytes;

/// A fragment of an HTTP message body as delivered by the transport.
///
/// A chunk is immutable once created. The `last` flag marks the terminal fragment of a body:
/// its data (if any) is delivered like any other chunk and the stream then ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    data: Bytes,
    last: bool,
}

impl Chunk {
    /// Creates a mid-stream chunk
    #[inline]
    pub fn data(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), last: false }
    }

    /// Creates the terminal chunk of a body, carrying the final fragment of data
    #[inline]
    pub fn last(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), last: true }
    }

    /// Creates a terminal chunk without data
    #[inline]
    pub fn eof() -> Self {
        Self { data: Bytes::new(), last: true }
    }

    /// Returns true if this chunk ends the body
    #[inline]
    pub fn is_last(&self) -> bool {
        self.last
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the chunk, returning its data and the terminal flag
    pub fn into_parts(self) -> (Bytes, bool) {
        (self.data, self.last)
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Self::data(bytes)
    }
}
