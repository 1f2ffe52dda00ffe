//! Combine strategies turning buffered payloads into outgoing payloads

use bytes::{BufMut, Bytes, BytesMut};

/// Turns the ordered payloads of one flush into zero or more outputs
///
/// Returning nothing is fine when no payload merits emission; returning
/// several outputs is fine when the inputs cannot all be merged into one.
/// Closures of the shape `Fn(Vec<Bytes>) -> Vec<Bytes>` are strategies too.
pub trait Combine: Send + Sync {
    fn combine(&self, payloads: Vec<Bytes>) -> Vec<Bytes>;
}

impl<F> Combine for F
where
    F: Fn(Vec<Bytes>) -> Vec<Bytes> + Send + Sync,
{
    fn combine(&self, payloads: Vec<Bytes>) -> Vec<Bytes> {
        (self)(payloads)
    }
}

/// Joins JSON documents into JSON arrays
///
/// Payloads are copied verbatim as array elements, so they must already be
/// valid JSON. With a size limit, a new array is started whenever the next
/// element would push the current one past the limit. A single payload larger
/// than the limit is still emitted, alone in its own array.
#[derive(Debug, Clone, Default)]
pub struct JsonArray {
    max_bytes: Option<usize>,
}

impl JsonArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the size of each produced array
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
        }
    }
}

impl Combine for JsonArray {
    fn combine(&self, payloads: Vec<Bytes>) -> Vec<Bytes> {
        let mut outputs = vec![];
        let mut current = BytesMut::new();

        for payload in payloads.iter().filter(|payload| !payload.is_empty()) {
            // separator + element + closing bracket
            if let Some(max) = self.max_bytes
                && !current.is_empty()
                && current.len() + payload.len() + 2 > max
            {
                current.put_u8(b']');
                outputs.push(current.split().freeze());
            }

            let separator = if current.is_empty() { b'[' } else { b',' };
            current.put_u8(separator);
            current.extend_from_slice(payload);
        }

        if !current.is_empty() {
            current.put_u8(b']');
            outputs.push(current.freeze());
        }

        outputs
    }
}

/// Joins payloads with a separator, e.g. newline-delimited records
#[derive(Debug, Clone)]
pub struct Concat {
    separator: Bytes,
}

impl Concat {
    pub fn new(separator: impl Into<Bytes>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn newline() -> Self {
        Self::new(Bytes::from_static(b"\n"))
    }
}

impl Combine for Concat {
    fn combine(&self, payloads: Vec<Bytes>) -> Vec<Bytes> {
        let mut joined = BytesMut::new();

        for payload in payloads.iter().filter(|payload| !payload.is_empty()) {
            if !joined.is_empty() {
                joined.extend_from_slice(&self.separator);
            }
            joined.extend_from_slice(payload);
        }

        if joined.is_empty() {
            vec![]
        } else {
            vec![joined.freeze()]
        }
    }
}
